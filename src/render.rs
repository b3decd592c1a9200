//! The render context: the single place where images reach their targets.
//!
//! Jobs never call the [`Renderer`] themselves. They submit a command to the
//! render task, which runs the commands one at a time and, immediately before
//! each render, checks that the submitting job was not cancelled and that the
//! target is still alive. A superseded job therefore can never paint over a
//! newer job's image.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::jobs::LoadJob;

/// Applies decoded images to display targets.
pub trait Renderer: Send + Sync + 'static {
  type Target: Send + Sync + 'static;
  type Image: Send + 'static;

  /// Show `image` on `target`. A zero `transition` swaps immediately, a
  /// positive one cross-fades from whatever is currently shown.
  fn render(&self, target: &Self::Target, image: Self::Image, transition: Duration);
}

/// What happened to a submitted render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
  Rendered,
  /// The target was dropped by its owner; not an error
  TargetGone,
  /// The job was cancelled or the context shut down
  Cancelled,
}

struct RenderCommand<R: Renderer> {
  job: Arc<LoadJob>,
  target: Weak<R::Target>,
  image: R::Image,
  transition: Duration,
  done: oneshot::Sender<RenderStatus>,
}

/// Handle used by jobs to submit renders.
pub struct RenderContext<R: Renderer> {
  tx: mpsc::UnboundedSender<RenderCommand<R>>,
}

impl<R: Renderer> Clone for RenderContext<R> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
    }
  }
}

impl<R: Renderer> RenderContext<R> {
  /// Spawn the render task. It stops when `shutdown` is cancelled or every
  /// context handle is dropped.
  pub fn spawn(renderer: R, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RenderCommand<R>>();

    let handle = tokio::spawn(async move {
      loop {
        let command = tokio::select! {
          biased;
          _ = shutdown.cancelled() => break,
          command = rx.recv() => match command {
            Some(command) => command,
            None => break,
          },
        };

        let status = if command.job.is_cancelled() {
          RenderStatus::Cancelled
        } else if let Some(target) = command.target.upgrade() {
          renderer.render(&target, command.image, command.transition);
          RenderStatus::Rendered
        } else {
          RenderStatus::TargetGone
        };

        trace!(key = %command.job.key(), job = command.job.id(), ?status, "Render command handled");
        // Ignore send errors - the job may have stopped waiting
        let _ = command.done.send(status);
      }
    });

    (Self { tx }, handle)
  }

  /// Submit a render for `job` and wait until the render task handled it.
  pub async fn submit(
    &self,
    job: &Arc<LoadJob>,
    target: &Weak<R::Target>,
    image: R::Image,
    transition: Duration,
  ) -> RenderStatus {
    let (done, rx) = oneshot::channel();
    let command = RenderCommand {
      job: Arc::clone(job),
      target: target.clone(),
      image,
      transition,
      done,
    };

    if self.tx.send(command).is_err() {
      return RenderStatus::Cancelled;
    }

    // A dropped sender means the render task shut down
    rx.await.unwrap_or(RenderStatus::Cancelled)
  }
}
