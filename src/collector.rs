use crate::error::FanOutError;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, Instrument};

/// Single-writer sink for task errors.
///
/// A spawned collector task owns the error list outright and appends in the
/// order errors arrive on its channel. The list is only handed out once every
/// sender is gone and the task has returned it through its `JoinHandle`.
pub(crate) struct ErrorCollector<E: Send + 'static> {
  tx: Mutex<Option<mpsc::Sender<E>>>,
  join_handle: Mutex<Option<JoinHandle<Vec<E>>>>,
  name: Arc<String>,
}

impl<E: Send + 'static> fmt::Debug for ErrorCollector<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ErrorCollector")
      .field("name", &self.name)
      .field("open", &self.tx.lock().is_some())
      .field("joinable", &self.join_handle.lock().is_some())
      .finish()
  }
}

impl<E: Send + 'static> ErrorCollector<E> {
  /// Starts the collector task with an inbound buffer of `buffer` errors.
  pub(crate) fn spawn(buffer: usize, tokio_handle: &TokioHandle, name: Arc<String>) -> Self {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let join_handle = tokio_handle.spawn(
      Self::run_collector_loop(rx).instrument(info_span!("fan_out_collector", name = %*name)),
    );
    Self {
      tx: Mutex::new(Some(tx)),
      join_handle: Mutex::new(Some(join_handle)),
      name,
    }
  }

  async fn run_collector_loop(mut rx: mpsc::Receiver<E>) -> Vec<E> {
    debug!("Error collector started.");
    let mut errors = Vec::new();
    while let Some(err) = rx.recv().await {
      errors.push(err);
      trace!(collected = errors.len(), "Collected task error.");
    }
    debug!(collected = errors.len(), "Error channel closed, collector stopping.");
    errors
  }

  /// Hands a task error to the collector, waiting only if its buffer is full.
  pub(crate) async fn report(&self, err: E) -> Result<(), FanOutError> {
    let tx = self.tx.lock().clone().ok_or(FanOutError::CollectorClosed)?;
    tx.send(err).await.map_err(|_| FanOutError::CollectorClosed)
  }

  /// Drops the collector's sender so its loop ends once the buffer is empty.
  /// Returns `false` if it was already closed.
  pub(crate) fn close(&self) -> bool {
    self.tx.lock().take().is_some()
  }

  /// Waits for the collector task to finish and takes its error list.
  ///
  /// Only completes once `close` has been called and every cloned sender
  /// has been dropped.
  pub(crate) async fn join(&self) -> Result<Vec<E>, FanOutError> {
    let handle = self.join_handle.lock().take();
    let Some(handle) = handle else {
      return Err(FanOutError::CollectorFailed(
        "collector was already joined".to_string(),
      ));
    };

    match handle.await {
      Ok(errors) => {
        info!(name = %*self.name, collected = errors.len(), "Error collector joined.");
        Ok(errors)
      }
      Err(join_error) => {
        error!(name = %*self.name, "Error joining collector task: {:?}", join_error);
        Err(FanOutError::CollectorFailed(join_error.to_string()))
      }
    }
  }
}
