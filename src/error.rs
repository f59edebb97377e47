use thiserror::Error;

/// Errors raised by the `FanOut` runner itself.
///
/// Errors returned by task futures are never converted into this type; they are
/// collected as-is and handed back by [`FanOut::wait`](crate::FanOut::wait).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FanOutError {
  #[error("Capacity must be at least 1")]
  ZeroCapacity,

  #[error("Capacity {requested} exceeds the maximum of {max} slots")]
  CapacityTooLarge { requested: usize, max: usize },

  #[error("Runner is draining or closed, cannot accept new tasks")]
  Closed,

  #[error("wait() was already called on this runner")]
  AlreadyWaited,

  #[error("Submitted task future panicked")]
  TaskPanicked,

  #[error("Error collector stopped before the runner was closed")]
  CollectorClosed,

  #[error("Error collector failed to join: {0}")]
  CollectorFailed(String),
}
