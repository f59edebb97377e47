use crate::collector::ErrorCollector;
use crate::error::FanOutError;
use crate::slot::SlotGate;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, error, info, trace, warn};

const STATE_OPEN: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle of a [`FanOut`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutState {
  /// Accepting `run` calls.
  Open,
  /// Inside `wait`, taking back every slot.
  Draining,
  /// Collector stopped; errors have been handed to the `wait` caller.
  Closed,
}

impl From<u8> for FanOutState {
  fn from(raw: u8) -> Self {
    match raw {
      STATE_OPEN => FanOutState::Open,
      STATE_DRAINING => FanOutState::Draining,
      _ => FanOutState::Closed,
    }
  }
}

/// Runs caller-supplied futures with at most `capacity` of them in flight, and
/// gathers every error they return.
///
/// `run` does not spawn anything: the task future is awaited on the calling
/// task once a slot is free. Drive concurrency by calling `run` from as many
/// Tokio tasks as you like. Errors are surfaced only by [`FanOut::wait`], which
/// must be called once, after the last `run` has been issued. A `run` issued
/// once `wait` has started is rejected with [`FanOutError::Closed`].
pub struct FanOut<E: Send + 'static> {
  name: Arc<String>,
  gate: SlotGate,
  collector: ErrorCollector<E>,
  state: AtomicU8,
  next_task_seq: AtomicU64,
}

impl<E: Send + 'static> fmt::Debug for FanOut<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FanOut")
      .field("name", &self.name)
      .field("capacity", &self.gate.capacity())
      .field("in_flight", &self.gate.in_flight())
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}

impl<E: Send + 'static> FanOut<E> {
  /// Creates a runner with `capacity` slots and starts its error collector on
  /// `tokio_handle`.
  ///
  /// # Errors
  /// Returns `FanOutError::ZeroCapacity` for a capacity of 0 and
  /// `FanOutError::CapacityTooLarge` above the semaphore's limit.
  pub fn new(capacity: usize, tokio_handle: TokioHandle, name: &str) -> Result<Arc<Self>, FanOutError> {
    let gate = SlotGate::new(capacity).inspect_err(|e| {
      warn!(name = %name, capacity, "Refusing to create fan-out runner: {}", e);
    })?;
    let name = Arc::new(name.to_string());
    // One buffered error per slot: a task holding a slot can always enqueue its own.
    let collector = ErrorCollector::spawn(capacity, &tokio_handle, name.clone());

    info!(name = %*name, capacity, "Fan-out runner created.");
    Ok(Arc::new(Self {
      name,
      gate,
      collector,
      state: AtomicU8::new(STATE_OPEN),
      next_task_seq: AtomicU64::new(0),
    }))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn capacity(&self) -> usize {
    self.gate.capacity()
  }

  /// Number of tasks currently holding a slot. Never exceeds `capacity()`;
  /// slots taken back by a `wait` in progress are not counted.
  pub fn in_flight(&self) -> usize {
    self.gate.in_flight()
  }

  pub fn state(&self) -> FanOutState {
    FanOutState::from(self.state.load(AtomicOrdering::Acquire))
  }

  /// Waits for a free slot, then runs `task(payload)` to completion on the
  /// calling task and releases the slot.
  ///
  /// An `Err` returned by the task is forwarded to the error collector and
  /// only becomes visible through [`FanOut::wait`]; `run` itself still returns
  /// `Ok(())` in that case.
  ///
  /// # Errors
  /// - `FanOutError::Closed` if `wait` has already started. This also covers
  ///   a call that was still waiting for a slot when the drain took them all.
  /// - `FanOutError::TaskPanicked` if the task panicked. The slot is released
  ///   and the panic is not added to the collected errors.
  /// - `FanOutError::CollectorClosed` if the collector stopped unexpectedly.
  pub async fn run<T, F, Fut>(&self, task: F, payload: T) -> Result<(), FanOutError>
  where
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
  {
    if self.state() != FanOutState::Open {
      warn!(name = %*self.name, state = ?self.state(), "Run: Rejected task submitted after wait() began.");
      return Err(FanOutError::Closed);
    }

    let slot = match self.gate.acquire().await {
      Ok(slot) => slot,
      Err(e) => {
        warn!(name = %*self.name, "Run: Runner drained while task was waiting for a slot.");
        return Err(e);
      }
    };

    let task_seq = self.next_task_seq.fetch_add(1, AtomicOrdering::Relaxed);
    debug!(name = %*self.name, %task_seq, in_flight = self.gate.in_flight(), "Task admitted.");

    // Calling `task` inside the async block keeps a panic in the call itself
    // within catch_unwind.
    let outcome = AssertUnwindSafe(async move { task(payload).await })
      .catch_unwind()
      .await;

    let result = match outcome {
      Ok(Ok(())) => {
        trace!(name = %*self.name, %task_seq, "Task completed without error.");
        Ok(())
      }
      Ok(Err(task_error)) => {
        debug!(name = %*self.name, %task_seq, "Task returned an error, forwarding to collector.");
        self.collector.report(task_error).await.inspect_err(|_| {
          error!(name = %*self.name, %task_seq, "Error collector is gone, task error was lost.");
        })
      }
      Err(_panic_payload) => {
        error!(name = %*self.name, %task_seq, "Task panicked during execution.");
        Err(FanOutError::TaskPanicked)
      }
    };

    drop(slot);
    trace!(name = %*self.name, %task_seq, "Slot released.");
    result
  }

  /// Waits for every admitted task to finish, stops the collector, and returns
  /// the errors in the order they arrived.
  ///
  /// Returns `Ok(None)` when no task failed, so a single `if let Some(..)`
  /// tells "all succeeded" apart from "some failed". Call this once, after the
  /// last `run` has been issued. If the returned future is dropped before it
  /// completes the runner is left draining and cannot be reused.
  ///
  /// # Errors
  /// - `FanOutError::AlreadyWaited` on any call after the first.
  /// - `FanOutError::CollectorFailed` if the collector task could not be joined.
  pub async fn wait(&self) -> Result<Option<Vec<E>>, FanOutError> {
    if self
      .state
      .compare_exchange(STATE_OPEN, STATE_DRAINING, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_err()
    {
      warn!(name = %*self.name, state = ?self.state(), "Wait: Called more than once.");
      return Err(FanOutError::AlreadyWaited);
    }

    info!(name = %*self.name, in_flight = self.gate.in_flight(), "Draining all slots.");
    let drained = self.gate.drain().await;
    self.collector.close();
    let joined = self.collector.join().await;
    self.state.store(STATE_CLOSED, AtomicOrdering::Release);

    drained?;
    let errors = joined?;
    info!(name = %*self.name, error_count = errors.len(), "Fan-out runner closed.");

    if errors.is_empty() {
      Ok(None)
    } else {
      Ok(Some(errors))
    }
  }
}

impl<E: Send + 'static> Drop for FanOut<E> {
  fn drop(&mut self) {
    if self.state() == FanOutState::Open {
      info!(
        name = %*self.name,
        "FanOut dropped without wait(). Closing slots and error collector; collected errors are discarded."
      );
      self.gate.close();
      self.collector.close();
    } else {
      trace!(name = %*self.name, "Drop: Runner already drained.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_state_from_raw() {
    assert_eq!(FanOutState::from(STATE_OPEN), FanOutState::Open);
    assert_eq!(FanOutState::from(STATE_DRAINING), FanOutState::Draining);
    assert_eq!(FanOutState::from(STATE_CLOSED), FanOutState::Closed);
  }

  #[tokio::test]
  async fn test_state_transitions_forward_only() {
    let fan_out = FanOut::<String>::new(2, TokioHandle::current(), "state_test").unwrap();
    assert_eq!(fan_out.state(), FanOutState::Open);

    fan_out.run(|_: ()| async { Ok(()) }, ()).await.unwrap();
    assert_eq!(fan_out.wait().await, Ok(None));
    assert_eq!(fan_out.state(), FanOutState::Closed);

    assert_eq!(fan_out.wait().await, Err(FanOutError::AlreadyWaited));
    assert_eq!(fan_out.state(), FanOutState::Closed);
  }
}
