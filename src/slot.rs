use crate::error::FanOutError;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Largest capacity a gate accepts. Draining takes every permit in one
/// `acquire_many` call, which is limited to `u32`.
pub(crate) const MAX_CAPACITY: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
  Semaphore::MAX_PERMITS
} else {
  u32::MAX as usize
};

/// A slot held by a running task. Dropping it hands the permit back to the gate.
#[derive(Debug)]
pub(crate) struct Slot {
  _permit: OwnedSemaphorePermit,
  held: Arc<AtomicUsize>,
}

impl Drop for Slot {
  fn drop(&mut self) {
    self.held.fetch_sub(1, AtomicOrdering::AcqRel);
  }
}

/// Counting gate that admits at most `capacity` holders at a time.
///
/// Backed by a fair Tokio semaphore, so waiters are admitted in the order they
/// started waiting. A slot is an owned permit and is released when dropped,
/// including during a panic unwind.
#[derive(Debug)]
pub(crate) struct SlotGate {
  semaphore: Arc<Semaphore>,
  capacity: usize,
  held: Arc<AtomicUsize>,
}

impl SlotGate {
  pub(crate) fn new(capacity: usize) -> Result<Self, FanOutError> {
    if capacity == 0 {
      return Err(FanOutError::ZeroCapacity);
    }
    if capacity > MAX_CAPACITY {
      return Err(FanOutError::CapacityTooLarge {
        requested: capacity,
        max: MAX_CAPACITY,
      });
    }
    Ok(Self {
      semaphore: Arc::new(Semaphore::new(capacity)),
      capacity,
      held: Arc::new(AtomicUsize::new(0)),
    })
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  /// Slots currently held by tasks. Permits a drain has reserved are not counted.
  pub(crate) fn in_flight(&self) -> usize {
    self.held.load(AtomicOrdering::Acquire)
  }

  /// Waits for a free slot. Fails with `Closed` once the gate has been drained.
  pub(crate) async fn acquire(&self) -> Result<Slot, FanOutError> {
    let permit = self
      .semaphore
      .clone()
      .acquire_owned()
      .await
      .map_err(|_| FanOutError::Closed)?;
    self.held.fetch_add(1, AtomicOrdering::AcqRel);
    trace!(available = self.semaphore.available_permits(), "Slot acquired.");
    Ok(Slot {
      _permit: permit,
      held: self.held.clone(),
    })
  }

  /// Takes every slot, which only completes once all current holders have
  /// released theirs, then closes the gate.
  ///
  /// Acquirers queued behind the drain are woken with `Closed` rather than
  /// waiting forever on a gate nobody will reopen.
  pub(crate) async fn drain(&self) -> Result<(), FanOutError> {
    // MAX_CAPACITY keeps this within u32.
    let all = self.capacity as u32;
    let permits = self
      .semaphore
      .clone()
      .acquire_many_owned(all)
      .await
      .map_err(|_| FanOutError::Closed)?;
    self.semaphore.close();
    drop(permits);
    trace!(capacity = self.capacity, "All slots drained, gate closed.");
    Ok(())
  }

  /// Closes the gate without waiting for holders.
  pub(crate) fn close(&self) {
    self.semaphore.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_rejects_zero_capacity() {
    assert_eq!(SlotGate::new(0).unwrap_err(), FanOutError::ZeroCapacity);
  }

  #[test]
  fn test_rejects_capacity_above_max() {
    let err = SlotGate::new(MAX_CAPACITY + 1).unwrap_err();
    assert_eq!(
      err,
      FanOutError::CapacityTooLarge {
        requested: MAX_CAPACITY + 1,
        max: MAX_CAPACITY
      }
    );
  }

  #[tokio::test]
  async fn test_acquire_blocks_at_capacity() {
    let gate = SlotGate::new(2).unwrap();
    let first = gate.acquire().await.unwrap();
    let _second = gate.acquire().await.unwrap();
    assert_eq!(gate.in_flight(), 2);

    let third = gate.acquire();
    tokio::pin!(third);
    tokio::select! {
      _ = &mut third => panic!("Third acquire should block while both slots are held."),
      _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    drop(first);
    tokio::time::timeout(Duration::from_millis(50), third)
      .await
      .expect("Acquire did not complete after a slot was released.")
      .unwrap();
  }

  #[tokio::test]
  async fn test_drain_waits_for_holders_then_closes() {
    let gate = Arc::new(SlotGate::new(3).unwrap());
    let held = gate.acquire().await.unwrap();

    let drain_gate = gate.clone();
    let drain = tokio::spawn(async move { drain_gate.drain().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!drain.is_finished(), "Drain finished while a slot was still held.");

    drop(held);
    drain.await.unwrap().unwrap();

    assert_eq!(gate.in_flight(), 0);
    assert_eq!(gate.acquire().await.unwrap_err(), FanOutError::Closed);
  }

  #[tokio::test]
  async fn test_in_flight_excludes_drain_reservations() {
    let gate = Arc::new(SlotGate::new(3).unwrap());
    let held = gate.acquire().await.unwrap();
    assert_eq!(gate.in_flight(), 1);

    let drain_gate = gate.clone();
    let drain = tokio::spawn(async move { drain_gate.drain().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!drain.is_finished());
    assert_eq!(gate.in_flight(), 1);

    drop(held);
    drain.await.unwrap().unwrap();
    assert_eq!(gate.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_acquirer_queued_behind_drain_is_rejected() {
    let gate = Arc::new(SlotGate::new(1).unwrap());
    let held = gate.acquire().await.unwrap();

    let drain_gate = gate.clone();
    let drain = tokio::spawn(async move { drain_gate.drain().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let late_gate = gate.clone();
    let late = tokio::spawn(async move { late_gate.acquire().await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(held);
    drain.await.unwrap().unwrap();
    let late_result = tokio::time::timeout(Duration::from_millis(100), late)
      .await
      .expect("Late acquirer was left waiting after the drain.")
      .unwrap();
    assert_eq!(late_result, Err(FanOutError::Closed));
  }
}
