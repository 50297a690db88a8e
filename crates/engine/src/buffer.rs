//! The circular message buffer — a bounded ring of slots backing one node's
//! message queue.
//!
//! Each slot cycles `Empty -> Ready -> InFlight -> Ready` (abandon) or
//! `InFlight -> Empty` (complete). Real lock-free CAS across slots would
//! need a compare-and-swap on the whole `(status, envelope)` pair, which
//! doesn't fit in a machine word; instead each slot carries its own
//! `parking_lot::Mutex`, so transitions are atomic from an external
//! observer's point of view (the whole read-modify-write happens under one
//! lock) while different slots remain fully concurrent. See `DESIGN.md` for
//! why this trade was made over a literal lock-free ring.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::message::{Envelope, Lease, SlotStatus};

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer is full: every slot holds an in-flight message")]
    FullOfInFlight,
    #[error("no slot holds lease '{0}'")]
    StaleLease(Uuid),
}

struct Slot {
    status: SlotStatus,
    envelope: Option<Envelope>,
    /// Insertion order, used to find the oldest `Ready` slot to evict.
    sequence: u64,
}

pub struct CircularMessageBuffer {
    slots: Vec<Mutex<Slot>>,
    capacity: usize,
    write_cursor: AtomicUsize,
    read_cursor: AtomicUsize,
    sequence_counter: AtomicU64,
    visibility_timeout: Duration,
}

impl CircularMessageBuffer {
    pub fn new(capacity: usize, visibility_timeout: Duration) -> Self {
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    status: SlotStatus::Empty,
                    envelope: None,
                    sequence: 0,
                })
            })
            .collect();
        Self {
            slots,
            capacity,
            write_cursor: AtomicUsize::new(0),
            read_cursor: AtomicUsize::new(0),
            sequence_counter: AtomicU64::new(0),
            visibility_timeout,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_VISIBILITY_TIMEOUT)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a new envelope. Prefers an `Empty` slot; if none is free,
    /// overwrites the oldest `Ready` slot (never an `InFlight` one). Fails
    /// only when every slot is currently leased out.
    pub fn insert(&self, envelope: Envelope) -> Result<(), BufferError> {
        let start = self.write_cursor.fetch_add(1, Ordering::Relaxed) % self.capacity;

        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            let mut slot = self.slots[idx].lock();
            if slot.status == SlotStatus::Empty {
                slot.sequence = self.next_sequence();
                slot.envelope = Some(envelope);
                slot.status = SlotStatus::Ready;
                return Ok(());
            }
        }

        let mut oldest: Option<(usize, u64)> = None;
        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            let slot = self.slots[idx].lock();
            if slot.status == SlotStatus::Ready
                && oldest.map_or(true, |(_, seq)| slot.sequence < seq)
            {
                oldest = Some((idx, slot.sequence));
            }
        }

        match oldest {
            Some((idx, expected_seq)) => {
                let mut slot = self.slots[idx].lock();
                if slot.status == SlotStatus::Ready && slot.sequence == expected_seq {
                    slot.sequence = self.next_sequence();
                    slot.envelope = Some(envelope);
                    Ok(())
                } else {
                    // Raced with a concurrent checkout of the same slot;
                    // treat as exhausted rather than retry indefinitely.
                    Err(BufferError::FullOfInFlight)
                }
            }
            None => Err(BufferError::FullOfInFlight),
        }
    }

    /// Lease the next eligible message. As a side effect, opportunistically
    /// reaps any `InFlight` slot whose visibility timeout has elapsed,
    /// making it `Ready` again (with `enqueue_count` bumped) for a future
    /// checkout.
    pub fn checkout(&self, now: Instant) -> Option<Lease> {
        for idx in 0..self.capacity {
            let mut slot = self.slots[idx].lock();
            if slot.status == SlotStatus::InFlight {
                let expired = slot.envelope.as_ref().map_or(false, |e| e.visible_after <= now);
                if expired {
                    if let Some(mut env) = slot.envelope.take() {
                        env.enqueue_count += 1;
                        env.lease_id = None;
                        env.visible_after = now;
                        slot.envelope = Some(env);
                    }
                    slot.status = SlotStatus::Ready;
                }
            }
        }

        let start = self.read_cursor.load(Ordering::Relaxed) % self.capacity;
        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            let mut slot = self.slots[idx].lock();
            if slot.status != SlotStatus::Ready {
                continue;
            }
            let visible = slot.envelope.as_ref().map_or(false, |e| e.visible_after <= now);
            if !visible {
                continue;
            }

            let lease_id = Uuid::new_v4();
            let mut envelope = slot.envelope.take().expect("checked Some above");
            envelope.lease_id = Some(lease_id);
            envelope.visible_after = now + self.visibility_timeout;
            slot.envelope = Some(envelope.clone());
            slot.status = SlotStatus::InFlight;
            self.read_cursor.store(idx + 1, Ordering::Relaxed);
            return Some(Lease { envelope, lease_id });
        }
        None
    }

    /// Free the slot holding `lease_id` outright.
    pub fn complete(&self, lease_id: Uuid) -> Result<(), BufferError> {
        for slot in &self.slots {
            let mut slot = slot.lock();
            if slot.status == SlotStatus::InFlight
                && slot.envelope.as_ref().map(|e| e.lease_id) == Some(Some(lease_id))
            {
                slot.envelope = None;
                slot.status = SlotStatus::Empty;
                return Ok(());
            }
        }
        Err(BufferError::StaleLease(lease_id))
    }

    /// Return the slot holding `lease_id` to `Ready`, bumping its
    /// `enqueue_count` and setting its next eligible checkout time to
    /// `now + delay`.
    pub fn abandon_with_delay(&self, lease_id: Uuid, delay: Duration) -> Result<(), BufferError> {
        for slot in &self.slots {
            let mut slot = slot.lock();
            if slot.status == SlotStatus::InFlight
                && slot.envelope.as_ref().map(|e| e.lease_id) == Some(Some(lease_id))
            {
                let mut env = slot.envelope.take().expect("checked Some above");
                env.enqueue_count += 1;
                env.lease_id = None;
                env.visible_after = Instant::now() + delay;
                slot.envelope = Some(env);
                slot.status = SlotStatus::Ready;
                return Ok(());
            }
        }
        Err(BufferError::StaleLease(lease_id))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;

    fn env() -> Envelope {
        Envelope::new(MessageKind::Complete, "a", None, None)
    }

    #[test]
    fn insert_then_checkout_round_trip() {
        let buf = CircularMessageBuffer::new(4, Duration::from_secs(10));
        buf.insert(env()).unwrap();
        let lease = buf.checkout(Instant::now()).unwrap();
        assert_eq!(lease.envelope.source_node_id, "a");
        buf.complete(lease.lease_id).unwrap();
        assert!(buf.checkout(Instant::now()).is_none());
    }

    #[test]
    fn checkout_on_empty_buffer_returns_none() {
        let buf = CircularMessageBuffer::new(4, Duration::from_secs(10));
        assert!(buf.checkout(Instant::now()).is_none());
    }

    #[test]
    fn oldest_ready_is_evicted_when_full() {
        let buf = CircularMessageBuffer::new(2, Duration::from_secs(10));
        buf.insert(env()).unwrap();
        buf.insert(env()).unwrap();
        // Both slots Ready; a third insert evicts the oldest rather than failing.
        buf.insert(env()).unwrap();
    }

    #[test]
    fn insert_fails_when_every_slot_in_flight() {
        let buf = CircularMessageBuffer::new(1, Duration::from_secs(10));
        buf.insert(env()).unwrap();
        let _lease = buf.checkout(Instant::now()).unwrap();
        let err = buf.insert(env()).unwrap_err();
        assert!(matches!(err, BufferError::FullOfInFlight));
    }

    #[test]
    fn abandon_makes_message_visible_again_after_delay() {
        let buf = CircularMessageBuffer::new(2, Duration::from_secs(10));
        buf.insert(env()).unwrap();
        let lease = buf.checkout(Instant::now()).unwrap();
        buf.abandon_with_delay(lease.lease_id, Duration::from_millis(0)).unwrap();
        let relet = buf.checkout(Instant::now()).unwrap();
        assert_eq!(relet.envelope.enqueue_count, 1);
    }

    #[test]
    fn expired_lease_is_reaped_on_checkout() {
        let buf = CircularMessageBuffer::new(2, Duration::from_millis(0));
        buf.insert(env()).unwrap();
        let first = buf.checkout(Instant::now()).unwrap();
        // Visibility timeout is zero, so it's immediately eligible for reaping.
        let second = buf.checkout(Instant::now() + Duration::from_millis(1)).unwrap();
        assert_ne!(first.lease_id, second.lease_id);
        assert_eq!(second.envelope.enqueue_count, 1);
    }

    #[test]
    fn complete_with_unknown_lease_is_stale() {
        let buf = CircularMessageBuffer::new(1, Duration::from_secs(10));
        let err = buf.complete(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, BufferError::StaleLease(_)));
    }
}
