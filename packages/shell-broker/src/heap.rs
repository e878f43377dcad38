//! The broker's core data structure: a max-heap ordered by (priority desc,
//! enqueue-time asc), a reservation table, and the single mutex guarding
//! both (§4.1, §5: "Shared-resource policy").
//!
//! `CANCEL` of a queued envelope uses lazy deletion — the id is tombstoned
//! and the physical heap entry is discarded the next time it would be
//! popped — rather than an O(n) heap scan. `BinaryHeap` has no arbitrary-key
//! removal, and tombstoning keeps `push`/`pop` themselves at O(log n) as
//! called for in §4.1, at the cost of `pop` occasionally discarding a few
//! dead entries before returning live work.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use shell_broker_proto::Envelope;

#[derive(Debug, Clone)]
struct HeapEntry {
    envelope: Envelope,
    enqueued_at: DateTime<Utc>,
}

impl HeapEntry {
    /// `BinaryHeap::pop` returns the greatest element by this key: higher
    /// priority first, then earlier enqueue time, then lexicographically
    /// smaller id as a last, fully deterministic tie-break (§4.1: "Ordering").
    fn sort_key(&self) -> (i32, Reverse<DateTime<Utc>>, Reverse<&str>) {
        (self.envelope.priority, Reverse(self.enqueued_at), Reverse(self.envelope.id.as_str()))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Clone)]
struct Reservation {
    envelope: Envelope,
    #[allow(dead_code)] // kept for future lease-timeout work; not read yet.
    reserved_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// The id collides with a live (heap or reserved) envelope.
    Collision,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AckError {
    Unknown,
}

struct Inner {
    heap: BinaryHeap<HeapEntry>,
    reservations: HashMap<String, Reservation>,
    /// ids that are logically enqueued right now (heap, minus tombstones).
    live_in_heap: HashSet<String>,
    /// ids canceled while still in the heap; discarded lazily on pop.
    tombstoned: HashSet<String>,
}

/// The broker's single logical priority queue, safe for concurrent use from
/// many connection tasks (§4.1: "Concurrency").
pub struct BrokerState {
    inner: Mutex<Inner>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                reservations: HashMap::new(),
                live_in_heap: HashSet::new(),
                tombstoned: HashSet::new(),
            }),
        }
    }

    /// Insert a new envelope. Rejects ids that collide with a live
    /// (heap-resident or reserved) envelope (§4.1: "PUSH").
    pub fn push(&self, envelope: Envelope) -> Result<(), PushError> {
        let mut inner = self.inner.lock().expect("broker heap mutex poisoned");
        if inner.live_in_heap.contains(&envelope.id) || inner.reservations.contains_key(&envelope.id) {
            return Err(PushError::Collision);
        }
        inner.live_in_heap.insert(envelope.id.clone());
        inner.heap.push(HeapEntry { envelope, enqueued_at: Utc::now() });
        Ok(())
    }

    /// Pop the highest-priority live envelope and reserve it, or `None` if
    /// the queue is empty (§4.1: "POP").
    pub fn pop(&self) -> Option<Envelope> {
        let mut inner = self.inner.lock().expect("broker heap mutex poisoned");
        loop {
            let entry = inner.heap.pop()?;
            let id = entry.envelope.id.clone();
            if inner.tombstoned.remove(&id) {
                // Canceled while queued; discard and keep scanning.
                continue;
            }
            inner.live_in_heap.remove(&id);
            inner.reservations.insert(id, Reservation { envelope: entry.envelope.clone(), reserved_at: Utc::now() });
            return Some(entry.envelope);
        }
    }

    /// Remove a reservation. Unknown ids are an error; ACK never re-enqueues
    /// (§4.1: "ACK").
    pub fn ack(&self, id: &str) -> Result<(), AckError> {
        let mut inner = self.inner.lock().expect("broker heap mutex poisoned");
        inner.reservations.remove(id).map(|_| ()).ok_or(AckError::Unknown)
    }

    /// Remove an envelope wherever it is (heap or reservation table).
    /// Always succeeds, including for unknown ids — cancellation is
    /// idempotent (§4.1: "CANCEL").
    pub fn cancel(&self, id: &str) {
        let mut inner = self.inner.lock().expect("broker heap mutex poisoned");
        if inner.reservations.remove(id).is_some() {
            return;
        }
        if inner.live_in_heap.remove(id) {
            inner.tombstoned.insert(id.to_string());
        }
    }

    /// Test/introspection helper: number of envelopes still reachable by a
    /// future POP (excludes reservations and tombstoned entries).
    pub fn queued_len(&self) -> usize {
        self.inner.lock().expect("broker heap mutex poisoned").live_in_heap.len()
    }

    pub fn reserved_len(&self) -> usize {
        self.inner.lock().expect("broker heap mutex poisoned").reservations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(id: &str, priority: i32) -> Envelope {
        Envelope { id: id.to_string(), priority, payload: json!({"id": id}) }
    }

    #[test]
    fn pop_returns_highest_priority_first() {
        let state = BrokerState::new();
        state.push(envelope("a", 3)).unwrap();
        state.push(envelope("b", 10)).unwrap();
        state.push(envelope("c", 7)).unwrap();

        assert_eq!(state.pop().unwrap().id, "b");
        assert_eq!(state.pop().unwrap().id, "c");
        assert_eq!(state.pop().unwrap().id, "a");
        assert!(state.pop().is_none());
    }

    #[test]
    fn equal_priority_breaks_tie_by_enqueue_order() {
        let state = BrokerState::new();
        state.push(envelope("first", 5)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        state.push(envelope("second", 5)).unwrap();

        assert_eq!(state.pop().unwrap().id, "first");
        assert_eq!(state.pop().unwrap().id, "second");
    }

    #[test]
    fn push_rejects_id_collision_with_live_envelope() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        assert_eq!(state.push(envelope("a", 9)), Err(PushError::Collision));
    }

    #[test]
    fn push_rejects_collision_with_reserved_envelope() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        state.pop().unwrap();
        assert_eq!(state.push(envelope("a", 1)), Err(PushError::Collision));
    }

    #[test]
    fn push_pop_ack_round_trip_leaves_queue_empty() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        let popped = state.pop().unwrap();
        state.ack(&popped.id).unwrap();
        assert_eq!(state.queued_len(), 0);
        assert_eq!(state.reserved_len(), 0);
    }

    #[test]
    fn ack_of_unknown_id_is_an_error_and_never_reenqueues() {
        let state = BrokerState::new();
        assert_eq!(state.ack("ghost"), Err(AckError::Unknown));
        assert!(state.pop().is_none());
    }

    #[test]
    fn cancel_while_queued_removes_it_before_any_pop() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        state.push(envelope("b", 1)).unwrap();
        state.cancel("a");
        assert_eq!(state.queued_len(), 1);
        assert_eq!(state.pop().unwrap().id, "b");
        assert!(state.pop().is_none());
    }

    #[test]
    fn cancel_while_reserved_removes_the_reservation() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        state.pop().unwrap();
        state.cancel("a");
        assert_eq!(state.reserved_len(), 0);
    }

    #[test]
    fn cancel_of_unknown_id_is_a_no_op_not_an_error() {
        let state = BrokerState::new();
        state.cancel("ghost");
        assert_eq!(state.queued_len(), 0);
        assert_eq!(state.reserved_len(), 0);
    }

    #[test]
    fn canceled_id_can_be_pushed_again() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        state.cancel("a");
        assert!(state.push(envelope("a", 5)).is_ok());
        assert_eq!(state.pop().unwrap().priority, 5);
    }

    #[test]
    fn an_envelope_is_never_served_to_two_pops_without_cancel_or_restart() {
        let state = BrokerState::new();
        state.push(envelope("a", 1)).unwrap();
        assert_eq!(state.pop().unwrap().id, "a");
        assert!(state.pop().is_none());
    }
}
