//! Cancellable timers keyed by purpose.
//!
//! The scheduler holds deadlines only. The engine loop sleeps until
//! [`Scheduler::next_deadline`] and then drains [`Scheduler::pop_due`].
//! Scheduling a key that is already pending replaces the old deadline; the
//! superseded entry is left in the heap and skipped by generation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::InstrumentId;

/// What a timer is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Reconnect,
    Heartbeat,
    HeartbeatTimeout,
    /// Suspension cooldown for an instrument.
    Cooldown(InstrumentId),
    /// Pause after settlement or a throttled rejection.
    TradeWait(InstrumentId),
    /// Watchdog for a trade stuck between signal and settlement.
    SettlementTimeout(InstrumentId),
    /// Retry a rejected history backfill.
    HistoryRetry(InstrumentId),
    /// Retry a rejected live tick subscription.
    TicksRetry(InstrumentId),
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: Instant,
    generation: u64,
    slot: usize,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashMap<TimerKey, (u64, Instant)>,
    keys: Vec<TimerKey>,
    slots: HashMap<TimerKey, usize>,
    generation: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, key: &TimerKey) -> usize {
        if let Some(&slot) = self.slots.get(key) {
            return slot;
        }
        let slot = self.keys.len();
        self.keys.push(key.clone());
        self.slots.insert(key.clone(), slot);
        slot
    }

    /// Arm `key` to fire at `deadline`, replacing any pending timer.
    pub fn schedule_at(&mut self, key: TimerKey, deadline: Instant) {
        self.generation += 1;
        let generation = self.generation;
        let slot = self.slot(&key);
        self.heap.push(Reverse(Entry {
            deadline,
            generation,
            slot,
        }));
        self.live.insert(key, (generation, deadline));
    }

    pub fn schedule(&mut self, key: TimerKey, now: Instant, delay: Duration) {
        self.schedule_at(key, now + delay);
    }

    /// Disarm `key`. Returns whether it was pending.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.live.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.live.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<Instant> {
        self.live.get(key).map(|&(_, at)| at)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn is_stale(&self, entry: &Entry) -> bool {
        self.keys
            .get(entry.slot)
            .and_then(|key| self.live.get(key))
            .map_or(true, |&(generation, _)| generation != entry.generation)
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_stale(top) {
                self.heap.pop();
                continue;
            }
            return Some(top.deadline);
        }
        None
    }

    /// Remove and return every key due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due = Vec::new();
        while let Some(deadline) = self.next_deadline() {
            if deadline > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                if let Some(key) = self.keys.get(entry.slot).cloned() {
                    self.live.remove(&key);
                    due.push(key);
                }
            }
        }
        due
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
