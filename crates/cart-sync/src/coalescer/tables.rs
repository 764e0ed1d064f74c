//! Bookkeeping tables owned by the coalescer
//!
//! Everything here is plain synchronous state mutated under the coalescer's
//! lock. Nothing in this module suspends, spawns or emits events; the
//! dispatch and reconcile paths decide what to do with the outcomes.

use super::rate_limit::RateLimiter;
use crate::backend::{CartKey, WriteKind};
use cart_types::{CartLineIntent, WriteId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;

/// A write awaiting its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InFlight {
    pub(crate) write_id: WriteId,
    pub(crate) quantity: u32,
    pub(crate) kind: WriteKind,
}

/// What a fired timer should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FireOutcome {
    /// Nothing pending for the line
    Idle,
    /// Line busy; value parked in the queued table
    Deferred(u32),
    /// Slot claimed; issue this write
    Send(InFlight),
}

/// Armed debounce timer; the handle is attached once the task is spawned
#[derive(Debug)]
struct Timer {
    generation: u64,
    task: Option<AbortHandle>,
}

impl Timer {
    fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

#[derive(Debug)]
pub(crate) struct LineTables<K> {
    epoch: u64,
    clock: u64,
    next_timer: u64,
    pending: HashMap<K, CartLineIntent<K>>,
    active: HashMap<K, InFlight>,
    queued: HashMap<K, u32>,
    timers: HashMap<K, Timer>,
    last_good: HashMap<K, u32>,
    /// Sequence of the newest write outcome learned per line
    confirm_seq: u64,
    confirmed_at: HashMap<K, u64>,
    pub(crate) rate: RateLimiter<K>,
}

impl<K: CartKey> LineTables<K> {
    pub(crate) fn new(rate_window: Duration) -> Self {
        Self {
            epoch: 0,
            clock: 0,
            next_timer: 0,
            pending: HashMap::new(),
            active: HashMap::new(),
            queued: HashMap::new(),
            timers: HashMap::new(),
            last_good: HashMap::new(),
            confirm_seq: 0,
            confirmed_at: HashMap::new(),
            rate: RateLimiter::new(rate_window),
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Replace the line's pending intent
    pub(crate) fn record_intent(&mut self, key: K, quantity: u32) -> &CartLineIntent<K> {
        self.clock += 1;
        let intent = CartLineIntent::new(key.clone(), quantity, self.clock);
        if let Some(queued) = self.queued.get_mut(&key) {
            *queued = quantity;
        }
        self.pending.insert(key.clone(), intent);
        &self.pending[&key]
    }

    pub(crate) fn pending(&self, key: &K) -> Option<&CartLineIntent<K>> {
        self.pending.get(key)
    }

    /// Clear pending only if it still carries `sent`
    pub(crate) fn clear_pending_if(&mut self, key: &K, sent: u32) -> bool {
        let matches = self
            .pending
            .get(key)
            .is_some_and(|intent| intent.desired_quantity == sent);
        if matches {
            self.pending.remove(key);
        }
        matches
    }

    /// Arm (or re-arm) the line's debounce timer, returning its generation
    ///
    /// A superseded timer's task is aborted.
    pub(crate) fn arm_timer(&mut self, key: K) -> u64 {
        self.next_timer += 1;
        let timer = Timer {
            generation: self.next_timer,
            task: None,
        };
        if let Some(old) = self.timers.insert(key, timer) {
            old.cancel();
        }
        self.next_timer
    }

    /// Attach the spawned task to its timer
    ///
    /// A task whose generation is no longer armed may already be past
    /// `take_timer` and issuing a write, so it is left to run; a stale timer
    /// no-ops when it wakes.
    pub(crate) fn attach_timer(&mut self, key: &K, generation: u64, task: AbortHandle) {
        if let Some(timer) = self.timers.get_mut(key) {
            if timer.generation == generation {
                timer.task = Some(task);
            }
        }
    }

    fn cancel_timer(&mut self, key: &K) {
        if let Some(timer) = self.timers.remove(key) {
            timer.cancel();
        }
    }

    pub(crate) fn has_timer(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    /// Consume the timer if `generation` is still the armed one
    pub(crate) fn take_timer(&mut self, key: &K, generation: u64) -> bool {
        if self.timers.get(key).is_some_and(|timer| timer.generation == generation) {
            self.timers.remove(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn in_flight(&self, key: &K) -> Option<&InFlight> {
        self.active.get(key)
    }

    /// Decide what a fired dispatch does for the line
    pub(crate) fn fire(&mut self, key: &K) -> FireOutcome {
        let Some(quantity) = self.pending.get(key).map(|intent| intent.desired_quantity) else {
            return FireOutcome::Idle;
        };
        if self.active.contains_key(key) {
            self.queued.insert(key.clone(), quantity);
            return FireOutcome::Deferred(quantity);
        }
        FireOutcome::Send(self.begin_write(key.clone(), quantity))
    }

    /// Claim the line's in-flight slot
    ///
    /// Callers must have checked the slot is free.
    pub(crate) fn begin_write(&mut self, key: K, quantity: u32) -> InFlight {
        debug_assert!(!self.active.contains_key(&key), "line already in flight");
        let kind = if quantity == 0 {
            WriteKind::Remove
        } else if self.last_good.contains_key(&key) {
            WriteKind::Update
        } else {
            WriteKind::Add
        };
        let write = InFlight {
            write_id: WriteId::new(),
            quantity,
            kind,
        };
        self.active.insert(key, write);
        write
    }

    /// Release the slot held by `write_id`
    pub(crate) fn finish_write(&mut self, key: &K, write_id: WriteId) -> bool {
        if self.active.get(key).is_some_and(|w| w.write_id == write_id) {
            self.active.remove(key);
            true
        } else {
            false
        }
    }

    /// Promote the queued value for replay, returning the value to dispatch
    ///
    /// The queued entry mirrors the newest pending intent. If that intent was
    /// settled by the write that just finished there is nothing to replay.
    pub(crate) fn promote_queued(&mut self, key: &K) -> Option<u32> {
        self.queued.remove(key)?;
        self.pending.get(key).map(|intent| intent.desired_quantity)
    }

    /// Queue a removal behind the write currently in flight
    pub(crate) fn queue_removal(&mut self, key: K) {
        self.cancel_timer(&key);
        self.queued.insert(key.clone(), 0);
        self.record_intent(key, 0);
    }

    /// Drop every not-yet-sent intent for the line
    pub(crate) fn discard_unsent(&mut self, key: &K) {
        self.pending.remove(key);
        self.queued.remove(key);
        self.cancel_timer(key);
    }

    pub(crate) fn has_outstanding(&self, key: &K) -> bool {
        self.pending.contains_key(key)
            || self.active.contains_key(key)
            || self.queued.contains_key(key)
    }

    /// In-flight write plus not-yet-sent intent, 0..=2
    pub(crate) fn pending_writes(&self, key: &K) -> usize {
        let in_flight = self.active.get(key);
        let unsent = self.queued.contains_key(key)
            || self.pending.get(key).is_some_and(|intent| {
                in_flight.map_or(true, |w| w.quantity != intent.desired_quantity)
            });
        usize::from(in_flight.is_some()) + usize::from(unsent)
    }

    pub(crate) fn last_good(&self, key: &K) -> Option<u32> {
        self.last_good.get(key).copied()
    }

    pub(crate) fn confirm(&mut self, key: K, quantity: u32) {
        self.mark_confirmed(key.clone());
        self.last_good.insert(key, quantity);
    }

    /// Drop server-side memory of a line that no longer exists
    pub(crate) fn forget(&mut self, key: &K) {
        self.mark_confirmed(key.clone());
        self.last_good.remove(key);
        self.rate.forget(key);
    }

    fn mark_confirmed(&mut self, key: K) {
        self.confirm_seq += 1;
        self.confirmed_at.insert(key, self.confirm_seq);
    }

    /// Current confirmation sequence, taken before a full refetch starts
    pub(crate) fn confirm_mark(&self) -> u64 {
        self.confirm_seq
    }

    /// Whether a write outcome for the line landed after `mark`
    pub(crate) fn changed_since(&self, key: &K, mark: u64) -> bool {
        self.confirmed_at.get(key).is_some_and(|seq| *seq > mark)
    }

    /// Replace last-known-good wholesale from a full refetch started at `mark`
    ///
    /// Lines whose writes completed during the fetch keep what those writes
    /// reported.
    pub(crate) fn replace_confirmed(
        &mut self,
        confirmed: impl IntoIterator<Item = (K, u32)>,
        mark: u64,
    ) {
        let mut last_good: HashMap<K, u32> = confirmed
            .into_iter()
            .filter(|(key, _)| !self.changed_since(key, mark))
            .collect();
        for (key, seq) in &self.confirmed_at {
            if *seq > mark {
                if let Some(quantity) = self.last_good.get(key) {
                    last_good.insert(key.clone(), *quantity);
                }
            }
        }
        self.last_good = last_good;
    }

    /// Wipe everything and start a new epoch
    pub(crate) fn reset(&mut self) {
        self.epoch += 1;
        self.pending.clear();
        self.active.clear();
        self.queued.clear();
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        self.last_good.clear();
        self.confirmed_at.clear();
        self.rate.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> LineTables<&'static str> {
        LineTables::new(Duration::from_millis(100))
    }

    #[test]
    fn newer_intent_replaces_pending() {
        let mut t = tables();
        t.record_intent("a", 2);
        let intent = t.record_intent("a", 3).clone();

        assert_eq!(intent.desired_quantity, 3);
        assert_eq!(intent.submitted_at, 2);
        assert_eq!(t.pending(&"a").unwrap().desired_quantity, 3);
    }

    #[test]
    fn fire_without_pending_is_idle() {
        let mut t = tables();
        assert_eq!(t.fire(&"a"), FireOutcome::Idle);
    }

    #[test]
    fn fire_while_in_flight_defers() {
        let mut t = tables();
        t.record_intent("a", 2);
        let FireOutcome::Send(first) = t.fire(&"a") else {
            panic!("expected send");
        };
        assert_eq!(first.quantity, 2);
        assert_eq!(first.kind, WriteKind::Add);

        t.record_intent("a", 4);
        assert_eq!(t.fire(&"a"), FireOutcome::Deferred(4));
        assert_eq!(t.pending_writes(&"a"), 2);
    }

    #[test]
    fn confirmed_line_writes_are_updates() {
        let mut t = tables();
        t.confirm("a", 1);
        t.record_intent("a", 2);
        let FireOutcome::Send(write) = t.fire(&"a") else {
            panic!("expected send");
        };
        assert_eq!(write.kind, WriteKind::Update);
    }

    #[test]
    fn stale_success_keeps_newer_pending() {
        let mut t = tables();
        t.record_intent("a", 2);
        t.fire(&"a");
        t.record_intent("a", 5);

        assert!(!t.clear_pending_if(&"a", 2));
        assert_eq!(t.pending(&"a").unwrap().desired_quantity, 5);
        assert!(t.clear_pending_if(&"a", 5));
    }

    #[test]
    fn promote_prefers_newer_pending() {
        let mut t = tables();
        t.record_intent("a", 2);
        let FireOutcome::Send(write) = t.fire(&"a") else {
            panic!("expected send");
        };
        t.record_intent("a", 4);
        t.fire(&"a");
        t.record_intent("a", 6);

        assert!(t.finish_write(&"a", write.write_id));
        assert_eq!(t.promote_queued(&"a"), Some(6));
    }

    #[test]
    fn promote_skips_settled_queue() {
        let mut t = tables();
        t.record_intent("a", 2);
        let FireOutcome::Send(write) = t.fire(&"a") else {
            panic!("expected send");
        };
        t.record_intent("a", 4);
        t.fire(&"a");
        t.record_intent("a", 2);

        t.finish_write(&"a", write.write_id);
        assert!(t.clear_pending_if(&"a", 2));
        assert_eq!(t.promote_queued(&"a"), None);
        assert!(!t.has_outstanding(&"a"));
    }

    #[test]
    fn stale_timer_generation_is_rejected() {
        let mut t = tables();
        let first = t.arm_timer("a");
        let second = t.arm_timer("a");

        assert!(!t.take_timer(&"a", first));
        assert!(t.take_timer(&"a", second));
        assert!(!t.has_timer(&"a"));
    }

    #[test]
    fn finish_ignores_foreign_write() {
        let mut t = tables();
        t.record_intent("a", 1);
        t.fire(&"a");
        assert!(!t.finish_write(&"a", WriteId::new()));
        assert!(t.in_flight(&"a").is_some());
    }

    #[test]
    fn pending_writes_counts_in_flight_and_unsent() {
        let mut t = tables();
        assert_eq!(t.pending_writes(&"a"), 0);

        t.record_intent("a", 1);
        assert_eq!(t.pending_writes(&"a"), 1);

        t.fire(&"a");
        assert_eq!(t.pending_writes(&"a"), 1);

        t.record_intent("a", 3);
        assert_eq!(t.pending_writes(&"a"), 2);
    }

    #[test]
    fn queued_removal_replaces_unsent_intent() {
        let mut t = tables();
        t.record_intent("a", 2);
        let FireOutcome::Send(write) = t.fire(&"a") else {
            panic!("expected send");
        };
        t.arm_timer("a");
        t.queue_removal("a");

        assert!(!t.has_timer(&"a"));
        t.finish_write(&"a", write.write_id);
        assert_eq!(t.promote_queued(&"a"), Some(0));
    }

    #[test]
    fn reset_bumps_epoch_and_clears() {
        let mut t = tables();
        t.record_intent("a", 1);
        t.fire(&"a");
        t.confirm("b", 2);

        t.reset();
        assert_eq!(t.epoch(), 1);
        assert!(!t.has_outstanding(&"a"));
        assert_eq!(t.last_good(&"b"), None);
    }

    #[test]
    fn refetch_keeps_outcomes_newer_than_its_mark() {
        let mut t = tables();
        t.confirm("a", 1);
        t.confirm("b", 1);
        let mark = t.confirm_mark();
        t.confirm("a", 5);
        t.forget(&"b");

        t.replace_confirmed([("a", 1), ("b", 1), ("c", 2)], mark);
        assert_eq!(t.last_good(&"a"), Some(5));
        assert_eq!(t.last_good(&"b"), None);
        assert_eq!(t.last_good(&"c"), Some(2));
    }

    #[tokio::test]
    async fn rearming_aborts_superseded_task() {
        let mut t = tables();
        let first = t.arm_timer("a");
        let sleeper = tokio::spawn(std::future::pending::<()>());
        t.attach_timer(&"a", first, sleeper.abort_handle());

        t.arm_timer("a");
        assert!(sleeper.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn stale_attach_leaves_fired_task_running() {
        let mut t = tables();
        let first = t.arm_timer("a");
        assert!(t.take_timer(&"a", first));
        let second = t.arm_timer("a");

        let writer = tokio::spawn(async { 7 });
        t.attach_timer(&"a", first, writer.abort_handle());
        assert_eq!(writer.await.unwrap(), 7);
        assert!(t.take_timer(&"a", second));
    }

    #[tokio::test]
    async fn reset_aborts_armed_timers() {
        let mut t = tables();
        let generation = t.arm_timer("a");
        let sleeper = tokio::spawn(std::future::pending::<()>());
        t.attach_timer(&"a", generation, sleeper.abort_handle());

        t.reset();
        assert!(sleeper.await.unwrap_err().is_cancelled());
    }
}
