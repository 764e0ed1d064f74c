//! Cart write coalescer
//!
//! One coalescer owns every bookkeeping table for a session's cart:
//!
//! ```text
//! update_quantity ─▶ rate limit ─▶ optimistic view + pending intent
//!                                        │
//!                                debounce timer (per line)
//!                                        │
//!                   in flight? ── yes ─▶ queued (replayed on completion)
//!                        │ no
//!                   backend write ─▶ reconcile ─▶ events
//! ```
//!
//! All table mutations happen under one short lock that is never held
//! across an `.await`. The view map is readable without that lock.
//!
//! The fire-and-forget entry points spawn Tokio tasks and must be called
//! from within a Tokio runtime.

mod dispatch;
mod rate_limit;
mod reconcile;
mod tables;

use crate::backend::{CartBackend, CartKey, WriteKind};
use crate::events::{CartEvent, EventBus};
use cart_types::{CartLineIntent, CartLineViewState, CoalescerConfig, RateLimitPolicy, WriteId};
use dashmap::DashMap;
use parking_lot::Mutex;
use rate_limit::Gate;
use std::fmt;
use std::sync::Arc;
use tables::{InFlight, LineTables};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How a removal request is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// Claimed the slot; send this delete
    Send(InFlight),
    /// Line never reached the server; dropped without a request
    Local,
    /// Queued behind, or already covered by, the in-flight write
    Deferred,
}

struct Shared<K: CartKey> {
    config: CoalescerConfig,
    backend: Arc<dyn CartBackend<K>>,
    tables: Mutex<LineTables<K>>,
    views: DashMap<K, CartLineViewState>,
    events: EventBus<K>,
}

/// Handle to a cart write coalescer
///
/// Cheap to clone; all clones drive the same tables.
pub struct CartCoalescer<K: CartKey> {
    shared: Arc<Shared<K>>,
}

impl<K: CartKey> Clone for CartCoalescer<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: CartKey> fmt::Debug for CartCoalescer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartCoalescer")
            .field("config", &self.shared.config)
            .field("lines", &self.shared.views.len())
            .finish_non_exhaustive()
    }
}

impl<K: CartKey> CartCoalescer<K> {
    /// Create coalescer over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn CartBackend<K>>, config: CoalescerConfig) -> Self {
        let tables = LineTables::new(config.rate_limit());
        let events = EventBus::new(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                tables: Mutex::new(tables),
                views: DashMap::new(),
                events,
            }),
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CoalescerConfig {
        &self.shared.config
    }

    /// Subscribe to per-line events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent<K>> {
        self.shared.events.subscribe()
    }

    /// Record a desired quantity for a line
    ///
    /// Updates the view immediately and schedules a debounced write.
    /// A quantity of 0 removes the line.
    pub fn update_quantity(&self, key: K, quantity: u32) {
        let mut tables = self.shared.tables.lock();
        let gate = tables.rate.check(&key, Instant::now());
        if gate == Gate::Limited && self.shared.config.rate_limit_policy == RateLimitPolicy::Drop
        {
            tracing::debug!(line = %key, quantity, "interaction dropped by rate limiter");
            return;
        }

        if quantity == 0 {
            let removal = self.begin_removal(&mut tables, &key);
            let epoch = tables.epoch();
            let pending = tables.pending_writes(&key);
            drop(tables);
            self.after_removal(key, removal, pending, epoch);
            return;
        }

        let submitted_at = tables.record_intent(key.clone(), quantity).submitted_at;
        self.shared
            .views
            .entry(key.clone())
            .or_default()
            .apply_optimistic(quantity);

        // A limited interaction keeps the armed timer; it only arms one if none is running
        let timer = match gate {
            Gate::Accepted => Some(tables.arm_timer(key.clone())),
            Gate::Limited if !tables.has_timer(&key) => Some(tables.arm_timer(key.clone())),
            Gate::Limited => None,
        };
        let epoch = tables.epoch();
        let pending = tables.pending_writes(&key);
        drop(tables);

        tracing::debug!(
            line = %key,
            quantity,
            submitted_at,
            limited = gate == Gate::Limited,
            "recorded cart intent"
        );
        if let Some(generation) = timer {
            self.spawn_timer(key.clone(), generation, epoch);
        }
        self.shared
            .events
            .emit(CartEvent::PendingChanged { key, pending });
    }

    /// Put a line in the cart with a known inventory ceiling
    pub fn add_item(&self, key: K, quantity: u32, max_quantity: Option<u32>) {
        self.set_inventory_ceiling(key.clone(), max_quantity);
        self.update_quantity(key, quantity);
    }

    /// Record the inventory ceiling reported by the catalog
    pub fn set_inventory_ceiling(&self, key: K, max_quantity: Option<u32>) {
        self.shared
            .views
            .entry(key)
            .or_default()
            .set_max_quantity(max_quantity);
    }

    /// Remove a line
    ///
    /// The row leaves the view immediately and the removal is dispatched
    /// without debounce.
    pub fn remove_item(&self, key: K) {
        let mut tables = self.shared.tables.lock();
        let removal = self.begin_removal(&mut tables, &key);
        let epoch = tables.epoch();
        let pending = tables.pending_writes(&key);
        drop(tables);
        self.after_removal(key, removal, pending, epoch);
    }

    /// View state of one line
    #[must_use]
    pub fn view(&self, key: &K) -> Option<CartLineViewState> {
        self.shared.views.get(key).map(|view| *view)
    }

    /// View state of every line
    #[must_use]
    pub fn snapshot(&self) -> Vec<(K, CartLineViewState)> {
        self.shared
            .views
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Outstanding writes for a line: in flight plus not yet sent
    #[must_use]
    pub fn pending_writes(&self, key: &K) -> usize {
        self.shared.tables.lock().pending_writes(key)
    }

    /// Whether a "saving…" indicator should show for the line
    #[must_use]
    pub fn is_saving(&self, key: &K) -> bool {
        self.pending_writes(key) > 0
    }

    /// Newest unconfirmed intent for a line
    #[must_use]
    pub fn pending_intent(&self, key: &K) -> Option<CartLineIntent<K>> {
        self.shared.tables.lock().pending(key).cloned()
    }

    /// Drop all state and start a new epoch
    ///
    /// Completions and timers from before the reset are ignored.
    pub fn reset(&self) {
        let mut tables = self.shared.tables.lock();
        tables.reset();
        self.shared.views.clear();
        tracing::info!(epoch = tables.epoch(), "cart coalescer reset");
    }

    /// Take the line out of the view and claim (or queue) its removal
    fn begin_removal(&self, tables: &mut LineTables<K>, key: &K) -> Removal {
        self.shared.views.remove(key);
        match tables.in_flight(key).map(|write| write.kind) {
            Some(WriteKind::Remove) if tables.pending(key).is_none() => {
                tracing::debug!(line = %key, "removal already in flight");
                Removal::Deferred
            }
            Some(_) => {
                tables.queue_removal(key.clone());
                tracing::debug!(line = %key, "removal queued behind in-flight write");
                Removal::Deferred
            }
            None => {
                tables.discard_unsent(key);
                if tables.last_good(key).is_none() {
                    tables.forget(key);
                    tracing::debug!(line = %key, "unconfirmed line removed locally");
                    Removal::Local
                } else {
                    Removal::Send(tables.begin_write(key.clone(), 0))
                }
            }
        }
    }

    fn after_removal(&self, key: K, removal: Removal, pending: usize, epoch: u64) {
        match removal {
            Removal::Send(write) => self.spawn_write(key.clone(), write, epoch),
            Removal::Local => self.shared.events.emit(CartEvent::LineRemoved {
                key: key.clone(),
                write_id: WriteId::new(),
            }),
            Removal::Deferred => {}
        }
        self.shared
            .events
            .emit(CartEvent::PendingChanged { key, pending });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCart;
    use std::time::Duration;

    type Key = &'static str;

    fn coalescer(policy: RateLimitPolicy) -> (Arc<InMemoryCart<Key>>, CartCoalescer<Key>) {
        let backend = Arc::new(InMemoryCart::<Key>::new());
        let config = CoalescerConfig::default().with_rate_limit_policy(policy);
        let cart = CartCoalescer::<Key>::new(backend.clone(), config);
        (backend, cart)
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_view_is_immediate() {
        let (backend, cart) = coalescer(RateLimitPolicy::Coalesce);

        cart.update_quantity("a", 2);
        assert_eq!(cart.view(&"a").unwrap().quantity, 2);
        assert_eq!(cart.pending_writes(&"a"), 1);
        assert_eq!(backend.stats().quantity_writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_interaction_changes_nothing() {
        let (_backend, cart) = coalescer(RateLimitPolicy::Drop);

        cart.update_quantity("a", 2);
        cart.update_quantity("a", 3);

        assert_eq!(cart.view(&"a").unwrap().quantity, 2);
        assert_eq!(cart.pending_intent(&"a").unwrap().desired_quantity, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_flags_optimistic_overshoot() {
        let (_backend, cart) = coalescer(RateLimitPolicy::Coalesce);

        cart.add_item("a", 5, Some(3));
        let view = cart.view(&"a").unwrap();
        assert_eq!(view.quantity, 5);
        assert_eq!(view.quantity_user_input, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn removal_leaves_view_immediately() {
        let (backend, cart) = coalescer(RateLimitPolicy::Coalesce);

        cart.update_quantity("a", 2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.stats().quantity_writes, 1);
        cart.update_quantity("a", 0);

        assert!(cart.view(&"a").is_none());
        assert!(cart.pending_intent(&"a").is_none());
        assert!(cart.is_saving(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn unsent_line_is_removed_without_a_request() {
        let (backend, cart) = coalescer(RateLimitPolicy::Coalesce);
        let mut rx = cart.subscribe();

        cart.update_quantity("a", 2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        cart.remove_item("a");
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(cart.view(&"a").is_none());
        assert!(!cart.is_saving(&"a"));
        assert_eq!(backend.stats().quantity_writes, 0);
        assert_eq!(backend.stats().removals, 0);
        let mut removed = false;
        while let Ok(event) = rx.try_recv() {
            removed |= matches!(event, CartEvent::LineRemoved { key: "a", .. });
        }
        assert!(removed);
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_tables_and_debug_reports_lines() {
        let (_backend, cart) = coalescer(RateLimitPolicy::Coalesce);
        let other = cart.clone();

        other.update_quantity("a", 2);
        assert_eq!(cart.view(&"a").unwrap().quantity, 2);
        let debug = format!("{cart:?}");
        assert!(debug.starts_with("CartCoalescer"));
        assert!(debug.contains("lines: 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_everything() {
        let (_backend, cart) = coalescer(RateLimitPolicy::Coalesce);

        cart.update_quantity("a", 2);
        cart.reset();

        assert!(cart.view(&"a").is_none());
        assert_eq!(cart.pending_writes(&"a"), 0);
    }
}
