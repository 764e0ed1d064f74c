//! In-memory cart backend
//!
//! A self-contained [`CartBackend`] used by the simulator and tests. It
//! clamps quantities to configured stock, can inject latency and seeded
//! random failures, and records per-line concurrency so callers can check
//! that no line ever had two writes in flight.

use crate::backend::{CartBackend, CartKey};
use async_trait::async_trait;
use cart_types::{CartError, LineSnapshot};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;

/// Backend counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Quantity writes (add + set) received
    pub quantity_writes: usize,
    /// Removals received
    pub removals: usize,
    /// Writes answered with an injected failure
    pub injected_failures: usize,
    /// Highest number of simultaneous writes seen on a single line
    pub max_line_concurrency: usize,
}

#[derive(Debug, Default)]
struct Counters {
    stats: BackendStats,
    in_flight: HashMap<String, usize>,
}

/// In-memory [`CartBackend`]
#[derive(Debug)]
pub struct InMemoryCart<K: CartKey> {
    lines: DashMap<K, u32>,
    stock: DashMap<K, u32>,
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    counters: Mutex<Counters>,
}

impl<K: CartKey> InMemoryCart<K> {
    /// Create an empty, instant, never-failing cart
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: DashMap::new(),
            stock: DashMap::new(),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// With simulated network latency per call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// With seeded random write failures (`rate` in 0.0..=1.0)
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64, seed: u64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// With a line already in the cart
    #[must_use]
    pub fn with_line(self, key: K, quantity: u32) -> Self {
        self.lines.insert(key, quantity);
        self
    }

    /// With an inventory ceiling for a line
    #[must_use]
    pub fn with_stock(self, key: K, max_quantity: u32) -> Self {
        self.stock.insert(key, max_quantity);
        self
    }

    /// Stored quantity for a line
    #[must_use]
    pub fn quantity(&self, key: &K) -> Option<u32> {
        self.lines.get(key).map(|q| *q)
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> BackendStats {
        self.counters.lock().stats.clone()
    }

    fn snapshot(&self, key: &K, quantity: u32) -> LineSnapshot {
        LineSnapshot {
            quantity,
            max_quantity: self.stock.get(key).map(|max| *max),
        }
    }

    fn enter(&self, key: &K) {
        let mut counters = self.counters.lock();
        let depth = counters.in_flight.entry(key.to_string()).or_insert(0);
        *depth += 1;
        let depth = *depth;
        counters.stats.max_line_concurrency = counters.stats.max_line_concurrency.max(depth);
    }

    fn leave(&self, key: &K) {
        let mut counters = self.counters.lock();
        if let Some(depth) = counters.in_flight.get_mut(&key.to_string()) {
            *depth = depth.saturating_sub(1);
        }
    }

    async fn simulate_network(&self) -> Result<(), CartError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let fail = self.failure_rate > 0.0 && self.rng.lock().random_bool(self.failure_rate);
        if fail {
            self.counters.lock().stats.injected_failures += 1;
            return Err(CartError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    async fn write(&self, key: &K, quantity: u32) -> Result<LineSnapshot, CartError> {
        self.enter(key);
        self.counters.lock().stats.quantity_writes += 1;
        let outcome = self.simulate_network().await;
        self.leave(key);
        outcome?;

        let stored = match self.stock.get(key) {
            Some(max) => quantity.min(*max),
            None => quantity,
        };
        self.lines.insert(key.clone(), stored);
        Ok(self.snapshot(key, stored))
    }
}

impl<K: CartKey> Default for InMemoryCart<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CartKey> CartBackend<K> for InMemoryCart<K> {
    async fn set_quantity(&self, key: &K, quantity: u32) -> Result<LineSnapshot, CartError> {
        self.write(key, quantity).await
    }

    async fn remove_line(&self, key: &K) -> Result<(), CartError> {
        self.enter(key);
        self.counters.lock().stats.removals += 1;
        let outcome = self.simulate_network().await;
        self.leave(key);
        outcome?;

        self.lines.remove(key);
        Ok(())
    }

    async fn fetch_line(&self, key: &K) -> Result<Option<LineSnapshot>, CartError> {
        Ok(self.quantity(key).map(|q| self.snapshot(key, q)))
    }

    async fn fetch_cart(&self) -> Result<Vec<(K, LineSnapshot)>, CartError> {
        Ok(self
            .lines
            .iter()
            .map(|entry| (entry.key().clone(), self.snapshot(entry.key(), *entry.value())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_quantity_clamps_to_stock() {
        let cart = InMemoryCart::new().with_stock("a", 3);

        let snapshot = cart.set_quantity(&"a", 5).await.unwrap();
        assert_eq!(snapshot, LineSnapshot::new(3).with_max_quantity(3));
        assert_eq!(cart.quantity(&"a"), Some(3));
    }

    #[tokio::test]
    async fn remove_and_fetch() {
        let cart = InMemoryCart::new().with_line("a", 2).with_line("b", 1);

        cart.remove_line(&"a").await.unwrap();
        assert_eq!(cart.fetch_line(&"a").await.unwrap(), None);

        let lines = cart.fetch_cart().await.unwrap();
        assert_eq!(lines, vec![("b", LineSnapshot::new(1))]);
    }

    #[tokio::test]
    async fn always_failing_cart_counts_failures() {
        let cart = InMemoryCart::new().with_failure_rate(1.0, 7);

        let err = cart.set_quantity(&"a", 1).await.unwrap_err();
        assert!(matches!(err, CartError::Transport(_)));
        assert_eq!(cart.quantity(&"a"), None);

        let stats = cart.stats();
        assert_eq!(stats.quantity_writes, 1);
        assert_eq!(stats.injected_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_writes_are_detected() {
        let cart = std::sync::Arc::new(InMemoryCart::new().with_latency(Duration::from_millis(50)));

        let first = tokio::spawn({
            let cart = cart.clone();
            async move { cart.set_quantity(&"a", 1).await }
        });
        let second = tokio::spawn({
            let cart = cart.clone();
            async move { cart.set_quantity(&"a", 2).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(cart.stats().max_line_concurrency, 2);
    }
}
