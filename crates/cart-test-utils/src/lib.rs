//! Testing utilities for the cart sync workspace
//!
//! Shared test helpers, fixtures, and a scripted backend whose writes can be
//! held at the gate until a test releases them.

#![allow(missing_docs)]

use async_trait::async_trait;
use cart_sync::{CartBackend, CartCoalescer, CartEvent};
use cart_types::{CartError, CoalescerConfig, LineKey, LineSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

pub const TEST_USER: &str = "user-1";

/// One call observed by [`ScriptedBackend`], recorded when it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Add(LineKey, u32),
    Set(LineKey, u32),
    Remove(LineKey),
    FetchLine(LineKey),
    FetchCart,
}

impl BackendCall {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Add(..) | Self::Set(..) | Self::Remove(_))
    }
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<BackendCall>,
    outcomes: VecDeque<Result<(), CartError>>,
    lines: HashMap<LineKey, LineSnapshot>,
    in_flight: HashMap<LineKey, usize>,
    max_line_concurrency: usize,
}

/// Backend with scripted outcomes and an optional write gate
///
/// Writes succeed by default and echo the requested quantity. Outcomes
/// queued with [`ScriptedBackend::fail_next`] are consumed in order by
/// subsequent writes. A held backend parks every write until
/// [`ScriptedBackend::release`] hands out a permit.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
    gate: Option<Semaphore>,
    fetch_delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes wait for [`ScriptedBackend::release`]
    pub fn held() -> Self {
        Self {
            script: Mutex::default(),
            gate: Some(Semaphore::new(0)),
            fetch_delay: Duration::ZERO,
        }
    }

    /// Full-cart fetches read the lines, then wait `delay` before answering
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_line(self, variant: &str, snapshot: LineSnapshot) -> Self {
        self.script.lock().lines.insert(key(variant), snapshot);
        self
    }

    /// Let `writes` parked (or future) writes through
    pub fn release(&self, writes: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(writes);
        }
    }

    pub fn fail_next(&self, error: CartError) {
        self.script.lock().outcomes.push_back(Err(error));
    }

    pub fn succeed_next(&self) {
        self.script.lock().outcomes.push_back(Ok(()));
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.script.lock().calls.clone()
    }

    pub fn writes(&self) -> Vec<BackendCall> {
        self.calls().into_iter().filter(BackendCall::is_write).collect()
    }

    pub fn stored(&self, variant: &str) -> Option<LineSnapshot> {
        self.script.lock().lines.get(&key(variant)).copied()
    }

    /// Highest number of simultaneous writes seen on a single line
    pub fn max_line_concurrency(&self) -> usize {
        self.script.lock().max_line_concurrency
    }

    async fn write(&self, call: BackendCall, line: &LineKey) -> Result<(), CartError> {
        {
            let mut script = self.script.lock();
            script.calls.push(call);
            let depth = script.in_flight.entry(line.clone()).or_insert(0);
            *depth += 1;
            let depth = *depth;
            script.max_line_concurrency = script.max_line_concurrency.max(depth);
        }

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| CartError::Transport("gate closed".to_string()))?;
            permit.forget();
        }

        let mut script = self.script.lock();
        if let Some(depth) = script.in_flight.get_mut(line) {
            *depth -= 1;
        }
        script.outcomes.pop_front().unwrap_or(Ok(()))
    }

    fn store(&self, line: &LineKey, quantity: u32) -> LineSnapshot {
        let mut script = self.script.lock();
        let snapshot = script
            .lines
            .entry(line.clone())
            .or_insert_with(|| LineSnapshot::new(quantity));
        snapshot.quantity = quantity;
        *snapshot
    }
}

#[async_trait]
impl CartBackend<LineKey> for ScriptedBackend {
    async fn add_line(&self, key: &LineKey, quantity: u32) -> Result<LineSnapshot, CartError> {
        self.write(BackendCall::Add(key.clone(), quantity), key).await?;
        Ok(self.store(key, quantity))
    }

    async fn set_quantity(&self, key: &LineKey, quantity: u32) -> Result<LineSnapshot, CartError> {
        self.write(BackendCall::Set(key.clone(), quantity), key).await?;
        Ok(self.store(key, quantity))
    }

    async fn remove_line(&self, key: &LineKey) -> Result<(), CartError> {
        self.write(BackendCall::Remove(key.clone()), key).await?;
        self.script.lock().lines.remove(key);
        Ok(())
    }

    async fn fetch_line(&self, key: &LineKey) -> Result<Option<LineSnapshot>, CartError> {
        let mut script = self.script.lock();
        script.calls.push(BackendCall::FetchLine(key.clone()));
        Ok(script.lines.get(key).copied())
    }

    async fn fetch_cart(&self) -> Result<Vec<(LineKey, LineSnapshot)>, CartError> {
        let lines: Vec<_> = {
            let mut script = self.script.lock();
            script.calls.push(BackendCall::FetchCart);
            script
                .lines
                .iter()
                .map(|(key, snapshot)| (key.clone(), *snapshot))
                .collect()
        };
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        Ok(lines)
    }
}

pub fn key(variant: &str) -> LineKey {
    LineKey::new(TEST_USER, variant)
}

pub fn setup_coalescer(backend: Arc<ScriptedBackend>) -> CartCoalescer<LineKey> {
    setup_coalescer_with(backend, CoalescerConfig::default())
}

pub fn setup_coalescer_with(
    backend: Arc<ScriptedBackend>,
    config: CoalescerConfig,
) -> CartCoalescer<LineKey> {
    let backend: Arc<dyn CartBackend<LineKey>> = backend;
    CartCoalescer::new(backend, config)
}

/// Let spawned tasks run without moving past any debounce deadline
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Everything received so far, without waiting
pub fn drain(events: &mut broadcast::Receiver<CartEvent<LineKey>>) -> Vec<CartEvent<LineKey>> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

/// Received events other than pending-count updates
pub fn outcomes(events: &mut broadcast::Receiver<CartEvent<LineKey>>) -> Vec<CartEvent<LineKey>> {
    drain(events)
        .into_iter()
        .filter(|event| !matches!(event, CartEvent::PendingChanged { .. }))
        .collect()
}
