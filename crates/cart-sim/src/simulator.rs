//! Cart load simulator
//!
//! Drives seeded random bursts of quantity changes and removals through a
//! coalescer backed by [`InMemoryCart`] on a paused Tokio clock, then checks
//! the write-path invariants against what the backend saw.

use anyhow::Context;
use cart_sync::{CartBackend, CartCoalescer, CartEvent, InMemoryCart};
use cart_types::{CoalescerConfig, LineKey};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const SIM_USER: &str = "sim-user";

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Distinct cart lines
    pub lines: usize,
    /// Interactions to generate
    pub events: u64,
    /// Probability that a backend call fails
    pub fail_rate: f64,
    /// Simulated latency per backend call
    pub latency: Duration,
    /// Longest pause between interactions
    pub max_gap: Duration,
    /// Probability that an interaction is a removal
    pub removal_rate: f64,
    pub coalescer: CoalescerConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            lines: 4,
            events: 1_000,
            fail_rate: 0.0,
            latency: Duration::from_millis(120),
            max_gap: Duration::from_millis(300),
            removal_rate: 0.1,
            coalescer: CoalescerConfig::default(),
        }
    }
}

/// A violated write-path invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Two writes for one line overlapped
    ConcurrentWrites { max_line_concurrency: usize },
    /// Backend ended on a different value than the user's last interaction
    FinalValueMismatch {
        line: String,
        expected: Option<u32>,
        stored: Option<u32>,
    },
    /// More writes than recorded interactions
    ExcessWrites { writes: usize, interactions: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub seed: u64,
    pub lines: usize,
    pub interactions: u64,
    pub quantity_writes: usize,
    pub removals: usize,
    pub injected_failures: usize,
    pub max_line_concurrency: usize,
    pub lines_checked: usize,
    pub lagged_events: u64,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Cart Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Lines: {}", self.lines);
        let _ = writeln!(report, "Interactions: {}", self.interactions);
        let _ = writeln!(report, "Quantity writes: {}", self.quantity_writes);
        let _ = writeln!(report, "Removals: {}", self.removals);
        let _ = writeln!(report, "Injected failures: {}", self.injected_failures);
        let _ = writeln!(report, "Max line concurrency: {}", self.max_line_concurrency);
        let _ = writeln!(report, "Lines checked for final value: {}", self.lines_checked);
        if self.lagged_events > 0 {
            let _ = writeln!(report, "Lagged events: {}", self.lagged_events);
        }
        report.push('\n');

        if self.passed() {
            report.push_str("Result: PASS\n");
        } else {
            let _ = writeln!(report, "Result: FAIL ({} violations)", self.violations.len());
            for violation in &self.violations {
                let _ = writeln!(report, "  - {violation:?}");
            }
        }
        report
    }
}

/// Run one simulation on a fresh paused-clock runtime
///
/// # Errors
/// Fails only if the runtime cannot be built.
pub fn run_simulator(config: SimulatorConfig) -> anyhow::Result<SimulatorReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .context("building simulator runtime")?;
    Ok(runtime.block_on(simulate(config)))
}

async fn simulate(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let backend: Arc<InMemoryCart<LineKey>> = Arc::new(
        InMemoryCart::new()
            .with_latency(config.latency)
            .with_failure_rate(config.fail_rate, config.seed.wrapping_add(1)),
    );
    let shared: Arc<dyn CartBackend<LineKey>> = backend.clone();
    let cart = CartCoalescer::new(shared, config.coalescer.clone());

    let keys: Vec<LineKey> = (0..config.lines.max(1))
        .map(|i| LineKey::new(SIM_USER, format!("variant-{i}")))
        .collect();

    let outcomes = Arc::new(Mutex::new(HashMap::new()));
    let lagged = Arc::new(Mutex::new(0u64));
    let listener = tokio::spawn(track_outcomes(
        cart.subscribe(),
        Arc::clone(&outcomes),
        Arc::clone(&lagged),
    ));

    // Last value the user saw for each line after their own interaction
    let mut expected: HashMap<LineKey, Option<u32>> = HashMap::new();
    let max_gap_ms = u64::try_from(config.max_gap.as_millis()).unwrap_or(u64::MAX);

    for _ in 0..config.events {
        let key = &keys[rng.random_range(0..keys.len())];
        let quantity = if rng.random_bool(config.removal_rate.clamp(0.0, 1.0)) {
            0
        } else {
            rng.random_range(1..=9)
        };
        cart.update_quantity(key.clone(), quantity);
        expected.insert(key.clone(), cart.view(key).map(|view| view.quantity));

        let gap = rng.random_range(0..=max_gap_ms);
        tokio::time::sleep(Duration::from_millis(gap)).await;
    }

    // Quiet period long enough for every replay chain to drain
    let drain = (config.coalescer.debounce() + config.latency) * 8 + Duration::from_secs(5);
    tokio::time::sleep(drain).await;
    drop(cart);
    listener.abort();

    let stats = backend.stats();
    let mut violations = Vec::new();

    if stats.max_line_concurrency > 1 {
        violations.push(Violation::ConcurrentWrites {
            max_line_concurrency: stats.max_line_concurrency,
        });
    }

    let writes = stats.quantity_writes + stats.removals;
    if u64::try_from(writes).unwrap_or(u64::MAX) > config.events {
        violations.push(Violation::ExcessWrites {
            writes,
            interactions: config.events,
        });
    }

    let outcomes = outcomes.lock().clone();
    let mut lines_checked = 0;
    for (key, wanted) in &expected {
        // Only lines whose final write landed must match
        if outcomes.get(key) != Some(&Outcome::Succeeded) {
            continue;
        }
        lines_checked += 1;
        let stored = backend.quantity(key);
        if stored != *wanted {
            tracing::warn!(line = %key, ?wanted, ?stored, "final value mismatch");
            violations.push(Violation::FinalValueMismatch {
                line: key.to_string(),
                expected: *wanted,
                stored,
            });
        }
    }

    let lagged_events = *lagged.lock();
    tracing::info!(
        interactions = config.events,
        writes,
        violations = violations.len(),
        "simulation finished"
    );

    SimulatorReport {
        seed: config.seed,
        lines: keys.len(),
        interactions: config.events,
        quantity_writes: stats.quantity_writes,
        removals: stats.removals,
        injected_failures: stats.injected_failures,
        max_line_concurrency: stats.max_line_concurrency,
        lines_checked,
        lagged_events,
        violations,
    }
}

async fn track_outcomes(
    mut events: tokio::sync::broadcast::Receiver<CartEvent<LineKey>>,
    outcomes: Arc<Mutex<HashMap<LineKey, Outcome>>>,
    lagged: Arc<Mutex<u64>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                *lagged.lock() += missed;
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        let outcome = match &event {
            CartEvent::WriteSucceeded { .. } | CartEvent::LineRemoved { .. } => Outcome::Succeeded,
            CartEvent::WriteFailed { .. } | CartEvent::RemovalFailed { .. } => Outcome::Failed,
            _ => continue,
        };
        if let Some(key) = event.key() {
            outcomes.lock().insert(key.clone(), outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            events: 200,
            ..Default::default()
        }
    }

    #[test]
    fn clean_run_passes() {
        let report = run_simulator(config(7)).unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.max_line_concurrency <= 1);
        assert!(report.lines_checked > 0);
    }

    #[test]
    fn flaky_backend_still_holds_invariants() {
        let report = run_simulator(SimulatorConfig {
            fail_rate: 0.3,
            ..config(11)
        })
        .unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.injected_failures > 0);
    }

    #[test]
    fn same_seed_same_report() {
        let first = run_simulator(config(3)).unwrap();
        let second = run_simulator(config(3)).unwrap();
        assert_eq!(first.quantity_writes, second.quantity_writes);
        assert_eq!(first.removals, second.removals);
    }

    #[test]
    fn report_serializes_violations() {
        let report = SimulatorReport {
            seed: 1,
            lines: 1,
            interactions: 1,
            quantity_writes: 2,
            removals: 0,
            injected_failures: 0,
            max_line_concurrency: 1,
            lines_checked: 0,
            lagged_events: 0,
            violations: vec![Violation::ExcessWrites {
                writes: 2,
                interactions: 1,
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["violations"][0]["kind"], "excess_writes");
        assert!(!report.passed());
        assert!(report.generate_text().contains("FAIL"));
    }
}
