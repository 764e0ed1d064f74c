//! Debounced dispatch and in-flight writes

use super::tables::{FireOutcome, InFlight};
use super::CartCoalescer;
use crate::backend::{CartKey, WriteKind};
use crate::events::CartEvent;
use cart_types::WriteId;

/// Follow-up work decided while reconciling a completed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Next {
    Nothing,
    Timer(u64),
    Write(InFlight),
    /// Queued removal of a line the server never stored
    Removed,
}

impl<K: CartKey> CartCoalescer<K> {
    /// Sleep out the quiet period, then fire if this timer is still current
    pub(super) fn spawn_timer(&self, key: K, generation: u64, epoch: u64) {
        let this = self.clone();
        let quiet = self.shared.config.debounce();
        let line = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            this.fire(line, generation, epoch).await;
        });
        self.shared
            .tables
            .lock()
            .attach_timer(&key, generation, task.abort_handle());
    }

    pub(super) fn spawn_write(&self, key: K, write: InFlight, epoch: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            this.perform(key, write, epoch).await;
        });
    }

    pub(super) fn launch(&self, key: K, next: Next, epoch: u64) {
        match next {
            Next::Nothing => {}
            Next::Timer(generation) => self.spawn_timer(key, generation, epoch),
            Next::Write(write) => self.spawn_write(key, write, epoch),
            Next::Removed => {
                tracing::debug!(line = %key, "queued removal settled locally");
                self.shared.events.emit(CartEvent::LineRemoved {
                    key,
                    write_id: WriteId::new(),
                });
            }
        }
    }

    async fn fire(&self, key: K, generation: u64, epoch: u64) {
        let outcome = {
            let mut tables = self.shared.tables.lock();
            if tables.epoch() != epoch || !tables.take_timer(&key, generation) {
                return;
            }
            tables.fire(&key)
        };

        match outcome {
            FireOutcome::Idle => {
                tracing::debug!(line = %key, "debounce fired with nothing pending");
            }
            FireOutcome::Deferred(quantity) => {
                tracing::debug!(line = %key, quantity, "line busy; write queued");
            }
            FireOutcome::Send(write) => self.perform(key, write, epoch).await,
        }
    }

    /// Issue one write and reconcile its outcome
    ///
    /// Runs to completion; nothing cancels a write once issued.
    async fn perform(&self, key: K, write: InFlight, epoch: u64) {
        tracing::debug!(
            line = %key,
            write_id = %write.write_id,
            quantity = write.quantity,
            kind = ?write.kind,
            "issuing cart write"
        );
        let backend = &self.shared.backend;
        match write.kind {
            WriteKind::Remove => {
                let result = backend.remove_line(&key).await;
                self.reconcile_removal(key, write, epoch, result).await;
            }
            WriteKind::Add => {
                let result = backend.add_line(&key, write.quantity).await;
                self.reconcile_write(key, write, epoch, result);
            }
            WriteKind::Update => {
                let result = backend.set_quantity(&key, write.quantity).await;
                self.reconcile_write(key, write, epoch, result);
            }
        }
    }
}
