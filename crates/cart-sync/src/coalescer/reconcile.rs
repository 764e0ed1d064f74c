//! Merging write outcomes back into tables and view state

use super::dispatch::Next;
use super::tables::{FireOutcome, InFlight, LineTables};
use super::CartCoalescer;
use crate::backend::CartKey;
use crate::events::CartEvent;
use cart_types::{CartError, CartLineViewState, LineSnapshot};
use std::collections::HashSet;

impl<K: CartKey> CartCoalescer<K> {
    /// Reconcile a quantity write (add or update)
    pub(super) fn reconcile_write(
        &self,
        key: K,
        write: InFlight,
        epoch: u64,
        result: Result<LineSnapshot, CartError>,
    ) {
        let mut events = Vec::with_capacity(3);
        let next = {
            let mut tables = self.shared.tables.lock();
            if tables.epoch() != epoch {
                tracing::debug!(line = %key, write_id = %write.write_id, "dropping completion from ended session");
                return;
            }
            tables.finish_write(&key, write.write_id);
            tables.clear_pending_if(&key, write.quantity);
            let replay = tables.promote_queued(&key);
            let outstanding = tables.has_outstanding(&key);

            match result {
                Ok(snapshot) => {
                    tables.confirm(key.clone(), snapshot.quantity);
                    if let Some(mut view) = self.shared.views.get_mut(&key) {
                        if snapshot.max_quantity.is_some() {
                            view.max_quantity = snapshot.max_quantity;
                        }
                        if outstanding {
                            view.refresh_unconfirmed();
                        } else {
                            view.quantity = snapshot.quantity;
                            if view.within_bounds(write.quantity) {
                                view.clear_unconfirmed();
                            }
                        }
                    }
                    tracing::debug!(line = %key, write_id = %write.write_id, quantity = snapshot.quantity, "cart write confirmed");
                    events.push(CartEvent::WriteSucceeded {
                        key: key.clone(),
                        write_id: write.write_id,
                        quantity: snapshot.quantity,
                    });
                }
                Err(error) => {
                    tracing::warn!(line = %key, write_id = %write.write_id, quantity = write.quantity, %error, "cart write failed");
                    self.roll_back(&tables, &key, outstanding);
                    if error.is_session_expired() {
                        events.push(CartEvent::SessionExpired);
                    }
                    events.push(CartEvent::WriteFailed {
                        key: key.clone(),
                        write_id: write.write_id,
                        quantity: write.quantity,
                        error,
                    });
                }
            }

            let next = plan_replay(&mut tables, &key, replay);
            events.push(CartEvent::PendingChanged {
                key: key.clone(),
                pending: tables.pending_writes(&key),
            });
            next
        };

        self.shared.events.emit_all(events);
        self.launch(key, next, epoch);
    }

    /// Reconcile a removal; a failed removal refetches the line
    pub(super) async fn reconcile_removal(
        &self,
        key: K,
        write: InFlight,
        epoch: u64,
        result: Result<(), CartError>,
    ) {
        let mut events = Vec::with_capacity(3);
        let (next, refetch) = {
            let mut tables = self.shared.tables.lock();
            if tables.epoch() != epoch {
                return;
            }
            tables.finish_write(&key, write.write_id);
            tables.clear_pending_if(&key, 0);
            let replay = tables.promote_queued(&key);

            let refetch = match result {
                Ok(()) => {
                    tables.forget(&key);
                    tracing::debug!(line = %key, write_id = %write.write_id, "cart line removed");
                    events.push(CartEvent::LineRemoved {
                        key: key.clone(),
                        write_id: write.write_id,
                    });
                    false
                }
                Err(error) => {
                    tracing::warn!(line = %key, write_id = %write.write_id, %error, "cart removal failed");
                    if error.is_session_expired() {
                        events.push(CartEvent::SessionExpired);
                    }
                    events.push(CartEvent::RemovalFailed {
                        key: key.clone(),
                        write_id: write.write_id,
                        error,
                    });
                    // A fresh intent for the line supersedes the restore
                    !tables.has_outstanding(&key)
                }
            };

            let next = plan_replay(&mut tables, &key, replay);
            events.push(CartEvent::PendingChanged {
                key: key.clone(),
                pending: tables.pending_writes(&key),
            });
            (next, refetch)
        };

        self.shared.events.emit_all(events);
        self.launch(key.clone(), next, epoch);
        if refetch {
            self.restore_line(key, epoch).await;
        }
    }

    /// Fetch the whole cart and replace the view with server state
    ///
    /// Lines with outstanding intent keep their optimistic quantity, and
    /// lines whose writes completed while the fetch was out keep what those
    /// writes reported.
    ///
    /// # Errors
    /// Returns the backend error; `Unauthorized` also emits `SessionExpired`.
    pub async fn refresh(&self) -> Result<(), CartError> {
        let (epoch, mark) = {
            let tables = self.shared.tables.lock();
            (tables.epoch(), tables.confirm_mark())
        };
        let lines = match self.shared.backend.fetch_cart().await {
            Ok(lines) => lines,
            Err(error) => {
                if error.is_session_expired() {
                    self.shared.events.emit(CartEvent::SessionExpired);
                }
                return Err(error);
            }
        };

        let mut tables = self.shared.tables.lock();
        if tables.epoch() != epoch {
            return Ok(());
        }
        tables.replace_confirmed(
            lines
                .iter()
                .map(|(key, snapshot)| (key.clone(), snapshot.quantity)),
            mark,
        );

        let mut fresh = HashSet::with_capacity(lines.len());
        for (key, snapshot) in lines {
            if tables.changed_since(&key, mark) {
                tracing::debug!(line = %key, "skipping refetched line superseded by a later write");
                continue;
            }
            if tables.has_outstanding(&key) {
                if let Some(mut view) = self.shared.views.get_mut(&key) {
                    view.set_max_quantity(snapshot.max_quantity);
                }
            } else {
                self.shared
                    .views
                    .insert(key.clone(), CartLineViewState::from(snapshot));
            }
            fresh.insert(key);
        }
        self.shared
            .views
            .retain(|key, _| {
                fresh.contains(key) || tables.has_outstanding(key) || tables.changed_since(key, mark)
            });

        tracing::info!(lines = fresh.len(), "cart refreshed from server");
        Ok(())
    }

    /// Point rollback after a failed quantity write
    fn roll_back(&self, tables: &LineTables<K>, key: &K, outstanding: bool) {
        if outstanding {
            // Newer intent owns the displayed quantity
            if let Some(mut view) = self.shared.views.get_mut(key) {
                view.refresh_unconfirmed();
            }
            return;
        }
        match tables.last_good(key) {
            Some(quantity) => {
                if let Some(mut view) = self.shared.views.get_mut(key) {
                    view.quantity = quantity;
                    view.clear_unconfirmed();
                }
            }
            // Never confirmed: the failed write was the line's first add
            None => {
                self.shared.views.remove(key);
            }
        }
    }

    async fn restore_line(&self, key: K, epoch: u64) {
        let result = self.shared.backend.fetch_line(&key).await;

        let event = {
            let mut tables = self.shared.tables.lock();
            if tables.epoch() != epoch || tables.has_outstanding(&key) {
                return;
            }
            match result {
                Ok(Some(snapshot)) => {
                    tables.confirm(key.clone(), snapshot.quantity);
                    self.shared
                        .views
                        .insert(key.clone(), CartLineViewState::from(snapshot));
                    tracing::info!(line = %key, quantity = snapshot.quantity, "cart line restored after failed removal");
                    CartEvent::LineRestored {
                        key,
                        quantity: snapshot.quantity,
                    }
                }
                Ok(None) => {
                    tables.forget(&key);
                    tracing::debug!(line = %key, "line already absent on server");
                    return;
                }
                Err(error) => {
                    tracing::warn!(line = %key, %error, "line refetch failed");
                    CartEvent::RefetchFailed { key, error }
                }
            }
        };
        self.shared.events.emit(event);
    }
}

/// Decide how a promoted value goes out: removals immediately, quantities
/// through a fresh debounce cycle
///
/// A removal of a line the server never stored settles without a request.
fn plan_replay<K: CartKey>(tables: &mut LineTables<K>, key: &K, replay: Option<u32>) -> Next {
    match replay {
        None => Next::Nothing,
        Some(0) if tables.last_good(key).is_none() => {
            tables.clear_pending_if(key, 0);
            tables.forget(key);
            Next::Removed
        }
        Some(0) => match tables.fire(key) {
            FireOutcome::Send(write) => Next::Write(write),
            _ => Next::Nothing,
        },
        Some(_) => Next::Timer(tables.arm_timer(key.clone())),
    }
}
