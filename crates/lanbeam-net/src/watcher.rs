//! Interface change watching.
//!
//! A low-frequency poller that compares successive interface listings and
//! reports only meaningful deltas: a change in interface count greater than
//! one, or any change in the set of primary-candidate addresses. Discovery
//! rebinds its send sockets on those events; noise (metric flaps, address
//! reorderings) is filtered out here.

use crate::iface::{ClassifiedInterface, InterfaceClassifier, NetIfEnumerator, select_primary};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default polling period for the watcher.
pub const DEFAULT_WATCH_PERIOD: Duration = Duration::from_secs(120);

/// A meaningful change in the interface landscape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceChange {
    /// Interface count before the change.
    pub previous_count: usize,
    /// Interface count after the change.
    pub current_count: usize,
    /// Whether a primary-candidate address appeared, vanished, or moved.
    pub primary_changed: bool,
}

/// Fingerprint of a listing used for delta comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    count: usize,
    primary_addrs: BTreeSet<Ipv4Addr>,
}

impl Snapshot {
    fn of(interfaces: &[ClassifiedInterface]) -> Self {
        let primary_addrs = select_primary(interfaces)
            .map(|c| c.info.ipv4s.iter().copied().collect())
            .unwrap_or_default();
        Self {
            count: interfaces.len(),
            primary_addrs,
        }
    }
}

/// Decide whether the delta between two listings is worth reporting.
#[must_use]
pub fn significant_change(
    old: &[ClassifiedInterface],
    new: &[ClassifiedInterface],
) -> Option<InterfaceChange> {
    let before = Snapshot::of(old);
    let after = Snapshot::of(new);

    let count_jump = before.count.abs_diff(after.count) > 1;
    let primary_changed = before.primary_addrs != after.primary_addrs;

    if count_jump || primary_changed {
        Some(InterfaceChange {
            previous_count: before.count,
            current_count: after.count,
            primary_changed,
        })
    } else {
        None
    }
}

/// Background poller emitting [`InterfaceChange`] events.
pub struct InterfaceWatcher {
    handle: JoinHandle<()>,
}

impl InterfaceWatcher {
    /// Spawn the watcher task.
    ///
    /// Events are sent on `tx`; the task stops when the receiver is dropped.
    pub fn spawn(
        enumerator: Arc<dyn NetIfEnumerator>,
        classifier: InterfaceClassifier,
        period: Duration,
        tx: mpsc::Sender<InterfaceChange>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; use it to seed the baseline.
            ticker.tick().await;

            let mut last = match enumerator.interfaces() {
                Ok(list) => classifier.classify_all(list),
                Err(e) => {
                    tracing::warn!(error = %e, "interface watcher could not seed baseline");
                    Vec::new()
                }
            };

            loop {
                ticker.tick().await;

                let current = match enumerator.interfaces() {
                    Ok(list) => classifier.classify_all(list),
                    Err(e) => {
                        tracing::debug!(error = %e, "interface poll failed, keeping baseline");
                        continue;
                    }
                };

                if let Some(change) = significant_change(&last, &current) {
                    tracing::info!(
                        previous = change.previous_count,
                        current = change.current_count,
                        primary_changed = change.primary_changed,
                        "interface landscape changed"
                    );
                    if tx.send(change).await.is_err() {
                        break;
                    }
                }

                last = current;
            }
        });

        Self { handle }
    }

    /// Abort the watcher task.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for InterfaceWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
