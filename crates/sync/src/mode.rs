//! Process-wide routing mode

use std::sync::Arc;

use switchyard_api::RoutingMode;
use tokio::sync::watch;
use tracing::info;

/// Holds the active [`RoutingMode`].
///
/// Clones share the same value. [`ModeGate::set`] is the only writer; every change is
/// published to [`ModeGate::subscribe`] receivers so holders of a selection tree know to
/// rebuild it.
#[derive(Clone, Debug)]
pub struct ModeGate {
    tx: Arc<watch::Sender<RoutingMode>>,
}

impl ModeGate {
    /// Creates a gate starting at `initial`.
    #[must_use]
    pub fn new(initial: RoutingMode) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// The active mode.
    #[must_use]
    pub fn get(&self) -> RoutingMode {
        *self.tx.borrow()
    }

    /// Switches to `mode`. Returns whether the mode actually changed; subscribers are only
    /// notified when it did.
    pub fn set(&self, mode: RoutingMode) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        });

        if changed {
            info!("Routing mode switched to {}", mode);
        }

        changed
    }

    /// Receiver notified on every mode change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RoutingMode> {
        self.tx.subscribe()
    }
}

impl Default for ModeGate {
    fn default() -> Self {
        Self::new(RoutingMode::default())
    }
}
