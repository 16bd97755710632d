//! Selection state machine
//!
//! Each group is `Idle` until a selection is requested, then `Pending` until the engine
//! answers. A confirmed answer commits, anything else rejects; both return the group to
//! `Idle`. A newer request for the same group supersedes the pending one, whose answer is
//! then ignored whatever it is.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use switchyard_api::{ControlApi, ControlApiError, ControlApiErrorKind};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a selection did not take effect.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Rejection {
    /// The engine refused or could not be reached.
    #[error("engine did not accept the selection ({kind}): {message}")]
    Remote {
        /// What went wrong talking to the engine.
        kind: ControlApiErrorKind,

        /// Description from the control API client.
        message: String,
    },

    /// No answer within the request timeout.
    #[error("engine did not confirm the selection within {0:?}")]
    Timeout(Duration),

    /// A newer selection for the same group was issued before this one was answered.
    #[error("superseded by a newer selection for the same group")]
    Superseded,

    /// The task driving the selection died before it was answered.
    #[error("selection was interrupted: {0}")]
    Interrupted(String),
}

/// Final result of a selection request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectionOutcome {
    /// The engine confirmed the change and local state follows it.
    Committed,

    /// Nothing changed locally.
    Rejected(Rejection),
}

impl SelectionOutcome {
    /// Whether the selection took effect.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Where a group stands in the state machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectionState {
    /// No request in flight.
    Idle,

    /// Waiting for the engine to answer a request for `proxy`.
    Pending {
        /// The candidate member.
        proxy: String,
    },
}

#[derive(Debug)]
struct Pending {
    ticket: u64,
    proxy: String,
}

/// Tracks the authoritative in-flight request per group.
#[derive(Debug, Default)]
pub struct SelectionMutator {
    pending: Mutex<HashMap<String, Pending>>,
    next_ticket: AtomicU64,
}

impl SelectionMutator {
    /// Creates a mutator with every group idle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Where `group` stands.
    #[must_use]
    pub fn state(&self, group: &str) -> SelectionState {
        self.pending
            .lock()
            .get(group)
            .map_or(SelectionState::Idle, |pending| SelectionState::Pending {
                proxy: pending.proxy.clone(),
            })
    }

    /// Sends `group -> proxy` to the engine and settles the request.
    ///
    /// `commit` runs only if the engine confirmed and no newer request for `group` was
    /// issued meanwhile. It runs under the mutator's lock, so no other request for any group
    /// can settle or start while it does; it must not block.
    pub async fn select<A, F>(
        &self,
        api: &A,
        group: &str,
        proxy: &str,
        timeout: Duration,
        commit: F,
    ) -> SelectionOutcome
    where
        A: ControlApi,
        F: FnOnce(&str, &str),
    {
        let ticket = self.begin(group, proxy);

        let result = tokio::time::timeout(timeout, api.set_group_selection(group, proxy)).await;

        let mut pending = self.pending.lock();

        let is_current = pending
            .get(group)
            .is_some_and(|current| current.ticket == ticket);
        if !is_current {
            debug!(
                "Ignoring answer for superseded selection {}/{}",
                group, proxy
            );
            return SelectionOutcome::Rejected(Rejection::Superseded);
        }

        pending.remove(group);

        match result {
            Ok(Ok(())) => {
                commit(group, proxy);
                info!("Committed selection {}/{}", group, proxy);
                SelectionOutcome::Committed
            }
            Ok(Err(e)) => {
                warn!("Engine rejected selection {}/{}: {}", group, proxy, e);
                SelectionOutcome::Rejected(Rejection::Remote {
                    kind: e.kind(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    "Selection {}/{} timed out after {:?}",
                    group, proxy, timeout
                );
                SelectionOutcome::Rejected(Rejection::Timeout(timeout))
            }
        }
    }

    fn begin(&self, group: &str, proxy: &str) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let previous = self.pending.lock().insert(
            group.to_string(),
            Pending {
                ticket,
                proxy: proxy.to_string(),
            },
        );

        if let Some(previous) = previous {
            debug!(
                "Selection {}/{} supersedes pending {}",
                group, proxy, previous.proxy
            );
        }

        ticket
    }
}
