//! Builds the selection tree from a snapshot

use switchyard_api::RoutingMode;
use switchyard_latency::LatencyCache;
use tracing::{debug, info, trace};

use crate::classify::{Classification, GroupPolicy, classify};
use crate::snapshot::TopologySnapshot;
use crate::tree::{GroupEntry, GroupEntryKind, MemberEntry, SelectionTree};

/// A `(group, proxy)` selection to send to the engine.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectionRequest {
    /// Group to switch.
    pub group: String,

    /// Member to switch it to.
    pub proxy: String,
}

impl SelectionRequest {
    /// Creates a request.
    pub fn new(group: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            proxy: proxy.into(),
        }
    }
}

/// Result of [`build`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildOutput {
    /// The tree to present.
    pub tree: SelectionTree,

    /// Selector groups the engine reported without a valid selection. Their first member is
    /// already marked selected in `tree`; these requests make the engine agree.
    pub self_heal: Vec<SelectionRequest>,
}

/// Builds the selection tree for `snapshot` under `mode`.
///
/// Groups are visited in name order and the finished list is reversed, so the last name
/// comes first. Latency is read from `latency` as it stands; proxies without a sample get
/// none. The function is pure apart from those reads.
#[must_use]
pub fn build(snapshot: &TopologySnapshot, mode: RoutingMode, latency: &LatencyCache) -> BuildOutput {
    let mut groups = Vec::new();
    let mut self_heal = Vec::new();

    if mode == RoutingMode::Direct {
        return BuildOutput {
            tree: SelectionTree::empty(mode),
            self_heal,
        };
    }

    for record in snapshot.records() {
        let (policy, members) = match classify(record, mode) {
            Classification::Visible { policy, members } => (policy, members),
            Classification::Hidden(reason) => {
                trace!("Skipping {} ({:?})", record.name, reason);
                continue;
            }
        };

        let kind = match policy {
            GroupPolicy::Probed => GroupEntryKind::Probed {
                now: record.now.clone(),
            },
            GroupPolicy::Selector => {
                let mut has_selected = false;
                let mut entries: Vec<MemberEntry> = members
                    .iter()
                    // In global mode a selector member would route into another router
                    // group instead of an endpoint.
                    .filter(|member| !(mode == RoutingMode::Global && snapshot.is_selector(member)))
                    .map(|member| {
                        let selected = !has_selected && *member == record.now;
                        has_selected |= selected;

                        MemberEntry {
                            name: member.clone(),
                            selected,
                            latency: latency.get(member),
                        }
                    })
                    .collect();

                if !has_selected {
                    if let Some(first) = entries.first_mut() {
                        info!(
                            "{} has no valid selection ({:?}), defaulting to {}",
                            record.name, record.now, first.name
                        );
                        first.selected = true;
                        self_heal.push(SelectionRequest::new(&record.name, &first.name));
                    } else {
                        debug!("{} has no eligible members", record.name);
                    }
                }

                GroupEntryKind::Selector { members: entries }
            }
        };

        groups.push(GroupEntry {
            name: record.name.clone(),
            kind,
        });
    }

    groups.reverse();

    BuildOutput {
        tree: SelectionTree::new(mode, groups),
        self_heal,
    }
}
