//! Maps raw group records to routing policies

use serde::Serialize;
use switchyard_api::{GroupRecord, RoutingMode};

use crate::snapshot::AGGREGATE_GROUP;

/// Type tag of user-switchable groups.
pub const SELECTOR: &str = "Selector";

/// Type tag of groups the engine switches by latency.
pub const URL_TEST: &str = "URLTest";

/// Type tag of groups the engine switches on failure.
pub const FALLBACK: &str = "Fallback";

/// How the active member of a group is chosen.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    /// The user picks any member.
    Selector,

    /// The engine picks based on its own health probes.
    Probed,
}

impl GroupPolicy {
    /// Policy for an engine type tag, `None` for plain proxies and unknown group types.
    #[must_use]
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            SELECTOR => Some(Self::Selector),
            URL_TEST | FALLBACK => Some(Self::Probed),
            _ => None,
        }
    }
}

/// Why a record is left out of the selection tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HiddenReason {
    /// Nothing is shown in direct mode.
    DirectMode,

    /// The type tag is not a group policy we present.
    UnknownPolicy,

    /// The aggregate group outside global mode, or any other selector inside it.
    OutsideMode,
}

/// Result of [`classify`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification<'a> {
    /// Shown with this policy.
    Visible {
        /// How the active member is chosen.
        policy: GroupPolicy,

        /// Members in engine order.
        members: &'a [String],
    },

    /// Left out.
    Hidden(HiddenReason),
}

/// Decides whether `record` is shown under `mode`, and how.
///
/// The aggregate/non-aggregate split only applies to selector groups: probed groups are
/// shown in every mode except direct.
#[must_use]
pub fn classify(record: &GroupRecord, mode: RoutingMode) -> Classification<'_> {
    if mode == RoutingMode::Direct {
        return Classification::Hidden(HiddenReason::DirectMode);
    }

    let Some(policy) = GroupPolicy::from_type(&record.kind) else {
        return Classification::Hidden(HiddenReason::UnknownPolicy);
    };

    if policy == GroupPolicy::Selector {
        let is_aggregate = record.name == AGGREGATE_GROUP;
        let is_global = mode == RoutingMode::Global;

        if is_aggregate != is_global {
            return Classification::Hidden(HiddenReason::OutsideMode);
        }
    }

    Classification::Visible {
        policy,
        members: &record.all,
    }
}
