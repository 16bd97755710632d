//! Presentable selection structure

use serde::Serialize;
use switchyard_api::RoutingMode;
use switchyard_latency::LatencySample;

use crate::classify::GroupPolicy;

/// A member of a selector group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MemberEntry {
    /// Proxy name.
    pub name: String,

    /// Whether this is the group's active member.
    pub selected: bool,

    /// Last known latency, if the prober has seen this proxy.
    pub latency: Option<LatencySample>,
}

/// Policy specific content of a [`GroupEntry`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GroupEntryKind {
    /// User-switchable group. At most one member is selected.
    Selector {
        /// Eligible members in engine order.
        members: Vec<MemberEntry>,
    },

    /// Engine-switched group. Only the active member is exposed.
    Probed {
        /// The member the engine currently routes through.
        now: String,
    },
}

/// A visible group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,

    /// Policy and members.
    #[serde(flatten)]
    pub kind: GroupEntryKind,
}

impl GroupEntry {
    /// The group's policy.
    #[must_use]
    pub const fn policy(&self) -> GroupPolicy {
        match self.kind {
            GroupEntryKind::Selector { .. } => GroupPolicy::Selector,
            GroupEntryKind::Probed { .. } => GroupPolicy::Probed,
        }
    }

    /// The active member, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        match &self.kind {
            GroupEntryKind::Selector { members } => members
                .iter()
                .find(|member| member.selected)
                .map(|member| member.name.as_str()),
            GroupEntryKind::Probed { now } if now.is_empty() => None,
            GroupEntryKind::Probed { now } => Some(now.as_str()),
        }
    }

    /// Switchable members. Empty for probed groups.
    #[must_use]
    pub fn members(&self) -> &[MemberEntry] {
        match &self.kind {
            GroupEntryKind::Selector { members } => members,
            GroupEntryKind::Probed { .. } => &[],
        }
    }
}

/// Visible groups in presentation order, built for one routing mode.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SelectionTree {
    mode: RoutingMode,
    groups: Vec<GroupEntry>,
}

impl SelectionTree {
    /// Creates a tree from already ordered groups.
    #[must_use]
    pub const fn new(mode: RoutingMode, groups: Vec<GroupEntry>) -> Self {
        Self { mode, groups }
    }

    /// A tree with no groups.
    #[must_use]
    pub const fn empty(mode: RoutingMode) -> Self {
        Self::new(mode, Vec::new())
    }

    /// Mode the tree was built for.
    #[must_use]
    pub const fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Groups in presentation order.
    #[must_use]
    pub fn groups(&self) -> &[GroupEntry] {
        &self.groups
    }

    /// Group named `name`.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupEntry> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// Active member of `group`.
    #[must_use]
    pub fn selected(&self, group: &str) -> Option<&str> {
        self.group(group).and_then(GroupEntry::selected)
    }

    /// Whether there are no visible groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of visible groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// A copy of this tree with `proxy` as the only selected member of `group`.
    ///
    /// Returns `None` when `group` is not a selector group in this tree or `proxy` is not one
    /// of its members.
    #[must_use]
    pub fn with_selection(&self, group: &str, proxy: &str) -> Option<Self> {
        let index = self.groups.iter().position(|entry| entry.name == group)?;

        let GroupEntryKind::Selector { members } = &self.groups[index].kind else {
            return None;
        };
        let target = members.iter().position(|member| member.name == proxy)?;

        let mut tree = self.clone();
        if let GroupEntryKind::Selector { members } = &mut tree.groups[index].kind {
            for member in members.iter_mut() {
                member.selected = false;
            }
            members[target].selected = true;
        }

        Some(tree)
    }
}
