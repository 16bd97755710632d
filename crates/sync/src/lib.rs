//! Proxy-group synchronization between a routing engine and a controller front end.
//!
//! This crate provides:
//! - Topology snapshots of the engine's groups
//! - Classification of groups by routing policy and mode
//! - Selection trees ready to hand to a presentation layer
//! - The selection state machine that only commits engine-confirmed changes
//! - The [`Synchronizer`] tying these together
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod builder;
pub mod classify;
pub mod error;
pub mod mode;
pub mod mutator;
pub mod snapshot;
pub mod synchronizer;
pub mod tree;

pub use builder::{BuildOutput, SelectionRequest, build};
pub use classify::{Classification, GroupPolicy, HiddenReason, classify};
pub use error::SyncError;
pub use mode::ModeGate;
pub use mutator::{Rejection, SelectionMutator, SelectionOutcome, SelectionState};
pub use snapshot::{AGGREGATE_GROUP, TopologySnapshot};
pub use synchronizer::{RefreshReport, RenderedTree, SelfHeal, Synchronizer, SynchronizerConfig};
pub use tree::{GroupEntry, GroupEntryKind, MemberEntry, SelectionTree};

pub use switchyard_api::RoutingMode;
