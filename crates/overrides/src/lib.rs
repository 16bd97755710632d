//! Persistence of the proxy the user last chose for each group.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod file;
mod memory;

pub use error::Error;
pub use file::FileOverrideStore;
pub use memory::MemoryOverrideStore;

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Group name to the proxy the user last picked for it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectedProxyOverrides(BTreeMap<String, String>);

impl SelectedProxyOverrides {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The remembered proxy for `group`.
    #[must_use]
    pub fn get(&self, group: &str) -> Option<&str> {
        self.0.get(group).map(String::as_str)
    }

    /// Remembers `proxy` for `group`, returning the previous choice.
    pub fn insert(&mut self, group: impl Into<String>, proxy: impl Into<String>) -> Option<String> {
        self.0.insert(group.into(), proxy.into())
    }

    /// Number of remembered groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<G: Into<String>, P: Into<String>> FromIterator<(G, P)> for SelectedProxyOverrides {
    fn from_iter<I: IntoIterator<Item = (G, P)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(g, p)| (g.into(), p.into()))
                .collect(),
        )
    }
}

/// Marker trait for `OverrideStore` errors
pub trait OverrideStoreError: Debug + StdError + Send + Sync + 'static {}

/// Durable home of [`SelectedProxyOverrides`].
///
/// Whole-map load and save: the map is small and written rarely.
#[async_trait]
pub trait OverrideStore: Clone + Send + Sync + 'static {
    /// The error type for this store.
    type Error: OverrideStoreError;

    /// Loads the saved overrides, empty if nothing was saved yet.
    async fn load(&self) -> Result<SelectedProxyOverrides, Self::Error>;

    /// Replaces the saved overrides with `overrides`.
    async fn save(&self, overrides: &SelectedProxyOverrides) -> Result<(), Self::Error>;
}
