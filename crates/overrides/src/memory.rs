use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Error, OverrideStore, SelectedProxyOverrides};

/// Keeps overrides for the life of the process only.
#[derive(Clone, Debug, Default)]
pub struct MemoryOverrideStore {
    saved: Arc<Mutex<SelectedProxyOverrides>>,
}

impl MemoryOverrideStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `overrides`.
    #[must_use]
    pub fn with_overrides(overrides: SelectedProxyOverrides) -> Self {
        Self {
            saved: Arc::new(Mutex::new(overrides)),
        }
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    type Error = Error;

    async fn load(&self) -> Result<SelectedProxyOverrides, Self::Error> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, overrides: &SelectedProxyOverrides) -> Result<(), Self::Error> {
        overrides.clone_into(&mut *self.saved.lock().await);
        Ok(())
    }
}
