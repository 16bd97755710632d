use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::{Error, OverrideStore, SelectedProxyOverrides};

/// Keeps overrides as a JSON object in a single file.
#[derive(Clone, Debug)]
pub struct FileOverrideStore {
    path: PathBuf,
}

impl FileOverrideStore {
    /// Creates a store backed by the file at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        staging.into()
    }
}

#[async_trait]
impl OverrideStore for FileOverrideStore {
    type Error = Error;

    async fn load(&self) -> Result<SelectedProxyOverrides, Self::Error> {
        match fs::read(&self.path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(Error::Deserialize),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no overrides at {}, starting empty", self.path.display());
                Ok(SelectedProxyOverrides::new())
            }
            Err(e) => Err(Error::Io("error reading overrides file", e)),
        }
    }

    async fn save(&self, overrides: &SelectedProxyOverrides) -> Result<(), Self::Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Io("error creating directory", e))?;
            }
        }

        let data = serde_json::to_vec_pretty(overrides).map_err(Error::Serialize)?;

        // Write aside then rename so a crash never leaves a truncated file behind.
        let staging = self.staging_path();
        fs::write(&staging, data)
            .await
            .map_err(|e| Error::Io("error writing overrides file", e))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| Error::Io("error replacing overrides file", e))?;

        Ok(())
    }
}
