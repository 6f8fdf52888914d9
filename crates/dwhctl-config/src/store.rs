//! Loading and saving the configuration file

use crate::{apply_patch, cluster_config, ConfigDocument, ConfigError};
use dwhctl_core::{ClusterConfig, ConfigPatch};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "cluster.cfg";

/// A configuration document bound to the file it came from
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    document: ConfigDocument,
}

impl ConfigFile {
    /// Read and parse the file at `path`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        let document = ConfigDocument::parse(&content)?;
        info!(path = %path.display(), "loaded cluster config");
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    pub fn cluster_config(&self) -> Result<ClusterConfig, ConfigError> {
        cluster_config(&self.document)
    }

    pub fn apply_patch(&mut self, patch: &ConfigPatch) {
        apply_patch(&mut self.document, patch);
    }

    /// Write the document back, replacing the file in one step
    pub async fn save(&self) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, self.document.render())
            .await
            .map_err(io_error)?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(io_error)?;

        info!(path = %self.path.display(), "saved cluster config");
        Ok(())
    }
}
