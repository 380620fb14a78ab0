//! Capital state persistence
//!
//! [`JsonStateStore`] writes the capital state to a JSON file atomically
//! (temp file, then rename). A missing file loads as `None`.

use super::state::CapitalState;
use crate::errors::StoreError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load/save the capital state
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<CapitalState>, StoreError>;

    fn save(&self, state: &CapitalState) -> Result<(), StoreError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<CapitalState>, StoreError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let state: CapitalState = serde_json::from_str(&json)?;
        Ok(Some(state))
    }

    fn save(&self, state: &CapitalState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        // Write to temp file first, then rename (atomic)
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, &json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;

        debug!("Saved capital state to {}", self.path.display());
        Ok(())
    }
}
