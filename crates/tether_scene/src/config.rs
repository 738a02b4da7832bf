//! # Scene Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! store_capacity = 65536
//! worker_threads = 4
//! parallel_threshold = 1024
//! free_pool_prewarm = 64
//! unresolved_parent_warn_after = 8
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};
use crate::remap::RemapSettings;

/// Tuning for a [`SceneWorld`](crate::SceneWorld).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneConfig {
    /// Record capacity of the reference store.
    pub store_capacity: usize,
    /// Worker threads for parallel reconciliation jobs.
    pub worker_threads: usize,
    /// Minimum batch size before a job is split across workers.
    pub parallel_threshold: usize,
    /// Disposal nodes allocated up front.
    pub free_pool_prewarm: usize,
    /// Passes a parent link may stay unresolved before it is reported.
    pub unresolved_parent_warn_after: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            store_capacity: 65_536,
            worker_threads: 4,
            parallel_threshold: 1_024,
            free_pool_prewarm: 64,
            unresolved_parent_warn_after: 8,
        }
    }
}

impl SceneConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidConfig`] on syntax errors, unknown keys or
    /// out-of-range values.
    pub fn from_toml_str(content: &str) -> LifecycleResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| LifecycleError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidConfig`] if the file cannot be read or is invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> LifecycleResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LifecycleError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> LifecycleResult<()> {
        if self.store_capacity == 0 || self.store_capacity > tether_core::PLACEHOLDER_BIT as usize {
            return Err(LifecycleError::InvalidConfig(format!(
                "store_capacity must be in 1..={}",
                tether_core::PLACEHOLDER_BIT
            )));
        }
        if self.worker_threads == 0 {
            return Err(LifecycleError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.unresolved_parent_warn_after == 0 {
            return Err(LifecycleError::InvalidConfig(
                "unresolved_parent_warn_after must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the parent remap job.
    #[must_use]
    pub const fn remap_settings(&self) -> RemapSettings {
        RemapSettings {
            workers: self.worker_threads,
            parallel_threshold: self.parallel_threshold,
            warn_after: self.unresolved_parent_warn_after,
        }
    }
}
