//! Configuration structures for Arbor.

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};

/// Per-index behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Run the tree integrity check after every insert and delete.
    /// Violations are logged, never returned.
    pub verify_after_write: bool,
    /// Report a unique conflict against versions that are not yet committed
    /// as `PendingDuplicate` instead of `DuplicateKey`.
    pub report_pending_duplicates: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            verify_after_write: false,
            report_pending_duplicates: false,
        }
    }
}

/// Configuration for an in-memory row store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Node slots reserved up front for each index tree.
    pub initial_node_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_node_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Upper bound on node slots per tree (node ids are 32-bit).
    pub const MAX_NODE_CAPACITY: usize = u32::MAX as usize;

    /// Checks the configuration for values the store cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.initial_node_capacity > Self::MAX_NODE_CAPACITY {
            return Err(ArborError::ConfigError(format!(
                "initial_node_capacity {} exceeds {}",
                self.initial_node_capacity,
                Self::MAX_NODE_CAPACITY
            )));
        }
        Ok(())
    }
}
