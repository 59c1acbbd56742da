//! Store and templating configuration.

use crate::store::InMemoryContextStore;
use crate::template::DEFAULT_READ_ERROR_PLACEHOLDER;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct StoreConfig {
    /// Lock shards; derived from the CPU count when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<usize>,
}

impl StoreConfig {
    pub fn shard_count(&self) -> usize {
        self.shards
            .unwrap_or_else(InMemoryContextStore::default_shard_count)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TemplatingConfig {
    /// Rendered in place of a failed state read; `{error}` is replaced by
    /// the error message.
    #[serde(default = "default_read_error_placeholder")]
    pub read_error_placeholder: String,
}

fn default_read_error_placeholder() -> String {
    DEFAULT_READ_ERROR_PLACEHOLDER.to_string()
}

impl Default for TemplatingConfig {
    fn default() -> Self {
        Self {
            read_error_placeholder: default_read_error_placeholder(),
        }
    }
}
