//! Context store: the process-wide, concurrent map of named contexts.
//!
//! The [`ContextStore`] trait is the contract the operations, hooks and
//! matcher are written against. [`InMemoryContextStore`] is the sharded
//! implementation used by default.

mod context;
mod inmemory;
pub mod list;

pub use context::Context;
pub use inmemory::InMemoryContextStore;
pub use list::{ListOp, ListPosition};

use crate::config::StoreConfig;
use crate::error::{Result, StateError};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// List field used when a descriptor or lookup names none.
pub const DEFAULT_LIST_FIELD: &str = "list";

/// Why `field` cannot name a list, if it cannot.
///
/// A list lives under a top-level property; reads split field paths on `.`,
/// so a list stored under a dotted name could never be read back.
pub fn invalid_list_field(field: &str) -> Option<String> {
    if field.trim().is_empty() {
        Some("list field must not be empty".to_string())
    } else if field.contains('.') {
        Some(format!(
            "list field '{field}' must be a top-level property name without '.'"
        ))
    } else {
        None
    }
}

/// Result of a single list mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ListMutation {
    /// Element taken out of the list by a remove variant.
    pub removed: Option<Value>,
    /// List length after the mutation.
    pub len: usize,
}

/// Backend-agnostic contract for context storage.
///
/// All operations on one context name are mutually exclusive and linearized.
/// Operations on different names never wait on each other beyond the time it
/// takes to touch a shard. Reads hand out snapshots, never live references.
pub trait ContextStore: Send + Sync {
    /// Snapshot of a context.
    fn get(&self, name: &str) -> Option<Context>;

    /// Whether a context exists.
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Create the context or replace its properties wholesale.
    fn put(&self, name: &str, properties: Map<String, Value>) -> Context;

    /// Shallow-merge into an existing context. Never creates.
    fn merge(&self, name: &str, properties: Map<String, Value>) -> Result<Context>;

    /// Remove a context, returning whether it existed.
    fn remove(&self, name: &str) -> bool;

    /// Remove every listed context, returning how many existed.
    fn remove_all(&self, names: &[String]) -> usize {
        names.iter().filter(|name| self.remove(name)).count()
    }

    /// Remove every context whose name matches `pattern`.
    fn remove_matching(&self, pattern: &Regex) -> usize;

    /// Atomically read-modify-write a list field.
    ///
    /// Appends create the context and the field when missing. Removals fail
    /// with a not-found error when either is missing.
    fn mutate_list(&self, name: &str, field: &str, op: ListOp) -> Result<ListMutation>;

    /// Number of stored contexts.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every context.
    fn clear(&self);

    /// Every context, ordered by name.
    fn snapshot(&self) -> Vec<Context>;

    /// Read a value for templating.
    ///
    /// Without a field path the whole property document is returned. With a
    /// position, the value at `field_path` (or the default list field when
    /// no path is given) must be a list and the element at that position is
    /// returned.
    fn lookup(
        &self,
        name: &str,
        field_path: Option<&str>,
        position: Option<&ListPosition>,
    ) -> Result<Value> {
        let context = self
            .get(name)
            .ok_or_else(|| StateError::ContextNotFound(name.to_string()))?;

        let field = match (field_path, position) {
            (Some(path), _) => path,
            (None, Some(_)) => DEFAULT_LIST_FIELD,
            (None, None) => return Ok(context.to_value()),
        };

        let value = context.field(field).ok_or_else(|| StateError::FieldNotFound {
            context: name.to_string(),
            field: field.to_string(),
        })?;

        match position {
            None => Ok(value.clone()),
            Some(position) => {
                let items = value.as_array().ok_or_else(|| StateError::NotAList {
                    context: name.to_string(),
                    field: field.to_string(),
                })?;
                list::read_at(items, position, name, field)
            }
        }
    }
}

/// Create the context store described by `config`.
pub fn create_context_store(config: &StoreConfig) -> Arc<dyn ContextStore> {
    let shards = config.shard_count();
    tracing::info!("Using InMemory ContextStore (shards={})", shards);
    Arc::new(InMemoryContextStore::with_shards(shards))
}
