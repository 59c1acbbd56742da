use super::{invalid_list_field, Context, ContextStore, ListMutation, ListOp};
use crate::error::{Result, StateError};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use tracing::{debug, info};

type Shard = RwLock<HashMap<String, Context>>;

/// In-memory implementation of ContextStore
///
/// Contexts are spread over a fixed number of shards by hashing their name.
/// A mutation holds the write lock of exactly one shard for the duration of
/// the in-memory change, which linearizes all operations on one name while
/// names living in other shards proceed in parallel.
pub struct InMemoryContextStore {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::with_shards(Self::default_shard_count())
    }

    /// Four shards per CPU, rounded up to a power of two.
    pub fn default_shard_count() -> usize {
        (num_cpus::get() * 4).next_power_of_two()
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, name: &str) -> &Shard {
        let hash = self.hasher.hash_one(name);
        &self.shards[(hash % self.shards.len() as u64) as usize]
    }
}

impl ContextStore for InMemoryContextStore {
    fn get(&self, name: &str) -> Option<Context> {
        self.shard(name).read().get(name).cloned()
    }

    fn contains(&self, name: &str) -> bool {
        self.shard(name).read().contains_key(name)
    }

    fn put(&self, name: &str, properties: Map<String, Value>) -> Context {
        let mut shard = self.shard(name).write();
        let context = shard.entry(name.to_string()).or_insert_with(|| {
            info!("Context '{}' created", name);
            Context::new(name)
        });
        context.properties = properties;
        context.touch();
        debug!(
            "Context '{}' recorded (updateCount={})",
            name, context.update_count
        );
        context.clone()
    }

    fn merge(&self, name: &str, properties: Map<String, Value>) -> Result<Context> {
        let mut shard = self.shard(name).write();
        let context = shard
            .get_mut(name)
            .ok_or_else(|| StateError::ContextNotFound(name.to_string()))?;
        context.merge(properties);
        context.touch();
        debug!(
            "Context '{}' updated (updateCount={})",
            name, context.update_count
        );
        Ok(context.clone())
    }

    fn remove(&self, name: &str) -> bool {
        let removed = self.shard(name).write().remove(name).is_some();
        if removed {
            info!("Context '{}' deleted", name);
        }
        removed
    }

    fn remove_matching(&self, pattern: &Regex) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut data = shard.write();
            let before = data.len();
            data.retain(|name, _| !pattern.is_match(name));
            removed += before - data.len();
        }
        if removed > 0 {
            info!(
                "Deleted {} context(s) matching '{}'",
                removed,
                pattern.as_str()
            );
        }
        removed
    }

    fn mutate_list(&self, name: &str, field: &str, op: ListOp) -> Result<ListMutation> {
        if let Some(reason) = invalid_list_field(field) {
            return Err(StateError::Configuration(reason));
        }
        let op_name = op.name();
        let mut shard = self.shard(name).write();

        let context = if op.is_append() {
            shard.entry(name.to_string()).or_insert_with(|| {
                info!("Context '{}' created", name);
                Context::new(name)
            })
        } else {
            shard
                .get_mut(name)
                .ok_or_else(|| StateError::ContextNotFound(name.to_string()))?
        };

        if !context.properties.contains_key(field) {
            if !op.is_append() {
                return Err(StateError::FieldNotFound {
                    context: name.to_string(),
                    field: field.to_string(),
                });
            }
            context
                .properties
                .insert(field.to_string(), Value::Array(Vec::new()));
        }

        let Some(Value::Array(list)) = context.properties.get_mut(field) else {
            return Err(StateError::NotAList {
                context: name.to_string(),
                field: field.to_string(),
            });
        };

        let changed = op.is_append();
        let removed = op.apply(list, name, field)?;
        let len = list.len();

        if changed || removed.is_some() {
            context.touch();
        }
        debug!(
            "Context '{}' list '{}' {} (len={})",
            name, field, op_name, len
        );

        Ok(ListMutation { removed, len })
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    fn snapshot(&self) -> Vec<Context> {
        let mut contexts: Vec<Context> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect();
        contexts.sort_by(|a, b| a.name.cmp(&b.name));
        contexts
    }
}
