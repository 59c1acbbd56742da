//! Configuration types for rift-state.

mod listeners;
mod store;

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub use listeners::{
    DeleteListConfig, DeleteStateConfig, DeleteWhereConfig, ListenerConfig, RecordListConfig,
    RecordStateConfig, UpdateStateConfig,
};
pub use store::{StoreConfig, TemplatingConfig};

use crate::matcher::StateMatcherConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub templating: TemplatingConfig,
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// Stub mapping with its post-response listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingConfig {
    pub id: String,
    /// Route pattern (`/orders/:id`) used to extract `pathParams`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    /// Single-key maps (`- recordState: {...}`) select the listener kind
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<StateMatcherConfig>,
}

impl StateConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: StateConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.store.shards == Some(0) {
            anyhow::bail!("store.shards must be at least 1");
        }

        let mut seen = HashSet::new();
        for mapping in &self.mappings {
            if mapping.id.trim().is_empty() {
                anyhow::bail!("Mapping id must not be empty");
            }
            if !seen.insert(mapping.id.as_str()) {
                anyhow::bail!("Duplicate mapping id: '{}'", mapping.id);
            }

            for (index, listener) in mapping.listeners.iter().enumerate() {
                listener.to_descriptor().with_context(|| {
                    format!(
                        "Invalid {} listener #{} in mapping '{}'",
                        listener.name(),
                        index,
                        mapping.id
                    )
                })?;
            }

            if let Some(matcher) = &mapping.matcher {
                matcher
                    .compile()
                    .with_context(|| format!("Invalid matcher in mapping '{}'", mapping.id))?;
            }
        }

        Ok(())
    }

    pub fn mapping(&self, id: &str) -> Option<&MappingConfig> {
        self.mappings.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::StringMatcher;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
store:
  shards: 8
templating:
  read_error_placeholder: "null"
mappings:
  - id: create-order
    path_pattern: /orders/:id
    listeners:
      - recordState:
          context: "order:${request.pathParams.id}"
          state:
            orderId: "${request.pathParams.id}"
            status: created
  - id: add-item
    listeners:
      - recordState:
          context: "cart:1"
          list:
            field: items
            addLast: { item: x }
  - id: ship-order
    path_pattern: /orders/:id/ship
    matcher:
      hasContext: "order:${request.pathParams.id}"
      property:
        status: { equals: created }
    listeners:
      - updateState:
          context: "order:${request.pathParams.id}"
          state: { status: shipped }
  - id: cleanup
    listeners:
      - deleteState: { contextsMatching: "order:.*" }
      - deleteState:
          context: "cart:1"
          list: { field: items, deleteFirst: true }
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: StateConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.store.shard_count(), 8);
        assert_eq!(config.templating.read_error_placeholder, "null");
        assert_eq!(config.mappings.len(), 4);
        assert_eq!(
            config.mapping("create-order").unwrap().path_pattern.as_deref(),
            Some("/orders/:id")
        );
        assert!(config.mapping("ship-order").unwrap().matcher.is_some());
        assert_eq!(config.mapping("cleanup").unwrap().listeners.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config: StateConfig = serde_yaml::from_str("mappings: []").unwrap();
        assert_eq!(config.store.shards, None);
        assert!(config.store.shard_count() >= 1);
        assert_eq!(config.templating.read_error_placeholder, "[state: {error}]");
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_mapping_ids_rejected() {
        let yaml = r#"
mappings:
  - id: a
  - id: a
"#;
        let config: StateConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate mapping id"));
    }

    #[test]
    fn test_invalid_listener_reports_mapping() {
        let yaml = r#"
mappings:
  - id: broken
    listeners:
      - updateState: { context: a, state: "not an object" }
"#;
        let config: StateConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("updateState listener #0 in mapping 'broken'"));
        assert!(msg.contains("state must be an object"));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let config: StateConfig = serde_yaml::from_str("store: { shards: 0 }").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = StateConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mappings.len(), 4);
    }

    #[test]
    fn test_from_file_single_key_listener_and_matcher_forms() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = StateConfig::from_file(file.path()).unwrap();

        let kinds: Vec<_> = config
            .mappings
            .iter()
            .flat_map(|m| m.listeners.iter().map(ListenerConfig::name))
            .collect();
        assert_eq!(
            kinds,
            vec!["recordState", "recordState", "updateState", "deleteState", "deleteState"]
        );

        let matcher = config.mapping("ship-order").unwrap().matcher.as_ref().unwrap();
        assert_eq!(
            matcher.property.get("status"),
            Some(&StringMatcher::Equals("created".into()))
        );
    }

    #[test]
    fn test_from_file_missing() {
        let err = StateConfig::from_file("/nonexistent/rift-state.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
