//! The stored context document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named document of simulated server-side state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Number of mutations applied since creation; 1 right after creation.
    #[serde(default)]
    pub update_count: u64,
    /// Advisory only.
    pub last_updated: DateTime<Utc>,
}

impl Context {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Map::new(),
            update_count: 0,
            last_updated: Utc::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.update_count += 1;
        self.last_updated = Utc::now();
    }

    /// Shallow merge: fields in `patch` overwrite existing fields entirely.
    pub(crate) fn merge(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.properties.insert(key, value);
        }
    }

    /// Resolve a dotted field path (`customer.address.city`) inside the
    /// properties. Numeric segments index into arrays.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self.properties.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Properties as a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.properties.clone())
    }

    /// Length of a list field, `None` when absent or not a list.
    pub fn list_len(&self, field: &str) -> Option<usize> {
        self.field(field).and_then(Value::as_array).map(Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Context {
        let mut ctx = Context::new("order:A1");
        ctx.merge(
            json!({
                "orderId": "A1",
                "customer": {"address": {"city": "Oslo"}},
                "items": [{"sku": "x"}, {"sku": "y"}]
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        ctx
    }

    #[test]
    fn test_field_nested_path() {
        let ctx = sample();
        assert_eq!(ctx.field("orderId"), Some(&json!("A1")));
        assert_eq!(ctx.field("customer.address.city"), Some(&json!("Oslo")));
        assert_eq!(ctx.field("items.1.sku"), Some(&json!("y")));
        assert_eq!(ctx.field("customer.phone"), None);
        assert_eq!(ctx.field(""), None);
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut ctx = sample();
        ctx.merge(
            json!({"customer": {"name": "Kim"}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        // the whole nested document is replaced
        assert_eq!(ctx.field("customer.address.city"), None);
        assert_eq!(ctx.field("customer.name"), Some(&json!("Kim")));
        assert_eq!(ctx.field("orderId"), Some(&json!("A1")));
    }

    #[test]
    fn test_list_len() {
        let ctx = sample();
        assert_eq!(ctx.list_len("items"), Some(2));
        assert_eq!(ctx.list_len("orderId"), None);
        assert_eq!(ctx.list_len("missing"), None);
    }

    #[test]
    fn test_touch_counts_updates() {
        let mut ctx = Context::new("c");
        ctx.touch();
        ctx.touch();
        assert_eq!(ctx.update_count, 2);
    }
}
