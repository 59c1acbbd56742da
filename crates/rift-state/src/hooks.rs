//! Post-response hooks binding operations to stub mappings.
//!
//! The HTTP pipeline calls [`HookRegistry::on_exchange`] after a mapping has
//! produced its response. Every adapter attached to that mapping fires in
//! attachment order. A failing adapter is reported and logged but never
//! stops its siblings, and nothing here can alter the response.

use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::matcher::StateMatcher;
use crate::operations::{OperationDescriptor, Outcome};
use crate::store::{create_context_store, ContextStore};
use crate::template::{Exchange, ExchangeRenderer, TemplateRenderer};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Phase of a single adapter invocation in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Rendering key expressions and payload templates.
    Resolving,
    /// Applying the resolved operation to the store.
    Applying,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Resolving => f.write_str("resolving"),
            HookPhase::Applying => f.write_str("applying"),
        }
    }
}

/// Listener-level failure reported back to the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("listener #{index} ({kind}) of mapping '{mapping}' failed while {phase}: {source}")]
pub struct ListenerError {
    pub mapping: String,
    pub index: usize,
    pub kind: String,
    pub phase: HookPhase,
    #[source]
    pub source: StateError,
}

/// Binds one operation descriptor to a mapping's response lifecycle.
#[derive(Debug, Clone)]
pub struct EventHookAdapter {
    descriptor: OperationDescriptor,
}

impl EventHookAdapter {
    pub fn new(descriptor: OperationDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    /// Resolve then apply; the error carries the phase it failed in.
    pub fn fire(
        &self,
        store: &dyn ContextStore,
        renderer: &dyn TemplateRenderer,
        exchange: &Exchange,
    ) -> std::result::Result<Outcome, (HookPhase, StateError)> {
        let resolved = self
            .descriptor
            .resolve(renderer, exchange)
            .map_err(|e| (HookPhase::Resolving, e))?;
        resolved.apply(store).map_err(|e| (HookPhase::Applying, e))
    }
}

/// Per-adapter results of one exchange, in attachment order.
#[derive(Debug, Clone, Default)]
pub struct HookReport {
    pub mapping: String,
    pub results: Vec<std::result::Result<Outcome, ListenerError>>,
}

impl HookReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ListenerError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.is_ok())
    }
}

/// Mapping id -> attached adapters, plus the shared store and renderer.
pub struct HookRegistry {
    store: Arc<dyn ContextStore>,
    renderer: Arc<dyn TemplateRenderer>,
    adapters: RwLock<HashMap<String, Vec<Arc<EventHookAdapter>>>>,
    matchers: RwLock<HashMap<String, Arc<StateMatcher>>>,
}

impl HookRegistry {
    pub fn new(store: Arc<dyn ContextStore>, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self {
            store,
            renderer,
            adapters: RwLock::new(HashMap::new()),
            matchers: RwLock::new(HashMap::new()),
        }
    }

    /// Build the store, renderer and every mapping described by `config`.
    pub fn from_config(config: &StateConfig) -> Result<Self> {
        let store = create_context_store(&config.store);
        let renderer = Arc::new(ExchangeRenderer::new(
            &config.templating.read_error_placeholder,
        ));
        let registry = Self::new(store, renderer);

        for mapping in &config.mappings {
            for listener in &mapping.listeners {
                registry.attach(&mapping.id, listener.to_descriptor()?)?;
            }
            if let Some(matcher) = &mapping.matcher {
                registry.set_matcher(&mapping.id, matcher.compile()?);
            }
        }
        Ok(registry)
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    pub fn renderer(&self) -> &Arc<dyn TemplateRenderer> {
        &self.renderer
    }

    /// Append an adapter to `mapping`.
    ///
    /// Descriptors are validated when built; this only rejects an empty
    /// mapping id.
    pub fn attach(&self, mapping: &str, descriptor: OperationDescriptor) -> Result<()> {
        if mapping.trim().is_empty() {
            return Err(StateError::Configuration(
                "mapping id must not be empty".to_string(),
            ));
        }
        let kind = descriptor.kind();
        let mut adapters = self.adapters.write();
        let list = adapters.entry(mapping.to_string()).or_default();
        list.push(Arc::new(EventHookAdapter::new(descriptor)));
        info!(
            "Attached {} listener #{} to mapping '{}'",
            kind,
            list.len() - 1,
            mapping
        );
        Ok(())
    }

    /// Drop every adapter and the matcher of `mapping`, returning how many
    /// adapters were attached.
    pub fn detach(&self, mapping: &str) -> usize {
        self.matchers.write().remove(mapping);
        let removed = self
            .adapters
            .write()
            .remove(mapping)
            .map(|list| list.len())
            .unwrap_or(0);
        if removed > 0 {
            info!("Detached {} listener(s) from mapping '{}'", removed, mapping);
        }
        removed
    }

    /// Number of adapters attached to `mapping`.
    pub fn listener_count(&self, mapping: &str) -> usize {
        self.adapters.read().get(mapping).map_or(0, Vec::len)
    }

    pub fn set_matcher(&self, mapping: &str, matcher: StateMatcher) {
        self.matchers
            .write()
            .insert(mapping.to_string(), Arc::new(matcher));
    }

    /// Whether the mapping's state matcher accepts `exchange`. Mappings
    /// without a matcher always match.
    pub fn matches(&self, mapping: &str, exchange: &Exchange) -> Result<bool> {
        let matcher = self.matchers.read().get(mapping).cloned();
        match matcher {
            Some(matcher) => matcher.matches(self.store.as_ref(), self.renderer.as_ref(), exchange),
            None => Ok(true),
        }
    }

    /// Fire every adapter of `mapping` for a completed exchange.
    pub fn on_exchange(&self, mapping: &str, exchange: &Exchange) -> HookReport {
        // Snapshot so listeners run without holding the registry lock
        let adapters = self.adapters.read().get(mapping).cloned().unwrap_or_default();

        let mut report = HookReport {
            mapping: mapping.to_string(),
            results: Vec::with_capacity(adapters.len()),
        };

        for (index, adapter) in adapters.iter().enumerate() {
            let result = adapter
                .fire(self.store.as_ref(), self.renderer.as_ref(), exchange)
                .map_err(|(phase, source)| ListenerError {
                    mapping: mapping.to_string(),
                    index,
                    kind: adapter.descriptor().kind().to_string(),
                    phase,
                    source,
                });

            match &result {
                Ok(outcome) => debug!(
                    "Mapping '{}' listener #{}: {:?}",
                    mapping, index, outcome
                ),
                Err(err) => warn!("{}", err),
            }
            report.results.push(result);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::ListMode;
    use crate::store::InMemoryContextStore;
    use crate::template::{RequestData, ResponseData};
    use serde_json::json;
    use tracing_test::traced_test;

    fn registry() -> HookRegistry {
        HookRegistry::new(
            Arc::new(InMemoryContextStore::with_shards(4)),
            Arc::new(ExchangeRenderer::default()),
        )
    }

    fn order_exchange(id: &str) -> Exchange {
        let mut request = RequestData::new(
            "POST",
            &format!("/orders/{id}"),
            None,
            Vec::<(String, String)>::new(),
            Some(r#"{"status": "created"}"#),
        );
        request.extract_path_params("/orders/:id");
        Exchange::new(request, ResponseData::new(201, ""))
    }

    #[test]
    fn test_attach_and_detach() {
        let registry = registry();
        let delete = OperationDescriptor::delete("a").build().unwrap();
        registry.attach("m1", delete.clone()).unwrap();
        registry.attach("m1", delete).unwrap();
        assert_eq!(registry.listener_count("m1"), 2);

        assert_eq!(registry.detach("m1"), 2);
        assert_eq!(registry.detach("m1"), 0);
        assert!(registry.on_exchange("m1", &order_exchange("A1")).results.is_empty());
    }

    #[test]
    fn test_attach_rejects_empty_mapping() {
        let registry = registry();
        let delete = OperationDescriptor::delete("a").build().unwrap();
        assert!(registry.attach(" ", delete).is_err());
    }

    #[test]
    fn test_adapters_fire_in_attachment_order() {
        let registry = registry();
        registry
            .attach(
                "create",
                OperationDescriptor::record("order:${request.pathParams.id}")
                    .payload(json!({"status": "${request.body.$.status}"}))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .attach(
                "create",
                OperationDescriptor::update("order:${request.pathParams.id}")
                    .payload(json!({"status": "confirmed"}))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let report = registry.on_exchange("create", &order_exchange("A1"));
        assert!(report.is_success());
        assert_eq!(report.outcomes().count(), 2);
        assert_eq!(
            registry
                .store()
                .lookup("order:A1", Some("status"), None)
                .unwrap(),
            json!("confirmed")
        );
    }

    #[traced_test]
    #[test]
    fn test_failure_does_not_stop_siblings() {
        let registry = registry();
        registry
            .attach(
                "m",
                OperationDescriptor::update("order:${request.pathParams.id}")
                    .payload(json!({"status": "shipped"}))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .attach(
                "m",
                OperationDescriptor::record("x:${request.query.missing}")
                    .payload(json!({}))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .attach(
                "m",
                OperationDescriptor::record("cart:1")
                    .list_mode(ListMode::AddLast)
                    .payload(json!("x"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let report = registry.on_exchange("m", &order_exchange("A1"));
        assert!(!report.is_success());

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 0);
        assert_eq!(failures[0].phase, HookPhase::Applying);
        assert_eq!(
            failures[0].source,
            StateError::ContextNotFound("order:A1".into())
        );
        assert_eq!(failures[1].index, 1);
        assert_eq!(failures[1].phase, HookPhase::Resolving);

        assert!(matches!(
            report.results[2],
            Ok(Outcome::ListAppended { len: 1, .. })
        ));
        assert!(logs_contain("failed while applying"));
        assert!(logs_contain("failed while resolving"));
    }

    #[test]
    fn test_unknown_mapping_is_empty_report() {
        let report = registry().on_exchange("nope", &order_exchange("A1"));
        assert_eq!(report.mapping, "nope");
        assert!(report.results.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn test_mapping_without_matcher_always_matches() {
        assert!(registry().matches("any", &order_exchange("A1")).unwrap());
    }
}
