//! Integration tests for context lifecycles driven through the hook registry.
//!
//! These tests wire a registry from YAML the way a server would and replay
//! the create/read/update/delete and queue scenarios against it.

use assert_json_diff::assert_json_eq;
use rift_state::config::StateConfig;
use rift_state::hooks::HookRegistry;
use rift_state::operations::{ListMode, OperationDescriptor, Outcome};
use rift_state::store::{ContextStore, InMemoryContextStore, ListPosition};
use rift_state::template::{Exchange, ExchangeRenderer, RequestData, ResponseData};
use rift_state::StateError;
use serde_json::json;
use std::sync::Arc;

const ORDERS: &str = r#"
mappings:
  - id: create-order
    path_pattern: /orders/:id
    listeners:
      - recordState:
          context: "order:${request.pathParams.id}"
          state:
            orderId: "${request.pathParams.id}"
            status: created
  - id: ship-order
    path_pattern: /orders/:id/ship
    listeners:
      - updateState:
          context: "order:${request.pathParams.id}"
          state: { status: shipped }
  - id: delete-order
    path_pattern: /orders/:id
    listeners:
      - deleteState:
          context: "order:${request.pathParams.id}"
  - id: add-item
    listeners:
      - recordState:
          context: "cart:1"
          list:
            field: items
            addLast: { item: "${request.body.$.item}" }
  - id: pop-item
    listeners:
      - deleteState:
          context: "cart:1"
          list: { field: items, deleteFirst: true }
"#;

fn registry() -> (StateConfig, HookRegistry) {
    let config: StateConfig = serde_yaml::from_str(ORDERS).unwrap();
    config.validate().unwrap();
    let registry = HookRegistry::from_config(&config).unwrap();
    (config, registry)
}

fn exchange(config: &StateConfig, mapping: &str, method: &str, path: &str, body: &str) -> Exchange {
    let mut request = RequestData::new(
        method,
        path,
        None,
        [("content-type", "application/json")],
        Some(body),
    );
    if let Some(pattern) = config.mapping(mapping).and_then(|m| m.path_pattern.as_deref()) {
        request.extract_path_params(pattern);
    }
    Exchange::new(request, ResponseData::new(200, ""))
}

#[test]
fn test_order_lifecycle() {
    let (config, registry) = registry();
    let store = registry.store();

    let create = exchange(&config, "create-order", "POST", "/orders/A1", "");
    let report = registry.on_exchange("create-order", &create);
    assert!(report.is_success());
    assert_json_eq!(
        store.lookup("order:A1", None, None).unwrap(),
        json!({"orderId": "A1", "status": "created"})
    );

    let ship = exchange(&config, "ship-order", "POST", "/orders/A1/ship", "");
    assert!(registry.on_exchange("ship-order", &ship).is_success());
    assert_json_eq!(
        store.lookup("order:A1", None, None).unwrap(),
        json!({"orderId": "A1", "status": "shipped"})
    );

    let delete = exchange(&config, "delete-order", "DELETE", "/orders/A1", "");
    let report = registry.on_exchange("delete-order", &delete);
    assert!(matches!(
        report.results[0],
        Ok(Outcome::Deleted { count: 1 })
    ));
    assert!(store.get("order:A1").is_none());

    // Deleting again is a no-op that reports the absence
    let report = registry.on_exchange("delete-order", &delete);
    let outcome = report.results[0].as_ref().unwrap();
    assert!(!outcome.existed());
}

#[test]
fn test_update_on_absent_order_is_reported() {
    let (config, registry) = registry();
    let ship = exchange(&config, "ship-order", "POST", "/orders/B2/ship", "");

    let report = registry.on_exchange("ship-order", &ship);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.source, StateError::ContextNotFound("order:B2".into()));
    assert!(registry.store().is_empty());
}

#[test]
fn test_cart_queue() {
    let (config, registry) = registry();
    let store = registry.store();

    for _ in 0..3 {
        let add = exchange(&config, "add-item", "POST", "/cart/items", r#"{"item": "x"}"#);
        assert!(registry.on_exchange("add-item", &add).is_success());
    }

    assert_json_eq!(
        store
            .lookup("cart:1", Some("items"), Some(&ListPosition::Last))
            .unwrap(),
        json!({"item": "x"})
    );
    assert_eq!(store.get("cart:1").unwrap().list_len("items"), Some(3));

    let pop = exchange(&config, "pop-item", "DELETE", "/cart/items", "");
    let report = registry.on_exchange("pop-item", &pop);
    match &report.results[0] {
        Ok(Outcome::ListRemoved { element, len, .. }) => {
            assert_json_eq!(element.clone(), json!({"item": "x"}));
            assert_eq!(*len, 2);
        }
        other => panic!("unexpected result {other:?}"),
    }

    // Drain, then popping from the empty list is a no-op
    registry.on_exchange("pop-item", &pop);
    registry.on_exchange("pop-item", &pop);
    let report = registry.on_exchange("pop-item", &pop);
    assert_eq!(report.results[0], Ok(Outcome::NothingToDelete));
}

#[test]
fn test_add_last_then_remove_last_restores_empty_list() {
    let store = InMemoryContextStore::new();
    let renderer = ExchangeRenderer::default();
    let ex = Exchange::default();

    let add = OperationDescriptor::record("q")
        .list_mode(ListMode::AddLast)
        .payload(json!({"n": 1}))
        .build()
        .unwrap();
    let remove = OperationDescriptor::delete("q")
        .list_mode(ListMode::RemoveLast)
        .build()
        .unwrap();

    add.resolve(&renderer, &ex).unwrap().apply(&store).unwrap();
    let outcome = remove.resolve(&renderer, &ex).unwrap().apply(&store).unwrap();

    assert_eq!(
        outcome,
        Outcome::ListRemoved {
            context: "q".into(),
            field: "list".into(),
            element: json!({"n": 1}),
            len: 0
        }
    );
    assert_json_eq!(store.lookup("q", None, None).unwrap(), json!({"list": []}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_exchanges_lose_no_appends() {
    let (config, registry) = registry();
    let registry = Arc::new(registry);
    let config = Arc::new(config);

    let tasks: Vec<_> = (0..16)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                for i in 0..50 {
                    let body = format!(r#"{{"item": "w{worker}-{i}"}}"#);
                    let add = exchange(&config, "add-item", "POST", "/cart/items", &body);
                    assert!(registry.on_exchange("add-item", &add).is_success());

                    let create = exchange(
                        &config,
                        "create-order",
                        "POST",
                        &format!("/orders/{worker}-{i}"),
                        "",
                    );
                    assert!(registry.on_exchange("create-order", &create).is_success());
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    let store = registry.store();
    assert_eq!(store.get("cart:1").unwrap().list_len("items"), Some(16 * 50));
    // cart plus one order per exchange
    assert_eq!(store.len(), 1 + 16 * 50);
}

#[test]
fn test_response_body_reads_state() {
    let (config, registry) = registry();
    let create = exchange(&config, "create-order", "POST", "/orders/A1", "");
    registry.on_exchange("create-order", &create);

    let renderer = ExchangeRenderer::default();
    let read = exchange(&config, "create-order", "GET", "/orders/A1", "");
    let rendered = renderer
        .render_with_state(
            r#"{"id": "${context[order:${request.pathParams.id}].orderId}", "order": ${context[order:A1]}}"#,
            &read,
            registry.store().as_ref(),
        )
        .unwrap();

    assert!(rendered.failures.is_empty());
    assert_json_eq!(
        serde_json::from_str::<serde_json::Value>(&rendered.body).unwrap(),
        json!({"id": "A1", "order": {"orderId": "A1", "status": "created"}})
    );
}

#[test]
fn test_shared_store_across_registries() {
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::with_shards(2));
    let writer = HookRegistry::new(Arc::clone(&store), Arc::new(ExchangeRenderer::default()));
    writer
        .attach(
            "w",
            OperationDescriptor::record("shared")
                .payload(json!({"v": 1}))
                .build()
                .unwrap(),
        )
        .unwrap();

    writer.on_exchange("w", &Exchange::default());
    assert!(store.contains("shared"));
}
