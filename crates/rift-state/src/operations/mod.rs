//! Mutation operations: Record, Update and Delete.
//!
//! An [`OperationDescriptor`] is resolved against an exchange into a
//! [`ResolvedOperation`], which is then applied to a [`ContextStore`] as a
//! single atomic store call. Operations carry no state between invocations.
//!
//! Error policy:
//! - rendering failures stop the invocation before anything is applied
//! - Update on a missing context surfaces [`StateError::ContextNotFound`]
//! - Delete swallows missing contexts, missing fields and empty lists and
//!   reports [`Outcome::NothingToDelete`]; an out-of-range position on a
//!   non-empty list is still an error

mod descriptor;

pub use descriptor::{ContextTarget, ListMode, OperationBuilder, OperationDescriptor, OperationKind};

use crate::error::Result;
use crate::store::{ContextStore, ListOp};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// A descriptor with every template rendered for one exchange.
#[derive(Debug, Clone)]
pub enum ResolvedOperation {
    Put {
        context: String,
        properties: Map<String, Value>,
    },
    Merge {
        context: String,
        properties: Map<String, Value>,
    },
    List {
        context: String,
        field: String,
        op: ListOp,
    },
    Remove {
        context: String,
    },
    RemoveAll {
        names: Vec<String>,
    },
    RemoveMatching {
        pattern: Regex,
    },
}

/// What an applied operation did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Recorded {
        context: String,
    },
    Updated {
        context: String,
    },
    ListAppended {
        context: String,
        field: String,
        len: usize,
    },
    ListRemoved {
        context: String,
        field: String,
        element: Value,
        len: usize,
    },
    Deleted {
        count: usize,
    },
    /// The delete target did not exist.
    NothingToDelete,
}

impl Outcome {
    /// False only for a delete whose target was absent.
    pub fn existed(&self) -> bool {
        !matches!(self, Outcome::NothingToDelete)
    }
}

impl ResolvedOperation {
    /// Apply to `store`. Each variant maps to exactly one store call.
    pub fn apply(self, store: &dyn ContextStore) -> Result<Outcome> {
        match self {
            ResolvedOperation::Put {
                context,
                properties,
            } => {
                store.put(&context, properties);
                Ok(Outcome::Recorded { context })
            }
            ResolvedOperation::Merge {
                context,
                properties,
            } => {
                store.merge(&context, properties)?;
                Ok(Outcome::Updated { context })
            }
            ResolvedOperation::List { context, field, op } if op.is_append() => {
                let mutation = store.mutate_list(&context, &field, op)?;
                Ok(Outcome::ListAppended {
                    context,
                    field,
                    len: mutation.len,
                })
            }
            ResolvedOperation::List { context, field, op } => {
                match store.mutate_list(&context, &field, op) {
                    Ok(mutation) => Ok(match mutation.removed {
                        Some(element) => Outcome::ListRemoved {
                            context,
                            field,
                            element,
                            len: mutation.len,
                        },
                        None => Outcome::NothingToDelete,
                    }),
                    Err(err) if err.is_not_found() || err.is_empty_list() => {
                        debug!("Nothing to delete in '{}': {}", context, err);
                        Ok(Outcome::NothingToDelete)
                    }
                    Err(err) => Err(err),
                }
            }
            ResolvedOperation::Remove { context } => Ok(if store.remove(&context) {
                Outcome::Deleted { count: 1 }
            } else {
                Outcome::NothingToDelete
            }),
            ResolvedOperation::RemoveAll { names } => Ok(deleted(store.remove_all(&names))),
            ResolvedOperation::RemoveMatching { pattern } => {
                Ok(deleted(store.remove_matching(&pattern)))
            }
        }
    }
}

fn deleted(count: usize) -> Outcome {
    if count == 0 {
        Outcome::NothingToDelete
    } else {
        Outcome::Deleted { count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::store::{InMemoryContextStore, ListPosition};
    use crate::template::{Exchange, ExchangeRenderer, RequestData, ResponseData};
    use serde_json::json;

    fn exchange() -> Exchange {
        Exchange::new(
            RequestData::new(
                "POST",
                "/carts/1/items",
                None,
                Vec::<(String, String)>::new(),
                Some(r#"{"item": "x"}"#),
            ),
            ResponseData::default(),
        )
    }

    fn run(descriptor: &OperationDescriptor, store: &InMemoryContextStore) -> Result<Outcome> {
        descriptor
            .resolve(&ExchangeRenderer::default(), &exchange())?
            .apply(store)
    }

    #[test]
    fn test_update_absent_is_not_found_and_store_unchanged() {
        let store = InMemoryContextStore::new();
        let update = OperationDescriptor::update("order:A1")
            .payload(json!({"status": "shipped"}))
            .build()
            .unwrap();

        let err = run(&update, &store).unwrap_err();
        assert_eq!(err, StateError::ContextNotFound("order:A1".into()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_absent_is_nothing_to_delete() {
        let store = InMemoryContextStore::new();
        let delete = OperationDescriptor::delete("ghost").build().unwrap();
        let outcome = run(&delete, &store).unwrap();
        assert_eq!(outcome, Outcome::NothingToDelete);
        assert!(!outcome.existed());
    }

    #[test]
    fn test_delete_list_element_on_missing_or_empty_list() {
        let store = InMemoryContextStore::new();
        for mode in [
            ListMode::RemoveFirst,
            ListMode::RemoveLast,
            ListMode::RemoveAt("0".into()),
        ] {
            let delete = OperationDescriptor::delete("cart:${request.pathSegments.1}")
                .list_mode(mode)
                .list_field("items")
                .build()
                .unwrap();
            assert_eq!(run(&delete, &store).unwrap(), Outcome::NothingToDelete);

            store.put("cart:1", Map::new());
            assert_eq!(run(&delete, &store).unwrap(), Outcome::NothingToDelete);

            store.put("cart:1", json!({"items": []}).as_object().cloned().unwrap());
            assert_eq!(run(&delete, &store).unwrap(), Outcome::NothingToDelete);
            store.clear();
        }
    }

    #[test]
    fn test_delete_out_of_range_on_non_empty_list_is_surfaced() {
        let store = InMemoryContextStore::new();
        store
            .mutate_list("cart:1", "items", ListOp::AddLast(json!(1)))
            .unwrap();
        let delete = OperationDescriptor::delete("cart:1")
            .list_mode(ListMode::RemoveAt("5".into()))
            .list_field("items")
            .build()
            .unwrap();
        let err = run(&delete, &store).unwrap_err();
        assert!(matches!(err, StateError::Index { len: 1, .. }));
    }

    #[test]
    fn test_record_list_append_renders_element() {
        let store = InMemoryContextStore::new();
        let record = OperationDescriptor::record("cart:1")
            .list_mode(ListMode::AddLast)
            .list_field("items")
            .payload(json!({"item": "${request.body.$.item}"}))
            .build()
            .unwrap();

        for expected_len in 1..=3 {
            let outcome = run(&record, &store).unwrap();
            assert_eq!(
                outcome,
                Outcome::ListAppended {
                    context: "cart:1".into(),
                    field: "items".into(),
                    len: expected_len
                }
            );
        }
        assert_eq!(
            store
                .lookup("cart:1", Some("items"), Some(&ListPosition::Last))
                .unwrap(),
            json!({"item": "x"})
        );
    }

    #[test]
    fn test_delete_where_and_multi_targets() {
        let store = InMemoryContextStore::new();
        for id in ["a", "b"] {
            store
                .mutate_list("q", "list", ListOp::AddLast(json!({"id": id})))
                .unwrap();
        }
        let delete_where = OperationDescriptor::delete("q")
            .list_mode(ListMode::RemoveWhere {
                property: "id".into(),
                value: "b".into(),
            })
            .build()
            .unwrap();
        match run(&delete_where, &store).unwrap() {
            Outcome::ListRemoved { element, len, .. } => {
                assert_eq!(element, json!({"id": "b"}));
                assert_eq!(len, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        store.put("order:1", Map::new());
        store.put("order:2", Map::new());
        let by_name = OperationDescriptor::delete_contexts(["order:1", "order:9"])
            .build()
            .unwrap();
        assert_eq!(run(&by_name, &store).unwrap(), Outcome::Deleted { count: 1 });

        let by_pattern = OperationDescriptor::delete_matching("^order:")
            .build()
            .unwrap();
        assert_eq!(run(&by_pattern, &store).unwrap(), Outcome::Deleted { count: 1 });
        assert_eq!(run(&by_pattern, &store).unwrap(), Outcome::NothingToDelete);
        assert!(store.contains("q"));
    }
}
