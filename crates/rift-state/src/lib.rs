//! Stateful contexts for stub-based HTTP mocking.
//!
//! Mappings attach post-response listeners that record, update and delete
//! named contexts in a process-wide [`store::ContextStore`]. Response bodies
//! read those contexts back through `${context[...]}` placeholders, and state
//! matchers let a mapping match only when the store is in a given shape.

pub mod config;
pub mod error;
pub mod hooks;
pub mod matcher;
pub mod operations;
pub mod replay;
pub mod store;
pub mod template;

pub use error::{Result, StateError};
pub use hooks::{HookRegistry, HookReport, ListenerError};
pub use operations::{OperationDescriptor, Outcome};
pub use store::{create_context_store, ContextStore, InMemoryContextStore};
pub use template::{Exchange, ExchangeRenderer, RequestData, ResponseData, TemplateRenderer};
