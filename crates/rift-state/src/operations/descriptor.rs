//! Immutable operation descriptors and their builder.

use super::ResolvedOperation;
use crate::error::{Result, StateError};
use crate::store::{invalid_list_field, ListOp, ListPosition, DEFAULT_LIST_FIELD};
use crate::template::{has_template_variables, Exchange, TemplateRenderer};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

/// The three mutation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Record,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Record => f.write_str("recordState"),
            OperationKind::Update => f.write_str("updateState"),
            OperationKind::Delete => f.write_str("deleteState"),
        }
    }
}

/// Which context(s) an operation touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextTarget {
    /// One key expression.
    Single(String),
    /// Several key expressions, Delete only.
    Many(Vec<String>),
    /// Every context whose name matches the (templated) regex, Delete only.
    Matching(String),
}

/// Sub-operation applied to a list field instead of the whole context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ListMode {
    #[default]
    None,
    AddLast,
    AddFirst,
    RemoveLast,
    RemoveFirst,
    /// Position template, rendered then parsed as a [`ListPosition`].
    RemoveAt(String),
    /// Remove the first element whose `property` renders equal to `value`.
    RemoveWhere { property: String, value: String },
}

impl ListMode {
    fn is_none(&self) -> bool {
        matches!(self, ListMode::None)
    }

    fn is_append(&self) -> bool {
        matches!(self, ListMode::AddLast | ListMode::AddFirst)
    }

    fn is_remove(&self) -> bool {
        !self.is_none() && !self.is_append()
    }
}

/// Validated, immutable description of one mutation.
///
/// Built once through [`OperationBuilder`] and resolved against every exchange
/// the owning mapping serves.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    kind: OperationKind,
    target: ContextTarget,
    list_mode: ListMode,
    list_field: String,
    payload: Option<Value>,
    /// Pre-compiled `contextsMatching` pattern when it holds no placeholders
    compiled_pattern: Option<Regex>,
}

impl OperationDescriptor {
    pub fn record(key: impl Into<String>) -> OperationBuilder {
        OperationBuilder::new(OperationKind::Record, ContextTarget::Single(key.into()))
    }

    pub fn update(key: impl Into<String>) -> OperationBuilder {
        OperationBuilder::new(OperationKind::Update, ContextTarget::Single(key.into()))
    }

    pub fn delete(key: impl Into<String>) -> OperationBuilder {
        OperationBuilder::new(OperationKind::Delete, ContextTarget::Single(key.into()))
    }

    pub fn delete_contexts<I, S>(keys: I) -> OperationBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OperationBuilder::new(
            OperationKind::Delete,
            ContextTarget::Many(keys.into_iter().map(Into::into).collect()),
        )
    }

    pub fn delete_matching(pattern: impl Into<String>) -> OperationBuilder {
        OperationBuilder::new(
            OperationKind::Delete,
            ContextTarget::Matching(pattern.into()),
        )
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn target(&self) -> &ContextTarget {
        &self.target
    }

    pub fn list_mode(&self) -> &ListMode {
        &self.list_mode
    }

    pub fn list_field(&self) -> &str {
        &self.list_field
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Render every template in the descriptor against `exchange`.
    ///
    /// Any rendering failure is a [`StateError::Resolution`] and nothing is
    /// applied.
    pub fn resolve(
        &self,
        renderer: &dyn TemplateRenderer,
        exchange: &Exchange,
    ) -> Result<ResolvedOperation> {
        let key = match &self.target {
            ContextTarget::Single(key) => key,
            ContextTarget::Many(keys) => {
                let names = keys
                    .iter()
                    .map(|key| render_key(renderer, key, exchange))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(ResolvedOperation::RemoveAll { names });
            }
            ContextTarget::Matching(pattern) => {
                let pattern = match &self.compiled_pattern {
                    Some(compiled) => compiled.clone(),
                    None => {
                        let rendered = render_key(renderer, pattern, exchange)?;
                        Regex::new(&rendered).map_err(|e| {
                            StateError::resolution(pattern, format!("invalid regex: {e}"))
                        })?
                    }
                };
                return Ok(ResolvedOperation::RemoveMatching { pattern });
            }
        };

        let context = render_key(renderer, key, exchange)?;
        let field = self.list_field.clone();

        let payload = match &self.payload {
            Some(template) => Some(renderer.render_value(template, exchange)?),
            None => None,
        };

        let op = match &self.list_mode {
            ListMode::None => {
                return match self.kind {
                    OperationKind::Delete => Ok(ResolvedOperation::Remove { context }),
                    OperationKind::Record => Ok(ResolvedOperation::Put {
                        context,
                        properties: into_properties(payload, key)?,
                    }),
                    OperationKind::Update => Ok(ResolvedOperation::Merge {
                        context,
                        properties: into_properties(payload, key)?,
                    }),
                };
            }
            ListMode::AddLast => ListOp::AddLast(payload.unwrap_or(Value::Null)),
            ListMode::AddFirst => ListOp::AddFirst(payload.unwrap_or(Value::Null)),
            ListMode::RemoveLast => ListOp::RemoveLast,
            ListMode::RemoveFirst => ListOp::RemoveFirst,
            ListMode::RemoveAt(template) => {
                let rendered = renderer.render(template, exchange)?;
                let position = rendered.parse::<ListPosition>().map_err(|_| {
                    StateError::resolution(
                        template,
                        format!("'{rendered}' is not a list position"),
                    )
                })?;
                ListOp::RemoveAt(position)
            }
            ListMode::RemoveWhere { property, value } => ListOp::RemoveWhere {
                property: renderer.render(property, exchange)?,
                value: renderer.render(value, exchange)?,
            },
        };

        Ok(ResolvedOperation::List { context, field, op })
    }
}

fn into_properties(payload: Option<Value>, key: &str) -> Result<Map<String, Value>> {
    match payload {
        Some(Value::Object(properties)) => Ok(properties),
        _ => Err(StateError::resolution(key, "state did not render to an object")),
    }
}

fn render_key(renderer: &dyn TemplateRenderer, key: &str, exchange: &Exchange) -> Result<String> {
    let rendered = renderer.render(key, exchange)?;
    if rendered.trim().is_empty() {
        return Err(StateError::resolution(key, "key rendered to an empty string"));
    }
    Ok(rendered)
}

/// Builder for [`OperationDescriptor`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    kind: OperationKind,
    target: ContextTarget,
    list_mode: ListMode,
    list_field: String,
    payload: Option<Value>,
}

impl OperationBuilder {
    fn new(kind: OperationKind, target: ContextTarget) -> Self {
        Self {
            kind,
            target,
            list_mode: ListMode::None,
            list_field: DEFAULT_LIST_FIELD.to_string(),
            payload: None,
        }
    }

    /// Document for Record/Update, or the element for list appends.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn list_mode(mut self, mode: ListMode) -> Self {
        self.list_mode = mode;
        self
    }

    pub fn list_field(mut self, field: impl Into<String>) -> Self {
        self.list_field = field.into();
        self
    }

    pub fn build(self) -> Result<OperationDescriptor> {
        let kind = self.kind;
        let invalid = |reason: &str| Err(StateError::Configuration(format!("{kind}: {reason}")));

        match &self.target {
            ContextTarget::Single(key) if key.trim().is_empty() => {
                return invalid("context key must not be empty")
            }
            ContextTarget::Many(keys) if keys.is_empty() => {
                return invalid("contexts must name at least one key")
            }
            ContextTarget::Many(keys) if keys.iter().any(|k| k.trim().is_empty()) => {
                return invalid("contexts must not contain empty keys")
            }
            ContextTarget::Matching(pattern) if pattern.trim().is_empty() => {
                return invalid("contextsMatching must not be empty")
            }
            ContextTarget::Many(_) | ContextTarget::Matching(_) => {
                if kind != OperationKind::Delete {
                    return invalid("multiple targets are only supported for deletes");
                }
                if !self.list_mode.is_none() {
                    return invalid("multiple targets cannot be combined with a list operation");
                }
            }
            ContextTarget::Single(_) => {}
        }

        if let Some(reason) = invalid_list_field(&self.list_field) {
            return invalid(&reason);
        }

        match kind {
            OperationKind::Record => {
                if self.list_mode.is_remove() {
                    return invalid("only addLast/addFirst list operations are allowed");
                }
                match &self.payload {
                    None => return invalid("state is required"),
                    Some(Value::Object(_)) => {}
                    Some(_) if self.list_mode.is_none() => {
                        return invalid("state must be an object")
                    }
                    Some(_) => {}
                }
            }
            OperationKind::Update => {
                if !self.list_mode.is_none() {
                    return invalid("list operations are not supported");
                }
                if !matches!(self.payload, Some(Value::Object(_))) {
                    return invalid("state must be an object");
                }
            }
            OperationKind::Delete => {
                if self.payload.is_some() {
                    return invalid("state is not allowed");
                }
                if self.list_mode.is_append() {
                    return invalid("only removal list operations are allowed");
                }
            }
        }

        if let ListMode::RemoveAt(template) = &self.list_mode {
            if !has_template_variables(template) {
                template.parse::<ListPosition>()?;
            }
        }

        let compiled_pattern = match &self.target {
            ContextTarget::Matching(pattern) if !has_template_variables(pattern) => {
                Some(Regex::new(pattern).map_err(|e| {
                    StateError::Configuration(format!(
                        "{kind}: invalid contextsMatching '{pattern}': {e}"
                    ))
                })?)
            }
            _ => None,
        };

        Ok(OperationDescriptor {
            kind,
            target: self.target,
            list_mode: self.list_mode,
            list_field: self.list_field,
            payload: self.payload,
            compiled_pattern,
        })
    }
}
