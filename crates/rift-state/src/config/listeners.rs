//! Declarative listener blocks and their conversion into descriptors.

use crate::error::{Result, StateError};
use crate::operations::{ListMode, OperationDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One post-response listener of a mapping.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ListenerConfig {
    RecordState(RecordStateConfig),
    UpdateState(UpdateStateConfig),
    DeleteState(DeleteStateConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordStateConfig {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<RecordListConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordListConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_last: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_first: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStateConfig {
    pub context: String,
    pub state: Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteStateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts_matching: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<DeleteListConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteListConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub delete_first: bool,
    #[serde(default)]
    pub delete_last: bool,
    /// Position or template; accepts a number or a string
    #[serde(
        default,
        deserialize_with = "deserialize_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub delete_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_where: Option<DeleteWhereConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeleteWhereConfig {
    pub property: String,
    pub value: String,
}

fn deserialize_index<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(n.to_string()))
            .ok_or_else(|| D::Error::custom("deleteIndex must be an integer")),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(D::Error::custom("deleteIndex must be a number or string")),
    }
}

fn invalid(kind: &str, reason: &str) -> StateError {
    StateError::Configuration(format!("{kind}: {reason}"))
}

impl ListenerConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ListenerConfig::RecordState(_) => "recordState",
            ListenerConfig::UpdateState(_) => "updateState",
            ListenerConfig::DeleteState(_) => "deleteState",
        }
    }

    /// Build and validate the operation descriptor.
    pub fn to_descriptor(&self) -> Result<OperationDescriptor> {
        match self {
            ListenerConfig::RecordState(record) => record.to_descriptor(),
            ListenerConfig::UpdateState(update) => OperationDescriptor::update(&update.context)
                .payload(update.state.clone())
                .build(),
            ListenerConfig::DeleteState(delete) => delete.to_descriptor(),
        }
    }
}

impl RecordStateConfig {
    fn to_descriptor(&self) -> Result<OperationDescriptor> {
        let builder = OperationDescriptor::record(&self.context);
        let Some(list) = &self.list else {
            let state = self
                .state
                .clone()
                .ok_or_else(|| invalid("recordState", "either state or list is required"))?;
            return builder.payload(state).build();
        };

        if self.state.is_some() {
            return Err(invalid("recordState", "state and list are mutually exclusive"));
        }

        let (mode, element) = match (&list.add_last, &list.add_first) {
            (Some(element), None) => (ListMode::AddLast, element.clone()),
            (None, Some(element)) => (ListMode::AddFirst, element.clone()),
            _ => {
                return Err(invalid(
                    "recordState",
                    "list requires exactly one of addLast or addFirst",
                ))
            }
        };

        let builder = match &list.field {
            Some(field) => builder.list_field(field),
            None => builder,
        };
        builder.list_mode(mode).payload(element).build()
    }
}

impl DeleteStateConfig {
    fn to_descriptor(&self) -> Result<OperationDescriptor> {
        let builder = match (
            &self.context,
            self.contexts.is_empty(),
            &self.contexts_matching,
        ) {
            (Some(context), true, None) => OperationDescriptor::delete(context),
            (None, false, None) => OperationDescriptor::delete_contexts(self.contexts.iter()),
            (None, true, Some(pattern)) => OperationDescriptor::delete_matching(pattern),
            _ => {
                return Err(invalid(
                    "deleteState",
                    "exactly one of context, contexts or contextsMatching is required",
                ))
            }
        };

        let Some(list) = &self.list else {
            return builder.build();
        };

        let mut modes = Vec::new();
        if list.delete_first {
            modes.push(ListMode::RemoveFirst);
        }
        if list.delete_last {
            modes.push(ListMode::RemoveLast);
        }
        if let Some(index) = &list.delete_index {
            modes.push(ListMode::RemoveAt(index.clone()));
        }
        if let Some(filter) = &list.delete_where {
            modes.push(ListMode::RemoveWhere {
                property: filter.property.clone(),
                value: filter.value.clone(),
            });
        }

        let mode = match modes.len() {
            1 => modes.remove(0),
            _ => {
                return Err(invalid(
                    "deleteState",
                    "list requires exactly one of deleteFirst, deleteLast, deleteIndex or deleteWhere",
                ))
            }
        };

        let builder = match &list.field {
            Some(field) => builder.list_field(field),
            None => builder,
        };
        builder.list_mode(mode).build()
    }
}
