//! Ordered list fields inside a context.
//!
//! Positions are resolved against the list length at the instant of access.
//! `first` is index 0, `last` is `len - 1` and negative indices count back
//! from the tail (`-1` is the last element). Nothing is clamped: a position
//! outside the list yields [`StateError::Index`].

use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Symbolic or numeric position within a list field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PositionRepr", into = "String")]
pub enum ListPosition {
    First,
    Last,
    Index(i64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PositionRepr {
    Number(i64),
    Text(String),
}

impl TryFrom<PositionRepr> for ListPosition {
    type Error = StateError;

    fn try_from(repr: PositionRepr) -> Result<Self> {
        match repr {
            PositionRepr::Number(n) => Ok(ListPosition::Index(n)),
            PositionRepr::Text(s) => s.parse(),
        }
    }
}

impl From<ListPosition> for String {
    fn from(position: ListPosition) -> Self {
        position.to_string()
    }
}

impl FromStr for ListPosition {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed {
            "first" => Ok(ListPosition::First),
            "last" => Ok(ListPosition::Last),
            other => other.parse::<i64>().map(ListPosition::Index).map_err(|_| {
                StateError::Configuration(format!(
                    "invalid list position '{s}': expected 'first', 'last' or an integer"
                ))
            }),
        }
    }
}

impl fmt::Display for ListPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListPosition::First => f.write_str("first"),
            ListPosition::Last => f.write_str("last"),
            ListPosition::Index(i) => write!(f, "{i}"),
        }
    }
}

impl ListPosition {
    /// Resolve to a concrete index for a list of `len` elements.
    pub fn resolve(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        match *self {
            ListPosition::First => Some(0),
            ListPosition::Last => Some(len - 1),
            ListPosition::Index(i) if i >= 0 => {
                let idx = usize::try_from(i).ok()?;
                (idx < len).then_some(idx)
            }
            ListPosition::Index(i) => {
                let back = usize::try_from(i.unsigned_abs()).ok()?;
                len.checked_sub(back)
            }
        }
    }

    fn resolve_in(&self, len: usize, context: &str, field: &str) -> Result<usize> {
        self.resolve(len).ok_or_else(|| StateError::Index {
            context: context.to_string(),
            field: field.to_string(),
            position: self.to_string(),
            len,
        })
    }
}

/// A single atomic change to a list field.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    AddLast(Value),
    AddFirst(Value),
    RemoveFirst,
    RemoveLast,
    RemoveAt(ListPosition),
    /// Remove the first element whose `property` equals `value`.
    RemoveWhere { property: String, value: String },
}

impl ListOp {
    /// Appends create the context and field when missing; removals do not.
    pub fn is_append(&self) -> bool {
        matches!(self, ListOp::AddLast(_) | ListOp::AddFirst(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ListOp::AddLast(_) => "addLast",
            ListOp::AddFirst(_) => "addFirst",
            ListOp::RemoveFirst => "removeFirst",
            ListOp::RemoveLast => "removeLast",
            ListOp::RemoveAt(_) => "removeAt",
            ListOp::RemoveWhere { .. } => "removeWhere",
        }
    }

    /// Apply to `list`, returning the removed element for removals.
    ///
    /// Removing the head or tail of an empty list, or a `RemoveWhere` with no
    /// matching element, removes nothing and returns `None`.
    pub(crate) fn apply(
        self,
        list: &mut Vec<Value>,
        context: &str,
        field: &str,
    ) -> Result<Option<Value>> {
        match self {
            ListOp::AddLast(element) => {
                list.push(element);
                Ok(None)
            }
            ListOp::AddFirst(element) => {
                list.insert(0, element);
                Ok(None)
            }
            ListOp::RemoveFirst => {
                if list.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(list.remove(0)))
                }
            }
            ListOp::RemoveLast => Ok(list.pop()),
            ListOp::RemoveAt(position) => {
                let idx = position.resolve_in(list.len(), context, field)?;
                Ok(Some(list.remove(idx)))
            }
            ListOp::RemoveWhere { property, value } => {
                let found = list
                    .iter()
                    .position(|element| property_equals(element, &property, &value));
                Ok(found.map(|idx| list.remove(idx)))
            }
        }
    }
}

/// Read one element as a snapshot.
pub fn read_at(
    list: &[Value],
    position: &ListPosition,
    context: &str,
    field: &str,
) -> Result<Value> {
    let idx = position.resolve_in(list.len(), context, field)?;
    Ok(list[idx].clone())
}

/// String form of a JSON scalar as it appears in templates and matchers.
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn property_equals(element: &Value, property: &str, expected: &str) -> bool {
    element
        .get(property)
        .map(|v| value_as_text(v) == expected)
        .unwrap_or(false)
}
