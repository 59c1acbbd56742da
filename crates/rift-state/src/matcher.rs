//! Request matching against stored contexts.
//!
//! A [`StateMatcherConfig`] is the declarative form found under a mapping's
//! `matcher:` key. It is compiled once into a [`StateMatcher`], which the
//! pipeline evaluates per request:
//!
//! ```yaml
//! matcher:
//!   hasContext: "order:${request.pathParams.id}"
//!   property:
//!     status: { equals: created }
//!     customer.name: { startsWith: "${request.query.prefix}" }
//!   hasProperty: [orderId]
//!   listField: items
//!   list:
//!     last: { sku: { equals: x } }
//!   listSize: { moreThan: 0 }
//!   updateCount: { lessThan: 5 }
//! ```
//!
//! Expected values are templates rendered against the request, so a matcher
//! can compare stored state with the incoming request.

use crate::error::{Result, StateError};
use crate::store::list::value_as_text;
use crate::store::{
    invalid_list_field, Context, ContextStore, ListPosition, DEFAULT_LIST_FIELD,
};
use crate::template::{has_template_variables, Exchange, TemplateRenderer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// String matching operator for comparing a stored value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum StringMatcher {
    /// Exact string equality
    Equals(String),
    /// String contains substring
    Contains(String),
    /// String starts with prefix
    StartsWith(String),
    /// String ends with suffix
    EndsWith(String),
    /// Regex pattern match
    Matches(String),
    /// Field existence check (value is whether field should exist)
    Exists(bool),
}

/// Numeric bounds, all of which must hold.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CountMatcher {
    pub equal_to: Option<u64>,
    pub less_than: Option<u64>,
    pub more_than: Option<u64>,
}

impl CountMatcher {
    pub fn matches(&self, count: u64) -> bool {
        self.equal_to.map_or(true, |n| count == n)
            && self.less_than.map_or(true, |n| count < n)
            && self.more_than.map_or(true, |n| count > n)
    }

    fn is_empty(&self) -> bool {
        self.equal_to.is_none() && self.less_than.is_none() && self.more_than.is_none()
    }
}

/// Declarative state matcher as it appears in configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateMatcherConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_not_context: Option<String>,
    /// Field path -> matcher
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub property: BTreeMap<String, StringMatcher>,
    #[serde(default)]
    pub has_property: Vec<String>,
    #[serde(default)]
    pub has_not_property: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_field: Option<String>,
    /// Position (`first`, `last`, index) -> element field path -> matcher
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub list: BTreeMap<String, BTreeMap<String, StringMatcher>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_count: Option<CountMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_size: Option<CountMatcher>,
}

impl StateMatcherConfig {
    /// Validate and compile.
    pub fn compile(&self) -> Result<StateMatcher> {
        let invalid = |reason: String| Err(StateError::Configuration(format!("matcher: {reason}")));

        let (context, expect_present) = match (&self.has_context, &self.has_not_context) {
            (Some(name), None) => (name.clone(), true),
            (None, Some(name)) => (name.clone(), false),
            _ => return invalid("exactly one of hasContext or hasNotContext is required".into()),
        };
        if context.trim().is_empty() {
            return invalid("context name must not be empty".into());
        }

        let has_conditions = !self.property.is_empty()
            || !self.has_property.is_empty()
            || !self.has_not_property.is_empty()
            || !self.list.is_empty()
            || self.update_count.as_ref().is_some_and(|c| !c.is_empty())
            || self.list_size.as_ref().is_some_and(|c| !c.is_empty());
        if !expect_present && has_conditions {
            return invalid("hasNotContext cannot be combined with other conditions".into());
        }

        let property = self
            .property
            .iter()
            .map(|(path, m)| Ok((path.clone(), CompiledStringMatcher::compile(m)?)))
            .collect::<Result<Vec<_>>>()?;

        let list_field = self
            .list_field
            .clone()
            .unwrap_or_else(|| DEFAULT_LIST_FIELD.to_string());
        if let Some(reason) = invalid_list_field(&list_field) {
            return invalid(format!("listField: {reason}"));
        }

        let mut list = Vec::with_capacity(self.list.len());
        for (position, fields) in &self.list {
            let position: ListPosition = position.parse()?;
            let fields = fields
                .iter()
                .map(|(path, m)| Ok((path.clone(), CompiledStringMatcher::compile(m)?)))
                .collect::<Result<Vec<_>>>()?;
            list.push((position, fields));
        }

        Ok(StateMatcher {
            context,
            expect_present,
            property,
            has_property: self.has_property.clone(),
            has_not_property: self.has_not_property.clone(),
            list_field,
            list,
            update_count: self.update_count.clone(),
            list_size: self.list_size.clone(),
        })
    }
}

/// Compiled string matcher; expected values are rendered per request.
#[derive(Debug, Clone)]
enum CompiledStringMatcher {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Pre-compiled unless the pattern holds placeholders
    Matches(String, Option<Arc<Regex>>),
    Exists(bool),
}

impl CompiledStringMatcher {
    fn compile(matcher: &StringMatcher) -> Result<Self> {
        Ok(match matcher {
            StringMatcher::Equals(v) => CompiledStringMatcher::Equals(v.clone()),
            StringMatcher::Contains(v) => CompiledStringMatcher::Contains(v.clone()),
            StringMatcher::StartsWith(v) => CompiledStringMatcher::StartsWith(v.clone()),
            StringMatcher::EndsWith(v) => CompiledStringMatcher::EndsWith(v.clone()),
            StringMatcher::Matches(pattern) if has_template_variables(pattern) => {
                CompiledStringMatcher::Matches(pattern.clone(), None)
            }
            StringMatcher::Matches(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    StateError::Configuration(format!("matcher: invalid regex '{pattern}': {e}"))
                })?;
                CompiledStringMatcher::Matches(pattern.clone(), Some(Arc::new(regex)))
            }
            StringMatcher::Exists(exists) => CompiledStringMatcher::Exists(*exists),
        })
    }

    fn matches(
        &self,
        value: Option<&Value>,
        renderer: &dyn TemplateRenderer,
        exchange: &Exchange,
    ) -> Result<bool> {
        let value = value.map(value_as_text);
        let (expected, value) = match (self, value) {
            (CompiledStringMatcher::Exists(should_exist), v) => {
                return Ok(*should_exist == v.is_some())
            }
            // For all other matchers, value must exist
            (_, None) => return Ok(false),
            (CompiledStringMatcher::Matches(_, Some(regex)), Some(v)) => {
                return Ok(regex.is_match(&v))
            }
            (
                CompiledStringMatcher::Equals(t)
                | CompiledStringMatcher::Contains(t)
                | CompiledStringMatcher::StartsWith(t)
                | CompiledStringMatcher::EndsWith(t)
                | CompiledStringMatcher::Matches(t, None),
                Some(v),
            ) => (renderer.render(t, exchange)?, v),
        };

        Ok(match self {
            CompiledStringMatcher::Equals(_) => value == expected,
            CompiledStringMatcher::Contains(_) => value.contains(&expected),
            CompiledStringMatcher::StartsWith(_) => value.starts_with(&expected),
            CompiledStringMatcher::EndsWith(_) => value.ends_with(&expected),
            CompiledStringMatcher::Matches(template, _) => Regex::new(&expected)
                .map_err(|e| StateError::resolution(template, format!("invalid regex: {e}")))?
                .is_match(&value),
            CompiledStringMatcher::Exists(_) => false,
        })
    }
}

/// Compiled request predicate over stored state.
#[derive(Debug, Clone)]
pub struct StateMatcher {
    context: String,
    expect_present: bool,
    property: Vec<(String, CompiledStringMatcher)>,
    has_property: Vec<String>,
    has_not_property: Vec<String>,
    list_field: String,
    list: Vec<(ListPosition, Vec<(String, CompiledStringMatcher)>)>,
    update_count: Option<CountMatcher>,
    list_size: Option<CountMatcher>,
}

impl StateMatcher {
    /// Evaluate against the current store contents.
    ///
    /// Returns an error only when a template cannot be rendered.
    pub fn matches(
        &self,
        store: &dyn ContextStore,
        renderer: &dyn TemplateRenderer,
        exchange: &Exchange,
    ) -> Result<bool> {
        let name = renderer.render(&self.context, exchange)?;
        if !self.expect_present {
            return Ok(!store.contains(&name));
        }
        let Some(context) = store.get(&name) else {
            return Ok(false);
        };
        self.matches_context(&context, renderer, exchange)
    }

    fn matches_context(
        &self,
        context: &Context,
        renderer: &dyn TemplateRenderer,
        exchange: &Exchange,
    ) -> Result<bool> {
        for (path, matcher) in &self.property {
            if !matcher.matches(context.field(path), renderer, exchange)? {
                return Ok(false);
            }
        }

        if !self.has_property.iter().all(|p| context.field(p).is_some())
            || self.has_not_property.iter().any(|p| context.field(p).is_some())
        {
            return Ok(false);
        }

        if let Some(count) = &self.update_count {
            if !count.matches(context.update_count) {
                return Ok(false);
            }
        }

        let items = context.field(&self.list_field).and_then(Value::as_array);

        if let Some(size) = &self.list_size {
            let len = items.map_or(0, Vec::len) as u64;
            if !size.matches(len) {
                return Ok(false);
            }
        }

        for (position, fields) in &self.list {
            let element = items.and_then(|items| position.resolve(items.len()).map(|i| &items[i]));
            let Some(element) = element else {
                return Ok(false);
            };
            for (path, matcher) in fields {
                if !matcher.matches(element_field(element, path), renderer, exchange)? {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

/// Dotted path inside a list element; an empty path is the element itself.
fn element_field<'a>(element: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(element, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}
