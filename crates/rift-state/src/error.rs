//! Error types shared by the context store, operations and hooks.

/// Errors produced while resolving templates or touching stored contexts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    /// A key expression or payload template could not be rendered.
    #[error("failed to resolve template '{template}': {reason}")]
    Resolution { template: String, reason: String },

    /// The named context does not exist.
    #[error("context '{0}' not found")]
    ContextNotFound(String),

    /// The context exists but the requested field does not.
    #[error("field '{field}' not found in context '{context}'")]
    FieldNotFound { context: String, field: String },

    /// A list position resolved outside the current bounds.
    #[error("position '{position}' is out of range for list '{field}' (length {len}) in context '{context}'")]
    Index {
        context: String,
        field: String,
        position: String,
        len: usize,
    },

    /// A list operation targeted a field holding a non-sequence value.
    #[error("field '{field}' in context '{context}' is not a list")]
    NotAList { context: String, field: String },

    /// A descriptor or configuration block is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl StateError {
    pub(crate) fn resolution(template: &str, reason: impl Into<String>) -> Self {
        StateError::Resolution {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    /// True for missing contexts and missing fields.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::ContextNotFound(_) | StateError::FieldNotFound { .. }
        )
    }

    /// True for out-of-range positions against an empty list.
    pub(crate) fn is_empty_list(&self) -> bool {
        matches!(self, StateError::Index { len: 0, .. })
    }
}

pub type Result<T, E = StateError> = std::result::Result<T, E>;
