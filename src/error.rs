//! Error type shared by the set, its configuration and its iterator.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetError {
    /// A constructor or configuration value was rejected.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// `Iter::next_element` was called after the iterator ended.
    #[error("iteration exhausted")]
    Exhausted,

    /// `insert` found a live element equal to the one being added.
    #[error("an equal element is already present")]
    Duplicate,
}

impl SetError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SetError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}
