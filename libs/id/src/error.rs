//! Error types for ID parsing.

use thiserror::Error;

/// Errors that can occur when parsing an ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID contains whitespace or a control character.
    #[error("invalid character {character:?} at position {position}")]
    InvalidCharacter { character: char, position: usize },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
