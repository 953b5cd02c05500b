use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("ID cannot be empty")]
    Empty,

    /// The ID belongs to another ID type.
    #[error("expected an ID prefixed '{expected}', got '{found}'")]
    WrongPrefix {
        expected: &'static str,
        found: String,
    },

    #[error("malformed ID {input:?}: {reason}")]
    Malformed { input: String, reason: String },

    /// The generator could not hand out another ID.
    #[error("ID generation failed: {message}")]
    Generation { message: String },
}
