use thiserror::Error;

/// Failures raised while packing or unpacking PackStream data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PackError {
    /// The buffer ended before the value did. The caller should supply more
    /// bytes and retry from the start of the unread region.
    #[error("insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },

    #[error("malformed value: {0}")]
    Malformed(String),

    #[error("invalid utf-8 string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("{kind} of size {size} cannot be packed")]
    TooLarge { kind: &'static str, size: usize },

    #[error("unexpected structure with tag {tag:#04x} and {length} fields")]
    UnexpectedStruct { tag: u8, length: usize },

    #[error("{structure} expects {expected} fields, found {found}")]
    WrongFieldCount {
        structure: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid {structure} field '{field}': {reason}")]
    IllegalArgument {
        structure: &'static str,
        field: String,
        reason: String,
    },
}

impl PackError {
    pub fn illegal(structure: &'static str, field: &str, reason: impl Into<String>) -> Self {
        PackError::IllegalArgument {
            structure,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Only running out of bytes can be fixed by reading further.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PackError::InsufficientData { .. })
    }

    /// Errors that come from a well-formed message carrying bad field values.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PackError::IllegalArgument { .. } | PackError::WrongFieldCount { .. }
        )
    }
}
