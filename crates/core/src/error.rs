//! Error types for Rivulet.

use alloc::string::String;
use core::fmt;

/// Result type alias for Rivulet operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for incremental maintenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A notification carried more than one item for an action that only
    /// supports single-item payloads.
    UnsupportedMultiItemOperation {
        action: &'static str,
        count: usize,
    },
    /// An insertion index lies past the end of the sequence.
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    /// No entry exists at the requested index.
    NotFound {
        index: usize,
        len: usize,
    },
    /// The incrementally maintained state diverged from a from-scratch
    /// recomputation. `tag` identifies the invariant that was breached.
    ConsistencyViolation {
        operator: &'static str,
        tag: u32,
    },
    /// A derived property was mutated while it is controlled by a binding,
    /// or a parameter value is not usable.
    Configuration {
        message: String,
    },
    /// Invalid operation.
    InvalidOperation {
        message: String,
    },
    /// The cross-thread handoff could not deliver a job or its result.
    Dispatch {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedMultiItemOperation { action, count } => {
                write!(
                    f,
                    "Unsupported operation: {} of {} items in one notification",
                    action, count
                )
            }
            Error::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range for length {}", index, len)
            }
            Error::NotFound { index, len } => {
                write!(f, "No entry at index {} (length {})", index, len)
            }
            Error::ConsistencyViolation { operator, tag } => {
                write!(f, "Consistency violation: {}.{}", operator, tag)
            }
            Error::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
            Error::Dispatch { message } => {
                write!(f, "Dispatch error: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates an unsupported multi-item operation error.
    pub fn unsupported_multi_item(action: &'static str, count: usize) -> Self {
        Error::UnsupportedMultiItemOperation { action, count }
    }

    /// Creates an index out of range error.
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Error::IndexOutOfRange { index, len }
    }

    /// Creates a not found error.
    pub fn not_found(index: usize, len: usize) -> Self {
        Error::NotFound { index, len }
    }

    /// Creates a consistency violation error.
    pub fn consistency_violation(operator: &'static str, tag: u32) -> Self {
        Error::ConsistencyViolation { operator, tag }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a dispatch error.
    pub fn dispatch(message: impl Into<String>) -> Self {
        Error::Dispatch {
            message: message.into(),
        }
    }

    /// Returns the operator name and tag of a consistency violation.
    pub fn violation_tag(&self) -> Option<(&'static str, u32)> {
        match self {
            Error::ConsistencyViolation { operator, tag } => Some((operator, *tag)),
            _ => None,
        }
    }

    /// Returns true for multi-item notification failures.
    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedMultiItemOperation { .. })
    }
}
