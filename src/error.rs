use std::{error::Error, fmt};

/// Crate-wide error type.
///
/// `Aborted` is the only retryable variant: the caller is expected to
/// abort its transaction and run the operation again from the top.
#[derive(Debug, Clone, PartialEq)]
pub enum OakError {
    /// The transaction lost a lock race (timeout) or observed state it
    /// is not allowed to see (e.g. a read past the end of the file
    /// while the page is supposed to exist).
    Aborted,

    /// A structural violation detectable from the inputs. Not
    /// retryable, indicates a bug in the caller or in the tree.
    Invalid(String),

    /// An underlying file read/write failed. The cache may be
    /// inconsistent afterwards.
    Io(String),
}

impl OakError {
    pub fn invalid(msg: &str) -> Self {
        OakError::Invalid(msg.to_string())
    }

    pub fn io(msg: &str) -> Self {
        OakError::Io(msg.to_string())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, OakError::Aborted)
    }
}

impl fmt::Display for OakError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OakError::Aborted => write!(f, "transaction aborted"),
            OakError::Invalid(details) => write!(f, "invalid operation: {}", details),
            OakError::Io(details) => write!(f, "io error: {}", details),
        }
    }
}

impl Error for OakError {}

impl From<std::io::Error> for OakError {
    fn from(e: std::io::Error) -> Self {
        OakError::Io(e.to_string())
    }
}
