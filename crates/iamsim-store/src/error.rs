//! Store error types.

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

/// Why a lookup produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissCause {
    /// No entry exists for the key.
    Absent,
    /// An entry exists but does not decode as the requested type.
    Undecodable(String),
}

impl Display for MissCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MissCause::Absent => f.write_str("absent"),
            MissCause::Undecodable(message) => write!(f, "undecodable: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("key not found: {key} ({cause})")]
    NotFound { key: String, cause: MissCause },

    #[error(
        "version conflict on {key}: expected {expected}, found {}",
        describe_version(.actual)
    )]
    VersionConflict {
        key: String,
        expected: u64,
        actual: Option<u64>,
    },

    #[error("failed to encode value for {key}: {message}")]
    Encode { key: String, message: String },
}

impl StoreError {
    pub(crate) fn absent(key: &str) -> Self {
        Self::NotFound {
            key: key.to_string(),
            cause: MissCause::Absent,
        }
    }

    pub(crate) fn undecodable(key: &str, message: impl Into<String>) -> Self {
        Self::NotFound {
            key: key.to_string(),
            cause: MissCause::Undecodable(message.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn describe_version(actual: &Option<u64>) -> String {
    match actual {
        Some(version) => version.to_string(),
        None => "absent".to_string(),
    }
}

/// Failure of an atomic read-modify-write.
///
/// `Mutation` carries the caller's own error untouched; no write happened.
#[derive(Debug)]
pub enum UpdateError<E> {
    Store(StoreError),
    Mutation(E),
}

impl<E> From<StoreError> for UpdateError<E> {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl<E: Display> Display for UpdateError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Mutation(err) => write!(f, "{err}"),
        }
    }
}

impl<E> StdError for UpdateError<E>
where
    E: Display + std::fmt::Debug + StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Mutation(err) => Some(err),
        }
    }
}
