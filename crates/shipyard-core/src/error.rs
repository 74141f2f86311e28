//! Deployment error type shared by every engine component.
//!
//! Contract violations, environment failures and job-level failures all
//! surface as [`DeployError`]. Domain validation outcomes (missing
//! dependencies, ownership conflicts) are not errors; see
//! [`crate::validate::ValidationResult`].

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Stable numeric codes attached to every [`DeployError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Contract = 1000,
    Io = 2000,
    Archive = 2001,
    Serialization = 2002,
    MalformedArchive = 2003,
    Config = 2004,
    UnknownDependencyType = 3000,
    MissingHandler = 3001,
    IncompleteMapping = 4000,
    ObjectNotFound = 5000,
    Conflict = 5001,
    Locked = 6000,
    IncompatibleVersion = 7000,
    Validation = 7001,
    Cancelled = 8000,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error at {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to (de)serialize {}: {source}", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed archive {}: {reason}", .path.display())]
    MalformedArchive { path: PathBuf, reason: String },

    #[error("invalid configuration {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("unknown dependency type: {0}")]
    UnknownDependencyType(String),

    #[error("dependency type '{type_code}' references unregistered handler '{handler}'")]
    MissingHandler { type_code: String, handler: String },

    #[error(
        "incomplete id mapping for {type_code} id {source_id} from server '{server}': \
         neither a target id nor the new-object flag is set"
    )]
    IncompleteMapping {
        server: String,
        type_code: String,
        source_id: String,
    },

    #[error("{type_code} object {id} not found")]
    ObjectNotFound { type_code: String, id: String },

    #[error("{key} is already installed by package '{owner}'")]
    Conflict { key: String, owner: String },

    #[error("{name} lock is held ({})", .path.display())]
    Locked { name: String, path: PathBuf },

    #[error("archive requires product version {required}, this server runs {actual}")]
    IncompatibleVersion { required: String, actual: String },

    #[error("{0}")]
    Validation(String),

    #[error("job cancelled")]
    Cancelled,
}

impl DeployError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Contract(_) => ErrorCode::Contract,
            Self::Io { .. } => ErrorCode::Io,
            Self::Archive { .. } => ErrorCode::Archive,
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::MalformedArchive { .. } => ErrorCode::MalformedArchive,
            Self::Config { .. } => ErrorCode::Config,
            Self::UnknownDependencyType(_) => ErrorCode::UnknownDependencyType,
            Self::MissingHandler { .. } => ErrorCode::MissingHandler,
            Self::IncompleteMapping { .. } => ErrorCode::IncompleteMapping,
            Self::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::Locked { .. } => ErrorCode::Locked,
            Self::IncompatibleVersion { .. } => ErrorCode::IncompatibleVersion,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    /// True for programming errors that must never be retried or swallowed.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DeployError::contract("x").code() as u32, 1000);
        assert_eq!(DeployError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            DeployError::UnknownDependencyType("Foo".into()).code() as u32,
            3000
        );
    }

    #[test]
    fn io_error_message_carries_path() {
        let err = DeployError::io(
            "/tmp/archive.zip",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/archive.zip"));
        assert!(message.contains("gone"));
        assert!(!err.is_contract_violation());
    }
}
