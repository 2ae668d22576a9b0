//! Error types for stratus-control.

use std::fmt;
use std::path::PathBuf;

use stratus_package::PackageError;

use crate::identity::IdentityError;
use crate::template::TemplateError;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Result type alias using [`RemoteError`].
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while reconciling desired state.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The desired configuration is unusable as written.
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// The desired configuration cannot be applied on top of the live one.
    #[error("cannot update {function}: {}", violations.join("; "))]
    InvalidTransition {
        /// Function name.
        function: String,
        /// One message per violated rule.
        violations: Vec<String>,
    },

    /// A definition file could not be decoded.
    #[error("failed to load {path}: {message}")]
    Definition {
        /// Definition file path.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A definition file already exists and overwriting was not requested.
    #[error("{0} already exists, use --force to overwrite")]
    AlreadyExists(PathBuf),

    /// Template evaluation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Caller identity lookup failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Remote control plane call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Applying a permission plan failed part way.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Packaging the function code failed.
    #[error(transparent)]
    Package(#[from] PackageError),

    /// The live resource policy is not valid JSON.
    #[error("failed to parse policy of {resource}: {source}")]
    Policy {
        /// Function (and qualifier) the policy belongs to.
        resource: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before the step completed.
    #[error("cancelled during {0}")]
    Cancelled(&'static str),

    /// A reconciliation invariant was broken. Indicates a bug, not an
    /// external fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a configuration validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a remote "not found" condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_not_found())
    }
}

impl From<figment::Error> for ControlError {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Errors returned by a [`ControlPlane`](crate::remote::ControlPlane).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The requested resource does not exist.
    #[error("{operation}: {resource} not found")]
    NotFound {
        /// Remote operation name.
        operation: &'static str,
        /// Resource identifier.
        resource: String,
    },

    /// The service rejected the request.
    #[error("{operation} {resource} failed with status {status}: {message}")]
    Api {
        /// Remote operation name.
        operation: &'static str,
        /// Resource identifier.
        resource: String,
        /// HTTP status code.
        status: u16,
        /// Error message returned by the service.
        message: String,
    },

    /// The request never produced a response.
    #[error("{operation} {resource}: transport error: {source}")]
    Transport {
        /// Remote operation name.
        operation: &'static str,
        /// Resource identifier.
        resource: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The response body did not have the expected shape.
    #[error("{operation} {resource}: unexpected response: {message}")]
    Decode {
        /// Remote operation name.
        operation: &'static str,
        /// Resource identifier.
        resource: String,
        /// Decoder message.
        message: String,
    },
}

impl RemoteError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(operation: &'static str, resource: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            resource: resource.into(),
        }
    }

    /// Whether this is the distinguished "not found" condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Phase of a permission plan being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    /// Adding grants.
    Add,
    /// Removing grants.
    Remove,
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// A grant change failed while applying a plan.
///
/// Changes applied before the failure stay in effect.
#[derive(Debug, thiserror::Error)]
#[error("failed to {phase} grant {statement_id} on {resource} after {applied} change(s): {source}")]
pub struct ApplyError {
    /// Phase that failed.
    pub phase: ApplyPhase,
    /// Statement identifier of the failed change.
    pub statement_id: String,
    /// Function (and qualifier) being changed.
    pub resource: String,
    /// Number of changes applied before the failure.
    pub applied: usize,
    /// Underlying remote error.
    #[source]
    pub source: RemoteError,
}
