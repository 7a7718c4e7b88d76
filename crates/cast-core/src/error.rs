//! Error types for the Cast agent core.
//!
//! Errors fall into three groups:
//! - **Existence errors** (`NotFound`, `AlreadyExists`): a job's precondition or a
//!   state read disagreed with whether the resource exists
//! - **Execution errors**: a job's own work failed or panicked
//! - **Input/system errors**: bad names, bad configuration, IO

use thiserror::Error;

/// Core error type for agent operations.
///
/// `Clone` so that one snapshot failure can be handed to every reader waiting
/// on it, and so a job's terminal status can carry its error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The named resource does not exist (or will not exist when the job runs)
    #[error("{resource_type} '{name}' does not exist.")]
    NotFound { resource_type: String, name: String },

    /// The named resource already exists (or will exist when the job runs)
    #[error("{resource_type} '{name}' already exists.")]
    AlreadyExists { resource_type: String, name: String },

    /// The resource name cannot be used for this kind of resource
    #[error("Invalid {resource_type} name '{name}': {reason}")]
    InvalidResourceName {
        resource_type: String,
        name: String,
        reason: String,
    },

    /// No resource manager is registered for the job's resource kind
    #[error("No resource manager registered for '{0}'")]
    UnregisteredResourceType(String),

    /// A resource manager for this kind is already registered
    #[error("A resource manager for '{0}' is already registered")]
    DuplicateResourceType(String),

    /// No job with the given id is known
    #[error("Job '{0}' does not exist.")]
    JobNotFound(String),

    /// A job's own work failed
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// A job (or the serializer running on its behalf) panicked
    #[error("Job panicked: {0}")]
    JobPanicked(String),

    /// The snapshot for a running job was never produced
    #[error("State of {resource_type} '{name}' is unavailable")]
    SnapshotUnavailable { resource_type: String, name: String },

    /// Converting a resource into its external state failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not-found error for a resource.
    pub fn not_found(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for a resource.
    pub fn already_exists(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// The existence error a job sees when it disagrees with `exists`.
    ///
    /// A resource that exists is reported as `AlreadyExists`, a missing one as
    /// `NotFound`.
    pub fn existence(resource_type: &str, name: &str, exists: bool) -> Self {
        if exists {
            Self::already_exists(resource_type, name)
        } else {
            Self::not_found(resource_type, name)
        }
    }

    /// Create an invalid-name error.
    pub fn invalid_name(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidResourceName {
            resource_type: resource_type.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a job failure from any message.
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Whether this is one of the two existence errors.
    pub const fn is_existence_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::AlreadyExists { .. })
    }

    /// HTTP status code the control API answers with for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::JobNotFound(_) => 404,
            Self::AlreadyExists { .. } => 409,
            Self::InvalidResourceName { .. } => 400,
            Self::UnregisteredResourceType(_)
            | Self::DuplicateResourceType(_)
            | Self::JobFailed(_)
            | Self::JobPanicked(_)
            | Self::SnapshotUnavailable { .. }
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::InvalidConfig(_)
            | Self::ParseError(_) => 500,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}
