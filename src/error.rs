//! Error taxonomy shared by every stage of the volume lifecycle.

use thiserror::Error;

use crate::config::ConfigError;
use crate::secret::StoreError;
use crate::size::SizeError;

/// Errors raised by the provisioning engine and its components.
///
/// Only [`ProvisionError::OwnershipMismatch`] is ignorable; callers should
/// consult [`ProvisionError::is_ignorable`] before retrying or alerting.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when request parameters are missing or malformed.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Parameter or field that failed validation.
        field: String,
        /// Human-readable description of the problem.
        message: String,
    },
    /// Raised when the storage cluster rejects the supplied credential.
    #[error("authentication to cluster {cluster} failed: {message}")]
    Authentication {
        /// Cluster name used for authentication.
        cluster: String,
        /// Error reported by the cluster tooling.
        message: String,
    },
    /// Raised when mounting or bind-mounting the cluster fails.
    #[error("failed to mount cluster {cluster} at {path}: {message}")]
    Mount {
        /// Cluster being mounted.
        cluster: String,
        /// Local mount path.
        path: String,
        /// Error reported by the OS or mount tooling.
        message: String,
    },
    /// Raised when a volume already exists in an incompatible state.
    #[error("volume {volume_id} conflicts with an existing volume: {message}")]
    Conflict {
        /// Volume identifier.
        volume_id: String,
        /// Description of the conflict.
        message: String,
    },
    /// Raised when a required resource is absent and absence cannot be
    /// treated as an achieved end state.
    #[error("{resource} not found")]
    NotFound {
        /// Resource description, for example `secret default/vz`.
        resource: String,
    },
    /// Raised when a placement attribute cannot be applied. The partially
    /// created volume has already been removed when this is returned.
    #[error("unable to set {attribute} to {value} on volume {volume_id}: {message}")]
    Attribute {
        /// Volume identifier.
        volume_id: String,
        /// Cluster attribute name (for example `replicas`).
        attribute: String,
        /// Attribute value that was rejected.
        value: String,
        /// Error reported by the attribute tool.
        message: String,
    },
    /// Raised when the ploop driver or the filesystem fails.
    #[error("volume {volume_id}: {message}")]
    Volume {
        /// Volume identifier.
        volume_id: String,
        /// Error description.
        message: String,
    },
    /// Raised when the credential store cannot be read or patched.
    #[error("secret {secret}: {message}")]
    SecretStore {
        /// Secret reference rendered as `namespace/name`.
        secret: String,
        /// Error reported by the store.
        message: String,
    },
    /// Raised when a handle belongs to a different engine instance.
    #[error("volume is owned by provisioner {found}, not {expected}")]
    OwnershipMismatch {
        /// Identity of this engine.
        expected: String,
        /// Identity recorded on the handle.
        found: String,
    },
    /// Raised when a compensating action fails after a primary failure.
    #[error("{primary} (rollback also failed: {cleanup})")]
    Rollback {
        /// Failure that triggered the rollback.
        primary: Box<ProvisionError>,
        /// Failure raised while rolling back.
        cleanup: Box<ProvisionError>,
    },
    /// Raised when configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProvisionError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn volume(volume_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Volume {
            volume_id: volume_id.into(),
            message: message.into(),
        }
    }

    /// Returns `true` when the external controller should skip this outcome
    /// rather than retry it.
    #[must_use]
    pub const fn is_ignorable(&self) -> bool {
        matches!(self, Self::OwnershipMismatch { .. })
    }

    /// Returns `true` for not-found outcomes.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the failure came from request validation and will
    /// not succeed on retry.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation { .. } => true,
            Self::Rollback { primary, .. } => primary.is_validation(),
            _ => false,
        }
    }

    pub(crate) fn with_cleanup(self, cleanup: Option<Self>) -> Self {
        match cleanup {
            Some(cleanup_err) => Self::Rollback {
                primary: Box::new(self),
                cleanup: Box::new(cleanup_err),
            },
            None => self,
        }
    }
}

impl From<SizeError> for ProvisionError {
    fn from(value: SizeError) -> Self {
        Self::validation("size", value.to_string())
    }
}

impl From<ConfigError> for ProvisionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<StoreError> for ProvisionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { secret } => Self::NotFound {
                resource: format!("secret {secret}"),
            },
            StoreError::Io { secret, message }
            | StoreError::Parse { secret, message }
            | StoreError::Rejected { secret, message } => Self::SecretStore { secret, message },
        }
    }
}
