//! Persisted record of a provisioned volume.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::params;
use crate::secret::SecretRef;

/// Annotation carrying the identity of the engine that owns the volume.
pub const OWNER_ANNOTATION: &str = "vzFSParentProvisioner";
/// Annotation carrying the share (volume) identifier.
pub const SHARE_ANNOTATION: &str = "vzShare";
/// Annotation naming the provisioner that created the volume.
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";
/// Flex volume driver name recorded on every handle.
pub const DRIVER: &str = "virtuozzo/ploop";

/// Volume access mode.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessMode {
    /// Read-write by a single node.
    ReadWriteOnce,
    /// Read-only by many nodes.
    ReadOnlyMany,
    /// Read-write by many nodes.
    ReadWriteMany,
    /// Read-write by a single pod.
    ReadWriteOncePod,
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "ReadWriteOnce" | "RWO" => Ok(Self::ReadWriteOnce),
            "ReadOnlyMany" | "ROX" => Ok(Self::ReadOnlyMany),
            "ReadWriteMany" | "RWX" => Ok(Self::ReadWriteMany),
            "ReadWriteOncePod" | "RWOP" => Ok(Self::ReadWriteOncePod),
            other => Err(format!("unknown access mode {other:?}")),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadWriteOnce => "ReadWriteOnce",
            Self::ReadOnlyMany => "ReadOnlyMany",
            Self::ReadWriteMany => "ReadWriteMany",
            Self::ReadWriteOncePod => "ReadWriteOncePod",
        })
    }
}

/// What the platform does with the volume once its claim is released.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ReclaimPolicy {
    /// Delete the volume.
    #[default]
    Delete,
    /// Keep the volume for manual reclamation.
    Retain,
}

impl FromStr for ReclaimPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "Delete" => Ok(Self::Delete),
            "Retain" => Ok(Self::Retain),
            other => Err(format!("unknown reclaim policy {other:?}")),
        }
    }
}

/// Serialisable reference to the credential secret.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HandleSecretRef {
    /// Namespace holding the secret.
    pub namespace: String,
    /// Secret name.
    pub name: String,
}

impl From<&SecretRef> for HandleSecretRef {
    fn from(value: &SecretRef) -> Self {
        Self {
            namespace: value.namespace.clone(),
            name: value.name.clone(),
        }
    }
}

impl From<&HandleSecretRef> for SecretRef {
    fn from(value: &HandleSecretRef) -> Self {
        Self::new(value.namespace.clone(), value.name.clone())
    }
}

/// Persistent-volume-like record returned by provisioning and consumed by
/// deletion.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeHandle {
    /// Persistent volume name.
    pub name: String,
    /// Owner, share and provisioned-by annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Volume driver name.
    pub driver: String,
    /// Secret holding cluster credentials.
    pub secret_ref: HandleSecretRef,
    /// Driver options: placement parameters plus engine-recorded keys.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Access modes granted to the volume.
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Capacity as requested by the claim.
    pub capacity: String,
    /// Reclaim policy.
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

impl VolumeHandle {
    /// Identity of the engine that provisioned the volume.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.annotations.get(OWNER_ANNOTATION).map(String::as_str)
    }

    /// Share identifier recorded at provisioning time.
    #[must_use]
    pub fn share_id(&self) -> Option<&str> {
        self.annotations.get(SHARE_ANNOTATION).map(String::as_str)
    }

    /// Finalizer token recorded at provisioning time.
    #[must_use]
    pub fn finalizer(&self) -> Option<&str> {
        self.options.get(params::FINALIZER).map(String::as_str)
    }

    /// Cluster name recorded at provisioning time.
    #[must_use]
    pub fn cluster_name(&self) -> Option<&str> {
        self.options.get(params::CLUSTER_NAME).map(String::as_str)
    }

    /// Credential secret as a store reference.
    #[must_use]
    pub fn secret(&self) -> SecretRef {
        SecretRef::from(&self.secret_ref)
    }
}
