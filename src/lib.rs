//! Dynamic provisioner for ploop volumes on Virtuozzo Storage clusters.
//!
//! The crate turns volume claims into ploop images inside a mounted
//! vstorage cluster and removes them again when their handles are deleted.
//! Each provisioned volume is tied to the secret holding the cluster
//! credentials through a finalizer token, so the credentials outlive every
//! volume that needs them.
//!
//! The [`engine::Provisioner`] composes four capabilities: the cluster
//! [`mount::MountManager`], the [`volume::VolumeStore`], the
//! [`ownership::FinalizerTracker`], and a [`secret::SecretStore`].

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
mod fs;
pub mod handle;
pub mod mount;
pub mod ownership;
pub mod params;
pub mod secret;
pub mod size;
pub mod test_support;
pub mod volume;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, ProvisionerConfig};
pub use engine::{
    ClaimSpec, DeleteStage, EngineSettings, LabelSelector, ProductionProvisioner,
    ProvisionRequest, ProvisionStage, Provisioner,
};
pub use error::ProvisionError;
pub use handle::{AccessMode, ReclaimPolicy, VolumeHandle};
pub use mount::MountManager;
pub use ownership::FinalizerTracker;
pub use params::UnknownParameterPolicy;
pub use secret::{DirectorySecretStore, SecretRef, SecretStore};
pub use volume::{DeleteOutcome, VolumeStore};
