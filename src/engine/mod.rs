//! Provisioning engine: turns claims into volumes and handles back into
//! free space.
//!
//! The engine owns no global state. Each call walks a fixed sequence of
//! stages (see [`ProvisionStage`] and [`DeleteStage`]) and is safe to retry
//! from the start after any failure.

mod request;

use std::fmt;

use tracing::{Span, debug, field, info, instrument, warn};

use crate::command::ProcessCommandRunner;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionError;
use crate::handle::{
    DRIVER, HandleSecretRef, OWNER_ANNOTATION, PROVISIONED_BY_ANNOTATION, SHARE_ANNOTATION,
    VolumeHandle,
};
use crate::mount::{ClusterMounter, MountManager, MountLookup, ProcMountTable, VstorageMounter};
use crate::ownership::{FinalizerTracker, finalizer_token};
use crate::params::{self, UnknownParameterPolicy};
use crate::secret::{ClusterCredentials, DirectorySecretStore, SecretRef, SecretStore};
use crate::volume::{
    AttributeSetter, DeleteOutcome, PloopCli, PloopDriver, VolumeLocation, VolumeSpec,
    VolumeStore, VstorageAttributes,
};

pub use request::{ClaimSpec, LabelSelector, LabelSelectorRequirement, ProvisionRequest};

/// Per-instance settings; there are no process-wide defaults.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineSettings {
    /// Identity written to the owner annotation and checked on delete.
    pub identity: String,
    /// Provisioner name recorded in the provisioned-by annotation.
    pub provisioner_name: String,
    /// Treatment of unrecognised storage-class parameters.
    pub unknown_parameters: UnknownParameterPolicy,
    /// Prefix of generated volume identifiers.
    pub share_prefix: String,
    /// Domain part of finalizer tokens.
    pub finalizer_domain: String,
}

/// Stages of a provisioning call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionStage {
    /// Request received and being validated.
    Requested,
    /// Ensuring the cluster is mounted.
    ClusterMounting,
    /// Creating the volume and applying attributes.
    VolumeCreating,
    /// Adding the finalizer token to the credential secret.
    ObligationRecording,
    /// Handle ready.
    Provisioned,
    /// A late failure removed the volume again.
    RolledBack,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::ClusterMounting => "cluster-mounting",
            Self::VolumeCreating => "volume-creating",
            Self::ObligationRecording => "obligation-recording",
            Self::Provisioned => "provisioned",
            Self::RolledBack => "rolled-back",
        })
    }
}

/// Stages of a deletion call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteStage {
    /// Handle received.
    DeleteRequested,
    /// Owner annotation matches this engine.
    OwnershipVerified,
    /// Ensuring the cluster is mounted.
    ClusterMounting,
    /// Removing the volume.
    VolumeDeleting,
    /// Removing the finalizer token from the credential secret.
    ObligationClearing,
    /// Done.
    Deleted,
}

impl fmt::Display for DeleteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DeleteRequested => "delete-requested",
            Self::OwnershipVerified => "ownership-verified",
            Self::ClusterMounting => "cluster-mounting",
            Self::VolumeDeleting => "volume-deleting",
            Self::ObligationClearing => "obligation-clearing",
            Self::Deleted => "deleted",
        })
    }
}

/// Provisioning engine over its mount, volume, and secret capabilities.
#[derive(Debug)]
pub struct Provisioner<P, C, D, A, S> {
    settings: EngineSettings,
    mounts: MountManager<P, C>,
    volumes: VolumeStore<D, A>,
    finalizers: FinalizerTracker<S>,
}

/// Engine wired to the host tools and the file-backed secret store.
pub type ProductionProvisioner = Provisioner<
    ProcMountTable,
    VstorageMounter<ProcessCommandRunner>,
    PloopCli<ProcessCommandRunner>,
    VstorageAttributes<ProcessCommandRunner>,
    DirectorySecretStore,
>;

impl ProductionProvisioner {
    /// Builds the production engine from validated configuration.
    #[must_use]
    pub fn from_config(config: &ProvisionerConfig) -> Self {
        let runner = ProcessCommandRunner;
        Self::new(
            config.settings(),
            MountManager::new(
                config.mount_root.as_str(),
                ProcMountTable::new(config.mount_table.as_str()),
                VstorageMounter::new(
                    runner,
                    config.vstorage_bin.as_str(),
                    config.vstorage_mount_bin.as_str(),
                ),
            ),
            VolumeStore::new(
                PloopCli::new(runner, config.ploop_bin.as_str()),
                VstorageAttributes::new(runner, config.vstorage_bin.as_str()),
            ),
            FinalizerTracker::new(DirectorySecretStore::new(config.secrets_dir.as_str())),
        )
    }
}

impl<P, C, D, A, S> Provisioner<P, C, D, A, S>
where
    P: MountLookup,
    C: ClusterMounter,
    D: PloopDriver,
    A: AttributeSetter,
    S: SecretStore,
{
    /// Assembles an engine from its parts.
    #[must_use]
    pub const fn new(
        settings: EngineSettings,
        mounts: MountManager<P, C>,
        volumes: VolumeStore<D, A>,
        finalizers: FinalizerTracker<S>,
    ) -> Self {
        Self {
            settings,
            mounts,
            volumes,
            finalizers,
        }
    }

    /// Provisions a volume for `request` and returns its handle.
    ///
    /// Retrying a request that already succeeded returns an equivalent
    /// handle without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] for malformed requests before
    /// any side effect, and the error of the failing stage otherwise. When
    /// the finalizer cannot be recorded the new volume is removed again.
    #[instrument(
        skip_all,
        fields(pv = %request.pv_name, volume_id = field::Empty, cluster = field::Empty)
    )]
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<VolumeHandle, ProvisionError> {
        info!(stage = %ProvisionStage::Requested, "provisioning volume");
        let access_modes = request.access_modes()?;
        let mut options = request.options(self.settings.unknown_parameters)?;

        let claim_uid = request.claim.uid.trim();
        if claim_uid.is_empty() {
            return Err(ProvisionError::validation("claim.uid", "claim uid is required"));
        }
        let secret_name = options
            .remove(params::SECRET_NAME)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                ProvisionError::validation(params::SECRET_NAME, "secretName is required")
            })?;

        let volume_id = format!("{}-{claim_uid}", self.settings.share_prefix);
        let token = finalizer_token(&self.settings.finalizer_domain, claim_uid);
        Span::current().record("volume_id", volume_id.as_str());

        options.remove(params::VOLUME_ID_ALT);
        options.insert(params::VOLUME_ID.to_owned(), volume_id.clone());
        options.insert(params::SIZE.to_owned(), request.claim.requested_size.clone());
        let spec = VolumeSpec::from_options(&options)?;

        let secret = SecretRef::new(request.claim.namespace.as_str(), secret_name.trim());
        let credentials = self.credentials(&secret).await?;
        Span::current().record("cluster", credentials.cluster_name.as_str());
        options.insert(params::CLUSTER_NAME.to_owned(), credentials.cluster_name.clone());
        options.insert(params::FINALIZER.to_owned(), token.clone());

        info!(stage = %ProvisionStage::ClusterMounting, "mounting cluster");
        let mount = self.mounts.ensure_mounted(&credentials)?;

        info!(stage = %ProvisionStage::VolumeCreating, size_kib = spec.size_kib, "creating volume");
        let created = self.volumes.create_volume(&mount, &spec)?;

        info!(stage = %ProvisionStage::ObligationRecording, token = %token, "recording finalizer");
        match self.finalizers.record_obligation(&secret, &token).await {
            Ok(recorded) => debug!(outcome = ?recorded, "finalizer in place"),
            Err(err) if created.replayed => return Err(err),
            Err(err) => {
                warn!(error = %err, "finalizer not recorded; removing new volume");
                let cleanup = self.volumes.delete_volume(&mount, &spec.location).err();
                info!(stage = %ProvisionStage::RolledBack, "provisioning rolled back");
                return Err(err.with_cleanup(cleanup));
            }
        }

        info!(stage = %ProvisionStage::Provisioned, replayed = created.replayed, "volume provisioned");
        Ok(VolumeHandle {
            name: request.pv_name.clone(),
            annotations: [
                (OWNER_ANNOTATION.to_owned(), self.settings.identity.clone()),
                (SHARE_ANNOTATION.to_owned(), volume_id),
                (
                    PROVISIONED_BY_ANNOTATION.to_owned(),
                    self.settings.provisioner_name.clone(),
                ),
            ]
            .into_iter()
            .collect(),
            driver: DRIVER.to_owned(),
            secret_ref: HandleSecretRef::from(&secret),
            options,
            access_modes,
            capacity: request.claim.requested_size.clone(),
            reclaim_policy: request.reclaim_policy,
        })
    }

    /// Deletes the volume behind `handle` and releases its finalizer.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::OwnershipMismatch`] (ignorable) for handles
    /// owned by another engine, [`ProvisionError::Validation`] for handles
    /// missing required annotations or options, and the error of the
    /// failing stage otherwise.
    #[instrument(
        skip_all,
        fields(pv = %handle.name, volume_id = field::Empty, cluster = field::Empty)
    )]
    pub async fn delete(&self, handle: &VolumeHandle) -> Result<DeleteOutcome, ProvisionError> {
        info!(stage = %DeleteStage::DeleteRequested, "deleting volume");
        let owner = handle.owner().ok_or_else(|| {
            ProvisionError::validation(OWNER_ANNOTATION, "handle has no owner annotation")
        })?;
        if owner != self.settings.identity {
            return Err(ProvisionError::OwnershipMismatch {
                expected: self.settings.identity.clone(),
                found: owner.to_owned(),
            });
        }
        info!(stage = %DeleteStage::OwnershipVerified, "ownership verified");

        let mut options = handle.options.clone();
        if !options.contains_key(params::VOLUME_ID) && !options.contains_key(params::VOLUME_ID_ALT)
        {
            let share = handle.share_id().ok_or_else(|| {
                ProvisionError::validation(SHARE_ANNOTATION, "handle has no volume identifier")
            })?;
            options.insert(params::VOLUME_ID.to_owned(), share.to_owned());
        }
        let location = VolumeLocation::from_options(&options)?;
        Span::current().record("volume_id", location.volume_id());

        let secret = handle.secret();
        let credentials = self.credentials(&secret).await?;
        Span::current().record("cluster", credentials.cluster_name.as_str());

        info!(stage = %DeleteStage::ClusterMounting, "mounting cluster");
        let mount = self.mounts.ensure_mounted(&credentials)?;

        info!(stage = %DeleteStage::VolumeDeleting, "removing volume");
        let outcome = self.volumes.delete_volume(&mount, &location)?;

        match handle.finalizer() {
            Some(token) => {
                info!(stage = %DeleteStage::ObligationClearing, token, "clearing finalizer");
                let cleared = self.finalizers.clear_obligation(&secret, token).await?;
                debug!(outcome = ?cleared, "finalizer released");
            }
            None => warn!("handle records no finalizer; secret left untouched"),
        }

        info!(stage = %DeleteStage::Deleted, outcome = ?outcome, "volume deleted");
        Ok(outcome)
    }

    async fn credentials(&self, secret: &SecretRef) -> Result<ClusterCredentials, ProvisionError> {
        self.finalizers.store().get(secret).await?.credentials()
    }
}
