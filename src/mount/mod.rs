//! Shared, idempotent mounting of storage clusters.
//!
//! Every cluster is mounted at most once under the mount root, at
//! `<root>/<cluster>`. The manager never unmounts.

mod table;
mod vstorage;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::command::CommandError;
use crate::error::ProvisionError;
use crate::fs;
use crate::secret::ClusterCredentials;

pub use table::{ProcMountTable, parse_mounts};
pub use vstorage::VstorageMounter;

const VSTORAGE_DEVICE_PREFIX: &str = "vstorage://";
const VSTORAGE_FS_PREFIX: &str = "fuse.vstorage";

/// One line of the mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted device or source.
    pub device: String,
    /// Directory the device is mounted on.
    pub mount_point: Utf8PathBuf,
    /// Filesystem type.
    pub fs_type: String,
}

impl MountEntry {
    /// Builds the entry a vstorage mount of `cluster` produces.
    #[must_use]
    pub fn vstorage(cluster: &str, mount_point: impl Into<Utf8PathBuf>) -> Self {
        Self {
            device: format!("{VSTORAGE_DEVICE_PREFIX}{cluster}"),
            mount_point: mount_point.into(),
            fs_type: VSTORAGE_FS_PREFIX.to_owned(),
        }
    }

    /// Cluster served by this entry, when it is a vstorage mount.
    #[must_use]
    pub fn vstorage_cluster(&self) -> Option<&str> {
        if !self.fs_type.starts_with(VSTORAGE_FS_PREFIX) {
            return None;
        }
        self.device.strip_prefix(VSTORAGE_DEVICE_PREFIX)
    }

    fn serves(&self, cluster: &str) -> bool {
        self.vstorage_cluster() == Some(cluster)
    }
}

/// Read-only view of the mounts visible to this process.
pub trait MountLookup {
    /// Lists current mounts. Must not have side effects.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the mount table cannot be read.
    fn mounts(&self) -> io::Result<Vec<MountEntry>>;
}

/// Errors raised by [`ClusterMounter`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountOpError {
    /// Raised when a cluster tool fails.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when a mount system call fails.
    #[error("{operation} failed: {message}")]
    Syscall {
        /// Operation that failed.
        operation: String,
        /// OS error message.
        message: String,
    },
}

/// Mutating cluster operations.
pub trait ClusterMounter {
    /// Registers this node with the cluster using its password.
    ///
    /// # Errors
    ///
    /// Returns [`MountOpError`] when the cluster rejects the credential.
    fn authenticate(&self, credentials: &ClusterCredentials) -> Result<(), MountOpError>;

    /// Mounts `cluster` at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountOpError`] when the mount fails.
    fn mount(&self, cluster: &str, target: &Utf8Path) -> Result<(), MountOpError>;

    /// Bind-mounts an existing mount at `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountOpError`] when the bind fails.
    fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<(), MountOpError>;
}

/// Ensures clusters are mounted under a common root.
#[derive(Debug)]
pub struct MountManager<P, C> {
    root: Utf8PathBuf,
    lookup: P,
    mounter: C,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<P, C> MountManager<P, C>
where
    P: MountLookup,
    C: ClusterMounter,
{
    /// Creates a manager that mounts clusters below `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, lookup: P, mounter: C) -> Self {
        Self {
            root: root.into(),
            lookup,
            mounter,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Local path a cluster is, or will be, mounted at.
    #[must_use]
    pub fn mount_path(&self, cluster: &str) -> Utf8PathBuf {
        self.root.join(cluster)
    }

    /// Returns the local mount path of the cluster, mounting it first when
    /// needed. Safe to call repeatedly and concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] for an unusable cluster name,
    /// [`ProvisionError::Authentication`] when the credential is empty or
    /// rejected, and [`ProvisionError::Mount`] when mounting fails.
    #[instrument(skip_all, fields(cluster = %credentials.cluster_name))]
    pub fn ensure_mounted(
        &self,
        credentials: &ClusterCredentials,
    ) -> Result<Utf8PathBuf, ProvisionError> {
        let cluster = credentials.cluster_name.as_str();
        validate_cluster_name(cluster)?;
        let target = self.mount_path(cluster);

        let lock = self.cluster_lock(cluster);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mounts = self.current_mounts(cluster, &target)?;
        if is_live(&mounts, cluster, &target) {
            debug!(path = %target, "cluster already mounted");
            return Ok(target);
        }

        fs::create_dir_all(&target)
            .map_err(|err| mount_error(cluster, &target, &err.to_string()))?;

        let attempt = mounts
            .iter()
            .find(|entry| entry.serves(cluster))
            .map_or_else(
                || self.mount_fresh(credentials, &target),
                |existing| self.bind_existing(cluster, &existing.mount_point, &target),
            );

        match attempt {
            Ok(()) => {
                info!(path = %target, "cluster mounted");
                Ok(target)
            }
            Err(err) => self.recover_from_race(cluster, target, err),
        }
    }

    fn cluster_lock(&self, cluster: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(cluster.to_owned()).or_default())
    }

    fn current_mounts(&self, cluster: &str, target: &Utf8Path) -> Result<Vec<MountEntry>, ProvisionError> {
        self.lookup.mounts().map_err(|err| {
            mount_error(
                cluster,
                target,
                &format!("failed to read mount table: {err}"),
            )
        })
    }

    fn bind_existing(
        &self,
        cluster: &str,
        source: &Utf8Path,
        target: &Utf8Path,
    ) -> Result<(), ProvisionError> {
        info!(source = %source, path = %target, "bind-mounting existing cluster mount");
        self.mounter
            .bind_mount(source, target)
            .map_err(|err| mount_error(cluster, target, &err.to_string()))
    }

    fn mount_fresh(
        &self,
        credentials: &ClusterCredentials,
        target: &Utf8Path,
    ) -> Result<(), ProvisionError> {
        let cluster = credentials.cluster_name.as_str();
        if credentials.password.is_empty() {
            return Err(ProvisionError::Authentication {
                cluster: cluster.to_owned(),
                message: String::from("cluster password is empty"),
            });
        }

        self.mounter
            .authenticate(credentials)
            .map_err(|err| ProvisionError::Authentication {
                cluster: cluster.to_owned(),
                message: err.to_string(),
            })?;
        self.mounter
            .mount(cluster, target)
            .map_err(|err| mount_error(cluster, target, &err.to_string()))
    }

    fn recover_from_race(
        &self,
        cluster: &str,
        target: Utf8PathBuf,
        err: ProvisionError,
    ) -> Result<Utf8PathBuf, ProvisionError> {
        match self.lookup.mounts() {
            Ok(mounts) if is_live(&mounts, cluster, &target) => {
                warn!(path = %target, error = %err, "mount attempt failed but cluster is mounted");
                Ok(target)
            }
            _ => Err(err),
        }
    }
}

fn is_live(mounts: &[MountEntry], cluster: &str, target: &Utf8Path) -> bool {
    mounts
        .iter()
        .any(|entry| entry.mount_point == target && entry.serves(cluster))
}

fn validate_cluster_name(cluster: &str) -> Result<(), ProvisionError> {
    let usable = !cluster.is_empty()
        && cluster != "."
        && cluster != ".."
        && !cluster.contains(['/', '\0'])
        && !cluster.chars().any(char::is_whitespace);
    if usable {
        Ok(())
    } else {
        Err(ProvisionError::validation(
            "clusterName",
            format!("{cluster:?} cannot be used as a mount directory name"),
        ))
    }
}

fn mount_error(cluster: &str, target: &Utf8Path, message: &str) -> ProvisionError {
    ProvisionError::Mount {
        cluster: cluster.to_owned(),
        path: target.to_string(),
        message: message.to_owned(),
    }
}

#[cfg(test)]
mod tests;
