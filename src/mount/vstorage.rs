//! Cluster mounter backed by the vstorage command-line tools.

use std::ffi::OsString;

use camino::Utf8Path;
use nix::mount::{MsFlags, mount};
use tracing::debug;

use super::{ClusterMounter, MountOpError};
use crate::command::CommandRunner;
use crate::secret::ClusterCredentials;

/// Runs `vstorage auth-node` and `vstorage-mount`, and bind-mounts with
/// `mount(2)`.
#[derive(Clone, Debug)]
pub struct VstorageMounter<R> {
    runner: R,
    vstorage_bin: String,
    vstorage_mount_bin: String,
}

impl<R> VstorageMounter<R>
where
    R: CommandRunner,
{
    /// Creates a mounter invoking the given binaries.
    #[must_use]
    pub fn new(
        runner: R,
        vstorage_bin: impl Into<String>,
        vstorage_mount_bin: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            vstorage_bin: vstorage_bin.into(),
            vstorage_mount_bin: vstorage_mount_bin.into(),
        }
    }
}

impl<R> ClusterMounter for VstorageMounter<R>
where
    R: CommandRunner,
{
    fn authenticate(&self, credentials: &ClusterCredentials) -> Result<(), MountOpError> {
        let args = [
            OsString::from("-c"),
            OsString::from(&credentials.cluster_name),
            OsString::from("auth-node"),
            OsString::from("-P"),
        ];
        debug!(cluster = %credentials.cluster_name, "authenticating node");
        self.runner
            .run_with_input(&self.vstorage_bin, &args, &format!("{}\n", credentials.password))?
            .require_success(&self.vstorage_bin, &args)?;
        Ok(())
    }

    fn mount(&self, cluster: &str, target: &Utf8Path) -> Result<(), MountOpError> {
        let args = [
            OsString::from("-c"),
            OsString::from(cluster),
            OsString::from(target.as_str()),
        ];
        self.runner
            .run(&self.vstorage_mount_bin, &args)?
            .require_success(&self.vstorage_mount_bin, &args)?;
        Ok(())
    }

    fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<(), MountOpError> {
        mount(
            Some(source.as_str()),
            target.as_str(),
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|err| MountOpError::Syscall {
            operation: format!("bind mount {source} -> {target}"),
            message: err.to_string(),
        })
    }
}
