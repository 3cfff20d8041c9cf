//! Command-line interface definitions for the `vstorage-provisioner` binary.
//!
//! The build script includes this module to render the manual page, so it
//! depends on nothing but clap.

use clap::Parser;

/// Top-level CLI for the `vstorage-provisioner` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vstorage-provisioner",
    about = "Provision and delete ploop volumes on Virtuozzo Storage clusters",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a volume for a claim and print its handle as JSON.
    #[command(
        name = "provision",
        about = "Provision a volume for a claim and print its handle as JSON"
    )]
    Provision(ProvisionCommand),
    /// Delete the volume described by a handle file.
    #[command(name = "delete", about = "Delete the volume described by a handle file")]
    Delete(DeleteCommand),
}

/// Arguments for the `provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Name of the persistent volume to create.
    #[arg(long, value_name = "PV")]
    pub(crate) name: String,
    /// Claim namespace; the credential secret is looked up here.
    #[arg(long, value_name = "NAMESPACE", default_value = "default")]
    pub(crate) namespace: String,
    /// Claim UID. A random UID is generated when omitted.
    #[arg(long, value_name = "UID")]
    pub(crate) claim_uid: Option<String>,
    /// Requested capacity, for example `10Gi`.
    #[arg(long, value_name = "SIZE")]
    pub(crate) size: String,
    /// Requested access mode (repeatable). Defaults to ReadWriteOnce.
    #[arg(long = "access-mode", value_name = "MODE")]
    pub(crate) access_modes: Vec<String>,
    /// Storage-class parameter as `KEY=VALUE` (repeatable).
    #[arg(short = 'p', long = "parameter", value_name = "KEY=VALUE")]
    pub(crate) parameters: Vec<String>,
    /// Reclaim policy recorded on the handle (`Delete` or `Retain`).
    #[arg(long, value_name = "POLICY", default_value = "Delete")]
    pub(crate) reclaim_policy: String,
}

/// Arguments for the `delete` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteCommand {
    /// Path to a handle JSON document produced by `provision`.
    #[arg(long, value_name = "PATH")]
    pub(crate) handle: String,
}
