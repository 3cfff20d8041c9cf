//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineSettings;
use crate::params::UnknownParameterPolicy;

/// Default mount root for cluster mounts.
pub const DEFAULT_MOUNT_ROOT: &str = "/export/virtuozzo-provisioner/mnt";
/// Default directory holding credential documents for the operator CLI.
pub const DEFAULT_SECRETS_DIR: &str = "/etc/vstorage-provisioner/secrets";

/// Provisioner settings merged from defaults, `vstorage-provisioner.toml`,
/// `VZPROV_*` environment variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VZPROV",
    discovery(
        app_name = "vstorage-provisioner",
        env_var = "VZPROV_CONFIG_PATH",
        config_file_name = "vstorage-provisioner.toml",
        dotfile_name = ".vstorage-provisioner.toml",
        project_file_name = "vstorage-provisioner.toml"
    )
)]
pub struct ProvisionerConfig {
    /// Identity recorded on every handle this engine creates. Required.
    #[ortho_config(default = String::new())]
    pub provisioner_id: String,
    /// Provisioner name registered with the orchestration platform.
    #[ortho_config(default = "virtuozzo.com/virtuozzo-storage".to_owned())]
    pub provisioner_name: String,
    /// Directory under which each cluster is mounted.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Mount table consulted to detect live mounts.
    #[ortho_config(default = "/proc/self/mounts".to_owned())]
    pub mount_table: String,
    /// Path to the `vstorage` executable.
    #[ortho_config(default = "vstorage".to_owned())]
    pub vstorage_bin: String,
    /// Path to the `vstorage-mount` executable.
    #[ortho_config(default = "vstorage-mount".to_owned())]
    pub vstorage_mount_bin: String,
    /// Path to the `ploop` executable.
    #[ortho_config(default = "ploop".to_owned())]
    pub ploop_bin: String,
    /// Root of the file-backed credential store.
    #[ortho_config(default = DEFAULT_SECRETS_DIR.to_owned())]
    pub secrets_dir: String,
    /// Prefix of generated volume identifiers.
    #[ortho_config(default = "kubernetes-dynamic-pvc".to_owned())]
    pub share_prefix: String,
    /// Domain part of finalizer tokens.
    #[ortho_config(default = "virtuozzo.com".to_owned())]
    pub finalizer_domain: String,
    /// Fail provisioning on unrecognised storage-class parameters.
    #[ortho_config(default = false)]
    pub reject_unknown_parameters: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ProvisionerConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to vstorage-provisioner.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments. Values still merge
    /// defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("vstorage-provisioner")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that required fields are present and usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// and [`ConfigError::Parse`] when a value cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                self.provisioner_id.as_str(),
                FieldMetadata::new(
                    "provisioner identity",
                    "VZPROV_PROVISIONER_ID",
                    "provisioner_id",
                ),
            ),
            (
                self.mount_root.as_str(),
                FieldMetadata::new("mount root", "VZPROV_MOUNT_ROOT", "mount_root"),
            ),
            (
                self.mount_table.as_str(),
                FieldMetadata::new("mount table", "VZPROV_MOUNT_TABLE", "mount_table"),
            ),
            (
                self.vstorage_bin.as_str(),
                FieldMetadata::new("vstorage binary", "VZPROV_VSTORAGE_BIN", "vstorage_bin"),
            ),
            (
                self.vstorage_mount_bin.as_str(),
                FieldMetadata::new(
                    "vstorage-mount binary",
                    "VZPROV_VSTORAGE_MOUNT_BIN",
                    "vstorage_mount_bin",
                ),
            ),
            (
                self.ploop_bin.as_str(),
                FieldMetadata::new("ploop binary", "VZPROV_PLOOP_BIN", "ploop_bin"),
            ),
            (
                self.secrets_dir.as_str(),
                FieldMetadata::new("secrets directory", "VZPROV_SECRETS_DIR", "secrets_dir"),
            ),
            (
                self.share_prefix.as_str(),
                FieldMetadata::new("share prefix", "VZPROV_SHARE_PREFIX", "share_prefix"),
            ),
            (
                self.finalizer_domain.as_str(),
                FieldMetadata::new(
                    "finalizer domain",
                    "VZPROV_FINALIZER_DOMAIN",
                    "finalizer_domain",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }

        if !self.mount_root.starts_with('/') {
            return Err(ConfigError::Parse(format!(
                "mount_root must be an absolute path, got {:?}",
                self.mount_root
            )));
        }
        if self.finalizer_domain.contains('/') {
            return Err(ConfigError::Parse(format!(
                "finalizer_domain must not contain '/', got {:?}",
                self.finalizer_domain
            )));
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            identity: self.provisioner_id.clone(),
            provisioner_name: self.provisioner_name.clone(),
            unknown_parameters: if self.reject_unknown_parameters {
                UnknownParameterPolicy::Reject
            } else {
                UnknownParameterPolicy::Ignore
            },
            share_prefix: self.share_prefix.clone(),
            finalizer_domain: self.finalizer_domain.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
