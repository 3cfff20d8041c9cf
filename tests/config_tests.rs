//! Integration tests for configuration loading and validation.

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use rstest::{fixture, rstest};
use tempfile::TempDir;
use vstorage_provisioner::config::{DEFAULT_MOUNT_ROOT, DEFAULT_SECRETS_DIR};
use vstorage_provisioner::test_support::EnvGuard;
use vstorage_provisioner::{ConfigError, ProvisionerConfig, UnknownParameterPolicy};

#[fixture]
fn valid_config() -> ProvisionerConfig {
    ProvisionerConfig {
        provisioner_id: String::from("node-a"),
        provisioner_name: String::from("virtuozzo.com/virtuozzo-storage"),
        mount_root: String::from(DEFAULT_MOUNT_ROOT),
        mount_table: String::from("/proc/self/mounts"),
        vstorage_bin: String::from("vstorage"),
        vstorage_mount_bin: String::from("vstorage-mount"),
        ploop_bin: String::from("ploop"),
        secrets_dir: String::from(DEFAULT_SECRETS_DIR),
        share_prefix: String::from("kubernetes-dynamic-pvc"),
        finalizer_domain: String::from("virtuozzo.com"),
        reject_unknown_parameters: false,
    }
}

#[rstest]
#[case::identity(|cfg: &mut ProvisionerConfig| cfg.provisioner_id.clear(), "VZPROV_PROVISIONER_ID", "provisioner_id")]
#[case::mount_root(|cfg: &mut ProvisionerConfig| cfg.mount_root.clear(), "VZPROV_MOUNT_ROOT", "mount_root")]
#[case::ploop(|cfg: &mut ProvisionerConfig| cfg.ploop_bin.clear(), "VZPROV_PLOOP_BIN", "ploop_bin")]
#[case::secrets(|cfg: &mut ProvisionerConfig| cfg.secrets_dir.clear(), "VZPROV_SECRETS_DIR", "secrets_dir")]
#[case::share_prefix(|cfg: &mut ProvisionerConfig| cfg.share_prefix.clear(), "VZPROV_SHARE_PREFIX", "share_prefix")]
fn missing_fields_produce_actionable_errors(
    mut valid_config: ProvisionerConfig,
    #[case] mutate: fn(&mut ProvisionerConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);
    let error = valid_config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(
        message.contains("vstorage-provisioner.toml"),
        "should mention the config file: {message}"
    );
}

#[rstest]
fn finalizer_domain_with_slash_is_rejected(mut valid_config: ProvisionerConfig) {
    valid_config.finalizer_domain = String::from("virtuozzo.com/extra");
    let error = valid_config.validate().expect_err("domain should be rejected");
    assert!(matches!(error, ConfigError::Parse(_)), "unexpected error: {error}");
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("VZPROV_PROVISIONER_ID", "node-env"),
        ("VZPROV_MOUNT_ROOT", "/srv/vz"),
        ("VZPROV_REJECT_UNKNOWN_PARAMETERS", "true"),
    ])
    .await;

    let config = ProvisionerConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load config: {err}"));

    assert_eq!(config.provisioner_id, "node-env");
    assert_eq!(config.mount_root, "/srv/vz");
    assert_eq!(config.ploop_bin, "ploop");
    assert_eq!(config.validate(), Ok(()));
    assert_eq!(
        config.settings().unknown_parameters,
        UnknownParameterPolicy::Reject
    );
}

#[tokio::test]
async fn explicit_config_file_is_loaded() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write(
            "provisioner.toml",
            "provisioner_id = \"node-file\"\nshare_prefix = \"vz-pvc\"\n",
        )
        .unwrap_or_else(|err| panic!("write config: {err}"));
    let path = root.join("provisioner.toml");
    let _guard = EnvGuard::set_vars(&[("VZPROV_CONFIG_PATH", path.as_str())]).await;

    let config = ProvisionerConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load config: {err}"));

    assert_eq!(config.provisioner_id, "node-file");
    assert_eq!(config.settings().share_prefix, "vz-pvc");
    assert_eq!(config.finalizer_domain, "virtuozzo.com");
}
