//! Shared world for provisioning behaviour scenarios.
//!
//! The world wires the engine to in-memory fakes and a temporary mount
//! root, so scenarios run without a storage cluster or root privileges.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;

use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use vstorage_provisioner::ownership::finalizer_token;
use vstorage_provisioner::test_support::{
    FakeMountTable, FakePloop, MemorySecretStore, RecordingMounter, ScriptedAttributes,
};
use vstorage_provisioner::{
    ClaimSpec, DeleteOutcome, EngineSettings, FinalizerTracker, MountManager, ProvisionError,
    ProvisionRequest, Provisioner, ReclaimPolicy, SecretRef, UnknownParameterPolicy, VolumeHandle,
    VolumeStore,
};

pub const NAMESPACE: &str = "default";
pub const FINALIZER_DOMAIN: &str = "virtuozzo.com";
pub const SHARE_PREFIX: &str = "kubernetes-dynamic-pvc";

pub type TestProvisioner =
    Provisioner<FakeMountTable, RecordingMounter, FakePloop, ScriptedAttributes, MemorySecretStore>;

pub struct ProvisioningWorld {
    pub root: Utf8PathBuf,
    pub table: FakeMountTable,
    pub mounter: RecordingMounter,
    pub ploop: FakePloop,
    pub attributes: ScriptedAttributes,
    pub secrets: MemorySecretStore,
    pub cluster: RefCell<String>,
    pub secret_name: RefCell<String>,
    pub parameters: RefCell<BTreeMap<String, String>>,
    pub handle: RefCell<Option<VolumeHandle>>,
    pub error: RefCell<Option<ProvisionError>>,
    pub deleted: RefCell<Option<DeleteOutcome>>,
    _tmp: TempDir,
}

impl ProvisioningWorld {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("mount root tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("mnt"))
            .unwrap_or_else(|path| panic!("mount root should be utf8: {}", path.display()));
        let table = FakeMountTable::new();
        let mounter = RecordingMounter::new(table.clone());
        Self {
            root,
            table,
            mounter,
            ploop: FakePloop::new(),
            attributes: ScriptedAttributes::new(),
            secrets: MemorySecretStore::new(),
            cluster: RefCell::new(String::new()),
            secret_name: RefCell::new(String::new()),
            parameters: RefCell::new(BTreeMap::new()),
            handle: RefCell::new(None),
            error: RefCell::new(None),
            deleted: RefCell::new(None),
            _tmp: tmp,
        }
    }

    /// Builds an engine with `identity` over the world's shared fakes.
    pub fn engine(&self, identity: &str) -> TestProvisioner {
        Provisioner::new(
            EngineSettings {
                identity: identity.to_owned(),
                provisioner_name: String::from("virtuozzo.com/virtuozzo-storage"),
                unknown_parameters: UnknownParameterPolicy::Ignore,
                share_prefix: SHARE_PREFIX.to_owned(),
                finalizer_domain: FINALIZER_DOMAIN.to_owned(),
            },
            MountManager::new(self.root.clone(), self.table.clone(), self.mounter.clone()),
            VolumeStore::new(self.ploop.clone(), self.attributes.clone()),
            FinalizerTracker::new(self.secrets.clone()),
        )
    }

    pub fn secret(&self) -> SecretRef {
        SecretRef::new(NAMESPACE, self.secret_name.borrow().as_str())
    }

    pub fn request(&self, claim_uid: &str, size: &str) -> ProvisionRequest {
        ProvisionRequest {
            pv_name: format!("pvc-{claim_uid}"),
            claim: ClaimSpec {
                uid: claim_uid.to_owned(),
                namespace: NAMESPACE.to_owned(),
                requested_size: size.to_owned(),
                access_modes: Vec::new(),
                selector: None,
            },
            parameters: self.parameters.borrow().clone(),
            reclaim_policy: ReclaimPolicy::Delete,
        }
    }

    pub fn volume_dir(&self, claim_uid: &str) -> Utf8PathBuf {
        let parameters = self.parameters.borrow();
        let volume_path = parameters
            .get("volumePath")
            .map_or("", String::as_str)
            .trim_start_matches('/');
        self.root
            .join(self.cluster.borrow().as_str())
            .join(volume_path)
            .join(format!("{SHARE_PREFIX}-{claim_uid}"))
    }

    pub fn token(claim_uid: &str) -> String {
        finalizer_token(FINALIZER_DOMAIN, claim_uid)
    }
}

#[fixture]
pub fn world() -> ProvisioningWorld {
    ProvisioningWorld::new()
}

/// Drives an engine future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("tokio runtime: {err}"))
        .block_on(future)
}
