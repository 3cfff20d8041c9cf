//! Test support utilities shared across unit and integration tests.
//!
//! Every fake records the calls it receives and can be told to fail, so
//! lifecycle tests run without a storage cluster, root privileges, or the
//! ploop tools.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::fs;
use crate::mount::{ClusterMounter, MountEntry, MountOpError, MountLookup};
use crate::secret::{
    CLUSTER_NAME_KEY, CLUSTER_PASSWORD_KEY, ClusterCredentials, FinalizerPatch, Secret,
    SecretRef, SecretStore, StoreError, StoreFuture,
};
use crate::volume::{AttributeSetter, DESCRIPTOR_FILE, PloopDriver};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|err| panic!("test double state poisoned: {err}"))
}

fn simulated_failure(command: String, message: &str) -> CommandError {
    CommandError::Failed {
        command,
        status: Some(1),
        status_text: String::from("1"),
        stderr: message.to_owned(),
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Text written to standard input, if any.
    pub input: Option<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len().saturating_add(1));
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn respond(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            input: input.map(str::to_owned),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.respond(program, args, None)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &str,
    ) -> Result<CommandOutput, CommandError> {
        self.respond(program, args, Some(input))
    }
}

#[derive(Debug, Default)]
struct MountTableState {
    entries: Vec<MountEntry>,
    read_failure: Option<String>,
}

/// In-memory mount table shared between a lookup and [`RecordingMounter`].
#[derive(Clone, Debug, Default)]
pub struct FakeMountTable {
    state: Arc<Mutex<MountTableState>>,
}

impl FakeMountTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mount entry.
    pub fn push(&self, entry: MountEntry) {
        locked(&self.state).entries.push(entry);
    }

    /// Returns a snapshot of the current entries.
    #[must_use]
    pub fn entries(&self) -> Vec<MountEntry> {
        locked(&self.state).entries.clone()
    }

    /// Makes subsequent reads fail with `message`.
    pub fn fail_reads(&self, message: impl Into<String>) {
        locked(&self.state).read_failure = Some(message.into());
    }
}

impl MountLookup for FakeMountTable {
    fn mounts(&self) -> io::Result<Vec<MountEntry>> {
        let state = locked(&self.state);
        match &state.read_failure {
            Some(message) => Err(io::Error::other(message.clone())),
            None => Ok(state.entries.clone()),
        }
    }
}

/// Call observed by [`RecordingMounter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MounterCall {
    /// `authenticate` for the named cluster.
    Authenticate {
        /// Cluster name.
        cluster: String,
    },
    /// `mount` of a cluster at a target.
    Mount {
        /// Cluster name.
        cluster: String,
        /// Mount target.
        target: Utf8PathBuf,
    },
    /// `bind_mount` from a source onto a target.
    Bind {
        /// Existing mount point.
        source: Utf8PathBuf,
        /// Bind target.
        target: Utf8PathBuf,
    },
}

#[derive(Debug, Default)]
struct MounterState {
    calls: Vec<MounterCall>,
    auth_failure: Option<String>,
    mount_failure: Option<String>,
    lose_mount_race: bool,
}

/// Cluster mounter that records calls and updates a [`FakeMountTable`].
#[derive(Clone, Debug)]
pub struct RecordingMounter {
    table: FakeMountTable,
    state: Arc<Mutex<MounterState>>,
}

impl RecordingMounter {
    /// Creates a mounter that publishes successful mounts to `table`.
    #[must_use]
    pub fn new(table: FakeMountTable) -> Self {
        Self {
            table,
            state: Arc::new(Mutex::new(MounterState::default())),
        }
    }

    /// Returns the calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MounterCall> {
        locked(&self.state).calls.clone()
    }

    /// Number of `mount` calls received.
    #[must_use]
    pub fn mount_count(&self) -> usize {
        locked(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, MounterCall::Mount { .. }))
            .count()
    }

    /// Makes `authenticate` fail with `message`.
    pub fn fail_authentication(&self, message: impl Into<String>) {
        locked(&self.state).auth_failure = Some(message.into());
    }

    /// Makes `mount` and `bind_mount` fail with `message`.
    pub fn fail_mount(&self, message: impl Into<String>) {
        locked(&self.state).mount_failure = Some(message.into());
    }

    /// Simulates another process mounting the cluster first: the mount
    /// appears in the table but the call reports failure.
    pub fn lose_mount_race(&self) {
        locked(&self.state).lose_mount_race = true;
    }

    fn finish_mount(&self, cluster: &str, target: &Utf8Path) -> Result<(), MountOpError> {
        let (failure, race) = {
            let state = locked(&self.state);
            (state.mount_failure.clone(), state.lose_mount_race)
        };
        if let Some(message) = failure {
            return Err(MountOpError::Syscall {
                operation: String::from("mount"),
                message,
            });
        }
        self.table.push(MountEntry::vstorage(cluster, target));
        if race {
            return Err(MountOpError::Syscall {
                operation: String::from("mount"),
                message: String::from("device or resource busy"),
            });
        }
        Ok(())
    }
}

impl ClusterMounter for RecordingMounter {
    fn authenticate(&self, credentials: &ClusterCredentials) -> Result<(), MountOpError> {
        let mut state = locked(&self.state);
        state.calls.push(MounterCall::Authenticate {
            cluster: credentials.cluster_name.clone(),
        });
        match &state.auth_failure {
            Some(message) => Err(MountOpError::Command(simulated_failure(
                format!("vstorage -c {} auth-node -P", credentials.cluster_name),
                message,
            ))),
            None => Ok(()),
        }
    }

    fn mount(&self, cluster: &str, target: &Utf8Path) -> Result<(), MountOpError> {
        locked(&self.state).calls.push(MounterCall::Mount {
            cluster: cluster.to_owned(),
            target: target.to_path_buf(),
        });
        self.finish_mount(cluster, target)
    }

    fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<(), MountOpError> {
        locked(&self.state).calls.push(MounterCall::Bind {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        });
        let cluster = self
            .table
            .entries()
            .into_iter()
            .find(|entry| entry.mount_point == source)
            .and_then(|entry| entry.vstorage_cluster().map(str::to_owned))
            .ok_or_else(|| MountOpError::Syscall {
                operation: String::from("bind mount"),
                message: format!("{source} is not mounted"),
            })?;
        self.finish_mount(&cluster, target)
    }
}

#[derive(Debug, Default)]
struct PloopState {
    created: Vec<(Utf8PathBuf, u64)>,
    deleted: Vec<Utf8PathBuf>,
    create_failure: Option<String>,
    delete_failure: Option<String>,
}

/// Ploop driver that materialises volumes as plain directories.
///
/// `create` writes the descriptor file and the delta image; `delete`
/// removes the volume directory.
#[derive(Clone, Debug, Default)]
pub struct FakePloop {
    state: Arc<Mutex<PloopState>>,
}

impl FakePloop {
    /// Creates a driver with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Volume directories and sizes passed to `create`.
    #[must_use]
    pub fn created(&self) -> Vec<(Utf8PathBuf, u64)> {
        locked(&self.state).created.clone()
    }

    /// Volume directories passed to `delete`.
    #[must_use]
    pub fn deleted(&self) -> Vec<Utf8PathBuf> {
        locked(&self.state).deleted.clone()
    }

    /// Makes `create` fail after leaving a partial directory behind.
    pub fn fail_create(&self, message: impl Into<String>) {
        locked(&self.state).create_failure = Some(message.into());
    }

    /// Makes `delete` fail.
    pub fn fail_delete(&self, message: impl Into<String>) {
        locked(&self.state).delete_failure = Some(message.into());
    }
}

impl PloopDriver for FakePloop {
    fn create(
        &self,
        volume_dir: &Utf8Path,
        size_kib: u64,
        image: &Utf8Path,
    ) -> Result<(), CommandError> {
        let failure = {
            let mut state = locked(&self.state);
            state.created.push((volume_dir.to_path_buf(), size_kib));
            state.create_failure.clone()
        };
        let io_failure = |err: io::Error| {
            simulated_failure(
                format!("ploop volume create {volume_dir}"),
                &err.to_string(),
            )
        };

        fs::create_dir_all(volume_dir).map_err(io_failure)?;
        if let Some(message) = failure {
            return Err(simulated_failure(
                format!("ploop volume create {volume_dir}"),
                &message,
            ));
        }
        fs::write(
            &volume_dir.join(DESCRIPTOR_FILE),
            format!("<size>{size_kib}</size>"),
        )
        .map_err(io_failure)?;
        fs::write(image, b"delta").map_err(io_failure)
    }

    fn delete(&self, volume_dir: &Utf8Path) -> Result<(), CommandError> {
        let failure = {
            let mut state = locked(&self.state);
            state.deleted.push(volume_dir.to_path_buf());
            state.delete_failure.clone()
        };
        if let Some(message) = failure {
            return Err(simulated_failure(
                format!("ploop volume delete {volume_dir}"),
                &message,
            ));
        }
        fs::remove_tree(volume_dir).map(|_| ()).map_err(|err| {
            simulated_failure(
                format!("ploop volume delete {volume_dir}"),
                &err.to_string(),
            )
        })
    }
}

#[derive(Debug, Default)]
struct AttributeState {
    applied: Vec<(Utf8PathBuf, String, String)>,
    failing: BTreeSet<String>,
}

/// Attribute setter that records calls and fails on selected attributes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedAttributes {
    state: Arc<Mutex<AttributeState>>,
}

impl ScriptedAttributes {
    /// Creates a setter that accepts every attribute.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the named attribute (for example `tier`) fail.
    pub fn fail_on(&self, attribute: impl Into<String>) {
        locked(&self.state).failing.insert(attribute.into());
    }

    /// `(path, attribute, value)` triples applied successfully.
    #[must_use]
    pub fn applied(&self) -> Vec<(Utf8PathBuf, String, String)> {
        locked(&self.state).applied.clone()
    }
}

impl AttributeSetter for ScriptedAttributes {
    fn set_attribute(
        &self,
        path: &Utf8Path,
        attribute: &str,
        value: &str,
    ) -> Result<(), CommandError> {
        let mut state = locked(&self.state);
        if state.failing.contains(attribute) {
            return Err(simulated_failure(
                format!("vstorage set-attr -R {path} {attribute}={value}"),
                "attribute rejected",
            ));
        }
        state
            .applied
            .push((path.to_path_buf(), attribute.to_owned(), value.to_owned()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SecretState {
    secrets: BTreeMap<SecretRef, Secret>,
    patches: Vec<FinalizerPatch>,
    patch_failure: Option<String>,
}

/// In-memory secret store.
#[derive(Clone, Debug, Default)]
pub struct MemorySecretStore {
    state: Arc<Mutex<SecretState>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret holding the given cluster credentials.
    pub fn insert_credentials(&self, reference: &SecretRef, cluster: &str, password: &str) {
        let secret = Secret {
            reference: reference.clone(),
            data: BTreeMap::from([
                (CLUSTER_NAME_KEY.to_owned(), cluster.as_bytes().to_vec()),
                (CLUSTER_PASSWORD_KEY.to_owned(), password.as_bytes().to_vec()),
            ]),
            finalizers: Vec::new(),
        };
        locked(&self.state).secrets.insert(reference.clone(), secret);
    }

    /// Removes a secret.
    pub fn remove(&self, reference: &SecretRef) {
        locked(&self.state).secrets.remove(reference);
    }

    /// Finalizers currently on the secret; empty when it is absent.
    #[must_use]
    pub fn finalizers(&self, reference: &SecretRef) -> Vec<String> {
        locked(&self.state)
            .secrets
            .get(reference)
            .map(|secret| secret.finalizers.clone())
            .unwrap_or_default()
    }

    /// Number of patches applied successfully.
    #[must_use]
    pub fn patch_count(&self) -> usize {
        locked(&self.state).patches.len()
    }

    /// Patches applied successfully, in order.
    #[must_use]
    pub fn patches(&self) -> Vec<FinalizerPatch> {
        locked(&self.state).patches.clone()
    }

    /// Makes the next patch fail with `message`.
    pub fn fail_next_patch(&self, message: impl Into<String>) {
        locked(&self.state).patch_failure = Some(message.into());
    }
}

impl SecretStore for MemorySecretStore {
    fn get<'a>(&'a self, secret: &'a SecretRef) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            locked(&self.state)
                .secrets
                .get(secret)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    secret: secret.to_string(),
                })
        })
    }

    fn patch<'a>(
        &'a self,
        secret: &'a SecretRef,
        patch: &'a FinalizerPatch,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            if let Some(message) = state.patch_failure.take() {
                return Err(StoreError::Rejected {
                    secret: secret.to_string(),
                    message,
                });
            }
            let stored = state
                .secrets
                .get_mut(secret)
                .ok_or_else(|| StoreError::NotFound {
                    secret: secret.to_string(),
                })?;
            patch.apply(&mut stored.finalizers);
            state.patches.push(patch.clone());
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
