//! Unit tests for the cluster mount manager.

use std::thread;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::test_support::{FakeMountTable, MounterCall, RecordingMounter};

struct Harness {
    _tmp: TempDir,
    root: Utf8PathBuf,
    table: FakeMountTable,
    mounter: RecordingMounter,
    manager: MountManager<FakeMountTable, RecordingMounter>,
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("mnt"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let table = FakeMountTable::new();
    let mounter = RecordingMounter::new(table.clone());
    let manager = MountManager::new(root.clone(), table.clone(), mounter.clone());
    Harness {
        _tmp: tmp,
        root,
        table,
        mounter,
        manager,
    }
}

fn credentials(password: &str) -> ClusterCredentials {
    ClusterCredentials {
        cluster_name: String::from("c1"),
        password: password.to_owned(),
    }
}

#[rstest]
fn fresh_mount_authenticates_then_mounts(harness: Harness) {
    let path = harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .unwrap_or_else(|err| panic!("ensure_mounted: {err}"));

    assert_eq!(path, harness.root.join("c1"));
    assert!(path.is_dir(), "mount directory should be created");
    assert_eq!(
        harness.mounter.calls(),
        vec![
            MounterCall::Authenticate {
                cluster: String::from("c1")
            },
            MounterCall::Mount {
                cluster: String::from("c1"),
                target: harness.root.join("c1"),
            },
        ]
    );
}

#[rstest]
fn repeated_calls_mount_once(harness: Harness) {
    let first = harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .unwrap_or_else(|err| panic!("first: {err}"));
    let second = harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .unwrap_or_else(|err| panic!("second: {err}"));

    assert_eq!(first, second);
    assert_eq!(harness.mounter.mount_count(), 1);
    assert_eq!(harness.mounter.calls().len(), 2);
}

#[rstest]
fn existing_mount_at_target_is_reused(harness: Harness) {
    harness
        .table
        .push(MountEntry::vstorage("c1", harness.root.join("c1")));

    harness
        .manager
        .ensure_mounted(&credentials(""))
        .unwrap_or_else(|err| panic!("ensure_mounted: {err}"));

    assert!(harness.mounter.calls().is_empty());
}

#[rstest]
fn system_mount_elsewhere_is_bind_mounted(harness: Harness) {
    harness
        .table
        .push(MountEntry::vstorage("c1", "/vstorage/c1"));

    harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .unwrap_or_else(|err| panic!("ensure_mounted: {err}"));

    assert_eq!(
        harness.mounter.calls(),
        vec![MounterCall::Bind {
            source: Utf8PathBuf::from("/vstorage/c1"),
            target: harness.root.join("c1"),
        }]
    );
}

#[rstest]
fn empty_password_fails_before_any_command(harness: Harness) {
    let err = harness
        .manager
        .ensure_mounted(&credentials(""))
        .expect_err("empty password should be rejected");

    assert!(
        matches!(err, ProvisionError::Authentication { ref cluster, .. } if cluster == "c1"),
        "unexpected error: {err}"
    );
    assert!(harness.mounter.calls().is_empty());
}

#[rstest]
fn rejected_credential_is_an_authentication_error(harness: Harness) {
    harness.mounter.fail_authentication("bad password");

    let err = harness
        .manager
        .ensure_mounted(&credentials("wrong"))
        .expect_err("auth should fail");

    assert!(
        matches!(err, ProvisionError::Authentication { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(harness.mounter.mount_count(), 0);
}

#[rstest]
fn mount_failure_names_cluster_and_path(harness: Harness) {
    harness.mounter.fail_mount("transport endpoint is not connected");

    let err = harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .expect_err("mount should fail");

    let ProvisionError::Mount {
        cluster,
        path,
        message,
    } = err
    else {
        panic!("expected mount error");
    };
    assert_eq!(cluster, "c1");
    assert_eq!(path, harness.root.join("c1").to_string());
    assert!(message.contains("transport endpoint"), "message: {message}");
}

#[rstest]
fn losing_a_mount_race_still_succeeds(harness: Harness) {
    harness.mounter.lose_mount_race();

    let path = harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .unwrap_or_else(|err| panic!("race should resolve to success: {err}"));

    assert_eq!(path, harness.root.join("c1"));
}

#[rstest]
fn concurrent_first_mounts_mount_once(harness: Harness) {
    let manager = &harness.manager;
    thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(move || manager.ensure_mounted(&credentials("pw"))))
            .collect();
        for worker in workers {
            let outcome = worker
                .join()
                .unwrap_or_else(|_| panic!("worker thread panicked"));
            outcome.unwrap_or_else(|err| panic!("ensure_mounted: {err}"));
        }
    });

    assert_eq!(harness.mounter.mount_count(), 1);
}

#[rstest]
#[case("")]
#[case("..")]
#[case("a/b")]
#[case("two words")]
fn unusable_cluster_names_are_rejected(harness: Harness, #[case] name: &str) {
    let err = harness
        .manager
        .ensure_mounted(&ClusterCredentials {
            cluster_name: name.to_owned(),
            password: String::from("pw"),
        })
        .expect_err("name should be rejected");

    assert!(err.is_validation(), "unexpected error: {err}");
    assert!(harness.mounter.calls().is_empty());
}

#[rstest]
fn unreadable_mount_table_is_a_mount_error(harness: Harness) {
    harness.table.fail_reads("permission denied");

    let err = harness
        .manager
        .ensure_mounted(&credentials("pw"))
        .expect_err("mount lookup should fail");

    assert!(
        matches!(err, ProvisionError::Mount { ref message, .. } if message.contains("mount table")),
        "unexpected error: {err}"
    );
}
