//! BDD step definitions for the provisioning lifecycle.

use rstest_bdd_macros::{given, then, when};
use vstorage_provisioner::{DeleteOutcome, ProvisionError, SecretRef};

use super::test_helpers::{NAMESPACE, ProvisioningWorld, block_on};

#[given("cluster \"{cluster}\" credentials stored in secret \"{secret}\"")]
fn cluster_credentials(world: &ProvisioningWorld, cluster: String, secret: String) {
    let reference = SecretRef::new(NAMESPACE, secret.as_str());
    world.secrets.insert_credentials(&reference, &cluster, "s3cret");
    world
        .parameters
        .borrow_mut()
        .insert(String::from("secretName"), secret.clone());
    *world.cluster.borrow_mut() = cluster;
    *world.secret_name.borrow_mut() = secret;
}

#[given("a storage class placing volumes under \"{path}\"")]
fn storage_class(world: &ProvisioningWorld, path: String) {
    world
        .parameters
        .borrow_mut()
        .insert(String::from("volumePath"), path);
}

#[given("the storage class sets \"{key}\" to \"{value}\"")]
fn storage_class_parameter(world: &ProvisioningWorld, key: String, value: String) {
    world.parameters.borrow_mut().insert(key, value);
}

#[given("the cluster rejects the \"{attribute}\" attribute")]
fn cluster_rejects_attribute(world: &ProvisioningWorld, attribute: String) {
    world.attributes.fail_on(attribute);
}

#[when("claim \"{claim}\" requests \"{size}\"")]
fn claim_requests(world: &ProvisioningWorld, claim: String, size: String) {
    let engine = world.engine("prov-a");
    let request = world.request(&claim, &size);
    match block_on(engine.provision(&request)) {
        Ok(handle) => {
            *world.handle.borrow_mut() = Some(handle);
            *world.error.borrow_mut() = None;
        }
        Err(err) => *world.error.borrow_mut() = Some(err),
    }
}

#[when("the handle is deleted by \"{identity}\"")]
fn handle_deleted_by(world: &ProvisioningWorld, identity: String) {
    let handle = world
        .handle
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("no handle was provisioned"));
    let engine = world.engine(&identity);
    match block_on(engine.delete(&handle)) {
        Ok(outcome) => *world.deleted.borrow_mut() = Some(outcome),
        Err(err) => *world.error.borrow_mut() = Some(err),
    }
}

#[then("a ploop volume of \"{size_kib}\" KiB exists for claim \"{claim}\"")]
fn volume_exists(world: &ProvisioningWorld, size_kib: u64, claim: String) {
    let dir = world.volume_dir(&claim);
    assert!(dir.is_dir(), "volume directory {dir} should exist");
    assert!(
        world.ploop.created().contains(&(dir.clone(), size_kib)),
        "expected ploop create of {dir} with {size_kib} KiB, got {:?}",
        world.ploop.created()
    );
}

#[then("the \"{attribute}\" attribute was set to \"{value}\"")]
fn attribute_set(world: &ProvisioningWorld, attribute: String, value: String) {
    assert!(
        world
            .attributes
            .applied()
            .iter()
            .any(|(_, applied, applied_value)| *applied == attribute && *applied_value == value),
        "expected {attribute}={value}, got {:?}",
        world.attributes.applied()
    );
}

#[then("the secret carries the finalizer for claim \"{claim}\"")]
fn secret_carries_finalizer(world: &ProvisioningWorld, claim: String) {
    assert_eq!(
        world.secrets.finalizers(&world.secret()),
        vec![ProvisioningWorld::token(&claim)]
    );
}

#[then("the secret carries no finalizers")]
fn secret_carries_no_finalizers(world: &ProvisioningWorld) {
    assert!(world.secrets.finalizers(&world.secret()).is_empty());
}

#[then("the handle is owned by \"{identity}\"")]
fn handle_owned_by(world: &ProvisioningWorld, identity: String) {
    let handle = world.handle.borrow();
    let owner = handle.as_ref().and_then(|found| found.owner());
    assert_eq!(owner, Some(identity.as_str()));
}

#[then("the volume was created \"{count}\" time")]
fn volume_created_times(world: &ProvisioningWorld, count: usize) {
    assert_eq!(world.ploop.created().len(), count);
}

#[then("the cluster was mounted \"{count}\" time")]
fn cluster_mounted_times(world: &ProvisioningWorld, count: usize) {
    assert_eq!(world.mounter.mount_count(), count);
}

#[then("the cluster is still mounted")]
fn cluster_still_mounted(world: &ProvisioningWorld) {
    let mount_point = world.root.join(world.cluster.borrow().as_str());
    assert!(
        world
            .table
            .entries()
            .iter()
            .any(|entry| entry.mount_point == mount_point),
        "{mount_point} should remain mounted, table: {:?}",
        world.table.entries()
    );
}

#[then("provisioning failed on the \"{attribute}\" attribute")]
fn provisioning_failed_on_attribute(world: &ProvisioningWorld, attribute: String) {
    let error = world.error.borrow();
    assert!(
        matches!(
            error.as_ref(),
            Some(ProvisionError::Attribute { attribute: failed, .. }) if *failed == attribute
        ),
        "unexpected outcome: {error:?}"
    );
}

#[then("provisioning failed validation")]
fn provisioning_failed_validation(world: &ProvisioningWorld) {
    let error = world.error.borrow();
    assert!(
        error.as_ref().is_some_and(ProvisionError::is_validation),
        "unexpected outcome: {error:?}"
    );
}

#[then("no volume remains for claim \"{claim}\"")]
fn no_volume_remains(world: &ProvisioningWorld, claim: String) {
    let dir = world.volume_dir(&claim);
    assert!(!dir.exists(), "volume directory {dir} should be gone");
    if let Some(outcome) = *world.deleted.borrow() {
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }
}

#[then("the deletion was skipped as ignorable")]
fn deletion_ignorable(world: &ProvisioningWorld) {
    let error = world.error.borrow();
    assert!(
        error.as_ref().is_some_and(ProvisionError::is_ignorable),
        "unexpected outcome: {error:?}"
    );
    assert!(world.ploop.deleted().is_empty());
}
