use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisioningWorld, world};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Provision a tiered volume end to end"
)]
fn scenario_end_to_end(world: ProvisioningWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Retrying a provision does not duplicate work"
)]
fn scenario_retry(world: ProvisioningWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "A rejected attribute rolls the volume back"
)]
fn scenario_attribute_rollback(world: ProvisioningWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "An unparseable size is rejected before any side effect"
)]
fn scenario_bad_size(world: ProvisioningWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Deleting a provisioned volume releases the credentials"
)]
fn scenario_delete(world: ProvisioningWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "A handle owned by another provisioner is left alone"
)]
fn scenario_foreign_owner(world: ProvisioningWorld) {
    let _ = world;
}
