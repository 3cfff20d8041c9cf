//! Provisioning requests and their validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::handle::{AccessMode, ReclaimPolicy};
use crate::params::{self, PlacementKey, UnknownParameterPolicy};

/// Label query attached to a claim.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact-match labels.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements. Not supported by this provisioner.
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// Set-based selector requirement.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LabelSelectorRequirement {
    /// Label key.
    pub key: String,
    /// Operator such as `In` or `Exists`.
    pub operator: String,
    /// Operand values.
    #[serde(default)]
    pub values: Vec<String>,
}

/// The claim a volume is provisioned for.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    /// Unique claim identifier; drives the volume ID and finalizer token.
    pub uid: String,
    /// Namespace of the claim, which also holds the credential secret.
    pub namespace: String,
    /// Requested capacity, for example `10Gi`.
    pub requested_size: String,
    /// Requested access modes. Empty means `ReadWriteOnce`.
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Optional label selector.
    #[serde(default)]
    pub selector: Option<LabelSelector>,
}

/// Input to [`Provisioner::provision`](super::Provisioner::provision).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Name for the persistent volume.
    pub pv_name: String,
    /// Claim being satisfied.
    pub claim: ClaimSpec,
    /// Storage-class parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Reclaim policy recorded on the handle.
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

impl ProvisionRequest {
    /// Access modes granted to the volume.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] unless the claim asks for
    /// exactly `ReadWriteOnce` (or nothing).
    pub fn access_modes(&self) -> Result<Vec<AccessMode>, ProvisionError> {
        match self.claim.access_modes.as_slice() {
            [] | [AccessMode::ReadWriteOnce] => Ok(vec![AccessMode::ReadWriteOnce]),
            other => Err(ProvisionError::validation(
                "accessModes",
                format!(
                    "only ReadWriteOnce is supported, got [{}]",
                    other
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
        }
    }

    /// Storage-class parameters merged with placement labels from the claim
    /// selector, after the unknown-key policy has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] for selectors with
    /// `matchExpressions`, and for unknown keys under
    /// [`UnknownParameterPolicy::Reject`].
    pub fn options(
        &self,
        policy: UnknownParameterPolicy,
    ) -> Result<BTreeMap<String, String>, ProvisionError> {
        let mut options = BTreeMap::new();
        for (key, value) in &self.parameters {
            if params::is_known_parameter(key) {
                options.insert(key.clone(), value.clone());
                continue;
            }
            match policy {
                UnknownParameterPolicy::Reject => {
                    return Err(ProvisionError::validation(
                        key.as_str(),
                        "unknown storage class parameter",
                    ));
                }
                UnknownParameterPolicy::Ignore => {
                    warn!(parameter = %key, "ignoring unknown storage class parameter");
                }
            }
        }

        if let Some(selector) = &self.claim.selector {
            merge_selector(&mut options, selector)?;
        }
        Ok(options)
    }
}

fn merge_selector(
    options: &mut BTreeMap<String, String>,
    selector: &LabelSelector,
) -> Result<(), ProvisionError> {
    if !selector.match_expressions.is_empty() {
        return Err(ProvisionError::validation(
            "selector",
            "matchExpressions are not supported",
        ));
    }
    for (label, value) in &selector.match_labels {
        if PlacementKey::from_parameter(label).is_none() {
            debug!(label = %label, "skipping selector label");
            continue;
        }
        if options.contains_key(label) {
            debug!(label = %label, "storage class already sets placement parameter");
            continue;
        }
        options.insert(label.clone(), value.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn request() -> ProvisionRequest {
        ProvisionRequest {
            pv_name: String::from("pv-1"),
            claim: ClaimSpec {
                uid: String::from("u1"),
                namespace: String::from("default"),
                requested_size: String::from("1Gi"),
                access_modes: Vec::new(),
                selector: None,
            },
            parameters: BTreeMap::from([
                (String::from("volumePath"), String::from("pool/k8s")),
                (String::from("secretName"), String::from("vz")),
                (String::from("vzsTier"), String::from("0")),
            ]),
            reclaim_policy: ReclaimPolicy::Delete,
        }
    }

    #[rstest]
    #[case(vec![], true)]
    #[case(vec![AccessMode::ReadWriteOnce], true)]
    #[case(vec![AccessMode::ReadWriteMany], false)]
    #[case(vec![AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany], false)]
    fn only_read_write_once_is_accepted(
        mut request: ProvisionRequest,
        #[case] modes: Vec<AccessMode>,
        #[case] accepted: bool,
    ) {
        request.claim.access_modes = modes;
        let outcome = request.access_modes();
        assert_eq!(outcome.is_ok(), accepted, "outcome: {outcome:?}");
        if let Ok(granted) = outcome {
            assert_eq!(granted, vec![AccessMode::ReadWriteOnce]);
        }
    }

    #[rstest]
    fn unknown_keys_are_dropped_when_ignored(mut request: ProvisionRequest) {
        request
            .parameters
            .insert(String::from("colour"), String::from("blue"));
        request.parameters.insert(
            String::from("kubernetes.io/fsType"),
            String::from("ext4"),
        );

        let options = request
            .options(UnknownParameterPolicy::Ignore)
            .unwrap_or_else(|err| panic!("options: {err}"));

        assert!(!options.contains_key("colour"));
        assert!(options.contains_key("kubernetes.io/fsType"));
    }

    #[rstest]
    fn unknown_keys_fail_when_rejected(mut request: ProvisionRequest) {
        request
            .parameters
            .insert(String::from("colour"), String::from("blue"));

        let err = request
            .options(UnknownParameterPolicy::Reject)
            .expect_err("unknown key should be rejected");

        assert!(
            matches!(err, ProvisionError::Validation { ref field, .. } if field == "colour"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn selector_labels_fill_unset_placement(mut request: ProvisionRequest) {
        request.claim.selector = Some(LabelSelector {
            match_labels: BTreeMap::from([
                (String::from("vzsReplicas"), String::from("3")),
                (String::from("vzsTier"), String::from("2")),
                (String::from("app"), String::from("db")),
            ]),
            match_expressions: Vec::new(),
        });

        let options = request
            .options(UnknownParameterPolicy::Reject)
            .unwrap_or_else(|err| panic!("options: {err}"));

        assert_eq!(options.get("vzsReplicas").map(String::as_str), Some("3"));
        assert_eq!(options.get("vzsTier").map(String::as_str), Some("0"));
        assert!(!options.contains_key("app"));
    }

    #[rstest]
    fn match_expressions_are_rejected(mut request: ProvisionRequest) {
        request.claim.selector = Some(LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: String::from("zone"),
                operator: String::from("In"),
                values: vec![String::from("a")],
            }],
        });

        let err = request
            .options(UnknownParameterPolicy::Ignore)
            .expect_err("expressions should be rejected");

        assert!(err.is_validation(), "unexpected error: {err}");
    }
}
