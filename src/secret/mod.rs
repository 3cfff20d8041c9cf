//! Credential store boundary: secrets holding cluster credentials and the
//! finalizer list used to track volume obligations.

mod directory;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};
use thiserror::Error;

use crate::error::ProvisionError;

pub use directory::DirectorySecretStore;

/// Data key holding the storage cluster name.
pub const CLUSTER_NAME_KEY: &str = "clusterName";
/// Data key holding the storage cluster password.
pub const CLUSTER_PASSWORD_KEY: &str = "clusterPassword";

/// Boxed future returned by [`SecretStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Namespaced reference to a secret.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecretRef {
    /// Namespace holding the secret.
    pub namespace: String,
    /// Secret name.
    pub name: String,
}

impl SecretRef {
    /// Builds a reference from its parts.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Snapshot of a secret as read from the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Secret {
    /// Reference the secret was read from.
    pub reference: SecretRef,
    /// Opaque data entries.
    pub data: BTreeMap<String, Vec<u8>>,
    /// Ordered finalizer tokens.
    pub finalizers: Vec<String>,
}

impl Secret {
    /// Extracts the cluster credentials carried by the secret.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] when `clusterName` or
    /// `clusterPassword` is missing or is not UTF-8.
    pub fn credentials(&self) -> Result<ClusterCredentials, ProvisionError> {
        let cluster_name = self.text(CLUSTER_NAME_KEY)?;
        if cluster_name.trim().is_empty() {
            return Err(ProvisionError::validation(
                CLUSTER_NAME_KEY,
                format!("secret {} has an empty cluster name", self.reference),
            ));
        }
        Ok(ClusterCredentials {
            cluster_name: cluster_name.trim().to_owned(),
            password: self.text(CLUSTER_PASSWORD_KEY)?,
        })
    }

    /// Returns `true` when `token` is present in the finalizer list.
    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers.iter().any(|existing| existing == token)
    }

    fn text(&self, key: &str) -> Result<String, ProvisionError> {
        let raw = self.data.get(key).ok_or_else(|| {
            ProvisionError::validation(key, format!("secret {} has no {key} entry", self.reference))
        })?;
        String::from_utf8(raw.clone()).map_err(|_| {
            ProvisionError::validation(key, format!("secret {} {key} is not UTF-8", self.reference))
        })
    }
}

/// Name and password of a storage cluster.
#[derive(Clone, Eq, PartialEq)]
pub struct ClusterCredentials {
    /// Cluster name as known to the vstorage tooling.
    pub cluster_name: String,
    /// Password used to register this node with the cluster.
    pub password: String,
}

impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("cluster_name", &self.cluster_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Differential change to a secret's finalizer list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FinalizerPatch {
    /// Appends `token`. `order` is the complete list after the change.
    Add {
        /// Token being added.
        token: String,
        /// Resulting finalizer order.
        order: Vec<String>,
    },
    /// Removes `token` wherever it appears.
    Remove {
        /// Token being removed.
        token: String,
    },
}

impl FinalizerPatch {
    /// Builds an add patch against the current finalizer list.
    #[must_use]
    pub fn add(current: &[String], token: impl Into<String>) -> Self {
        let token_value = token.into();
        let mut order = current.to_vec();
        if !order.contains(&token_value) {
            order.push(token_value.clone());
        }
        Self::Add {
            token: token_value,
            order,
        }
    }

    /// Builds a removal patch.
    #[must_use]
    pub fn remove(token: impl Into<String>) -> Self {
        Self::Remove {
            token: token.into(),
        }
    }

    /// Renders the minimal strategic-merge patch document.
    ///
    /// # Examples
    ///
    /// ```
    /// # use vstorage_provisioner::secret::FinalizerPatch;
    /// let patch = FinalizerPatch::remove("virtuozzo.com/abc-pv");
    /// assert_eq!(
    ///     patch.to_strategic_merge_patch().to_string(),
    ///     r#"{"metadata":{"$deleteFromPrimitiveList/finalizers":["virtuozzo.com/abc-pv"]}}"#
    /// );
    /// ```
    #[must_use]
    pub fn to_strategic_merge_patch(&self) -> Value {
        match self {
            Self::Add { token, order } => json!({
                "metadata": {
                    "$setElementOrder/finalizers": order,
                    "finalizers": [token],
                }
            }),
            Self::Remove { token } => json!({
                "metadata": {
                    "$deleteFromPrimitiveList/finalizers": [token],
                }
            }),
        }
    }

    /// Applies the patch to a finalizer list, leaving other entries in place.
    pub fn apply(&self, finalizers: &mut Vec<String>) {
        match self {
            Self::Add { token, .. } => {
                if !finalizers.contains(token) {
                    finalizers.push(token.clone());
                }
            }
            Self::Remove { token } => finalizers.retain(|existing| existing != token),
        }
    }
}

/// Errors raised by secret stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the secret does not exist.
    #[error("secret {secret} not found")]
    NotFound {
        /// Secret reference rendered as `namespace/name`.
        secret: String,
    },
    /// Raised when the backing storage cannot be accessed.
    #[error("failed to access secret {secret}: {message}")]
    Io {
        /// Secret reference rendered as `namespace/name`.
        secret: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the stored document is malformed.
    #[error("failed to parse secret {secret}: {message}")]
    Parse {
        /// Secret reference rendered as `namespace/name`.
        secret: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the store refuses a patch.
    #[error("secret {secret} rejected the patch: {message}")]
    Rejected {
        /// Secret reference rendered as `namespace/name`.
        secret: String,
        /// Reason given by the store.
        message: String,
    },
}

/// External credential store.
pub trait SecretStore {
    /// Reads a secret.
    fn get<'a>(&'a self, secret: &'a SecretRef) -> StoreFuture<'a, Secret>;

    /// Applies a finalizer patch to a secret.
    fn patch<'a>(&'a self, secret: &'a SecretRef, patch: &'a FinalizerPatch)
    -> StoreFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn secret(data: &[(&str, &[u8])]) -> Secret {
        Secret {
            reference: SecretRef::new("default", "vz"),
            data: data
                .iter()
                .map(|(key, value)| ((*key).to_owned(), value.to_vec()))
                .collect(),
            finalizers: Vec::new(),
        }
    }

    #[rstest]
    fn credentials_require_both_entries() {
        let complete = secret(&[("clusterName", b"c1"), ("clusterPassword", b"pw")]);
        let creds = complete
            .credentials()
            .unwrap_or_else(|err| panic!("credentials: {err}"));
        assert_eq!(creds.cluster_name, "c1");
        assert_eq!(creds.password, "pw");

        let err = secret(&[("clusterName", b"c1")])
            .credentials()
            .expect_err("password missing");
        assert!(
            matches!(err, ProvisionError::Validation { ref field, .. } if field == "clusterPassword")
        );
    }

    #[rstest]
    fn credentials_reject_non_utf8() {
        let err = secret(&[("clusterName", &[0xff, 0xfe]), ("clusterPassword", b"pw")])
            .credentials()
            .expect_err("invalid utf8");
        assert!(err.is_validation());
    }

    #[rstest]
    fn debug_output_redacts_password() {
        let creds = ClusterCredentials {
            cluster_name: String::from("c1"),
            password: String::from("hunter2"),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"), "rendered: {rendered}");
        assert!(rendered.contains("c1"));
    }

    #[rstest]
    fn add_patch_sets_element_order() {
        let patch = FinalizerPatch::add(&[String::from("other")], "virtuozzo.com/u1-pv");
        assert_eq!(
            patch.to_strategic_merge_patch(),
            json!({
                "metadata": {
                    "$setElementOrder/finalizers": ["other", "virtuozzo.com/u1-pv"],
                    "finalizers": ["virtuozzo.com/u1-pv"],
                }
            })
        );
    }

    #[rstest]
    fn apply_keeps_unrelated_finalizers() {
        let mut finalizers = vec![String::from("a"), String::from("b")];
        FinalizerPatch::add(&finalizers, "b").apply(&mut finalizers);
        assert_eq!(finalizers, vec![String::from("a"), String::from("b")]);

        FinalizerPatch::remove("a").apply(&mut finalizers);
        assert_eq!(finalizers, vec![String::from("b")]);
    }
}
