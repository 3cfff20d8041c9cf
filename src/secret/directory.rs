//! File-backed secret store used by the operator CLI.
//!
//! Each secret is a JSON document at `<root>/<namespace>/<name>.json`:
//!
//! ```json
//! {"data": {"clusterName": "c1", "clusterPassword": "pw"}, "finalizers": []}
//! ```

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{FinalizerPatch, Secret, SecretRef, SecretStore, StoreError, StoreFuture};
use crate::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
struct SecretDocument {
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    finalizers: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Secret store reading JSON documents from a directory tree.
#[derive(Clone, Debug)]
pub struct DirectorySecretStore {
    root: Utf8PathBuf,
}

impl DirectorySecretStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the document backing `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] when the namespace or name would
    /// escape the store root.
    pub fn document_path(&self, secret: &SecretRef) -> Result<Utf8PathBuf, StoreError> {
        for segment in [&secret.namespace, &secret.name] {
            if !is_plain_segment(segment) {
                return Err(StoreError::Rejected {
                    secret: secret.to_string(),
                    message: format!("{segment:?} is not a valid path segment"),
                });
            }
        }
        Ok(self
            .root
            .join(&secret.namespace)
            .join(format!("{}.json", secret.name)))
    }

    fn load(&self, secret: &SecretRef) -> Result<(Utf8PathBuf, SecretDocument), StoreError> {
        let path = self.document_path(secret)?;
        let contents = fs::read_to_string(&path).map_err(|err| io_error(secret, &err))?;
        let document = serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            secret: secret.to_string(),
            message: err.to_string(),
        })?;
        Ok((path, document))
    }

    fn store(
        secret: &SecretRef,
        path: &Utf8Path,
        document: &SecretDocument,
    ) -> Result<(), StoreError> {
        let rendered =
            serde_json::to_string_pretty(document).map_err(|err| StoreError::Parse {
                secret: secret.to_string(),
                message: err.to_string(),
            })?;
        fs::write(path, rendered).map_err(|err| io_error(secret, &err))
    }
}

impl SecretStore for DirectorySecretStore {
    fn get<'a>(&'a self, secret: &'a SecretRef) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let (_, document) = self.load(secret)?;
            Ok(Secret {
                reference: secret.clone(),
                data: document
                    .data
                    .into_iter()
                    .map(|(key, value)| (key, value.into_bytes()))
                    .collect(),
                finalizers: document.finalizers,
            })
        })
    }

    fn patch<'a>(
        &'a self,
        secret: &'a SecretRef,
        patch: &'a FinalizerPatch,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let (path, mut document) = self.load(secret)?;
            patch.apply(&mut document.finalizers);
            Self::store(secret, &path, &document)?;
            debug!(
                secret = %secret,
                patch = %patch.to_strategic_merge_patch(),
                "applied finalizer patch"
            );
            Ok(())
        })
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

fn io_error(secret: &SecretRef, err: &io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound {
            secret: secret.to_string(),
        }
    } else {
        StoreError::Io {
            secret: secret.to_string(),
            message: err.to_string(),
        }
    }
}
