//! Finalizer bookkeeping that ties a credential secret to the volumes
//! provisioned from it.
//!
//! A secret carries one finalizer token per live volume, so the platform
//! cannot garbage-collect credentials that a volume still needs for
//! deletion.

use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::secret::{FinalizerPatch, SecretRef, SecretStore};

/// Result of [`FinalizerTracker::record_obligation`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordOutcome {
    /// The token was added.
    Recorded,
    /// The token was already present; no patch was sent.
    AlreadyPresent,
}

/// Result of [`FinalizerTracker::clear_obligation`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClearOutcome {
    /// The token was removed.
    Cleared,
    /// The token or secret was already gone; no patch was sent.
    AlreadyCleared,
}

/// Builds the finalizer token for a claim.
///
/// # Examples
///
/// ```
/// # use vstorage_provisioner::ownership::finalizer_token;
/// assert_eq!(finalizer_token("virtuozzo.com", "abc"), "virtuozzo.com/abc-pv");
/// ```
#[must_use]
pub fn finalizer_token(domain: &str, claim_uid: &str) -> String {
    format!("{domain}/{claim_uid}-pv")
}

/// Adds and removes finalizer tokens on credential secrets.
#[derive(Clone, Debug)]
pub struct FinalizerTracker<S> {
    store: S,
}

impl<S> FinalizerTracker<S>
where
    S: SecretStore,
{
    /// Wraps a secret store.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying secret store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Ensures `token` is present on `secret`, patching only when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] when the secret is missing and
    /// [`ProvisionError::SecretStore`] when reading or patching fails.
    pub async fn record_obligation(
        &self,
        secret: &SecretRef,
        token: &str,
    ) -> Result<RecordOutcome, ProvisionError> {
        let current = self.store.get(secret).await?;
        if current.has_finalizer(token) {
            debug!(secret = %secret, token, "finalizer already recorded");
            return Ok(RecordOutcome::AlreadyPresent);
        }

        let patch = FinalizerPatch::add(&current.finalizers, token);
        self.store.patch(secret, &patch).await?;
        info!(secret = %secret, token, "recorded finalizer");
        Ok(RecordOutcome::Recorded)
    }

    /// Removes `token` from `secret`. A missing secret or token is reported
    /// as [`ClearOutcome::AlreadyCleared`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SecretStore`] when reading or patching fails.
    pub async fn clear_obligation(
        &self,
        secret: &SecretRef,
        token: &str,
    ) -> Result<ClearOutcome, ProvisionError> {
        let current = match self.store.get(secret).await {
            Ok(found) => found,
            Err(err) => {
                let mapped = ProvisionError::from(err);
                if mapped.is_not_found() {
                    warn!(secret = %secret, token, "secret is gone; nothing to clear");
                    return Ok(ClearOutcome::AlreadyCleared);
                }
                return Err(mapped);
            }
        };

        if !current.has_finalizer(token) {
            warn!(secret = %secret, token, "finalizer not present on secret");
            return Ok(ClearOutcome::AlreadyCleared);
        }

        self.store
            .patch(secret, &FinalizerPatch::remove(token))
            .await?;
        info!(secret = %secret, token, "cleared finalizer");
        Ok(ClearOutcome::Cleared)
    }
}
