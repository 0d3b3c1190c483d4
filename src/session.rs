use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use crate::error::Error;
use crate::storage::{ACCESS_TOKEN_KEY, CredentialStore, REFRESH_TOKEN_KEY};
use crate::types::{AccessToken, RefreshToken, TokenPair};

/// Single owner of the stored credential pair.
///
/// Every read and write of the `accessToken` / `refreshToken` keys goes
/// through this type. It also holds the refresh gate: at most one
/// refresh runs at a time per `Session`, and requests that hit 401 while
/// another refresh is in flight wait for it instead of starting their own.
/// Empty stored values read as absent.
///
/// Cloning is cheap and clones share both the store and the gate.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn CredentialStore>,
    refresh_gate: Arc<Mutex<RefreshLedger>>,
    /// Number of refreshes that have completed, successfully or not.
    refresh_epoch: Arc<AtomicU64>,
}

/// Outcome of the most recent refresh, kept behind the refresh gate.
#[derive(Debug, Default)]
struct RefreshLedger {
    last_failure: Option<RefreshFailure>,
}

#[derive(Debug)]
struct RefreshFailure {
    epoch: u64,
    /// Access token that was stored when the refresh failed.
    stale: Option<AccessToken>,
}

/// Exclusive hold on the refresh gate.
pub(crate) struct RefreshGuard<'a> {
    ledger: MutexGuard<'a, RefreshLedger>,
    epoch: &'a AtomicU64,
}

impl RefreshGuard<'_> {
    /// Whether a refresh for `stale` failed after epoch `seen` was observed.
    pub(crate) fn failed_since(&self, seen: u64, stale: Option<&AccessToken>) -> bool {
        self.ledger
            .last_failure
            .as_ref()
            .is_some_and(|failure| failure.epoch > seen && failure.stale.as_ref() == stale)
    }

    pub(crate) fn record_success(&mut self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.ledger.last_failure = None;
    }

    pub(crate) fn record_failure(&mut self, stale: Option<AccessToken>) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.ledger.last_failure = Some(RefreshFailure { epoch, stale });
    }
}

impl Session {
    #[must_use]
    pub fn new(store: impl CredentialStore) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Share an existing store, e.g. one also read by UI code.
    #[must_use]
    pub fn from_arc(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            refresh_gate: Arc::new(Mutex::new(RefreshLedger::default())),
            refresh_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Currently stored access token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn access_token(&self) -> Result<Option<AccessToken>, Error> {
        Ok(self.read(ACCESS_TOKEN_KEY)?.map(AccessToken))
    }

    /// Currently stored refresh token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn refresh_token(&self) -> Result<Option<RefreshToken>, Error> {
        Ok(self.read(REFRESH_TOKEN_KEY)?.map(RefreshToken))
    }

    /// Persist both tokens of a freshly issued pair in one store write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be written.
    pub fn store_pair(&self, pair: &TokenPair) -> Result<(), Error> {
        self.store.set_many(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
        ])
    }

    /// Remove both tokens (logout).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be written.
    pub fn clear(&self) -> Result<(), Error> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)
    }

    /// Wait for exclusive use of the refresh gate.
    pub(crate) async fn lock_refresh(&self) -> RefreshGuard<'_> {
        RefreshGuard {
            ledger: self.refresh_gate.lock().await,
            epoch: &self.refresh_epoch,
        }
    }

    /// Current refresh epoch; compare with [`RefreshGuard::failed_since`].
    pub(crate) fn refresh_epoch(&self) -> u64 {
        self.refresh_epoch.load(Ordering::Acquire)
    }

    fn read(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.store.get(key)?.filter(|value| !value.is_empty()))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
