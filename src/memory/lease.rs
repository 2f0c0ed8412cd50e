// src/memory/lease.rs — Single writer per session
//
// The lease lives in the database, so it holds across orchestrators sharing
// a store and across processes sharing the file. Dropping the guard releases it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use super::store::Store;
use crate::infra::errors::CadLoopError;

/// Held while a session is being driven.
pub struct SessionLease {
    store: Arc<Mutex<Store>>,
    session_id: String,
    holder: String,
    ttl: Duration,
}

fn lock(store: &Mutex<Store>) -> Result<MutexGuard<'_, Store>, CadLoopError> {
    store
        .lock()
        .map_err(|_| CadLoopError::Other(anyhow::anyhow!("store mutex poisoned")))
}

impl SessionLease {
    /// Claim `session_id`, or fail with `SessionBusy` if another writer holds it.
    pub fn acquire(
        store: Arc<Mutex<Store>>,
        session_id: &str,
        ttl: Duration,
    ) -> Result<Self, CadLoopError> {
        let holder = format!("{}-{}", std::process::id(), Uuid::new_v4());
        lock(&store)?.acquire_lease(session_id, &holder, ttl)?;
        Ok(Self {
            store,
            session_id: session_id.to_string(),
            holder,
            ttl,
        })
    }

    /// Push the expiry out by another TTL. Errors if the lease was lost.
    pub fn renew(&self) -> Result<(), CadLoopError> {
        lock(&self.store)?.renew_lease(&self.session_id, &self.holder, self.ttl)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store.release_lease(&self.session_id, &self.holder) {
            tracing::warn!(session_id = %self.session_id, "failed to release lease: {e}");
        }
    }
}
