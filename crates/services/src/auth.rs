use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use storage::{BlobStore, StorageError};
use studypact_core::Clock;
use studypact_core::model::{Identity, UserId};

use crate::error::AuthError;

const AUTH_BLOB_KEY: &str = "auth";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedAuth {
    token: Option<String>,
    identity: Option<Identity>,
}

type WatcherFn = Box<dyn Fn(Option<&Identity>) + Send + Sync>;
type WatcherList = Mutex<Vec<(u64, WatcherFn)>>;

/// Handle for one identity subscription. Dropping it tears the
/// subscription down.
pub struct IdentitySubscription {
    id: u64,
    watchers: Weak<WatcherList>,
}

impl Drop for IdentitySubscription {
    fn drop(&mut self) {
        if let Some(watchers) = self.watchers.upgrade() {
            if let Ok(mut guard) = watchers.lock() {
                guard.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// Holds the bearer token and the identity decoded from it.
///
/// Decoding is informational only; the server stays authoritative for access
/// control. Identity changes are published synchronously to subscribers so
/// user-scoped state can be re-derived before the next read.
pub struct AuthSession {
    blobs: Arc<dyn BlobStore>,
    clock: Clock,
    state: Mutex<PersistedAuth>,
    watchers: Arc<WatcherList>,
    next_watcher: AtomicU64,
}

impl AuthSession {
    /// Rehydrate the auth state from durable storage.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the stored blob cannot be read or parsed.
    pub async fn load(blobs: Arc<dyn BlobStore>, clock: Clock) -> Result<Self, AuthError> {
        let state = match blobs.read(AUTH_BLOB_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            None => PersistedAuth::default(),
        };

        Ok(Self {
            blobs,
            clock,
            state: Mutex::new(state),
            watchers: Arc::new(Mutex::new(Vec::new())),
            next_watcher: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.token.clone())
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().ok().and_then(|s| s.identity.clone())
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.identity().map(|i| i.user_id)
    }

    /// True iff a token is present and its embedded expiry is still in the
    /// future, evaluated now — a page left open across expiry is caught on
    /// the next check.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        match (&state.token, &state.identity) {
            (Some(_), Some(identity)) => !identity.is_expired(self.clock.now()),
            _ => false,
        }
    }

    /// Adopt a fresh token, decode its claims, persist, and notify
    /// subscribers.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` when the token cannot be decoded or the state
    /// cannot be persisted.
    pub async fn set_auth(
        &self,
        token: impl Into<String>,
        user_id: UserId,
    ) -> Result<Identity, AuthError> {
        let token = token.into();
        let identity = Identity::from_token(&token, Some(user_id))?;

        let snapshot = {
            let mut state = self.lock()?;
            state.token = Some(token);
            state.identity = Some(identity.clone());
            serialize(&state)?
        };
        self.blobs.write(AUTH_BLOB_KEY, &snapshot).await?;

        self.notify(Some(&identity));
        Ok(identity)
    }

    /// Drop the token and identity. A no-op when already signed out.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the cleared state cannot be persisted.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let snapshot = {
            let mut state = self.lock()?;
            if state.token.is_none() && state.identity.is_none() {
                return Ok(());
            }
            state.token = None;
            state.identity = None;
            serialize(&state)?
        };
        self.blobs.write(AUTH_BLOB_KEY, &snapshot).await?;

        self.notify(None);
        Ok(())
    }

    /// Register an identity observer. Fires synchronously on every
    /// `set_auth`/`logout` with the new identity.
    #[must_use]
    pub fn subscribe(
        &self,
        watcher: impl Fn(Option<&Identity>) + Send + Sync + 'static,
    ) -> IdentitySubscription {
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.watchers.lock() {
            guard.push((id, Box::new(watcher)));
        }
        IdentitySubscription {
            id,
            watchers: Arc::downgrade(&self.watchers),
        }
    }

    fn notify(&self, identity: Option<&Identity>) {
        if let Ok(guard) = self.watchers.lock() {
            for (_, watcher) in guard.iter() {
                watcher(identity);
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PersistedAuth>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn serialize(state: &PersistedAuth) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(state).map_err(|e| StorageError::Serialization(e.to_string()))
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use storage::MemoryBlobStore;
    use studypact_core::time::{fixed_clock, fixed_now};

    fn forge_token(exp_offset_secs: i64) -> String {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let claims = format!(
            r#"{{"sub":"u1","email":"a@b.test","exp":{}}}"#,
            fixed_now().timestamp() + exp_offset_secs
        );
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(claims.as_bytes())
        )
    }

    async fn session() -> AuthSession {
        AuthSession::load(Arc::new(MemoryBlobStore::new()), fixed_clock())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn starts_signed_out() {
        let auth = session().await;
        assert!(!auth.is_authenticated());
        assert!(auth.token().is_none());
        assert!(auth.identity().is_none());
    }

    #[tokio::test]
    async fn set_auth_decodes_and_publishes_identity() {
        let auth = session().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = auth.subscribe(move |identity| {
            sink.lock().unwrap().push(identity.map(|i| i.user_id.clone()));
        });

        auth.set_auth(forge_token(3600), UserId::new("u1")).await.unwrap();
        assert!(auth.is_authenticated());
        assert_eq!(auth.user_id(), Some(UserId::new("u1")));

        auth.logout().await.unwrap();
        assert!(!auth.is_authenticated());

        let events = seen.lock().unwrap().clone();
        assert_eq!(events, vec![Some(UserId::new("u1")), None]);
    }

    #[tokio::test]
    async fn expiry_is_checked_at_call_time() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let auth = AuthSession::load(Arc::clone(&blobs) as Arc<dyn BlobStore>, fixed_clock())
            .await
            .unwrap();
        auth.set_auth(forge_token(60), UserId::new("u1")).await.unwrap();
        assert!(auth.is_authenticated());

        // Same stored state, clock past the embedded expiry.
        let later = Clock::fixed(fixed_now() + chrono::Duration::seconds(120));
        let stale = AuthSession::load(blobs as Arc<dyn BlobStore>, later).await.unwrap();
        assert!(stale.token().is_some());
        assert!(!stale.is_authenticated());
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving() {
        let auth = session().await;
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let sub = auth.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        auth.set_auth(forge_token(3600), UserId::new("u1")).await.unwrap();
        drop(sub);
        auth.logout().await.unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn logout_when_signed_out_stays_quiet() {
        let auth = session().await;
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let _sub = auth.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        auth.logout().await.unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn rehydrates_identity_from_storage() {
        let blobs = Arc::new(MemoryBlobStore::new());
        {
            let auth = AuthSession::load(Arc::clone(&blobs) as Arc<dyn BlobStore>, fixed_clock())
                .await
                .unwrap();
            auth.set_auth(forge_token(3600), UserId::new("u1")).await.unwrap();
        }

        let auth = AuthSession::load(blobs as Arc<dyn BlobStore>, fixed_clock())
            .await
            .unwrap();
        assert!(auth.is_authenticated());
        assert_eq!(auth.user_id(), Some(UserId::new("u1")));
        assert_eq!(
            auth.identity().and_then(|i| i.email),
            Some("a@b.test".to_owned())
        );
    }
}
