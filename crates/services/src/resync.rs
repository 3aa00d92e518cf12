use std::sync::{Arc, Mutex};

use storage::Resync;
use studypact_core::model::UserId;

use crate::auth::{AuthSession, IdentitySubscription};

/// Keeps every user-scoped store's view aligned with the active identity.
///
/// One subscription, established at application startup and torn down when
/// the coordinator is dropped. Login, logout, and account switches all funnel
/// through the same resync path; repeated notifications for the same user are
/// deduplicated.
pub struct ResyncCoordinator {
    _subscription: IdentitySubscription,
}

impl ResyncCoordinator {
    /// Wire the stores to the auth session's identity stream.
    ///
    /// Performs an initial resync so rehydrated stores derive their view
    /// before the first read.
    #[must_use]
    pub fn start(auth: &AuthSession, stores: Vec<Arc<dyn Resync>>) -> Self {
        let current = auth.user_id();
        for store in &stores {
            store.resync(current.as_ref());
        }

        let last_seen: Arc<Mutex<Option<UserId>>> = Arc::new(Mutex::new(current));
        let subscription = auth.subscribe(move |identity| {
            let uid = identity.map(|i| i.user_id.clone());
            let Ok(mut seen) = last_seen.lock() else {
                return;
            };
            if *seen != uid {
                *seen = uid.clone();
                for store in &stores {
                    store.resync(uid.as_ref());
                }
            }
        });

        Self {
            _subscription: subscription,
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{MemoryBlobStore, ScopedStore};
    use studypact_core::model::{Book, BookId, SessionRecord, SessionId, SessionTone, TopicId};
    use studypact_core::time::{fixed_clock, fixed_now};

    fn forge_token(sub: &str) -> String {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let claims = format!(r#"{{"sub":"{sub}","exp":{}}}"#, fixed_now().timestamp() + 3600);
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(claims.as_bytes())
        )
    }

    #[tokio::test]
    async fn identity_changes_re_derive_every_store() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let books: Arc<ScopedStore<Book>> = Arc::new(
            ScopedStore::load("books", Arc::clone(&blobs) as _).await.unwrap(),
        );
        let sessions: Arc<ScopedStore<SessionRecord>> = Arc::new(
            ScopedStore::load("sessions", Arc::clone(&blobs) as _).await.unwrap(),
        );
        let auth = AuthSession::load(Arc::clone(&blobs) as _, fixed_clock())
            .await
            .unwrap();

        let _coordinator = ResyncCoordinator::start(
            &auth,
            vec![Arc::clone(&books) as _, Arc::clone(&sessions) as _],
        );

        auth.set_auth(forge_token("alice"), "alice".into()).await.unwrap();
        books
            .add(Book::new(BookId::new("b1"), "Physics 101", None, fixed_now()))
            .await
            .unwrap();
        sessions
            .add(SessionRecord::new(
                SessionId::new("s1"),
                TopicId::new("t1"),
                "Thermodynamics",
                "Physics 101",
                SessionTone::Neutral,
                30,
                fixed_now(),
            ))
            .await
            .unwrap();
        assert_eq!(books.view().len(), 1);
        assert_eq!(sessions.view().len(), 1);

        // Account switch: both views flip to the new owner's records.
        auth.set_auth(forge_token("bob"), "bob".into()).await.unwrap();
        assert!(books.view().is_empty());
        assert!(sessions.view().is_empty());

        // And back, without any re-adds.
        auth.set_auth(forge_token("alice"), "alice".into()).await.unwrap();
        assert_eq!(books.view().len(), 1);
        assert_eq!(sessions.view().len(), 1);

        auth.logout().await.unwrap();
        assert!(books.view().is_empty());
        assert!(sessions.view().is_empty());
    }

    #[tokio::test]
    async fn startup_resync_restores_the_rehydrated_view() {
        let blobs = Arc::new(MemoryBlobStore::new());
        {
            let auth = AuthSession::load(Arc::clone(&blobs) as _, fixed_clock())
                .await
                .unwrap();
            let books: Arc<ScopedStore<Book>> = Arc::new(
                ScopedStore::load("books", Arc::clone(&blobs) as _).await.unwrap(),
            );
            let _coordinator = ResyncCoordinator::start(&auth, vec![Arc::clone(&books) as _]);
            auth.set_auth(forge_token("alice"), "alice".into()).await.unwrap();
            books
                .add(Book::new(BookId::new("b1"), "Physics 101", None, fixed_now()))
                .await
                .unwrap();
        }

        // Restart: auth and stores rehydrate, the coordinator's initial
        // resync derives the view before anything reads it.
        let auth = AuthSession::load(Arc::clone(&blobs) as _, fixed_clock())
            .await
            .unwrap();
        let books: Arc<ScopedStore<Book>> = Arc::new(
            ScopedStore::load("books", Arc::clone(&blobs) as _).await.unwrap(),
        );
        assert!(books.view().is_empty());

        let _coordinator = ResyncCoordinator::start(&auth, vec![Arc::clone(&books) as _]);
        assert_eq!(books.view().len(), 1);
    }
}
