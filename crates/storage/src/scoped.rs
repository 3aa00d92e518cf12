use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};

use studypact_core::model::{Book, SessionRecord, UserId};

use crate::blob::{BlobStore, StorageError};

/// A record that carries exactly one owner tag.
pub trait Owned: Clone + Send + Sync {
    fn record_id(&self) -> &str;
    fn owner_id(&self) -> &UserId;
    fn set_owner(&mut self, owner: UserId);
}

impl Owned for Book {
    fn record_id(&self) -> &str {
        self.book_id.as_str()
    }

    fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    fn set_owner(&mut self, owner: UserId) {
        self.owner_id = owner;
    }
}

impl Owned for SessionRecord {
    fn record_id(&self) -> &str {
        self.session_id.as_str()
    }

    fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    fn set_owner(&mut self, owner: UserId) {
        self.owner_id = owner;
    }
}

/// The view-recompute entry point used when the active identity changes.
pub trait Resync: Send + Sync {
    fn resync(&self, active: Option<&UserId>);
}

struct ScopedState<R> {
    /// Unscoped, newest-first. The durable source of truth.
    records: Vec<R>,
    active: Option<UserId>,
    /// Subset of `records` owned by `active`. Recomputed, never patched.
    view: Vec<R>,
}

impl<R: Owned> ScopedState<R> {
    fn recompute(&mut self) {
        self.view = match &self.active {
            Some(uid) => self
                .records
                .iter()
                .filter(|r| r.owner_id() == uid)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
    }
}

/// A durable collection partitioned per authenticated user.
///
/// The unscoped record list is persisted as one blob under `key`; the derived
/// view only ever contains records stamped with the active user's id. Every
/// mutation and every rehydration re-derives the view before readers can
/// observe it.
pub struct ScopedStore<R> {
    key: String,
    blobs: Arc<dyn BlobStore>,
    state: Mutex<ScopedState<R>>,
}

impl<R> ScopedStore<R>
where
    R: Owned + Serialize + DeserializeOwned,
{
    /// Rehydrate the store from durable storage.
    ///
    /// The view starts empty; callers resync once the active identity is
    /// known.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the blob cannot be read or parsed.
    pub async fn load(key: impl Into<String>, blobs: Arc<dyn BlobStore>) -> Result<Self, StorageError> {
        let key = key.into();
        let records: Vec<R> = match blobs.read(&key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };

        Ok(Self {
            key,
            blobs,
            state: Mutex::new(ScopedState {
                records,
                active: None,
                view: Vec::new(),
            }),
        })
    }

    /// Stamp the record with the active owner and prepend it. Returns the
    /// record as stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NoActiveUser` when no identity is active, or a
    /// persistence error from the blob store.
    pub async fn add(&self, mut record: R) -> Result<R, StorageError> {
        let snapshot = {
            let mut state = self.lock()?;
            let owner = state.active.clone().ok_or(StorageError::NoActiveUser)?;
            record.set_owner(owner);
            state.records.insert(0, record.clone());
            state.recompute();
            self.serialize(&state)?
        };
        self.blobs.write(&self.key, &snapshot).await?;
        Ok(record)
    }

    /// Merge a patch into the record matching `id`.
    ///
    /// Returns `false` (without persisting) when no record matches.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the updated collection cannot be persisted.
    pub async fn update(
        &self,
        id: &str,
        patch: impl FnOnce(&mut R),
    ) -> Result<bool, StorageError> {
        let snapshot = {
            let mut state = self.lock()?;
            let Some(record) = state.records.iter_mut().find(|r| r.record_id() == id) else {
                return Ok(false);
            };
            patch(record);
            state.recompute();
            self.serialize(&state)?
        };
        self.blobs.write(&self.key, &snapshot).await?;
        Ok(true)
    }

    /// Look up a record in the current view. Other users' records are
    /// unreachable here even when the id matches.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<R> {
        self.state
            .lock()
            .ok()?
            .view
            .iter()
            .find(|r| r.record_id() == id)
            .cloned()
    }

    /// The records owned by the active identity, newest first.
    #[must_use]
    pub fn view(&self) -> Vec<R> {
        self.state.lock().map(|s| s.view.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn active_user(&self) -> Option<UserId> {
        self.state.lock().ok().and_then(|s| s.active.clone())
    }

    /// Swap the active identity and re-derive the view.
    pub fn set_active(&self, active: Option<UserId>) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            state.recompute();
        }
    }

    /// Remove every record owned by the active identity.
    ///
    /// A no-op when unauthenticated.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the shrunken collection cannot be persisted.
    pub async fn clear_for_user(&self) -> Result<(), StorageError> {
        let snapshot = {
            let mut state = self.lock()?;
            let Some(uid) = state.active.clone() else {
                return Ok(());
            };
            state.records.retain(|r| r.owner_id() != &uid);
            state.recompute();
            self.serialize(&state)?
        };
        self.blobs.write(&self.key, &snapshot).await
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ScopedState<R>>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn serialize(&self, state: &ScopedState<R>) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(&state.records).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl<R> Resync for ScopedStore<R>
where
    R: Owned + Serialize + DeserializeOwned,
{
    fn resync(&self, active: Option<&UserId>) {
        self.set_active(active.cloned());
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use studypact_core::model::{SessionId, SessionTone, TopicId};
    use studypact_core::time::fixed_now;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(
            SessionId::new(id),
            TopicId::new("t1"),
            "Thermodynamics",
            "Physics 101",
            SessionTone::Neutral,
            30,
            fixed_now(),
        )
    }

    async fn store() -> ScopedStore<SessionRecord> {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        ScopedStore::load("sessions", blobs).await.unwrap()
    }

    #[tokio::test]
    async fn add_requires_an_active_user() {
        let store = store().await;
        let err = store.add(record("s1")).await.unwrap_err();
        assert!(matches!(err, StorageError::NoActiveUser));
    }

    #[tokio::test]
    async fn views_never_cross_owners() {
        let store = store().await;

        store.set_active(Some(UserId::new("alice")));
        store.add(record("s1")).await.unwrap();
        store.add(record("s2")).await.unwrap();

        store.set_active(Some(UserId::new("bob")));
        store.add(record("s3")).await.unwrap();

        let bob_view = store.view();
        assert_eq!(bob_view.len(), 1);
        assert!(bob_view.iter().all(|r| r.owner_id() == &UserId::new("bob")));
        assert!(store.get("s1").is_none());
        assert!(store.get("s3").is_some());

        store.set_active(Some(UserId::new("alice")));
        let alice_view = store.view();
        assert_eq!(alice_view.len(), 2);
        assert!(alice_view.iter().all(|r| r.owner_id() == &UserId::new("alice")));
        assert!(store.get("s3").is_none());

        store.set_active(None);
        assert!(store.view().is_empty());
    }

    #[tokio::test]
    async fn newest_records_come_first() {
        let store = store().await;
        store.set_active(Some(UserId::new("alice")));
        store.add(record("s1")).await.unwrap();
        store.add(record("s2")).await.unwrap();

        let ids: Vec<_> = store
            .view()
            .iter()
            .map(|r| r.session_id.as_str().to_owned())
            .collect();
        assert_eq!(ids, ["s2", "s1"]);
    }

    #[tokio::test]
    async fn update_merges_in_place_and_reports_misses() {
        let store = store().await;
        store.set_active(Some(UserId::new("alice")));
        store.add(record("s1")).await.unwrap();

        let touched = store
            .update("s1", |r| {
                r.ended_at = Some(fixed_now());
                r.score = Some(40);
            })
            .await
            .unwrap();
        assert!(touched);
        let updated = store.get("s1").unwrap();
        assert_eq!(updated.score, Some(40));
        assert!(updated.is_finished());

        assert!(!store.update("missing", |_| {}).await.unwrap());
    }

    #[tokio::test]
    async fn clear_for_user_only_touches_the_active_owner() {
        let store = store().await;

        store.set_active(Some(UserId::new("alice")));
        store.add(record("s1")).await.unwrap();
        store.set_active(Some(UserId::new("bob")));
        store.add(record("s2")).await.unwrap();

        store.clear_for_user().await.unwrap();
        assert!(store.view().is_empty());

        store.set_active(Some(UserId::new("alice")));
        assert_eq!(store.view().len(), 1);
    }
}
