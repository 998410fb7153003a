//! A live, newest-first view of the guestbook for one client session.
//!
//! The session fetches on open, then re-fetches the full list whenever the
//! change feed reports a guestbook change. Each fetch captures the session
//! generation and a sequence number; a result is applied only if the session
//! is still open and no newer fetch has already landed.

use super::guestbook_service::{DeleteOutcome, GuestbookError, GuestbookStore};
use crate::{
    backend::TableChange,
    models::guestbook::{GuestbookEntry, GuestbookForm},
};
use serde::Serialize;
use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::{
    sync::{RwLock, broadcast, broadcast::error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// What a reader sees at one instant.
#[derive(Serialize, Clone, Debug)]
pub struct GuestbookSnapshot {
    pub entries: Vec<GuestbookEntry>,
    pub loading: bool,
}

struct SessionState {
    entries: Vec<GuestbookEntry>,
    loading: bool,
    applied_seq: u64,
}

struct Shared {
    store: GuestbookStore,
    state: RwLock<SessionState>,
    generation: AtomicU64,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    async fn refresh(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.write().await.loading = true;

        let result = self.store.list_visible_entries().await;

        let mut state = self.state.write().await;
        if self.closed.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation
        {
            debug!(seq, "discarding guestbook fetch from a closed session");
            return;
        }
        match result {
            Ok(entries) if seq > state.applied_seq => {
                debug!(seq, count = entries.len(), "applied guestbook fetch");
                state.entries = entries;
                state.applied_seq = seq;
            }
            Ok(_) => debug!(seq, "newer guestbook fetch already applied"),
            Err(err) => warn!("guestbook fetch failed, keeping previous entries: {}", err),
        }
        if seq == self.next_seq.load(Ordering::SeqCst) {
            state.loading = false;
        }
    }
}

pub struct GuestbookSession {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl GuestbookSession {
    /// Subscribe to changes, load the initial list and start listening.
    pub async fn open(store: GuestbookStore) -> Self {
        let changes = store.subscribe();
        let shared = Arc::new(Shared {
            store,
            state: RwLock::new(SessionState {
                entries: Vec::new(),
                loading: true,
                applied_seq: 0,
            }),
            generation: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        shared.refresh().await;
        let listener = tokio::spawn(listen(Arc::downgrade(&shared), changes));

        Self {
            shared,
            listener: Mutex::new(Some(listener)),
        }
    }

    pub async fn snapshot(&self) -> GuestbookSnapshot {
        let state = self.shared.state.read().await;
        GuestbookSnapshot {
            entries: state.entries.clone(),
            loading: state.loading,
        }
    }

    /// Full re-fetch. Failures keep the previous list.
    pub async fn refresh(&self) {
        self.shared.refresh().await;
    }

    /// Submit the form; on success the form is cleared and the list re-fetched.
    pub async fn submit(&self, form: &mut GuestbookForm) -> Result<GuestbookEntry, GuestbookError> {
        let entry = self.shared.store.submit_entry(form).await?;
        form.clear();
        self.refresh().await;
        Ok(entry)
    }

    /// Delete with password re-entry; re-fetches after a successful delete.
    pub async fn delete(&self, id: Uuid, password: &str) -> Result<DeleteOutcome, GuestbookError> {
        let outcome = self.shared.store.delete_entry(id, password).await?;
        if outcome == DeleteOutcome::Deleted {
            self.refresh().await;
        }
        Ok(outcome)
    }

    /// Release the subscription. In-flight fetches finish but are discarded.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for GuestbookSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn listen(shared: Weak<Shared>, mut changes: broadcast::Receiver<TableChange>) {
    loop {
        match changes.recv().await {
            Ok(TableChange::Guestbook) => {}
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "change feed lagged, refreshing");
            }
            Err(RecvError::Closed) => break,
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.refresh().await;
    }
    debug!("guestbook listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        Backend, BackendResult, GuestbookTable, local::LocalBackend,
    };
    use crate::models::guestbook::NewGuestbookEntry;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn setup() -> (Arc<LocalBackend>, GuestbookStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalBackend::open_in_memory(dir.path()).await.unwrap());
        let store = GuestbookStore::new(&Backend::from_shared(local.clone()));
        (local, store, dir)
    }

    async fn wait_for(session: &GuestbookSession, count: usize) -> GuestbookSnapshot {
        for _ in 0..100 {
            let snapshot = session.snapshot().await;
            if snapshot.entries.len() == count {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached {} entries", count);
    }

    /// Blocks `list_visible` until a permit is released.
    struct GatedTable {
        inner: Arc<LocalBackend>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl GuestbookTable for GatedTable {
        async fn list_visible(&self) -> BackendResult<Vec<GuestbookEntry>> {
            self.gate.acquire().await.unwrap().forget();
            GuestbookTable::list_visible(&*self.inner).await
        }

        async fn insert(&self, entry: &NewGuestbookEntry) -> BackendResult<GuestbookEntry> {
            GuestbookTable::insert(&*self.inner, entry).await
        }

        async fn soft_delete(&self, id: Uuid, password: &str) -> BackendResult<bool> {
            self.inner.soft_delete(id, password).await
        }

        async fn health_check(&self) -> BackendResult<()> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn open_loads_initial_entries() {
        let (_local, store, _dir) = setup().await;
        store
            .submit_entry(&GuestbookForm::new("Kim", "Congrats", true, "pw"))
            .await
            .unwrap();

        let session = GuestbookSession::open(store).await;
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.entries.len(), 1);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn submit_clears_form_and_refreshes() {
        let (_local, store, _dir) = setup().await;
        let session = GuestbookSession::open(store).await;

        let mut form = GuestbookForm::new("Kim", "Congrats", false, "pw");
        session.submit(&mut form).await.unwrap();
        assert!(form.name.is_empty() && form.message.is_empty() && form.password.is_empty());
        assert_eq!(session.snapshot().await.entries.len(), 1);
    }

    #[tokio::test]
    async fn rejected_submit_keeps_form() {
        let (_local, store, _dir) = setup().await;
        let session = GuestbookSession::open(store).await;

        let mut form = GuestbookForm::new("", "Congrats", false, "pw");
        assert!(session.submit(&mut form).await.is_err());
        assert_eq!(form.message, "Congrats");
    }

    #[tokio::test]
    async fn remote_changes_trigger_refetch() {
        let (_local, store, _dir) = setup().await;
        let session = GuestbookSession::open(store.clone()).await;
        assert!(session.snapshot().await.entries.is_empty());

        // Another client writes through the same backend.
        store
            .submit_entry(&GuestbookForm::new("Lee", "Hello", true, "pw"))
            .await
            .unwrap();
        let snapshot = wait_for(&session, 1).await;
        assert_eq!(snapshot.entries[0].name, "Lee");
    }

    #[tokio::test]
    async fn delete_outcomes_update_view() {
        let (_local, store, _dir) = setup().await;
        let session = GuestbookSession::open(store).await;
        let entry = session
            .submit(&mut GuestbookForm::new("Name", "Msg", true, "pw1"))
            .await
            .unwrap();

        assert_eq!(
            session.delete(entry.id, "wrong").await.unwrap(),
            DeleteOutcome::PasswordMismatch
        );
        assert_eq!(session.snapshot().await.entries.len(), 1);

        assert_eq!(
            session.delete(entry.id, "pw1").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(session.snapshot().await.entries.is_empty());
    }

    #[tokio::test]
    async fn closed_session_discards_in_flight_fetch() {
        let (local, _store, _dir) = setup().await;
        let gate = Arc::new(Semaphore::new(1));
        let mut backend = Backend::from_shared(local.clone());
        backend.guestbook = Arc::new(GatedTable {
            inner: local.clone(),
            gate: gate.clone(),
        }) as Arc<dyn GuestbookTable>;
        let store = GuestbookStore::new(&backend);

        let session = Arc::new(GuestbookSession::open(store.clone()).await);
        assert!(session.snapshot().await.entries.is_empty());

        GuestbookTable::insert(
            &*local,
            &NewGuestbookEntry {
                name: "Late".into(),
                message: "m".into(),
                is_groom_side: true,
                password_hash: "h".into(),
                is_deleted: false,
            },
        )
        .await
        .unwrap();

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close();
        gate.add_permits(8);
        in_flight.await.unwrap();

        assert!(session.snapshot().await.entries.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_entries() {
        let (local, store, _dir) = setup().await;
        store
            .submit_entry(&GuestbookForm::new("Kim", "Congrats", true, "pw"))
            .await
            .unwrap();
        let session = GuestbookSession::open(store).await;
        assert_eq!(session.snapshot().await.entries.len(), 1);

        sqlx::query("DROP TABLE guestbook")
            .execute(&*local.db)
            .await
            .unwrap();
        session.refresh().await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.entries.len(), 1);
        assert!(!snapshot.loading);
    }
}
