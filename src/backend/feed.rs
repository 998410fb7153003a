//! In-process change bus and the hosted-table poller that feeds it.

use super::{GuestbookTable, TableChange};
use crate::models::guestbook::GuestbookEntry;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};

const BUS_CAPACITY: usize = 64;

/// Fan-out of [`TableChange`] signals to every live subscriber.
#[derive(Clone, Debug)]
pub struct ChangeBus {
    tx: broadcast::Sender<TableChange>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Notify subscribers. Having none is not an error.
    pub fn publish(&self, change: TableChange) {
        let receivers = self.tx.send(change).unwrap_or(0);
        debug!(table = change.table_name(), receivers, "published change");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.tx.subscribe()
    }
}

/// Digest of the visible id set. Entries are never edited, so inserts and
/// soft-deletes are the only changes a reader can observe.
pub fn fingerprint(entries: &[GuestbookEntry]) -> String {
    let mut ctx = md5::Context::new();
    for entry in entries {
        ctx.consume(entry.id.as_bytes());
    }
    format!("{:x}", ctx.compute())
}

/// Poll the guestbook table and publish when the visible set changes.
///
/// Covers writes made by other clients straight against the hosted backend.
/// A successful poll that follows startup or a failed poll always publishes,
/// so readers whose own fetch failed during the outage catch up.
pub fn spawn_guestbook_poller(
    table: Arc<dyn GuestbookTable>,
    bus: ChangeBus,
    interval: Duration,
) -> JoinHandle<()> {
    info!(?interval, "starting guestbook change poller");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<String> = None;
        let mut recovering = true;
        loop {
            ticker.tick().await;
            match table.list_visible().await {
                Ok(entries) => {
                    let current = fingerprint(&entries);
                    if recovering || last.as_deref() != Some(current.as_str()) {
                        bus.publish(TableChange::Guestbook);
                    }
                    last = Some(current);
                    recovering = false;
                }
                Err(err) => {
                    debug!("guestbook poll failed: {}", err);
                    recovering = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Backend, BackendError, BackendResult, local::LocalBackend},
        models::guestbook::{GuestbookForm, NewGuestbookEntry},
        services::{guestbook_service::GuestbookStore, guestbook_session::GuestbookSession},
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Fails the first `failures` listings, then delegates.
    struct FlakyTable {
        inner: Arc<LocalBackend>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl GuestbookTable for FlakyTable {
        async fn list_visible(&self) -> BackendResult<Vec<GuestbookEntry>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(BackendError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
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

    fn entry(id: Uuid) -> GuestbookEntry {
        GuestbookEntry {
            id,
            name: "n".into(),
            message: "m".into(),
            is_groom_side: true,
            created_at: Utc::now(),
            is_deleted: false,
        }
    }

    #[test]
    fn fingerprint_tracks_id_set() {
        let a = entry(Uuid::new_v4());
        let b = entry(Uuid::new_v4());
        let before = fingerprint(&[a.clone()]);
        assert_eq!(before, fingerprint(&[a.clone()]));
        assert_ne!(before, fingerprint(&[b, a]));
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = ChangeBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(TableChange::Guestbook);
        assert_eq!(first.recv().await.unwrap(), TableChange::Guestbook);
        assert_eq!(second.recv().await.unwrap(), TableChange::Guestbook);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        ChangeBus::new().publish(TableChange::GalleryImages);
    }

    #[tokio::test]
    async fn poller_publishes_after_recovering_from_failures() {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalBackend::open_in_memory(dir.path()).await.unwrap());
        let table: Arc<dyn GuestbookTable> = Arc::new(FlakyTable {
            inner: local,
            failures: AtomicUsize::new(2),
        });
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();

        let poller = spawn_guestbook_poller(table, bus, Duration::from_millis(10));
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poller never published after recovery")
            .unwrap();
        assert_eq!(change, TableChange::Guestbook);
        poller.abort();
    }

    #[tokio::test]
    async fn session_with_failed_first_fetch_recovers_through_poller() {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalBackend::open_in_memory(dir.path()).await.unwrap());
        GuestbookStore::new(&Backend::from_shared(local.clone()))
            .submit_entry(&GuestbookForm::new("Lee", "Hello", true, "pw"))
            .await
            .unwrap();

        let table: Arc<dyn GuestbookTable> = Arc::new(FlakyTable {
            inner: local.clone(),
            failures: AtomicUsize::new(1),
        });
        let bus = local.bus();
        let mut backend = Backend::from_shared(local);
        backend.guestbook = table.clone();
        let store = GuestbookStore::new(&backend);
        let session = GuestbookSession::open(store).await;
        assert!(session.snapshot().await.entries.is_empty());

        let poller = spawn_guestbook_poller(table, bus, Duration::from_millis(10));
        let mut seen = 0;
        for _ in 0..100 {
            seen = session.snapshot().await.entries.len();
            if seen == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        poller.abort();
        assert_eq!(seen, 1);
    }
}
