use crate::{
    backend::{Backend, local::LocalBackend},
    config::AppConfig,
    services::{
        gallery_service::{GalleryResolver, GallerySettings},
        guestbook_service::GuestbookStore,
        guestbook_session::GuestbookSession,
        navigation::{PlatformDetector, UserAgentDetector},
    },
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gallery: GalleryResolver,
    pub guestbook: GuestbookStore,
    /// Server-wide live view backing `GET /api/guestbook`.
    pub session: Arc<GuestbookSession>,
    pub detector: Arc<dyn PlatformDetector>,
    /// Set when objects are stored on this host and served by it.
    pub local: Option<Arc<LocalBackend>>,
}

impl AppState {
    pub async fn new(
        config: AppConfig,
        backend: &Backend,
        local: Option<Arc<LocalBackend>>,
    ) -> Self {
        let settings = GallerySettings::new(
            config.gallery_bucket.clone(),
            config.gallery_folder.clone(),
        );
        let guestbook = GuestbookStore::new(backend);
        let session = GuestbookSession::open(guestbook.clone()).await;

        Self {
            config: Arc::new(config),
            gallery: GalleryResolver::new(backend, settings),
            guestbook,
            session: Arc::new(session),
            detector: Arc::new(UserAgentDetector::new()),
            local,
        }
    }
}
