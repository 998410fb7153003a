pub mod event_handlers;
pub mod gallery_handlers;
pub mod guestbook_handlers;
pub mod health_handlers;
pub mod storage_handlers;
