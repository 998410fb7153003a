pub mod countdown;
pub mod gallery_service;
pub mod guestbook_service;
pub mod guestbook_session;
pub mod navigation;
