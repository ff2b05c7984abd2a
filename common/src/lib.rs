pub mod guestbook;
pub mod message;
