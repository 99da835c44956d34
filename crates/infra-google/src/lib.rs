//! Gmail REST adapter for the message-source and mailbox ports.

mod adapter;
mod auth;
mod mime;

pub use adapter::GmailAdapter;
pub use auth::StaticTokenProvider;
