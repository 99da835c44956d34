//! Outbound web adapters: the RFC 8058 POST transport and the OS link launcher.

mod launcher;
mod one_click;

pub use launcher::SystemLauncher;
pub use one_click::HttpUnsubscriber;
