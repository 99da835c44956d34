use async_trait::async_trait;
use quietinbox_error::InboxError;

use crate::entities::{
    ActionLogEntry, DataExport, FilterAction, FilterCriteria, MessagePage, MutationOp, RawMessage,
    ScanCheckpoint, SenderGroup, Settings,
};

/// Gmail accepts at most this many ids per batch mutation.
pub const MAX_MUTATION_BATCH: usize = 1000;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A bearer token valid for at least the next request.
    async fn access_token(&self) -> Result<String, InboxError>;
}

/// Paginated, read-only view of the mailbox.
///
/// Implementations own retry and backoff; each call is one atomic
/// succeed/fail unit for the caller. Ids come back newest first.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list_messages(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, InboxError>;

    async fn get_message_metadata(
        &self,
        id: &str,
        header_names: &[&str],
    ) -> Result<RawMessage, InboxError>;

    /// Decoded text of the html and plain parts, concatenated.
    async fn get_message_body(&self, id: &str) -> Result<String, InboxError>;
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// `ids.len()` must not exceed [`MAX_MUTATION_BATCH`].
    async fn mutate_messages(&self, ids: &[String], op: MutationOp) -> Result<(), InboxError>;

    async fn create_filter(
        &self,
        criteria: &FilterCriteria,
        action: &FilterAction,
    ) -> Result<(), InboxError>;

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), InboxError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<SenderGroup>, InboxError>;

    async fn get_group(&self, id: &str) -> Result<Option<SenderGroup>, InboxError>;

    async fn put_group(&self, group: &SenderGroup) -> Result<(), InboxError>;

    /// Overwrites the whole collection with `groups`.
    async fn replace_groups(&self, groups: &[SenderGroup]) -> Result<(), InboxError>;

    async fn delete_group(&self, id: &str) -> Result<(), InboxError>;

    async fn append_action_log(&self, entry: &ActionLogEntry) -> Result<(), InboxError>;

    /// Newest entry first.
    async fn list_action_log(&self) -> Result<Vec<ActionLogEntry>, InboxError>;

    /// Returns [`Settings::default`] when nothing was saved yet.
    async fn get_settings(&self) -> Result<Settings, InboxError>;

    async fn put_settings(&self, settings: &Settings) -> Result<(), InboxError>;

    async fn get_checkpoint(&self) -> Result<Option<ScanCheckpoint>, InboxError>;

    async fn put_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), InboxError>;

    async fn clear_checkpoint(&self) -> Result<(), InboxError>;

    /// Groups, action log, settings and checkpoint in one snapshot.
    async fn export_data(&self) -> Result<DataExport, InboxError>;

    /// Upserts groups by id, merges log entries by id, and replaces
    /// settings and checkpoint when the snapshot carries them.
    async fn import_data(&self, data: &DataExport) -> Result<(), InboxError>;

    /// Drops groups, the action log and the checkpoint. Settings stay.
    async fn clear_data(&self) -> Result<(), InboxError>;
}

/// RFC 8058 POST transport. Must not follow redirects.
#[async_trait]
pub trait OneClickTransport: Send + Sync {
    /// Returns the HTTP status of the unsubscribe POST.
    async fn post_one_click(&self, url: &str) -> Result<u16, InboxError>;
}

/// Hands links to the operating system.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn open_url(&self, url: &str) -> Result<(), InboxError>;

    async fn open_mailto(&self, uri: &str) -> Result<(), InboxError>;
}
