use std::sync::Arc;
use std::time::Duration;

use quietinbox_domain::{
    ActionKind, ActionLogEntry, ActionMethod, ActionResult, CleanupMode, CleanupPolicy, FilterAction,
    FilterCriteria, Launcher, Mailbox, Mechanism, MessageSource, MutationOp, OneClickTransport,
    SenderGroup, Store, UnsubscribeMethod, MAX_MUTATION_BATCH,
};
use quietinbox_error::InboxError;
use quietinbox_grouping::scan_body_for_unsubscribe_link;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::mailto::MailtoRequest;

pub const DEFAULT_UNSUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Page size used when resolving a sender's messages for cleanup.
const TARGET_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub result: ActionResult,
    pub count: u64,
}

impl CleanupOutcome {
    fn failed() -> Self {
        Self {
            result: ActionResult::Fail,
            count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub success: usize,
    pub fail: usize,
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, result: ActionResult) {
        match result {
            ActionResult::Success => self.success += 1,
            ActionResult::Fail => self.fail += 1,
            ActionResult::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub index: usize,
    pub total: usize,
    pub group_id: String,
    pub result: ActionResult,
}

/// Runs user-initiated actions against sender groups.
///
/// Nothing here returns `Err`: each failure is logged, written to the
/// action log and reported as [`ActionResult::Fail`].
pub struct ActionExecutor {
    source: Arc<dyn MessageSource>,
    mailbox: Arc<dyn Mailbox>,
    store: Arc<dyn Store>,
    transport: Arc<dyn OneClickTransport>,
    launcher: Arc<dyn Launcher>,
    unsubscribe_delay: Duration,
}

impl ActionExecutor {
    pub fn new(
        source: Arc<dyn MessageSource>,
        mailbox: Arc<dyn Mailbox>,
        store: Arc<dyn Store>,
        transport: Arc<dyn OneClickTransport>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            source,
            mailbox,
            store,
            transport,
            launcher,
            unsubscribe_delay: DEFAULT_UNSUBSCRIBE_DELAY,
        }
    }

    pub fn with_unsubscribe_delay(mut self, delay: Duration) -> Self {
        self.unsubscribe_delay = delay;
        self
    }

    pub async fn unsubscribe(&self, group: &SenderGroup) -> ActionResult {
        match &group.unsubscribe.mechanism {
            Mechanism::OneClick { url, .. } => self.one_click_unsubscribe(&group.id, url).await,
            Mechanism::Http { url, .. } => self.open_link_unsubscribe(&group.id, url).await,
            Mechanism::Mailto { mailto } => self.mailto_unsubscribe(&group.id, mailto).await,
            Mechanism::Unknown => self.body_link_unsubscribe(group).await,
        }
    }

    /// RFC 8058 POST. Plain-http targets are refused before any request.
    pub async fn one_click_unsubscribe(&self, group_id: &str, url: &str) -> ActionResult {
        let outcome = self.post_one_click(url).await;
        self.finish(
            ActionLogEntry::new(group_id, ActionKind::Unsubscribe, ActionResult::Success)
                .with_method(ActionMethod::OneClick),
            outcome,
        )
        .await
    }

    pub async fn open_link_unsubscribe(&self, group_id: &str, url: &str) -> ActionResult {
        let outcome = self.launcher.open_url(url).await;
        self.finish(
            ActionLogEntry::new(group_id, ActionKind::OpenLink, ActionResult::Success)
                .with_method(ActionMethod::Http),
            outcome,
        )
        .await
    }

    /// Hands the request to the mail client, or sends it through the
    /// mailbox when the send scope is enabled.
    pub async fn mailto_unsubscribe(&self, group_id: &str, mailto: &str) -> ActionResult {
        let outcome = self.dispatch_mailto(mailto).await;
        self.finish(
            ActionLogEntry::new(group_id, ActionKind::Mailto, ActionResult::Success)
                .with_method(ActionMethod::Mailto),
            outcome,
        )
        .await
    }

    /// Looks for a link in one sample message. A hit is written back onto
    /// the stored group before the link is opened.
    pub async fn body_link_unsubscribe(&self, group: &SenderGroup) -> ActionResult {
        let url = match self.find_body_link(group).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!(group = %group.id, "no unsubscribe link found in message body");
                let entry = ActionLogEntry::new(&group.id, ActionKind::OpenLink, ActionResult::Skipped)
                    .with_note("no unsubscribe method available");
                self.record(&entry).await;
                return ActionResult::Skipped;
            }
            Err(e) => {
                let entry = ActionLogEntry::new(&group.id, ActionKind::OpenLink, ActionResult::Success)
                    .with_method(ActionMethod::Http);
                return self.finish(entry, Err(e)).await;
            }
        };

        let mut upgraded = group.clone();
        upgraded.unsubscribe = UnsubscribeMethod {
            mechanism: Mechanism::Http {
                url: url.clone(),
                mailto: None,
            },
            has_list_id: group.unsubscribe.has_list_id,
        };

        let outcome = match self.store.put_group(&upgraded).await {
            Ok(()) => self.launcher.open_url(&url).await,
            Err(e) => Err(e),
        };
        self.finish(
            ActionLogEntry::new(&group.id, ActionKind::OpenLink, ActionResult::Success)
                .with_method(ActionMethod::Http)
                .with_note("link found in message body"),
            outcome,
        )
        .await
    }

    /// Archives or trashes the group's messages in sequential batches.
    /// The first failing batch aborts the rest and the whole run reports fail.
    pub async fn cleanup(&self, group: &SenderGroup, policy: &CleanupPolicy) -> CleanupOutcome {
        let kind = match policy.mode {
            CleanupMode::Archive => ActionKind::Archive,
            CleanupMode::Trash => ActionKind::Delete,
        };

        let ids = match self.resolve_targets(group, policy).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(group = %group.id, error = %e, "failed to resolve cleanup targets");
                let entry = ActionLogEntry::new(&group.id, kind, ActionResult::Fail)
                    .with_count(0)
                    .with_note(e.to_string());
                self.record(&entry).await;
                return CleanupOutcome::failed();
            }
        };

        if ids.is_empty() {
            info!(group = %group.id, mode = %policy.mode, "no messages matched, cleanup skipped");
            let entry = ActionLogEntry::new(&group.id, kind, ActionResult::Skipped)
                .with_count(0)
                .with_note("no matching messages");
            self.record(&entry).await;
            return CleanupOutcome {
                result: ActionResult::Skipped,
                count: 0,
            };
        }

        let op = MutationOp::from(policy.mode);
        let batches: Vec<&[String]> = ids.chunks(MAX_MUTATION_BATCH).collect();
        for (done, batch) in batches.iter().enumerate() {
            if let Err(e) = self.mailbox.mutate_messages(batch, op).await {
                warn!(group = %group.id, batch = done, error = %e, "cleanup batch failed");
                let entry = ActionLogEntry::new(&group.id, kind, ActionResult::Fail)
                    .with_count(0)
                    .with_note(format!("{e}; {done} of {} batches completed", batches.len()));
                self.record(&entry).await;
                return CleanupOutcome::failed();
            }
        }

        let count = ids.len() as u64;
        info!(group = %group.id, mode = %policy.mode, count, "cleanup finished");
        let entry = ActionLogEntry::new(&group.id, kind, ActionResult::Success).with_count(count);
        self.record(&entry).await;
        CleanupOutcome {
            result: ActionResult::Success,
            count,
        }
    }

    /// Dry run of [`cleanup`](Self::cleanup). Resolution failures count as zero.
    pub async fn estimate(&self, group: &SenderGroup, policy: &CleanupPolicy) -> usize {
        match self.resolve_targets(group, policy).await {
            Ok(ids) => ids.len(),
            Err(e) => {
                warn!(group = %group.id, error = %e, "cleanup estimate failed");
                0
            }
        }
    }

    /// Server-side rule that skips the inbox for future mail from this sender.
    pub async fn create_filter(&self, group: &SenderGroup) -> ActionResult {
        let criteria = FilterCriteria {
            from: Some(sender_address(group)),
            ..Default::default()
        };
        let action = FilterAction {
            remove_label_ids: vec!["INBOX".to_string()],
            ..Default::default()
        };
        let outcome = self.mailbox.create_filter(&criteria, &action).await;
        self.finish(
            ActionLogEntry::new(&group.id, ActionKind::Filter, ActionResult::Success),
            outcome,
        )
        .await
    }

    /// One group at a time with a pause in between to stay under rate limits.
    pub async fn batch_unsubscribe<F>(&self, groups: &[SenderGroup], mut on_progress: F) -> BatchSummary
    where
        F: FnMut(&BatchProgress) + Send,
    {
        let mut summary = BatchSummary::default();
        for (index, group) in groups.iter().enumerate() {
            if index > 0 && !self.unsubscribe_delay.is_zero() {
                tokio::time::sleep(self.unsubscribe_delay).await;
            }
            let result = self.unsubscribe(group).await;
            summary.record(result);
            on_progress(&BatchProgress {
                index: index + 1,
                total: groups.len(),
                group_id: group.id.clone(),
                result,
            });
        }
        info!(
            total = groups.len(),
            success = summary.success,
            fail = summary.fail,
            skipped = summary.skipped,
            "batch unsubscribe finished"
        );
        summary
    }

    async fn post_one_click(&self, url: &str) -> Result<(), InboxError> {
        ensure_https(url)?;
        let status = self.transport.post_one_click(url).await?;
        if (200..400).contains(&status) {
            Ok(())
        } else {
            Err(InboxError::api(format!("one-click endpoint returned {status}")))
        }
    }

    async fn dispatch_mailto(&self, mailto: &str) -> Result<(), InboxError> {
        let request = MailtoRequest::parse(mailto)?;
        let send_directly = match self.store.get_settings().await {
            Ok(settings) => settings.enable_send_scope,
            Err(e) => {
                warn!(error = %e, "could not read settings, using mail client");
                false
            }
        };

        if send_directly {
            debug!(to = %request.to, "sending unsubscribe request through mailbox");
            self.mailbox
                .send_email(&request.to, &request.subject, &request.body)
                .await
        } else {
            self.launcher.open_mailto(&request.to_uri()).await
        }
    }

    async fn find_body_link(&self, group: &SenderGroup) -> Result<Option<String>, InboxError> {
        let query = format!("from:{}", sender_address(group));
        let page = self.source.list_messages(&query, 1, None).await?;
        let Some(id) = page.ids.first() else {
            return Ok(None);
        };
        let body = self.source.get_message_body(id).await?;
        Ok(scan_body_for_unsubscribe_link(&body))
    }

    /// Every matching id, newest first, minus the `keep_last` most recent.
    async fn resolve_targets(
        &self,
        group: &SenderGroup,
        policy: &CleanupPolicy,
    ) -> Result<Vec<String>, InboxError> {
        let query = cleanup_query(group, policy);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .source
                .list_messages(&query, TARGET_PAGE_SIZE, page_token.as_deref())
                .await?;
            ids.extend(page.ids);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(keep) = policy.keep_last {
            ids = ids.into_iter().skip(keep).collect();
        }
        debug!(group = %group.id, %query, targets = ids.len(), "resolved cleanup targets");
        Ok(ids)
    }

    async fn finish(&self, entry: ActionLogEntry, outcome: Result<(), InboxError>) -> ActionResult {
        let entry = match outcome {
            Ok(()) => {
                info!(group = %entry.group_id, action = %entry.action, "action succeeded");
                entry
            }
            Err(e) => {
                warn!(group = %entry.group_id, action = %entry.action, error = %e, "action failed");
                ActionLogEntry {
                    result: ActionResult::Fail,
                    note: Some(e.to_string()),
                    ..entry
                }
            }
        };
        self.record(&entry).await;
        entry.result
    }

    async fn record(&self, entry: &ActionLogEntry) {
        if let Err(e) = self.store.append_action_log(entry).await {
            warn!(group = %entry.group_id, error = %e, "failed to write action log");
        }
    }
}

pub fn cleanup_query(group: &SenderGroup, policy: &CleanupPolicy) -> String {
    let mut terms = vec![format!("from:{}", sender_address(group))];
    if let Some(days) = policy.older_than_days {
        terms.push(format!("older_than:{days}d"));
    }
    if let Some(newer) = policy.within.and_then(|w| w.newer_than()) {
        terms.push(format!("newer_than:{newer}"));
    }
    terms.join(" ")
}

fn sender_address(group: &SenderGroup) -> String {
    if group.domain.is_empty() {
        group.display_name.clone()
    } else {
        group.domain.clone()
    }
}

fn ensure_https(raw: &str) -> Result<(), InboxError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| InboxError::invalid_input(format!("bad url {raw}: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(InboxError::invalid_input(format!(
            "one-click unsubscribe requires https, got {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use quietinbox_domain::{
        MessagePage, RawMessage, SafetyInfo, Settings, TimeWindow, UnsubscribeKind,
    };
    use quietinbox_store::MemoryStore;

    use super::*;

    #[derive(Default)]
    struct FakeSource {
        ids: Vec<String>,
        body: String,
        fail: bool,
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn list_messages(
            &self,
            _query: &str,
            page_size: usize,
            page_token: Option<&str>,
        ) -> Result<MessagePage, InboxError> {
            if self.fail {
                return Err(InboxError::network("connection reset"));
            }
            let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let end = (start + page_size).min(self.ids.len());
            Ok(MessagePage {
                ids: self.ids[start..end].to_vec(),
                next_page_token: (end < self.ids.len()).then(|| end.to_string()),
                approx_total: self.ids.len() as u64,
            })
        }

        async fn get_message_metadata(
            &self,
            id: &str,
            _header_names: &[&str],
        ) -> Result<RawMessage, InboxError> {
            Err(InboxError::not_found(id))
        }

        async fn get_message_body(&self, _id: &str) -> Result<String, InboxError> {
            Ok(self.body.clone())
        }
    }

    #[derive(Default)]
    struct FakeMailbox {
        batches: Mutex<Vec<(usize, MutationOp)>>,
        sent: Mutex<Vec<(String, String, String)>>,
        filters: Mutex<Vec<FilterCriteria>>,
        fail_on_batch: Option<usize>,
    }

    #[async_trait]
    impl Mailbox for FakeMailbox {
        async fn mutate_messages(&self, ids: &[String], op: MutationOp) -> Result<(), InboxError> {
            let mut batches = self.batches.lock().unwrap();
            if self.fail_on_batch == Some(batches.len()) {
                return Err(InboxError::rate_limited("quota exceeded"));
            }
            batches.push((ids.len(), op));
            Ok(())
        }

        async fn create_filter(
            &self,
            criteria: &FilterCriteria,
            _action: &FilterAction,
        ) -> Result<(), InboxError> {
            self.filters.lock().unwrap().push(criteria.clone());
            Ok(())
        }

        async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), InboxError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.into(), subject.into(), body.into()));
            Ok(())
        }
    }

    struct FakeTransport {
        status: u16,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn returning(status: u16) -> Self {
            Self {
                status,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OneClickTransport for FakeTransport {
        async fn post_one_click(&self, url: &str) -> Result<u16, InboxError> {
            self.calls.lock().unwrap().push(url.to_string());
            Ok(self.status)
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn open_url(&self, url: &str) -> Result<(), InboxError> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn open_mailto(&self, uri: &str) -> Result<(), InboxError> {
            self.opened.lock().unwrap().push(uri.to_string());
            Ok(())
        }
    }

    struct Harness {
        source: Arc<FakeSource>,
        mailbox: Arc<FakeMailbox>,
        store: Arc<MemoryStore>,
        transport: Arc<FakeTransport>,
        launcher: Arc<FakeLauncher>,
    }

    impl Harness {
        fn new(source: FakeSource, mailbox: FakeMailbox, status: u16) -> Self {
            Self {
                source: Arc::new(source),
                mailbox: Arc::new(mailbox),
                store: Arc::new(MemoryStore::new()),
                transport: Arc::new(FakeTransport::returning(status)),
                launcher: Arc::new(FakeLauncher::default()),
            }
        }

        fn executor(&self) -> ActionExecutor {
            ActionExecutor::new(
                self.source.clone(),
                self.mailbox.clone(),
                self.store.clone(),
                self.transport.clone(),
                self.launcher.clone(),
            )
            .with_unsubscribe_delay(Duration::ZERO)
        }
    }

    fn group(id: &str, mechanism: Mechanism) -> SenderGroup {
        SenderGroup {
            id: id.into(),
            display_name: "Sender".into(),
            domain: "example.com".into(),
            list_id: None,
            message_count: 3,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            unsubscribe: UnsubscribeMethod {
                mechanism,
                has_list_id: false,
            },
            safety: SafetyInfo::default(),
            category: None,
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    #[tokio::test]
    async fn test_one_click_rejects_plain_http_without_calling_out() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        let result = h
            .executor()
            .one_click_unsubscribe("g", "http://example.com/unsub")
            .await;
        assert_eq!(result, ActionResult::Fail);
        assert!(h.transport.calls.lock().unwrap().is_empty());

        let log = h.store.list_action_log().await.unwrap();
        assert_eq!(log[0].result, ActionResult::Fail);
        assert_eq!(log[0].method, Some(ActionMethod::OneClick));
    }

    #[tokio::test]
    async fn test_one_click_status_ranges() {
        for (status, expected) in [
            (200, ActionResult::Success),
            (302, ActionResult::Success),
            (399, ActionResult::Success),
            (400, ActionResult::Fail),
            (500, ActionResult::Fail),
        ] {
            let h = Harness::new(FakeSource::default(), FakeMailbox::default(), status);
            let result = h
                .executor()
                .one_click_unsubscribe("g", "https://example.com/unsub")
                .await;
            assert_eq!(result, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_http_method_opens_link() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        let g = group(
            "g",
            Mechanism::Http {
                url: "https://example.com/prefs".into(),
                mailto: None,
            },
        );
        assert_eq!(h.executor().unsubscribe(&g).await, ActionResult::Success);
        assert_eq!(
            *h.launcher.opened.lock().unwrap(),
            vec!["https://example.com/prefs".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mailto_goes_to_mail_client_with_default_subject() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        let result = h
            .executor()
            .mailto_unsubscribe("g", "mailto:unsub@example.com")
            .await;
        assert_eq!(result, ActionResult::Success);
        let opened = h.launcher.opened.lock().unwrap();
        assert!(opened[0].starts_with("mailto:unsub@example.com?"));
        assert!(opened[0].contains("subject=Unsubscribe"));
    }

    #[tokio::test]
    async fn test_mailto_is_sent_directly_with_send_scope() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        h.store
            .put_settings(&Settings {
                enable_send_scope: true,
                ..Settings::default()
            })
            .await
            .unwrap();
        let result = h
            .executor()
            .mailto_unsubscribe("g", "mailto:unsub@example.com?subject=stop%20it")
            .await;
        assert_eq!(result, ActionResult::Success);
        assert!(h.launcher.opened.lock().unwrap().is_empty());
        let sent = h.mailbox.sent.lock().unwrap();
        assert_eq!(sent[0].0, "unsub@example.com");
        assert_eq!(sent[0].1, "stop it");
    }

    #[tokio::test]
    async fn test_malformed_mailto_fails() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        let result = h.executor().mailto_unsubscribe("g", "mailto:?subject=x").await;
        assert_eq!(result, ActionResult::Fail);
    }

    #[tokio::test]
    async fn test_unknown_method_upgrades_stored_group() {
        let source = FakeSource {
            ids: ids(1),
            body: r#"<a href="https://example.com/unsubscribe?id=7">unsubscribe</a>"#.into(),
            fail: false,
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);
        h.store.put_group(&g).await.unwrap();

        assert_eq!(h.executor().unsubscribe(&g).await, ActionResult::Success);

        let stored = h.store.get_group(&g.id).await.unwrap().unwrap();
        assert_eq!(stored.unsubscribe.kind(), UnsubscribeKind::Http);
        assert_eq!(stored.unsubscribe.url(), Some("https://example.com/unsubscribe?id=7"));
        assert_eq!(h.launcher.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_method_without_link_is_skipped() {
        let source = FakeSource {
            ids: ids(1),
            body: "Thanks for shopping with us.".into(),
            fail: false,
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);
        assert_eq!(h.executor().unsubscribe(&g).await, ActionResult::Skipped);
        assert!(h.launcher.opened.lock().unwrap().is_empty());

        let log = h.store.list_action_log().await.unwrap();
        assert_eq!(log[0].result, ActionResult::Skipped);
    }

    #[tokio::test]
    async fn test_unknown_method_source_error_is_fail() {
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);
        assert_eq!(h.executor().unsubscribe(&g).await, ActionResult::Fail);
    }

    #[tokio::test]
    async fn test_cleanup_batches_by_limit() {
        let source = FakeSource {
            ids: ids(2500),
            ..Default::default()
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);

        let outcome = h.executor().cleanup(&g, &CleanupPolicy::archive()).await;
        assert_eq!(outcome.result, ActionResult::Success);
        assert_eq!(outcome.count, 2500);

        let batches = h.mailbox.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|(n, _)| *n).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert!(batches.iter().all(|(_, op)| *op == MutationOp::Archive));
    }

    #[tokio::test]
    async fn test_cleanup_keep_last_spares_newest() {
        let source = FakeSource {
            ids: ids(10),
            ..Default::default()
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);
        let executor = h.executor();
        let policy = CleanupPolicy::trash().keep_last(3);

        assert_eq!(executor.estimate(&g, &policy).await, 7);
        assert!(h.mailbox.batches.lock().unwrap().is_empty());

        let outcome = executor.cleanup(&g, &policy).await;
        assert_eq!(outcome.count, 7);
        let log = h.store.list_action_log().await.unwrap();
        assert_eq!(log[0].action, ActionKind::Delete);
        assert_eq!(log[0].count, Some(7));
    }

    #[tokio::test]
    async fn test_cleanup_batch_failure_is_all_or_nothing() {
        let source = FakeSource {
            ids: ids(2500),
            ..Default::default()
        };
        let mailbox = FakeMailbox {
            fail_on_batch: Some(1),
            ..Default::default()
        };
        let h = Harness::new(source, mailbox, 200);
        let g = group("domain:example.com", Mechanism::Unknown);

        let outcome = h.executor().cleanup(&g, &CleanupPolicy::archive()).await;
        assert_eq!(outcome, CleanupOutcome::failed());
        assert_eq!(h.mailbox.batches.lock().unwrap().len(), 1);

        let log = h.store.list_action_log().await.unwrap();
        assert!(log[0].note.as_deref().unwrap().contains("1 of 3 batches completed"));
    }

    #[tokio::test]
    async fn test_estimate_is_zero_on_error() {
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);
        assert_eq!(h.executor().estimate(&g, &CleanupPolicy::archive()).await, 0);
    }

    #[tokio::test]
    async fn test_create_filter_targets_sender_domain() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);
        assert_eq!(h.executor().create_filter(&g).await, ActionResult::Success);
        let filters = h.mailbox.filters.lock().unwrap();
        assert_eq!(filters[0].from.as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_batch_unsubscribe_tallies_and_reports_progress() {
        let h = Harness::new(FakeSource::default(), FakeMailbox::default(), 200);
        let groups = vec![
            group(
                "a",
                Mechanism::OneClick {
                    url: "https://a.example.com/u".into(),
                    mailto: None,
                },
            ),
            group(
                "b",
                Mechanism::OneClick {
                    url: "http://b.example.com/u".into(),
                    mailto: None,
                },
            ),
            group("c", Mechanism::Unknown),
        ];

        let mut seen = Vec::new();
        let summary = h
            .executor()
            .batch_unsubscribe(&groups, |p| seen.push((p.index, p.group_id.clone(), p.result)))
            .await;

        assert_eq!(
            summary,
            BatchSummary {
                success: 1,
                fail: 1,
                skipped: 1
            }
        );
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], (3, "c".to_string(), ActionResult::Skipped));
        assert_eq!(h.store.list_action_log().await.unwrap().len(), 3);
    }

    #[test]
    fn test_cleanup_query_terms() {
        let g = group("domain:example.com", Mechanism::Unknown);
        assert_eq!(cleanup_query(&g, &CleanupPolicy::archive()), "from:example.com");
        assert_eq!(
            cleanup_query(&g, &CleanupPolicy::trash().older_than_days(30)),
            "from:example.com older_than:30d"
        );
        assert_eq!(
            cleanup_query(&g, &CleanupPolicy::archive().within(TimeWindow::ThreeMonths)),
            "from:example.com newer_than:3m"
        );
        assert_eq!(
            cleanup_query(&g, &CleanupPolicy::archive().within(TimeWindow::All)),
            "from:example.com"
        );
    }

    #[tokio::test]
    async fn test_cleanup_with_nothing_to_do_is_skipped() {
        let source = FakeSource {
            ids: ids(3),
            ..Default::default()
        };
        let h = Harness::new(source, FakeMailbox::default(), 200);
        let g = group("domain:example.com", Mechanism::Unknown);

        let outcome = h.executor().cleanup(&g, &CleanupPolicy::archive().keep_last(5)).await;
        assert_eq!(
            outcome,
            CleanupOutcome {
                result: ActionResult::Skipped,
                count: 0
            }
        );
        assert!(h.mailbox.batches.lock().unwrap().is_empty());

        let log = h.store.list_action_log().await.unwrap();
        assert_eq!(log[0].result, ActionResult::Skipped);
        assert_eq!(log[0].count, Some(0));
    }
}
