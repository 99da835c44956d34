#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quietinbox_actions::{ScanOptions, ScanOrchestrator};
use quietinbox_domain::{
    Headers, MessagePage, MessageSource, RawMessage, Store, TimeWindow, UnsubscribeKind,
};
use quietinbox_error::InboxError;
use quietinbox_grouping::{filter_groups, group_stats, GroupFilter};
use quietinbox_store::MemoryStore;
use tokio::sync::Notify;

struct FakeSource {
    messages: Vec<RawMessage>,
    list_calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    tokens_expired: AtomicBool,
}

impl FakeSource {
    fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            list_calls: AtomicUsize::new(0),
            gate: None,
            started: Arc::new(Notify::new()),
            tokens_expired: AtomicBool::new(false),
        }
    }

    fn gated(messages: Vec<RawMessage>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(messages)
        }
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn list_messages(
        &self,
        _query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, InboxError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if page_token.is_some() && self.tokens_expired.load(Ordering::SeqCst) {
            return Err(InboxError::invalid_input("400: Invalid pageToken"));
        }
        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + page_size).min(self.messages.len());
        Ok(MessagePage {
            ids: self.messages[start..end].iter().map(|m| m.id.clone()).collect(),
            next_page_token: (end < self.messages.len()).then(|| end.to_string()),
            approx_total: self.messages.len() as u64,
        })
    }

    async fn get_message_metadata(
        &self,
        id: &str,
        _header_names: &[&str],
    ) -> Result<RawMessage, InboxError> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| InboxError::not_found(id))
    }

    async fn get_message_body(&self, _id: &str) -> Result<String, InboxError> {
        Ok(String::new())
    }
}

fn raw(id: &str, headers: &[(&str, &str)]) -> RawMessage {
    RawMessage {
        id: id.into(),
        headers: headers.iter().map(|(n, v)| (*n, *v)).collect::<Headers>(),
        labels: vec!["CATEGORY_PROMOTIONS".into()],
        snippet: None,
    }
}

fn three_message_batch() -> Vec<RawMessage> {
    vec![
        raw(
            "msg1",
            &[
                ("From", "A News <news@a.com>"),
                ("Date", "Mon, 01 Jan 2024 10:00:00 +0000"),
                ("List-Id", "<a.com>"),
                ("List-Unsubscribe", "<mailto:unsub@a.com>"),
            ],
        ),
        raw(
            "msg2",
            &[
                ("From", "A News <news@a.com>"),
                ("Date", "Wed, 10 Jan 2024 10:00:00 +0000"),
                ("List-Id", "<a.com>"),
                ("List-Unsubscribe", "<https://a.com/unsub?u=1>"),
                ("List-Unsubscribe-Post", "List-Unsubscribe=One-Click"),
            ],
        ),
        raw(
            "msg3",
            &[
                ("From", "deals@b.com"),
                ("Date", "Fri, 05 Jan 2024 10:00:00 +0000"),
            ],
        ),
    ]
}

fn options(page_size: usize) -> ScanOptions {
    ScanOptions {
        range: TimeWindow::SevenDays,
        page_size,
        ..ScanOptions::default()
    }
}

async fn groups_by_id(store: &MemoryStore) -> HashMap<String, quietinbox_domain::SenderGroup> {
    store
        .list_groups()
        .await
        .unwrap()
        .into_iter()
        .map(|g| (g.id.clone(), g))
        .collect()
}

#[tokio::test]
async fn test_three_messages_become_two_groups() {
    let store = Arc::new(MemoryStore::new());
    let scanner = ScanOrchestrator::new(Arc::new(FakeSource::new(three_message_batch())), store.clone());

    let mut progress = Vec::new();
    let report = scanner
        .scan(&options(2), |p| progress.push(p.processed))
        .await
        .unwrap();

    assert_eq!(report.groups, 2);
    assert_eq!(report.added, 3);
    assert_eq!(report.pages, 2);
    assert_eq!(progress, vec![2, 3]);

    let groups = groups_by_id(&store).await;
    assert_eq!(groups.len(), 2);

    let a = &groups["a.com"];
    assert_eq!(a.message_count, 2);
    assert_eq!(a.unsubscribe.kind(), UnsubscribeKind::OneClick);
    assert_eq!(a.first_seen.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    assert_eq!(a.last_seen.to_rfc3339(), "2024-01-10T10:00:00+00:00");

    let b = &groups["domain:b.com"];
    assert_eq!(b.message_count, 1);
    assert_eq!(b.unsubscribe.kind(), UnsubscribeKind::Unknown);

    let checkpoint = store.get_checkpoint().await.unwrap().unwrap();
    assert!(checkpoint.complete);
    assert_eq!(checkpoint.processed_message_ids.len(), 3);

    let stats = group_stats(&store.list_groups().await.unwrap());
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.one_click_available, 1);
}

#[tokio::test]
async fn test_rescan_does_not_double_count() {
    let store = Arc::new(MemoryStore::new());
    let scanner = ScanOrchestrator::new(Arc::new(FakeSource::new(three_message_batch())), store.clone());

    scanner.scan(&options(10), |_| {}).await.unwrap();
    let report = scanner.scan(&options(10), |_| {}).await.unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.already_processed, 3);
    let groups = groups_by_id(&store).await;
    assert_eq!(groups["a.com"].message_count, 2);
    assert_eq!(groups["domain:b.com"].message_count, 1);
}

#[tokio::test]
async fn test_cancelled_scan_resumes_from_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new(three_message_batch()));
    let scanner = ScanOrchestrator::new(source.clone(), store.clone());
    let token = scanner.cancel_token();

    let err = scanner
        .scan(&options(1), |_| token.cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, InboxError::Cancelled));
    assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);

    let checkpoint = store.get_checkpoint().await.unwrap().unwrap();
    assert!(!checkpoint.complete);
    assert_eq!(checkpoint.next_page_token.as_deref(), Some("1"));

    let report = scanner.scan(&options(1), |_| {}).await.unwrap();
    assert!(report.resumed);
    assert_eq!(report.added, 2);

    let groups = groups_by_id(&store).await;
    assert_eq!(groups["a.com"].message_count, 2);
    assert_eq!(groups["a.com"].unsubscribe.kind(), UnsubscribeKind::OneClick);
}

#[tokio::test]
async fn test_expired_resume_token_restarts_listing() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new(three_message_batch()));
    let scanner = ScanOrchestrator::new(source.clone(), store.clone());
    let token = scanner.cancel_token();

    let err = scanner.scan(&options(1), |_| token.cancel()).await.unwrap_err();
    assert!(matches!(err, InboxError::Cancelled));
    source.tokens_expired.store(true, Ordering::SeqCst);

    let report = scanner.scan(&options(10), |_| {}).await.unwrap();
    assert!(!report.resumed);
    assert_eq!(report.added, 2);
    assert_eq!(report.already_processed, 1);

    let groups = groups_by_id(&store).await;
    assert_eq!(groups["a.com"].message_count, 2);
    assert_eq!(groups["domain:b.com"].message_count, 1);
    assert!(store.get_checkpoint().await.unwrap().unwrap().complete);

    let again = scanner.scan(&options(10), |_| {}).await.unwrap();
    assert_eq!(again.added, 0);
}

#[tokio::test]
async fn test_fresh_scan_rebuilds_without_double_counting() {
    let store = Arc::new(MemoryStore::new());
    let scanner = ScanOrchestrator::new(Arc::new(FakeSource::new(three_message_batch())), store.clone());
    scanner.scan(&options(10), |_| {}).await.unwrap();
    store.delete_group("domain:b.com").await.unwrap();

    let fresh = ScanOptions {
        fresh: true,
        ..options(10)
    };
    let report = scanner.scan(&fresh, |_| {}).await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(report.already_processed, 0);

    let groups = groups_by_id(&store).await;
    assert_eq!(groups["a.com"].message_count, 2);
    assert_eq!(groups["domain:b.com"].message_count, 1);
}

#[tokio::test]
async fn test_cancel_after_reserve_stops_before_first_page() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new(three_message_batch()));
    let scanner = Arc::new(ScanOrchestrator::new(source.clone(), store.clone()));

    let permit = scanner.reserve().unwrap();
    assert!(scanner.is_running());
    assert!(matches!(scanner.reserve(), Err(InboxError::ScanInProgress)));
    scanner.cancel_token().cancel();

    let task = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.scan_reserved(permit, &options(10), |_| {}).await })
    };
    let result = task.await.unwrap();
    assert!(matches!(result, Err(InboxError::Cancelled)));
    assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn test_concurrent_scan_is_rejected() {
    let gate = Arc::new(Notify::new());
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::gated(three_message_batch(), gate.clone()));
    let started = source.started.clone();
    let scanner = Arc::new(ScanOrchestrator::new(source, store.clone()));

    let first = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.scan(&options(10), |_| {}).await })
    };
    started.notified().await;
    assert!(scanner.is_running());

    let second = scanner.scan(&options(10), |_| {}).await;
    assert!(matches!(second, Err(InboxError::ScanInProgress)));

    gate.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.groups, 2);
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn test_protected_sender_is_flagged_and_filterable() {
    let store = Arc::new(MemoryStore::new());
    let messages = vec![
        raw(
            "p1",
            &[
                ("From", "Alerts <alerts@mybank.com>"),
                ("Subject", "Monthly newsletter"),
                ("Date", "Mon, 01 Jan 2024 10:00:00 +0000"),
            ],
        ),
        raw(
            "p2",
            &[
                ("From", "Shop <hello@shop.io>"),
                ("Subject", "Spring sale"),
                ("Date", "Mon, 01 Jan 2024 10:00:00 +0000"),
            ],
        ),
    ];
    let scanner = ScanOrchestrator::new(Arc::new(FakeSource::new(messages)), store.clone());
    scanner.scan(&options(10), |_| {}).await.unwrap();

    let groups = store.list_groups().await.unwrap();
    let protected = filter_groups(
        &groups,
        &GroupFilter {
            protected: Some(true),
            ..Default::default()
        },
    );
    assert_eq!(protected.len(), 1);
    assert_eq!(protected[0].id, "domain:mybank.com");
    assert!(protected[0]
        .safety
        .reasons
        .contains(&"Protected domain: bank.".to_string()));
}
