use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use quietinbox_domain::{
    Category, MessageSource, ScanCheckpoint, ScanProgress, Store, TimeWindow,
};
use quietinbox_error::InboxError;
use quietinbox_grouping::{parse_message, MessageGrouper, SafetyRules, METADATA_HEADERS};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub range: TimeWindow,
    pub categories: Vec<Category>,
    pub page_size: usize,
    pub concurrency: usize,
    /// Forget stored groups and the checkpoint, then rebuild from the first page.
    pub fresh: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            range: TimeWindow::default(),
            categories: Category::ALL.to_vec(),
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            fresh: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub pages: u64,
    pub listed: u64,
    pub added: u64,
    pub already_processed: u64,
    pub failed: u64,
    pub groups: usize,
    pub resumed: bool,
}

/// Cooperative stop signal, checked before each page fetch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// `(category:a OR category:b) newer_than:X`; the recency term is dropped for all time.
pub fn build_scan_query(range: TimeWindow, categories: &[Category]) -> String {
    let mut terms = Vec::new();
    if !categories.is_empty() {
        let ors: Vec<String> = categories
            .iter()
            .map(|c| format!("category:{}", c.query_term()))
            .collect();
        terms.push(format!("({})", ors.join(" OR ")));
    }
    if let Some(newer) = range.newer_than() {
        terms.push(format!("newer_than:{newer}"));
    }
    terms.join(" ")
}

/// Drives paginated fetches into the grouper and persists after every page.
///
/// Exactly one page is in flight at a time; metadata lookups inside a page
/// fan out up to `concurrency` and are folded back in listing order.
pub struct ScanOrchestrator {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn Store>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl ScanOrchestrator {
    pub fn new(source: Arc<dyn MessageSource>, store: Arc<dyn Store>) -> Self {
        Self {
            source,
            store,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::default(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims the orchestrator for one run and clears any stale cancel
    /// request. Fails with [`InboxError::ScanInProgress`] while another
    /// permit is alive.
    pub fn reserve(&self) -> Result<ScanPermit, InboxError> {
        let permit = ScanPermit::acquire(self.running.clone())?;
        self.cancel.reset();
        Ok(permit)
    }

    /// Runs one scan. A second call while one is active fails with
    /// [`InboxError::ScanInProgress`]; cancellation surfaces as
    /// [`InboxError::Cancelled`] after the checkpoint is saved.
    pub async fn scan<F>(&self, options: &ScanOptions, on_progress: F) -> Result<ScanReport, InboxError>
    where
        F: FnMut(&ScanProgress) + Send,
    {
        let permit = self.reserve()?;
        self.scan_reserved(permit, options, on_progress).await
    }

    /// Same as [`scan`](Self::scan) with the run already claimed, so a
    /// cancel sent after [`reserve`](Self::reserve) is not lost.
    pub async fn scan_reserved<F>(
        &self,
        _permit: ScanPermit,
        options: &ScanOptions,
        mut on_progress: F,
    ) -> Result<ScanReport, InboxError>
    where
        F: FnMut(&ScanProgress) + Send,
    {
        if options.fresh {
            self.store.clear_checkpoint().await?;
            self.store.replace_groups(&[]).await?;
            info!("stored groups and checkpoint cleared for a fresh scan");
        }

        let settings = self.store.get_settings().await?;
        let rules = SafetyRules::from_settings(&settings);
        let mut grouper = MessageGrouper::from_groups(self.store.list_groups().await?);
        let query = build_scan_query(options.range, &options.categories);

        let mut report = ScanReport::default();
        let mut checkpoint = match self.store.get_checkpoint().await? {
            Some(cp) if cp.resumable_for(options.range, &options.categories) => {
                report.resumed = true;
                cp
            }
            Some(cp) => {
                let mut fresh = ScanCheckpoint::new(options.range, options.categories.clone());
                fresh.processed_message_ids = cp.processed_message_ids;
                fresh
            }
            None => ScanCheckpoint::new(options.range, options.categories.clone()),
        };
        let mut page_token = checkpoint.next_page_token.clone();
        let page_size = options.page_size.max(1);
        let concurrency = options.concurrency.max(1);

        info!(%query, resumed = report.resumed, "scan started");

        loop {
            if self.cancel.is_cancelled() {
                self.persist(&grouper, &checkpoint).await?;
                info!(pages = report.pages, added = report.added, "scan cancelled");
                return Err(InboxError::Cancelled);
            }

            let page = match self
                .source
                .list_messages(&query, page_size, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                // Page tokens expire; a rejected resume token restarts the listing.
                Err(InboxError::InvalidInput(msg)) if report.resumed && report.pages == 0 => {
                    warn!(error = %msg, "saved page token rejected, restarting from the first page");
                    report.resumed = false;
                    checkpoint.next_page_token = None;
                    page_token = None;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, pages = report.pages, "page fetch failed, saving progress");
                    if let Err(persist_err) = self.persist(&grouper, &checkpoint).await {
                        warn!(error = %persist_err, "failed to save progress");
                    }
                    return Err(e);
                }
            };
            report.pages += 1;
            report.listed += page.ids.len() as u64;

            let unseen: Vec<String> = page
                .ids
                .iter()
                .filter(|id| !checkpoint.processed_message_ids.contains(id.as_str()))
                .cloned()
                .collect();
            report.already_processed += (page.ids.len() - unseen.len()) as u64;

            let source = self.source.as_ref();
            let fetched: Vec<_> = stream::iter(unseen)
                .map(move |id: String| async move {
                    let result = source.get_message_metadata(&id, &METADATA_HEADERS).await;
                    (id, result)
                })
                .buffered(concurrency)
                .collect()
                .await;

            for (id, result) in fetched {
                match result {
                    Ok(raw) => {
                        grouper.add_message(&parse_message(&raw, &rules));
                        checkpoint.processed_message_ids.insert(id);
                        report.added += 1;
                    }
                    Err(e) => {
                        warn!(id = %id, error = %e, "metadata fetch failed, will retry next scan");
                        report.failed += 1;
                    }
                }
            }

            checkpoint.next_page_token = page.next_page_token.clone();
            checkpoint.complete = page.next_page_token.is_none();
            checkpoint.last_scan_time = Utc::now();
            self.persist(&grouper, &checkpoint).await?;

            on_progress(&ScanProgress {
                total: page.approx_total,
                processed: report.listed,
                page_token: page.next_page_token.clone(),
            });
            debug!(page = report.pages, listed = report.listed, groups = grouper.len(), "page folded");

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        report.groups = grouper.len();
        info!(
            pages = report.pages,
            added = report.added,
            skipped = report.already_processed,
            failed = report.failed,
            groups = report.groups,
            "scan finished"
        );
        Ok(report)
    }

    async fn persist(&self, grouper: &MessageGrouper, checkpoint: &ScanCheckpoint) -> Result<(), InboxError> {
        self.store.replace_groups(&grouper.groups()).await?;
        self.store.put_checkpoint(checkpoint).await
    }
}

/// Exclusive claim on an orchestrator; released on drop.
#[derive(Debug)]
pub struct ScanPermit(Arc<AtomicBool>);

impl ScanPermit {
    fn acquire(flag: Arc<AtomicBool>) -> Result<Self, InboxError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| InboxError::ScanInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_for_default_categories() {
        assert_eq!(
            build_scan_query(TimeWindow::SevenDays, &Category::ALL),
            "(category:promotions OR category:forums OR category:updates) newer_than:7d"
        );
    }

    #[test]
    fn query_without_recency_or_categories() {
        assert_eq!(
            build_scan_query(TimeWindow::All, &[Category::Forums]),
            "(category:forums)"
        );
        assert_eq!(build_scan_query(TimeWindow::TwelveMonths, &[]), "newer_than:1y");
    }

    #[test]
    fn permit_is_exclusive_and_released_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let permit = ScanPermit::acquire(flag.clone());
        assert!(permit.is_ok());
        assert!(matches!(ScanPermit::acquire(flag.clone()), Err(InboxError::ScanInProgress)));
        drop(permit);
        assert!(ScanPermit::acquire(flag).is_ok());
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::default();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
