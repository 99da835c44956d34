use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered header multimap with case-insensitive name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First value whose name matches, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.push(name, value);
        }
        headers
    }
}

/// One email as delivered by the message source, before any classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub headers: Headers,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Promotions,
    Forums,
    Updates,
}

impl Category {
    pub const ALL: [Category; 3] = [Self::Promotions, Self::Forums, Self::Updates];

    /// Gmail system label carrying this category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Promotions => "CATEGORY_PROMOTIONS",
            Self::Forums => "CATEGORY_FORUMS",
            Self::Updates => "CATEGORY_UPDATES",
        }
    }

    /// Search operator value, as in `category:promotions`.
    pub fn query_term(&self) -> &'static str {
        match self {
            Self::Promotions => "promotions",
            Self::Forums => "forums",
            Self::Updates => "updates",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Promotions => write!(f, "Promotions"),
            Self::Forums => write!(f, "Forums"),
            Self::Updates => write!(f, "Updates"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "promotions" | "category_promotions" => Ok(Self::Promotions),
            "forums" | "category_forums" => Ok(Self::Forums),
            "updates" | "category_updates" => Ok(Self::Updates),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnsubscribeKind {
    OneClick,
    Http,
    Mailto,
    Unknown,
}

impl UnsubscribeKind {
    /// Merge rank: one-click(3) > http(2) > mailto(1) > unknown(0).
    pub fn priority(&self) -> u8 {
        match self {
            Self::OneClick => 3,
            Self::Http => 2,
            Self::Mailto => 1,
            Self::Unknown => 0,
        }
    }
}

impl fmt::Display for UnsubscribeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneClick => write!(f, "one-click"),
            Self::Http => write!(f, "http"),
            Self::Mailto => write!(f, "mailto"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for UnsubscribeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "one-click" | "oneclick" | "one_click" => Ok(Self::OneClick),
            "http" | "https" | "link" => Ok(Self::Http),
            "mailto" | "email" => Ok(Self::Mailto),
            "unknown" | "none" => Ok(Self::Unknown),
            _ => Err(format!("unknown unsubscribe kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Mechanism {
    OneClick {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mailto: Option<String>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mailto: Option<String>,
    },
    Mailto {
        mailto: String,
    },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeMethod {
    #[serde(flatten)]
    pub mechanism: Mechanism,
    pub has_list_id: bool,
}

impl UnsubscribeMethod {
    pub fn unknown(has_list_id: bool) -> Self {
        Self {
            mechanism: Mechanism::Unknown,
            has_list_id,
        }
    }

    pub fn kind(&self) -> UnsubscribeKind {
        match self.mechanism {
            Mechanism::OneClick { .. } => UnsubscribeKind::OneClick,
            Mechanism::Http { .. } => UnsubscribeKind::Http,
            Mechanism::Mailto { .. } => UnsubscribeKind::Mailto,
            Mechanism::Unknown => UnsubscribeKind::Unknown,
        }
    }

    pub fn priority(&self) -> u8 {
        self.kind().priority()
    }

    /// Strictly higher rank; equal ranks never replace each other.
    pub fn outranks(&self, other: &UnsubscribeMethod) -> bool {
        self.priority() > other.priority()
    }

    pub fn url(&self) -> Option<&str> {
        match &self.mechanism {
            Mechanism::OneClick { url, .. } | Mechanism::Http { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn mailto(&self) -> Option<&str> {
        match &self.mechanism {
            Mechanism::OneClick { mailto, .. } | Mechanism::Http { mailto, .. } => {
                mailto.as_deref()
            }
            Mechanism::Mailto { mailto } => Some(mailto),
            Mechanism::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyInfo {
    pub protected: bool,
    pub reasons: Vec<String>,
}

impl SafetyInfo {
    /// Builds from matched rules; duplicates are dropped, first occurrence wins.
    pub fn from_reasons(reasons: impl IntoIterator<Item = String>) -> Self {
        let mut info = Self::default();
        for reason in reasons {
            info.add_reason(reason);
        }
        info
    }

    pub fn add_reason(&mut self, reason: String) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
        self.protected = true;
    }

    /// OR the flag and union the reasons.
    pub fn merge(&mut self, other: &SafetyInfo) {
        self.protected |= other.protected;
        for reason in &other.reasons {
            if !self.reasons.contains(reason) {
                self.reasons.push(reason.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub id: String,
    pub from: String,
    pub email: String,
    pub domain: String,
    pub display_name: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    pub unsubscribe: UnsubscribeMethod,
    pub safety: SafetyInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

/// Aggregate of every message observed from one sender identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderGroup {
    pub id: String,
    pub display_name: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    pub message_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub unsubscribe: UnsubscribeMethod,
    pub safety: SafetyInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Unsubscribe,
    OpenLink,
    Mailto,
    Delete,
    Archive,
    Filter,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsubscribe => write!(f, "unsubscribe"),
            Self::OpenLink => write!(f, "open-link"),
            Self::Mailto => write!(f, "mailto"),
            Self::Delete => write!(f, "delete"),
            Self::Archive => write!(f, "archive"),
            Self::Filter => write!(f, "filter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionMethod {
    OneClick,
    Http,
    Mailto,
}

impl fmt::Display for ActionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneClick => write!(f, "one-click"),
            Self::Http => write!(f, "http"),
            Self::Mailto => write!(f, "mailto"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Fail,
    Skipped,
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Audit record; written once, never read back into grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub group_id: String,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ActionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub result: ActionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ActionLogEntry {
    pub fn new(group_id: impl Into<String>, action: ActionKind, result: ActionResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            group_id: group_id.into(),
            action,
            method: None,
            count: None,
            result,
            note: None,
        }
    }

    pub fn with_method(mut self, method: ActionMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

pub const SCOPE_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
pub const SCOPE_SEND: &str = "https://www.googleapis.com/auth/gmail.send";
pub const SCOPE_SETTINGS: &str = "https://www.googleapis.com/auth/gmail.settings.basic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub theme: Theme,
    pub protected_keywords: Vec<String>,
    pub protected_domains: Vec<String>,
    pub enable_modify_scope: bool,
    pub enable_send_scope: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let keywords = [
            "bank", "invoice", "receipt", "statement", "otp", "verification", "password",
            "security", "ticket", "itinerary", "delivery", "order", "payment", "tax", "medical",
            "health", "insurance", "bill", "two-factor", "confirm", "account", "2fa", "code",
        ];
        let domains = [
            "bank.", "visa.", "mastercard.", "paypal.", "stripe.", "amazon.", "flipkart.",
            ".gov", "irs.", "healthcare.", "hospital.", "clinic.", "doctor.",
        ];
        Self {
            theme: Theme::System,
            protected_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            protected_domains: domains.iter().map(|s| s.to_string()).collect(),
            enable_modify_scope: false,
            enable_send_scope: false,
        }
    }
}

impl Settings {
    /// Gmail OAuth scopes the credential collaborator should request.
    pub fn oauth_scopes(&self) -> Vec<&'static str> {
        let mut scopes = vec![SCOPE_READONLY];
        if self.enable_modify_scope {
            scopes.push(SCOPE_MODIFY);
            scopes.push(SCOPE_SETTINGS);
        }
        if self.enable_send_scope {
            scopes.push(SCOPE_SEND);
        }
        scopes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "3d")]
    #[default]
    ThreeDays,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "12m")]
    TwelveMonths,
    #[serde(rename = "all")]
    All,
}

impl TimeWindow {
    /// Value for the `newer_than:` operator; `None` for all time.
    pub fn newer_than(&self) -> Option<&'static str> {
        match self {
            Self::ThreeDays => Some("3d"),
            Self::SevenDays => Some("7d"),
            Self::ThreeMonths => Some("3m"),
            Self::SixMonths => Some("6m"),
            Self::TwelveMonths => Some("1y"),
            Self::All => None,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ThreeDays => "3d",
            Self::SevenDays => "7d",
            Self::ThreeMonths => "3m",
            Self::SixMonths => "6m",
            Self::TwelveMonths => "12m",
            Self::All => "all",
        };
        f.write_str(s)
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "3d" => Ok(Self::ThreeDays),
            "7d" | "1w" => Ok(Self::SevenDays),
            "3m" => Ok(Self::ThreeMonths),
            "6m" => Ok(Self::SixMonths),
            "12m" | "1y" => Ok(Self::TwelveMonths),
            "all" => Ok(Self::All),
            _ => Err(format!("unknown time window: {s}")),
        }
    }
}

/// Persisted scan progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub last_scan_time: DateTime<Utc>,
    pub processed_message_ids: BTreeSet<String>,
    pub scan_range: TimeWindow,
    pub categories: Vec<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    pub complete: bool,
}

impl ScanCheckpoint {
    pub fn new(scan_range: TimeWindow, categories: Vec<Category>) -> Self {
        Self {
            last_scan_time: Utc::now(),
            processed_message_ids: BTreeSet::new(),
            scan_range,
            categories,
            next_page_token: None,
            complete: false,
        }
    }

    /// An unfinished run over the same query can pick up at its page token.
    pub fn resumable_for(&self, scan_range: TimeWindow, categories: &[Category]) -> bool {
        !self.complete
            && self.next_page_token.is_some()
            && self.scan_range == scan_range
            && self.categories == categories
    }
}

/// Portable snapshot of everything the store holds.
///
/// Missing collections deserialize as empty, so a hand-trimmed file with
/// only `groups` still imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExport {
    #[serde(default)]
    pub groups: Vec<SenderGroup>,
    #[serde(default)]
    pub action_log: Vec<ActionLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<ScanCheckpoint>,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
}

/// Folds `incoming` log entries into `current` by id, oldest first.
pub fn merge_action_log(current: &mut Vec<ActionLogEntry>, incoming: &[ActionLogEntry]) {
    for entry in incoming {
        if !current.iter().any(|e| e.id == entry.id) {
            current.push(entry.clone());
        }
    }
    current.sort_by(|a, b| a.ts.cmp(&b.ts));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    Archive,
    Trash,
}

impl fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => write!(f, "archive"),
            Self::Trash => write!(f, "trash"),
        }
    }
}

impl FromStr for CleanupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "archive" => Ok(Self::Archive),
            "trash" | "delete" => Ok(Self::Trash),
            _ => Err(format!("unknown cleanup mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupPolicy {
    pub mode: CleanupMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<usize>,
    /// Restricts targets to the window a scan covered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<TimeWindow>,
}

impl CleanupPolicy {
    pub fn archive() -> Self {
        Self {
            mode: CleanupMode::Archive,
            older_than_days: None,
            keep_last: None,
            within: None,
        }
    }

    pub fn trash() -> Self {
        Self {
            mode: CleanupMode::Trash,
            ..Self::archive()
        }
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = Some(n);
        self
    }

    pub fn older_than_days(mut self, days: u32) -> Self {
        self.older_than_days = Some(days);
        self
    }

    pub fn within(mut self, window: TimeWindow) -> Self {
        self.within = Some(window);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Trash,
    Archive,
}

impl From<CleanupMode> for MutationOp {
    fn from(mode: CleanupMode) -> Self {
        match mode {
            CleanupMode::Archive => Self::Archive,
            CleanupMode::Trash => Self::Trash,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAction {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_label_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
    pub approx_total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub total: u64,
    pub processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl fmt::Display for SenderGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> ({} messages, {})",
            self.display_name,
            self.domain,
            self.message_count,
            self.unsubscribe.kind()
        )
    }
}
