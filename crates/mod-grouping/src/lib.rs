//! Classification and grouping core: header extraction, unsubscribe
//! detection, safety classification, body-link fallback and the
//! per-sender aggregator. Everything here is synchronous and total.

pub mod body_scan;
pub mod grouper;
pub mod headers;
pub mod query;
pub mod safety;
pub mod unsubscribe;

pub use body_scan::scan_body_for_unsubscribe_link;
pub use grouper::{generate_group_id, MessageGrouper};
pub use headers::{parse_message, METADATA_HEADERS};
pub use query::{filter_groups, group_stats, sort_groups, GroupFilter, GroupStats, SortKey};
pub use safety::{check_safety, SafetyRules};
pub use unsubscribe::detect_unsubscribe_method;
