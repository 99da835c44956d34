//! Side-effecting half of the engine: the scan loop that feeds the
//! grouper, the action executor and caller-facing formatting.

pub mod executor;
pub mod format;
pub mod mailto;
pub mod scan;

pub use executor::{ActionExecutor, BatchProgress, BatchSummary, CleanupOutcome};
pub use format::Format;
pub use mailto::{build_mailto_uri, MailtoRequest};
pub use scan::{
    build_scan_query, CancelToken, ScanOptions, ScanOrchestrator, ScanPermit, ScanReport,
};
