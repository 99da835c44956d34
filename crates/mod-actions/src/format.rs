use chrono::{DateTime, Utc};
use quietinbox_domain::{ActionLogEntry, SenderGroup, Settings};
use quietinbox_grouping::GroupStats;

use crate::executor::{BatchSummary, CleanupOutcome};
use crate::scan::ScanReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Compact,
    Expanded,
    Full,
}

impl Format {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("full") => Self::Full,
            Some("expanded") => Self::Expanded,
            _ => Self::Compact,
        }
    }
}

pub fn format_groups(groups: &[SenderGroup], fmt: Format) -> String {
    match fmt {
        Format::Compact | Format::Expanded => {
            let mut lines: Vec<String> = Vec::with_capacity(groups.len() + 1);
            lines.push(format!("{} groups:", groups.len()));
            for g in groups {
                lines.push(format!("  {}", format_group_line(g, fmt == Format::Expanded)));
            }
            lines.join("\n")
        }
        Format::Full => to_json(groups),
    }
}

pub fn format_group(group: &SenderGroup, fmt: Format) -> String {
    match fmt {
        Format::Compact => format_group_line(group, false),
        Format::Expanded => format_group_line(group, true),
        Format::Full => to_json(group),
    }
}

fn format_group_line(g: &SenderGroup, expanded: bool) -> String {
    let name = if expanded {
        g.display_name.clone()
    } else {
        truncate(&g.display_name, 40)
    };
    let mut parts = vec![
        format!("{name} <{}>", g.domain),
        format!("{} msgs", g.message_count),
        g.unsubscribe.kind().to_string(),
    ];
    if let Some(category) = g.category {
        parts.push(category.to_string().to_lowercase());
    }
    if g.safety.protected {
        parts.push("PROTECTED".to_string());
    }
    parts.push(format!("last:{}", format_timestamp(&g.last_seen)));
    if expanded {
        parts.push(format!("first:{}", format_timestamp(&g.first_seen)));
        if let Some(url) = g.unsubscribe.url() {
            parts.push(format!("url:{url}"));
        }
        if let Some(mailto) = g.unsubscribe.mailto() {
            parts.push(format!("mailto:{}", mailto.trim_start_matches("mailto:")));
        }
        if !g.safety.reasons.is_empty() {
            parts.push(format!("reasons:{}", g.safety.reasons.join("; ")));
        }
    }
    parts.push(format!("id:{}", g.id));
    parts.join(" | ")
}

pub fn format_stats(stats: &GroupStats, fmt: Format) -> String {
    match fmt {
        Format::Compact | Format::Expanded => {
            let mut lines = vec![
                format!("{} groups, {} messages", stats.total_groups, stats.total_messages),
                format!(
                    "  one-click:{} http:{} mailto:{} unknown:{}",
                    stats.one_click_available, stats.http_available, stats.mailto_only, stats.unknown
                ),
                format!("  protected:{}", stats.protected),
            ];
            if !stats.by_category.is_empty() {
                let cats: Vec<String> = stats
                    .by_category
                    .iter()
                    .map(|(c, n)| format!("{c}:{n}"))
                    .collect();
                lines.push(format!("  {}", cats.join(" ")));
            }
            lines.join("\n")
        }
        Format::Full => to_json(stats),
    }
}

pub fn format_action_log(entries: &[ActionLogEntry], fmt: Format) -> String {
    match fmt {
        Format::Compact | Format::Expanded => {
            let mut lines: Vec<String> = Vec::with_capacity(entries.len() + 1);
            lines.push(format!("{} actions:", entries.len()));
            for e in entries {
                let method = e.method.map(|m| format!(" via {m}")).unwrap_or_default();
                let count = e.count.map(|c| format!(" x{c}")).unwrap_or_default();
                let note = match (&e.note, fmt) {
                    (Some(n), Format::Expanded) => format!(" ({n})"),
                    (Some(n), _) => format!(" ({})", truncate(n, 80)),
                    (None, _) => String::new(),
                };
                lines.push(format!(
                    "  [{}] {} {}{method}{count}: {}{note}",
                    format_timestamp(&e.ts),
                    e.group_id,
                    e.action,
                    e.result
                ));
            }
            lines.join("\n")
        }
        Format::Full => to_json(entries),
    }
}

pub fn format_scan_report(report: &ScanReport) -> String {
    let mut out = format!(
        "scanned {} pages: {} listed, {} added, {} already processed, {} failed -> {} groups",
        report.pages, report.listed, report.added, report.already_processed, report.failed, report.groups
    );
    if report.resumed {
        out.push_str(" (resumed)");
    }
    out
}

pub fn format_cleanup(group_id: &str, outcome: &CleanupOutcome) -> String {
    format!("{group_id}: {} ({} messages)", outcome.result, outcome.count)
}

pub fn format_batch_summary(summary: &BatchSummary) -> String {
    format!(
        "unsubscribe: {} succeeded, {} failed, {} skipped",
        summary.success, summary.fail, summary.skipped
    )
}

pub fn format_settings(settings: &Settings, fmt: Format) -> String {
    match fmt {
        Format::Full => to_json(settings),
        Format::Compact | Format::Expanded => {
            let scopes = settings.oauth_scopes();
            let short: Vec<&str> = scopes
                .iter()
                .map(|s| s.rsplit('/').next().unwrap_or_default())
                .collect();
            format!(
                "theme:{} | keywords:{} | domains:{} | modify:{} | send:{} | scopes:{}",
                serde_json::to_value(settings.theme)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                settings.protected_keywords.len(),
                settings.protected_domains.len(),
                settings.enable_modify_scope,
                settings.enable_send_scope,
                short.join(",")
            )
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%b %d %Y %H:%M").to_string()
}

fn truncate(s: &str, max: usize) -> String {
    let oneline: String = s.chars().filter(|c| *c != '\r').collect::<String>().replace('\n', " ");
    if oneline.chars().count() > max {
        let truncated: String = oneline.chars().take(max).collect();
        format!("{truncated}...")
    } else {
        oneline
    }
}

fn to_json<T: serde::Serialize + ?Sized>(val: &T) -> String {
    serde_json::to_string(val).unwrap_or_else(|e| format!("serialization error: {e}"))
}
