use std::sync::{Arc, Mutex, MutexGuard};

use quietinbox_actions::format;
use quietinbox_actions::{ActionExecutor, Format, ScanOptions, ScanOrchestrator, ScanReport};
use quietinbox_domain::{
    Category, CleanupMode, CleanupPolicy, DataExport, ScanProgress, SenderGroup, Settings, Store,
    TimeWindow, UnsubscribeKind,
};
use quietinbox_error::{ErrorResponse, InboxError};
use quietinbox_grouping::{filter_groups, group_stats, sort_groups, GroupFilter, SortKey};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::tools;
use super::types::*;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_PAGE_SIZE: usize = 500;
const SETTINGS_FIELDS: [&str; 5] = [
    "theme",
    "protected_keywords",
    "protected_domains",
    "enable_modify_scope",
    "enable_send_scope",
];

#[derive(Debug, Default)]
struct ScanState {
    progress: Option<ScanProgress>,
    last: Option<Result<ScanReport, String>>,
}

pub struct McpServer {
    store: Arc<dyn Store>,
    scanner: Arc<ScanOrchestrator>,
    executor: ActionExecutor,
    scan_defaults: ScanOptions,
    scan_state: Arc<Mutex<ScanState>>,
}

impl McpServer {
    pub fn new(
        store: Arc<dyn Store>,
        scanner: Arc<ScanOrchestrator>,
        executor: ActionExecutor,
        scan_defaults: ScanOptions,
    ) -> Self {
        Self {
            store,
            scanner,
            executor,
            scan_defaults,
            scan_state: Arc::new(Mutex::new(ScanState::default())),
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        debug!("MCP server started, waiting for requests on stdin");

        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            let msg: RpcMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    let resp =
                        RpcResponse::err(Value::Null, PARSE_ERROR, format!("parse error: {e}"));
                    write_response(&mut stdout, &resp).await?;
                    continue;
                }
            };

            if msg.id.is_none() {
                if msg.method.as_deref() == Some("notifications/initialized") {
                    debug!("client initialized");
                }
                continue;
            }

            let id = msg.id.clone().unwrap_or(Value::Null);

            if !msg.is_valid_jsonrpc() {
                let resp = RpcResponse::err(
                    id,
                    INVALID_REQUEST,
                    "invalid jsonrpc version (expected \"2.0\")",
                );
                write_response(&mut stdout, &resp).await?;
                continue;
            }

            let method = msg.method.as_deref().unwrap_or("");

            let resp = match method {
                "" => RpcResponse::err(id, INVALID_REQUEST, "missing method"),
                "initialize" => self.handle_initialize(id),
                "tools/list" => RpcResponse::ok(id, json!({ "tools": tools::available_tools() })),
                "tools/call" => self.handle_tools_call(id, msg.params).await,
                "ping" => RpcResponse::ok(id, json!({})),
                _ => RpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown method: {method}")),
            };

            write_response(&mut stdout, &resp).await?;
        }

        debug!("stdin closed, MCP server shutting down");
        Ok(())
    }

    fn handle_initialize(&self, id: Value) -> RpcResponse {
        RpcResponse::ok(
            id,
            json!({
                "protocolVersion": "2025-11-25",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "quietinbox",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> RpcResponse {
        let params: CallToolParams = match params.and_then(|v| serde_json::from_value(v).ok()) {
            Some(p) => p,
            None => return RpcResponse::err(id, INVALID_PARAMS, "missing or invalid params"),
        };

        let args = params.arguments.unwrap_or(json!({}));
        let tool_result = match self.dispatch_tool(&params.name, &args).await {
            Ok(text) => ToolResult::success(text),
            Err(e) => ToolResult::failure(e),
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => RpcResponse::ok(id, val),
            Err(e) => RpcResponse::err(id, INTERNAL_ERROR, format!("serialization error: {e}")),
        }
    }

    async fn dispatch_tool(&self, name: &str, args: &Value) -> Result<String, String> {
        let fmt = Format::parse(args.get("format").and_then(|v| v.as_str()));

        match name {
            "scan_mailbox" => self.start_scan(args),
            "scan_status" => Ok(self.scan_status()),
            "cancel_scan" => {
                if !self.scanner.is_running() {
                    return Ok("No scan running".to_string());
                }
                self.scanner.cancel_token().cancel();
                info!("scan cancellation requested");
                Ok("Cancelling scan; it stops before the next page".to_string())
            }
            "list_groups" => {
                let filter = parse_filter(args)?;
                let sort = match get_str_opt(args, "sort") {
                    Some(s) => s.parse::<SortKey>()?,
                    None => SortKey::default(),
                };
                let ascending = get_bool(args, "ascending");
                let limit = get_usize(args, "limit")?.unwrap_or(DEFAULT_LIST_LIMIT);

                let groups = self.store.list_groups().await.map_err(fmt_err)?;
                let mut matched = filter_groups(&groups, &filter);
                sort_groups(&mut matched, sort, ascending);
                matched.truncate(limit);
                Ok(format::format_groups(&matched, fmt))
            }
            "get_group" => {
                let group = self.require_group(args).await?;
                Ok(format::format_group(&group, fmt))
            }
            "group_stats" => {
                let groups = self.store.list_groups().await.map_err(fmt_err)?;
                Ok(format::format_stats(&group_stats(&groups), fmt))
            }
            "delete_group" => {
                let id = get_str(args, "group_id")?;
                self.ensure_no_scan()?;
                self.store.delete_group(id).await.map_err(fmt_err)?;
                info!(group = id, "group deleted");
                Ok(format!("Deleted group {id}"))
            }
            "unsubscribe" => {
                let group = self.require_group(args).await?;
                check_protected(&group, args)?;
                if writes_back(&group) {
                    self.ensure_no_scan()?;
                }
                let result = self.executor.unsubscribe(&group).await;
                Ok(format!(
                    "{}: unsubscribe {result} ({})",
                    group.id,
                    group.unsubscribe.kind()
                ))
            }
            "batch_unsubscribe" => self.batch_unsubscribe(args).await,
            "estimate_cleanup" => {
                let group = self.require_group(args).await?;
                let policy = parse_policy(args)?;
                let count = self.executor.estimate(&group, &policy).await;
                let verb = match policy.mode {
                    CleanupMode::Archive => "archived",
                    CleanupMode::Trash => "moved to trash",
                };
                Ok(format!("{}: {count} message(s) would be {verb}", group.id))
            }
            "cleanup" => {
                let group = self.require_group(args).await?;
                check_protected(&group, args)?;
                let policy = parse_policy(args)?;
                let outcome = self.executor.cleanup(&group, &policy).await;
                Ok(format::format_cleanup(&group.id, &outcome))
            }
            "create_filter" => {
                let group = self.require_group(args).await?;
                let result = self.executor.create_filter(&group).await;
                Ok(format!("{}: filter for from:{} {result}", group.id, group.domain))
            }
            "action_log" => {
                let limit = get_usize(args, "limit")?.unwrap_or(DEFAULT_LIST_LIMIT);
                let group_id = get_str_opt(args, "group_id");
                let entries: Vec<_> = self
                    .store
                    .list_action_log()
                    .await
                    .map_err(fmt_err)?
                    .into_iter()
                    .filter(|e| group_id.map_or(true, |id| e.group_id == id))
                    .take(limit)
                    .collect();
                Ok(format::format_action_log(&entries, fmt))
            }
            "export_data" => self.export_data(args).await,
            "import_data" => self.import_data(args).await,
            "clear_data" => {
                if !get_bool(args, "confirm") {
                    return Err(
                        "clear_data drops all groups, the action log and scan progress. Pass confirm: true to proceed"
                            .to_string(),
                    );
                }
                self.ensure_no_scan()?;
                self.store.clear_data().await.map_err(fmt_err)?;
                info!("stored data cleared");
                Ok("Cleared groups, action log and scan progress; settings kept".to_string())
            }
            "get_settings" => {
                let settings = self.store.get_settings().await.map_err(fmt_err)?;
                Ok(format::format_settings(&settings, fmt))
            }
            "update_settings" => {
                let current = self.store.get_settings().await.map_err(fmt_err)?;
                let updated = merge_settings(&current, args)?;
                self.store.put_settings(&updated).await.map_err(fmt_err)?;
                info!("settings updated");
                Ok(format!(
                    "Settings updated\n{}",
                    format::format_settings(&updated, Format::Compact)
                ))
            }
            unknown => {
                warn!(tool = unknown, "unknown tool called");
                Err(format!("unknown tool: {unknown}"))
            }
        }
    }

    fn start_scan(&self, args: &Value) -> Result<String, String> {
        let options = self.parse_scan_options(args)?;
        let permit = self.scanner.reserve().map_err(fmt_err)?;
        lock(&self.scan_state).progress = None;

        let summary = format!(
            "{} started: range {}, categories {}",
            if options.fresh { "Fresh scan" } else { "Scan" },
            options.range,
            options
                .categories
                .iter()
                .map(|c| c.query_term())
                .collect::<Vec<_>>()
                .join(",")
        );

        let scanner = self.scanner.clone();
        let state = self.scan_state.clone();
        tokio::spawn(async move {
            let progress_state = state.clone();
            let result = scanner
                .scan_reserved(permit, &options, move |p| {
                    lock(&progress_state).progress = Some(p.clone());
                })
                .await;
            match &result {
                Ok(report) => info!(groups = report.groups, added = report.added, "scan finished"),
                Err(e) => warn!(error = %e, "scan ended early"),
            }
            lock(&state).last = Some(result.map_err(fmt_err));
        });

        Ok(summary)
    }

    fn scan_status(&self) -> String {
        let state = lock(&self.scan_state);
        let mut lines = Vec::new();
        if self.scanner.is_running() {
            match &state.progress {
                Some(p) => lines.push(format!(
                    "Scan running: {} of ~{} messages",
                    p.processed, p.total
                )),
                None => lines.push("Scan running: listing first page".to_string()),
            }
        } else {
            lines.push("No scan running".to_string());
        }
        match &state.last {
            Some(Ok(report)) => lines.push(format!("Last scan: {}", format::format_scan_report(report))),
            Some(Err(e)) => lines.push(format!("Last scan failed: {e}")),
            None => {}
        }
        lines.join("\n")
    }

    /// Tools that write groups would be overwritten by the scan's next page.
    fn ensure_no_scan(&self) -> Result<(), String> {
        if self.scanner.is_running() {
            return Err(fmt_err(InboxError::ScanInProgress));
        }
        Ok(())
    }

    async fn export_data(&self, args: &Value) -> Result<String, String> {
        let json = match get_str_opt(args, "scope").unwrap_or("all") {
            "all" => {
                let data = self.store.export_data().await.map_err(fmt_err)?;
                serde_json::to_string_pretty(&data)
            }
            "actions" => {
                let log = self.store.list_action_log().await.map_err(fmt_err)?;
                serde_json::to_string_pretty(&log)
            }
            other => return Err(format!("unknown scope: {other} (expected all or actions)")),
        }
        .map_err(|e| format!("serialization error: {e}"))?;

        match get_str_opt(args, "path") {
            Some(path) => {
                tokio::fs::write(path, &json)
                    .await
                    .map_err(|e| fmt_err(InboxError::storage(format!("write {path}: {e}"))))?;
                info!(path, "data exported");
                Ok(format!("Exported to {path} ({} bytes)", json.len()))
            }
            None => Ok(json),
        }
    }

    async fn import_data(&self, args: &Value) -> Result<String, String> {
        let data: DataExport = match (args.get("data"), get_str_opt(args, "path")) {
            (Some(value), _) => serde_json::from_value(value.clone())
                .map_err(|e| format!("invalid export data: {e}"))?,
            (None, Some(path)) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| fmt_err(InboxError::storage(format!("read {path}: {e}"))))?;
                serde_json::from_str(&content).map_err(|e| format!("invalid export file {path}: {e}"))?
            }
            (None, None) => return Err("missing 'data' or 'path' parameter".to_string()),
        };
        self.ensure_no_scan()?;
        self.store.import_data(&data).await.map_err(fmt_err)?;
        info!(groups = data.groups.len(), actions = data.action_log.len(), "data imported");
        Ok(format!(
            "Imported {} group(s) and {} action log entr{}",
            data.groups.len(),
            data.action_log.len(),
            if data.action_log.len() == 1 { "y" } else { "ies" }
        ))
    }

    async fn batch_unsubscribe(&self, args: &Value) -> Result<String, String> {
        let ids = get_str_array(args, "group_ids")?;
        let confirm = get_bool(args, "confirm");

        let mut groups = Vec::with_capacity(ids.len());
        let mut left_out = Vec::new();
        let mut missing = Vec::new();
        for id in &ids {
            match self.store.get_group(id).await.map_err(fmt_err)? {
                Some(g) if g.safety.protected && !confirm => left_out.push(g.id),
                Some(g) => groups.push(g),
                None => missing.push(id.clone()),
            }
        }

        if groups.iter().any(writes_back) {
            self.ensure_no_scan()?;
        }

        let mut lines = Vec::new();
        let summary = self
            .executor
            .batch_unsubscribe(&groups, |p| {
                debug!(index = p.index, total = p.total, group = %p.group_id, result = %p.result, "batch progress");
                lines.push(format!("  [{}/{}] {}: {}", p.index, p.total, p.group_id, p.result));
            })
            .await;

        let mut out = vec![format::format_batch_summary(&summary)];
        out.extend(lines);
        if !left_out.is_empty() {
            out.push(format!(
                "Protected, left out (pass confirm: true): {}",
                left_out.join(", ")
            ));
        }
        if !missing.is_empty() {
            out.push(format!("Unknown group ids: {}", missing.join(", ")));
        }
        Ok(out.join("\n"))
    }

    async fn require_group(&self, args: &Value) -> Result<SenderGroup, String> {
        let id = get_str(args, "group_id")?;
        self.store
            .get_group(id)
            .await
            .map_err(fmt_err)?
            .ok_or_else(|| fmt_err(InboxError::not_found(format!("group {id}"))))
    }

    fn parse_scan_options(&self, args: &Value) -> Result<ScanOptions, String> {
        let mut options = self.scan_defaults.clone();
        if let Some(range) = get_str_opt(args, "range") {
            options.range = range.parse::<TimeWindow>()?;
        }
        let categories = get_str_array_opt(args, "categories");
        if !categories.is_empty() {
            options.categories = categories
                .iter()
                .map(|c| c.parse::<Category>())
                .collect::<Result<_, _>>()?;
        }
        if let Some(size) = get_usize(args, "page_size")? {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(format!("'page_size' must be between 1 and {MAX_PAGE_SIZE}"));
            }
            options.page_size = size;
        }
        options.fresh = get_bool(args, "fresh");
        Ok(options)
    }
}

fn lock(state: &Mutex<ScanState>) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fmt_err(e: InboxError) -> String {
    ErrorResponse::from(&e).to_compact()
}

/// Body-link unsubscribes store the link they find on the group.
fn writes_back(group: &SenderGroup) -> bool {
    group.unsubscribe.kind() == UnsubscribeKind::Unknown
}

fn check_protected(group: &SenderGroup, args: &Value) -> Result<(), String> {
    if group.safety.protected && !get_bool(args, "confirm") {
        return Err(format!(
            "{} is protected ({}). Pass confirm: true to proceed",
            group.id,
            group.safety.reasons.join(" ")
        ));
    }
    Ok(())
}

fn parse_filter(args: &Value) -> Result<GroupFilter, String> {
    let category = get_str_opt(args, "category")
        .map(|c| c.parse::<Category>())
        .transpose()?;
    let kinds = get_str_array_opt(args, "kinds")
        .iter()
        .map(|k| k.parse::<UnsubscribeKind>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GroupFilter {
        category,
        min_messages: args.get("min_messages").and_then(|v| v.as_u64()),
        max_messages: args.get("max_messages").and_then(|v| v.as_u64()),
        kinds,
        protected: args.get("protected").and_then(|v| v.as_bool()),
        search: get_str_opt(args, "search").map(str::to_string),
    })
}

fn parse_policy(args: &Value) -> Result<CleanupPolicy, String> {
    let mut policy = match get_str_opt(args, "mode") {
        Some(mode) => match mode.parse::<CleanupMode>()? {
            CleanupMode::Archive => CleanupPolicy::archive(),
            CleanupMode::Trash => CleanupPolicy::trash(),
        },
        None => CleanupPolicy::archive(),
    };
    if let Some(days) = args.get("older_than_days").and_then(|v| v.as_u64()) {
        let days = u32::try_from(days).map_err(|_| "'older_than_days' is too large".to_string())?;
        policy = policy.older_than_days(days);
    }
    if let Some(n) = get_usize(args, "keep_last")? {
        policy = policy.keep_last(n);
    }
    if let Some(range) = get_str_opt(args, "range") {
        policy = policy.within(range.parse::<TimeWindow>()?);
    }
    Ok(policy)
}

/// Applies only the recognized fields present in `args`.
fn merge_settings(current: &Settings, args: &Value) -> Result<Settings, String> {
    let mut value = serde_json::to_value(current).map_err(|e| format!("serialization error: {e}"))?;
    let mut changed = false;
    for key in SETTINGS_FIELDS {
        if let Some(v) = args.get(key) {
            value[key] = v.clone();
            changed = true;
        }
    }
    if !changed {
        return Err(format!("no settings given. Fields: {}", SETTINGS_FIELDS.join(", ")));
    }
    serde_json::from_value(value).map_err(|e| format!("invalid settings: {e}"))
}

fn get_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or(format!("missing '{key}' parameter"))
}

fn get_str_opt<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn get_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn get_usize(args: &Value, key: &str) -> Result<Option<usize>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or(format!("'{key}' must be a non-negative integer")),
    }
}

fn get_str_array(args: &Value, key: &str) -> Result<Vec<String>, String> {
    let arr = args
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or(format!("missing '{key}' parameter"))?;
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or(format!("'{key}[{i}]' is not a string"))
        })
        .collect()
}

fn get_str_array_opt(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    resp: &RpcResponse,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string(resp)?;
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
