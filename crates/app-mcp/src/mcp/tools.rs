use serde_json::json;

use super::types::ToolDef;

pub fn available_tools() -> Vec<ToolDef> {
    let mut tools = scan_tools();
    tools.extend(group_tools());
    tools.extend(action_tools());
    tools.extend(settings_tools());
    tools.extend(data_tools());
    tools
}

fn format_param() -> serde_json::Value {
    json!({
        "type": "string",
        "description": "Response format: 'compact' (default, one line per group, names truncated), 'expanded' (one line per group with list id, first seen and safety reasons), or 'full' (complete JSON). Use full when you need exact field values.",
        "enum": ["compact", "expanded", "full"]
    })
}

fn group_id_param() -> serde_json::Value {
    json!({
        "type": "string",
        "description": "Group id as shown by list_groups (a List-Id, 'domain:<domain>' or 'name:<slug>')"
    })
}

fn confirm_param() -> serde_json::Value {
    json!({
        "type": "boolean",
        "description": "Required when the group is protected (banking, receipts, security mail and similar)"
    })
}

fn cleanup_properties() -> serde_json::Value {
    json!({
        "group_id": group_id_param(),
        "mode": {
            "type": "string",
            "description": "'archive' (default, removes from inbox) or 'trash'",
            "enum": ["archive", "trash"]
        },
        "older_than_days": {
            "type": "integer",
            "description": "Only touch messages older than this many days"
        },
        "keep_last": {
            "type": "integer",
            "description": "Leave the N most recent messages alone"
        },
        "range": {
            "type": "string",
            "description": "Only touch messages inside this window, usually the range that was scanned",
            "enum": ["3d", "7d", "3m", "6m", "12m", "all"]
        }
    })
}

fn cleanup_properties_with_confirm() -> serde_json::Value {
    let mut props = cleanup_properties();
    props["confirm"] = confirm_param();
    props
}

fn scan_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "scan_mailbox",
            description: "Start a background scan of Gmail category tabs and group messages by sender. Returns immediately; poll scan_status for progress. An interrupted scan with the same range and categories resumes where it stopped, and messages already grouped are never counted twice.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "range": {
                        "type": "string",
                        "description": "Time window (default: 3d)",
                        "enum": ["3d", "7d", "3m", "6m", "12m", "all"]
                    },
                    "categories": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["promotions", "forums", "updates"]},
                        "description": "Category tabs to scan (default: all three)"
                    },
                    "page_size": {
                        "type": "integer",
                        "description": "Messages listed per page (default: QUIETINBOX_PAGE_SIZE or 100)"
                    },
                    "fresh": {
                        "type": "boolean",
                        "description": "Forget stored groups and scan progress and rebuild from scratch"
                    }
                }
            }),
        },
        ToolDef {
            name: "scan_status",
            description: "Report whether a scan is running, its progress, and the outcome of the last finished scan.",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDef {
            name: "cancel_scan",
            description: "Stop the running scan before its next page. Progress is checkpointed so scan_mailbox can resume.",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

fn group_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "list_groups",
            description: "List sender groups found by scanning, with optional filters and sorting. Default order is most messages first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {
                        "type": "string",
                        "enum": ["promotions", "forums", "updates"]
                    },
                    "min_messages": {"type": "integer"},
                    "max_messages": {"type": "integer"},
                    "kinds": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["one-click", "http", "mailto", "unknown"]},
                        "description": "Only groups whose best unsubscribe method is one of these"
                    },
                    "protected": {
                        "type": "boolean",
                        "description": "true for protected groups only, false to hide them"
                    },
                    "search": {
                        "type": "string",
                        "description": "Case-insensitive match on name, domain or id"
                    },
                    "sort": {
                        "type": "string",
                        "description": "Sort key (default: count)",
                        "enum": ["count", "last_seen", "first_seen", "name"]
                    },
                    "ascending": {"type": "boolean"},
                    "limit": {
                        "type": "integer",
                        "description": "Max groups to return (default: 50)"
                    },
                    "format": format_param()
                }
            }),
        },
        ToolDef {
            name: "get_group",
            description: "Show one sender group including its unsubscribe method and safety reasons.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_id": group_id_param(),
                    "format": format_param()
                },
                "required": ["group_id"]
            }),
        },
        ToolDef {
            name: "group_stats",
            description: "Totals across all groups: messages, unsubscribe method availability, protected count and per-category counts.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "format": format_param()
                }
            }),
        },
        ToolDef {
            name: "delete_group",
            description: "Forget a sender group. Its messages are not touched and it reappears only for messages not yet scanned. Refused while a scan runs.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_id": group_id_param()
                },
                "required": ["group_id"]
            }),
        },
    ]
}

fn action_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "unsubscribe",
            description: "Unsubscribe from a sender using its best method: RFC 8058 one-click POST, opening the unsubscribe page, a mailto request, or a link found in a recent message body.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_id": group_id_param(),
                    "confirm": confirm_param()
                },
                "required": ["group_id"]
            }),
        },
        ToolDef {
            name: "batch_unsubscribe",
            description: "Unsubscribe from several senders in order, pausing between each. Protected groups are left out unless confirm is true.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_ids": {
                        "type": "array",
                        "items": {"type": "string"}
                    },
                    "confirm": confirm_param()
                },
                "required": ["group_ids"]
            }),
        },
        ToolDef {
            name: "estimate_cleanup",
            description: "Count how many messages a cleanup would touch without changing anything.",
            input_schema: json!({
                "type": "object",
                "properties": cleanup_properties(),
                "required": ["group_id"]
            }),
        },
        ToolDef {
            name: "cleanup",
            description: "Archive or trash a sender's messages in batches of up to 1000. Requires the modify scope.",
            input_schema: json!({
                "type": "object",
                "properties": cleanup_properties_with_confirm(),
                "required": ["group_id"]
            }),
        },
        ToolDef {
            name: "create_filter",
            description: "Create a Gmail filter that skips the inbox for future mail from this sender's domain.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_id": group_id_param()
                },
                "required": ["group_id"]
            }),
        },
        ToolDef {
            name: "action_log",
            description: "Show the audit log of unsubscribe, cleanup and filter actions, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "group_id": {
                        "type": "string",
                        "description": "Only entries for this group"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Max entries to return (default: 50)"
                    },
                    "format": format_param()
                }
            }),
        },
    ]
}

fn settings_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "get_settings",
            description: "Show user settings and the Gmail OAuth scopes they imply.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "format": format_param()
                }
            }),
        },
        ToolDef {
            name: "update_settings",
            description: "Change user settings. Only the fields given are changed. Protected lists apply to the next scan.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "theme": {
                        "type": "string",
                        "enum": ["light", "dark", "system"]
                    },
                    "protected_keywords": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Replaces the keyword list matched against the subject"
                    },
                    "protected_domains": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Replaces the domain fragment list matched against the sender domain"
                    },
                    "enable_modify_scope": {"type": "boolean"},
                    "enable_send_scope": {
                        "type": "boolean",
                        "description": "Send mailto unsubscribes through Gmail instead of the local mail client"
                    }
                }
            }),
        },
    ]
}

fn data_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "export_data",
            description: "Export groups, action log, settings and scan progress as JSON, or only the action log. Returns the JSON unless a path is given.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "scope": {
                        "type": "string",
                        "description": "'all' (default) or 'actions' for the action log only",
                        "enum": ["all", "actions"]
                    },
                    "path": {
                        "type": "string",
                        "description": "Write the export to this file instead of returning it"
                    }
                }
            }),
        },
        ToolDef {
            name: "import_data",
            description: "Import a full export. Groups are upserted by id, log entries merged by id, settings and scan progress replaced when present.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "data": {
                        "type": "object",
                        "description": "The object produced by export_data"
                    },
                    "path": {
                        "type": "string",
                        "description": "Read the export from this file when data is not given"
                    }
                }
            }),
        },
        ToolDef {
            name: "clear_data",
            description: "Delete all groups, the action log and scan progress. Settings are kept.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "confirm": {
                        "type": "boolean",
                        "description": "Must be true"
                    }
                },
                "required": ["confirm"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tool_names_are_unique() {
        let tools = available_tools();
        let names: HashSet<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), tools.len());
        for expected in [
            "scan_mailbox",
            "cancel_scan",
            "list_groups",
            "get_group",
            "group_stats",
            "unsubscribe",
            "batch_unsubscribe",
            "estimate_cleanup",
            "cleanup",
            "create_filter",
            "delete_group",
            "action_log",
            "get_settings",
            "update_settings",
            "export_data",
            "import_data",
            "clear_data",
        ] {
            assert!(names.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn cleanup_schema_carries_policy_fields() {
        let tools = available_tools();
        let cleanup = tools.iter().find(|t| t.name == "cleanup");
        let props = &cleanup.map(|t| t.input_schema.clone()).unwrap_or_default()["properties"];
        assert_eq!(props["mode"]["enum"][1], "trash");
        assert!(props["keep_last"].is_object());
        assert!(props["confirm"].is_object());
        assert_eq!(props["range"]["enum"][2], "3m");
    }
}
