//! Read-side helpers over a group snapshot: filtering, ordering and totals.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use quietinbox_domain::{Category, SenderGroup, UnsubscribeKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupFilter {
    pub category: Option<Category>,
    pub min_messages: Option<u64>,
    pub max_messages: Option<u64>,
    /// Empty means any method.
    pub kinds: Vec<UnsubscribeKind>,
    pub protected: Option<bool>,
    /// Case-insensitive match against display name, domain and id.
    pub search: Option<String>,
}

impl GroupFilter {
    pub fn matches(&self, group: &SenderGroup) -> bool {
        if let Some(category) = self.category {
            if group.category != Some(category) {
                return false;
            }
        }
        if self.min_messages.is_some_and(|min| group.message_count < min) {
            return false;
        }
        if self.max_messages.is_some_and(|max| group.message_count > max) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&group.unsubscribe.kind()) {
            return false;
        }
        if self.protected.is_some_and(|p| group.safety.protected != p) {
            return false;
        }
        if let Some(needle) = self.search.as_deref().map(str::to_lowercase) {
            let hit = group.display_name.to_lowercase().contains(&needle)
                || group.domain.contains(&needle)
                || group.id.contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

pub fn filter_groups(groups: &[SenderGroup], filter: &GroupFilter) -> Vec<SenderGroup> {
    groups.iter().filter(|g| filter.matches(g)).cloned().collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    MessageCount,
    LastSeen,
    FirstSeen,
    DisplayName,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "count" | "message_count" | "messages" => Ok(Self::MessageCount),
            "last_seen" | "recent" => Ok(Self::LastSeen),
            "first_seen" | "oldest" => Ok(Self::FirstSeen),
            "name" | "display_name" => Ok(Self::DisplayName),
            _ => Err(format!("unknown sort key: {s}")),
        }
    }
}

/// Stable sort; ties keep their incoming order in both directions.
pub fn sort_groups(groups: &mut [SenderGroup], key: SortKey, ascending: bool) {
    groups.sort_by(|a, b| {
        let ord = compare(a, b, key);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

fn compare(a: &SenderGroup, b: &SenderGroup, key: SortKey) -> Ordering {
    match key {
        SortKey::MessageCount => a.message_count.cmp(&b.message_count),
        SortKey::LastSeen => a.last_seen.cmp(&b.last_seen),
        SortKey::FirstSeen => a.first_seen.cmp(&b.first_seen),
        SortKey::DisplayName => a
            .display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub total_groups: usize,
    pub total_messages: u64,
    pub one_click_available: usize,
    pub http_available: usize,
    pub mailto_only: usize,
    pub unknown: usize,
    pub protected: usize,
    pub by_category: BTreeMap<String, usize>,
}

pub fn group_stats(groups: &[SenderGroup]) -> GroupStats {
    let mut stats = GroupStats {
        total_groups: groups.len(),
        ..Default::default()
    };

    for group in groups {
        stats.total_messages += group.message_count;
        match group.unsubscribe.kind() {
            UnsubscribeKind::OneClick => stats.one_click_available += 1,
            UnsubscribeKind::Http => stats.http_available += 1,
            UnsubscribeKind::Mailto => stats.mailto_only += 1,
            UnsubscribeKind::Unknown => stats.unknown += 1,
        }
        if group.safety.protected {
            stats.protected += 1;
        }
        let bucket = group
            .category
            .map(|c| c.to_string())
            .unwrap_or_else(|| "Uncategorized".to_string());
        *stats.by_category.entry(bucket).or_default() += 1;
    }

    stats
}
