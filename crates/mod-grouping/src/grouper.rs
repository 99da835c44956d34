use std::collections::BTreeMap;

use quietinbox_domain::{ParsedMessage, SenderGroup};

use crate::headers::normalize_list_id;

/// Stable group key: normalized List-Id, else `domain:<domain>`, else `name:<sanitized name>`.
pub fn generate_group_id(message: &ParsedMessage) -> String {
    if let Some(list_id) = message.list_id.as_deref() {
        let normalized = normalize_list_id(list_id);
        if !normalized.is_empty() {
            return normalized;
        }
    }

    if !message.domain.is_empty() {
        return format!("domain:{}", message.domain);
    }

    let sanitized: String = message
        .display_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("name:{sanitized}")
}

/// Running per-sender aggregate.
///
/// Merges are monotonic: counts only grow, the time window only widens,
/// protection is OR-ed and the unsubscribe method is only ever upgraded.
/// The grouper does not track message ids; feeding the same message twice
/// counts it twice, so replay protection belongs to the caller.
#[derive(Debug, Default)]
pub struct MessageGrouper {
    groups: BTreeMap<String, SenderGroup>,
}

impl MessageGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the aggregator with groups persisted by an earlier run.
    pub fn from_groups(groups: impl IntoIterator<Item = SenderGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
        }
    }

    /// Folds `message` into its group and returns the group id.
    pub fn add_message(&mut self, message: &ParsedMessage) -> String {
        let id = generate_group_id(message);
        match self.groups.get_mut(&id) {
            Some(existing) => merge_into(existing, message),
            None => {
                self.groups.insert(id.clone(), new_group(id.clone(), message));
            }
        }
        id
    }

    pub fn groups(&self) -> Vec<SenderGroup> {
        self.groups.values().cloned().collect()
    }

    pub fn into_groups(self) -> Vec<SenderGroup> {
        self.groups.into_values().collect()
    }

    pub fn get(&self, id: &str) -> Option<&SenderGroup> {
        self.groups.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<SenderGroup> {
        self.groups.remove(id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

fn new_group(id: String, message: &ParsedMessage) -> SenderGroup {
    SenderGroup {
        id,
        display_name: message.display_name.clone(),
        domain: message.domain.clone(),
        list_id: message.list_id.clone(),
        message_count: 1,
        first_seen: message.date,
        last_seen: message.date,
        unsubscribe: message.unsubscribe.clone(),
        safety: message.safety.clone(),
        category: message.category,
    }
}

// display_name, domain and list_id stay as first observed.
fn merge_into(group: &mut SenderGroup, message: &ParsedMessage) {
    group.message_count += 1;

    if message.date < group.first_seen {
        group.first_seen = message.date;
    }
    if message.date > group.last_seen {
        group.last_seen = message.date;
    }

    group.safety.merge(&message.safety);

    if group.category.is_none() {
        group.category = message.category;
    }

    if message.unsubscribe.outranks(&group.unsubscribe) {
        group.unsubscribe = message.unsubscribe.clone();
    }
}
