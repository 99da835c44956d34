use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use quietinbox_domain::{
    merge_action_log, ActionLogEntry, DataExport, ScanCheckpoint, SenderGroup, Settings, Store,
};
use quietinbox_error::InboxError;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, SenderGroup>,
    log: Vec<ActionLogEntry>,
    settings: Option<Settings>,
    checkpoint: Option<ScanCheckpoint>,
}

/// Process-local store, for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_groups(&self) -> Result<Vec<SenderGroup>, InboxError> {
        Ok(self.state.read().await.groups.values().cloned().collect())
    }

    async fn get_group(&self, id: &str) -> Result<Option<SenderGroup>, InboxError> {
        Ok(self.state.read().await.groups.get(id).cloned())
    }

    async fn put_group(&self, group: &SenderGroup) -> Result<(), InboxError> {
        self.state
            .write()
            .await
            .groups
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn replace_groups(&self, groups: &[SenderGroup]) -> Result<(), InboxError> {
        self.state.write().await.groups = groups.iter().map(|g| (g.id.clone(), g.clone())).collect();
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<(), InboxError> {
        self.state
            .write()
            .await
            .groups
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| InboxError::not_found(format!("group {id}")))
    }

    async fn append_action_log(&self, entry: &ActionLogEntry) -> Result<(), InboxError> {
        self.state.write().await.log.push(entry.clone());
        Ok(())
    }

    async fn list_action_log(&self) -> Result<Vec<ActionLogEntry>, InboxError> {
        Ok(self.state.read().await.log.iter().rev().cloned().collect())
    }

    async fn get_settings(&self) -> Result<Settings, InboxError> {
        Ok(self.state.read().await.settings.clone().unwrap_or_default())
    }

    async fn put_settings(&self, settings: &Settings) -> Result<(), InboxError> {
        self.state.write().await.settings = Some(settings.clone());
        Ok(())
    }

    async fn get_checkpoint(&self) -> Result<Option<ScanCheckpoint>, InboxError> {
        Ok(self.state.read().await.checkpoint.clone())
    }

    async fn put_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), InboxError> {
        self.state.write().await.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    async fn clear_checkpoint(&self) -> Result<(), InboxError> {
        self.state.write().await.checkpoint = None;
        Ok(())
    }

    async fn export_data(&self) -> Result<DataExport, InboxError> {
        let state = self.state.read().await;
        Ok(DataExport {
            groups: state.groups.values().cloned().collect(),
            action_log: state.log.clone(),
            settings: Some(state.settings.clone().unwrap_or_default()),
            checkpoint: state.checkpoint.clone(),
            exported_at: Utc::now(),
        })
    }

    async fn import_data(&self, data: &DataExport) -> Result<(), InboxError> {
        let mut state = self.state.write().await;
        for group in &data.groups {
            state.groups.insert(group.id.clone(), group.clone());
        }
        merge_action_log(&mut state.log, &data.action_log);
        if let Some(settings) = &data.settings {
            state.settings = Some(settings.clone());
        }
        if let Some(checkpoint) = &data.checkpoint {
            state.checkpoint = Some(checkpoint.clone());
        }
        Ok(())
    }

    async fn clear_data(&self) -> Result<(), InboxError> {
        let mut state = self.state.write().await;
        state.groups.clear();
        state.log.clear();
        state.checkpoint = None;
        Ok(())
    }
}
