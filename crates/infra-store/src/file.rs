use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use quietinbox_domain::{
    merge_action_log, ActionLogEntry, DataExport, ScanCheckpoint, SenderGroup, Settings, Store,
};
use quietinbox_error::InboxError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const GROUPS_FILE: &str = "groups.json";
const SETTINGS_FILE: &str = "settings.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";
const ACTION_LOG_FILE: &str = "actions.jsonl";

/// One JSON document per collection under a data directory; the action
/// log is JSON lines, append-only.
///
/// Snapshots are written to a temp file and renamed into place.
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, InboxError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| InboxError::storage(format!("mkdir {}: {e}", dir.display())))?;
        debug!(dir = %dir.display(), "opened json store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn load_groups(&self) -> Result<Vec<SenderGroup>, InboxError> {
        Ok(read_json(&self.path(GROUPS_FILE)).await?.unwrap_or_default())
    }

    /// Oldest first, in file order. Corrupt lines are skipped.
    async fn load_action_log(&self) -> Result<Vec<ActionLogEntry>, InboxError> {
        let path = self.path(ACTION_LOG_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(InboxError::storage(format!("read {}: {e}", path.display()))),
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "skipping corrupt action log line");
                    None
                }
            })
            .collect())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, InboxError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| InboxError::storage(format!("invalid {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(InboxError::storage(format!("read {}: {e}", path.display()))),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), InboxError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| InboxError::storage(format!("serialize {}: {e}", path.display())))?;
    write_atomic(path, json).await
}

async fn write_atomic(path: &Path, contents: String) -> Result<(), InboxError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| InboxError::storage(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| InboxError::storage(format!("rename {}: {e}", path.display())))
}

async fn remove_if_exists(path: &Path) -> Result<(), InboxError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InboxError::storage(format!("remove {}: {e}", path.display()))),
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn list_groups(&self) -> Result<Vec<SenderGroup>, InboxError> {
        self.load_groups().await
    }

    async fn get_group(&self, id: &str) -> Result<Option<SenderGroup>, InboxError> {
        Ok(self.load_groups().await?.into_iter().find(|g| g.id == id))
    }

    async fn put_group(&self, group: &SenderGroup) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        let mut groups = self.load_groups().await?;
        match groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group.clone(),
            None => groups.push(group.clone()),
        }
        write_json(&self.path(GROUPS_FILE), &groups).await
    }

    async fn replace_groups(&self, groups: &[SenderGroup]) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        write_json(&self.path(GROUPS_FILE), groups).await
    }

    async fn delete_group(&self, id: &str) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        let mut groups = self.load_groups().await?;
        let before = groups.len();
        groups.retain(|g| g.id != id);
        if groups.len() == before {
            return Err(InboxError::not_found(format!("group {id}")));
        }
        write_json(&self.path(GROUPS_FILE), &groups).await
    }

    async fn append_action_log(&self, entry: &ActionLogEntry) -> Result<(), InboxError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| InboxError::storage(format!("serialize action: {e}")))?;
        line.push('\n');

        let path = self.path(ACTION_LOG_FILE);
        let _lock = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| InboxError::storage(format!("open {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| InboxError::storage(format!("append {}: {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| InboxError::storage(format!("flush {}: {e}", path.display())))
    }

    async fn list_action_log(&self) -> Result<Vec<ActionLogEntry>, InboxError> {
        let mut entries = self.load_action_log().await?;
        entries.reverse();
        Ok(entries)
    }

    async fn get_settings(&self) -> Result<Settings, InboxError> {
        Ok(read_json(&self.path(SETTINGS_FILE)).await?.unwrap_or_default())
    }

    async fn put_settings(&self, settings: &Settings) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        write_json(&self.path(SETTINGS_FILE), settings).await
    }

    async fn get_checkpoint(&self) -> Result<Option<ScanCheckpoint>, InboxError> {
        read_json(&self.path(CHECKPOINT_FILE)).await
    }

    async fn put_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        write_json(&self.path(CHECKPOINT_FILE), checkpoint).await
    }

    async fn clear_checkpoint(&self) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        remove_if_exists(&self.path(CHECKPOINT_FILE)).await
    }

    async fn export_data(&self) -> Result<DataExport, InboxError> {
        Ok(DataExport {
            groups: self.load_groups().await?,
            action_log: self.load_action_log().await?,
            settings: Some(self.get_settings().await?),
            checkpoint: self.get_checkpoint().await?,
            exported_at: Utc::now(),
        })
    }

    async fn import_data(&self, data: &DataExport) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;

        let mut groups = self.load_groups().await?;
        for group in &data.groups {
            match groups.iter_mut().find(|g| g.id == group.id) {
                Some(existing) => *existing = group.clone(),
                None => groups.push(group.clone()),
            }
        }
        write_json(&self.path(GROUPS_FILE), &groups).await?;

        let mut log = self.load_action_log().await?;
        merge_action_log(&mut log, &data.action_log);
        let mut lines = String::new();
        for entry in &log {
            let line = serde_json::to_string(entry)
                .map_err(|e| InboxError::storage(format!("serialize action: {e}")))?;
            lines.push_str(&line);
            lines.push('\n');
        }
        write_atomic(&self.path(ACTION_LOG_FILE), lines).await?;

        if let Some(settings) = &data.settings {
            write_json(&self.path(SETTINGS_FILE), settings).await?;
        }
        if let Some(checkpoint) = &data.checkpoint {
            write_json(&self.path(CHECKPOINT_FILE), checkpoint).await?;
        }
        debug!(groups = data.groups.len(), actions = data.action_log.len(), "imported data");
        Ok(())
    }

    async fn clear_data(&self) -> Result<(), InboxError> {
        let _lock = self.write_lock.lock().await;
        for file in [GROUPS_FILE, ACTION_LOG_FILE, CHECKPOINT_FILE] {
            remove_if_exists(&self.path(file)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use quietinbox_domain::{
        ActionKind, ActionResult, Category, SafetyInfo, TimeWindow, UnsubscribeMethod,
    };

    use super::*;

    fn group(id: &str, count: u64) -> SenderGroup {
        SenderGroup {
            id: id.into(),
            display_name: id.into(),
            domain: "example.com".into(),
            list_id: None,
            message_count: count,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            unsubscribe: UnsubscribeMethod::unknown(false),
            safety: SafetyInfo::default(),
            category: Some(Category::Promotions),
        }
    }

    #[tokio::test]
    async fn test_groups_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.replace_groups(&[group("a", 1), group("b", 2)]).await.unwrap();
        store.put_group(&group("a", 5)).await.unwrap();
        store.delete_group("b").await.unwrap();

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let groups = reopened.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].message_count, 5);
        assert!(reopened.get_group("b").await.unwrap().is_none());
        assert!(reopened.delete_group("b").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_dir_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested")).await.unwrap();
        assert!(store.list_groups().await.unwrap().is_empty());
        assert!(store.list_action_log().await.unwrap().is_empty());
        assert!(store.get_checkpoint().await.unwrap().is_none());
        assert_eq!(store.get_settings().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn test_action_log_appends_and_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store
            .append_action_log(&ActionLogEntry::new("a", ActionKind::Archive, ActionResult::Success).with_count(4))
            .await
            .unwrap();
        tokio::fs::write(
            dir.path().join(ACTION_LOG_FILE),
            format!(
                "{}not json\n",
                tokio::fs::read_to_string(dir.path().join(ACTION_LOG_FILE)).await.unwrap()
            ),
        )
        .await
        .unwrap();
        store
            .append_action_log(&ActionLogEntry::new("b", ActionKind::Filter, ActionResult::Fail))
            .await
            .unwrap();

        let log = store.list_action_log().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].group_id, "b");
        assert_eq!(log[1].count, Some(4));
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let mut cp = ScanCheckpoint::new(TimeWindow::ThreeMonths, vec![Category::Forums]);
        cp.processed_message_ids.insert("m1".into());
        cp.next_page_token = Some("p2".into());
        store.put_checkpoint(&cp).await.unwrap();

        let loaded = store.get_checkpoint().await.unwrap().unwrap();
        assert!(loaded.resumable_for(TimeWindow::ThreeMonths, &[Category::Forums]));
        assert!(loaded.processed_message_ids.contains("m1"));

        store.clear_checkpoint().await.unwrap();
        store.clear_checkpoint().await.unwrap();
        assert!(store.get_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_settings_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SETTINGS_FILE), "{oops").await.unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get_settings().await,
            Err(InboxError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_export_import_between_directories() {
        let src_dir = tempfile::tempdir().unwrap();
        let src = JsonFileStore::open(src_dir.path()).await.unwrap();
        src.replace_groups(&[group("a", 3), group("b", 1)]).await.unwrap();
        src.append_action_log(&ActionLogEntry::new("a", ActionKind::Archive, ActionResult::Success).with_count(3))
            .await
            .unwrap();
        let mut cp = ScanCheckpoint::new(TimeWindow::SevenDays, vec![Category::Promotions]);
        cp.processed_message_ids.insert("m1".into());
        src.put_checkpoint(&cp).await.unwrap();
        let snapshot = src.export_data().await.unwrap();

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: DataExport = serde_json::from_str(&json).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst = JsonFileStore::open(dst_dir.path()).await.unwrap();
        dst.replace_groups(&[group("a", 1), group("c", 7)]).await.unwrap();
        dst.append_action_log(&ActionLogEntry::new("c", ActionKind::Filter, ActionResult::Success))
            .await
            .unwrap();
        dst.import_data(&parsed).await.unwrap();
        dst.import_data(&parsed).await.unwrap();

        let mut ids: Vec<_> = dst.list_groups().await.unwrap().into_iter().map(|g| g.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(dst.get_group("a").await.unwrap().unwrap().message_count, 3);

        let log = dst.list_action_log().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].group_id, "c");
        assert!(dst.get_checkpoint().await.unwrap().unwrap().processed_message_ids.contains("m1"));
    }

    #[tokio::test]
    async fn test_clear_data_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let settings = Settings {
            enable_send_scope: true,
            ..Settings::default()
        };
        store.put_settings(&settings).await.unwrap();
        store.replace_groups(&[group("a", 1)]).await.unwrap();
        store
            .append_action_log(&ActionLogEntry::new("a", ActionKind::Filter, ActionResult::Success))
            .await
            .unwrap();
        store
            .put_checkpoint(&ScanCheckpoint::new(TimeWindow::All, vec![Category::Updates]))
            .await
            .unwrap();

        store.clear_data().await.unwrap();
        store.clear_data().await.unwrap();

        assert!(store.list_groups().await.unwrap().is_empty());
        assert!(store.list_action_log().await.unwrap().is_empty());
        assert!(store.get_checkpoint().await.unwrap().is_none());
        assert_eq!(store.get_settings().await.unwrap(), settings);
    }
}
