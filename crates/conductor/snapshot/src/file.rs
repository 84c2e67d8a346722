//! File-backed snapshot store: one `<id>.json` record per snapshot.

use crate::error::{SnapshotError, SnapshotResult};
use crate::record::SnapshotRecord;
use crate::store::SnapshotStore;
use async_trait::async_trait;
use conductor_types::SnapshotId;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Snapshot store writing JSON records into a directory.
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Open (and create if needed) a snapshot directory.
    pub async fn open(dir: impl Into<PathBuf>) -> SnapshotResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SnapshotId) -> SnapshotResult<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty() || raw.contains(|c: char| c == '/' || c == '\\') || raw.starts_with('.') {
            return Err(SnapshotError::InvalidId(id.clone()));
        }
        Ok(self.dir.join(format!("{}.json", raw)))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn put(&self, record: &SnapshotRecord) -> SnapshotResult<()> {
        let path = self.path_for(&record.id)?;
        let json = serde_json::to_vec_pretty(record)?;

        // Write to a sibling temp file, then rename over the target.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, id: &SnapshotId) -> SnapshotResult<Option<SnapshotRecord>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> SnapshotResult<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<SnapshotRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(records)
    }

    async fn delete(&self, id: &SnapshotId) -> SnapshotResult<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_types::ExecutionContext;

    fn record(id: &str) -> SnapshotRecord {
        let now = Utc::now();
        SnapshotRecord {
            id: SnapshotId::new(id),
            label: "STEP_EXECUTION".into(),
            timestamp: now,
            execution_context: ExecutionContext::new(),
            expires_at: now + chrono::Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::open(dir.path()).await.unwrap();
        let original = record("s1");

        store.put(&original).await.unwrap();
        assert!(dir.path().join("s1.json").exists());

        let loaded = store.get(&SnapshotId::new("s1")).await.unwrap().unwrap();
        assert_eq!(loaded, original);

        assert!(store.delete(&SnapshotId::new("s1")).await.unwrap());
        assert!(!store.delete(&SnapshotId::new("s1")).await.unwrap());
        assert!(store.get(&SnapshotId::new("s1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::open(dir.path()).await.unwrap();
        store.put(&record("a")).await.unwrap();
        store.put(&record("b")).await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"hi").await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{").await.unwrap();

        let mut ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.0)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get(&SnapshotId::new("../escape")).await,
            Err(SnapshotError::InvalidId(_))
        ));
    }
}
