//! Jail State Store
//!
//! One durable record per tenant describing what the reconciler last applied.
//! Records are independent: there are no cross-tenant transactions and no
//! shared counters, so concurrent workers write without coordination.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::{FailureKind, FailureReason, PersistError};
use super::planner::ActionKind;
use super::tenant::Fingerprint;

/// Result of the last executed action, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failed { kind: FailureKind, reason: String },
}

/// What the reconciler believes about one tenant's jail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JailStateRecord {
    pub tenant_id: u64,

    /// Fingerprint of the configuration last provisioned successfully
    pub applied_fingerprint: Option<Fingerprint>,

    /// Whether the tree and mounts are believed to exist. The prober wins
    /// when it disagrees.
    pub jail_present: bool,

    pub last_action: ActionKind,
    pub last_action_result: ActionOutcome,
    pub last_attempt_time: DateTime<Utc>,
}

impl JailStateRecord {
    /// Record for a jail that was just provisioned successfully
    pub fn applied(tenant_id: u64, fingerprint: Fingerprint, action: ActionKind) -> Self {
        Self {
            tenant_id,
            applied_fingerprint: Some(fingerprint),
            jail_present: true,
            last_action: action,
            last_action_result: ActionOutcome::Success,
            last_attempt_time: Utc::now(),
        }
    }

    /// Note a failed attempt without touching what was applied
    pub fn record_failure(&mut self, action: ActionKind, reason: &FailureReason) {
        self.last_action = action;
        self.last_action_result = ActionOutcome::Failed {
            kind: reason.kind(),
            reason: reason.to_string(),
        };
        self.last_attempt_time = Utc::now();
    }

    /// The jail was torn down; nothing is applied any more
    pub fn mark_torn_down(&mut self) {
        self.applied_fingerprint = None;
        self.jail_present = false;
    }
}

/// Durable per-tenant state
#[async_trait]
pub trait JailStateStore: Send + Sync {
    async fn load(&self, tenant_id: u64) -> Result<Option<JailStateRecord>, PersistError>;

    /// Must be durable when it returns
    async fn save(&self, record: &JailStateRecord) -> Result<(), PersistError>;

    /// Deleting a missing record is not an error
    async fn delete(&self, tenant_id: u64) -> Result<(), PersistError>;

    async fn list(&self) -> Result<Vec<JailStateRecord>, PersistError>;
}

/// One JSON file per tenant: `<dir>/<tenant_id>.json`
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, tenant_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", tenant_id))
    }
}

/// Write to a temp file in the same directory, fsync, rename into place,
/// then fsync the directory so the rename itself survives a crash
fn write_durable(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[async_trait]
impl JailStateStore for FileStateStore {
    async fn load(&self, tenant_id: u64) -> Result<Option<JailStateRecord>, PersistError> {
        let read_error = |message: String| PersistError::Read { tenant_id, message };

        let bytes = match tokio::fs::read(self.record_path(tenant_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_error(e.to_string())),
        };

        let record: JailStateRecord =
            serde_json::from_slice(&bytes).map_err(|e| read_error(e.to_string()))?;

        if record.tenant_id != tenant_id {
            return Err(read_error(format!(
                "record belongs to tenant {}",
                record.tenant_id
            )));
        }

        Ok(Some(record))
    }

    async fn save(&self, record: &JailStateRecord) -> Result<(), PersistError> {
        let tenant_id = record.tenant_id;
        let write_error = |message: String| PersistError::Write { tenant_id, message };

        let contents = serde_json::to_vec_pretty(record).map_err(|e| write_error(e.to_string()))?;
        let dir = self.dir.clone();
        let path = self.record_path(tenant_id);

        tokio::task::spawn_blocking(move || write_durable(&dir, &path, &contents))
            .await
            .map_err(|e| write_error(e.to_string()))?
            .map_err(|e| write_error(e.to_string()))
    }

    async fn delete(&self, tenant_id: u64) -> Result<(), PersistError> {
        let delete_error = |message: String| PersistError::Delete { tenant_id, message };
        let dir = self.dir.clone();
        let path = self.record_path(tenant_id);

        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => sync_dir(&dir),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| delete_error(e.to_string()))?
        .map_err(|e| delete_error(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<JailStateRecord>, PersistError> {
        let list_error = |message: String| PersistError::List {
            dir: self.dir.clone(),
            message,
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_error(e.to_string())),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| list_error(e.to_string()))?
        {
            let path = entry.path();
            let tenant_id = path
                .extension()
                .filter(|ext| *ext == "json")
                .and_then(|_| path.file_stem())
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());

            if let Some(tenant_id) = tenant_id {
                if let Some(record) = self.load(tenant_id).await? {
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.tenant_id);
        Ok(records)
    }
}

/// Volatile store for dry runs and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    records: Arc<RwLock<HashMap<u64, JailStateRecord>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records
    pub fn with_records(records: impl IntoIterator<Item = JailStateRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.tenant_id, r)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl JailStateStore for MemoryStateStore {
    async fn load(&self, tenant_id: u64) -> Result<Option<JailStateRecord>, PersistError> {
        Ok(self.records.read().await.get(&tenant_id).cloned())
    }

    async fn save(&self, record: &JailStateRecord) -> Result<(), PersistError> {
        self.records
            .write()
            .await
            .insert(record.tenant_id, record.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: u64) -> Result<(), PersistError> {
        self.records.write().await.remove(&tenant_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JailStateRecord>, PersistError> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.tenant_id);
        Ok(records)
    }
}
