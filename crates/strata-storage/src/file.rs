//! File-backed tier backend
//!
//! Persists the item map as a JSON snapshot at `<data_dir>/memory.<ext>`.
//! Writes land in memory immediately and are tracked in a write buffer;
//! the buffer drains through `flush()`, triggered synchronously at the
//! buffer-size threshold or by the flush timer. Every flush backs up the
//! previous snapshot into `<data_dir>/backups/` before overwriting, and
//! `initialize()` falls back to the newest backup when the snapshot is
//! unreadable.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use strata_core::query::{QueryFilter, SemanticQuery, UpdatePatch};
use strata_core::{
    BackendKind, Error, EventSink, HealthStatus, MemoryEvent, MemoryItem, PeriodicTask, Result,
    StorageBackend, StorageStats,
};

/// Snapshot body written to `<data_dir>/memory.<ext>` and to backups
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: String,
    timestamp: i64,
    items: Vec<(String, MemoryItem)>,
}

const SNAPSHOT_VERSION: &str = "1.0";

/// Configuration for the file backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackendConfig {
    /// Instance name, used in errors and events
    pub name: String,

    /// Directory holding the snapshot and the `backups/` subdirectory
    pub data_dir: PathBuf,

    /// Snapshot file extension
    pub extension: String,

    /// Buffered writes that trigger a synchronous flush
    pub buffer_size: usize,

    /// Interval of the scheduled flush task; manual flushes only when
    /// absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_interval: Option<Duration>,

    /// Number of most recent backups kept after rotation
    pub backup_count: usize,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            name: "file".to_string(),
            data_dir: PathBuf::from("data/memory"),
            extension: "json".to_string(),
            buffer_size: 100,
            flush_interval: Some(Duration::from_secs(5)),
            backup_count: 5,
        }
    }
}

impl FileBackendConfig {
    /// Create config for testing: small buffer, no flush timer
    pub fn for_testing(data_dir: &Path) -> Self {
        Self {
            name: "file-test".to_string(),
            data_dir: data_dir.to_path_buf(),
            extension: "json".to_string(),
            buffer_size: 100,
            flush_interval: None,
            backup_count: 3,
        }
    }

    /// Builder: set the instance name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: set the buffer threshold
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Builder: set the flush interval
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Builder: set the backup rotation count
    pub fn with_backup_count(mut self, backup_count: usize) -> Self {
        self.backup_count = backup_count;
        self
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("memory.{}", self.extension))
    }

    fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

#[derive(Default)]
struct FileState {
    items: HashMap<String, MemoryItem>,
    /// Ids written since the last flush
    buffer: Vec<String>,
    initialized: bool,
}

/// File-backed tier backend with JSON-snapshot persistence
pub struct FileBackend {
    config: FileBackendConfig,
    state: Arc<RwLock<FileState>>,
    events: Option<Arc<dyn EventSink>>,
    flusher: Mutex<Option<PeriodicTask>>,
    /// Serializes snapshot writers so newer state never loses to an
    /// older write landing later
    flush_lock: Arc<Mutex<()>>,
}

impl FileBackend {
    pub fn new(config: FileBackendConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(FileState::default())),
            events: None,
            flusher: Mutex::new(None),
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Builder: attach an event sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(sink) = &self.events {
            sink.emit(event);
        }
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if !self.state.read().await.initialized {
            return Err(Error::NotInitialized(self.config.name.clone()));
        }
        Ok(())
    }
}

/// Drain the write buffer and persist the item map.
///
/// Writers queue on `flush_lock`, which is held from snapshot assembly
/// through the rename, so snapshots land on disk in state order. The
/// state lock itself is released before any file I/O; writes racing the
/// flush re-enter the buffer and persist on the next one.
async fn flush_to_disk(
    state: &RwLock<FileState>,
    flush_lock: &Mutex<()>,
    config: &FileBackendConfig,
    events: Option<&Arc<dyn EventSink>>,
) -> Result<usize> {
    let _guard = flush_lock.lock().await;

    let items = {
        let mut state = state.write().await;
        if !state.initialized {
            return Err(Error::NotInitialized(config.name.clone()));
        }
        state.buffer.clear();
        state
            .items
            .iter()
            .map(|(id, item)| (id.clone(), item.clone()))
            .collect::<Vec<_>>()
    };

    let path = config.snapshot_path();
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        // Backup failures must not block the flush itself
        if let Err(e) = create_backup(config).await {
            warn!(backend = %config.name, error = %e, "backup creation failed");
        }
    }

    let count = items.len();
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION.to_string(),
        timestamp: Utc::now().timestamp_millis(),
        items,
    };
    let json = serde_json::to_vec_pretty(&snapshot)?;
    let staged = path.with_extension(format!("{}.tmp", config.extension));
    tokio::fs::write(&staged, json).await?;
    tokio::fs::rename(&staged, &path).await?;
    debug!(backend = %config.name, items = count, "snapshot written");

    if let Some(sink) = events {
        sink.emit(MemoryEvent::StorageFlushed {
            backend: config.name.clone(),
            items: count,
        });
    }
    Ok(count)
}

/// Copy the current snapshot into `backups/` and rotate old backups out
async fn create_backup(config: &FileBackendConfig) -> Result<PathBuf> {
    let backups = config.backups_dir();
    tokio::fs::create_dir_all(&backups).await?;

    // ISO timestamp with dashes so names sort chronologically
    let name = format!(
        "backup-{}.{}",
        Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ"),
        config.extension
    );
    let dest = backups.join(&name);
    tokio::fs::copy(config.snapshot_path(), &dest)
        .await
        .map_err(|e| Error::BackupFailed(format!("{name}: {e}")))?;

    rotate_backups(config).await;
    Ok(dest)
}

/// Delete the oldest backups beyond the configured count
async fn rotate_backups(config: &FileBackendConfig) {
    let mut names = match list_backups(config).await {
        Ok(names) => names,
        Err(e) => {
            warn!(backend = %config.name, error = %e, "backup rotation skipped");
            return;
        }
    };
    while names.len() > config.backup_count {
        let victim = names.remove(0);
        let path = config.backups_dir().join(&victim);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(backend = %config.name, backup = %victim, error = %e, "failed to delete old backup");
        } else {
            debug!(backend = %config.name, backup = %victim, "rotated out old backup");
        }
    }
}

/// Backup file names sorted ascending (oldest first)
async fn list_backups(config: &FileBackendConfig) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(config.backups_dir()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("backup-") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Load the snapshot, falling back to the newest backup when unreadable
async fn load_snapshot(config: &FileBackendConfig) -> Result<HashMap<String, MemoryItem>> {
    let path = config.snapshot_path();
    match tokio::fs::read(&path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(backend = %config.name, "no snapshot found, starting empty");
            Ok(HashMap::new())
        }
        Err(e) => {
            warn!(backend = %config.name, error = %e, "snapshot unreadable");
            recover_from_backup(config, Error::Io(e)).await
        }
        Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                debug!(backend = %config.name, items = snapshot.items.len(), "snapshot loaded");
                Ok(snapshot.items.into_iter().collect())
            }
            Err(e) => {
                warn!(backend = %config.name, error = %e, "snapshot corrupt");
                let fatal = Error::SnapshotCorrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                recover_from_backup(config, fatal).await
            }
        },
    }
}

/// Restore the most recent backup. With no backups present the original
/// failure is fatal; a backup that itself fails to restore is logged and
/// the store starts empty.
async fn recover_from_backup(
    config: &FileBackendConfig,
    fatal: Error,
) -> Result<HashMap<String, MemoryItem>> {
    let names = list_backups(config).await?;
    let Some(newest) = names.last() else {
        return Err(fatal);
    };

    let path = config.backups_dir().join(newest);
    let restored: Result<Snapshot> = async {
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice::<Snapshot>(&bytes)?)
    }
    .await;

    match restored {
        Ok(snapshot) => {
            info!(backend = %config.name, backup = %newest, items = snapshot.items.len(), "recovered from backup");
            Ok(snapshot.items.into_iter().collect())
        }
        Err(e) => {
            warn!(backend = %config.name, backup = %newest, error = %e, "backup restore failed, starting empty");
            Ok(HashMap::new())
        }
    }
}

/// Free-space fraction of the disk holding `path`
fn disk_free_ratio(path: &Path) -> Option<f64> {
    let path = path.canonicalize().ok()?;
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| {
            if disk.total_space() == 0 {
                1.0
            } else {
                disk.available_space() as f64 / disk.total_space() as f64
            }
        })
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn initialize(&self) -> Result<()> {
        if self.state.read().await.initialized {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(|e| {
                Error::InitializationFailed(format!(
                    "cannot create data directory {}: {e}",
                    self.config.data_dir.display()
                ))
            })?;

        let items = load_snapshot(&self.config).await?;

        {
            let mut state = self.state.write().await;
            if state.initialized {
                return Ok(());
            }
            state.items = items;
            state.initialized = true;
        }

        if let Some(interval) = self.config.flush_interval {
            let state = self.state.clone();
            let flush_lock = self.flush_lock.clone();
            let config = self.config.clone();
            let events = self.events.clone();
            let task = PeriodicTask::spawn("file-flush", interval, move || {
                let state = state.clone();
                let flush_lock = flush_lock.clone();
                let config = config.clone();
                let events = events.clone();
                async move {
                    // Retried on the next tick
                    if let Err(e) =
                        flush_to_disk(&state, &flush_lock, &config, events.as_ref()).await
                    {
                        warn!(backend = %config.name, error = %e, "scheduled flush failed");
                    }
                }
            });
            *self.flusher.lock().await = Some(task);
        }

        info!(
            backend = %self.config.name,
            data_dir = %self.config.data_dir.display(),
            "file backend initialized"
        );
        Ok(())
    }

    async fn store(&self, item: MemoryItem) -> Result<()> {
        self.ensure_initialized().await?;
        item.validate()?;

        let id = item.id.clone();
        let tier = item.tier;
        let buffered = {
            let mut state = self.state.write().await;
            state.items.insert(id.clone(), item);
            state.buffer.push(id.clone());
            state.buffer.len()
        };

        self.emit(MemoryEvent::ItemStored {
            id,
            tier,
            backend: self.config.name.clone(),
        });

        if buffered >= self.config.buffer_size {
            flush_to_disk(&self.state, &self.flush_lock, &self.config, self.events.as_ref())
                .await?;
        }
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        self.ensure_initialized().await?;

        let mut state = self.state.write().await;
        let expired = match state.items.get(id) {
            Some(item) => item.is_expired(Utc::now()),
            None => return Ok(None),
        };
        if expired {
            state.items.remove(id);
            return Ok(None);
        }
        Ok(state.items.get_mut(id).map(|item| {
            item.touch();
            item.clone()
        }))
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<MemoryItem>> {
        self.ensure_initialized().await?;

        let state = self.state.read().await;
        let now = Utc::now();
        let live = state
            .items
            .values()
            .filter(|i| !i.is_expired(now))
            .cloned();
        Ok(filter.apply(live))
    }

    async fn semantic_query(&self, query: &SemanticQuery) -> Result<Vec<(MemoryItem, f64)>> {
        self.ensure_initialized().await?;

        let mut state = self.state.write().await;
        Ok(query.scan(&mut state.items))
    }

    async fn update(&self, id: &str, patch: UpdatePatch) -> Result<Option<MemoryItem>> {
        self.ensure_initialized().await?;

        let updated = {
            let mut state = self.state.write().await;
            match state.items.get_mut(id) {
                Some(item) => {
                    patch.apply_to(item);
                    item.validate()?;
                    let updated = item.clone();
                    state.buffer.push(id.to_string());
                    Some(updated)
                }
                None => None,
            }
        };

        if updated.is_some() {
            self.emit(MemoryEvent::ItemUpdated {
                id: id.to_string(),
                backend: self.config.name.clone(),
            });
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.ensure_initialized().await?;

        let removed = {
            let mut state = self.state.write().await;
            state.buffer.retain(|buffered| buffered != id);
            state.items.remove(id).is_some()
        };
        if removed {
            self.emit(MemoryEvent::ItemDeleted {
                id: id.to_string(),
                backend: self.config.name.clone(),
            });
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_initialized().await?;

        {
            let mut state = self.state.write().await;
            state.items.clear();
            state.buffer.clear();
        }

        // Queue behind in-flight flushes so their file writes finish
        // before the removals below
        let _guard = self.flush_lock.lock().await;
        let snapshot = self.config.snapshot_path();
        match tokio::fs::remove_file(&snapshot).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_dir_all(self.config.backups_dir()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.emit(MemoryEvent::StorageCleared {
            backend: self.config.name.clone(),
        });
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_initialized().await?;
        flush_to_disk(&self.state, &self.flush_lock, &self.config, self.events.as_ref()).await?;
        Ok(())
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        self.ensure_initialized().await?;

        let state = self.state.read().await;
        Ok(StorageStats::compute(state.items.values()))
    }

    async fn health_check(&self) -> HealthStatus {
        if !self.state.read().await.initialized {
            return HealthStatus::unhealthy("not initialized");
        }

        let probe = self.config.data_dir.join(".health-probe");
        if let Err(e) = tokio::fs::write(&probe, b"ok").await {
            return HealthStatus::unhealthy(format!("data directory not writable: {e}"));
        }
        let _ = tokio::fs::remove_file(&probe).await;

        match disk_free_ratio(&self.config.data_dir) {
            Some(ratio) if ratio < 0.05 => HealthStatus::unhealthy(format!(
                "critically low disk space: {:.1}% free",
                ratio * 100.0
            )),
            Some(ratio) if ratio < 0.10 => {
                HealthStatus::warning(format!("low disk space: {:.1}% free", ratio * 100.0))
            }
            _ => HealthStatus::healthy(),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.flusher.lock().await.take() {
            task.stop().await;
        }
        if self.state.read().await.initialized {
            flush_to_disk(&self.state, &self.flush_lock, &self.config, self.events.as_ref())
                .await?;
            self.state.write().await.initialized = false;
        }
        info!(backend = %self.config.name, "file backend closed");
        Ok(())
    }
}
