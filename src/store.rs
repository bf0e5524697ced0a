use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::filter::FilterStats;
use crate::session::Session;

/// Full copy of the live session plus the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    #[serde(default)]
    pub stats: FilterStats,
    pub saved_at_ms: i64,
}

impl SessionSnapshot {
    pub fn new(session: Session, stats: FilterStats, saved_at_ms: i64) -> Self {
        Self {
            session,
            stats,
            saved_at_ms,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.saved_at_ms
    }

    pub fn is_stale(&self, now_ms: i64, staleness_window_ms: i64) -> bool {
        self.age_ms(now_ms) > staleness_window_ms
    }

    /// A restart may resume this session: it was still running and is fresh
    pub fn is_recoverable(&self, now_ms: i64, staleness_window_ms: i64) -> bool {
        self.session.is_active() && !self.is_stale(now_ms, staleness_window_ms)
    }
}

/// Local key-value persistence for session snapshots, keyed by session id
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &SessionSnapshot) -> TrackerResult<()>;

    fn load(&self, session_id: &str) -> TrackerResult<Option<SessionSnapshot>>;

    /// Most recently written snapshot across all sessions
    fn latest(&self) -> TrackerResult<Option<SessionSnapshot>>;

    /// Removing a missing snapshot is not an error
    fn clear(&self, session_id: &str) -> TrackerResult<()>;
}

/// In-process store, for embedders with their own persistence and for tests
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TrackerResult<std::sync::MutexGuard<'_, HashMap<String, SessionSnapshot>>> {
        self.snapshots
            .lock()
            .map_err(|_| TrackerError::Storage("Failed to acquire snapshot lock".to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &SessionSnapshot) -> TrackerResult<()> {
        self.lock()?
            .insert(snapshot.session_id().to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> TrackerResult<Option<SessionSnapshot>> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    fn latest(&self) -> TrackerResult<Option<SessionSnapshot>> {
        Ok(self
            .lock()?
            .values()
            .max_by_key(|s| s.saved_at_ms)
            .cloned())
    }

    fn clear(&self, session_id: &str) -> TrackerResult<()> {
        self.lock()?.remove(session_id);
        Ok(())
    }
}

/// Snapshots on disk as gzip-compressed JSON
///
/// # File Format
/// `{dir}/{session_id}.snapshot.json.gz`, written to a `.tmp` sibling first
/// and renamed into place so a crash mid-write never leaves a torn file.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

const SNAPSHOT_SUFFIX: &str = ".snapshot.json.gz";

impl FileSnapshotStore {
    /// Create store, creating the directory if missing
    pub fn new(dir: impl Into<PathBuf>) -> TrackerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileSnapshotStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", session_id, SNAPSHOT_SUFFIX))
    }

    fn read_snapshot(path: &Path) -> TrackerResult<SessionSnapshot> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut json = String::new();
        decoder.read_to_string(&mut json)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &SessionSnapshot) -> TrackerResult<()> {
        let path = self.snapshot_path(snapshot.session_id());
        let tmp_path = path.with_extension("gz.tmp");

        let json = serde_json::to_vec(snapshot)?;
        let file = File::create(&tmp_path)?;
        let mut encoder = GzEncoder::new(file, Compression::fast());
        encoder.write_all(&json)?;
        let file = encoder.finish()?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;

        log::debug!(
            "Snapshot {} written ({} points, {} bytes raw)",
            snapshot.session_id(),
            snapshot.session.accepted_path.len(),
            json.len()
        );
        Ok(())
    }

    fn load(&self, session_id: &str) -> TrackerResult<Option<SessionSnapshot>> {
        let path = self.snapshot_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_snapshot(&path).map(Some)
    }

    fn latest(&self) -> TrackerResult<Option<SessionSnapshot>> {
        let mut latest: Option<SessionSnapshot> = None;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SNAPSHOT_SUFFIX));
            if !is_snapshot {
                continue;
            }

            match Self::read_snapshot(&path) {
                Ok(snapshot) => {
                    if latest
                        .as_ref()
                        .map_or(true, |l| snapshot.saved_at_ms > l.saved_at_ms)
                    {
                        latest = Some(snapshot);
                    }
                }
                Err(e) => log::warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        Ok(latest)
    }

    fn clear(&self, session_id: &str) -> TrackerResult<()> {
        match fs::remove_file(self.snapshot_path(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
