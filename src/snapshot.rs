//! Advisory per-work-item workflow snapshot.
//!
//! Written on interrupt, blocker and retry; read at start as a resume hint;
//! deleted on terminal success. Never authoritative: the orchestrator
//! reconciles it against live state before using any field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::WorkflowError;
use crate::phase::{Mode, Phase};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Local version-control state at the time of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsStatus {
    pub branch: Option<String>,
    pub local_head: Option<String>,
    pub remote_head: Option<String>,
    pub uncommitted_changes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub version: u32,
    pub work_item_id: u64,
    pub phase: Phase,
    pub retry_count: u32,
    #[serde(default)]
    pub reroute_count: u32,
    pub pr_id: Option<u64>,
    pub workspace_path: Option<PathBuf>,
    pub mode: Mode,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub vcs_status: VcsStatus,
    #[serde(default)]
    pub interrupted: bool,
}

impl WorkflowSnapshot {
    pub fn new(work_item_id: u64, phase: Phase, mode: Mode) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            work_item_id,
            phase,
            retry_count: 0,
            reroute_count: 0,
            pr_id: None,
            workspace_path: None,
            mode,
            timestamp: Utc::now(),
            vcs_status: VcsStatus::default(),
            interrupted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, work_item_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", work_item_id))
    }

    /// The snapshot for a work item, if one exists and is readable.
    ///
    /// Corrupt or foreign-version files are ignored with a warning.
    pub fn load(&self, work_item_id: u64) -> Option<WorkflowSnapshot> {
        let path = self.path_for(work_item_id);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<WorkflowSnapshot>(&content) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(path = %path.display(), version = snapshot.version, "Ignoring snapshot with unknown version");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt snapshot");
                None
            }
        }
    }

    pub fn save(&self, snapshot: &WorkflowSnapshot) -> Result<(), WorkflowError> {
        let path = self.path_for(snapshot.work_item_id);
        let to_err = |source| WorkflowError::SnapshotWrite {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(to_err)?;
        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| to_err(std::io::Error::other(e)))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(to_err)?;
        std::fs::rename(&tmp, &path).map_err(to_err)?;
        debug!(work_item = snapshot.work_item_id, phase = %snapshot.phase, "snapshot saved");
        Ok(())
    }

    pub fn delete(&self, work_item_id: u64) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_for(work_item_id)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// All readable snapshots, ordered by work item id.
    pub fn list(&self) -> Vec<WorkflowSnapshot> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut snapshots: Vec<WorkflowSnapshot> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let stem = name.to_str()?.strip_suffix(".json")?;
                self.load(stem.parse().ok()?)
            })
            .collect();
        snapshots.sort_by_key(|s| s.work_item_id);
        snapshots
    }
}
