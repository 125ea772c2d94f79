//! Append-only notes shared across invocations.
//!
//! Holds the notification sent-set and a per-work-item log of notable
//! events. Every read-modify-write happens under an exclusive advisory lock
//! on a sibling `.lock` file, and the JSON is replaced atomically.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEntry {
    pub work_item_id: u64,
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Notes {
    #[serde(default)]
    sent: BTreeSet<String>,
    #[serde(default)]
    entries: Vec<NoteEntry>,
}

#[derive(Debug, Clone)]
pub struct NotesStore {
    path: PathBuf,
}

impl NotesStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let lock_path = self.path.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open notes lock {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to acquire notes lock {}", lock_path.display()))?;
        Ok(file)
    }

    fn read(&self) -> Result<Notes> {
        if !self.path.exists() {
            return Ok(Notes::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Corrupt notes file {}", self.path.display()))
    }

    fn write(&self, notes: &Notes) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(notes)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    fn update<T>(&self, f: impl FnOnce(&mut Notes) -> T) -> Result<T> {
        let lock = self.lock()?;
        let mut notes = self.read()?;
        let out = f(&mut notes);
        self.write(&notes)?;
        FileExt::unlock(&lock)?;
        Ok(out)
    }

    /// Record `key`; true only the first time it is ever recorded.
    pub fn record_once(&self, key: &str) -> Result<bool> {
        self.update(|notes| notes.sent.insert(key.to_string()))
    }

    pub fn append(&self, work_item_id: u64, text: &str) -> Result<()> {
        self.update(|notes| {
            notes.entries.push(NoteEntry {
                work_item_id,
                at: Utc::now(),
                text: text.to_string(),
            })
        })
    }

    pub fn entries_for(&self, work_item_id: u64) -> Result<Vec<NoteEntry>> {
        let lock = self.lock()?;
        let notes = self.read()?;
        FileExt::unlock(&lock)?;
        Ok(notes
            .entries
            .into_iter()
            .filter(|e| e.work_item_id == work_item_id)
            .collect())
    }

    /// Forget sent-set keys of a work item so a fresh start notifies again.
    pub fn forget_work_item(&self, work_item_id: u64) -> Result<()> {
        let prefix = format!("{}:", work_item_id);
        self.update(|notes| notes.sent.retain(|k| !k.starts_with(&prefix)))
    }
}
