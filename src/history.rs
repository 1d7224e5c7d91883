//! HistoryStore (§4.3): persists and restores the atomic unit of resume —
//! the `HistorySnapshot` — to a single JSON file. Durability follows the
//! spec's explicit guidance: write to a temp file, then rename, so a crash
//! mid-write cannot corrupt the previous good snapshot.

use crate::counters::ProgressCounters;
use crate::error::HistoryError;
use crate::models::{CellUpdate, ShareResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CountersSnapshot {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub errors: u64,
}

impl From<&ProgressCounters> for CountersSnapshot {
    fn from(c: &ProgressCounters) -> Self {
        Self {
            total: c.total,
            processed: c.processed,
            successful: c.successful,
            failed: c.failed,
            errors: c.errors,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub timestamp: String,
    #[serde(rename = "processedParticipants")]
    pub processed_participants: Vec<String>,
    #[serde(rename = "shareResults")]
    pub share_results: Vec<ShareResult>,
    #[serde(rename = "batchUpdates")]
    pub batch_updates: Vec<CellUpdate>,
    #[serde(rename = "errorLog")]
    pub error_log: Vec<String>,
    #[serde(rename = "progressStats")]
    pub progress_stats: CountersSnapshot,
    #[serde(rename = "startTime")]
    pub start_time: String,
}

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the snapshot, if any. On parse error, logs and returns `None`
    /// so the engine starts fresh (§4.3).
    pub async fn load(&self) -> Option<HistorySnapshot> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return None,
        };

        match serde_json::from_str::<HistorySnapshot>(&content) {
            Ok(mut snapshot) => {
                validate_and_repair(&mut snapshot.progress_stats);
                Some(snapshot)
            }
            Err(e) => {
                warn!("history file at {:?} is corrupt, starting fresh: {}", self.path, e);
                None
            }
        }
    }

    /// Whole-file rewrite via temp-file-then-rename (§4.3).
    pub async fn save(&self, snapshot: &HistorySnapshot) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(snapshot).expect("HistorySnapshot always serializes");

        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(HistoryError::Write)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(HistoryError::Write)?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), HistoryError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryError::Write(e)),
        }
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Reset-to-zero counter validation on load (§4.3): a corrupt snapshot's
/// counters are discarded wholesale, not proportionally scaled the way
/// `ProgressCounters::validate` repairs a live run (§4.7). The
/// processed-keys set and result list survive regardless.
fn validate_and_repair(stats: &mut CountersSnapshot) {
    // Negative counters can't occur: they're u64, and a negative number in
    // the JSON source fails deserialization before this function runs.
    let corrupt = stats.processed > stats.total || stats.successful + stats.failed > stats.processed;

    if corrupt {
        warn!("history counters failed validation, resetting to zero");
        *stats = CountersSnapshot::default();
    }
}

pub fn processed_keys(snapshot: &HistorySnapshot) -> HashSet<String> {
    snapshot.processed_participants.iter().cloned().collect()
}
