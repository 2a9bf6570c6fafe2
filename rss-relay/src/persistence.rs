//! JSON state file: watermarks, scan counters and the error journal.
//!
//! Every write is read-merge-write so that the scan snapshot and the error
//! journal, written from different places, never discard each other. A single
//! writer process is assumed.

use crate::types::{ErrorRecord, Result, ScanStats, Watermark};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Oldest records are evicted past this many.
pub const ERROR_JOURNAL_CAPACITY: usize = 50;

/// The on-disk document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default, alias = "lastArticles")]
    pub watermarks: BTreeMap<String, Watermark>,
    #[serde(default)]
    pub stats: ScanStats,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
}

/// The part of the state a scan owns in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub watermarks: BTreeMap<String, Watermark>,
    pub stats: ScanStats,
}

pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watermarks and stats from disk. The error journal stays on disk.
    pub async fn load(&self) -> Result<StateSnapshot> {
        match self.read_document().await? {
            Some(document) => {
                info!(
                    "Loaded state from {:?}: {} watermarks",
                    self.path,
                    document.watermarks.len()
                );
                Ok(StateSnapshot {
                    watermarks: document.watermarks,
                    stats: document.stats,
                })
            }
            None => {
                info!("No state file at {:?}, starting fresh", self.path);
                Ok(StateSnapshot::default())
            }
        }
    }

    /// Replace watermarks and stats, keeping whatever error journal is on disk.
    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let errors = self
            .read_document_lenient()
            .await
            .map(|document| document.errors)
            .unwrap_or_default();

        let document = PersistedState {
            watermarks: snapshot.watermarks.clone(),
            stats: snapshot.stats.clone(),
            errors,
            last_saved: Some(Utc::now()),
        };

        self.write_document(&document).await?;
        debug!("State saved to {:?}", self.path);
        Ok(())
    }

    /// Append to the error journal without touching the persisted watermarks.
    pub async fn append_error(&self, record: ErrorRecord) -> Result<()> {
        let mut document = self.read_document_lenient().await.unwrap_or_default();

        document.errors.push(record);
        if document.errors.len() > ERROR_JOURNAL_CAPACITY {
            let excess = document.errors.len() - ERROR_JOURNAL_CAPACITY;
            document.errors.drain(..excess);
        }
        document.last_saved = Some(Utc::now());

        self.write_document(&document).await
    }

    pub async fn errors(&self) -> Result<Vec<ErrorRecord>> {
        Ok(self
            .read_document()
            .await?
            .map(|document| document.errors)
            .unwrap_or_default())
    }

    async fn read_document(&self) -> Result<Option<PersistedState>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Unreadable or corrupt files count as empty for merging.
    async fn read_document_lenient(&self) -> Option<PersistedState> {
        match self.read_document().await {
            Ok(document) => document,
            Err(e) => {
                warn!("Ignoring unreadable state file {:?}: {}", self.path, e);
                None
            }
        }
    }

    async fn write_document(&self, document: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(document)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
