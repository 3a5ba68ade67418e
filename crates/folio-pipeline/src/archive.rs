// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File-backed archive sink — one pretty-printed JSON file per record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use folio_core::error::{FolioError, Result};
use folio_core::{ArchiveSink, FinalRecord};

/// Writes completed records to `<dir>/<archive id>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirectoryArchive {
    dir: PathBuf,
}

impl JsonDirectoryArchive {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| FolioError::Archive(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    /// `$XDG_DATA_HOME/folio/archive`, falling back to `~/.local/share`.
    pub fn default_location() -> PathBuf {
        let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".local").join("share")
        } else {
            std::env::temp_dir()
        };
        base.join("folio").join("archive")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Read back a record written by [`persist`](ArchiveSink::persist).
    pub async fn load(&self, id: &str) -> Result<FinalRecord> {
        if Uuid::parse_str(id).is_err() {
            return Err(FolioError::Archive(format!("invalid archive id: {}", id)));
        }
        let bytes = tokio::fs::read(self.path_for(id))
            .await
            .map_err(|e| FolioError::Archive(format!("{}: {}", id, e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ArchiveSink for JsonDirectoryArchive {
    #[instrument(skip_all, fields(run_id = %record.run_id))]
    async fn persist(&self, record: &FinalRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let json = serde_json::to_vec_pretty(record)?;
        let path = self.path_for(&id);
        tokio::fs::write(&path, &json)
            .await
            .map_err(|e| FolioError::Archive(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = json.len(), "Record written");
        Ok(id)
    }
}
