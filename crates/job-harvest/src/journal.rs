//! JSONL run journal, an append-only record of what a harvest did.
//!
//! One event per combination start and stop, per saved listing, and per
//! skipped or failed listing. Rotates to `.1`..`.5` once the file grows
//! past its size cap.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Journal size before rotation (50 MB).
pub const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum number of rotated journal files to keep.
const MAX_ROTATIONS: u32 = 5;

/// A single journal event.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEvent {
    pub timestamp: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JournalEvent {
    pub fn new(event: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            position: None,
            location: None,
            job_id: None,
            count: None,
            detail: None,
        }
    }

    pub fn combination(mut self, position: &str, location: &str) -> Self {
        self.position = Some(position.to_string());
        self.location = Some(location.to_string());
        self
    }

    pub fn job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only JSONL journal with rotation.
pub struct RunJournal {
    file: File,
    path: PathBuf,
    max_size: u64,
    /// Approximate current size.
    current_size: u64,
}

impl RunJournal {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_limit(path, DEFAULT_MAX_SIZE)
    }

    pub fn open_with_limit(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run journal: {}", path.display()))?;

        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            max_size,
            current_size,
        })
    }

    pub fn log(&mut self, event: &JournalEvent) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let json = serde_json::to_string(event)?;
        writeln!(self.file, "{json}")
            .with_context(|| format!("failed to write run journal: {}", self.path.display()))?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Rotate: journal → journal.1, .1 → .2, and so on.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| "failed to reopen run journal after rotation")?;
        self.current_size = 0;
        Ok(())
    }
}

/// `run.jsonl.1`, `run.jsonl.2`, ...
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("journal.jsonl")
    );
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let mut journal = RunJournal::open(&path).unwrap();
        journal
            .log(&JournalEvent::new("listing_saved").combination("Rust", "Berlin").job("42"))
            .unwrap();
        journal.log(&JournalEvent::new("run_finished").count(1)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "listing_saved");
        assert_eq!(lines[0]["job_id"], "42");
        assert!(lines[1].get("job_id").is_none());
        assert_eq!(lines[1]["count"], 1);
    }

    #[test]
    fn test_rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut journal = RunJournal::open_with_limit(&path, 1).unwrap();
        for i in 0..8 {
            journal.log(&JournalEvent::new("tick").count(i)).unwrap();
        }
        assert!(path.exists());
        assert!(rotation_path(&path, 1).exists());
        assert!(rotation_path(&path, MAX_ROTATIONS).exists());
        assert!(!rotation_path(&path, MAX_ROTATIONS + 1).exists());

        let newest = std::fs::read_to_string(&path).unwrap();
        assert!(newest.contains("\"count\":7"));
    }
}
