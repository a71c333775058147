//! Persistence collaborators.
//!
//! The core never touches SQL or media codecs directly: usage records go
//! through [`UsageStore`] and every produced file (recording, screenshot,
//! transcript, workflow, analysis) is addressed by a generated timestamped
//! name under the [`ArtifactStore`] layout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraqError};

/// One observed stretch of foreground time for a single application.
/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Foreground application identity (process/app name)
    pub app_name: String,
    /// Seconds the application held the foreground
    pub seconds: f64,
    /// When the stretch ended (the moment the foreground changed)
    pub captured_at: DateTime<Utc>,
}

/// Aggregated usage for one application over a query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageTotal {
    pub app_name: String,
    pub seconds: f64,
}

/// Append-only store for usage records.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append a record. Records are never updated or deleted.
    async fn append(&self, record: &UsageRecord) -> Result<()>;

    /// Total seconds per app for the given date, sorted descending.
    async fn totals_for_date(&self, date: NaiveDate) -> Result<Vec<UsageTotal>>;
}

/// File-backed usage store: one JSON document per line, appended in arrival
/// order. The concrete SQL layer the full product uses is a separate
/// collaborator behind the same trait.
pub struct JsonlUsageStore {
    path: PathBuf,
}

impl JsonlUsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UsageStore for JsonlUsageStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)
            .map_err(|e| TraqError::Internal(format!("encode usage record: {e}")))?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn totals_for_date(&self, date: NaiveDate) -> Result<Vec<UsageTotal>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut totals: HashMap<String, f64> = HashMap::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let record: UsageRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    // A torn line from a crash mid-append; skip it.
                    tracing::warn!("skipping malformed usage line: {e}");
                    continue;
                }
            };
            if record.captured_at.date_naive() == date {
                *totals.entry(record.app_name).or_default() += record.seconds;
            }
        }

        let mut totals: Vec<UsageTotal> = totals
            .into_iter()
            .map(|(app_name, seconds)| UsageTotal { app_name, seconds })
            .collect();
        totals.sort_by(|a, b| b.seconds.total_cmp(&a.seconds));
        Ok(totals)
    }
}

/// In-memory usage store for tests and headless runs.
#[derive(Default)]
pub struct MemoryUsageStore {
    records: parking_lot::Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn totals_for_date(&self, date: NaiveDate) -> Result<Vec<UsageTotal>> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        for record in self.records.lock().iter() {
            if record.captured_at.date_naive() == date {
                *totals.entry(record.app_name.clone()).or_default() += record.seconds;
            }
        }
        let mut totals: Vec<UsageTotal> = totals
            .into_iter()
            .map(|(app_name, seconds)| UsageTotal { app_name, seconds })
            .collect();
        totals.sort_by(|a, b| b.seconds.total_cmp(&a.seconds));
        Ok(totals)
    }
}

// =============================================================================
// Artifact layout
// =============================================================================

/// Categories of produced files, each with its own directory and name scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Recording,
    Screenshot,
    Transcript,
    Workflow,
    Analysis,
}

impl ArtifactKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Recording => "recordings",
            ArtifactKind::Screenshot => "screenshots",
            ArtifactKind::Transcript => "transcripts",
            ArtifactKind::Workflow => "workflows",
            ArtifactKind::Analysis => "analyses",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Recording => "recording",
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Transcript => "conversation",
            ArtifactKind::Workflow => "workflow",
            ArtifactKind::Analysis => "analysis",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Recording => "mp4",
            ArtifactKind::Screenshot => "png",
            ArtifactKind::Transcript => "txt",
            ArtifactKind::Workflow => "json",
            ArtifactKind::Analysis => "txt",
        }
    }
}

/// Metadata returned by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// File layout under a single data directory, with generated timestamped
/// names (`recording_20250807_101500.mp4` and friends).
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Create every artifact directory up front.
    pub async fn ensure_layout(&self) -> Result<()> {
        for kind in [
            ArtifactKind::Recording,
            ArtifactKind::Screenshot,
            ArtifactKind::Transcript,
            ArtifactKind::Workflow,
            ArtifactKind::Analysis,
        ] {
            tokio::fs::create_dir_all(self.dir(kind)).await?;
        }
        Ok(())
    }

    /// Generate a fresh timestamped path for a new artifact.
    pub fn timestamped_path(&self, kind: ArtifactKind, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format("%Y%m%d_%H%M%S");
        self.dir(kind)
            .join(format!("{}_{}.{}", kind.prefix(), stamp, kind.extension()))
    }

    /// Write a whole artifact in one shot and return its path.
    pub async fn write(
        &self,
        kind: ArtifactKind,
        now: DateTime<Utc>,
        contents: &[u8],
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(self.dir(kind)).await?;
        let path = self.timestamped_path(kind, now);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Append a text block to an existing artifact (session transcript log).
    pub async fn append_text(&self, path: &Path, text: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// List artifacts of one kind, newest first.
    pub async fn list(&self, kind: ArtifactKind) -> Result<Vec<ArtifactInfo>> {
        let dir = self.dir(kind);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches_kind = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(kind.extension()))
                .unwrap_or(false);
            if !matches_kind {
                continue;
            }
            let metadata = entry.metadata().await?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            infos.push(ArtifactInfo {
                filename: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: metadata.len(),
                modified,
            });
        }

        infos.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.filename.cmp(&a.filename)));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(app: &str, seconds: f64, at: &str) -> UsageRecord {
        UsageRecord {
            app_name: app.to_string(),
            seconds,
            captured_at: at.parse().unwrap(),
        }
    }

    // =========================================================================
    // Usage stores
    // =========================================================================

    #[tokio::test]
    async fn jsonl_store_appends_and_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlUsageStore::new(dir.path().join("usage.jsonl"));

        store
            .append(&record("chrome.exe", 12.0, "2026-08-07T10:00:00Z"))
            .await
            .unwrap();
        store
            .append(&record("code.exe", 30.0, "2026-08-07T10:01:00Z"))
            .await
            .unwrap();
        store
            .append(&record("chrome.exe", 8.0, "2026-08-07T10:02:00Z"))
            .await
            .unwrap();
        // Different day, must not be counted.
        store
            .append(&record("chrome.exe", 99.0, "2026-08-06T10:00:00Z"))
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        let totals = store.totals_for_date(date).await.unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].app_name, "code.exe");
        assert_eq!(totals[0].seconds, 30.0);
        assert_eq!(totals[1].app_name, "chrome.exe");
        assert_eq!(totals[1].seconds, 20.0);
    }

    #[tokio::test]
    async fn jsonl_store_empty_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlUsageStore::new(dir.path().join("missing.jsonl"));
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        assert!(store.totals_for_date(date).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn jsonl_store_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let store = JsonlUsageStore::new(&path);
        store
            .append(&record("chrome.exe", 5.0, "2026-08-07T10:00:00Z"))
            .await
            .unwrap();
        // Simulate a crash mid-append.
        store.append(&record("x", 1.0, "2026-08-07T10:00:01Z")).await.unwrap();
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"app_name\":\"torn");
        tokio::fs::write(&path, contents).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        let totals = store.totals_for_date(date).await.unwrap();
        assert_eq!(totals.len(), 2);
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryUsageStore::new();
        store
            .append(&record("term", 4.0, "2026-08-07T09:00:00Z"))
            .await
            .unwrap();
        assert_eq!(store.records().len(), 1);
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        let totals = store.totals_for_date(date).await.unwrap();
        assert_eq!(totals[0].seconds, 4.0);
    }

    // =========================================================================
    // Artifact store
    // =========================================================================

    #[test]
    fn timestamped_names_follow_the_layout() {
        let store = ArtifactStore::new("/data");
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 10, 15, 0).unwrap();
        let path = store.timestamped_path(ArtifactKind::Recording, now);
        assert_eq!(
            path,
            PathBuf::from("/data/recordings/recording_20260807_101500.mp4")
        );
        let path = store.timestamped_path(ArtifactKind::Screenshot, now);
        assert_eq!(
            path,
            PathBuf::from("/data/screenshots/screenshot_20260807_101500.png")
        );
    }

    #[tokio::test]
    async fn ensure_layout_creates_all_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_layout().await.unwrap();
        for sub in ["recordings", "screenshots", "transcripts", "workflows", "analyses"] {
            assert!(dir.path().join(sub).is_dir(), "missing {sub}");
        }
    }

    #[tokio::test]
    async fn list_returns_newest_first_and_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let older = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();
        store
            .write(ArtifactKind::Workflow, older, b"{}")
            .await
            .unwrap();
        store
            .write(ArtifactKind::Workflow, newer, b"{}")
            .await
            .unwrap();
        // Unrelated file in the same directory.
        tokio::fs::write(store.dir(ArtifactKind::Workflow).join("notes.md"), b"x")
            .await
            .unwrap();

        let listed = store.list(ArtifactKind::Workflow).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].filename >= listed[1].filename);
    }

    #[tokio::test]
    async fn append_text_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = dir.path().join("transcripts/conversation_test.txt");
        store.append_text(&path, "hello ").await.unwrap();
        store.append_text(&path, "world").await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "hello world");
    }
}
