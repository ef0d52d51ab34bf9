use super::Sink;
use crate::error::{ConfigError, SinkError};
use crate::event::EventRecord;
use crate::render::OutputTemplate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// How often a new file is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollingPolicy {
    /// Always the same file.
    Never,
    /// One file per UTC day, `app-20240105.log`.
    #[default]
    Daily,
    /// One file per UTC hour, `app-2024010513.log`.
    Hourly,
}

impl RollingPolicy {
    /// Period key for a timestamp; `None` when the policy never rolls.
    pub fn bucket(self, ts: DateTime<Utc>) -> Option<String> {
        match self {
            RollingPolicy::Never => None,
            RollingPolicy::Daily => Some(ts.format("%Y%m%d").to_string()),
            RollingPolicy::Hourly => Some(ts.format("%Y%m%d%H").to_string()),
        }
    }
}

/// A path such as `logs/app-.log`, split so the period key can be inserted before the
/// extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    dir: PathBuf,
    stem: String,
    extension: Option<String>,
}

impl FilePattern {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ConfigError::invalid("sinks.path", "must name a file"))?;
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !ext.is_empty() => (stem.to_string(), Some(ext.to_string())),
            _ => (file_name.to_string(), None),
        };
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self { dir, stem, extension })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a period key; the bare pattern when there is none.
    pub fn path_for(&self, bucket: Option<&str>) -> PathBuf {
        let mut name = self.stem.clone();
        if let Some(bucket) = bucket {
            name.push_str(bucket);
        }
        if let Some(ext) = &self.extension {
            name.push('.');
            name.push_str(ext);
        }
        self.dir.join(name)
    }

    /// Whether `file_name` is one of the files this pattern produces.
    fn matches(&self, file_name: &str) -> bool {
        let Some(rest) = file_name.strip_prefix(self.stem.as_str()) else {
            return false;
        };
        let key = match &self.extension {
            Some(ext) => match rest.strip_suffix(ext.as_str()).and_then(|r| r.strip_suffix('.')) {
                Some(key) => key,
                None => return false,
            },
            None => rest,
        };
        !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
    }
}

#[derive(Debug)]
struct ActiveFile {
    bucket: Option<String>,
    path: PathBuf,
    file: tokio::fs::File,
}

/// Appends rendered records to a file named after the record's UTC period.
///
/// The period is taken from each record's timestamp, not from the wall clock at write time.
/// The sink only rotates forward: a record from an earlier period than the open file is
/// appended to that period's file without moving the handle. All writers share one lock, so
/// lines never interleave. Every write is flushed before the lock is released.
///
/// If a new period's file cannot be opened the write fails with [`SinkError::Rotation`] and
/// the next write tries again.
#[derive(Debug)]
pub struct RollingFileSink {
    name: String,
    pattern: FilePattern,
    policy: RollingPolicy,
    template: OutputTemplate,
    retained_files: Option<usize>,
    state: Mutex<Option<ActiveFile>>,
    rotations: AtomicU64,
    late_writes: AtomicU64,
}

impl RollingFileSink {
    pub fn new(pattern: FilePattern, policy: RollingPolicy, template: OutputTemplate) -> Self {
        Self {
            name: "file".to_string(),
            pattern,
            policy,
            template,
            retained_files: None,
            state: Mutex::new(None),
            rotations: AtomicU64::new(0),
            late_writes: AtomicU64::new(0),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Delete the oldest matching files so that at most `n` remain after each rotation.
    pub fn with_retained_files(mut self, n: usize) -> Self {
        self.retained_files = Some(n.max(1));
        self
    }

    /// Number of times the sink moved from one period's file to another.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Records older than the open period, appended to their own period's file.
    pub fn late_writes(&self) -> u64 {
        self.late_writes.load(Ordering::Relaxed)
    }

    /// Path of the currently open file, if any.
    pub async fn active_path(&self) -> Option<PathBuf> {
        self.state.lock().await.as_ref().map(|a| a.path.clone())
    }

    async fn open(&self, bucket: Option<String>) -> Result<ActiveFile, SinkError> {
        let path = self.pattern.path_for(bucket.as_deref());
        let rotation = |source| SinkError::Rotation { path: path.clone(), source };
        if !self.pattern.dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(&self.pattern.dir).await.map_err(rotation)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(rotation)?;
        Ok(ActiveFile { bucket, path, file })
    }

    /// One-off append for a record behind the current period. The open handle stays where
    /// it is and retention is not re-run. Called with the state lock held.
    async fn append_late(&self, bucket: Option<String>, line: &str) -> Result<(), SinkError> {
        let mut late = self.open(bucket).await?;
        late.file.write_all(line.as_bytes()).await?;
        late.file.flush().await?;
        Ok(())
    }

    async fn prune(&self, keep: usize, active: &Path) {
        let dir = if self.pattern.dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            self.pattern.dir.as_path()
        };
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    target: "logweave::selflog",
                    sink = %self.name,
                    error = %err,
                    "cannot list log directory"
                );
                return;
            }
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if self.pattern.matches(name) {
                    names.push(name.to_string());
                }
            }
        }
        // Period keys are fixed-width digits, so lexical order is age order.
        names.sort();
        let excess = names.len().saturating_sub(keep);
        for name in names.into_iter().take(excess) {
            let path = self.pattern.dir.join(&name);
            if path.file_name() == active.file_name() {
                continue;
            }
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    target: "logweave::selflog",
                    sink = %self.name,
                    path = %path.display(),
                    error = %err,
                    "cannot remove old log file"
                );
            }
        }
    }
}

#[async_trait]
impl Sink for RollingFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        let line = self.template.render(record);
        let bucket = self.policy.bucket(record.timestamp());

        let mut state = self.state.lock().await;
        let current = state.as_ref().map(|a| a.bucket.clone());
        if let Some(current) = &current {
            if bucket < *current {
                self.late_writes.fetch_add(1, Ordering::Relaxed);
                return self.append_late(bucket, &line).await;
            }
        }
        if current.as_ref() != Some(&bucket) {
            if let Some(mut previous) = state.take() {
                if let Err(err) = previous.file.flush().await {
                    tracing::warn!(
                        target: "logweave::selflog",
                        sink = %self.name,
                        path = %previous.path.display(),
                        error = %err,
                        "flush on rotation failed"
                    );
                }
                self.rotations.fetch_add(1, Ordering::Relaxed);
            }
            let opened = self.open(bucket).await?;
            if let Some(keep) = self.retained_files {
                self.prune(keep, &opened.path).await;
            }
            *state = Some(opened);
        }

        let Some(active) = state.as_mut() else {
            return Err(SinkError::Closed);
        };
        let written = async {
            active.file.write_all(line.as_bytes()).await?;
            active.file.flush().await
        }
        .await;
        if let Err(err) = written {
            // Reopen on the next write.
            *state = None;
            return Err(err.into());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        if let Some(active) = self.state.lock().await.as_mut() {
            active.file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Level, Properties};
    use chrono::TimeZone;

    #[test]
    fn pattern_inserts_period_before_extension() {
        let p = FilePattern::parse("/app/logs/app-.log").unwrap();
        assert_eq!(p.path_for(Some("20240105")), PathBuf::from("/app/logs/app-20240105.log"));
        assert_eq!(p.path_for(None), PathBuf::from("/app/logs/app-.log"));

        let bare = FilePattern::parse("service").unwrap();
        assert_eq!(bare.path_for(Some("2024010513")), PathBuf::from("service2024010513"));
        assert!(FilePattern::parse("/").is_err());
    }

    #[test]
    fn pattern_matches_only_its_own_files() {
        let p = FilePattern::parse("logs/app-.log").unwrap();
        assert!(p.matches("app-20240105.log"));
        assert!(p.matches("app-2024010513.log"));
        assert!(!p.matches("app-.log"));
        assert!(!p.matches("app-latest.log"));
        assert!(!p.matches("other-20240105.log"));
    }

    #[test]
    fn buckets_use_utc_period() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 5, 13, 59, 59).unwrap();
        assert_eq!(RollingPolicy::Daily.bucket(ts).as_deref(), Some("20240105"));
        assert_eq!(RollingPolicy::Hourly.bucket(ts).as_deref(), Some("2024010513"));
        assert_eq!(RollingPolicy::Never.bucket(ts), None);
    }

    fn at(h: u32, d: u32) -> EventRecord {
        EventRecord::builder(Level::Info, "tick {D}")
            .at(Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap())
            .property("D", d)
            .build()
    }

    #[tokio::test]
    async fn flushes_each_write() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = FilePattern::parse(dir.path().join("app-.log")).unwrap();
        let template = OutputTemplate::parse("{Message}{NewLine}").unwrap();
        let sink = RollingFileSink::new(pattern, RollingPolicy::Daily, template);
        sink.write(&at(10, 5)).await.unwrap();
        let text = std::fs::read_to_string(dir.path().join("app-20240105.log")).unwrap();
        assert_eq!(text, "tick 5\n");
        assert_eq!(sink.rotations(), 0);
    }

    #[tokio::test]
    async fn retention_removes_oldest_periods() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = FilePattern::parse(dir.path().join("app-.log")).unwrap();
        let template = OutputTemplate::parse("{Message}{NewLine}").unwrap();
        let sink =
            RollingFileSink::new(pattern, RollingPolicy::Daily, template).with_retained_files(2);
        for d in 1..=4 {
            sink.write(&at(12, d)).await.unwrap();
        }
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["app-20240103.log", "app-20240104.log"]);
        assert_eq!(sink.rotations(), 3);
    }

    #[tokio::test]
    async fn late_records_do_not_move_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = FilePattern::parse(dir.path().join("app-.log")).unwrap();
        let template = OutputTemplate::parse("{Message}{NewLine}").unwrap();
        let sink =
            RollingFileSink::new(pattern, RollingPolicy::Daily, template).with_retained_files(2);
        for (h, d) in [(23, 4), (0, 5), (23, 4), (1, 5), (23, 4)] {
            sink.write(&at(h, d)).await.unwrap();
        }
        assert_eq!(sink.rotations(), 1);
        assert_eq!(sink.late_writes(), 2);
        assert_eq!(sink.active_path().await, Some(dir.path().join("app-20240105.log")));
        let day4 = std::fs::read_to_string(dir.path().join("app-20240104.log")).unwrap();
        let day5 = std::fs::read_to_string(dir.path().join("app-20240105.log")).unwrap();
        assert_eq!(day4, "tick 4\ntick 4\ntick 4\n");
        assert_eq!(day5, "tick 5\ntick 5\n");
    }

    #[tokio::test]
    async fn open_failure_is_reported_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the log directory should be.
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"").unwrap();
        let pattern = FilePattern::parse(blocker.join("app-.log")).unwrap();
        let sink = RollingFileSink::new(pattern, RollingPolicy::Daily, OutputTemplate::file());
        let record = EventRecord::new(Level::Error, "x", Properties::new());
        assert!(matches!(sink.write(&record).await, Err(SinkError::Rotation { .. })));
        assert!(sink.active_path().await.is_none());

        std::fs::remove_file(&blocker).unwrap();
        sink.write(&record).await.unwrap();
        assert!(sink.active_path().await.is_some());
    }
}
