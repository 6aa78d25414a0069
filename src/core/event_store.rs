//! Append-only job store with file-based persistence.
//!
//! Each job gets a directory holding its audit trail as newline-delimited
//! JSON (`events.jsonl`) and, once finished, its `result.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{EventType, JobEvent, JobResult};

const EVENTS_FILE: &str = "events.jsonl";
const RESULT_FILE: &str = "result.json";

/// File-based store for one job
pub struct EventStore {
    job_dir: PathBuf,
    events_path: PathBuf,
    result_path: PathBuf,
}

impl EventStore {
    /// Create or open the store for a job under the configured jobs directory
    pub async fn open(job_id: Uuid) -> Result<Self> {
        let base_dir = Self::base_directory()?;
        Self::open_in(&base_dir, job_id).await
    }

    /// Create or open the store for a job under `base_dir`
    pub async fn open_in(base_dir: &Path, job_id: Uuid) -> Result<Self> {
        let job_dir = base_dir.join(job_id.to_string());
        fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("Failed to create job directory: {}", job_dir.display()))?;

        Ok(Self {
            events_path: job_dir.join(EVENTS_FILE),
            result_path: job_dir.join(RESULT_FILE),
            job_dir,
        })
    }

    /// Base directory for all jobs (~/.claimcheck/jobs or $CLAIMCHECK_HOME/jobs)
    pub fn base_directory() -> Result<PathBuf> {
        crate::config::jobs_dir()
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Append one event to the log
    pub async fn append(&self, event: &JobEvent) -> Result<()> {
        self.append_all(std::slice::from_ref(event)).await
    }

    /// Append a batch of events in order
    pub async fn append_all(&self, events: &[JobEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for event in events {
            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            buffer.push_str(&json);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        file.write_all(buffer.as_bytes())
            .await
            .context("Failed to write events")?;
        file.flush().await.context("Failed to flush events")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<JobEvent>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: JobEvent =
                serde_json::from_str(&line).with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Last event of a given type, if any
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<JobEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// Persist the final result, replacing any earlier one
    pub async fn store_result(&self, result: &JobResult) -> Result<()> {
        let json = serde_json::to_string_pretty(result).context("Failed to serialize job result")?;
        fs::write(&self.result_path, json)
            .await
            .with_context(|| format!("Failed to write result: {}", self.result_path.display()))
    }

    pub async fn load_result(&self) -> Result<Option<JobResult>> {
        if !self.result_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.result_path)
            .await
            .with_context(|| format!("Failed to read result: {}", self.result_path.display()))?;
        let result = serde_json::from_str(&content).context("Failed to parse job result")?;
        Ok(Some(result))
    }

    /// Job ids in the configured jobs directory
    pub async fn list_jobs() -> Result<Vec<Uuid>> {
        let base_dir = Self::base_directory()?;
        Self::list_jobs_in(&base_dir).await
    }

    /// Job ids under `base_dir`, most recently modified first
    pub async fn list_jobs_in(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
                continue;
            };
            let modified = entry.metadata().await.and_then(|m| m.modified()).ok();
            jobs.push((modified, id));
        }

        jobs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(jobs.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResearchPhase;
    use tempfile::TempDir;

    fn event(job_id: Uuid, event_type: EventType, summary: &str) -> JobEvent {
        JobEvent::new(job_id, ResearchPhase::Research, event_type, 1, summary.to_string())
    }

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let temp = TempDir::new().unwrap();
        let job_id = Uuid::new_v4();
        let store = EventStore::open_in(temp.path(), job_id).await.unwrap();

        store.append(&event(job_id, EventType::JobStarted, "start")).await.unwrap();
        store
            .append_all(&[
                event(job_id, EventType::SearchIssued, "'q1'"),
                event(job_id, EventType::SearchCacheHit, "'q2'"),
            ])
            .await
            .unwrap();

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::JobStarted);
        assert_eq!(events[2].summary, "'q2'");

        let last = store.last_event_of_type(EventType::SearchIssued).await.unwrap();
        assert_eq!(last.map(|e| e.summary), Some("'q1'".to_string()));
    }

    #[tokio::test]
    async fn test_replay_of_missing_log_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = EventStore::open_in(temp.path(), Uuid::new_v4()).await.unwrap();

        assert!(store.replay().await.unwrap().is_empty());
        assert!(store.load_result().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_skips_foreign_entries() {
        let temp = TempDir::new().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        EventStore::open_in(temp.path(), a).await.unwrap();
        EventStore::open_in(temp.path(), b).await.unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-job")).unwrap();
        std::fs::write(temp.path().join("stray.txt"), "x").unwrap();

        let jobs = EventStore::list_jobs_in(temp.path()).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.contains(&a));
        assert!(jobs.contains(&b));
    }
}
