//! Default, file-based [`EventLogPort`] implementation (spec §6): an
//! append-only JSON-lines file under one directory per episode.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use va_core::{CoreError, EventLogPort, LogEvent, Result};

/// Appends one JSON object per line to `{base_dir}/{episode_id}/events.jsonl`.
pub struct FileEventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileEventLog {
    pub fn new(base_dir: impl AsRef<Path>, episode_id: &str) -> Self {
        Self {
            path: base_dir.as_ref().join(episode_id).join("events.jsonl"),
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EventLogPort for FileEventLog {
    async fn start(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::AdapterFailed(format!("event log: mkdir {parent:?}: {e}")))?;
        }
        let file = File::create(&self.path)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("event log: open {:?}: {e}", self.path)))?;
        *self.file.lock().await = Some(file);
        Ok(())
    }

    async fn log(&self, event: LogEvent) -> Result<()> {
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return Err(CoreError::InvalidState("event log: log before start".into()));
        };
        let mut bytes = serde_json::to_vec(&event)
            .map_err(|e| CoreError::AdapterFailed(format!("event log: serialize: {e}")))?;
        bytes.push(b'\n');
        file.write_all(&bytes)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("event log: write: {e}")))?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            let _ = file.flush().await;
        }
        *guard = None;
        Ok(())
    }
}
