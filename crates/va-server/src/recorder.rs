//! Default, file-based [`RecorderPort`] implementation (spec §6): raw PCM16
//! per speaker track plus a JSON-lines caption sidecar, under one directory
//! per episode. File naming and container format are this port's own
//! contract, opaque to the core.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use va_core::{CoreError, RecorderPort, Result, SpeakerId};

fn track_file_name(speaker: SpeakerId) -> &'static str {
    match speaker {
        SpeakerId::Human => "human.pcm",
        SpeakerId::Host => "host.pcm",
        SpeakerId::Guest => "guest.pcm",
    }
}

struct RecorderState {
    tracks: HashMap<SpeakerId, File>,
    captions: Option<File>,
    written: Vec<PathBuf>,
}

/// Writes one episode's recording to `{base_dir}/{episode_id}/`.
pub struct FileRecorder {
    dir: PathBuf,
    state: Mutex<RecorderState>,
}

impl FileRecorder {
    pub fn new(base_dir: impl AsRef<Path>, episode_id: &str) -> Self {
        Self {
            dir: base_dir.as_ref().join(episode_id),
            state: Mutex::new(RecorderState {
                tracks: HashMap::new(),
                captions: None,
                written: Vec::new(),
            }),
        }
    }

    async fn track(&self, state: &mut RecorderState, speaker: SpeakerId) -> Result<()> {
        if state.tracks.contains_key(&speaker) {
            return Ok(());
        }
        let path = self.dir.join(track_file_name(speaker));
        let file = File::create(&path)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("recorder: open {path:?}: {e}")))?;
        state.written.push(path);
        state.tracks.insert(speaker, file);
        Ok(())
    }
}

#[async_trait]
impl RecorderPort for FileRecorder {
    async fn start(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("recorder: mkdir {:?}: {e}", self.dir)))?;

        let mut state = self.state.lock().await;
        let captions_path = self.dir.join("captions.jsonl");
        let file = File::create(&captions_path)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("recorder: open {captions_path:?}: {e}")))?;
        state.written.push(captions_path);
        state.captions = Some(file);
        Ok(())
    }

    async fn write_audio(&self, speaker: SpeakerId, pcm16: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        self.track(&mut state, speaker).await?;
        let file = state.tracks.get_mut(&speaker).expect("just inserted");
        file.write_all(pcm16)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("recorder: write_audio: {e}")))?;
        Ok(())
    }

    async fn add_caption(&self, speaker: SpeakerId, text: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(file) = state.captions.as_mut() else {
            return Err(CoreError::InvalidState("recorder: add_caption before start".into()));
        };
        let line = serde_json::json!({
            "speaker": speaker,
            "text": text,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        let mut bytes = serde_json::to_vec(&line)
            .map_err(|e| CoreError::AdapterFailed(format!("recorder: serialize caption: {e}")))?;
        bytes.push(b'\n');
        file.write_all(&bytes)
            .await
            .map_err(|e| CoreError::AdapterFailed(format!("recorder: write_caption: {e}")))?;
        Ok(())
    }

    async fn stop(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        for file in state.tracks.values_mut() {
            let _ = file.flush().await;
        }
        if let Some(file) = state.captions.as_mut() {
            let _ = file.flush().await;
        }
        Ok(state
            .written
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_write_stop_produces_expected_files() {
        let dir = std::env::temp_dir().join(format!("va-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = FileRecorder::new(&dir, "ep-1");
        recorder.start().await.unwrap();
        recorder.write_audio(SpeakerId::Human, &[1, 2, 3, 4]).await.unwrap();
        recorder.write_audio(SpeakerId::Host, &[5, 6]).await.unwrap();
        recorder.add_caption(SpeakerId::Human, "hello there").await.unwrap();

        let files = recorder.stop().await.unwrap();
        assert_eq!(files.len(), 3);
        for f in &files {
            assert!(std::path::Path::new(f).exists());
        }

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn caption_before_start_is_invalid_state() {
        let dir = std::env::temp_dir().join(format!("va-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = FileRecorder::new(&dir, "ep-2");
        assert!(recorder.add_caption(SpeakerId::Human, "x").await.is_err());
    }
}
