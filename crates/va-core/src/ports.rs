//! External adapter ports (spec §6): the boundary traits the orchestrator
//! calls out through for speech recognition, speech synthesis, durable
//! recording, and structured event logging.
//!
//! Concrete backends (a real STT vendor, a TTS vendor, disk-backed
//! recording) live outside this crate and are wired in by `va-server`. Each
//! trait ships a `Null*` no-op double here so the rest of the engine can be
//! exercised without a live backend, mirroring the teacher's `MockStt`.

use crate::error::Result;
use crate::model::SpeakerId;
use async_trait::async_trait;

/// A finalized or partial speech-to-text result for one speaker's utterance.
#[derive(Debug, Clone)]
pub struct SttResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

/// Streaming speech-to-text over raw PCM16 frames.
#[async_trait]
pub trait SttPort: Send + Sync {
    /// Feed one frame of PCM16 audio for `speaker`. Returns `Some` when the
    /// backend has a result (partial or final) ready to emit.
    async fn push_audio(&self, speaker: SpeakerId, pcm16: &[u8]) -> Result<Option<SttResult>>;

    /// Flush any buffered audio, forcing a final result if one is pending.
    async fn flush(&self, speaker: SpeakerId) -> Result<Option<SttResult>>;
}

/// No-op `SttPort` that never produces a result. Used in tests and as a
/// placeholder before a real backend is configured.
pub struct NullStt;

#[async_trait]
impl SttPort for NullStt {
    async fn push_audio(&self, _speaker: SpeakerId, _pcm16: &[u8]) -> Result<Option<SttResult>> {
        Ok(None)
    }

    async fn flush(&self, _speaker: SpeakerId) -> Result<Option<SttResult>> {
        Ok(None)
    }
}

/// Text-to-speech synthesis, returning raw PCM16 audio.
#[async_trait]
pub trait TtsPort: Send + Sync {
    /// Synthesize `text` for `speaker`, returning PCM16 little-endian bytes.
    async fn synthesize(&self, speaker: SpeakerId, text: &str) -> Result<Vec<u8>>;

    /// Cooperatively request that `speaker`'s in-flight synthesis stop (spec
    /// §4.5 barge-in: "request its TTS handle to stop"). Best-effort — an
    /// adapter that does not honor this promptly is considered stopped once
    /// its completion callback arrives.
    async fn stop(&self, speaker: SpeakerId) -> Result<()>;
}

/// No-op `TtsPort` that returns silence in place of synthesized audio.
pub struct NullTts;

#[async_trait]
impl TtsPort for NullTts {
    async fn synthesize(&self, _speaker: SpeakerId, _text: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn stop(&self, _speaker: SpeakerId) -> Result<()> {
        Ok(())
    }
}

/// Durable session recording (spec §6 Recorder port; Non-goals: only the
/// event log and recordings persist beyond a session's lifetime).
///
/// One instance is owned per `Session` (spec §3), not shared across
/// sessions, so methods take no session identifier — unlike `SttPort`/
/// `TtsPort`, which are shared adapters referenced by many sessions at once.
#[async_trait]
pub trait RecorderPort: Send + Sync {
    /// Begin a new recording, e.g. opening per-track files under the
    /// episode's subtree.
    async fn start(&self) -> Result<()>;

    /// Append one chunk of raw PCM16 audio to `speaker`'s track.
    async fn write_audio(&self, speaker: SpeakerId, pcm16: &[u8]) -> Result<()>;

    /// Append a finalized caption to the recording's sidecar.
    async fn add_caption(&self, speaker: SpeakerId, text: &str) -> Result<()>;

    /// Finalize the recording, returning the paths of the files written.
    /// File naming and container format are this port's own contract,
    /// opaque to the core (spec §6).
    async fn stop(&self) -> Result<Vec<String>>;
}

/// No-op `RecorderPort` that discards all audio.
pub struct NullRecorder;

#[async_trait]
impl RecorderPort for NullRecorder {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn write_audio(&self, _speaker: SpeakerId, _pcm16: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn add_caption(&self, _speaker: SpeakerId, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Optional briefing lookup (spec §4.5 registration step 3: "optionally
/// load a briefing, informational only; failure is warning-level"). The
/// briefing's content and source are opaque to the core — the actual
/// material comes from the persona-management system, out of scope here —
/// so this port only returns free text, never structured persona data.
#[async_trait]
pub trait BriefingPort: Send + Sync {
    /// Look up the briefing for `episode_id`, if one exists. Callers must
    /// treat both `Ok(None)` and `Err` as "no briefing" and proceed with
    /// session startup regardless.
    async fn load(&self, episode_id: &str) -> Result<Option<String>>;
}

/// No-op `BriefingPort`; every episode starts with no briefing.
pub struct NullBriefing;

#[async_trait]
impl BriefingPort for NullBriefing {
    async fn load(&self, _episode_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// One structured event emitted for the durable event log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEvent {
    pub session_id: String,
    pub timestamp_ms: u64,
    pub kind: String,
    pub detail: serde_json::Value,
}

/// Append-only structured event log, the other surface that outlives a
/// session per spec Non-goals. Like `RecorderPort`, one instance per
/// `Session`.
#[async_trait]
pub trait EventLogPort: Send + Sync {
    /// Open the log for writing (e.g. the file under the episode's subtree).
    async fn start(&self) -> Result<()>;

    /// Append one event.
    async fn log(&self, event: LogEvent) -> Result<()>;

    /// Close the log. Idempotent.
    async fn stop(&self) -> Result<()>;
}

/// No-op `EventLogPort`; events are dropped. Real deployments should prefer
/// a file- or database-backed implementation wired in by `va-server`.
pub struct NullEventLog;

#[async_trait]
impl EventLogPort for NullEventLog {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn log(&self, _event: LogEvent) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_stt_never_produces_results() {
        let stt = NullStt;
        assert!(stt.push_audio(SpeakerId::Human, &[0, 0]).await.unwrap().is_none());
        assert!(stt.flush(SpeakerId::Human).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_briefing_returns_none() {
        let briefing = NullBriefing;
        assert!(briefing.load("ep-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_tts_returns_empty_audio() {
        let tts = NullTts;
        let audio = tts.synthesize(SpeakerId::Host, "hello").await.unwrap();
        assert!(audio.is_empty());
        tts.stop(SpeakerId::Host).await.unwrap();
    }

    #[tokio::test]
    async fn null_recorder_and_log_accept_everything() {
        let recorder = NullRecorder;
        recorder.start().await.unwrap();
        recorder.write_audio(SpeakerId::Human, &[1, 2, 3]).await.unwrap();
        recorder.add_caption(SpeakerId::Human, "hello").await.unwrap();
        assert!(recorder.stop().await.unwrap().is_empty());

        let log = NullEventLog;
        log.start().await.unwrap();
        log.log(LogEvent {
            session_id: "s1".into(),
            timestamp_ms: 0,
            kind: "test".into(),
            detail: serde_json::json!({}),
        })
        .await
        .unwrap();
        log.stop().await.unwrap();
    }
}
