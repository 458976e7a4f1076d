//! The long-lived [`Orchestrator`] (spec §3, §4.5): owns the session map,
//! the shared adapter handles, and the one process-scoped piece of state —
//! the "thinking mode" timer and the shared screen it drives — that spans
//! every session rather than living inside one.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use va_config::Settings;
use va_core::{
    BriefingPort, EventLogPort, OrbState, RecorderPort, SessionId, SharedScreen, SpeakerId,
    SttPort, TtsPort,
};

use crate::event_log::FileEventLog;
use crate::recorder::FileRecorder;
use crate::session::Session;
use crate::transport::{OutboundFrame, ServerMessage};

/// Shared, hot-reloadable settings, following the teacher's
/// `Arc<RwLock<Settings>>` pattern so a config reload doesn't require
/// restarting in-flight sessions.
pub type SharedSettings = Arc<RwLock<Settings>>;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

struct ThinkingState {
    screen: SharedScreen,
    timer: Option<JoinHandle<()>>,
}

impl Default for ThinkingState {
    fn default() -> Self {
        Self {
            screen: SharedScreen::Conversation,
            timer: None,
        }
    }
}

/// Owns every [`Session`], the shared STT/TTS adapter handles, and the
/// process-scoped thinking-mode state (spec §3 "Lifecycle": "Thinking timer
/// is process-scoped... shared by all sessions of the orchestrator").
pub struct Orchestrator {
    sessions: DashMap<SessionId, Arc<Session>>,
    settings: SharedSettings,
    thinking: SyncMutex<ThinkingState>,
    stt: Arc<dyn SttPort>,
    host_tts: Arc<dyn TtsPort>,
    guest_tts: Arc<dyn TtsPort>,
    briefing: Arc<dyn BriefingPort>,
}

impl Orchestrator {
    pub fn new(
        settings: SharedSettings,
        stt: Arc<dyn SttPort>,
        host_tts: Arc<dyn TtsPort>,
        guest_tts: Arc<dyn TtsPort>,
    ) -> Arc<Self> {
        Self::with_briefing(settings, stt, host_tts, guest_tts, Arc::new(va_core::NullBriefing))
    }

    /// Same as [`Orchestrator::new`], but with an explicit [`BriefingPort`]
    /// instead of the no-op default (spec §4.5 registration step 3).
    pub fn with_briefing(
        settings: SharedSettings,
        stt: Arc<dyn SttPort>,
        host_tts: Arc<dyn TtsPort>,
        guest_tts: Arc<dyn TtsPort>,
        briefing: Arc<dyn BriefingPort>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            settings,
            thinking: SyncMutex::new(ThinkingState::default()),
            stt,
            host_tts,
            guest_tts,
            briefing,
        })
    }

    pub fn settings(&self) -> SharedSettings {
        Arc::clone(&self.settings)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    /// `(session_id, episode_id)` for every open session, for the `/api/sessions`
    /// introspection route.
    pub fn session_summaries(&self) -> Vec<(String, String)> {
        self.sessions
            .iter()
            .map(|e| (e.key().0.clone(), e.value().episode_id.clone()))
            .collect()
    }

    /// Creates and registers a new [`Session`], opens its recorder/event
    /// log, and sends it an initial state snapshot (spec §4.5 registration
    /// steps 1-7; TTS handle resolution is represented by the shared
    /// `host_tts`/`guest_tts` handed in at construction).
    pub async fn register(
        self: &Arc<Self>,
        episode_id: String,
        out_tx: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Arc<Session> {
        let id = SessionId::new();
        let settings = self.settings.read().clone();

        let recorder: Arc<dyn RecorderPort> =
            Arc::new(FileRecorder::new(&settings.persistence.recordings_dir, &episode_id));
        let event_log: Arc<dyn EventLogPort> =
            Arc::new(FileEventLog::new(&settings.persistence.event_log_dir, &episode_id));

        let session = Arc::new(Session::new(
            id.clone(),
            episode_id,
            &settings,
            Arc::downgrade(self),
            out_tx,
            Arc::clone(&self.stt),
            Arc::clone(&self.host_tts),
            Arc::clone(&self.guest_tts),
            Arc::clone(&self.briefing),
            recorder,
            event_log,
        ));
        self.sessions.insert(id, Arc::clone(&session));

        // A session joining mid-thinking-mode must see that in its own
        // first snapshot, not a stale `Conversation` (spec §8 "Snapshot
        // completeness").
        let screen = self.thinking.lock().screen.clone();
        if let SharedScreen::Thinking { speaker, .. } = &screen {
            session.apply_orb(*speaker, OrbState::Thinking).await;
            if let Some(other) = speaker.other_agent() {
                session.apply_orb(other, OrbState::Muted).await;
            }
        }
        session.set_shared_screen(screen).await;

        if let Err(err) = session.start().await {
            tracing::error!(%err, "session start failed");
        }
        session
    }

    /// Disconnect sequence (spec §4.5 step 9 / §9 Cancellation): stop the
    /// recorder and event log, then drop the session from the map. Resets
    /// thinking mode if this was the last session.
    pub async fn teardown(self: &Arc<Self>, id: &SessionId) {
        if let Some((_, session)) = self.sessions.remove(id) {
            if let Err(err) = session.teardown().await {
                tracing::warn!(%err, "session teardown failed");
            }
        }
        if self.sessions.is_empty() {
            self.force_exit_thinking();
        }
    }

    /// Bounded shutdown: tears down every session, giving up after
    /// `deadline` (spec §4.5 / §9, `server.shutdown_deadline_ms`). Returns
    /// `false` if the deadline was exceeded with sessions still open, so the
    /// caller can convert that into a non-zero exit code (spec §7).
    pub async fn shutdown(self: &Arc<Self>, deadline: Duration) -> bool {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let result = tokio::time::timeout(deadline, async {
            for id in ids {
                self.teardown(&id).await;
            }
        })
        .await;
        self.force_exit_thinking();
        if result.is_err() {
            tracing::error!("shutdown deadline exceeded with sessions still open");
            false
        } else {
            true
        }
    }

    fn force_exit_thinking(&self) {
        let mut state = self.thinking.lock();
        if let Some(handle) = state.timer.take() {
            handle.abort();
        }
        state.screen = SharedScreen::Conversation;
    }

    /// Enters thinking mode for `speaker`: mutes the conversation floor and
    /// starts a process-wide timer that exits automatically after
    /// `duration_ms` unless re-entered first (spec §4.3/§4.5).
    pub async fn enter_thinking(self: &Arc<Self>, speaker: SpeakerId, duration_ms: u64) {
        metrics::counter!("va_thinking_mode_entered_total").increment(1);
        let started_at_ms = now_ms();
        let ends_at_ms = started_at_ms + duration_ms;

        {
            let mut state = self.thinking.lock();
            if let Some(handle) = state.timer.take() {
                handle.abort();
            }
            state.screen = SharedScreen::Thinking {
                speaker,
                duration_ms,
                started_at_ms,
                ends_at_ms,
            };
        }

        self.broadcast_thinking_enter(speaker, duration_ms, started_at_ms, ends_at_ms).await;

        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            orchestrator.exit_thinking_if_matches(ends_at_ms).await;
        });
        self.thinking.lock().timer = Some(handle);
    }

    async fn exit_thinking_if_matches(self: &Arc<Self>, expected_ends_at_ms: u64) {
        let exited_speaker = {
            let mut state = self.thinking.lock();
            match state.screen {
                SharedScreen::Thinking { speaker, ends_at_ms, .. } if ends_at_ms == expected_ends_at_ms => {
                    state.screen = SharedScreen::Conversation;
                    state.timer = None;
                    Some(speaker)
                }
                _ => None,
            }
        };
        if let Some(speaker) = exited_speaker {
            self.broadcast_thinking_exit(speaker).await;
        }
    }

    async fn broadcast_thinking_enter(
        &self,
        speaker: SpeakerId,
        duration_ms: u64,
        started_at_ms: u64,
        ends_at_ms: u64,
    ) {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let screen = SharedScreen::Thinking { speaker, duration_ms, started_at_ms, ends_at_ms };
        for session in sessions {
            session.apply_orb(speaker, OrbState::Thinking).await;
            if let Some(other) = speaker.other_agent() {
                session.apply_orb(other, OrbState::Muted).await;
            }
            session.set_shared_screen(screen.clone()).await;
            session.push(ServerMessage::ModeThinking {
                speaker,
                duration_ms,
                started_at: started_at_ms,
            });
            session.push(ServerMessage::SharedScreenState { screen: screen.clone() });
        }
    }

    async fn broadcast_thinking_exit(&self, speaker: SpeakerId) {
        let now = now_ms();
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for session in sessions {
            for agent in SpeakerId::AGENTS {
                session.apply_orb(agent, OrbState::Listening).await;
            }
            session.set_shared_screen(SharedScreen::Conversation).await;
            session.push(ServerMessage::ModeNormal { speaker, ended_at: now });
            session.push(ServerMessage::SharedScreenState { screen: SharedScreen::Conversation });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_core::{BriefingPort, NullStt, NullTts};

    struct StubBriefing;

    #[async_trait::async_trait]
    impl BriefingPort for StubBriefing {
        async fn load(&self, _episode_id: &str) -> va_core::Result<Option<String>> {
            Ok(Some("today's rundown".to_string()))
        }
    }

    fn test_orchestrator() -> Arc<Orchestrator> {
        let mut settings = Settings::default();
        let dir = std::env::temp_dir().join(format!("va-orchestrator-test-{}", uuid::Uuid::new_v4()));
        settings.persistence.recordings_dir = dir.join("recordings").to_string_lossy().into_owned();
        settings.persistence.event_log_dir = dir.join("events").to_string_lossy().into_owned();
        Orchestrator::new(
            Arc::new(RwLock::new(settings)),
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
        )
    }

    #[tokio::test]
    async fn register_and_teardown_tracks_session_count() {
        let orchestrator = test_orchestrator();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = orchestrator.register("ep-1".to_string(), tx).await;
        assert_eq!(orchestrator.session_count(), 1);
        orchestrator.teardown(&session.id.clone()).await;
        assert_eq!(orchestrator.session_count(), 0);
    }

    #[tokio::test]
    async fn register_with_a_configured_briefing_still_starts_the_session() {
        let mut settings = Settings::default();
        let dir = std::env::temp_dir().join(format!("va-orchestrator-test-{}", uuid::Uuid::new_v4()));
        settings.persistence.recordings_dir = dir.join("recordings").to_string_lossy().into_owned();
        settings.persistence.event_log_dir = dir.join("events").to_string_lossy().into_owned();
        let orchestrator = Orchestrator::with_briefing(
            Arc::new(RwLock::new(settings)),
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
            Arc::new(StubBriefing),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = orchestrator.register("ep-1".to_string(), tx).await;
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, OutboundFrame::Json(ServerMessage::StateSnapshot { .. })));
    }

    #[tokio::test]
    async fn enter_thinking_broadcasts_to_all_sessions() {
        let orchestrator = test_orchestrator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = orchestrator.register("ep-1".to_string(), tx).await;
        // drain the initial state snapshot
        let _ = rx.recv().await;

        orchestrator.enter_thinking(SpeakerId::Host, 50).await;
        let mut saw_thinking_mode = false;
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(20), rx.recv()).await
        {
            if matches!(frame, OutboundFrame::Json(ServerMessage::ModeThinking { .. })) {
                saw_thinking_mode = true;
            }
        }
        assert!(saw_thinking_mode);
    }
}
