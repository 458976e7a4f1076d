//! The per-connection [`Session`] (spec §3, §4.5): owns one VAD, one command
//! router, one audio processor bank, one barge-in manager, and the adapter
//! handles for a single human/host/guest conversation, and drives them
//! through the order spec §5 requires (VAD → barge-in → orb update before
//! the next frame is admitted).

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use va_config::Settings;
use va_core::{
    BriefingPort, CaptionHistory, EventLogPort, LogEvent, OrbState, RecorderPort,
    Result as CoreResult, SessionId, SharedScreen, SpeakerId, SttPort, TtsPort,
};
use va_pipeline::{
    AudioProcessorBank, BargeInDirective, BargeInManager, CommandRouter, RouteDecision,
    RouterAction, Vad, VadEvent,
};

use crate::orchestrator::Orchestrator;
use crate::transport::{ClientMessage, OutboundFrame, ServerMessage, StateSnapshot};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Mutable per-session state, serialized behind one lock so the VAD →
/// barge-in → orb pipeline never interleaves across concurrent callers
/// (spec §5 suspension-point ordering).
struct SessionInner {
    vad: Vad,
    router: CommandRouter,
    audio: AudioProcessorBank,
    barge_in: BargeInManager,
    orb_states: std::collections::HashMap<SpeakerId, OrbState>,
    human_speaking: bool,
    ducking_active: bool,
    active_agents: HashSet<SpeakerId>,
    captions: CaptionHistory,
    autopilot: bool,
    pending_targets: Option<Vec<SpeakerId>>,
    grace_timer: Option<JoinHandle<()>>,
    /// Agent orb states captured the instant the human starts speaking
    /// (spec §3 `Session.orb_restore`), so a brief utterance during
    /// thinking mode doesn't stomp the `Thinking`/`Muted` presentation with
    /// `Listening` once the human stops. Restored verbatim at speech-end for
    /// any agent nothing else touched in the meantime; an agent a barge-in
    /// actually interrupted is left at spec's documented default instead.
    orb_restore: Option<std::collections::HashMap<SpeakerId, OrbState>>,
    /// Mirrors the orchestrator's process-scoped shared-screen value (spec
    /// §3) so a `state.snapshot` built from purely local state still
    /// reconstructs it exactly (spec §8 "Snapshot completeness"), without
    /// this session needing to reach back into the orchestrator to read it.
    shared_screen: SharedScreen,
}

impl SessionInner {
    fn set_orb(&mut self, speaker: SpeakerId, state: OrbState) -> Option<ServerMessage> {
        let changed = self.orb_states.get(&speaker) != Some(&state);
        self.orb_states.insert(speaker, state);
        changed.then_some(ServerMessage::OrbState { speaker, state })
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            orb_states: self.orb_states.clone(),
            captions: self.captions.snapshot(),
            autopilot: self.autopilot,
            shared_screen: self.shared_screen.clone(),
        }
    }
}

/// One client connection's worth of conversation state (spec §3 `Session`).
pub struct Session {
    pub id: SessionId,
    pub episode_id: String,
    orchestrator: Weak<Orchestrator>,
    out_tx: mpsc::UnboundedSender<OutboundFrame>,
    inner: tokio::sync::Mutex<SessionInner>,
    stt: Arc<dyn SttPort>,
    host_tts: Arc<dyn TtsPort>,
    guest_tts: Arc<dyn TtsPort>,
    briefing: Arc<dyn BriefingPort>,
    recorder: Arc<dyn RecorderPort>,
    event_log: Arc<dyn EventLogPort>,
    frame_bytes: usize,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        episode_id: String,
        settings: &Settings,
        orchestrator: Weak<Orchestrator>,
        out_tx: mpsc::UnboundedSender<OutboundFrame>,
        stt: Arc<dyn SttPort>,
        host_tts: Arc<dyn TtsPort>,
        guest_tts: Arc<dyn TtsPort>,
        briefing: Arc<dyn BriefingPort>,
        recorder: Arc<dyn RecorderPort>,
        event_log: Arc<dyn EventLogPort>,
    ) -> Self {
        let vad = Vad::new(settings.vad.to_pipeline_config());
        let audio = AudioProcessorBank::new(
            settings
                .ducking
                .to_pipeline_config(settings.vad.sample_rate_hz),
        );
        let barge_in = BargeInManager::new(settings.barge_in.to_pipeline_config());
        let frame_bytes =
            va_core::audio::frame_samples(settings.vad.sample_rate_hz, settings.vad.frame_ms) * 2;

        let mut orb_states = std::collections::HashMap::new();
        orb_states.insert(SpeakerId::Human, OrbState::Listening);
        orb_states.insert(SpeakerId::Host, OrbState::Listening);
        orb_states.insert(SpeakerId::Guest, OrbState::Listening);

        Self {
            id,
            episode_id,
            orchestrator,
            out_tx,
            inner: tokio::sync::Mutex::new(SessionInner {
                vad,
                router: CommandRouter::new(),
                audio,
                barge_in,
                orb_states,
                human_speaking: false,
                ducking_active: false,
                active_agents: HashSet::new(),
                captions: CaptionHistory::new(),
                autopilot: true,
                pending_targets: None,
                grace_timer: None,
                orb_restore: None,
                shared_screen: SharedScreen::Conversation,
            }),
            stt,
            host_tts,
            guest_tts,
            briefing,
            recorder,
            event_log,
            frame_bytes,
        }
    }

    fn send(&self, msg: impl Into<OutboundFrame>) {
        let _ = self.out_tx.send(msg.into());
    }

    async fn log(&self, kind: &str, detail: serde_json::Value) {
        let _ = self
            .event_log
            .log(LogEvent {
                session_id: self.id.0.clone(),
                timestamp_ms: now_ms(),
                kind: kind.to_string(),
                detail,
            })
            .await;
    }

    fn tts_for(&self, speaker: SpeakerId) -> Option<&Arc<dyn TtsPort>> {
        match speaker {
            SpeakerId::Host => Some(&self.host_tts),
            SpeakerId::Guest => Some(&self.guest_tts),
            SpeakerId::Human => None,
        }
    }

    /// Opens the recorder/event log, optionally loads a briefing, and sends
    /// an initial state snapshot (spec §4.5 registration steps 1-3, 9).
    pub async fn start(&self) -> CoreResult<()> {
        self.recorder.start().await?;
        self.event_log.start().await?;
        self.log("session.start", serde_json::json!({ "episodeId": self.episode_id })).await;

        // Briefing is informational only; a missing or failed lookup never
        // blocks session startup (spec §4.5 step 3).
        match self.briefing.load(&self.episode_id).await {
            Ok(Some(_briefing)) => {
                self.log("briefing.loaded", serde_json::json!({ "episodeId": self.episode_id }))
                    .await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%err, episode_id = %self.episode_id, "briefing load failed");
            }
        }

        let snapshot = self.inner.lock().await.snapshot();
        self.send(ServerMessage::StateSnapshot { snapshot });
        Ok(())
    }

    /// Closes adapters and returns the recorded file paths (spec §4.5
    /// teardown step).
    pub async fn teardown(&self) -> CoreResult<Vec<String>> {
        if let Some(handle) = self.inner.lock().await.grace_timer.take() {
            handle.abort();
        }
        let files = self.recorder.stop().await?;
        self.send(ServerMessage::RecordingReady {
            episode_id: self.episode_id.clone(),
            files: files.clone(),
        });
        self.log(
            "session.end",
            serde_json::json!({ "episodeId": self.episode_id, "files": files }),
        )
        .await;
        self.event_log.stop().await?;
        Ok(files)
    }

    pub async fn handle_client_message(&self, msg: ClientMessage) {
        match msg {
            ClientMessage::Hello { .. } => {
                self.send(ServerMessage::ack("connected"));
            }
            ClientMessage::ToggleAutopilot { enabled } => {
                self.inner.lock().await.autopilot = enabled;
                self.log("autopilot.toggled", serde_json::json!({ "enabled": enabled })).await;
                self.send(ServerMessage::ack(if enabled { "autopilot-on" } else { "autopilot-off" }));
            }
            ClientMessage::RequestState => {
                let snapshot = self.inner.lock().await.snapshot();
                self.send(ServerMessage::StateSnapshot { snapshot });
            }
        }
    }

    /// Ingests one frame of human PCM16 audio: STT, VAD, and the resulting
    /// barge-in/orb side effects, in that order (spec §5).
    pub async fn handle_human_audio(self: &Arc<Self>, pcm16: &[u8]) -> CoreResult<()> {
        let _ = self.recorder.write_audio(SpeakerId::Human, pcm16).await;

        let stt_result = self.stt.push_audio(SpeakerId::Human, pcm16).await?;

        let mut inner = self.inner.lock().await;
        let vad_event = inner.vad.process_frame(pcm16);
        drop(inner);

        if let Some(event) = vad_event {
            self.on_human_vad_event(event).await;
        }

        if let Some(result) = stt_result {
            if result.is_final {
                self.on_transcript(result.text).await;
            }
        }
        Ok(())
    }

    async fn on_human_vad_event(self: &Arc<Self>, event: VadEvent) {
        let now = now_ms();
        let directives = {
            let mut inner = self.inner.lock().await;
            match event {
                VadEvent::SpeechStart { confidence } => {
                    metrics::counter!("va_vad_speech_start_total").increment(1);
                    inner.human_speaking = true;
                    let restore: std::collections::HashMap<SpeakerId, OrbState> = SpeakerId::AGENTS
                        .iter()
                        .map(|&a| (a, inner.orb_states.get(&a).copied().unwrap_or(OrbState::Listening)))
                        .collect();
                    inner.orb_restore = Some(restore);
                    if let Some(msg) = inner.set_orb(SpeakerId::Human, OrbState::Speaking) {
                        self.send(msg);
                    }
                    inner.barge_in.on_speech_start(SpeakerId::Human, confidence, now)
                }
                VadEvent::SpeechEnd { confidence } => {
                    metrics::counter!("va_vad_speech_end_total").increment(1);
                    inner.human_speaking = false;
                    if let Some(msg) = inner.set_orb(SpeakerId::Human, OrbState::Listening) {
                        self.send(msg);
                    }
                    let directives = inner.barge_in.on_speech_end(SpeakerId::Human, confidence, now);
                    let restore = inner.orb_restore.take().unwrap_or_default();
                    for agent in SpeakerId::AGENTS {
                        if inner.active_agents.contains(&agent) {
                            continue;
                        }
                        let before = restore.get(&agent).copied().unwrap_or(OrbState::Listening);
                        let target = if inner.orb_states.get(&agent) == Some(&before) {
                            before
                        } else {
                            // A barge-in interrupted this agent mid-utterance;
                            // spec's documented fallback applies rather than
                            // replaying its pre-speech state.
                            OrbState::Listening
                        };
                        if let Some(msg) = inner.set_orb(agent, target) {
                            self.send(msg);
                        }
                    }
                    directives
                }
            }
        };
        self.apply_barge_in_directives(directives).await;
    }

    async fn on_transcript(self: &Arc<Self>, text: String) {
        let now = now_ms();
        let caption = {
            let mut inner = self.inner.lock().await;
            inner.captions.push(SpeakerId::Human, text.clone(), now)
        };
        self.send(ServerMessage::Caption {
            id: caption.id,
            speaker: caption.speaker,
            text: caption.text.clone(),
            timestamp: caption.timestamp_ms,
        });
        let _ = self.recorder.add_caption(SpeakerId::Human, &text).await;
        self.log("transcript", serde_json::json!({ "text": text })).await;

        let decision = self.inner.lock().await.router.route(&text, now);
        if let Some(decision) = decision {
            self.apply_command(decision).await;
        }
    }

    async fn apply_command(self: &Arc<Self>, decision: RouteDecision) {
        self.log(
            "command.routed",
            serde_json::json!({
                "action": format!("{:?}", decision.action),
                "targets": decision.targets,
                "confidence": decision.confidence,
                "fuzzyMatched": decision.fuzzy_matched,
            }),
        )
        .await;

        match decision.action {
            RouterAction::Thinking => {
                let speaker = decision.targets.first().copied().unwrap_or(SpeakerId::Host);
                let duration_ms = decision.duration_ms.unwrap_or(30_000);
                self.inner.lock().await.pending_targets = None;
                if let Some(orchestrator) = self.orchestrator.upgrade() {
                    orchestrator.enter_thinking(speaker, duration_ms).await;
                }
            }
            RouterAction::Address => {
                self.inner.lock().await.pending_targets = Some(decision.targets.clone());
                self.send(ServerMessage::ack(format!("addressed: {:?}", decision.targets)));
            }
            RouterAction::Broadcast => {
                self.inner.lock().await.pending_targets = None;
            }
            RouterAction::BargeInControl => {
                self.inner.lock().await.pending_targets = None;
                self.stop_all_agents().await;
            }
            RouterAction::DuckingControl => {
                self.inner.lock().await.pending_targets = None;
                let mut inner = self.inner.lock().await;
                inner.audio.start_ducking(&SpeakerId::AGENTS, false);
                inner.ducking_active = true;
            }
        }
    }

    async fn stop_all_agents(&self) {
        let active: Vec<SpeakerId> = self.inner.lock().await.active_agents.iter().copied().collect();
        for agent in active {
            if let Some(tts) = self.tts_for(agent) {
                let _ = tts.stop(agent).await;
            }
            let mut inner = self.inner.lock().await;
            inner.active_agents.remove(&agent);
            if let Some(msg) = inner.set_orb(agent, OrbState::Muted) {
                drop(inner);
                self.send(msg);
            }
        }
        self.log("barge_in.control.stop_all", serde_json::json!({})).await;
    }

    async fn apply_barge_in_directives(self: &Arc<Self>, directives: Vec<BargeInDirective>) {
        for directive in directives {
            match directive {
                BargeInDirective::Ducking { targets, on } => {
                    let mut inner = self.inner.lock().await;
                    if on {
                        inner.audio.start_ducking(&targets, false);
                    } else {
                        inner.audio.stop_ducking(&targets, false);
                    }
                    inner.ducking_active = on;
                }
                BargeInDirective::ScheduleTimer { deadline_ms } => {
                    self.schedule_grace_timer(deadline_ms).await;
                }
                BargeInDirective::CancelTimer => {
                    if let Some(handle) = self.inner.lock().await.grace_timer.take() {
                        handle.abort();
                    }
                }
                BargeInDirective::BargeInStarted(event) => {
                    metrics::counter!("va_barge_in_started_total").increment(1);
                    if event.ducking_applied {
                        let mut inner = self.inner.lock().await;
                        inner.audio.start_ducking(&event.interrupted, true);
                    }
                    for &target in &event.interrupted {
                        if let Some(tts) = self.tts_for(target) {
                            let _ = tts.stop(target).await;
                        }
                        let mut inner = self.inner.lock().await;
                        inner.active_agents.remove(&target);
                        if let Some(msg) = inner.set_orb(target, OrbState::Muted) {
                            drop(inner);
                            self.send(msg);
                        }
                    }
                    self.log(
                        "barge_in.start",
                        serde_json::json!({
                            "interrupter": event.interrupter,
                            "interrupted": event.interrupted,
                            "gracePeriodUsed": event.grace_period_used,
                        }),
                    )
                    .await;
                }
                BargeInDirective::BargeInCompleted(event) => {
                    self.log(
                        "barge_in.complete",
                        serde_json::json!({
                            "interrupter": event.interrupter,
                            "interrupted": event.interrupted,
                        }),
                    )
                    .await;
                }
                BargeInDirective::BargeInCancelled(event) => {
                    self.log(
                        "barge_in.cancelled",
                        serde_json::json!({ "interrupter": event.interrupter }),
                    )
                    .await;
                }
            }
        }
    }

    async fn schedule_grace_timer(self: &Arc<Self>, deadline_ms: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.grace_timer.take() {
            handle.abort();
        }
        let delay_ms = deadline_ms.saturating_sub(now_ms());
        let session = Arc::clone(self);
        inner.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            session.expire_grace_timer().await;
        }));
    }

    async fn expire_grace_timer(self: &Arc<Self>) {
        let directives = self.inner.lock().await.barge_in.expire_pending(now_ms());
        self.apply_barge_in_directives(directives).await;
    }

    /// An agent speaks `text`: synthesizes once via the adapter, then
    /// streams the result frame-by-frame through its gain channel, the
    /// recorder, and the transport (spec §4.5 step 4; §7 "TTS chunk").
    pub async fn speak(self: &Arc<Self>, speaker: SpeakerId, text: &str) -> CoreResult<()> {
        let Some(tts) = self.tts_for(speaker) else {
            return Ok(());
        };
        let audio = match tts.synthesize(speaker, text).await {
            Ok(audio) => audio,
            Err(err) => {
                self.on_tts_error(speaker, &err.to_string()).await;
                return Err(err);
            }
        };

        self.on_tts_start(speaker).await;
        for chunk in audio.chunks(self.frame_bytes.max(2)) {
            let processed = self.inner.lock().await.audio.process(speaker, chunk);
            let _ = self.recorder.write_audio(speaker, &processed).await;
            self.log("tts.chunk", serde_json::json!({ "speaker": speaker, "bytes": processed.len() })).await;
            self.send(OutboundFrame::Audio { speaker, pcm16: processed });
        }
        self.on_tts_complete(speaker).await;
        Ok(())
    }

    async fn on_tts_start(self: &Arc<Self>, speaker: SpeakerId) {
        let now = now_ms();
        let directives = {
            let mut inner = self.inner.lock().await;
            inner.active_agents.insert(speaker);
            if let Some(msg) = inner.set_orb(speaker, OrbState::Speaking) {
                drop(inner);
                self.send(msg);
                inner = self.inner.lock().await;
            }
            inner.barge_in.on_speech_start(speaker, 0.9, now)
        };
        self.log("tts.start", serde_json::json!({ "speaker": speaker })).await;
        self.apply_barge_in_directives(directives).await;
    }

    async fn on_tts_complete(self: &Arc<Self>, speaker: SpeakerId) {
        let now = now_ms();
        let (directives, human_speaking) = {
            let mut inner = self.inner.lock().await;
            inner.active_agents.remove(&speaker);
            let directives = inner.barge_in.on_speech_end(speaker, 0.9, now);
            (directives, inner.human_speaking)
        };
        if !human_speaking {
            let mut inner = self.inner.lock().await;
            if let Some(msg) = inner.set_orb(speaker, OrbState::Listening) {
                drop(inner);
                self.send(msg);
            }
        }
        self.log("tts.complete", serde_json::json!({ "speaker": speaker })).await;
        self.apply_barge_in_directives(directives).await;
    }

    async fn on_tts_error(self: &Arc<Self>, speaker: SpeakerId, error: &str) {
        self.log("tts.error", serde_json::json!({ "speaker": speaker, "error": error })).await;
        self.send(ServerMessage::ack(format!("tts error for {speaker:?}: {error}")));
        self.on_tts_complete(speaker).await;
    }

    /// Applies an orb transition decided elsewhere (the orchestrator's
    /// process-scoped thinking mode) to this session and notifies the
    /// client if it actually changed.
    pub async fn apply_orb(&self, speaker: SpeakerId, state: OrbState) {
        let mut inner = self.inner.lock().await;
        if let Some(msg) = inner.set_orb(speaker, state) {
            drop(inner);
            self.send(msg);
        }
    }

    /// Pushes a message the orchestrator composed on this session's behalf
    /// (e.g. a thinking-mode broadcast).
    pub fn push(&self, msg: ServerMessage) {
        self.send(msg);
    }

    /// Mirrors the orchestrator's current shared-screen value into this
    /// session's own snapshot state, so `state.snapshot` stays accurate
    /// without this session having to read the orchestrator back out.
    pub async fn set_shared_screen(&self, screen: SharedScreen) {
        self.inner.lock().await.shared_screen = screen;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_core::{NullBriefing, NullEventLog, NullRecorder, NullStt, NullTts};

    fn test_settings() -> Settings {
        Settings::default()
    }

    fn make_session() -> Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Session::new(
            SessionId::new(),
            "ep-test".to_string(),
            &test_settings(),
            Weak::new(),
            tx,
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
            Arc::new(NullBriefing),
            Arc::new(NullRecorder),
            Arc::new(NullEventLog),
        ))
    }

    #[tokio::test]
    async fn start_sends_initial_snapshot() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            SessionId::new(),
            "ep-test".to_string(),
            &test_settings(),
            Weak::new(),
            tx,
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
            Arc::new(NullBriefing),
            Arc::new(NullRecorder),
            Arc::new(NullEventLog),
        ));
        session.start().await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, OutboundFrame::Json(ServerMessage::StateSnapshot { .. })));
    }

    #[tokio::test]
    async fn speak_with_null_tts_completes_without_audio() {
        let session = make_session();
        session.speak(SpeakerId::Host, "hello there").await.unwrap();
        let inner = session.inner.lock().await;
        assert!(!inner.active_agents.contains(&SpeakerId::Host));
    }

    #[tokio::test]
    async fn toggle_autopilot_updates_state() {
        let session = make_session();
        session.handle_client_message(ClientMessage::ToggleAutopilot { enabled: false }).await;
        assert!(!session.inner.lock().await.autopilot);
    }

    #[tokio::test]
    async fn human_speech_does_not_clobber_thinking_orb() {
        let session = make_session();
        session.apply_orb(SpeakerId::Host, OrbState::Thinking).await;

        session.on_human_vad_event(VadEvent::SpeechStart { confidence: 0.9 }).await;
        session.on_human_vad_event(VadEvent::SpeechEnd { confidence: 0.9 }).await;

        let inner = session.inner.lock().await;
        assert_eq!(inner.orb_states.get(&SpeakerId::Host), Some(&OrbState::Thinking));
    }

    #[tokio::test]
    async fn human_speech_falls_back_to_listening_when_orb_changed_mid_utterance() {
        let session = make_session();
        session.apply_orb(SpeakerId::Guest, OrbState::Thinking).await;

        session.on_human_vad_event(VadEvent::SpeechStart { confidence: 0.9 }).await;
        // Something other than this utterance (e.g. a completed barge-in)
        // moved the orb away from what was snapshotted at speech-start.
        session.apply_orb(SpeakerId::Guest, OrbState::Muted).await;
        session.on_human_vad_event(VadEvent::SpeechEnd { confidence: 0.9 }).await;

        let inner = session.inner.lock().await;
        assert_eq!(inner.orb_states.get(&SpeakerId::Guest), Some(&OrbState::Listening));
    }
}
