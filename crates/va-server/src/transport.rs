//! Wire types for the client/server transport (spec §6).
//!
//! `audio.chunk` carries raw PCM16 bytes over a binary WebSocket frame and
//! has no JSON representation here; everything else is a JSON text frame
//! tagged by `type`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use va_core::{Caption, OrbState, SharedScreen, SpeakerId};

/// Client → Server JSON control messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello {
        #[serde(rename = "episodeId", default)]
        episode_id: Option<String>,
        #[serde(rename = "participantName", default)]
        participant_name: Option<String>,
    },

    #[serde(rename = "client.toggle-autopilot")]
    ToggleAutopilot { enabled: bool },

    #[serde(rename = "client.request-state")]
    RequestState,
}

/// `state.snapshot` payload: enough for a client that missed every delta to
/// reconstruct the presentation state exactly (spec §8 "snapshot
/// completeness").
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    #[serde(rename = "orbStates")]
    pub orb_states: HashMap<SpeakerId, OrbState>,
    pub captions: Vec<Caption>,
    pub autopilot: bool,
    #[serde(rename = "sharedScreen")]
    pub shared_screen: SharedScreen,
}

/// Server → Client JSON messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "orb.state")]
    OrbState { speaker: SpeakerId, state: OrbState },

    #[serde(rename = "caption")]
    Caption {
        id: u64,
        speaker: SpeakerId,
        text: String,
        timestamp: u64,
    },

    #[serde(rename = "mode.thinking")]
    ModeThinking {
        speaker: SpeakerId,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "startedAt")]
        started_at: u64,
    },

    #[serde(rename = "mode.normal")]
    ModeNormal {
        speaker: SpeakerId,
        #[serde(rename = "endedAt")]
        ended_at: u64,
    },

    #[serde(rename = "shared-screen.state")]
    SharedScreenState {
        #[serde(flatten)]
        screen: SharedScreen,
    },

    #[serde(rename = "recording.ready")]
    RecordingReady {
        #[serde(rename = "episodeId")]
        episode_id: String,
        files: Vec<String>,
    },

    #[serde(rename = "server.ack")]
    ServerAck { message: String },

    #[serde(rename = "state.snapshot")]
    StateSnapshot {
        #[serde(flatten)]
        snapshot: StateSnapshot,
    },
}

impl ServerMessage {
    pub fn ack(message: impl Into<String>) -> Self {
        ServerMessage::ServerAck { message: message.into() }
    }
}

/// One speaker-tagged byte, prefixed to outbound binary audio frames so the
/// client can demultiplex host/guest playback without a JSON envelope
/// (spec §4.5 step 4: TTS audio is "forwarded to the client for playback").
/// Human audio never flows server → client, so only the two agents are
/// represented here.
fn audio_frame_tag(speaker: SpeakerId) -> u8 {
    match speaker {
        SpeakerId::Host => 0,
        SpeakerId::Guest => 1,
        SpeakerId::Human => unreachable!("human audio is never forwarded outbound"),
    }
}

/// Encode one chunk of already-processed PCM16 audio as a binary WebSocket
/// frame: a single speaker tag byte followed by the raw little-endian
/// samples.
pub fn encode_audio_frame(speaker: SpeakerId, pcm16: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pcm16.len() + 1);
    frame.push(audio_frame_tag(speaker));
    frame.extend_from_slice(pcm16);
    frame
}

/// Everything a session can push out over the transport: JSON control
/// messages and raw binary audio frames share one ordered outbound queue so
/// caption/orb updates never reorder relative to the audio they describe.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Json(ServerMessage),
    Audio { speaker: SpeakerId, pcm16: Vec<u8> },
}

impl From<ServerMessage> for OutboundFrame {
    fn from(msg: ServerMessage) -> Self {
        OutboundFrame::Json(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_deserializes_with_optional_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"hello","episodeId":"ep-1"}"#).unwrap();
        match msg {
            ClientMessage::Hello { episode_id, participant_name } => {
                assert_eq!(episode_id.as_deref(), Some("ep-1"));
                assert!(participant_name.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn toggle_autopilot_roundtrips() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"client.toggle-autopilot","enabled":true}"#).unwrap();
        assert!(matches!(msg, ClientMessage::ToggleAutopilot { enabled: true }));
    }

    #[test]
    fn server_ack_serializes_with_type_tag() {
        let msg = ServerMessage::ack("connected");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "server.ack");
        assert_eq!(json["message"], "connected");
    }

    #[test]
    fn shared_screen_state_flattens_tag() {
        let msg = ServerMessage::SharedScreenState { screen: SharedScreen::Conversation };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "shared-screen.state");
        assert_eq!(json["kind"], "conversation");
    }

    #[test]
    fn audio_frame_tags_host_and_guest_distinctly() {
        let host = encode_audio_frame(SpeakerId::Host, &[1, 2]);
        let guest = encode_audio_frame(SpeakerId::Guest, &[1, 2]);
        assert_eq!(host[0], 0);
        assert_eq!(guest[0], 1);
        assert_eq!(&host[1..], &[1, 2]);
    }
}
