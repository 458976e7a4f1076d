//! Shared data model (spec §3): speakers, orb presentation state, captions,
//! and the shared-screen value.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The closed set of conversation participants.
///
/// `Host` and `Guest` are "agents"; `Human` is the sole non-agent party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerId {
    Human,
    Host,
    Guest,
}

impl SpeakerId {
    pub const AGENTS: [SpeakerId; 2] = [SpeakerId::Host, SpeakerId::Guest];

    pub fn is_agent(self) -> bool {
        matches!(self, SpeakerId::Host | SpeakerId::Guest)
    }

    pub fn other_agent(self) -> Option<SpeakerId> {
        match self {
            SpeakerId::Host => Some(SpeakerId::Guest),
            SpeakerId::Guest => Some(SpeakerId::Host),
            SpeakerId::Human => None,
        }
    }
}

/// Per-speaker presentation state surfaced to the client UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrbState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Muted,
    Error,
}

/// Opaque session identifier, unique for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finalized transcript caption, produced on a final STT result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caption {
    pub id: u64,
    pub speaker: SpeakerId,
    pub text: String,
    pub timestamp_ms: u64,
}

/// Bounded caption history: the orchestrator keeps the most recent 20,
/// snapshots expose the most recent 6 (spec §3).
pub struct CaptionHistory {
    history: VecDeque<Caption>,
    next_id: u64,
}

impl CaptionHistory {
    pub const MAX_KEPT: usize = 20;
    pub const SNAPSHOT_SIZE: usize = 6;

    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(Self::MAX_KEPT),
            next_id: 1,
        }
    }

    /// Record a new caption, returning the constructed value (with its
    /// assigned id) so the caller can broadcast it.
    pub fn push(&mut self, speaker: SpeakerId, text: String, timestamp_ms: u64) -> Caption {
        let caption = Caption {
            id: self.next_id,
            speaker,
            text,
            timestamp_ms,
        };
        self.next_id += 1;
        self.history.push_front(caption.clone());
        while self.history.len() > Self::MAX_KEPT {
            self.history.pop_back();
        }
        caption
    }

    /// Most recent captions, newest first, capped to the snapshot size.
    pub fn snapshot(&self) -> Vec<Caption> {
        self.history.iter().take(Self::SNAPSHOT_SIZE).cloned().collect()
    }
}

impl Default for CaptionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// The single, process-scoped presentation mode (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharedScreen {
    Conversation,
    Thinking {
        speaker: SpeakerId,
        duration_ms: u64,
        started_at_ms: u64,
        ends_at_ms: u64,
    },
}

impl Default for SharedScreen {
    fn default() -> Self {
        SharedScreen::Conversation
    }
}
