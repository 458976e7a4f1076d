//! Data model, error types, and external adapter ports shared across the
//! voice session orchestrator crates.

pub mod audio;
pub mod error;
pub mod model;
pub mod ports;

pub use error::{CoreError, Result};
pub use model::{Caption, CaptionHistory, OrbState, SessionId, SharedScreen, SpeakerId};
pub use ports::{
    BriefingPort, EventLogPort, LogEvent, NullBriefing, NullEventLog, NullRecorder, NullStt,
    NullTts, RecorderPort, SttPort, SttResult, TtsPort,
};
