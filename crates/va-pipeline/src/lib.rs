//! Real-time audio-control engine: voice activity detection, audio
//! ducking, command routing, and barge-in mediation.
//!
//! Every component here is pure/synchronous computation — no I/O, no
//! suspension points (spec §5). The orchestrator in `va-server` drives
//! these components and performs the I/O (transport, adapters, timers).

pub mod audio_processor;
pub mod barge_in;
pub mod command_router;
pub mod vad;

pub use audio_processor::{AudioProcessor, AudioProcessorBank, AudioProcessorConfig, ChannelStatus, DuckingProfile, RampCurve};
pub use barge_in::{BargeInConfig, BargeInDirective, BargeInEvent, BargeInEventKind, BargeInManager, BargeInMode, BargeInStats, Priority};
pub use command_router::{CommandContext, CommandRouter, RouteDecision, RouterAction};
pub use vad::{Vad, VadConfig, VadEvent};
