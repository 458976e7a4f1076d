//! Configuration loading for the voice session orchestrator.
//!
//! Supports loading from:
//! - YAML/TOML files (`config/base.yaml`, `config/{environment}.yaml`)
//! - Environment variables (`VOICE_AGENT_` prefix, double-underscore nesting)
//!
//! Scoped to what the core orchestrator and its ambient stack actually use:
//! server bind address, CORS, rate limiting, bearer auth, the tuning knobs
//! for the VAD/audio-processor/barge-in/router, and the recording/event-log
//! directories. Persona selection, API-key storage for STT/TTS/LLM vendors,
//! and business/domain configuration are out of scope per spec §1 — those
//! are narrow external collaborators, not this crate's concern.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AuthConfig, BargeInSettings, CommandRouterSettings, DuckingSettings,
    ObservabilityConfig, PersistenceSettings, RateLimitConfig, RuntimeEnvironment, ServerConfig,
    Settings, VadSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
