//! Main settings module.
//!
//! Layered load, following the teacher's pattern: a base YAML file, an
//! environment-specific overlay, then `VOICE_AGENT_`-prefixed environment
//! variables (double-underscore nesting, e.g. `VOICE_AGENT__SERVER__PORT`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::audio;
use crate::ConfigError;
use va_pipeline::{BargeInMode, DuckingProfile, RampCurve};

/// Runtime environment, controlling validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub vad: VadSettings,

    #[serde(default)]
    pub ducking: DuckingSettings,

    #[serde(default)]
    pub barge_in: BargeInSettings,

    #[serde(default)]
    pub router: CommandRouterSettings,

    #[serde(default)]
    pub thinking: ThinkingSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_vad()?;
        self.validate_ducking()?;
        self.validate_barge_in()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".into(),
                message: "port cannot be 0".into(),
            });
        }
        if server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".into(),
                message: "must be at least 1".into(),
            });
        }
        if server.rate_limit.enabled && server.rate_limit.audio_bytes_per_second == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.rate_limit.audio_bytes_per_second".into(),
                message: "must be at least 1 when rate limiting is enabled".into(),
            });
        }
        if self.environment.is_production() && server.auth.enabled && server.auth.api_key.is_none()
        {
            return Err(ConfigError::InvalidValue {
                field: "server.auth.api_key".into(),
                message: "API key must be set when auth is enabled in production".into(),
            });
        }
        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production with no configured origins; \
                 this may block legitimate requests"
            );
        }
        Ok(())
    }

    /// Validates the invariant spec §3 requires of the VAD's own state
    /// (`speech_threshold > release_threshold` is derived at runtime from
    /// `noise_floor`, but the *tunables* that feed it must stay sane).
    fn validate_vad(&self) -> Result<(), ConfigError> {
        let vad = &self.vad;
        if !(0.0001..=0.1).contains(&vad.initial_noise_floor) {
            return Err(ConfigError::InvalidValue {
                field: "vad.initial_noise_floor".into(),
                message: "must be within [0.0001, 0.1]".into(),
            });
        }
        if vad.sample_rate_hz == 0 || vad.frame_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.sample_rate_hz / vad.frame_ms".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    fn validate_ducking(&self) -> Result<(), ConfigError> {
        if let DuckingProfileSetting::Custom(db) = self.ducking.profile {
            if !(-60.0..=0.0).contains(&db) {
                return Err(ConfigError::InvalidValue {
                    field: "ducking.profile".into(),
                    message: "custom reduction_db should be within [-60, 0]".into(),
                });
            }
        }
        Ok(())
    }

    fn validate_barge_in(&self) -> Result<(), ConfigError> {
        if self.barge_in.sentence_completion_max_ms < self.barge_in.grace_period_ms {
            return Err(ConfigError::InvalidValue {
                field: "barge_in.sentence_completion_max_ms".into(),
                message: "must be at least grace_period_ms".into(),
            });
        }
        Ok(())
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws/:session_id".to_string()
}
fn default_max_connections() -> usize {
    1000
}
fn default_shutdown_deadline_ms() -> u64 {
    crate::constants::timeouts::SHUTDOWN_DEADLINE_MS
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Bearer-token auth middleware config (spec §1: HTTP security middleware
/// is an external collaborator; off by default in development).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string(), "/ready".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            public_paths: default_public_paths(),
        }
    }
}

/// Per-connection rate limiting for inbound audio/control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    #[serde(default = "default_audio_bytes_per_second")]
    pub audio_bytes_per_second: u32,

    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,
}

fn default_messages_per_second() -> u32 {
    100
}
fn default_audio_bytes_per_second() -> u32 {
    // 48kHz * 2 bytes/sample, plus headroom for the client's two TTS streams
    // it is not itself rate limited on but whose acks share the channel.
    200_000
}
fn default_burst_multiplier() -> f32 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: default_messages_per_second(),
            audio_bytes_per_second: default_audio_bytes_per_second(),
            burst_multiplier: default_burst_multiplier(),
        }
    }
}

/// VAD tunables (spec §4.1). Mirrors `va_pipeline::VadConfig` field-for-field
/// so `Settings` is the single place an operator edits these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    #[serde(default = "default_true")]
    pub adaptive_noise_floor: bool,

    #[serde(default = "default_noise_floor_alpha")]
    pub noise_floor_alpha: f32,

    #[serde(default = "default_initial_noise_floor")]
    pub initial_noise_floor: f32,

    #[serde(default = "default_true")]
    pub confidence_gating: bool,

    #[serde(default)]
    pub spectral_confidence_enabled: bool,
}

fn default_sample_rate_hz() -> u32 {
    audio::DEFAULT_SAMPLE_RATE_HZ
}
fn default_frame_ms() -> u32 {
    audio::DEFAULT_FRAME_MS
}
fn default_noise_floor_alpha() -> f32 {
    0.01
}
fn default_initial_noise_floor() -> f32 {
    0.01
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            frame_ms: default_frame_ms(),
            adaptive_noise_floor: true,
            noise_floor_alpha: default_noise_floor_alpha(),
            initial_noise_floor: default_initial_noise_floor(),
            confidence_gating: true,
            spectral_confidence_enabled: false,
        }
    }
}

impl VadSettings {
    pub fn to_pipeline_config(&self) -> va_pipeline::VadConfig {
        let frame_ms = self.frame_ms;
        va_pipeline::VadConfig {
            sample_rate_hz: self.sample_rate_hz,
            frame_ms,
            adaptive_noise_floor: self.adaptive_noise_floor,
            noise_floor_alpha: self.noise_floor_alpha,
            initial_noise_floor: self.initial_noise_floor,
            confidence_gating: self.confidence_gating,
            spectral_confidence_enabled: self.spectral_confidence_enabled,
            ..va_pipeline::VadConfig::default()
        }
    }
}

/// A config-friendly mirror of [`DuckingProfile`] (that type has a
/// `Custom(f32)` payload that doesn't round-trip cleanly through
/// `#[serde(rename_all)]`-style tagging used elsewhere in this crate).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DuckingProfileSetting {
    Soft,
    Medium,
    Hard,
    Custom(f32),
}

impl From<DuckingProfileSetting> for DuckingProfile {
    fn from(value: DuckingProfileSetting) -> Self {
        match value {
            DuckingProfileSetting::Soft => DuckingProfile::Soft,
            DuckingProfileSetting::Medium => DuckingProfile::Medium,
            DuckingProfileSetting::Hard => DuckingProfile::Hard,
            DuckingProfileSetting::Custom(db) => DuckingProfile::Custom(db),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampCurveSetting {
    Linear,
    Exponential,
    Logarithmic,
}

impl From<RampCurveSetting> for RampCurve {
    fn from(value: RampCurveSetting) -> Self {
        match value {
            RampCurveSetting::Linear => RampCurve::Linear,
            RampCurveSetting::Exponential => RampCurve::Exponential,
            RampCurveSetting::Logarithmic => RampCurve::Logarithmic,
        }
    }
}

/// Audio processor / ducking tunables (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckingSettings {
    #[serde(default = "default_ducking_profile")]
    pub profile: DuckingProfileSetting,

    #[serde(default = "default_ramp_curve")]
    pub curve: RampCurveSetting,

    #[serde(default = "default_ramp_up_ms")]
    pub ramp_up_ms: u32,

    #[serde(default = "default_ramp_down_ms")]
    pub ramp_down_ms: u32,
}

fn default_ducking_profile() -> DuckingProfileSetting {
    DuckingProfileSetting::Medium
}
fn default_ramp_curve() -> RampCurveSetting {
    RampCurveSetting::Exponential
}
fn default_ramp_up_ms() -> u32 {
    50
}
fn default_ramp_down_ms() -> u32 {
    150
}

impl Default for DuckingSettings {
    fn default() -> Self {
        Self {
            profile: default_ducking_profile(),
            curve: default_ramp_curve(),
            ramp_up_ms: default_ramp_up_ms(),
            ramp_down_ms: default_ramp_down_ms(),
        }
    }
}

impl DuckingSettings {
    pub fn to_pipeline_config(&self, sample_rate_hz: u32) -> va_pipeline::AudioProcessorConfig {
        va_pipeline::AudioProcessorConfig {
            profile: self.profile.into(),
            curve: self.curve.into(),
            ramp_up_ms: self.ramp_up_ms,
            ramp_down_ms: self.ramp_down_ms,
            sample_rate_hz,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BargeInModeSetting {
    Immediate,
    Graceful,
    SentenceComplete,
    Disabled,
}

impl From<BargeInModeSetting> for BargeInMode {
    fn from(value: BargeInModeSetting) -> Self {
        match value {
            BargeInModeSetting::Immediate => BargeInMode::Immediate,
            BargeInModeSetting::Graceful => BargeInMode::Graceful,
            BargeInModeSetting::SentenceComplete => BargeInMode::SentenceComplete,
            BargeInModeSetting::Disabled => BargeInMode::Disabled,
        }
    }
}

/// Barge-in mediation tunables (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInSettings {
    #[serde(default = "default_barge_in_mode")]
    pub mode: BargeInModeSetting,

    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default = "default_sentence_completion_max_ms")]
    pub sentence_completion_max_ms: u64,

    #[serde(default = "default_true")]
    pub ducking_enabled: bool,

    #[serde(default = "default_ducking_lead_time_ms")]
    pub ducking_lead_time_ms: u64,
}

fn default_barge_in_mode() -> BargeInModeSetting {
    BargeInModeSetting::Graceful
}
fn default_grace_period_ms() -> u64 {
    300
}
fn default_sentence_completion_max_ms() -> u64 {
    2000
}
fn default_ducking_lead_time_ms() -> u64 {
    150
}

impl Default for BargeInSettings {
    fn default() -> Self {
        Self {
            mode: default_barge_in_mode(),
            grace_period_ms: default_grace_period_ms(),
            sentence_completion_max_ms: default_sentence_completion_max_ms(),
            ducking_enabled: true,
            ducking_lead_time_ms: default_ducking_lead_time_ms(),
        }
    }
}

impl BargeInSettings {
    pub fn to_pipeline_config(&self) -> va_pipeline::BargeInConfig {
        va_pipeline::BargeInConfig {
            mode: self.mode.into(),
            grace_period_ms: self.grace_period_ms,
            sentence_completion_max_ms: self.sentence_completion_max_ms,
            ducking_enabled: self.ducking_enabled,
            ducking_lead_time_ms: self.ducking_lead_time_ms,
        }
    }
}

/// Command router tunables (spec §4.3). The keyword table itself is fixed
/// (spec-defined, compiled into `va_pipeline::command_router`); this only
/// exposes whether the feature is on at all, following the teacher's
/// `features.barge_in_enabled`-style boolean toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRouterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CommandRouterSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Thinking-mode timing defaults (spec §4.5, §4.3 duration extraction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingSettings {
    #[serde(default = "default_thinking_duration_ms")]
    pub default_duration_ms: u64,
}

fn default_thinking_duration_ms() -> u64 {
    30_000
}

impl Default for ThinkingSettings {
    fn default() -> Self {
        Self {
            default_duration_ms: default_thinking_duration_ms(),
        }
    }
}

/// Where the default file-based recorder and event log write their output
/// (spec §6: "one subtree per episodeId", "opaque to the core").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,

    #[serde(default = "default_event_log_dir")]
    pub event_log_dir: String,
}

fn default_recordings_dir() -> String {
    "data/recordings".to_string()
}
fn default_event_log_dir() -> String {
    "data/events".to_string()
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            event_log_dir: default_event_log_dir(),
        }
    }
}

/// Observability configuration (`tracing` + `tracing-subscriber`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings by layering `config/base.{yaml,toml}`,
/// `config/{env}.{yaml,toml}` (both optional), and `VOICE_AGENT_`-prefixed
/// environment variables, in that order of increasing precedence.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let env_name = env
        .map(str::to_string)
        .or_else(|| std::env::var("VOICE_AGENT_ENV").ok())
        .unwrap_or_else(|| "development".to_string());

    let builder = Config::builder()
        .add_source(File::with_name("config/base").required(false))
        .add_source(File::with_name(&format!("config/{env_name}")).required(false))
        .add_source(
            Environment::with_prefix("VOICE_AGENT")
                .separator("__")
                .try_parsing(true),
        );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn vad_settings_convert_to_pipeline_config() {
        let vad = VadSettings::default();
        let cfg = vad.to_pipeline_config();
        assert_eq!(cfg.sample_rate_hz, audio::DEFAULT_SAMPLE_RATE_HZ);
    }

    #[test]
    fn vad_settings_thread_initial_noise_floor_through() {
        let mut vad = VadSettings::default();
        vad.initial_noise_floor = 0.03;
        let cfg = vad.to_pipeline_config();
        assert_eq!(cfg.initial_noise_floor, 0.03);
    }

    #[test]
    fn ducking_settings_convert_to_pipeline_config() {
        let ducking = DuckingSettings::default();
        let cfg = ducking.to_pipeline_config(48_000);
        assert_eq!(cfg.profile.reduction_db(), DuckingProfile::Medium.reduction_db());
    }

    #[test]
    fn invalid_noise_floor_fails_validation() {
        let mut settings = Settings::default();
        settings.vad.initial_noise_floor = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn sentence_complete_below_grace_period_fails_validation() {
        let mut settings = Settings::default();
        settings.barge_in.sentence_completion_max_ms = 100;
        settings.barge_in.grace_period_ms = 300;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_settings_from_env_override() {
        std::env::set_var("VOICE_AGENT__SERVER__PORT", "9999");
        let settings = load_settings(Some("test")).expect("settings load");
        assert_eq!(settings.server.port, 9999);
        std::env::remove_var("VOICE_AGENT__SERVER__PORT");
    }
}
