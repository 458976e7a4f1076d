//! Per-connection token-bucket rate limiting for inbound control messages
//! and audio bytes (spec §7: malformed/over-limit input is dropped or
//! rejected, never a session-fatal error on its own).

use std::time::Instant;

use thiserror::Error;
use va_config::RateLimitConfig;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("message rate exceeded: {0} messages/sec")]
    MessageRate(u32),

    #[error("audio rate exceeded: {0} bytes/sec")]
    AudioRate(u32),
}

/// One token bucket: capacity grows with `burst_multiplier`, refills
/// continuously at `rate` units/sec.
struct Bucket {
    capacity: f64,
    tokens: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate_per_sec: f64, burst_multiplier: f32) -> Self {
        let capacity = rate_per_sec * burst_multiplier as f64;
        Self {
            capacity,
            tokens: capacity,
            rate_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, cost: f64) -> bool {
        self.refill(Instant::now());
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Rate limiter for one WebSocket connection: one bucket for control
/// messages, one for audio bytes.
pub struct RateLimiter {
    messages: Bucket,
    audio: Bucket,
    messages_per_second: u32,
    audio_bytes_per_second: u32,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            messages: Bucket::new(config.messages_per_second as f64, config.burst_multiplier),
            audio: Bucket::new(config.audio_bytes_per_second as f64, config.burst_multiplier),
            messages_per_second: config.messages_per_second,
            audio_bytes_per_second: config.audio_bytes_per_second,
            enabled: config.enabled,
        }
    }

    pub fn check_message(&mut self) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        if self.messages.try_take(1.0) {
            Ok(())
        } else {
            Err(RateLimitError::MessageRate(self.messages_per_second))
        }
    }

    pub fn check_audio(&mut self, bytes: usize) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        if self.audio.try_take(bytes as f64) {
            Ok(())
        } else {
            Err(RateLimitError::AudioRate(self.audio_bytes_per_second))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> RateLimitConfig {
        RateLimitConfig {
            enabled,
            messages_per_second: 10,
            audio_bytes_per_second: 100,
            burst_multiplier: 1.0,
        }
    }

    #[test]
    fn allows_within_budget_then_rejects_burst() {
        let mut limiter = RateLimiter::new(&config(true));
        for _ in 0..10 {
            assert!(limiter.check_message().is_ok());
        }
        assert!(limiter.check_message().is_err());
    }

    #[test]
    fn disabled_limiter_never_rejects() {
        let mut limiter = RateLimiter::new(&config(false));
        for _ in 0..10_000 {
            assert!(limiter.check_message().is_ok());
        }
    }

    #[test]
    fn audio_bucket_tracks_bytes_not_calls() {
        let mut limiter = RateLimiter::new(&config(true));
        assert!(limiter.check_audio(60).is_ok());
        assert!(limiter.check_audio(60).is_err());
    }
}
