//! Centralized, domain-agnostic constants.
//!
//! Only generic infrastructure defaults live here: audio framing and
//! operational timeouts. Tuning that belongs to a specific component (VAD
//! thresholds, ducking profile, barge-in grace periods, router keywords)
//! lives on that component's own config struct in `va-pipeline` and is
//! merely selected from here via [`crate::Settings`].

/// Audio framing defaults (spec §6: PCM16 little-endian mono).
pub mod audio {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 48_000;
    pub const DEFAULT_FRAME_MS: u32 = 20;
}

/// Operational timeouts, in milliseconds unless noted.
pub mod timeouts {
    /// Bound on total graceful-shutdown time (spec §4.5: "the reference uses 30s").
    pub const SHUTDOWN_DEADLINE_MS: u64 = 30_000;

    /// STT/TTS adapter call timeout; adapters that exceed this are treated
    /// as a transient adapter error (spec §7).
    pub const ADAPTER_CALL_MS: u64 = 10_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_positive() {
        assert!(timeouts::SHUTDOWN_DEADLINE_MS > 0);
        assert!(timeouts::ADAPTER_CALL_MS > 0);
    }
}
