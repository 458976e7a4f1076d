//! PCM16 audio helpers shared by the VAD and audio processor.
//!
//! The transport carries raw little-endian 16-bit mono PCM (§6). Components
//! operate on the byte buffer directly rather than through a higher-level
//! frame type — there is no resampling or channel mixing in the core; the
//! sample rate is fixed per session (default 48 kHz) and negotiated, if at
//! all, outside this crate.

/// Default sample rate assumed when a session does not negotiate one.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 48_000;

/// Default VAD frame size in milliseconds (§4.1).
pub const DEFAULT_FRAME_MS: u32 = 20;

/// Number of samples in a frame of the given duration at the given rate.
pub const fn frame_samples(sample_rate_hz: u32, frame_ms: u32) -> usize {
    (sample_rate_hz as usize * frame_ms as usize) / 1000
}

/// Decode little-endian PCM16 bytes into normalized `f32` samples in `[-1, 1)`.
///
/// A trailing odd byte (an incomplete sample) is ignored; callers that need
/// to preserve it (the audio processor, per spec §4.2) handle it separately.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

/// RMS of normalized samples: `sqrt(sum(s^2) / N)`. Empty input yields `0.0`.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Convert a linear gain in `[0, 1]` to decibels. `gain == 0` maps to
/// negative infinity, matching the spec's `gain_to_db(0) = -inf` contract.
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

/// Convert decibels to a linear gain. `db == -inf` maps to `0.0`.
pub fn db_to_gain(db: f32) -> f32 {
    if db.is_infinite() && db.is_sign_negative() {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_roundtrip_sign() {
        let bytes: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0]; // +0.5, -0.5
        let samples = pcm16_bytes_to_f32(&bytes);
        assert_eq!(samples.len(), 2);
        assert!(samples[0] > 0.0);
        assert!(samples[1] < 0.0);
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        let bytes: Vec<u8> = vec![0x00, 0x40, 0xFF];
        assert_eq!(pcm16_bytes_to_f32(&bytes).len(), 1);
    }

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn gain_db_round_trip() {
        for db in [-60.0, -30.0, -12.0, -6.0, 0.0] {
            let gain = db_to_gain(db);
            let back = gain_to_db(gain);
            assert!((back - db).abs() < 1e-4, "{back} != {db}");
        }
    }

    #[test]
    fn gain_to_db_zero_is_neg_infinity() {
        assert_eq!(gain_to_db(0.0), f32::NEG_INFINITY);
        assert_eq!(db_to_gain(f32::NEG_INFINITY), 0.0);
    }
}
