//! Enhanced voice activity detection (spec §4.1): per-frame RMS energy,
//! adaptive noise-floor tracking, and a confidence-gated hysteresis state
//! machine. Energy/RMS based — no model weights, no inference runtime.

use std::collections::VecDeque;
use va_core::audio::{pcm16_bytes_to_f32, rms, DEFAULT_FRAME_MS, DEFAULT_SAMPLE_RATE_HZ};

const HISTORY_CAP: usize = 50;
const SUB_CONFIDENCE_WINDOW: usize = 10;

/// Tunables for [`Vad`]. Defaults match spec §4.1.
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub sample_rate_hz: u32,
    pub frame_ms: u32,
    pub adaptive_noise_floor: bool,
    pub noise_floor_alpha: f32,
    /// Starting value for the adaptive noise-floor tracker, clamped to
    /// spec §3's `[0.0001, 0.1]` invariant before use.
    pub initial_noise_floor: f32,
    pub confidence_gating: bool,
    pub spectral_confidence_enabled: bool,
    pub speech_frames_required: u32,
    pub silence_frames_required: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        let frame_ms = DEFAULT_FRAME_MS;
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            frame_ms,
            adaptive_noise_floor: true,
            noise_floor_alpha: 0.01,
            initial_noise_floor: 0.01,
            confidence_gating: true,
            spectral_confidence_enabled: false,
            speech_frames_required: frames_for_ms(120, frame_ms),
            silence_frames_required: frames_for_ms(220, frame_ms),
        }
    }
}

fn frames_for_ms(ms: u32, frame_ms: u32) -> u32 {
    ((ms as f64 / frame_ms as f64).ceil()) as u32
}

/// A speech-start or speech-end edge emitted by the VAD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    SpeechStart { confidence: f32 },
    SpeechEnd { confidence: f32 },
}

/// Energy/RMS based voice activity detector with adaptive noise floor.
///
/// One instance per session per speaker channel (typically just the human;
/// agents do not require VAD since their audio originates from TTS).
pub struct Vad {
    config: VadConfig,
    frame_samples: usize,

    noise_floor: f32,
    speech_threshold: f32,
    release_threshold: f32,
    peak_energy: f32,

    energy_history: VecDeque<f32>,
    confidence_history: VecDeque<f32>,
    current_confidence: f32,

    speaking: bool,
    speech_frame_count: u32,
    silence_frame_count: u32,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        let frame_samples =
            va_core::audio::frame_samples(config.sample_rate_hz, config.frame_ms);
        let noise_floor: f32 = config.initial_noise_floor.clamp(0.0001, 0.1);
        Self {
            speech_threshold: noise_floor * 2.5,
            release_threshold: noise_floor * 1.5,
            noise_floor,
            peak_energy: 0.0,
            energy_history: VecDeque::with_capacity(HISTORY_CAP),
            confidence_history: VecDeque::with_capacity(HISTORY_CAP),
            current_confidence: 0.0,
            speaking: false,
            speech_frame_count: 0,
            silence_frame_count: 0,
            frame_samples,
            config,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn current_confidence(&self) -> f32 {
        self.current_confidence
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    /// Process one frame of little-endian PCM16 audio, returning an event
    /// if a speech-start/speech-end edge occurred. Malformed or zero-length
    /// input is a no-op (logged, never an error per spec §4.1 / §7).
    pub fn process_frame(&mut self, pcm16: &[u8]) -> Option<VadEvent> {
        if pcm16.is_empty() {
            return None;
        }
        let samples = pcm16_bytes_to_f32(pcm16);
        if samples.len() != self.frame_samples {
            tracing::warn!(
                expected = self.frame_samples,
                actual = samples.len(),
                "vad: unexpected frame size, processing anyway"
            );
        }

        let frame_rms = rms(&samples);
        self.push_energy(frame_rms);
        self.peak_energy = (self.peak_energy * 0.999).max(frame_rms);

        if self.config.adaptive_noise_floor && !self.speaking && frame_rms < self.speech_threshold
        {
            self.update_noise_floor(frame_rms);
        }

        let overall = self.overall_confidence();
        self.current_confidence = 0.85 * self.current_confidence + 0.15 * overall;
        self.confidence_history.push_back(self.current_confidence);
        while self.confidence_history.len() > HISTORY_CAP {
            self.confidence_history.pop_front();
        }

        let effective_threshold = if self.config.confidence_gating {
            self.speech_threshold * (1.0 - 0.3 * self.current_confidence)
        } else {
            self.speech_threshold
        };

        self.transition(frame_rms, effective_threshold)
    }

    fn push_energy(&mut self, value: f32) {
        self.energy_history.push_back(value);
        while self.energy_history.len() > HISTORY_CAP {
            self.energy_history.pop_front();
        }
    }

    fn update_noise_floor(&mut self, frame_rms: f32) {
        let alpha = self.config.noise_floor_alpha;
        self.noise_floor = (self.noise_floor * (1.0 - alpha) + frame_rms * alpha).clamp(0.0001, 0.1);
        self.speech_threshold = self.noise_floor * 2.5;
        self.release_threshold = self.noise_floor * 1.5;
    }

    fn recent_energy(&self, window: usize) -> Vec<f32> {
        let len = self.energy_history.len();
        let skip = len.saturating_sub(window);
        self.energy_history.iter().skip(skip).copied().collect()
    }

    fn energy_confidence(&self) -> f32 {
        let recent = self.recent_energy(SUB_CONFIDENCE_WINDOW);
        if recent.is_empty() {
            return 0.5;
        }
        let mean_energy: f32 = recent.iter().sum::<f32>() / recent.len() as f32;
        let snr_db = 20.0 * (mean_energy / self.noise_floor.max(0.0001)).log10();
        clamp01((snr_db - 5.0) / 15.0)
    }

    fn consistency_confidence(&self) -> f32 {
        let recent = self.recent_energy(SUB_CONFIDENCE_WINDOW);
        if recent.len() < 5 {
            return 0.5;
        }
        let mean: f32 = recent.iter().sum::<f32>() / recent.len() as f32;
        if mean <= 0.0 {
            return 0.5;
        }
        let variance: f32 =
            recent.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / recent.len() as f32;
        let cv = variance.sqrt() / mean;
        clamp01(1.0 - (cv - 0.3) / 0.7)
    }

    fn spectral_confidence(&self) -> f32 {
        if self.config.spectral_confidence_enabled {
            0.7
        } else {
            0.5
        }
    }

    fn overall_confidence(&self) -> f32 {
        0.4 * self.energy_confidence() + 0.4 * self.consistency_confidence() + 0.2 * self.spectral_confidence()
    }

    fn transition(&mut self, frame_rms: f32, effective_threshold: f32) -> Option<VadEvent> {
        if !self.speaking {
            if frame_rms >= effective_threshold {
                self.speech_frame_count += 1;
                let confidence_ok =
                    !self.config.confidence_gating || self.current_confidence >= 0.4;
                if self.speech_frame_count >= self.config.speech_frames_required && confidence_ok {
                    self.speaking = true;
                    self.speech_frame_count = 0;
                    self.silence_frame_count = 0;
                    return Some(VadEvent::SpeechStart {
                        confidence: self.current_confidence,
                    });
                }
            } else if frame_rms > self.release_threshold {
                self.speech_frame_count = self.speech_frame_count.saturating_sub(1);
            }
            None
        } else {
            if frame_rms <= self.release_threshold {
                self.silence_frame_count += 1;
                if self.silence_frame_count >= self.config.silence_frames_required {
                    let confidence_before = self.current_confidence;
                    self.speaking = false;
                    self.speech_frame_count = 0;
                    self.silence_frame_count = 0;
                    self.current_confidence *= 0.5;
                    return Some(VadEvent::SpeechEnd {
                        confidence: confidence_before,
                    });
                }
            } else {
                self.silence_frame_count = 0;
            }
            None
        }
    }
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence_frame(samples: usize) -> Vec<u8> {
        vec![0u8; samples * 2]
    }

    fn tone_frame(samples: usize, amplitude: f32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            let s = (v * 32767.0) as i16;
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn zero_length_is_noop() {
        let mut vad = Vad::new(VadConfig::default());
        assert_eq!(vad.process_frame(&[]), None);
    }

    #[test]
    fn speech_threshold_always_above_release_threshold() {
        let mut vad = Vad::new(VadConfig::default());
        let frame_samples = vad.frame_samples;
        for _ in 0..20 {
            vad.process_frame(&silence_frame(frame_samples));
        }
        assert!(vad.speech_threshold > vad.release_threshold);
        assert!(vad.noise_floor >= 0.0001 && vad.noise_floor <= 0.1);
    }

    #[test]
    fn sustained_loud_tone_triggers_speech_start() {
        let mut vad = Vad::new(VadConfig::default());
        let frame_samples = vad.frame_samples;
        for _ in 0..30 {
            vad.process_frame(&silence_frame(frame_samples));
        }
        let mut saw_start = false;
        for _ in 0..20 {
            if let Some(VadEvent::SpeechStart { .. }) =
                vad.process_frame(&tone_frame(frame_samples, 0.8))
            {
                saw_start = true;
                break;
            }
        }
        assert!(saw_start, "expected a speech-start edge");
        assert!(vad.is_speaking());
    }

    #[test]
    fn speech_then_silence_triggers_speech_end() {
        let mut vad = Vad::new(VadConfig::default());
        let frame_samples = vad.frame_samples;
        for _ in 0..30 {
            vad.process_frame(&silence_frame(frame_samples));
        }
        for _ in 0..20 {
            vad.process_frame(&tone_frame(frame_samples, 0.8));
        }
        assert!(vad.is_speaking());
        let mut saw_end = false;
        for _ in 0..30 {
            if let Some(VadEvent::SpeechEnd { .. }) = vad.process_frame(&silence_frame(frame_samples))
            {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end, "expected a speech-end edge");
        assert!(!vad.is_speaking());
    }

    #[test]
    fn initial_noise_floor_is_applied_and_clamped() {
        let vad = Vad::new(VadConfig {
            initial_noise_floor: 0.05,
            ..VadConfig::default()
        });
        assert_eq!(vad.noise_floor(), 0.05);
        assert_eq!(vad.speech_threshold, 0.05 * 2.5);

        let vad = Vad::new(VadConfig {
            initial_noise_floor: 10.0,
            ..VadConfig::default()
        });
        assert_eq!(vad.noise_floor(), 0.1);
    }
}
