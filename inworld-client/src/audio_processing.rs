//! Audio processing: echo cancellation, voice activity detection and PCM helpers
//!
//! Both processors sit behind traits so a host can plug in a native
//! implementation. The built-in ones are small pure-Rust versions that are
//! good enough for tests and simple hosts.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{ClientError, ClientResult};
use std::collections::VecDeque;

/// 10 ms at 16 kHz
pub const AEC_FRAME_SAMPLES: usize = 160;

/// Scale between i16 PCM and normalized floats
const PCM_SCALE: f32 = 32767.0;

/// Echo canceller working on 10 ms frames
pub trait EchoCanceller: Send {
    /// Feed one frame of far-end (playback) audio
    fn buffer_far_end(&mut self, frame: &[i16]);
    /// Filter one near-end (microphone) frame into `output`
    fn process(&mut self, frame: &[i16], output: &mut [i16]);
    fn reset(&mut self);
}

/// Voice activity detector
pub trait VoiceActivityDetector: Send {
    /// Probability in `[0, 1]` that the chunk contains speech
    fn speech_probability(&mut self, samples: &[f32]) -> f32;
    fn reset(&mut self);
}

/// Echo canceller configuration
#[derive(Debug, Clone)]
pub struct EchoCancellerConfig {
    /// Adaptation rate (0.0 - 1.0)
    pub adaptation_rate: f32,
    /// Filter length in samples
    pub filter_length: usize,
}

impl Default for EchoCancellerConfig {
    fn default() -> Self {
        EchoCancellerConfig {
            adaptation_rate: 0.1,
            filter_length: 320, // 20ms at 16kHz
        }
    }
}

/// Normalized least-mean-squares echo canceller
pub struct NlmsEchoCanceller {
    config: EchoCancellerConfig,
    weights: Vec<f32>,
    /// Most recent far-end samples, newest first
    history: VecDeque<f32>,
    /// Far-end samples buffered but not yet consumed
    pending_far_end: VecDeque<f32>,
}

impl NlmsEchoCanceller {
    pub fn new(config: EchoCancellerConfig) -> Self {
        let filter_length = config.filter_length.max(1);
        NlmsEchoCanceller {
            config,
            weights: vec![0.0; filter_length],
            history: VecDeque::from(vec![0.0; filter_length]),
            pending_far_end: VecDeque::new(),
        }
    }

    fn filter_sample(&mut self, near: f32) -> f32 {
        let far = self.pending_far_end.pop_front().unwrap_or(0.0);
        self.history.pop_back();
        self.history.push_front(far);

        let mut estimate = 0.0;
        let mut power = 0.0;
        for (w, x) in self.weights.iter().zip(self.history.iter()) {
            estimate += w * x;
            power += x * x;
        }

        let error = near - estimate;
        let step = self.config.adaptation_rate * error / (1e-6 + power);
        for (w, x) in self.weights.iter_mut().zip(self.history.iter()) {
            *w += step * x;
        }
        error
    }
}

impl Default for NlmsEchoCanceller {
    fn default() -> Self {
        Self::new(EchoCancellerConfig::default())
    }
}

impl EchoCanceller for NlmsEchoCanceller {
    fn buffer_far_end(&mut self, frame: &[i16]) {
        self.pending_far_end
            .extend(frame.iter().map(|s| *s as f32 / PCM_SCALE));
        // Never let unmatched playback pile up beyond one filter length
        let limit = self.weights.len() + AEC_FRAME_SAMPLES;
        while self.pending_far_end.len() > limit {
            self.pending_far_end.pop_front();
        }
    }

    fn process(&mut self, frame: &[i16], output: &mut [i16]) {
        for (near, out) in frame.iter().zip(output.iter_mut()) {
            let cleaned = self.filter_sample(*near as f32 / PCM_SCALE);
            *out = float_to_sample(cleaned);
        }
    }

    fn reset(&mut self) {
        self.weights.fill(0.0);
        self.history.iter_mut().for_each(|x| *x = 0.0);
        self.pending_far_end.clear();
    }
}

/// Run echo cancellation over whole 160-sample frames
///
/// Only `floor(min(input, reference) / 160) * 160` samples are filtered.
/// Everything after that is copied through untouched. Returns the output
/// and the number of filtered samples.
pub fn apply_echo_cancellation(
    canceller: &mut dyn EchoCanceller,
    input: &[i16],
    reference: &[i16],
) -> (Vec<i16>, usize) {
    let mut output = input.to_vec();
    let processed = input.len().min(reference.len()) / AEC_FRAME_SAMPLES * AEC_FRAME_SAMPLES;

    for start in (0..processed).step_by(AEC_FRAME_SAMPLES) {
        let end = start + AEC_FRAME_SAMPLES;
        canceller.buffer_far_end(&reference[start..end]);
        canceller.process(&input[start..end], &mut output[start..end]);
    }

    (output, processed)
}

/// Energy-based detector configuration
#[derive(Debug, Clone)]
pub struct EnergyVadConfig {
    /// RMS at or below which the probability is 0
    pub noise_floor: f32,
    /// RMS at or above which the probability is 1
    pub speech_level: f32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            noise_floor: 0.005,
            speech_level: 0.05,
        }
    }
}

/// Voice activity detection using RMS energy
#[derive(Debug, Default)]
pub struct EnergyVad {
    config: EnergyVadConfig,
    last_energy: f32,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            config,
            last_energy: 0.0,
        }
    }

    /// RMS energy of the last analyzed chunk
    pub fn last_energy(&self) -> f32 {
        self.last_energy
    }

    fn calculate_rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn speech_probability(&mut self, samples: &[f32]) -> f32 {
        self.last_energy = Self::calculate_rms(samples);
        let span = (self.config.speech_level - self.config.noise_floor).max(f32::EPSILON);
        ((self.last_energy - self.config.noise_floor) / span).clamp(0.0, 1.0)
    }

    fn reset(&mut self) {
        self.last_energy = 0.0;
    }
}

fn float_to_sample(value: f32) -> i16 {
    (value * PCM_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// i16 PCM to floats in `[-1, 1]`
pub fn normalize_samples(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| *s as f32 / PCM_SCALE).collect()
}

/// i16 PCM to little-endian wire bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Little-endian wire bytes to i16 PCM
pub fn bytes_to_samples(bytes: &[u8]) -> ClientResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(ClientError::InvalidAudio(format!(
            "odd byte count {} for 16-bit PCM",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the frame sizes it was given
    #[derive(Default)]
    struct FrameRecorder {
        far_end: Vec<usize>,
        near_end: Vec<usize>,
    }

    impl EchoCanceller for FrameRecorder {
        fn buffer_far_end(&mut self, frame: &[i16]) {
            self.far_end.push(frame.len());
        }

        fn process(&mut self, frame: &[i16], output: &mut [i16]) {
            self.near_end.push(frame.len());
            output.fill(0);
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_aec_processes_whole_frames_only() {
        let mut recorder = FrameRecorder::default();
        let input = vec![7i16; 350];
        let reference = vec![1i16; 500];

        let (output, processed) = apply_echo_cancellation(&mut recorder, &input, &reference);
        assert_eq!(processed, 320);
        assert_eq!(recorder.far_end, vec![160, 160]);
        assert_eq!(recorder.near_end, vec![160, 160]);
        assert!(output[..320].iter().all(|s| *s == 0));
        assert!(output[320..].iter().all(|s| *s == 7));
        assert_eq!(output.len(), 350);
    }

    #[test]
    fn test_aec_short_reference_passes_through() {
        let mut recorder = FrameRecorder::default();
        let input = vec![3i16; 480];
        let (output, processed) = apply_echo_cancellation(&mut recorder, &input, &[0i16; 100]);
        assert_eq!(processed, 0);
        assert_eq!(output, input);
    }

    #[test]
    fn test_nlms_reduces_echo() {
        let mut canceller = NlmsEchoCanceller::default();
        // Microphone hears the far end directly (zero delay echo at half volume)
        let far: Vec<i16> = (0..16000)
            .map(|i| ((i as f32 * 0.07).sin() * 8000.0) as i16)
            .collect();
        let near: Vec<i16> = far.iter().map(|s| s / 2).collect();

        let (output, processed) = apply_echo_cancellation(&mut canceller, &near, &far);
        assert_eq!(processed, 16000);

        let energy = |s: &[i16]| s.iter().map(|x| (*x as f64).powi(2)).sum::<f64>();
        let tail = 16000 - 1600;
        assert!(energy(&output[tail..]) < energy(&near[tail..]) * 0.1);
    }

    #[test]
    fn test_energy_vad() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.speech_probability(&[0.0; 160]), 0.0);
        assert_eq!(vad.speech_probability(&[]), 0.0);

        let loud: Vec<f32> = (0..1600).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_eq!(vad.speech_probability(&loud), 1.0);
        assert!((vad.last_energy() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pcm_byte_conversion() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(&bytes[..6], &[0, 0, 1, 0, 0xff, 0xff]);
        assert_eq!(bytes_to_samples(&bytes).unwrap(), samples);
        assert!(bytes_to_samples(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_normalize_samples() {
        let normalized = normalize_samples(&[i16::MAX, 0, -16384]);
        assert_eq!(normalized[0], 1.0);
        assert_eq!(normalized[1], 0.0);
        assert!((normalized[2] + 0.5).abs() < 1e-3);
    }
}
