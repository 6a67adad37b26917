//! Microphone capture buffering and sample-rate conversion
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
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Wire sample rate
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Samples per outbound chunk (100 ms)
pub const CHUNK_SAMPLES: usize = (CAPTURE_SAMPLE_RATE / 10) as usize;

/// One 100 ms chunk ready for the audio sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedChunk {
    pub input: Vec<i16>,
    /// Playback audio for echo cancellation; empty when AEC is off
    pub reference: Vec<i16>,
}

#[derive(Debug)]
struct Buffers {
    input: Vec<i16>,
    reference: Vec<i16>,
    capturing: bool,
    volume: f32,
}

/// Microphone and playback buffers shared with the audio thread
///
/// The audio thread converts its callback data to 16 kHz mono before
/// taking the lock, so the critical section is a copy.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Buffers>>,
    aec_enabled: bool,
}

impl CaptureBuffer {
    pub fn new(aec_enabled: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Buffers {
                input: Vec::new(),
                reference: Vec::new(),
                capturing: false,
                volume: 1.0,
            })),
            aec_enabled,
        }
    }

    pub fn aec_enabled(&self) -> bool {
        self.aec_enabled
    }

    /// Stopping capture discards everything buffered
    pub fn set_capturing(&self, capturing: bool) {
        let mut buffers = self.inner.lock();
        if buffers.capturing == capturing {
            return;
        }
        buffers.capturing = capturing;
        if !capturing {
            buffers.input.clear();
            buffers.reference.clear();
        }
        debug!(capturing, "Voice capture toggled");
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.lock().capturing
    }

    /// Gain applied to microphone input
    pub fn set_volume(&self, volume: f32) {
        self.inner.lock().volume = volume.max(0.0);
    }

    /// Append interleaved float microphone samples
    pub fn push_input_f32(&self, data: &[f32], channels: usize, sample_rate: u32) -> ClientResult<()> {
        let volume = self.inner.lock().volume;
        let samples = downsample_f32(data, channels, sample_rate, volume)?;
        self.append(samples, false);
        Ok(())
    }

    /// Append interleaved 16-bit microphone samples
    pub fn push_input_i16(&self, data: &[i16], channels: usize, sample_rate: u32) -> ClientResult<()> {
        let volume = self.inner.lock().volume;
        let samples = downsample_i16(data, channels, sample_rate, volume)?;
        self.append(samples, false);
        Ok(())
    }

    /// Append interleaved float playback samples
    pub fn push_reference_f32(&self, data: &[f32], channels: usize, sample_rate: u32) -> ClientResult<()> {
        let samples = downsample_f32(data, channels, sample_rate, 1.0)?;
        self.append(samples, true);
        Ok(())
    }

    fn append(&self, samples: Vec<i16>, reference: bool) {
        let mut buffers = self.inner.lock();
        if !buffers.capturing {
            return;
        }
        if reference {
            buffers.reference.extend_from_slice(&samples);
        } else {
            buffers.input.extend_from_slice(&samples);
        }
    }

    /// Take every complete chunk
    ///
    /// A chunk is cut while more than one chunk of input is buffered and,
    /// with AEC on, more than one chunk of reference audio as well.
    pub fn drain_chunks(&self) -> Vec<CapturedChunk> {
        let mut buffers = self.inner.lock();
        let mut chunks = Vec::new();
        while buffers.input.len() > CHUNK_SAMPLES
            && (!self.aec_enabled || buffers.reference.len() > CHUNK_SAMPLES)
        {
            let input: Vec<i16> = buffers.input.drain(..CHUNK_SAMPLES).collect();
            let reference = if self.aec_enabled {
                buffers.reference.drain(..CHUNK_SAMPLES).collect()
            } else {
                Vec::new()
            };
            chunks.push(CapturedChunk { input, reference });
        }
        chunks
    }

    pub fn buffered_input(&self) -> usize {
        self.inner.lock().input.len()
    }

    pub fn buffered_reference(&self) -> usize {
        self.inner.lock().reference.len()
    }

    pub fn clear(&self) {
        let mut buffers = self.inner.lock();
        buffers.input.clear();
        buffers.reference.clear();
    }
}

fn check_format(channels: usize, sample_rate: u32) -> ClientResult<()> {
    if channels == 0 {
        return Err(ClientError::InvalidAudio("zero channels".to_string()));
    }
    if sample_rate < CAPTURE_SAMPLE_RATE {
        return Err(ClientError::InvalidAudio(format!(
            "sample rate {sample_rate} below {CAPTURE_SAMPLE_RATE}"
        )));
    }
    Ok(())
}

/// Frames of one callback kept at 16 kHz, nearest-rounded count
///
/// Frame `k` of the output is input frame `floor(k * rate / 16000)`, so
/// rates that are not a multiple of 16 kHz (44.1 kHz, 22.05 kHz) keep
/// their duration.
fn resampled_frames(frames: usize, sample_rate: u32) -> impl Iterator<Item = usize> {
    let rate = u64::from(sample_rate);
    let target = u64::from(CAPTURE_SAMPLE_RATE);
    let count = (frames as u64 * target + rate / 2) / rate;
    (0..count)
        .map(move |k| (k * rate / target) as usize)
        .take_while(move |frame| *frame < frames)
}

/// Interleaved float audio to 16 kHz mono, first channel
pub fn downsample_f32(
    data: &[f32],
    channels: usize,
    sample_rate: u32,
    volume: f32,
) -> ClientResult<Vec<i16>> {
    check_format(channels, sample_rate)?;
    Ok(resampled_frames(data.len() / channels, sample_rate)
        .map(|frame| ((data[frame * channels] * volume).clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect())
}

/// Interleaved 16-bit audio to 16 kHz mono, first channel
pub fn downsample_i16(
    data: &[i16],
    channels: usize,
    sample_rate: u32,
    volume: f32,
) -> ClientResult<Vec<i16>> {
    check_format(channels, sample_rate)?;
    Ok(resampled_frames(data.len() / channels, sample_rate)
        .map(|frame| {
            (f32::from(data[frame * channels]) * volume)
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
        })
        .collect())
}
