//! Outbound microphone pipeline
//!
//! One [`AudioSender`] serves one session. It tracks which agent or
//! conversation the microphone is currently routed to and whether the
//! service side audio session is open. With voice activity detection on,
//! the remote session only opens once speech is heard: up to five quiet
//! chunks before speech are kept as lookback and sent ahead of the first
//! speech chunk, and more than five quiet chunks in a row close the remote
//! session again.
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


use crate::audio_dump::AudioDumper;
use crate::audio_processing::{
    apply_echo_cancellation, normalize_samples, samples_to_bytes, EchoCanceller,
    VoiceActivityDetector,
};
use crate::error::{ClientError, ClientResult};
use crate::transport::TransportClient;
use inworld_types::AudioSessionOptions;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Speech probability above which a chunk counts as speech
pub const VAD_SPEECH_THRESHOLD: f32 = 0.3;
/// Quiet chunks kept before speech starts
pub const VAD_LOOKBACK_CHUNKS: usize = 5;
/// Quiet chunks tolerated before the remote session closes
pub const VAD_SILENCE_CHUNKS: u32 = 5;

/// Where microphone audio goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRouting {
    Agent(String),
    Conversation(String),
}

impl AudioRouting {
    pub fn id(&self) -> &str {
        match self {
            AudioRouting::Agent(id) | AudioRouting::Conversation(id) => id,
        }
    }

    pub fn is_conversation(&self) -> bool {
        matches!(self, AudioRouting::Conversation(_))
    }
}

impl fmt::Display for AudioRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioRouting::Agent(id) => write!(f, "agent {id}"),
            AudioRouting::Conversation(id) => write!(f, "conversation {id}"),
        }
    }
}

/// Audio pipeline counters
#[derive(Debug, Clone, Default)]
pub struct AudioStats {
    /// Chunks handed to the transport
    pub chunks_sent: u64,
    /// Lookback chunks dropped before speech
    pub chunks_dropped: u64,
    /// Remote sessions opened
    pub sessions_opened: u64,
    /// Remote sessions closed
    pub sessions_closed: u64,
}

pub struct AudioSender {
    echo_canceller: Option<Box<dyn EchoCanceller>>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    routing: Option<AudioRouting>,
    options: AudioSessionOptions,
    /// Remote audio session open
    session_active: bool,
    queue: VecDeque<Vec<u8>>,
    silence_counter: u32,
    dumper: Option<AudioDumper>,
    stats: AudioStats,
}

impl fmt::Debug for AudioSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSender")
            .field("aec", &self.echo_canceller.is_some())
            .field("vad", &self.vad.is_some())
            .field("routing", &self.routing)
            .field("session_active", &self.session_active)
            .field("queued", &self.queue.len())
            .field("silence_counter", &self.silence_counter)
            .finish()
    }
}

impl AudioSender {
    /// `None` disables the corresponding stage
    pub fn new(
        echo_canceller: Option<Box<dyn EchoCanceller>>,
        vad: Option<Box<dyn VoiceActivityDetector>>,
    ) -> Self {
        Self {
            echo_canceller,
            vad,
            routing: None,
            options: AudioSessionOptions::default(),
            session_active: false,
            queue: VecDeque::with_capacity(VAD_LOOKBACK_CHUNKS + 1),
            silence_counter: 0,
            dumper: None,
            stats: AudioStats::default(),
        }
    }

    pub fn vad_enabled(&self) -> bool {
        self.vad.is_some()
    }

    pub fn aec_enabled(&self) -> bool {
        self.echo_canceller.is_some()
    }

    pub fn routing(&self) -> Option<&AudioRouting> {
        self.routing.as_ref()
    }

    pub fn is_session_active(&self) -> bool {
        self.session_active
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn silence_counter(&self) -> u32 {
        self.silence_counter
    }

    pub fn stats(&self) -> &AudioStats {
        &self.stats
    }

    /// Start writing every outbound chunk to `path`
    pub fn enable_dump(&mut self, path: impl AsRef<Path>) -> ClientResult<()> {
        self.dumper = Some(AudioDumper::start(path)?);
        Ok(())
    }

    pub fn disable_dump(&mut self) {
        if let Some(dumper) = self.dumper.take() {
            if let Err(e) = dumper.finish() {
                warn!(error = %e, "Audio dump did not close cleanly");
            }
        }
    }

    pub fn is_dumping(&self) -> bool {
        self.dumper.is_some()
    }

    /// Route the microphone to an agent
    pub fn start_audio_session(
        &mut self,
        transport: &mut dyn TransportClient,
        agent_id: &str,
        options: AudioSessionOptions,
    ) {
        self.start(transport, AudioRouting::Agent(agent_id.to_string()), options);
    }

    /// Route the microphone to a conversation
    pub fn start_audio_session_in_conversation(
        &mut self,
        transport: &mut dyn TransportClient,
        conversation_id: &str,
        options: AudioSessionOptions,
    ) {
        self.start(
            transport,
            AudioRouting::Conversation(conversation_id.to_string()),
            options,
        );
    }

    fn start(
        &mut self,
        transport: &mut dyn TransportClient,
        routing: AudioRouting,
        options: AudioSessionOptions,
    ) {
        self.clear_state(transport);
        debug!(routing = %routing, "Audio session routed");
        self.routing = Some(routing);
        self.options = options;
        if !self.vad_enabled() {
            self.start_remote_session(transport);
        }
    }

    /// Stop the audio session; always succeeds
    pub fn stop_audio_session(&mut self, transport: &mut dyn TransportClient, agent_id: &str) {
        self.log_stop_mismatch(&AudioRouting::Agent(agent_id.to_string()));
        self.clear_state(transport);
    }

    pub fn stop_audio_session_in_conversation(
        &mut self,
        transport: &mut dyn TransportClient,
        conversation_id: &str,
    ) {
        self.log_stop_mismatch(&AudioRouting::Conversation(conversation_id.to_string()));
        self.clear_state(transport);
    }

    fn routing_mismatch(&self, requested: AudioRouting) -> ClientError {
        ClientError::RoutingMismatch {
            expected: self
                .routing
                .as_ref()
                .map_or_else(|| "no audio session".to_string(), ToString::to_string),
            actual: requested.to_string(),
        }
    }

    fn log_stop_mismatch(&self, requested: &AudioRouting) {
        if let Some(current) = &self.routing {
            if current != requested {
                debug!(current = %current, requested = %requested, "Stopping audio session routed elsewhere");
            }
        }
    }

    /// Microphone chunk for an agent; `reference` is the playback audio for echo cancellation
    pub fn send_sound_message(
        &mut self,
        transport: &mut dyn TransportClient,
        agent_id: &str,
        input: &[i16],
        reference: &[i16],
    ) {
        match &self.routing {
            Some(AudioRouting::Agent(id)) if id == agent_id => {
                self.process_audio(transport, input, reference)
            }
            _ => {
                let error = self.routing_mismatch(AudioRouting::Agent(agent_id.to_string()));
                warn!(error = %error, "Dropping sound message");
            }
        }
    }

    /// Microphone chunk for a conversation
    pub fn send_sound_message_to_conversation(
        &mut self,
        transport: &mut dyn TransportClient,
        conversation_id: &str,
        input: &[i16],
        reference: &[i16],
    ) {
        match &self.routing {
            Some(AudioRouting::Conversation(id)) if id == conversation_id => {
                self.process_audio(transport, input, reference)
            }
            _ => {
                let error =
                    self.routing_mismatch(AudioRouting::Conversation(conversation_id.to_string()));
                warn!(error = %error, "Dropping sound message");
            }
        }
    }

    /// Run one chunk through echo cancellation and voice gating
    pub fn process_audio(&mut self, transport: &mut dyn TransportClient, input: &[i16], reference: &[i16]) {
        let filtered = match (&mut self.echo_canceller, reference.is_empty()) {
            (Some(canceller), false) => apply_echo_cancellation(canceller.as_mut(), input, reference).0,
            _ => input.to_vec(),
        };
        let data = samples_to_bytes(&filtered);

        if !self.vad_enabled() {
            self.send_audio(transport, data);
            return;
        }
        let speech_probability = self
            .vad
            .as_mut()
            .map(|vad| vad.speech_probability(&normalize_samples(&filtered)))
            .unwrap_or(0.0);

        if speech_probability > VAD_SPEECH_THRESHOLD {
            self.start_remote_session(transport);
            self.queue.push_back(data);
            self.flush_queue(transport);
            self.silence_counter = 0;
            return;
        }

        if !self.session_active {
            self.queue.push_back(data);
            if self.queue.len() > VAD_LOOKBACK_CHUNKS {
                self.queue.pop_front();
                self.stats.chunks_dropped += 1;
            }
            return;
        }

        self.send_audio(transport, data);
        self.silence_counter += 1;
        if self.silence_counter > VAD_SILENCE_CHUNKS {
            self.stop_remote_session(transport);
            self.silence_counter = 0;
        }
    }

    fn flush_queue(&mut self, transport: &mut dyn TransportClient) {
        while let Some(chunk) = self.queue.pop_front() {
            self.send_audio(transport, chunk);
        }
    }

    fn send_audio(&mut self, transport: &mut dyn TransportClient, data: Vec<u8>) {
        let Some(routing) = &self.routing else {
            warn!("Audio has no routing, dropping");
            return;
        };
        match routing {
            AudioRouting::Agent(agent_id) => transport.send_sound_message(agent_id, &data),
            AudioRouting::Conversation(conversation_id) => {
                transport.send_sound_message_to_conversation(conversation_id, &data)
            }
        }
        if let Some(dumper) = &self.dumper {
            dumper.write(&data);
        }
        self.stats.chunks_sent += 1;
    }

    fn start_remote_session(&mut self, transport: &mut dyn TransportClient) {
        if self.session_active {
            return;
        }
        let Some(routing) = &self.routing else {
            return;
        };
        match routing {
            AudioRouting::Agent(agent_id) => transport.start_audio_session(agent_id, self.options),
            AudioRouting::Conversation(conversation_id) => {
                transport.start_audio_session_in_conversation(conversation_id, self.options)
            }
        }
        self.session_active = true;
        self.stats.sessions_opened += 1;
        info!(routing = %routing, "Audio session opened");
    }

    fn stop_remote_session(&mut self, transport: &mut dyn TransportClient) {
        if !self.session_active {
            return;
        }
        if let Some(routing) = &self.routing {
            match routing {
                AudioRouting::Agent(agent_id) => transport.stop_audio_session(agent_id),
                AudioRouting::Conversation(conversation_id) => {
                    transport.stop_audio_session_in_conversation(conversation_id)
                }
            }
            info!(routing = %routing, "Audio session closed");
        }
        self.session_active = false;
        self.stats.sessions_closed += 1;
    }

    /// Close the remote session and forget routing, lookback and counters
    pub fn clear_state(&mut self, transport: &mut dyn TransportClient) {
        self.stop_remote_session(transport);
        self.routing = None;
        self.queue.clear();
        self.options = AudioSessionOptions::default();
        self.silence_counter = 0;
        if let Some(canceller) = &mut self.echo_canceller {
            canceller.reset();
        }
        if let Some(vad) = &mut self.vad {
            vad.reset();
        }
    }
}
