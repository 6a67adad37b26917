//! Recording transport for unit tests
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


use crate::dispatch::{EventSink, SaveRequestId};
use crate::transport::TransportClient;
use inworld_types::{
    AudioSessionOptions, CapabilitySet, ClientOptions, ConnectionError, ConnectionState, Packet,
    PacketPayload, PlayerProfile, Routing, SdkInfo, SessionInfo, SessionToken, TextEvent,
    CustomEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(SessionInfo),
    Stop,
    Pause,
    Resume,
    Destroy,
    Text(String, String),
    TextToConversation(String, String),
    Custom(String, String),
    CustomToConversation(String, String),
    Narration(String, String),
    Sound(String, Vec<u8>),
    SoundToConversation(String, Vec<u8>),
    StartAudio(String),
    StartAudioInConversation(String),
    StopAudio(String),
    StopAudioInConversation(String),
    UpdateConversation(String, Vec<String>, bool),
    Cancel(String, String),
    LoadScene(String),
    LoadCharacters(Vec<String>),
    UnloadCharacters(Vec<String>),
    Feedback(String, bool),
    Save(SaveRequestId),
}

#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub error: Arc<Mutex<ConnectionError>>,
    pub sink: Arc<Mutex<Option<EventSink>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Sink handed over by the session at init
    pub fn sink(&self) -> EventSink {
        self.sink.lock().clone().expect("transport not initialized")
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

fn text_packet(routing: Routing, text: &str) -> Packet {
    Packet::new(
        routing,
        PacketPayload::Text(TextEvent {
            text: text.to_string(),
            is_final: true,
        }),
    )
}

impl TransportClient for RecordingTransport {
    fn init(&mut self, _sdk_info: SdkInfo, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn start_client(&mut self, _options: ClientOptions, session_info: SessionInfo) {
        self.record(Call::Start(session_info));
    }

    fn stop_client(&mut self) {
        self.record(Call::Stop);
    }

    fn pause_client(&mut self) {
        self.record(Call::Pause);
    }

    fn resume_client(&mut self) {
        self.record(Call::Resume);
    }

    fn destroy_client(&mut self) {
        self.record(Call::Destroy);
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    fn connection_error(&self) -> ConnectionError {
        self.error.lock().clone()
    }

    fn session_token(&self) -> SessionToken {
        SessionToken {
            token: "token".to_string(),
            expiration_time: 0,
            session_id: "session-1".to_string(),
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::default()
    }

    fn send_text_message(&mut self, agent_id: &str, text: &str) -> Packet {
        self.record(Call::Text(agent_id.to_string(), text.to_string()));
        text_packet(Routing::player_to_agent(agent_id), text)
    }

    fn send_custom_event(&mut self, agent_id: &str, name: &str, params: &HashMap<String, String>) -> Packet {
        self.record(Call::Custom(agent_id.to_string(), name.to_string()));
        Packet::new(
            Routing::player_to_agent(agent_id),
            PacketPayload::Custom(CustomEvent {
                name: name.to_string(),
                params: params.clone(),
            }),
        )
    }

    fn send_narration_event(&mut self, agent_id: &str, content: &str) -> Packet {
        self.record(Call::Narration(agent_id.to_string(), content.to_string()));
        text_packet(Routing::player_to_agent(agent_id), content)
    }

    fn send_sound_message(&mut self, agent_id: &str, data: &[u8]) {
        self.record(Call::Sound(agent_id.to_string(), data.to_vec()));
    }

    fn start_audio_session(&mut self, agent_id: &str, _options: AudioSessionOptions) {
        self.record(Call::StartAudio(agent_id.to_string()));
    }

    fn stop_audio_session(&mut self, agent_id: &str) {
        self.record(Call::StopAudio(agent_id.to_string()));
    }

    fn cancel_response(&mut self, agent_id: &str, interaction_id: &str, _utterance_ids: &[String]) {
        self.record(Call::Cancel(agent_id.to_string(), interaction_id.to_string()));
    }

    fn send_text_message_to_conversation(&mut self, conversation_id: &str, text: &str) -> Packet {
        self.record(Call::TextToConversation(conversation_id.to_string(), text.to_string()));
        text_packet(Routing::player_to_conversation(conversation_id), text)
    }

    fn send_custom_event_to_conversation(
        &mut self,
        conversation_id: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Packet {
        self.record(Call::CustomToConversation(conversation_id.to_string(), name.to_string()));
        Packet::new(
            Routing::player_to_conversation(conversation_id),
            PacketPayload::Custom(CustomEvent {
                name: name.to_string(),
                params: params.clone(),
            }),
        )
    }

    fn send_sound_message_to_conversation(&mut self, conversation_id: &str, data: &[u8]) {
        self.record(Call::SoundToConversation(conversation_id.to_string(), data.to_vec()));
    }

    fn start_audio_session_in_conversation(&mut self, conversation_id: &str, _options: AudioSessionOptions) {
        self.record(Call::StartAudioInConversation(conversation_id.to_string()));
    }

    fn stop_audio_session_in_conversation(&mut self, conversation_id: &str) {
        self.record(Call::StopAudioInConversation(conversation_id.to_string()));
    }

    /// Stable id per agent set
    fn update_conversation(&mut self, conversation_id: &str, agent_ids: &[String], include_player: bool) -> String {
        self.record(Call::UpdateConversation(
            conversation_id.to_string(),
            agent_ids.to_vec(),
            include_player,
        ));
        if agent_ids.is_empty() {
            return String::new();
        }
        let mut sorted = agent_ids.to_vec();
        sorted.sort();
        format!("conv-{}", sorted.join("+"))
    }

    fn load_scene(&mut self, scene_name: &str) {
        self.record(Call::LoadScene(scene_name.to_string()));
    }

    fn load_characters(&mut self, brain_names: &[String]) {
        self.record(Call::LoadCharacters(brain_names.to_vec()));
    }

    fn unload_characters(&mut self, brain_names: &[String]) {
        self.record(Call::UnloadCharacters(brain_names.to_vec()));
    }

    fn load_player_profile(&mut self, _profile: &PlayerProfile) {}

    fn load_capabilities(&mut self, _capabilities: &CapabilitySet) {}

    fn send_interaction_feedback(&mut self, interaction_id: &str, is_like: bool, _message: &str) {
        self.record(Call::Feedback(interaction_id.to_string(), is_like));
    }

    fn save_session_state(&mut self, request_id: SaveRequestId) {
        self.record(Call::Save(request_id));
    }
}
