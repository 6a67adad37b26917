//! Transport seam
//!
//! The transport owns the actual connection to the service: it opens the
//! stream, serializes packets and signs requests. The session only talks
//! to it through [`TransportClient`] and hears back through the
//! [`EventSink`] handed over in [`TransportClient::init`].
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
use inworld_types::{
    AudioSessionOptions, CapabilitySet, ClientOptions, ConnectionError, ConnectionState, Packet,
    PlayerProfile, SdkInfo, SessionInfo, SessionToken,
};
use std::collections::HashMap;

/// Client side of the service connection
///
/// Calls are made from the session thread and must not block on the
/// network. State changes, inbound packets and save results are reported
/// asynchronously through the sink.
pub trait TransportClient: Send {
    /// Wire the transport to the session's event queue
    fn init(&mut self, sdk_info: SdkInfo, sink: EventSink);

    fn start_client(&mut self, options: ClientOptions, session_info: SessionInfo);
    fn stop_client(&mut self);
    fn pause_client(&mut self);
    fn resume_client(&mut self);
    /// Release every resource; the transport is not reused afterwards
    fn destroy_client(&mut self);

    fn connection_state(&self) -> ConnectionState;
    fn connection_error(&self) -> ConnectionError;
    fn session_token(&self) -> SessionToken;
    fn capabilities(&self) -> CapabilitySet;

    // Agent-routed messages

    fn send_text_message(&mut self, agent_id: &str, text: &str) -> Packet;
    fn send_custom_event(
        &mut self,
        agent_id: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Packet;
    fn send_narration_event(&mut self, agent_id: &str, content: &str) -> Packet;
    /// `data` is 16 kHz mono 16-bit little-endian PCM
    fn send_sound_message(&mut self, agent_id: &str, data: &[u8]);
    fn start_audio_session(&mut self, agent_id: &str, options: AudioSessionOptions);
    fn stop_audio_session(&mut self, agent_id: &str);
    fn cancel_response(&mut self, agent_id: &str, interaction_id: &str, utterance_ids: &[String]);

    // Conversation-routed messages

    fn send_text_message_to_conversation(&mut self, conversation_id: &str, text: &str) -> Packet;
    fn send_custom_event_to_conversation(
        &mut self,
        conversation_id: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Packet;
    fn send_sound_message_to_conversation(&mut self, conversation_id: &str, data: &[u8]);
    fn start_audio_session_in_conversation(
        &mut self,
        conversation_id: &str,
        options: AudioSessionOptions,
    );
    fn stop_audio_session_in_conversation(&mut self, conversation_id: &str);

    /// Create, update or leave a conversation, returning its (possibly new) id
    ///
    /// An empty `agent_ids` list ends the conversation and yields an empty id.
    fn update_conversation(
        &mut self,
        conversation_id: &str,
        agent_ids: &[String],
        include_player: bool,
    ) -> String;

    // Session mutation

    fn load_scene(&mut self, scene_name: &str);
    fn load_characters(&mut self, brain_names: &[String]);
    fn unload_characters(&mut self, brain_names: &[String]);
    fn load_player_profile(&mut self, profile: &PlayerProfile);
    fn load_capabilities(&mut self, capabilities: &CapabilitySet);
    fn send_interaction_feedback(&mut self, interaction_id: &str, is_like: bool, message: &str);

    /// Request the session state; answered with
    /// [`TransportEvent::SaveCompleted`](crate::TransportEvent::SaveCompleted)
    fn save_session_state(&mut self, request_id: SaveRequestId);
}
