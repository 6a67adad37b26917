//! Players
//!
//! The player is the local human. It picks which characters it talks to;
//! the session turns that target list into a conversation with the
//! service and keeps the conversation id current.
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


use crate::character::CharacterId;
use inworld_types::{AudioSessionOptions, Packet, PacketPayload};
use std::fmt;
use tracing::debug;

/// Handle of a player registered with a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub(crate) u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// Host-side observer of one player
pub trait PlayerHandler: Send {
    fn on_target_character_added(&mut self, _character: CharacterId) {}
    fn on_target_character_removed(&mut self, _character: CharacterId) {}
    fn on_target_characters_changed(&mut self, _targets: &[CharacterId]) {}
    /// The conversation id changed (possibly to empty)
    fn on_conversation_changed(&mut self, _conversation_id: &str) {}
    fn on_voice_detection(&mut self, _voice_detected: bool) {}
    /// Any packet routed to the player's conversation
    fn on_packet(&mut self, _packet: &Packet) {}
}

pub struct Player {
    id: PlayerId,
    pub(crate) conversation_id: String,
    pub(crate) target_characters: Vec<CharacterId>,
    pub(crate) conversation_participant: bool,
    pub(crate) has_audio_session: bool,
    /// Options of the running (or last interrupted) audio session
    pub(crate) audio_session_options: AudioSessionOptions,
    voice_detected: bool,
    handlers: Vec<Box<dyn PlayerHandler>>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .field("target_characters", &self.target_characters)
            .field("conversation_participant", &self.conversation_participant)
            .field("has_audio_session", &self.has_audio_session)
            .field("voice_detected", &self.voice_detected)
            .finish()
    }
}

impl Player {
    pub(crate) fn new(id: PlayerId) -> Self {
        Self {
            id,
            conversation_id: String::new(),
            target_characters: Vec::new(),
            conversation_participant: true,
            has_audio_session: false,
            audio_session_options: AudioSessionOptions::default(),
            voice_detected: false,
            handlers: Vec::new(),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn target_characters(&self) -> &[CharacterId] {
        &self.target_characters
    }

    pub fn is_conversation_participant(&self) -> bool {
        self.conversation_participant
    }

    pub fn has_audio_session(&self) -> bool {
        self.has_audio_session
    }

    pub fn audio_session_options(&self) -> AudioSessionOptions {
        self.audio_session_options
    }

    pub fn voice_detected(&self) -> bool {
        self.voice_detected
    }

    pub fn add_handler(&mut self, handler: Box<dyn PlayerHandler>) {
        self.handlers.push(handler);
    }

    pub(crate) fn notify_target_added(&mut self, character: CharacterId) {
        for handler in &mut self.handlers {
            handler.on_target_character_added(character);
        }
    }

    pub(crate) fn notify_target_removed(&mut self, character: CharacterId) {
        for handler in &mut self.handlers {
            handler.on_target_character_removed(character);
        }
    }

    pub(crate) fn notify_targets_changed(&mut self) {
        let targets = self.target_characters.clone();
        for handler in &mut self.handlers {
            handler.on_target_characters_changed(&targets);
        }
    }

    pub(crate) fn notify_conversation_changed(&mut self) {
        debug!(
            player = %self.id,
            conversation_id = %self.conversation_id,
            "Player conversation changed"
        );
        let conversation_id = self.conversation_id.clone();
        for handler in &mut self.handlers {
            handler.on_conversation_changed(&conversation_id);
        }
    }

    fn set_voice_detected(&mut self, voice_detected: bool) {
        if self.voice_detected == voice_detected {
            return;
        }
        self.voice_detected = voice_detected;
        for handler in &mut self.handlers {
            handler.on_voice_detection(voice_detected);
        }
    }

    pub(crate) fn handle_packet(&mut self, packet: &Packet) {
        if let PacketPayload::VoiceActivity(event) = &packet.payload {
            self.set_voice_detected(event.voice_detected);
        }
        for handler in &mut self.handlers {
            handler.on_packet(packet);
        }
    }
}
