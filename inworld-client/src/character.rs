//! Characters
//!
//! A character is the local stand-in for one remote agent. It is created
//! with a brain name, registered with a session, and possessed once the
//! service hands out an agent id for that brain.
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


use crate::player::PlayerId;
use inworld_types::{
    to_short_brain_name, AgentInfo, AudioDataEvent, ControlEvent, CustomEvent, EmotionEvent,
    Packet, PacketPayload, RelationEvent, SilenceEvent, TextEvent,
};
use std::fmt;
use tracing::debug;

/// Handle of a character registered with a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacterId(pub(crate) u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "character#{}", self.0)
    }
}

/// Host-side observer of one character
///
/// Every method has an empty default so hosts implement only what they use.
pub trait CharacterHandler: Send {
    fn on_text(&mut self, _packet: &Packet, _event: &TextEvent) {}
    fn on_audio(&mut self, _packet: &Packet, _event: &AudioDataEvent) {}
    fn on_silence(&mut self, _packet: &Packet, _event: &SilenceEvent) {}
    fn on_control(&mut self, _packet: &Packet, _event: &ControlEvent) {}
    fn on_emotion(&mut self, _packet: &Packet, _event: &EmotionEvent) {}
    fn on_custom(&mut self, _packet: &Packet, _event: &CustomEvent) {}
    fn on_relation(&mut self, _packet: &Packet, _event: &RelationEvent) {}
    /// Any packet delivered to the character, after the typed callback
    fn on_packet(&mut self, _packet: &Packet) {}
    fn on_possessed(&mut self, _possessed: bool) {}
    fn on_target_player_changed(&mut self, _player: Option<PlayerId>) {}
}

pub struct Character {
    id: CharacterId,
    agent_info: AgentInfo,
    target_player: Option<PlayerId>,
    handlers: Vec<Box<dyn CharacterHandler>>,
}

impl fmt::Debug for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Character")
            .field("id", &self.id)
            .field("agent_info", &self.agent_info)
            .field("target_player", &self.target_player)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Character {
    pub(crate) fn new(id: CharacterId, brain_name: &str) -> Self {
        Self {
            id,
            agent_info: AgentInfo {
                brain_name: brain_name.to_string(),
                ..Default::default()
            },
            target_player: None,
            handlers: Vec::new(),
        }
    }

    pub fn id(&self) -> CharacterId {
        self.id
    }

    pub fn agent_info(&self) -> &AgentInfo {
        &self.agent_info
    }

    pub fn brain_name(&self) -> &str {
        &self.agent_info.brain_name
    }

    /// Brain name reduced to its last segment, the session's lookup key
    pub fn short_brain_name(&self) -> String {
        to_short_brain_name(&self.agent_info.brain_name)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_info.agent_id
    }

    pub fn is_possessed(&self) -> bool {
        !self.agent_info.agent_id.is_empty()
    }

    pub fn target_player(&self) -> Option<PlayerId> {
        self.target_player
    }

    pub fn add_handler(&mut self, handler: Box<dyn CharacterHandler>) {
        self.handlers.push(handler);
    }

    pub(crate) fn possess(&mut self, agent_info: &AgentInfo) {
        debug!(
            character = %self.id,
            brain_name = %agent_info.brain_name,
            agent_id = %agent_info.agent_id,
            "Character possessed"
        );
        self.agent_info.agent_id = agent_info.agent_id.clone();
        self.agent_info.given_name = agent_info.given_name.clone();
        for handler in &mut self.handlers {
            handler.on_possessed(true);
        }
    }

    /// Drop the agent binding; the brain name is kept for the next load
    pub(crate) fn unpossess(&mut self) {
        let was_possessed = self.is_possessed();
        self.agent_info.agent_id.clear();
        self.agent_info.given_name.clear();
        if was_possessed {
            debug!(character = %self.id, "Character unpossessed");
            for handler in &mut self.handlers {
                handler.on_possessed(false);
            }
        }
    }

    pub(crate) fn set_target_player(&mut self, player: Option<PlayerId>) {
        if self.target_player == player {
            return;
        }
        self.target_player = player;
        for handler in &mut self.handlers {
            handler.on_target_player_changed(player);
        }
    }

    pub(crate) fn handle_packet(&mut self, packet: &Packet) {
        for handler in &mut self.handlers {
            match &packet.payload {
                PacketPayload::Text(event) => handler.on_text(packet, event),
                PacketPayload::AudioData(event) => handler.on_audio(packet, event),
                PacketPayload::Silence(event) => handler.on_silence(packet, event),
                PacketPayload::Control(event) => handler.on_control(packet, event),
                PacketPayload::Emotion(event) => handler.on_emotion(packet, event),
                PacketPayload::Custom(event) => handler.on_custom(packet, event),
                PacketPayload::Relation(event) => handler.on_relation(packet, event),
                _ => {}
            }
            handler.on_packet(packet);
        }
    }
}
