//! Packet definitions
//!
//! A packet is an immutable event travelling between the client and the
//! remote agent service. Routing metadata decides which local character or
//! player receives it.
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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{InworldError, Result};
use crate::schemas::AgentInfo;

/// Kind of actor on either end of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    #[default]
    Unknown,
    Player,
    Agent,
    World,
}

/// Packet endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// Agent id for agents, empty for the player and the world
    pub name: String,
}

impl Actor {
    pub fn new(actor_type: ActorType, name: impl Into<String>) -> Self {
        Self {
            actor_type,
            name: name.into(),
        }
    }

    pub fn player() -> Self {
        Self::new(ActorType::Player, "")
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self::new(ActorType::Agent, agent_id)
    }

    pub fn world() -> Self {
        Self::new(ActorType::World, "")
    }
}

/// Routing metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Routing {
    pub source: Actor,
    pub target: Actor,
    #[serde(default)]
    pub conversation_id: String,
}

impl Routing {
    pub fn new(source: Actor, target: Actor, conversation_id: impl Into<String>) -> Self {
        Self {
            source,
            target,
            conversation_id: conversation_id.into(),
        }
    }

    /// Player speaking to a single agent
    pub fn player_to_agent(agent_id: impl Into<String>) -> Self {
        Self::new(Actor::player(), Actor::agent(agent_id), "")
    }

    /// Agent speaking to the player
    pub fn agent_to_player(agent_id: impl Into<String>) -> Self {
        Self::new(Actor::agent(agent_id), Actor::player(), "")
    }

    /// Player speaking into a conversation
    pub fn player_to_conversation(conversation_id: impl Into<String>) -> Self {
        Self::new(Actor::player(), Actor::default(), conversation_id)
    }
}

/// Packet identity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketId {
    pub uid: String,
    #[serde(default)]
    pub utterance_id: String,
    #[serde(default)]
    pub interaction_id: String,
}

impl PacketId {
    /// Fresh packet id with a random uid and no interaction
    pub fn generate() -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_interaction(
        interaction_id: impl Into<String>,
        utterance_id: impl Into<String>,
    ) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            utterance_id: utterance_id.into(),
            interaction_id: interaction_id.into(),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEvent {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEvent {
    pub chunk: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisemeInfo {
    pub code: String,
    pub timestamp: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDataEvent {
    /// 16-bit little-endian PCM
    pub chunk: Vec<u8>,
    #[serde(default)]
    pub viseme_infos: Vec<VisemeInfo>,
    #[serde(default = "default_true")]
    pub is_final: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceEvent {
    /// Silence duration in seconds
    pub duration: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    #[default]
    Unknown,
    AudioSessionStart,
    AudioSessionEnd,
    InteractionEnd,
    TtsPlaybackStart,
    TtsPlaybackEnd,
    TtsPlaybackMute,
    TtsPlaybackUnmute,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub action: ControlAction,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationUpdateType {
    #[default]
    Unknown,
    Started,
    Updated,
    Evicted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdateEvent {
    pub update_type: ConversationUpdateType,
    /// Agent ids participating in the conversation
    pub agents: Vec<String>,
    #[serde(default)]
    pub include_player: bool,
}

/// Scene load / change scene / load characters result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneStatusEvent {
    #[serde(default)]
    pub scene_name: String,
    #[serde(default)]
    pub scene_description: String,
    #[serde(default)]
    pub scene_display_name: String,
    pub agent_infos: Vec<AgentInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionalBehavior {
    #[default]
    Neutral,
    Disgust,
    Contempt,
    Belligerence,
    Domineering,
    Criticism,
    Anger,
    Tension,
    TenseHumor,
    Defensiveness,
    Whining,
    Sadness,
    Stonewalling,
    Interest,
    Validation,
    Affection,
    Humor,
    Surprise,
    Joy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionStrength {
    Unspecified,
    Weak,
    Strong,
    #[default]
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionEvent {
    pub behavior: EmotionalBehavior,
    pub strength: EmotionStrength,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponseEvent {
    pub interaction_id: String,
    pub utterance_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub name: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationEvent {
    pub attraction: i32,
    pub familiar: i32,
    pub flirtatious: i32,
    pub respect: i32,
    pub trust: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceActivityEvent {
    pub voice_detected: bool,
}

/// Packet payload variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum PacketPayload {
    Text(TextEvent),
    Data(DataEvent),
    AudioData(AudioDataEvent),
    Silence(SilenceEvent),
    Control(ControlEvent),
    ConversationUpdate(ConversationUpdateEvent),
    SceneStatus(SceneStatusEvent),
    Emotion(EmotionEvent),
    CancelResponse(CancelResponseEvent),
    Custom(CustomEvent),
    Relation(RelationEvent),
    VoiceActivity(VoiceActivityEvent),
}

impl PacketPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            PacketPayload::Text(_) => "text",
            PacketPayload::Data(_) => "data",
            PacketPayload::AudioData(_) => "audio_data",
            PacketPayload::Silence(_) => "silence",
            PacketPayload::Control(_) => "control",
            PacketPayload::ConversationUpdate(_) => "conversation_update",
            PacketPayload::SceneStatus(_) => "scene_status",
            PacketPayload::Emotion(_) => "emotion",
            PacketPayload::CancelResponse(_) => "cancel_response",
            PacketPayload::Custom(_) => "custom",
            PacketPayload::Relation(_) => "relation",
            PacketPayload::VoiceActivity(_) => "voice_activity",
        }
    }
}

/// Immutable packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub packet_id: PacketId,
    pub routing: Routing,
    pub timestamp: DateTime<Utc>,
    pub payload: PacketPayload,
}

impl Packet {
    /// Create a packet with a fresh id
    pub fn new(routing: Routing, payload: PacketPayload) -> Self {
        Self {
            packet_id: PacketId::generate(),
            routing,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a packet belonging to an interaction
    pub fn with_id(packet_id: PacketId, routing: Routing, payload: PacketPayload) -> Self {
        Self {
            packet_id,
            routing,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Parse a packet from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let packet: Packet = serde_json::from_str(json)?;
        packet.validate()?;
        Ok(packet)
    }

    /// Validate routing and payload consistency
    pub fn validate(&self) -> Result<()> {
        if self.packet_id.uid.is_empty() {
            return Err(InworldError::MissingField("packet_id.uid".to_string()));
        }
        if self.routing.source.actor_type == ActorType::Agent && self.routing.source.name.is_empty() {
            return Err(InworldError::MissingField("routing.source.name".to_string()));
        }
        if let PacketPayload::CancelResponse(event) = &self.payload {
            if event.interaction_id.is_empty() {
                return Err(InworldError::InvalidPayload(
                    "cancel response without interaction id".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn interaction_id(&self) -> &str {
        &self.packet_id.interaction_id
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}:{} -> {:?}:{}",
            self.payload.kind(),
            self.routing.source.actor_type,
            self.routing.source.name,
            self.routing.target.actor_type,
            self.routing.target.name,
        )?;
        if !self.routing.conversation_id.is_empty() {
            write!(f, " conversation {}", self.routing.conversation_id)?;
        }
        if !self.packet_id.interaction_id.is_empty() {
            write!(f, " interaction {}", self.packet_id.interaction_id)?;
        }
        match &self.payload {
            PacketPayload::Text(event) => write!(f, " \"{}\"", event.text),
            PacketPayload::AudioData(event) => write!(f, " {} bytes", event.chunk.len()),
            PacketPayload::Control(event) => write!(f, " {:?}", event.action),
            PacketPayload::ConversationUpdate(event) => {
                write!(f, " {:?} {} agent(s)", event.update_type, event.agents.len())
            }
            PacketPayload::SceneStatus(event) => {
                write!(f, " {} {} agent(s)", event.scene_name, event.agent_infos.len())
            }
            _ => Ok(()),
        }
    }
}
