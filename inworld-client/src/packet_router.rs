//! Packet routing
//!
//! Decides which characters and which player receive an inbound packet,
//! and keeps the conversation tables current before anyone is told.
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
use crate::player::PlayerId;
use inworld_types::{
    workspace_of, ActorType, AgentInfo, ConversationUpdateType, Packet, PacketPayload,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Receivers of one packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Characters in delivery order
    pub characters: Vec<CharacterId>,
    pub player: Option<PlayerId>,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.player.is_none()
    }
}

/// Session-level consequence of a packet, applied by the owner
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEffect {
    None,
    /// The service dropped a conversation; `player` was bound to it
    ConversationEvicted {
        conversation_id: String,
        player: Option<PlayerId>,
    },
    /// A scene (or character batch) finished loading
    AgentsLoaded {
        workspace: Option<String>,
        agent_infos: Vec<AgentInfo>,
    },
}

/// Routing statistics
#[derive(Debug, Clone, Default)]
pub struct RouteStats {
    /// Packets routed
    pub packets_routed: u64,
    /// Packets that reached nobody
    pub packets_unrouted: u64,
    /// Individual handler deliveries
    pub deliveries: u64,
}

/// Routing tables
#[derive(Debug, Default)]
pub struct PacketRouter {
    /// Possessed characters only
    agent_to_character: HashMap<String, CharacterId>,
    conversation_agents: HashMap<String, Vec<String>>,
    conversation_player: HashMap<String, PlayerId>,
    stats: RouteStats,
}

impl PacketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_agent(&mut self, agent_id: &str, character: CharacterId) {
        self.agent_to_character.insert(agent_id.to_string(), character);
    }

    pub fn unbind_agent(&mut self, agent_id: &str) -> Option<CharacterId> {
        self.agent_to_character.remove(agent_id)
    }

    pub fn clear_agents(&mut self) {
        self.agent_to_character.clear();
    }

    pub fn character_for_agent(&self, agent_id: &str) -> Option<CharacterId> {
        self.agent_to_character.get(agent_id).copied()
    }

    pub fn possessed_count(&self) -> usize {
        self.agent_to_character.len()
    }

    pub fn bind_player(&mut self, conversation_id: &str, player: PlayerId) {
        self.conversation_player.insert(conversation_id.to_string(), player);
    }

    pub fn unbind_player(&mut self, conversation_id: &str) -> Option<PlayerId> {
        self.conversation_player.remove(conversation_id)
    }

    pub fn player_for_conversation(&self, conversation_id: &str) -> Option<PlayerId> {
        self.conversation_player.get(conversation_id).copied()
    }

    pub fn agents_in_conversation(&self, conversation_id: &str) -> Option<&[String]> {
        self.conversation_agents.get(conversation_id).map(|v| v.as_slice())
    }

    pub fn stats(&self) -> &RouteStats {
        &self.stats
    }

    /// Update conversation tables for a packet, before it is routed
    pub fn apply_bookkeeping(&mut self, packet: &Packet) -> RouteEffect {
        match &packet.payload {
            PacketPayload::ConversationUpdate(event) => {
                let conversation_id = &packet.routing.conversation_id;
                info!(
                    conversation_id = %conversation_id,
                    update = ?event.update_type,
                    agents = event.agents.len(),
                    "Conversation update"
                );
                for agent in &event.agents {
                    debug!(conversation_id = %conversation_id, agent_id = %agent, "Conversation member");
                }
                if event.update_type == ConversationUpdateType::Evicted {
                    self.conversation_agents.remove(conversation_id);
                    let player = self.conversation_player.remove(conversation_id);
                    RouteEffect::ConversationEvicted {
                        conversation_id: conversation_id.clone(),
                        player,
                    }
                } else {
                    self.conversation_agents
                        .insert(conversation_id.clone(), event.agents.clone());
                    RouteEffect::None
                }
            }
            PacketPayload::SceneStatus(event) => RouteEffect::AgentsLoaded {
                workspace: workspace_of(&event.scene_name).map(str::to_string),
                agent_infos: event.agent_infos.clone(),
            },
            _ => RouteEffect::None,
        }
    }

    /// Compute the receivers of a packet
    ///
    /// Agent source wins over agent target; player-sourced packets fan out
    /// to the conversation members except the explicit target. The player
    /// bound to the conversation is added on top of any of these.
    pub fn route(&mut self, packet: &Packet) -> Delivery {
        let source = &packet.routing.source;
        let target = &packet.routing.target;
        let conversation_id = &packet.routing.conversation_id;
        let mut delivery = Delivery::default();

        if source.actor_type == ActorType::Agent {
            if let Some(character) = self.agent_to_character.get(&source.name) {
                delivery.characters.push(*character);
            }
        } else if target.actor_type == ActorType::Agent {
            if let Some(character) = self.agent_to_character.get(&target.name) {
                delivery.characters.push(*character);
            }
        } else if source.actor_type == ActorType::Player {
            if let Some(agent_ids) = self.conversation_agents.get(conversation_id) {
                for agent_id in agent_ids {
                    if *agent_id == target.name {
                        continue;
                    }
                    if let Some(character) = self.agent_to_character.get(agent_id) {
                        delivery.characters.push(*character);
                    }
                }
            }
        }

        delivery.player = self.conversation_player.get(conversation_id).copied();

        self.stats.packets_routed += 1;
        if delivery.is_empty() {
            self.stats.packets_unrouted += 1;
        }
        self.stats.deliveries +=
            delivery.characters.len() as u64 + u64::from(delivery.player.is_some());
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inworld_types::{
        Actor, ConversationUpdateEvent, Routing, SceneStatusEvent, TextEvent,
    };

    fn text(routing: Routing) -> Packet {
        Packet::new(
            routing,
            PacketPayload::Text(TextEvent {
                text: "hi".to_string(),
                is_final: true,
            }),
        )
    }

    fn conversation_update(
        conversation_id: &str,
        update_type: ConversationUpdateType,
        agents: &[&str],
    ) -> Packet {
        Packet::new(
            Routing::new(Actor::world(), Actor::player(), conversation_id),
            PacketPayload::ConversationUpdate(ConversationUpdateEvent {
                update_type,
                agents: agents.iter().map(|a| a.to_string()).collect(),
                include_player: true,
            }),
        )
    }

    fn router_with_agents() -> PacketRouter {
        let mut router = PacketRouter::new();
        router.bind_agent("a1", CharacterId(1));
        router.bind_agent("a2", CharacterId(2));
        router.bind_agent("a3", CharacterId(3));
        router
    }

    #[test]
    fn test_agent_source_routes_to_single_character() {
        let mut router = router_with_agents();
        let delivery = router.route(&text(Routing::agent_to_player("a2")));
        assert_eq!(delivery.characters, vec![CharacterId(2)]);
        assert_eq!(delivery.player, None);
    }

    #[test]
    fn test_unknown_agent_source_routes_nowhere() {
        let mut router = router_with_agents();
        // target is an agent too, but the source rule takes precedence
        let packet = text(Routing::new(Actor::agent("ghost"), Actor::agent("a1"), ""));
        let delivery = router.route(&packet);
        assert!(delivery.is_empty());
        assert_eq!(router.stats().packets_unrouted, 1);
    }

    #[test]
    fn test_agent_target_routes_to_character() {
        let mut router = router_with_agents();
        let delivery = router.route(&text(Routing::player_to_agent("a3")));
        assert_eq!(delivery.characters, vec![CharacterId(3)]);
    }

    #[test]
    fn test_player_source_fans_out_to_conversation() {
        let mut router = router_with_agents();
        router.apply_bookkeeping(&conversation_update(
            "c1",
            ConversationUpdateType::Started,
            &["a1", "a2", "a3"],
        ));
        router.bind_player("c1", PlayerId(9));

        let delivery = router.route(&text(Routing::player_to_conversation("c1")));
        assert_eq!(
            delivery.characters,
            vec![CharacterId(1), CharacterId(2), CharacterId(3)]
        );
        assert_eq!(delivery.player, Some(PlayerId(9)));
    }

    #[test]
    fn test_player_source_skips_named_target() {
        let mut router = router_with_agents();
        router.apply_bookkeeping(&conversation_update(
            "c1",
            ConversationUpdateType::Started,
            &["a1", "a2"],
        ));
        let packet = text(Routing::new(
            Actor::player(),
            Actor::new(ActorType::World, "a1"),
            "c1",
        ));
        let delivery = router.route(&packet);
        assert_eq!(delivery.characters, vec![CharacterId(2)]);
    }

    #[test]
    fn test_conversation_update_replaces_members() {
        let mut router = router_with_agents();
        router.apply_bookkeeping(&conversation_update(
            "c1",
            ConversationUpdateType::Started,
            &["a1"],
        ));
        router.apply_bookkeeping(&conversation_update(
            "c1",
            ConversationUpdateType::Updated,
            &["a2", "a3"],
        ));
        assert_eq!(
            router.agents_in_conversation("c1"),
            Some(&["a2".to_string(), "a3".to_string()][..])
        );
    }

    #[test]
    fn test_eviction_clears_tables_before_routing() {
        let mut router = router_with_agents();
        router.apply_bookkeeping(&conversation_update(
            "c1",
            ConversationUpdateType::Started,
            &["a1"],
        ));
        router.bind_player("c1", PlayerId(4));

        let evicted = conversation_update("c1", ConversationUpdateType::Evicted, &[]);
        let effect = router.apply_bookkeeping(&evicted);
        assert_eq!(
            effect,
            RouteEffect::ConversationEvicted {
                conversation_id: "c1".to_string(),
                player: Some(PlayerId(4)),
            }
        );
        assert!(router.agents_in_conversation("c1").is_none());
        assert!(router.player_for_conversation("c1").is_none());
        assert!(router.route(&evicted).is_empty());
    }

    #[test]
    fn test_scene_status_reports_workspace() {
        let mut router = PacketRouter::new();
        let packet = Packet::new(
            Routing::new(Actor::world(), Actor::player(), ""),
            PacketPayload::SceneStatus(SceneStatusEvent {
                scene_name: "workspaces/tavern-ws/scenes/inn".to_string(),
                scene_description: String::new(),
                scene_display_name: String::new(),
                agent_infos: vec![AgentInfo::new("workspaces/tavern-ws/characters/bob", "a1", "Bob")],
            }),
        );
        match router.apply_bookkeeping(&packet) {
            RouteEffect::AgentsLoaded {
                workspace,
                agent_infos,
            } => {
                assert_eq!(workspace.as_deref(), Some("tavern-ws"));
                assert_eq!(agent_infos.len(), 1);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }
}
