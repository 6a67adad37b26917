//! In-process loopback service
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
use crossbeam_channel::{unbounded, Receiver, Sender};
use inworld_types::{
    to_long_brain_name, to_short_brain_name, Actor, ActorType, AgentInfo, AudioSessionOptions,
    CapabilitySet, ClientOptions, ConnectionError, ConnectionState, ControlAction, ControlEvent,
    ConversationUpdateEvent, ConversationUpdateType, CustomEvent, Packet, PacketId,
    PacketPayload, PlayerProfile, Routing, SceneStatusEvent, SdkInfo, SessionInfo, SessionSave,
    SessionToken, TextEvent,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Work queued for the simulated service thread
#[derive(Debug)]
enum Command {
    Start { scene: String, workspace: String },
    Stop,
    Pause,
    Resume,
    Disconnect,
    Inject(Packet),
    Reply { request: Packet },
    Narration { request: Packet },
    AudioEnd { routing: Routing },
    ConversationUpdate { conversation_id: String, agents: Vec<String>, include_player: bool },
    LoadScene(String),
    LoadCharacters(Vec<String>),
    Save(SaveRequestId),
    Shutdown,
}

/// Session state the loopback service hands out on save
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoopbackSave {
    pub workspace: String,
    /// Long names of the loaded brains
    pub brains: Vec<String>,
}

impl LoopbackSave {
    pub fn from_session_save(save: &SessionSave) -> serde_json::Result<Self> {
        serde_json::from_slice(&save.data)
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    connection: ConnectionState,
    error: ConnectionError,
    workspace: String,
    session_id: String,
    capabilities: CapabilitySet,
    /// Long brain name to loaded agent
    agents: BTreeMap<String, AgentInfo>,
    conversations: HashMap<String, Vec<String>>,
    /// Audio bytes received per agent or conversation id
    heard_bytes: HashMap<String, usize>,
}

/// In-process stand-in for the service
///
/// Every request is answered from a worker thread through the session's
/// [`EventSink`]: connecting reports `Connecting` then `Connected` and a
/// scene status listing one agent per configured brain, text is echoed back
/// by the addressed agents, and an audio session reports how much audio it
/// heard when it ends. Conversation ids are derived from the sorted agent
/// ids, so the same agent set always yields the same id.
pub struct LoopbackTransport {
    brains: Vec<String>,
    reply_delay: Duration,
    shared: Arc<Mutex<ServiceState>>,
    commands: Sender<Command>,
    pending: Option<Receiver<Command>>,
    worker: Option<JoinHandle<()>>,
}

/// Test hooks into a running loopback transport
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<ServiceState>>,
    commands: Sender<Command>,
}

impl LoopbackHandle {
    /// Drop the connection with `error`, as the service would
    pub fn simulate_disconnect(&self, error: ConnectionError) {
        self.shared.lock().error = error;
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Deliver an arbitrary packet as if the service had sent it
    pub fn inject_packet(&self, packet: Packet) {
        let _ = self.commands.send(Command::Inject(packet));
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    pub fn heard_bytes(&self, routing_id: &str) -> usize {
        self.shared
            .lock()
            .heard_bytes
            .get(routing_id)
            .copied()
            .unwrap_or(0)
    }
}

impl LoopbackTransport {
    /// Service that hosts one agent per brain name
    pub fn new<I, S>(brains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (commands, pending) = unbounded();
        Self {
            brains: brains.into_iter().map(Into::into).collect(),
            reply_delay: Duration::ZERO,
            shared: Arc::new(Mutex::new(ServiceState::default())),
            commands,
            pending: Some(pending),
            worker: None,
        }
    }

    /// Delay before each simulated response
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: self.shared.clone(),
            commands: self.commands.clone(),
        }
    }

    fn submit(&self, command: Command) {
        if self.worker.is_none() {
            warn!(command = ?command, "Loopback transport not initialized, dropping request");
            return;
        }
        if self.commands.send(command).is_err() {
            warn!("Loopback service stopped, dropping request");
        }
    }

    fn interaction_packet(routing: Routing, payload: PacketPayload) -> Packet {
        let interaction_id = Uuid::new_v4().to_string();
        Packet::with_id(
            PacketId::with_interaction(interaction_id, Uuid::new_v4().to_string()),
            routing,
            payload,
        )
    }

    fn request_packet(&self, routing: Routing, payload: PacketPayload) -> Packet {
        let packet = Self::interaction_packet(routing, payload);
        self.submit(Command::Reply {
            request: packet.clone(),
        });
        packet
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Shutdown);
            if worker.join().is_err() {
                warn!("Loopback service thread panicked");
            }
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TransportClient for LoopbackTransport {
    fn init(&mut self, sdk_info: SdkInfo, sink: EventSink) {
        let Some(receiver) = self.pending.take() else {
            warn!("Loopback transport initialized twice");
            return;
        };
        info!(client_id = %sdk_info.client_id, brains = self.brains.len(), "Loopback transport ready");
        let service = Service {
            brains: self.brains.clone(),
            reply_delay: self.reply_delay,
            shared: self.shared.clone(),
            sink,
        };
        match thread::Builder::new()
            .name("inworld-loopback".to_string())
            .spawn(move || service.run(receiver))
        {
            Ok(worker) => self.worker = Some(worker),
            Err(e) => warn!(error = %e, "Failed to start loopback service"),
        }
    }

    fn start_client(&mut self, options: ClientOptions, session_info: SessionInfo) {
        {
            let mut shared = self.shared.lock();
            shared.capabilities = options.capabilities.clone();
            shared.session_id = session_info
                .token
                .as_ref()
                .map(|token| token.session_id.clone())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
        }
        let scene = session_info.scene.unwrap_or_default();
        self.submit(Command::Start {
            scene,
            workspace: options.workspace,
        });
    }

    fn stop_client(&mut self) {
        self.submit(Command::Stop);
    }

    fn pause_client(&mut self) {
        self.submit(Command::Pause);
    }

    fn resume_client(&mut self) {
        self.submit(Command::Resume);
    }

    fn destroy_client(&mut self) {
        self.shutdown();
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    fn connection_error(&self) -> ConnectionError {
        self.shared.lock().error.clone()
    }

    fn session_token(&self) -> SessionToken {
        let shared = self.shared.lock();
        SessionToken {
            token: format!("loopback-{}", shared.session_id),
            expiration_time: 0,
            session_id: shared.session_id.clone(),
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        self.shared.lock().capabilities.clone()
    }

    fn send_text_message(&mut self, agent_id: &str, text: &str) -> Packet {
        self.request_packet(
            Routing::player_to_agent(agent_id),
            PacketPayload::Text(TextEvent {
                text: text.to_string(),
                is_final: true,
            }),
        )
    }

    fn send_custom_event(
        &mut self,
        agent_id: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Packet {
        self.request_packet(
            Routing::player_to_agent(agent_id),
            PacketPayload::Custom(CustomEvent {
                name: name.to_string(),
                params: params.clone(),
            }),
        )
    }

    fn send_narration_event(&mut self, agent_id: &str, content: &str) -> Packet {
        let packet = Self::interaction_packet(
            Routing::player_to_agent(agent_id),
            PacketPayload::Text(TextEvent {
                text: content.to_string(),
                is_final: true,
            }),
        );
        self.submit(Command::Narration {
            request: packet.clone(),
        });
        packet
    }

    fn send_sound_message(&mut self, agent_id: &str, data: &[u8]) {
        *self
            .shared
            .lock()
            .heard_bytes
            .entry(agent_id.to_string())
            .or_default() += data.len();
    }

    fn start_audio_session(&mut self, agent_id: &str, _options: AudioSessionOptions) {
        self.shared
            .lock()
            .heard_bytes
            .insert(agent_id.to_string(), 0);
    }

    fn stop_audio_session(&mut self, agent_id: &str) {
        self.submit(Command::AudioEnd {
            routing: Routing::player_to_agent(agent_id),
        });
    }

    fn cancel_response(&mut self, agent_id: &str, interaction_id: &str, utterance_ids: &[String]) {
        debug!(
            agent_id = %agent_id,
            interaction_id = %interaction_id,
            utterances = utterance_ids.len(),
            "Loopback cancel response"
        );
    }

    fn send_text_message_to_conversation(&mut self, conversation_id: &str, text: &str) -> Packet {
        self.request_packet(
            Routing::player_to_conversation(conversation_id),
            PacketPayload::Text(TextEvent {
                text: text.to_string(),
                is_final: true,
            }),
        )
    }

    fn send_custom_event_to_conversation(
        &mut self,
        conversation_id: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Packet {
        self.request_packet(
            Routing::player_to_conversation(conversation_id),
            PacketPayload::Custom(CustomEvent {
                name: name.to_string(),
                params: params.clone(),
            }),
        )
    }

    fn send_sound_message_to_conversation(&mut self, conversation_id: &str, data: &[u8]) {
        self.send_sound_message(conversation_id, data);
    }

    fn start_audio_session_in_conversation(
        &mut self,
        conversation_id: &str,
        options: AudioSessionOptions,
    ) {
        self.start_audio_session(conversation_id, options);
    }

    fn stop_audio_session_in_conversation(&mut self, conversation_id: &str) {
        self.submit(Command::AudioEnd {
            routing: Routing::player_to_conversation(conversation_id),
        });
    }

    fn update_conversation(
        &mut self,
        conversation_id: &str,
        agent_ids: &[String],
        include_player: bool,
    ) -> String {
        let new_id = conversation_id_for(agent_ids);
        {
            let mut shared = self.shared.lock();
            if !conversation_id.is_empty() && conversation_id != new_id {
                shared.conversations.remove(conversation_id);
            }
            if !new_id.is_empty() {
                shared
                    .conversations
                    .insert(new_id.clone(), agent_ids.to_vec());
            }
        }
        if !new_id.is_empty() {
            self.submit(Command::ConversationUpdate {
                conversation_id: new_id.clone(),
                agents: agent_ids.to_vec(),
                include_player,
            });
        }
        new_id
    }

    fn load_scene(&mut self, scene_name: &str) {
        self.submit(Command::LoadScene(scene_name.to_string()));
    }

    fn load_characters(&mut self, brain_names: &[String]) {
        self.submit(Command::LoadCharacters(brain_names.to_vec()));
    }

    fn unload_characters(&mut self, brain_names: &[String]) {
        let mut shared = self.shared.lock();
        for name in brain_names {
            shared.agents.remove(name);
        }
    }

    fn load_player_profile(&mut self, profile: &PlayerProfile) {
        debug!(name = %profile.name, "Loopback player profile");
    }

    fn load_capabilities(&mut self, capabilities: &CapabilitySet) {
        self.shared.lock().capabilities = capabilities.clone();
    }

    fn send_interaction_feedback(&mut self, interaction_id: &str, is_like: bool, _message: &str) {
        debug!(interaction_id = %interaction_id, is_like, "Loopback feedback");
    }

    fn save_session_state(&mut self, request_id: SaveRequestId) {
        self.submit(Command::Save(request_id));
    }
}

/// Stable id for a set of agents; empty for no agents
pub fn conversation_id_for(agent_ids: &[String]) -> String {
    if agent_ids.is_empty() {
        return String::new();
    }
    let mut sorted = agent_ids.to_vec();
    sorted.sort();
    sorted.dedup();
    format!("conversation-{}", sorted.join("-"))
}

/// Agent id the loopback service assigns to a brain
pub fn agent_id_for(brain_name: &str) -> String {
    format!("agent-{}", to_short_brain_name(brain_name))
}

struct Service {
    brains: Vec<String>,
    reply_delay: Duration,
    shared: Arc<Mutex<ServiceState>>,
    sink: EventSink,
}

impl Service {
    fn run(self, commands: Receiver<Command>) {
        debug!("Loopback service started");
        for command in commands.iter() {
            if !self.reply_delay.is_zero() {
                thread::sleep(self.reply_delay);
            }
            if !self.apply(command) {
                break;
            }
        }
        debug!("Loopback service stopped");
    }

    /// Returns false once the session side is gone
    fn apply(&self, command: Command) -> bool {
        match command {
            Command::Start { scene, workspace } => {
                self.shared.lock().workspace = workspace.clone();
                self.set_state(ConnectionState::Connecting)
                    && self.set_state(ConnectionState::Connected)
                    && self.send_scene_status(&scene, &workspace)
            }
            Command::Stop => {
                self.shared.lock().conversations.clear();
                self.set_state(ConnectionState::Idle)
            }
            Command::Pause => self.set_state(ConnectionState::Paused),
            Command::Resume => {
                let state = self.shared.lock().connection;
                if state == ConnectionState::Connected {
                    return true;
                }
                self.set_state(ConnectionState::Reconnecting)
                    && self.set_state(ConnectionState::Connected)
            }
            Command::Disconnect => self.set_state(ConnectionState::Disconnected),
            Command::Inject(packet) => self.sink.packet_received(packet),
            Command::Reply { request } => self.reply(&request),
            Command::Narration { request } => self.narrate(&request),
            Command::AudioEnd { routing } => self.report_heard_audio(&routing),
            Command::ConversationUpdate {
                conversation_id,
                agents,
                include_player,
            } => self.sink.packet_received(Packet::new(
                Routing::new(Actor::world(), Actor::player(), conversation_id),
                PacketPayload::ConversationUpdate(ConversationUpdateEvent {
                    update_type: ConversationUpdateType::Started,
                    agents,
                    include_player,
                }),
            )),
            Command::LoadScene(scene) => {
                let workspace = self.shared.lock().workspace.clone();
                self.shared.lock().agents.clear();
                self.send_scene_status(&scene, &workspace)
            }
            Command::LoadCharacters(brain_names) => {
                let agent_infos: Vec<AgentInfo> =
                    brain_names.iter().map(|name| self.load_agent(name)).collect();
                self.sink.packet_received(Packet::new(
                    Routing::new(Actor::world(), Actor::player(), ""),
                    PacketPayload::SceneStatus(SceneStatusEvent {
                        scene_name: String::new(),
                        scene_description: String::new(),
                        scene_display_name: String::new(),
                        agent_infos,
                    }),
                ))
            }
            Command::Shutdown => false,
            Command::Save(request_id) => {
                let (connected, state) = {
                    let shared = self.shared.lock();
                    let state = LoopbackSave {
                        workspace: shared.workspace.clone(),
                        brains: shared.agents.keys().cloned().collect(),
                    };
                    (shared.connection == ConnectionState::Connected, state)
                };
                let (data, success) = match serde_json::to_vec(&state) {
                    Ok(data) => (data, connected),
                    Err(e) => {
                        warn!(error = %e, "Failed to encode loopback save");
                        (Vec::new(), false)
                    }
                };
                self.sink
                    .save_completed(request_id, SessionSave { data }, success)
            }
        }
    }

    fn set_state(&self, state: ConnectionState) -> bool {
        self.shared.lock().connection = state;
        self.sink.connection_state_changed(state)
    }

    fn load_agent(&self, brain_name: &str) -> AgentInfo {
        let workspace = self.shared.lock().workspace.clone();
        let long = to_long_brain_name(brain_name, &workspace);
        let short = to_short_brain_name(&long);
        let agent_info = AgentInfo::new(long.clone(), agent_id_for(&long), short);
        self.shared.lock().agents.insert(long, agent_info.clone());
        agent_info
    }

    fn send_scene_status(&self, scene: &str, workspace: &str) -> bool {
        let agent_infos: Vec<AgentInfo> = self
            .brains
            .iter()
            .map(|brain| self.load_agent(&to_long_brain_name(brain, workspace)))
            .collect();
        info!(scene = %scene, agents = agent_infos.len(), "Loopback scene loaded");
        self.sink.packet_received(Packet::new(
            Routing::new(Actor::world(), Actor::player(), ""),
            PacketPayload::SceneStatus(SceneStatusEvent {
                scene_name: scene.to_string(),
                scene_description: String::new(),
                scene_display_name: to_short_brain_name(scene),
                agent_infos,
            }),
        ))
    }

    /// Agents addressed by a player request
    fn responders(&self, routing: &Routing) -> Vec<String> {
        if routing.target.actor_type == ActorType::Agent {
            return vec![routing.target.name.clone()];
        }
        self.shared
            .lock()
            .conversations
            .get(&routing.conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn reply(&self, request: &Packet) -> bool {
        let text = match &request.payload {
            PacketPayload::Text(event) => format!("You said: {}", event.text),
            PacketPayload::Custom(event) => format!("Triggered {}", event.name),
            _ => return true,
        };
        self.answer(&request.routing, request.interaction_id(), &text)
    }

    fn narrate(&self, request: &Packet) -> bool {
        let PacketPayload::Text(event) = &request.payload else {
            return true;
        };
        let text = format!("Noted: {}", event.text);
        self.answer(&request.routing, request.interaction_id(), &text)
    }

    /// Text from every addressed agent, closed with an interaction end
    fn answer(&self, request: &Routing, interaction_id: &str, text: &str) -> bool {
        for agent_id in self.responders(request) {
            let routing = Routing::new(
                Actor::agent(agent_id.clone()),
                Actor::player(),
                request.conversation_id.clone(),
            );
            let packet_id = PacketId::with_interaction(
                interaction_id,
                Uuid::new_v4().to_string(),
            );
            let reply = Packet::with_id(
                packet_id.clone(),
                routing.clone(),
                PacketPayload::Text(TextEvent {
                    text: text.to_string(),
                    is_final: true,
                }),
            );
            let end = Packet::with_id(
                packet_id,
                routing,
                PacketPayload::Control(ControlEvent {
                    action: ControlAction::InteractionEnd,
                    description: String::new(),
                }),
            );
            if !(self.sink.packet_received(reply) && self.sink.packet_received(end)) {
                return false;
            }
        }
        true
    }

    fn report_heard_audio(&self, routing: &Routing) -> bool {
        let routing_id = if routing.conversation_id.is_empty() {
            routing.target.name.clone()
        } else {
            routing.conversation_id.clone()
        };
        let heard = self
            .shared
            .lock()
            .heard_bytes
            .remove(&routing_id)
            .unwrap_or(0);
        self.answer(
            routing,
            &Uuid::new_v4().to_string(),
            &format!("Heard {heard} bytes of audio"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{event_channel, EventQueue, TransportEvent};
    use std::time::Instant;

    fn started(brains: &[&str]) -> (LoopbackTransport, EventQueue) {
        let (sink, queue) = event_channel();
        let mut transport = LoopbackTransport::new(brains.iter().copied());
        transport.init(SdkInfo::default(), sink);
        transport.start_client(
            ClientOptions {
                server_url: "loopback".to_string(),
                resource: "workspaces/ws".to_string(),
                workspace: "ws".to_string(),
                auth: Default::default(),
                player_profile: Default::default(),
                capabilities: Default::default(),
                metadata: HashMap::new(),
            },
            SessionInfo {
                scene: Some("workspaces/ws/scenes/town".to_string()),
                ..Default::default()
            },
        );
        (transport, queue)
    }

    /// Wait until `count` events arrived
    fn collect(queue: &EventQueue, count: usize) -> Vec<TransportEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < count && Instant::now() < deadline {
            match queue.try_next() {
                Some(event) => events.push(event),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        events
    }

    #[test]
    fn test_start_connects_and_loads_scene() {
        let (transport, queue) = started(&["alice", "bob"]);
        let events = collect(&queue, 3);

        assert!(matches!(
            events[0],
            TransportEvent::ConnectionStateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            events[1],
            TransportEvent::ConnectionStateChanged(ConnectionState::Connected)
        ));
        let TransportEvent::PacketReceived(packet) = &events[2] else {
            panic!("expected scene status, got {:?}", events[2]);
        };
        let PacketPayload::SceneStatus(status) = &packet.payload else {
            panic!("expected scene status payload");
        };
        let agents: Vec<&str> = status.agent_infos.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["agent-alice", "agent-bob"]);
        assert_eq!(status.agent_infos[0].brain_name, "workspaces/ws/characters/alice");
        assert_eq!(transport.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_text_is_echoed_by_agent() {
        let (mut transport, queue) = started(&["alice"]);
        collect(&queue, 3);

        let sent = transport.send_text_message("agent-alice", "hello");
        let events = collect(&queue, 2);
        let TransportEvent::PacketReceived(reply) = &events[0] else {
            panic!("expected reply");
        };
        assert_eq!(reply.routing.source, Actor::agent("agent-alice"));
        assert_eq!(reply.interaction_id(), sent.interaction_id());
        assert!(matches!(&reply.payload, PacketPayload::Text(t) if t.text == "You said: hello"));
    }

    #[test]
    fn test_conversation_ids_are_stable() {
        let mut transport = LoopbackTransport::new(Vec::<String>::new());
        let agents = vec!["b".to_string(), "a".to_string()];
        let first = transport.update_conversation("", &agents, true);
        let second = transport.update_conversation(&first, &agents, true);
        assert_eq!(first, "conversation-a-b");
        assert_eq!(first, second);
        assert_eq!(transport.update_conversation(&first, &[], true), "");
    }

    #[test]
    fn test_disconnect_and_resume() {
        let (mut transport, queue) = started(&[]);
        collect(&queue, 3);
        let handle = transport.handle();

        handle.simulate_disconnect(ConnectionError::new("network lost", 14, Default::default()));
        let events = collect(&queue, 1);
        assert!(matches!(
            events[0],
            TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected)
        ));
        assert_eq!(transport.connection_error().message, "network lost");

        transport.resume_client();
        let events = collect(&queue, 2);
        assert!(matches!(
            events[1],
            TransportEvent::ConnectionStateChanged(ConnectionState::Connected)
        ));
    }

    #[test]
    fn test_audio_end_reports_heard_bytes() {
        let (mut transport, queue) = started(&["alice"]);
        collect(&queue, 3);

        transport.start_audio_session("agent-alice", AudioSessionOptions::default());
        transport.send_sound_message("agent-alice", &[0; 320]);
        transport.send_sound_message("agent-alice", &[0; 320]);
        assert_eq!(transport.handle().heard_bytes("agent-alice"), 640);
        transport.stop_audio_session("agent-alice");

        let events = collect(&queue, 1);
        let TransportEvent::PacketReceived(reply) = &events[0] else {
            panic!("expected reply");
        };
        assert!(matches!(&reply.payload, PacketPayload::Text(t) if t.text == "Heard 640 bytes of audio"));
    }

    #[test]
    fn test_save_reports_loaded_brains() {
        let (mut transport, queue) = started(&["alice"]);
        collect(&queue, 3);

        transport.save_session_state(9);
        let events = collect(&queue, 1);
        let TransportEvent::SaveCompleted { request_id, save, success } = &events[0] else {
            panic!("expected save result");
        };
        assert_eq!(*request_id, 9);
        assert!(*success);
        let state = LoopbackSave::from_session_save(save).unwrap();
        assert_eq!(state.workspace, "ws");
        assert_eq!(state.brains, vec!["workspaces/ws/characters/alice".to_string()]);
    }

    #[test]
    fn test_requests_before_init_are_dropped() {
        let mut transport = LoopbackTransport::new(["alice"]);
        transport.stop_client();
        assert_eq!(transport.connection_state(), ConnectionState::Idle);
    }

    #[test]
    fn test_narration_reaches_agent() {
        let (mut transport, queue) = started(&["alice"]);
        collect(&queue, 3);

        let sent = transport.send_narration_event("agent-alice", "waves");
        let events = collect(&queue, 2);
        let TransportEvent::PacketReceived(reply) = &events[0] else {
            panic!("expected reply");
        };
        assert_eq!(reply.routing.source, Actor::agent("agent-alice"));
        assert_eq!(reply.interaction_id(), sent.interaction_id());
        assert!(matches!(&reply.payload, PacketPayload::Text(t) if t.text == "Noted: waves"));
        assert!(matches!(
            &events[1],
            TransportEvent::PacketReceived(end) if matches!(&end.payload, PacketPayload::Control(_))
        ));
    }
}
