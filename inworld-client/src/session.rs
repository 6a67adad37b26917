//! Session manager
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


use crate::audio_pipeline::{AudioRouting, AudioSender};
use crate::audio_processing::{
    EchoCanceller, EnergyVad, NlmsEchoCanceller, VoiceActivityDetector,
};
use crate::character::{Character, CharacterId};
use crate::connection::{BackoffPolicy, ConnectionStateMachine, RetryAction};
use crate::dispatch::{event_channel, EventQueue, SaveRequestId, TransportEvent};
use crate::error::{ClientError, ClientResult};
use crate::latency::PerceivedLatencyTracker;
use crate::packet_router::{PacketRouter, RouteEffect, RouteStats};
use crate::player::{Player, PlayerId};
use crate::transport::TransportClient;
use inworld_config::ClientConfig;
use inworld_types::{
    to_long_brain_name, to_long_scene_name, to_short_brain_name, workspace_of,
    workspace_resource, AgentInfo, AudioSessionOptions, Auth, CapabilitySet, ClientOptions,
    ConnectionError, ConnectionState, ControlAction, Packet, PacketPayload, PlayerProfile,
    SdkInfo, SessionInfo, SessionOrigin, SessionSave, SessionToken, DUMMY_BRAIN_NAME,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Completion of [`Session::save_session`]: `(state, success)`
pub type SaveCallback = Box<dyn FnOnce(SessionSave, bool) + Send>;

/// Session-wide events
pub trait SessionObserver: Send {
    /// Every inbound packet, and every outbound text packet, before routing
    fn on_packet_received(&mut self, _packet: &Packet) {}
    fn on_connection_state_changed(&mut self, _state: ConnectionState) {}
    fn on_loaded(&mut self, _loaded: bool) {}
    fn on_perceived_latency(&mut self, _interaction_id: &str, _latency_ms: u64) {}
    fn on_pre_pause(&mut self) {}
    fn on_pre_stop(&mut self) {}
}

/// Log a rejected request and turn it into `None`
fn logged<T>(result: ClientResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Request ignored");
            None
        }
    }
}

fn require(operation: &str, argument: &str, value: &str) -> ClientResult<()> {
    if value.is_empty() {
        return Err(ClientError::invalid_argument(operation, argument));
    }
    Ok(())
}

/// One logical conversation with the service
///
/// The session owns every registered character and player and is driven
/// from a single thread: transport callbacks only enqueue events, and
/// [`Session::pump`] applies them. Operations that cannot run (missing
/// argument, unpossessed character, no conversation) log a warning and
/// return without effect.
pub struct Session {
    config: ClientConfig,
    transport: Box<dyn TransportClient>,
    events: EventQueue,
    connection: ConnectionStateMachine,
    router: PacketRouter,
    audio: AudioSender,
    latency: PerceivedLatencyTracker,
    characters: BTreeMap<CharacterId, Character>,
    players: BTreeMap<PlayerId, Player>,
    /// Short brain name to registered character
    brain_to_character: HashMap<String, CharacterId>,
    /// Short brain name to the agent the service loaded for it
    brain_to_agent_info: HashMap<String, AgentInfo>,
    next_character_id: u64,
    next_player_id: u64,
    pending_saves: HashMap<SaveRequestId, SaveCallback>,
    next_save_id: SaveRequestId,
    observers: Vec<Box<dyn SessionObserver>>,
    workspace: String,
    is_loaded: bool,
    being_destroyed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.connection.state())
            .field("workspace", &self.workspace)
            .field("is_loaded", &self.is_loaded)
            .field("characters", &self.characters.len())
            .field("players", &self.players.len())
            .field("pending_saves", &self.pending_saves.len())
            .field("being_destroyed", &self.being_destroyed)
            .finish()
    }
}

impl Session {
    /// Wire a transport to a new session
    pub fn new(mut transport: Box<dyn TransportClient>, config: ClientConfig) -> Self {
        let (sink, events) = event_channel();
        transport.init(
            SdkInfo {
                client_id: config.client_id.clone(),
                ..SdkInfo::default()
            },
            sink,
        );

        let mut audio = AudioSender::new(
            config
                .audio
                .aec_enabled
                .then(|| Box::new(NlmsEchoCanceller::default()) as Box<dyn EchoCanceller>),
            config
                .audio
                .vad_enabled
                .then(|| Box::new(EnergyVad::default()) as Box<dyn VoiceActivityDetector>),
        );
        if config.audio.dump_enabled {
            if let Err(e) = audio.enable_dump(&config.audio.dump_path) {
                error!(path = %config.audio.dump_path, error = %e, "Failed to start audio dump");
            }
        }

        Self {
            connection: ConnectionStateMachine::new(BackoffPolicy::from_config(&config.reconnect)),
            workspace: config.workspace.clone(),
            config,
            transport,
            events,
            router: PacketRouter::new(),
            audio,
            latency: PerceivedLatencyTracker::new(),
            characters: BTreeMap::new(),
            players: BTreeMap::new(),
            brain_to_character: HashMap::new(),
            brain_to_agent_info: HashMap::new(),
            next_character_id: 1,
            next_player_id: 1,
            pending_saves: HashMap::new(),
            next_save_id: 1,
            observers: Vec::new(),
            is_loaded: false,
            being_destroyed: false,
        }
    }

    /// Replace the audio sender, e.g. to plug in other processors
    pub fn set_audio_sender(&mut self, sender: AudioSender) {
        self.audio.clear_state(self.transport.as_mut());
        self.audio = sender;
        self.release_displaced_player_audio();
    }

    pub fn audio_sender(&self) -> &AudioSender {
        &self.audio
    }

    pub fn audio_sender_mut(&mut self) -> &mut AudioSender {
        &mut self.audio
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.being_destroyed
    }

    /// Last state reported by the transport
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionStateMachine {
        &self.connection
    }

    /// Current error, fetched from the transport on demand
    pub fn connection_error(&self) -> ConnectionError {
        self.transport.connection_error()
    }

    pub fn session_token(&self) -> SessionToken {
        self.transport.session_token()
    }

    pub fn session_id(&self) -> String {
        self.transport.session_token().session_id
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.transport.capabilities()
    }

    pub fn route_stats(&self) -> &RouteStats {
        self.router.stats()
    }

    pub fn pending_saves(&self) -> usize {
        self.pending_saves.len()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a character for a brain
    ///
    /// Returns `None` if the brain is already taken. If the session is
    /// loaded the character is possessed at once, or its brain is loaded.
    pub fn register_character(&mut self, brain_name: &str) -> Option<CharacterId> {
        logged(require("register_character", "brain_name", brain_name))?;
        let short = to_short_brain_name(brain_name);
        if let Some(existing) = self.brain_to_character.get(&short) {
            error!(
                brain_name = %short,
                character = %existing,
                "Brain name already registered to another character"
            );
            return None;
        }

        let id = CharacterId(self.next_character_id);
        self.next_character_id += 1;
        self.characters.insert(id, Character::new(id, brain_name));
        self.brain_to_character.insert(short.clone(), id);
        debug!(character = %id, brain_name = %short, "Character registered");

        if self.is_loaded {
            match self.brain_to_agent_info.get(&short).cloned() {
                Some(agent_info) => self.possess_character(id, &agent_info),
                None => {
                    let long = to_long_brain_name(&short, &self.workspace);
                    self.transport.load_characters(&[long]);
                }
            }
        }
        Some(id)
    }

    pub fn unregister_character(&mut self, id: CharacterId) {
        let Some(character) = self.characters.get(&id) else {
            warn!(character = %id, "Unregistering unknown character");
            return;
        };
        let short = character.short_brain_name();
        let agent_id = character.agent_id().to_string();
        let was_possessed = character.is_possessed();

        if let Some(player) = character.target_player() {
            self.remove_target_character(player, id);
        }
        if !agent_id.is_empty() {
            self.router.unbind_agent(&agent_id);
        }
        self.brain_to_character.remove(&short);
        self.brain_to_agent_info.remove(&short);
        if was_possessed {
            let long = to_long_brain_name(&short, &self.workspace);
            self.transport.unload_characters(&[long]);
        }
        if let Some(mut character) = self.characters.remove(&id) {
            character.unpossess();
        }
        debug!(character = %id, brain_name = %short, "Character unregistered");
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    pub fn character_mut(&mut self, id: CharacterId) -> Option<&mut Character> {
        self.characters.get_mut(&id)
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    pub fn character_by_brain_name(&self, brain_name: &str) -> Option<CharacterId> {
        self.brain_to_character
            .get(&to_short_brain_name(brain_name))
            .copied()
    }

    pub fn character_by_agent_id(&self, agent_id: &str) -> Option<CharacterId> {
        self.router.character_for_agent(agent_id)
    }

    pub fn register_player(&mut self) -> PlayerId {
        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;
        self.players.insert(id, Player::new(id));
        debug!(player = %id, "Player registered");
        id
    }

    /// Stop the player's audio and leave its conversation
    pub fn unregister_player(&mut self, id: PlayerId) {
        if !self.players.contains_key(&id) {
            warn!(player = %id, "Unregistering unknown player");
            return;
        }
        self.send_audio_session_stop_to_conversation(id);
        self.clear_all_target_characters(id);
        if let Some(player) = self.players.remove(&id) {
            if !player.conversation_id.is_empty() {
                self.router.unbind_player(&player.conversation_id);
            }
        }
        debug!(player = %id, "Player unregistered");
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start_session(
        &mut self,
        origin: SessionOrigin,
        player_profile: PlayerProfile,
        auth: Auth,
        capabilities: CapabilitySet,
        metadata: HashMap<String, String>,
    ) {
        if self.being_destroyed {
            warn!("Session is being destroyed, not starting");
            return;
        }
        let valid = match &origin {
            SessionOrigin::Scene(name) => require("start_session", "scene_name", name),
            SessionOrigin::Save(save) if save.is_empty() => {
                Err(ClientError::invalid_argument("start_session", "save"))
            }
            SessionOrigin::Save(_) => Ok(()),
            SessionOrigin::Token(token) => require("start_session", "token", &token.token),
        };
        if logged(valid).is_none() {
            return;
        }

        let workspace = if !self.config.workspace.is_empty() {
            self.config.workspace.clone()
        } else {
            origin
                .scene_name()
                .and_then(workspace_of)
                .unwrap_or_default()
                .to_string()
        };
        let origin = match origin {
            SessionOrigin::Scene(name) if !workspace.is_empty() => {
                SessionOrigin::Scene(to_long_scene_name(&name, &workspace))
            }
            other => other,
        };
        let auth = if auth.is_empty() {
            Auth {
                base64_signature: self.config.auth.base64_signature.clone(),
                api_key: self.config.auth.api_key.clone(),
                api_secret: self.config.auth.api_secret.clone(),
            }
        } else {
            auth
        };

        let options = ClientOptions {
            server_url: self.config.server_url.clone(),
            resource: workspace_resource(&workspace).unwrap_or_default(),
            workspace: workspace.clone(),
            auth,
            player_profile,
            capabilities,
            metadata,
        };
        self.workspace = workspace;
        let previous = self.connection.state();
        self.connection.reset();
        if previous != ConnectionState::Idle {
            for observer in &mut self.observers {
                observer.on_connection_state_changed(ConnectionState::Idle);
            }
        }
        self.latency.reset();

        info!(
            server_url = %options.server_url,
            workspace = %self.workspace,
            scene = origin.scene_name().unwrap_or_default(),
            "Starting session"
        );
        self.transport.start_client(options, SessionInfo::from(&origin));
    }

    /// Unpossess every character, then stop the transport
    pub fn stop_session(&mut self) {
        for observer in &mut self.observers {
            observer.on_pre_stop();
        }
        self.unpossess_agents();
        self.stop_all_audio();
        self.connection.cancel_retry();
        self.detach_pending_saves();
        info!("Stopping session");
        self.transport.stop_client();
    }

    pub fn pause_session(&mut self) {
        for observer in &mut self.observers {
            observer.on_pre_pause();
        }
        self.connection.cancel_retry();
        self.transport.pause_client();
    }

    pub fn resume_session(&mut self) {
        self.transport.resume_client();
    }

    /// Request the session state; `callback` runs once on a later [`Session::pump`]
    pub fn save_session(&mut self, callback: SaveCallback) {
        if self.being_destroyed {
            warn!("Session is being destroyed, not saving");
            return;
        }
        let request_id = self.next_save_id;
        self.next_save_id += 1;
        self.pending_saves.insert(request_id, callback);
        debug!(request_id, "Saving session state");
        self.transport.save_session_state(request_id);
    }

    /// Tear down: nothing reaches the host after this call starts
    pub fn destroy(&mut self) {
        if self.being_destroyed {
            return;
        }
        self.being_destroyed = true;

        self.stop_all_audio();
        let characters: Vec<CharacterId> = self.characters.keys().copied().collect();
        for id in characters {
            self.unregister_character(id);
        }
        let players: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in players {
            self.unregister_player(id);
        }
        self.connection.cancel_retry();
        self.detach_pending_saves();
        self.audio.disable_dump();
        info!("Destroying session");
        self.transport.destroy_client();
    }

    fn detach_pending_saves(&mut self) {
        if !self.pending_saves.is_empty() {
            debug!(count = self.pending_saves.len(), "Detaching pending save callbacks");
            self.pending_saves.clear();
        }
    }

    fn stop_all_audio(&mut self) {
        self.audio.clear_state(self.transport.as_mut());
        self.release_displaced_player_audio();
    }

    /// Drop the audio flag of every player the sender no longer routes to
    ///
    /// There is one microphone: starting or stopping any audio session
    /// re-routes it, and a player whose conversation lost the route must be
    /// able to start again.
    fn release_displaced_player_audio(&mut self) {
        let routed = match self.audio.routing() {
            Some(AudioRouting::Conversation(id)) => Some(id.clone()),
            _ => None,
        };
        for player in self.players.values_mut() {
            if player.has_audio_session && routed.as_deref() != Some(player.conversation_id.as_str()) {
                debug!(player = %player.id(), "Player audio session displaced");
                player.has_audio_session = false;
            }
        }
    }

    // ------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------

    /// Apply queued transport events and due retries; returns events applied
    pub fn pump(&mut self, now: Instant) -> usize {
        if self.being_destroyed {
            return 0;
        }
        let events = self.events.drain();
        let count = events.len();
        for event in events {
            if self.being_destroyed {
                break;
            }
            match event {
                TransportEvent::ConnectionStateChanged(state) => {
                    self.on_connection_state_changed(state, now)
                }
                TransportEvent::PacketReceived(packet) => self.deliver_packet(&packet, now),
                TransportEvent::SaveCompleted {
                    request_id,
                    save,
                    success,
                } => self.on_save_completed(request_id, save, success),
            }
        }

        if !self.being_destroyed && self.connection.poll_retry(now) {
            info!("Resuming session after backoff");
            self.transport.resume_client();
        }
        count
    }

    fn on_connection_state_changed(&mut self, state: ConnectionState, now: Instant) {
        let error = self.transport.connection_error();
        let action = self.connection.on_state_changed(state, error, now);
        for observer in &mut self.observers {
            observer.on_connection_state_changed(state);
        }
        match action {
            RetryAction::ResumeNow => self.transport.resume_client(),
            RetryAction::ResumeAt(_) | RetryAction::None => {}
        }
    }

    fn on_save_completed(&mut self, request_id: SaveRequestId, save: SessionSave, success: bool) {
        match self.pending_saves.remove(&request_id) {
            Some(callback) => {
                debug!(request_id, success, "Session state saved");
                callback(save, success);
            }
            None => debug!(request_id, "Save completed for detached request"),
        }
    }

    /// Bookkeeping, session effects, then delivery to characters and player
    pub fn handle_packet(&mut self, packet: &Packet) {
        self.deliver_packet(packet, Instant::now());
    }

    /// [`Session::handle_packet`] with `now` as the arrival time for latency
    fn deliver_packet(&mut self, packet: &Packet, now: Instant) {
        if self.being_destroyed {
            return;
        }
        let effect = self.router.apply_bookkeeping(packet);

        if let PacketPayload::Control(event) = &packet.payload {
            if event.action == ControlAction::Warning {
                warn!(description = %event.description, "Service warning");
            }
        }
        for observer in &mut self.observers {
            observer.on_packet_received(packet);
        }

        if let RouteEffect::AgentsLoaded {
            workspace,
            agent_infos,
        } = &effect
        {
            if let Some(workspace) = workspace {
                self.workspace = workspace.clone();
            }
            self.possess_agents(agent_infos);
        }

        let delivery = self.router.route(packet);
        for id in &delivery.characters {
            if let Some(character) = self.characters.get_mut(id) {
                character.handle_packet(packet);
            }
        }
        if let Some(player) = delivery.player.and_then(|id| self.players.get_mut(&id)) {
            player.handle_packet(packet);
        }

        if let Some((interaction_id, latency_ms)) = self.latency.on_packet(packet, now) {
            for observer in &mut self.observers {
                observer.on_perceived_latency(&interaction_id, latency_ms);
            }
        }

        if let RouteEffect::ConversationEvicted {
            conversation_id,
            player: Some(player),
        } = effect
        {
            info!(conversation_id = %conversation_id, player = %player, "Player evicted from conversation");
            if let Some(state) = self.players.get_mut(&player) {
                state.conversation_id.clear();
            }
            self.refresh_player_conversation(player);
        }
    }

    // ------------------------------------------------------------------
    // Possession
    // ------------------------------------------------------------------

    fn possess_character(&mut self, id: CharacterId, agent_info: &AgentInfo) {
        if !agent_info.is_valid() {
            warn!(character = %id, brain_name = %agent_info.brain_name, "Agent info without agent id, not possessing");
            return;
        }
        if let Some(character) = self.characters.get_mut(&id) {
            character.possess(agent_info);
            self.router.bind_agent(&agent_info.agent_id, id);
        }
    }

    /// Bind loaded agents to registered characters and load the missing brains
    pub fn possess_agents(&mut self, agent_infos: &[AgentInfo]) {
        for agent_info in agent_infos {
            let short = to_short_brain_name(&agent_info.brain_name);
            self.brain_to_agent_info
                .insert(short.clone(), agent_info.clone());
            if !agent_info.is_valid() {
                warn!(brain_name = %agent_info.brain_name, "Agent info without agent id");
                continue;
            }

            match self.brain_to_character.get(&short).copied() {
                Some(id) => {
                    let possessed = self
                        .characters
                        .get(&id)
                        .map_or(true, Character::is_possessed);
                    if !possessed {
                        self.possess_character(id, agent_info);
                    }
                }
                None if short != DUMMY_BRAIN_NAME => {
                    warn!(brain_name = %short, agent_id = %agent_info.agent_id, "No character registered for agent");
                }
                None => {}
            }
        }

        let missing: Vec<String> = self
            .characters
            .values()
            .map(Character::short_brain_name)
            .filter(|short| !self.brain_to_agent_info.contains_key(short))
            .map(|short| to_long_brain_name(&short, &self.workspace))
            .collect();
        if !missing.is_empty() {
            info!(count = missing.len(), "Loading characters missing from scene");
            self.transport.load_characters(&missing);
        }

        self.is_loaded = true;
        info!(agents = self.router.possessed_count(), "Session loaded");
        for observer in &mut self.observers {
            observer.on_loaded(true);
        }
    }

    /// Release every agent binding; no-op unless loaded
    pub fn unpossess_agents(&mut self) {
        if !self.is_loaded {
            return;
        }
        for character in self.characters.values_mut() {
            character.unpossess();
        }
        self.router.clear_agents();
        self.brain_to_agent_info.clear();
        self.is_loaded = false;
        info!("Session unloaded");
        for observer in &mut self.observers {
            observer.on_loaded(false);
        }
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Recompute a player's conversation id from its targets
    ///
    /// The old mapping is dropped first and the new one is bound only if
    /// the service returned a non-empty id. The player's own id is not
    /// touched; see [`Session::add_target_character`] and friends.
    pub fn update_conversation(&mut self, player: PlayerId) -> String {
        let Some(state) = self.players.get(&player) else {
            warn!(player = %player, "update_conversation for unknown player");
            return String::new();
        };
        let old = state.conversation_id.clone();
        let include_player = state.conversation_participant;
        let agent_ids: Vec<String> = state
            .target_characters
            .iter()
            .filter_map(|id| self.characters.get(id))
            .map(|character| character.agent_id().to_string())
            .filter(|agent_id| !agent_id.is_empty())
            .collect();

        if !old.is_empty() {
            self.router.unbind_player(&old);
        }
        let conversation_id = self
            .transport
            .update_conversation(&old, &agent_ids, include_player);
        if !conversation_id.is_empty() {
            self.router.bind_player(&conversation_id, player);
        }
        debug!(
            player = %player,
            old = %old,
            new = %conversation_id,
            agents = agent_ids.len(),
            "Conversation updated"
        );
        conversation_id
    }

    /// Recompute the conversation with the player's audio session parked around it
    fn refresh_player_conversation(&mut self, player: PlayerId) {
        let Some(state) = self.players.get(&player) else {
            return;
        };
        let had_audio = state.has_audio_session;
        let options = state.audio_session_options;
        if had_audio {
            self.send_audio_session_stop_to_conversation(player);
        }

        let conversation_id = self.update_conversation(player);
        let Some(state) = self.players.get_mut(&player) else {
            return;
        };
        state.conversation_id = conversation_id.clone();
        state.notify_conversation_changed();

        if had_audio && !conversation_id.is_empty() {
            self.send_audio_session_start_to_conversation(player, options);
        }
    }

    /// Target a possessed, untargeted character
    pub fn add_target_character(&mut self, player: PlayerId, character: CharacterId) {
        if !self.players.contains_key(&player) {
            warn!(player = %player, "add_target_character for unknown player");
            return;
        }
        let Some(target) = self.characters.get_mut(&character) else {
            warn!(character = %character, "add_target_character for unknown character");
            return;
        };
        if !target.is_possessed() {
            warn!(character = %character, "Cannot target a character that is not possessed");
            return;
        }
        if let Some(current) = target.target_player() {
            warn!(character = %character, player = %current, "Character is already targeted");
            return;
        }
        target.set_target_player(Some(player));

        if let Some(state) = self.players.get_mut(&player) {
            if !state.target_characters.contains(&character) {
                state.target_characters.push(character);
            }
        }
        self.refresh_player_conversation(player);
        if let Some(state) = self.players.get_mut(&player) {
            state.notify_target_added(character);
            state.notify_targets_changed();
        }
    }

    pub fn remove_target_character(&mut self, player: PlayerId, character: CharacterId) {
        let Some(target) = self.characters.get_mut(&character) else {
            warn!(character = %character, "remove_target_character for unknown character");
            return;
        };
        if target.target_player() != Some(player) {
            debug!(character = %character, player = %player, "Character is not targeted by player");
            return;
        }
        target.set_target_player(None);

        if let Some(state) = self.players.get_mut(&player) {
            state.target_characters.retain(|id| *id != character);
        }
        self.refresh_player_conversation(player);
        if let Some(state) = self.players.get_mut(&player) {
            state.notify_target_removed(character);
            state.notify_targets_changed();
        }
    }

    pub fn clear_all_target_characters(&mut self, player: PlayerId) {
        let Some(state) = self.players.get_mut(&player) else {
            warn!(player = %player, "clear_all_target_characters for unknown player");
            return;
        };
        let removed = std::mem::take(&mut state.target_characters);
        if removed.is_empty() {
            return;
        }
        for id in &removed {
            if let Some(character) = self.characters.get_mut(id) {
                if character.target_player() == Some(player) {
                    character.set_target_player(None);
                }
            }
        }
        self.refresh_player_conversation(player);
        if let Some(state) = self.players.get_mut(&player) {
            for id in &removed {
                state.notify_target_removed(*id);
            }
            state.notify_targets_changed();
        }
    }

    /// Join or leave the player's conversation as a participant
    ///
    /// The conversation is recomputed when the player has one or has any
    /// targets; a player with neither only records the flag.
    pub fn set_conversation_participation(&mut self, player: PlayerId, participant: bool) {
        let Some(state) = self.players.get_mut(&player) else {
            warn!(player = %player, "set_conversation_participation for unknown player");
            return;
        };
        if state.conversation_participant == participant {
            return;
        }
        state.conversation_participant = participant;
        if !state.conversation_id.is_empty() || !state.target_characters.is_empty() {
            self.refresh_player_conversation(player);
        }
    }

    // ------------------------------------------------------------------
    // Agent-routed sends
    // ------------------------------------------------------------------

    fn possessed_agent_id(&self, operation: &str, character: CharacterId) -> ClientResult<String> {
        let target = self
            .characters
            .get(&character)
            .ok_or_else(|| ClientError::not_ready(operation, "character is not registered"))?;
        if !target.is_possessed() {
            return Err(ClientError::not_ready(operation, "character is not possessed"));
        }
        Ok(target.agent_id().to_string())
    }

    fn conversation_of(&self, operation: &str, player: PlayerId) -> ClientResult<String> {
        let state = self
            .players
            .get(&player)
            .ok_or_else(|| ClientError::not_ready(operation, "player is not registered"))?;
        require(operation, "conversation_id", &state.conversation_id)?;
        Ok(state.conversation_id.clone())
    }

    /// Send text to one agent; the sent packet is routed locally as well
    pub fn send_text_message(&mut self, character: CharacterId, text: &str) -> Option<Packet> {
        let agent_id = logged(self.possessed_agent_id("send_text_message", character))?;
        logged(require("send_text_message", "text", text))?;
        self.latency.record_input(Instant::now());
        let packet = self.transport.send_text_message(&agent_id, text);
        self.handle_packet(&packet);
        Some(packet)
    }

    /// Custom event ("trigger") to one agent
    pub fn send_trigger(
        &mut self,
        character: CharacterId,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Option<Packet> {
        let agent_id = logged(self.possessed_agent_id("send_trigger", character))?;
        logged(require("send_trigger", "name", name))?;
        Some(self.transport.send_custom_event(&agent_id, name, params))
    }

    pub fn send_narration_event(&mut self, character: CharacterId, content: &str) -> Option<Packet> {
        let agent_id = logged(self.possessed_agent_id("send_narration_event", character))?;
        logged(require("send_narration_event", "content", content))?;
        Some(self.transport.send_narration_event(&agent_id, content))
    }

    pub fn send_audio_session_start(&mut self, character: CharacterId, options: AudioSessionOptions) {
        let Some(agent_id) = logged(self.possessed_agent_id("send_audio_session_start", character)) else {
            return;
        };
        self.audio
            .start_audio_session(self.transport.as_mut(), &agent_id, options);
        self.release_displaced_player_audio();
    }

    pub fn send_audio_session_stop(&mut self, character: CharacterId) {
        let Some(agent_id) = logged(self.possessed_agent_id("send_audio_session_stop", character)) else {
            return;
        };
        self.audio
            .stop_audio_session(self.transport.as_mut(), &agent_id);
        self.release_displaced_player_audio();
    }

    /// Microphone chunk to one agent; `reference` is playback audio for echo cancellation
    pub fn send_sound_message(&mut self, character: CharacterId, input: &[i16], reference: &[i16]) {
        let Some(agent_id) = logged(self.possessed_agent_id("send_sound_message", character)) else {
            return;
        };
        if input.is_empty() {
            logged::<()>(Err(ClientError::invalid_argument("send_sound_message", "input")));
            return;
        }
        self.latency.record_input(Instant::now());
        self.audio
            .send_sound_message(self.transport.as_mut(), &agent_id, input, reference);
    }

    pub fn cancel_response(
        &mut self,
        character: CharacterId,
        interaction_id: &str,
        utterance_ids: &[String],
    ) {
        let Some(agent_id) = logged(self.possessed_agent_id("cancel_response", character)) else {
            return;
        };
        if logged(require("cancel_response", "interaction_id", interaction_id)).is_none() {
            return;
        }
        if utterance_ids.is_empty() {
            logged::<()>(Err(ClientError::invalid_argument("cancel_response", "utterance_ids")));
            return;
        }
        self.transport
            .cancel_response(&agent_id, interaction_id, utterance_ids);
    }

    // ------------------------------------------------------------------
    // Conversation-routed sends
    // ------------------------------------------------------------------

    pub fn send_text_message_to_conversation(&mut self, player: PlayerId, text: &str) -> Option<Packet> {
        let conversation_id = logged(self.conversation_of("send_text_message_to_conversation", player))?;
        logged(require("send_text_message_to_conversation", "text", text))?;
        self.latency.record_input(Instant::now());
        let packet = self
            .transport
            .send_text_message_to_conversation(&conversation_id, text);
        self.handle_packet(&packet);
        Some(packet)
    }

    pub fn send_trigger_to_conversation(
        &mut self,
        player: PlayerId,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Option<Packet> {
        let conversation_id = logged(self.conversation_of("send_trigger_to_conversation", player))?;
        logged(require("send_trigger_to_conversation", "name", name))?;
        Some(
            self.transport
                .send_custom_event_to_conversation(&conversation_id, name, params),
        )
    }

    /// Open the player's audio session in its conversation
    ///
    /// Refused while a session is already open, when the player does not
    /// take part in the conversation, or when it has no conversation.
    pub fn send_audio_session_start_to_conversation(&mut self, player: PlayerId, options: AudioSessionOptions) {
        const OP: &str = "send_audio_session_start_to_conversation";
        let Some(state) = self.players.get(&player) else {
            logged::<()>(Err(ClientError::not_ready(OP, "player is not registered")));
            return;
        };
        if state.has_audio_session {
            warn!(player = %player, "Player already has an audio session");
            return;
        }
        if !state.conversation_participant {
            logged::<()>(Err(ClientError::not_ready(OP, "player is not a conversation participant")));
            return;
        }
        let Some(conversation_id) = logged(self.conversation_of(OP, player)) else {
            return;
        };
        if let Some(state) = self.players.get_mut(&player) {
            state.has_audio_session = true;
            state.audio_session_options = options;
        }
        self.audio
            .start_audio_session_in_conversation(self.transport.as_mut(), &conversation_id, options);
        self.release_displaced_player_audio();
    }

    pub fn send_audio_session_stop_to_conversation(&mut self, player: PlayerId) {
        let Some(state) = self.players.get_mut(&player) else {
            return;
        };
        if !state.has_audio_session {
            return;
        }
        state.has_audio_session = false;
        let conversation_id = state.conversation_id.clone();
        self.audio
            .stop_audio_session_in_conversation(self.transport.as_mut(), &conversation_id);
        self.release_displaced_player_audio();
    }

    pub fn send_sound_message_to_conversation(&mut self, player: PlayerId, input: &[i16], reference: &[i16]) {
        const OP: &str = "send_sound_message_to_conversation";
        let Some(state) = self.players.get(&player) else {
            logged::<()>(Err(ClientError::not_ready(OP, "player is not registered")));
            return;
        };
        if !state.has_audio_session || !state.conversation_participant {
            logged::<()>(Err(ClientError::not_ready(OP, "player has no audio session")));
            return;
        }
        if input.is_empty() {
            logged::<()>(Err(ClientError::invalid_argument(OP, "input")));
            return;
        }
        let conversation_id = state.conversation_id.clone();
        self.latency.record_input(Instant::now());
        self.audio.send_sound_message_to_conversation(
            self.transport.as_mut(),
            &conversation_id,
            input,
            reference,
        );
    }

    // ------------------------------------------------------------------
    // Session mutation
    // ------------------------------------------------------------------

    /// Unpossess everything, then ask the service for another scene
    pub fn send_change_scene_event(&mut self, scene_name: &str) {
        if logged(require("send_change_scene_event", "scene_name", scene_name)).is_none() {
            return;
        }
        self.unpossess_agents();
        let long = to_long_scene_name(scene_name, &self.workspace);
        info!(scene = %long, "Changing scene");
        self.transport.load_scene(&long);
    }

    pub fn load_characters(&mut self, brain_names: &[&str]) {
        let names: Vec<String> = brain_names
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| to_long_brain_name(name, &self.workspace))
            .collect();
        if names.is_empty() {
            logged::<()>(Err(ClientError::invalid_argument("load_characters", "brain_names")));
            return;
        }
        self.transport.load_characters(&names);
    }

    pub fn unload_characters(&mut self, brain_names: &[&str]) {
        let names: Vec<String> = brain_names
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| to_long_brain_name(name, &self.workspace))
            .collect();
        if names.is_empty() {
            logged::<()>(Err(ClientError::invalid_argument("unload_characters", "brain_names")));
            return;
        }
        self.transport.unload_characters(&names);
    }

    pub fn load_player_profile(&mut self, profile: &PlayerProfile) {
        self.transport.load_player_profile(profile);
    }

    pub fn load_capabilities(&mut self, capabilities: &CapabilitySet) {
        self.transport.load_capabilities(capabilities);
    }

    pub fn send_interaction_feedback(&mut self, interaction_id: &str, is_like: bool, message: &str) {
        if logged(require("send_interaction_feedback", "interaction_id", interaction_id)).is_none() {
            return;
        }
        self.transport
            .send_interaction_feedback(interaction_id, is_like, message);
    }
}
