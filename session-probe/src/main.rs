//! Session probe
//!
//! Runs a scripted session against the in-process loopback service:
//! scene load, one-to-one text, a group conversation, a microphone
//! burst and a save.
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


use inworld_client::driver::DEFAULT_TICK;
use inworld_client::{
    CaptureBuffer, CharacterHandler, CharacterId, LoopbackTransport, Session, SessionDriver,
    SessionObserver,
};
use inworld_config::ClientConfig;
use inworld_logging::init_console_logging;
use inworld_types::{
    Auth, AudioSessionOptions, CapabilitySet, ConnectionState, Packet, PlayerProfile,
    SessionOrigin, TextEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BRAINS: [&str; 2] = ["innkeeper", "guard"];
const DEFAULT_WORKSPACE: &str = "demo";
const DEFAULT_SCENE: &str = "tavern";

/// Logs session-wide events
struct ProbeObserver;

impl SessionObserver for ProbeObserver {
    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        info!(state = %state, "Connection state");
    }

    fn on_loaded(&mut self, loaded: bool) {
        info!(loaded, "Scene loaded");
    }

    fn on_perceived_latency(&mut self, interaction_id: &str, latency_ms: u64) {
        info!(interaction_id = %interaction_id, latency_ms, "Perceived latency");
    }
}

/// Logs what a character says
struct Speaker {
    name: String,
}

impl CharacterHandler for Speaker {
    fn on_text(&mut self, packet: &Packet, event: &TextEvent) {
        if packet.routing.source.actor_type == inworld_types::ActorType::Agent {
            info!(character = %self.name, text = %event.text, "Character says");
        }
    }
}

/// One second of a 440 Hz tone, 48 kHz stereo
fn tone() -> Vec<f32> {
    let rate = 48_000;
    (0..rate)
        .flat_map(|i| {
            let sample = (2.0 * PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
            [sample, sample]
        })
        .collect()
}

async fn wait_for<F: Fn(&Session) -> bool>(session: &Arc<Mutex<Session>>, condition: F) -> bool {
    for _ in 0..500 {
        if condition(&*session.lock()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_console_logging("session-probe", "info");

    let mut config = ClientConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if config.workspace.is_empty() {
        config.workspace = DEFAULT_WORKSPACE.to_string();
    }
    let scene = if config.scene.is_empty() {
        DEFAULT_SCENE.to_string()
    } else {
        config.scene.clone()
    };

    let mut brains: Vec<String> = std::env::args().skip(1).collect();
    if brains.is_empty() {
        brains = DEFAULT_BRAINS.iter().map(|b| b.to_string()).collect();
    }
    info!(workspace = %config.workspace, scene = %scene, brains = ?brains, "Starting session probe");

    let transport = LoopbackTransport::new(brains.clone()).with_reply_delay(Duration::from_millis(20));
    let aec_enabled = config.audio.aec_enabled;
    let mut session = Session::new(Box::new(transport), config);
    session.add_observer(Box::new(ProbeObserver));

    let mut characters: Vec<CharacterId> = Vec::new();
    for brain in &brains {
        let Some(id) = session.register_character(brain) else {
            warn!(brain = %brain, "Skipping character");
            continue;
        };
        if let Some(character) = session.character_mut(id) {
            character.add_handler(Box::new(Speaker { name: brain.clone() }));
        }
        characters.push(id);
    }
    let player = session.register_player();
    session.start_session(
        SessionOrigin::Scene(scene),
        PlayerProfile {
            name: "Probe".to_string(),
            ..Default::default()
        },
        Auth::default(),
        CapabilitySet::default(),
        HashMap::new(),
    );

    let session = Arc::new(Mutex::new(session));
    let driver = SessionDriver::spawn(session.clone(), DEFAULT_TICK);

    if !wait_for(&session, Session::is_loaded).await {
        driver.shutdown().await;
        anyhow::bail!("Scene did not load");
    }

    // One-to-one text
    for id in &characters {
        session.lock().send_text_message(*id, "Hello there");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Everyone in one conversation, then speak into it
    {
        let mut session = session.lock();
        for id in &characters {
            session.add_target_character(player, *id);
        }
        session.send_text_message_to_conversation(player, "What news from the road?");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let capture = CaptureBuffer::new(aec_enabled);
    capture.set_capturing(true);
    capture.push_input_f32(&tone(), 2, 48_000)?;
    if aec_enabled {
        capture.push_reference_f32(&vec![0.0; 96_000], 2, 48_000)?;
    }
    {
        let mut session = session.lock();
        session.send_audio_session_start_to_conversation(player, AudioSessionOptions::default());
        for chunk in capture.drain_chunks() {
            session.send_sound_message_to_conversation(player, &chunk.input, &chunk.reference);
        }
        session.send_audio_session_stop_to_conversation(player);
        info!(stats = ?session.audio_sender().stats(), "Microphone streamed");
    }
    capture.set_capturing(false);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let saved = Arc::new(Mutex::new(None));
    let slot = saved.clone();
    session.lock().save_session(Box::new(move |save, success| {
        *slot.lock() = Some((save.data.len(), success));
    }));
    if wait_for(&session, |s| s.pending_saves() == 0).await {
        if let Some((bytes, success)) = *saved.lock() {
            info!(bytes, success, "Session saved");
        }
    }

    session.lock().stop_session();
    wait_for(&session, |s| s.connection_state() == ConnectionState::Idle).await;
    session.lock().destroy();
    let dispatched = driver.shutdown().await;

    info!(dispatched, "Session probe finished");
    Ok(())
}
