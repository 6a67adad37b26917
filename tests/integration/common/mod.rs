//! Shared fixtures: a session over the loopback service
#![allow(dead_code)]

use inworld_client::{CharacterHandler, LoopbackHandle, LoopbackTransport, Session, SessionObserver};
use inworld_config::ClientConfig;
use inworld_logging::LogFormat;
use inworld_types::{
    Auth, CapabilitySet, ConnectionState, Packet, PlayerProfile, SessionOrigin, TextEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WORKSPACE: &str = "ws";

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.workspace = WORKSPACE.to_string();
    config.audio.vad_enabled = false;
    config.audio.aec_enabled = false;
    config
}

/// Console logs for failing runs; `RUST_LOG=debug` shows the full exchange
pub fn init_logging() {
    let _ = inworld_logging::try_init("inworld-tests", "warn", LogFormat::Console);
}

pub fn session_with(brains: &[&str], config: ClientConfig) -> (Session, LoopbackHandle) {
    init_logging();
    let transport = LoopbackTransport::new(brains.iter().copied());
    let handle = transport.handle();
    (Session::new(Box::new(transport), config), handle)
}

pub fn start(session: &mut Session, scene: &str) {
    session.start_session(
        SessionOrigin::Scene(scene.to_string()),
        PlayerProfile::default(),
        Auth::default(),
        CapabilitySet::default(),
        HashMap::new(),
    );
}

/// Pump until `condition` holds, for at most five seconds
pub fn pump_until<F: Fn(&Session) -> bool>(session: &mut Session, condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        session.pump(Instant::now());
        if condition(session) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Collects every text a character receives
#[derive(Clone, Default)]
pub struct TextLog(pub Arc<Mutex<Vec<String>>>);

impl TextLog {
    pub fn contains(&self, text: &str) -> bool {
        self.0.lock().iter().any(|t| t == text)
    }

    pub fn texts(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl CharacterHandler for TextLog {
    fn on_text(&mut self, _packet: &Packet, event: &TextEvent) {
        self.0.lock().push(event.text.clone());
    }
}

/// Records session-wide notifications
#[derive(Clone, Default)]
pub struct SessionLog {
    pub states: Arc<Mutex<Vec<ConnectionState>>>,
    pub latencies: Arc<Mutex<Vec<(String, u64)>>>,
    pub loaded: Arc<Mutex<Vec<bool>>>,
}

impl SessionObserver for SessionLog {
    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        self.states.lock().push(state);
    }

    fn on_loaded(&mut self, loaded: bool) {
        self.loaded.lock().push(loaded);
    }

    fn on_perceived_latency(&mut self, interaction_id: &str, latency_ms: u64) {
        self.latencies.lock().push((interaction_id.to_string(), latency_ms));
    }
}
