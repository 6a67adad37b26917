//! End-to-end session flows against the in-process loopback service
//!
//! Covers scene loading and possession, text round trips, multi-agent
//! conversations, reconnects and save requests.

mod common;

use common::{config, pump_until, session_with, start, SessionLog, TextLog, WORKSPACE};
use inworld_client::loopback::{conversation_id_for, LoopbackSave};
use inworld_types::{
    to_long_brain_name, to_short_brain_name, ConnectionError, ConnectionErrorDetails,
    ConnectionState,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_scene_start_possesses_registered_characters() {
    let (mut session, _handle) = session_with(&["alice", "bob"], config());
    let log = SessionLog::default();
    session.add_observer(Box::new(log.clone()));
    let alice = session.register_character("alice").unwrap();
    let bob = session.register_character("bob").unwrap();

    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    let alice = session.character(alice).unwrap();
    assert!(alice.is_possessed());
    assert_eq!(alice.agent_id(), "agent-alice");
    assert_eq!(alice.brain_name(), "workspaces/ws/characters/alice");
    assert_eq!(alice.short_brain_name(), "alice");
    assert!(session.character(bob).unwrap().is_possessed());
    assert_eq!(session.workspace(), WORKSPACE);
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(*log.loaded.lock(), vec![true]);
    assert_eq!(
        *log.states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[test]
fn test_late_registration_loads_missing_brain() {
    let (mut session, _handle) = session_with(&["alice"], config());
    session.register_character("alice").unwrap();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    let carol = session.register_character("carol").unwrap();
    assert!(pump_until(&mut session, |s| s
        .character(carol)
        .is_some_and(|c| c.is_possessed())));
    assert_eq!(session.character_by_agent_id("agent-carol"), Some(carol));
}

#[test]
fn test_text_reply_reaches_only_the_addressed_character() {
    let (mut session, _handle) = session_with(&["alice", "bob"], config());
    let log = SessionLog::default();
    session.add_observer(Box::new(log.clone()));
    let alice = session.register_character("alice").unwrap();
    let bob = session.register_character("bob").unwrap();
    let alice_log = TextLog::default();
    let bob_log = TextLog::default();
    session.character_mut(alice).unwrap().add_handler(Box::new(alice_log.clone()));
    session.character_mut(bob).unwrap().add_handler(Box::new(bob_log.clone()));
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    let sent = session.send_text_message(alice, "hello").unwrap();
    assert!(pump_until(&mut session, |_| alice_log.contains("You said: hello")));

    assert!(bob_log.texts().is_empty());
    let latencies = log.latencies.lock().clone();
    assert_eq!(latencies.len(), 1);
    assert_eq!(latencies[0].0, sent.interaction_id());
}

#[test]
fn test_conversation_fans_out_and_is_stable() {
    let (mut session, _handle) = session_with(&["alice", "bob"], config());
    let alice = session.register_character("alice").unwrap();
    let bob = session.register_character("bob").unwrap();
    let alice_log = TextLog::default();
    let bob_log = TextLog::default();
    session.character_mut(alice).unwrap().add_handler(Box::new(alice_log.clone()));
    session.character_mut(bob).unwrap().add_handler(Box::new(bob_log.clone()));
    let player = session.register_player();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    session.add_target_character(player, alice);
    session.add_target_character(player, bob);
    let expected = conversation_id_for(&["agent-alice".to_string(), "agent-bob".to_string()]);
    assert_eq!(session.player(player).unwrap().conversation_id(), expected);

    let first = session.update_conversation(player);
    let second = session.update_conversation(player);
    assert_eq!(first, expected);
    assert_eq!(second, expected);

    session.send_text_message_to_conversation(player, "hi all").unwrap();
    assert!(pump_until(&mut session, |_| {
        alice_log.contains("You said: hi all") && bob_log.contains("You said: hi all")
    }));
}

#[test]
fn test_disconnect_resumes_once_then_recovers() {
    let (mut session, handle) = session_with(&["alice"], config());
    let log = SessionLog::default();
    session.add_observer(Box::new(log.clone()));
    let alice = session.register_character("alice").unwrap();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    handle.simulate_disconnect(ConnectionError::new(
        "stream reset",
        14,
        ConnectionErrorDetails::default(),
    ));
    assert!(pump_until(&mut session, |_| {
        let states = log.states.lock();
        states.contains(&ConnectionState::Disconnected)
            && states.last() == Some(&ConnectionState::Connected)
    }));

    assert_eq!(session.connection().consecutive_disconnects(), 0);
    assert!(session.character(alice).unwrap().is_possessed());
    assert_eq!(session.connection_error().message, "stream reset");
}

#[test]
fn test_save_returns_loaded_brains_once() {
    let (mut session, _handle) = session_with(&["alice", "bob"], config());
    session.register_character("alice").unwrap();
    session.register_character("bob").unwrap();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    let results: Arc<Mutex<Vec<(Vec<u8>, bool)>>> = Arc::default();
    let sink = results.clone();
    session.save_session(Box::new(move |save, success| {
        sink.lock().push((save.data, success));
    }));
    assert_eq!(session.pending_saves(), 1);
    assert!(pump_until(&mut session, |s| s.pending_saves() == 0));

    let results = results.lock();
    assert_eq!(results.len(), 1);
    assert!(results[0].1);
    let state: LoopbackSave = serde_json::from_slice(&results[0].0).unwrap();
    assert_eq!(state.workspace, WORKSPACE);
    assert_eq!(
        state.brains,
        vec![
            "workspaces/ws/characters/alice".to_string(),
            "workspaces/ws/characters/bob".to_string(),
        ]
    );
}

#[test]
fn test_stop_unpossesses_everyone() {
    let (mut session, _handle) = session_with(&["alice", "bob"], config());
    let alice = session.register_character("alice").unwrap();
    let bob = session.register_character("bob").unwrap();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    session.stop_session();

    for id in [alice, bob] {
        let character = session.character(id).unwrap();
        assert!(!character.is_possessed());
        assert_eq!(character.agent_id(), "");
    }
    assert!(pump_until(&mut session, |s| s.connection_state() == ConnectionState::Idle));
}

#[test]
fn test_change_scene_repossesses() {
    let (mut session, _handle) = session_with(&["alice"], config());
    let alice = session.register_character("alice").unwrap();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    session.send_change_scene_event("market");
    assert!(!session.character(alice).unwrap().is_possessed());
    assert!(pump_until(&mut session, |s| s
        .character(alice)
        .is_some_and(|c| c.is_possessed())));
}

#[test]
fn test_destroy_stops_dispatch() {
    let (mut session, _handle) = session_with(&["alice"], config());
    session.register_character("alice").unwrap();
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));

    session.destroy();
    assert!(session.is_being_destroyed());
    assert_eq!(session.characters().count(), 0);
    assert_eq!(session.pump(std::time::Instant::now()), 0);
}

#[test]
fn test_brain_name_round_trip() {
    let long = "workspaces/ws/characters/alice";
    let short = to_short_brain_name(long);
    assert_eq!(short, "alice");
    assert_eq!(to_long_brain_name(&short, WORKSPACE), long);
    assert_eq!(
        to_long_brain_name(&to_short_brain_name(&short), WORKSPACE),
        long
    );
}

#[test]
fn test_backoff_is_bounded_additive() {
    use inworld_client::BackoffPolicy;
    use std::time::Duration;

    let policy = BackoffPolicy::new(
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(10),
    );
    let delays: Vec<u64> = (0..=10).map(|k| policy.delay_after(k).as_secs()).collect();

    assert_eq!(delays, vec![1, 3, 5, 7, 9, 10, 10, 10, 10, 10, 10]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}
