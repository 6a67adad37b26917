//! Microphone path through a session: echo cancellation framing, voice
//! gating and the pre-speech lookback.

mod common;

use common::{config, pump_until, session_with, start, TextLog};
use inworld_client::audio_processing::{apply_echo_cancellation, NlmsEchoCanceller};
use inworld_client::{CharacterId, LoopbackHandle, Session};
use inworld_types::AudioSessionOptions;
use tempfile::TempDir;

const CHUNK: usize = 1600;

fn loud() -> Vec<i16> {
    vec![8000; CHUNK]
}

fn quiet(tag: i16) -> Vec<i16> {
    vec![tag; CHUNK]
}

fn loaded_session(vad: bool, aec: bool) -> (Session, LoopbackHandle, CharacterId, TextLog) {
    let mut config = config();
    config.audio.vad_enabled = vad;
    config.audio.aec_enabled = aec;
    let (mut session, handle) = session_with(&["alice"], config);
    let alice = session.register_character("alice").unwrap();
    let log = TextLog::default();
    session.character_mut(alice).unwrap().add_handler(Box::new(log.clone()));
    start(&mut session, "town");
    assert!(pump_until(&mut session, |s| s.is_loaded()));
    (session, handle, alice, log)
}

#[test]
fn test_aec_processes_whole_frames_only() {
    let mut canceller = NlmsEchoCanceller::default();
    let input: Vec<i16> = (0..350).map(|i| (i % 100) as i16 * 50).collect();
    let reference = vec![1000i16; 500];

    let (output, processed) = apply_echo_cancellation(&mut canceller, &input, &reference);

    assert_eq!(processed, 320);
    assert_eq!(output.len(), 350);
    assert_eq!(&output[320..], &input[320..]);
}

#[test]
fn test_audio_without_vad_streams_everything() {
    let (mut session, handle, alice, log) = loaded_session(false, true);

    session.send_audio_session_start(alice, AudioSessionOptions::default());
    assert!(session.audio_sender().is_session_active());
    session.send_sound_message(alice, &vec![200i16; 350], &vec![100i16; 500]);
    assert_eq!(handle.heard_bytes("agent-alice"), 700);

    session.send_audio_session_stop(alice);
    assert!(pump_until(&mut session, |_| log.contains("Heard 700 bytes of audio")));
}

#[test]
fn test_vad_closes_on_sixth_quiet_chunk() {
    let (mut session, _handle, alice, log) = loaded_session(true, false);

    session.send_audio_session_start(alice, AudioSessionOptions::default());
    assert!(!session.audio_sender().is_session_active());
    session.send_sound_message(alice, &quiet(0), &[]);
    session.send_sound_message(alice, &quiet(0), &[]);
    session.send_sound_message(alice, &loud(), &[]);
    assert!(session.audio_sender().is_session_active());

    for _ in 0..5 {
        session.send_sound_message(alice, &quiet(0), &[]);
    }
    assert!(session.audio_sender().is_session_active());
    assert_eq!(session.audio_sender().silence_counter(), 5);

    session.send_sound_message(alice, &quiet(0), &[]);
    assert!(!session.audio_sender().is_session_active());
    assert_eq!(session.audio_sender().stats().sessions_closed, 1);
    assert_eq!(session.audio_sender().stats().chunks_sent, 9);

    let bytes = 9 * CHUNK * 2;
    let expected = format!("Heard {bytes} bytes of audio");
    assert!(pump_until(&mut session, |_| log.contains(&expected)));
}

#[test]
fn test_lookback_keeps_last_five_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mic.pcm");
    let (mut session, _handle, alice, _log) = loaded_session(true, false);
    session.audio_sender_mut().enable_dump(&path).unwrap();

    session.send_audio_session_start(alice, AudioSessionOptions::default());
    for tag in 1..=7 {
        session.send_sound_message(alice, &quiet(tag), &[]);
    }
    session.send_sound_message(alice, &loud(), &[]);
    session.audio_sender_mut().disable_dump();

    let dumped = std::fs::read(&path).unwrap();
    let first_samples: Vec<i16> = dumped
        .chunks(CHUNK * 2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    assert_eq!(first_samples, vec![3, 4, 5, 6, 7, 8000]);
    assert_eq!(session.audio_sender().stats().chunks_dropped, 2);
}

#[test]
fn test_audio_to_unpossessed_character_is_ignored() {
    let (mut session, handle, alice, _log) = loaded_session(false, false);
    session.send_audio_session_start(alice, AudioSessionOptions::default());
    session.unpossess_agents();

    session.send_sound_message(alice, &loud(), &[]);
    assert_eq!(handle.heard_bytes("agent-alice"), 0);
}
