//! Load tests for the event handoff
//!
//! Many producer threads post packets through the loopback service while a
//! [`SessionDriver`] pumps the session on a tokio interval.
//!
//! Run the heavier variant with: cargo test --test load_test --release -- --ignored

#[path = "../integration/common/mod.rs"]
mod common;

use common::{config, session_with, start};
use inworld_client::{CharacterHandler, SessionDriver};
use inworld_types::{Actor, Packet, PacketPayload, Routing, TextEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Remembers the sequence numbers each producer delivered
#[derive(Clone, Default)]
struct SequenceLog(Arc<Mutex<HashMap<usize, Vec<usize>>>>);

impl SequenceLog {
    fn total(&self) -> usize {
        self.0.lock().values().map(Vec::len).sum()
    }
}

impl CharacterHandler for SequenceLog {
    fn on_text(&mut self, _packet: &Packet, event: &TextEvent) {
        let Some((producer, seq)) = event.text.split_once(':') else {
            return;
        };
        if let (Ok(producer), Ok(seq)) = (producer.parse(), seq.parse()) {
            self.0.lock().entry(producer).or_default().push(seq);
        }
    }
}

fn agent_text(text: String) -> Packet {
    Packet::new(
        Routing::new(Actor::agent("agent-alice"), Actor::player(), ""),
        PacketPayload::Text(TextEvent { text, is_final: true }),
    )
}

async fn run_producers(producers: usize, per_producer: usize) {
    let (mut session, handle) = session_with(&["alice"], config());
    let alice = session.register_character("alice").unwrap();
    let log = SequenceLog::default();
    session.character_mut(alice).unwrap().add_handler(Box::new(log.clone()));
    start(&mut session, "town");

    let session = Arc::new(Mutex::new(session));
    let driver = SessionDriver::spawn(session.clone(), Duration::from_millis(1));

    let loaded = tokio::time::timeout(Duration::from_secs(5), async {
        while !session.lock().is_loaded() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(loaded.is_ok(), "scene never loaded");

    let started = Instant::now();
    let threads: Vec<_> = (0..producers)
        .map(|producer| {
            let handle = handle.clone();
            std::thread::spawn(move || {
                for seq in 0..per_producer {
                    handle.inject_packet(agent_text(format!("{producer}:{seq}")));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let expected = producers * per_producer;
    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        while log.total() < expected {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "only {} of {expected} packets delivered", log.total());

    let elapsed = started.elapsed();
    let dispatched = driver.shutdown().await;
    println!(
        "{expected} packets from {producers} producers in {:?} ({:.0} packets/s)",
        elapsed,
        expected as f64 / elapsed.as_secs_f64()
    );

    assert!(dispatched >= expected as u64);
    for (producer, sequence) in log.0.lock().iter() {
        let in_order: Vec<usize> = (0..per_producer).collect();
        assert_eq!(sequence, &in_order, "producer {producer} delivered out of order");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_keep_per_producer_order() {
    run_producers(8, 250).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Heavier run, start manually
async fn test_high_volume_handoff() {
    run_producers(32, 5_000).await;
}
