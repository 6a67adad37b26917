//! Perceived latency between player input and agent reply
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


use inworld_types::{ActorType, Packet, PacketPayload};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Interaction ids remembered to suppress repeated reports
const REPORTED_HISTORY: usize = 64;

/// Tracks the time between player input and the first agent reply
#[derive(Debug, Default)]
pub struct PerceivedLatencyTracker {
    last_input: Option<Instant>,
    reported: VecDeque<String>,
}

impl PerceivedLatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Player sent text or audio
    pub fn record_input(&mut self, now: Instant) {
        self.last_input = Some(now);
    }

    pub fn has_pending_input(&self) -> bool {
        self.last_input.is_some()
    }

    /// Returns `(interaction_id, latency_ms)` on the first agent reply of an interaction
    pub fn on_packet(&mut self, packet: &Packet, now: Instant) -> Option<(String, u64)> {
        if packet.routing.source.actor_type != ActorType::Agent {
            return None;
        }
        if !matches!(
            packet.payload,
            PacketPayload::Text(_) | PacketPayload::AudioData(_)
        ) {
            return None;
        }
        let interaction_id = packet.interaction_id();
        if interaction_id.is_empty() || self.reported.iter().any(|id| id == interaction_id) {
            return None;
        }
        let input = self.last_input.take()?;

        if self.reported.len() == REPORTED_HISTORY {
            self.reported.pop_front();
        }
        self.reported.push_back(interaction_id.to_string());

        let latency_ms = now.saturating_duration_since(input).as_millis() as u64;
        debug!(interaction_id = %interaction_id, latency_ms, "Perceived latency");
        Some((interaction_id.to_string(), latency_ms))
    }

    pub fn reset(&mut self) {
        self.last_input = None;
        self.reported.clear();
    }
}
