//! Worker thread to game thread event queue
//!
//! Transports run their network I/O on their own threads. They never touch
//! session state; instead they post [`TransportEvent`]s through a cloned
//! [`EventSink`]. The thread that owns the [`Session`](crate::Session)
//! drains the matching [`EventQueue`] and applies the events in the exact
//! order they were posted.
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


use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use inworld_types::{ConnectionState, Packet, SessionSave};
use tracing::debug;

/// Identifies one pending save request
pub type SaveRequestId = u64;

/// Events posted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport's connection changed state
    ConnectionStateChanged(ConnectionState),
    /// A packet arrived from the service
    PacketReceived(Packet),
    /// A save request finished
    SaveCompleted {
        request_id: SaveRequestId,
        save: SessionSave,
        success: bool,
    },
}

/// Sending half, cloned into every worker thread of a transport
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<TransportEvent>,
}

impl EventSink {
    /// Post an event. Returns `false` once the owning session is gone.
    pub fn post(&self, event: TransportEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!("Event queue closed, dropping transport event");
                false
            }
        }
    }

    pub fn connection_state_changed(&self, state: ConnectionState) -> bool {
        self.post(TransportEvent::ConnectionStateChanged(state))
    }

    pub fn packet_received(&self, packet: Packet) -> bool {
        self.post(TransportEvent::PacketReceived(packet))
    }

    pub fn save_completed(&self, request_id: SaveRequestId, save: SessionSave, success: bool) -> bool {
        self.post(TransportEvent::SaveCompleted {
            request_id,
            save,
            success,
        })
    }
}

/// Receiving half, owned by the session thread
#[derive(Debug)]
pub struct EventQueue {
    receiver: Receiver<TransportEvent>,
}

impl EventQueue {
    /// Take the next pending event without blocking
    pub fn try_next(&self) -> Option<TransportEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take every event pending right now, in posting order
    ///
    /// Events posted while the returned batch is being applied are left
    /// for the next drain.
    pub fn drain(&self) -> Vec<TransportEvent> {
        let pending = self.receiver.len();
        let mut events = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.try_next() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Create a connected sink/queue pair
pub fn event_channel() -> (EventSink, EventQueue) {
    let (sender, receiver) = unbounded();
    (EventSink { sender }, EventQueue { receiver })
}
