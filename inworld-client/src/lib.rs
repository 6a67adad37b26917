//! Inworld client core
//!
//! This crate provides the game-side half of an Inworld conversational
//! agent session:
//! - Transport seam and the worker-to-game-thread event queue
//! - Connection state tracking with bounded reconnect backoff
//! - Packet routing to characters and players
//! - Session bookkeeping (possession, conversations, saves)
//! - Microphone pipeline (echo cancellation, voice activity gating)
//!
//! All session state is owned by a single thread. Transports run their
//! I/O elsewhere and only ever post events through an [`EventSink`].
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


pub mod audio_capture;
pub mod audio_dump;
pub mod audio_pipeline;
pub mod audio_processing;
pub mod character;
pub mod connection;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod latency;
pub mod loopback;
pub mod packet_router;
pub mod player;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use audio_capture::{CaptureBuffer, CapturedChunk};
pub use audio_dump::AudioDumper;
pub use audio_pipeline::{AudioRouting, AudioSender};
pub use character::{Character, CharacterHandler, CharacterId};
pub use connection::{BackoffPolicy, ConnectionStateMachine, RetryAction};
pub use dispatch::{event_channel, EventQueue, EventSink, TransportEvent};
pub use driver::SessionDriver;
pub use error::{ClientError, ClientResult};
pub use loopback::{LoopbackHandle, LoopbackTransport};
pub use packet_router::{Delivery, PacketRouter};
pub use player::{Player, PlayerHandler, PlayerId};
pub use session::{SaveCallback, Session, SessionObserver};
pub use transport::TransportClient;
