//! Connection state and remote error descriptions
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


use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Paused,
    Disconnected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// States from which no automatic retry happens
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Failed)
    }

    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Paused => "paused",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Category of a remote connection error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorType {
    #[default]
    Undefined,
    SessionTokenExpired,
    SessionTokenInvalid,
    SessionResourcesExhausted,
    BillingTokensExhausted,
    AccountDisabled,
    SessionInvalid,
    ResourceNotFound,
    SafetyViolation,
    SessionExpired,
}

/// How the client may recover from a connection error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectionType {
    #[default]
    Undefined,
    NoRetry,
    Immediate,
    Timeout,
}

/// Structured details attached to a connection error
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionErrorDetails {
    pub error_type: ConnectionErrorType,
    pub reconnect_type: ReconnectionType,
    /// Seconds the service asks the client to wait before reconnecting
    pub reconnect_time_sec: u64,
    pub max_retries: u32,
}

/// Last connection error, fetched on demand
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionError {
    pub message: String,
    pub code: i32,
    pub details: ConnectionErrorDetails,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, code: i32, details: ConnectionErrorDetails) -> Self {
        Self {
            message: message.into(),
            code,
            details,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty() && self.code == 0
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}, {:?}, reconnect {:?})",
            self.message, self.code, self.details.error_type, self.details.reconnect_type
        )
    }
}
