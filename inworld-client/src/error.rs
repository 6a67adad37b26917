//! Error types for the Inworld client
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


use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client core
///
/// The public session surface logs these and returns an empty value
/// instead of propagating them.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A required argument was empty
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No transport, session or possession to act on
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Audio sent to a target other than the active audio session
    #[error("Routing mismatch: expected {expected}, got {actual}")]
    RoutingMismatch { expected: String, actual: String },

    /// Malformed audio buffer
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// I/O error (audio dump)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn invalid_argument(operation: &str, argument: &str) -> Self {
        ClientError::InvalidArgument(format!("{operation}: {argument} is empty"))
    }

    pub fn not_ready(operation: &str, what: &str) -> Self {
        ClientError::NotReady(format!("{operation}: {what}"))
    }
}
