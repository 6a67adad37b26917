//! Session schemas
//!
//! Option structs exchanged between the session layer and the transport:
//! player profile, capabilities, credentials, session continuation data
//! and audio session settings.
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
use std::collections::HashMap;

/// Remote agent identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Long brain name (`workspaces/<ws>/characters/<name>`)
    pub brain_name: String,
    /// Opaque agent id issued by the service, empty until loaded
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub given_name: String,
}

impl AgentInfo {
    pub fn new(
        brain_name: impl Into<String>,
        agent_id: impl Into<String>,
        given_name: impl Into<String>,
    ) -> Self {
        Self {
            brain_name: brain_name.into(),
            agent_id: agent_id.into(),
            given_name: given_name.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.brain_name.is_empty() && !self.agent_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    pub unique_id: String,
    pub project_name: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// Features requested from the service for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub animations: bool,
    pub audio: bool,
    pub emotions: bool,
    pub interruptions: bool,
    pub emotion_streaming: bool,
    pub silence_events: bool,
    pub phoneme_info: bool,
    pub continuation: bool,
    pub turn_based_stt: bool,
    pub narrated_actions: bool,
    pub relations: bool,
    pub multi_agent: bool,
    pub audio2face: bool,
    pub multi_modal_action_planning: bool,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            animations: false,
            audio: true,
            emotions: true,
            interruptions: true,
            emotion_streaming: true,
            silence_events: true,
            phoneme_info: true,
            continuation: true,
            turn_based_stt: true,
            narrated_actions: false,
            relations: true,
            multi_agent: true,
            audio2face: false,
            multi_modal_action_planning: false,
        }
    }
}

/// Credentials, either a key/secret pair or a pre-signed signature
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub base64_signature: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

impl Auth {
    pub fn is_empty(&self) -> bool {
        self.base64_signature.is_empty() && (self.api_key.is_empty() || self.api_secret.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    /// Unix timestamp (seconds)
    pub expiration_time: i64,
    pub session_id: String,
}

/// Opaque saved session state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSave {
    pub data: Vec<u8>,
}

impl SessionSave {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MicrophoneMode {
    Unknown,
    #[default]
    OpenMic,
    ExpectAudioEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnderstandingMode {
    Unknown,
    #[default]
    Full,
    SpeechRecognitionOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AudioSessionOptions {
    pub microphone_mode: MicrophoneMode,
    pub understanding_mode: UnderstandingMode,
}

/// Client identification sent on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkInfo {
    pub client_id: String,
    pub version: String,
    pub subtype: String,
    pub os: String,
}

impl Default for SdkInfo {
    fn default() -> Self {
        Self {
            client_id: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            subtype: String::new(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

/// What a new session continues from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", content = "value", rename_all = "snake_case")]
pub enum SessionOrigin {
    /// Load a scene by its long name
    Scene(String),
    /// Continue from a saved session state
    Save(SessionSave),
    /// Reuse an already issued session token
    Token(SessionToken),
}

impl SessionOrigin {
    /// Scene name the origin refers to, if any
    pub fn scene_name(&self) -> Option<&str> {
        match self {
            SessionOrigin::Scene(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Options handed to the transport when a session starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub server_url: String,
    /// Resource path (`workspaces/<ws>/...`) the session is scoped to
    pub resource: String,
    pub workspace: String,
    pub auth: Auth,
    pub player_profile: PlayerProfile,
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Per-session continuation payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub token: Option<SessionToken>,
    pub save: Option<SessionSave>,
    pub scene: Option<String>,
}

impl From<&SessionOrigin> for SessionInfo {
    fn from(origin: &SessionOrigin) -> Self {
        match origin {
            SessionOrigin::Scene(name) => SessionInfo {
                scene: Some(name.clone()),
                ..Default::default()
            },
            SessionOrigin::Save(save) => SessionInfo {
                save: Some(save.clone()),
                ..Default::default()
            },
            SessionOrigin::Token(token) => SessionInfo {
                token: Some(token.clone()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_defaults() {
        let caps = CapabilitySet::default();
        assert!(caps.audio);
        assert!(caps.multi_agent);
        assert!(!caps.animations);
        assert!(!caps.narrated_actions);
    }

    #[test]
    fn test_auth_is_empty() {
        assert!(Auth::default().is_empty());
        let auth = Auth {
            api_key: "key".to_string(),
            ..Default::default()
        };
        assert!(auth.is_empty());
        let auth = Auth {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..Default::default()
        };
        assert!(!auth.is_empty());
    }

    #[test]
    fn test_session_info_from_origin() {
        let info = SessionInfo::from(&SessionOrigin::Scene("workspaces/w/scenes/s".to_string()));
        assert_eq!(info.scene.as_deref(), Some("workspaces/w/scenes/s"));
        assert!(info.save.is_none());

        let save = SessionSave { data: vec![1, 2, 3] };
        let info = SessionInfo::from(&SessionOrigin::Save(save.clone()));
        assert_eq!(info.save, Some(save));
        assert!(info.scene.is_none());
    }

    #[test]
    fn test_audio_session_options_serialization() {
        let options = AudioSessionOptions {
            microphone_mode: MicrophoneMode::ExpectAudioEnd,
            understanding_mode: UnderstandingMode::SpeechRecognitionOnly,
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("EXPECT_AUDIO_END"));
        assert!(json.contains("SPEECH_RECOGNITION_ONLY"));
    }
}
