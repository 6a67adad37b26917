//! Resource name helpers
//!
//! Brains and scenes are addressed either by their long resource name
//! (`workspaces/<ws>/characters/<short>`, `workspaces/<ws>/scenes/<short>`)
//! or by the short form, which is the last path segment.
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


use crate::error::{InworldError, Result};

/// Brain name of the placeholder agent the service injects into some scenes.
pub const DUMMY_BRAIN_NAME: &str = "__DUMMY__";

const WORKSPACES: &str = "workspaces";
const CHARACTERS: &str = "characters";
const SCENES: &str = "scenes";

fn segments(name: &str) -> Vec<&str> {
    name.split('/').filter(|s| !s.is_empty()).collect()
}

/// Reduce a long brain name to its last segment.
///
/// Names that are not exactly four segments long are returned unchanged.
pub fn to_short_brain_name(brain_name: &str) -> String {
    let parts = segments(brain_name);
    if parts.len() == 4 {
        return parts[3].to_string();
    }
    brain_name.to_string()
}

/// Expand a short brain name into `workspaces/<ws>/characters/<short>`.
///
/// Anything that already has more than one segment is returned unchanged.
pub fn to_long_brain_name(brain_name: &str, workspace: &str) -> String {
    let parts = segments(brain_name);
    if parts.len() == 1 {
        return format!("{WORKSPACES}/{workspace}/{CHARACTERS}/{}", parts[0]);
    }
    brain_name.to_string()
}

/// Expand a short scene name into `workspaces/<ws>/scenes/<short>`.
pub fn to_long_scene_name(scene_name: &str, workspace: &str) -> String {
    let parts = segments(scene_name);
    if parts.len() == 1 {
        return format!("{WORKSPACES}/{workspace}/{SCENES}/{}", parts[0]);
    }
    scene_name.to_string()
}

/// Resource path for a workspace (`workspaces/<ws>`), or `None` if empty.
pub fn workspace_resource(workspace: &str) -> Option<String> {
    if workspace.is_empty() {
        return None;
    }
    Some(format!("{WORKSPACES}/{workspace}"))
}

/// Extract the workspace segment from any `workspaces/<ws>/...` name.
pub fn workspace_of(resource_name: &str) -> Option<&str> {
    let parts = segments(resource_name);
    if parts.len() >= 2 && parts[0] == WORKSPACES {
        return Some(parts[1]);
    }
    None
}

/// Validate a long brain name, returning its `(workspace, short)` pair.
pub fn parse_brain_name(brain_name: &str) -> Result<(&str, &str)> {
    let parts = segments(brain_name);
    match parts.as_slice() {
        [WORKSPACES, ws, CHARACTERS, short] => Ok((*ws, *short)),
        _ => Err(InworldError::InvalidResourceName(brain_name.to_string())),
    }
}
