// Copyright 2024 The Chameleon Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt;
use std::time::SystemTime;

use chameleon_config::{ModelPaths, RegionConfig};
use serde::{Deserialize, Serialize};

/// A container engine endpoint.
pub type Region = RegionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ModelId(pub u64);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HistoryId(pub u64);

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-side identity of a container. Stable for the container's whole
/// life and addressable through the engine of the model's region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A built image inside one region.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Image {
    pub repository: String,
    pub tag: String,
    /// Engine image id, eg: "sha256:...".
    pub unique_id: String,
    pub region: Region,
}

impl Image {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Model {
    pub id: ModelId,
    pub unique_name: String,
    pub name: String,
    pub description: String,
    pub image: Image,
    /// Desired number of `Cached` records kept warm for this model.
    pub cache_size: usize,
    pub input_type: String,
    pub output_type: String,
    pub parameters: serde_json::Value,
    pub paths: ModelPaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: u64,
    pub username: String,
}

/// Descriptor of the uploaded input; the bytes themselves are handled
/// outside the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InputArtifact {
    pub path: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct OutputInfo {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    /// Warm container waiting in the pool.
    Cached,
    Initializing,
    Running,
    Finished,
    Error,
}

impl HistoryStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Statuses only move forward; a terminal status never changes again.
    /// Re-writing the current status is allowed so other fields can be
    /// updated.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Cached, Self::Cached | Self::Initializing)
                | (Self::Initializing, Self::Initializing | Self::Running | Self::Error)
                | (Self::Running, Self::Running | Self::Finished | Self::Error)
                | (Self::Finished, Self::Finished)
                | (Self::Error, Self::Error)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "CACHED",
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One warm container or one user execution.
///
/// A record is born `Cached` and, once claimed, carries a single execution
/// through `Initializing`, `Running` and a terminal status.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct History {
    /// Assigned by the store on first save.
    pub id: Option<HistoryId>,
    pub container_id: ContainerId,
    pub model_id: ModelId,
    /// Engine image id the container was created from.
    pub image_id: String,
    pub status: HistoryStatus,
    pub executor: Option<User>,
    pub started_time: Option<SystemTime>,
    pub ended_time: Option<SystemTime>,
    pub input: Option<InputArtifact>,
    pub parameters: serde_json::Value,
    pub output: Option<OutputInfo>,
    /// Price and point bookkeeping owned by the accounting service.
    #[serde(default)]
    pub accounting: serde_json::Value,
}

impl History {
    /// A fresh warm-pool entry for `model` backed by `container_id`.
    pub fn cached(model: &Model, container_id: ContainerId) -> Self {
        Self {
            id: None,
            container_id,
            model_id: model.id,
            image_id: model.image.unique_id.clone(),
            status: HistoryStatus::Cached,
            executor: None,
            started_time: None,
            ended_time: None,
            input: None,
            parameters: serde_json::Value::Null,
            output: None,
            accounting: serde_json::Value::Null,
        }
    }

    /// Display form of the id for logs; unsaved records show as "-".
    pub fn id_string(&self) -> String {
        self.id.map_or_else(|| "-".to_string(), |id| id.to_string())
    }
}
