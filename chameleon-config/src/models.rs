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

use serde::{Deserialize, Serialize};

use crate::serde_utils::{convert_numeric_with_shellexpand, convert_string_with_shellexpand};

const fn default_region_cache_size() -> usize {
    3
}

/// A container engine endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    /// Unique name used by models to refer to this region.
    pub name: String,
    /// Engine API host.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub host: String,
    /// Engine API port.
    #[serde(deserialize_with = "convert_numeric_with_shellexpand")]
    pub port: u16,
    /// Warm pool size given to models registered in this region.
    ///
    /// Default: 3
    #[serde(default = "default_region_cache_size")]
    pub cache_size: usize,
}

/// A model whose image already exists in its region's engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Display name of the model.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Name of the region holding the image.
    pub region: String,
    /// Image repository, eg: the uploading user's name.
    pub repository: String,
    /// Image tag. If omitted, a unique tag is derived from `name`.
    #[serde(default)]
    pub tag: Option<String>,
    /// Warm pool size. Defaults to the region's `cache_size`.
    #[serde(default)]
    pub cache_size: Option<usize>,
    pub input_type: String,
    pub output_type: String,
    /// Free-form invocation parameter schema, passed through untouched.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// In-container filesystem contract for the controller.
    #[serde(default)]
    pub paths: ModelPaths,
}

/// Fixed in-container paths the controller reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPaths {
    pub script: String,
    pub input: String,
    pub input_info: String,
    pub parameters: String,
    pub output: String,
    pub output_info: String,
    pub output_description: String,
    pub controller_directory: String,
    pub debug_log: String,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            script: "/opt/mctr/run".to_string(),
            input: "/opt/mctr/i/raw".to_string(),
            input_info: "/opt/mctr/i/info".to_string(),
            parameters: "/opt/mctr/i/params".to_string(),
            output: "/opt/mctr/o/raw".to_string(),
            output_info: "/opt/mctr/o/info".to_string(),
            output_description: "/opt/mctr/o/desc".to_string(),
            controller_directory: "/opt/mctr/".to_string(),
            debug_log: "/dev/null".to_string(),
        }
    }
}

impl ModelPaths {
    /// Null device used as a debug-log sink; never cleared.
    pub const NULL_SINK: &'static str = "/dev/null";

    /// Every configured path, in declaration order.
    pub fn all(&self) -> [&str; 9] {
        [
            &self.script,
            &self.input,
            &self.input_info,
            &self.parameters,
            &self.output,
            &self.output_info,
            &self.output_description,
            &self.controller_directory,
            &self.debug_log,
        ]
    }

    /// Paths wiped and re-created before each container is handed out:
    /// everything except the script, the controller directory and the null
    /// sink. Sorted and de-duplicated.
    pub fn clearable(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .all()
            .into_iter()
            .filter(|path| {
                *path != self.script
                    && *path != self.controller_directory
                    && *path != Self::NULL_SINK
            })
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}
