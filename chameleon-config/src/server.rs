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

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::models::{ModelConfig, RegionConfig};
use crate::serde_utils::{convert_numeric_with_shellexpand, convert_string_with_shellexpand};

/// Root configuration of the chameleon server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChameleonConfig {
    /// Where the HTTP API listens.
    pub listener: ListenerConfig,

    /// Address handed to the in-container controller so it can report
    /// back. If omitted, the listener address is used, which must then name
    /// a concrete host.
    #[serde(default)]
    pub callback: Option<CallbackConfig>,

    /// Controller executable and shared runtime dependencies that are
    /// injected into every provisioned container.
    pub controller: ControllerConfig,

    /// Container engine endpoints. Every model lives in exactly one region.
    #[serde(default)]
    pub regions: Vec<RegionConfig>,

    /// Models registered on startup. Their warm pools are filled in the
    /// background before the server starts accepting requests.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl ChameleonConfig {
    /// Resolves the host/port pair passed to the controller.
    ///
    /// Without a `callback` section the listener address is used. That only
    /// works when the listener names a concrete host. For an unspecified bind
    /// address such as "0.0.0.0" there is nothing the controller could dial,
    /// so `None` is returned.
    pub fn callback_endpoint(&self) -> Option<CallbackConfig> {
        if let Some(callback) = &self.callback {
            return Some(callback.clone());
        }
        let (host, port) = self
            .listener
            .address
            .rsplit_once(':')
            .map_or((self.listener.address.as_str(), ""), |(host, port)| {
                (host, port)
            });
        if is_unspecified_host(host) {
            return None;
        }
        Some(CallbackConfig {
            host: host.to_string(),
            port: port.parse().unwrap_or(DEFAULT_LISTENER_PORT),
        })
    }
}

fn is_unspecified_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.is_empty()
        || host
            .parse::<IpAddr>()
            .is_ok_and(|address| address.is_unspecified())
}

const DEFAULT_LISTENER_PORT: u16 = 5000;

fn default_listener_address() -> String {
    format!("0.0.0.0:{DEFAULT_LISTENER_PORT}")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Socket address to bind, eg: "0.0.0.0:5000".
    ///
    /// Default: "0.0.0.0:5000"
    #[serde(
        default = "default_listener_address",
        deserialize_with = "convert_string_with_shellexpand"
    )]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackConfig {
    /// Externally reachable host of this server.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub host: String,
    /// Externally reachable port of this server.
    #[serde(deserialize_with = "convert_numeric_with_shellexpand")]
    pub port: u16,
}

const fn default_stop_timeout_s() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Tar archive holding the controller executable. It is extracted into
    /// each model's controller directory.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub controller_path: String,

    /// Tar archive holding shared runtime dependencies. It is extracted at
    /// the container's filesystem root.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub dependencies_path: String,

    /// Seconds the engine waits for a container to exit on stop or restart
    /// before killing it.
    ///
    /// Default: 10
    #[serde(
        default = "default_stop_timeout_s",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub stop_timeout_s: u64,
}
