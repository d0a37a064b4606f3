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
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chameleon_error::{Error, ResultExt};
use parking_lot::Mutex;

use crate::history::{ContainerId, Region};

/// Response for an exec call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: Option<i64>,
}

/// Control plane of one region's container engine.
///
/// Every call may suspend; implementations must not block the runtime.
#[async_trait]
pub trait EngineClient: Send + Sync + fmt::Debug {
    /// Creates a container from the engine image id and returns its id.
    async fn create(&self, image_id: &str) -> Result<ContainerId, Error>;

    async fn start(&self, container: &ContainerId) -> Result<(), Error>;

    async fn stop(&self, container: &ContainerId) -> Result<(), Error>;

    async fn restart(&self, container: &ContainerId) -> Result<(), Error>;

    /// Force-removes the container, stopping it first if needed.
    async fn remove(&self, container: &ContainerId) -> Result<(), Error>;

    /// Runs `argv` inside the container and waits for it to exit. A non-zero
    /// exit code is an error.
    async fn exec(&self, container: &ContainerId, argv: Vec<String>) -> Result<ExecOutput, Error>;

    /// Starts `argv` inside the container without waiting for it.
    async fn spawn_exec(&self, container: &ContainerId, argv: Vec<String>) -> Result<(), Error>;

    /// Extracts the tar archive at `archive` into `destination` inside the
    /// container.
    async fn push_files(
        &self,
        container: &ContainerId,
        archive: &Path,
        destination: &str,
    ) -> Result<(), Error>;

    /// Resolves "repository:tag" to the engine image id.
    async fn resolve_image(&self, reference: &str) -> Result<String, Error>;
}

/// A container bound to the engine that owns it.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub engine: Arc<dyn EngineClient>,
    pub id: ContainerId,
}

impl ContainerHandle {
    pub const fn new(engine: Arc<dyn EngineClient>, id: ContainerId) -> Self {
        Self { engine, id }
    }

    pub async fn restart(&self) -> Result<(), Error> {
        self.engine.restart(&self.id).await
    }

    pub async fn spawn_exec(&self, argv: Vec<String>) -> Result<(), Error> {
        self.engine.spawn_exec(&self.id, argv).await
    }
}

/// Builds a client for a region.
pub type EngineConnector =
    Box<dyn Fn(&Region) -> Result<Arc<dyn EngineClient>, Error> + Send + Sync>;

/// Hands out one shared engine client per region, connecting lazily.
pub struct EngineFactory {
    connector: EngineConnector,
    clients: Mutex<HashMap<String, Arc<dyn EngineClient>>>,
}

impl fmt::Debug for EngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineFactory")
            .field("regions", &self.clients.lock().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EngineFactory {
    pub fn new(connector: EngineConnector) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// A factory that serves the same client for every region.
    pub fn shared(client: Arc<dyn EngineClient>) -> Self {
        Self::new(Box::new(move |_region| Ok(Arc::clone(&client))))
    }

    pub fn client(&self, region: &Region) -> Result<Arc<dyn EngineClient>, Error> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&region.name) {
            return Ok(Arc::clone(client));
        }
        let client = (self.connector)(region).err_tip(|| {
            format!(
                "while connecting to engine of region {} at {}:{}",
                region.name, region.host, region.port
            )
        })?;
        clients.insert(region.name.clone(), Arc::clone(&client));
        Ok(client)
    }
}
