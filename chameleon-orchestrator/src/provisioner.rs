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

use std::path::PathBuf;
use std::sync::Arc;

use chameleon_config::{ControllerConfig, ModelPaths};
use chameleon_error::{Error, ResultExt};

use crate::engine::{ContainerHandle, EngineFactory};
use crate::history::{History, Model};
use crate::history_store::HistoryStore;
use crate::metrics::PoolMetrics;

/// Archives injected into every provisioned container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerBundle {
    /// Tar archive extracted into the model's controller directory.
    pub controller_path: PathBuf,
    /// Tar archive extracted at the filesystem root.
    pub dependencies_path: PathBuf,
}

impl From<&ControllerConfig> for ControllerBundle {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            controller_path: PathBuf::from(&config.controller_path),
            dependencies_path: PathBuf::from(&config.dependencies_path),
        }
    }
}

/// Shell command that recreates the controller directory and empties every
/// clearable path while keeping its parent directory. Running it twice
/// leaves the container in the same state.
pub fn filesystem_init_command(paths: &ModelPaths) -> String {
    let mut steps = vec![format!("mkdir -p \"{}\"", paths.controller_directory)];
    steps.extend(
        paths
            .clearable()
            .into_iter()
            .map(|path| format!("rm -rf \"{path}\" && mkdir -p \"$(dirname \"{path}\")\"")),
    );
    steps.join(" && ")
}

/// Creates warm containers and records them as `Cached`.
#[derive(Debug)]
pub struct ContainerProvisioner {
    engines: Arc<EngineFactory>,
    store: Arc<dyn HistoryStore>,
    bundle: ControllerBundle,
    metrics: Arc<PoolMetrics>,
}

impl ContainerProvisioner {
    pub const fn new(
        engines: Arc<EngineFactory>,
        store: Arc<dyn HistoryStore>,
        bundle: ControllerBundle,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        Self {
            engines,
            store,
            bundle,
            metrics,
        }
    }

    pub const fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    pub const fn engines(&self) -> &Arc<EngineFactory> {
        &self.engines
    }

    pub const fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    /// Provisions one warm container for `model` and persists its `Cached`
    /// record. When `keep_running` is false the container is stopped before
    /// the record is written. Nothing is persisted if any step fails, and a
    /// container that was already created is removed again.
    pub async fn provision(
        &self,
        model: &Model,
        keep_running: bool,
    ) -> Result<(History, ContainerHandle), Error> {
        let result = self.provision_inner(model, keep_running).await;
        match &result {
            Ok((record, handle)) => {
                PoolMetrics::incr(&self.metrics.provisioned);
                tracing::debug!(
                    model = model.name,
                    history_id = record.id_string(),
                    container_id = %handle.id,
                    keep_running,
                    "provisioned cached container"
                );
            }
            Err(_) => PoolMetrics::incr(&self.metrics.provision_failures),
        }
        result
    }

    async fn provision_inner(
        &self,
        model: &Model,
        keep_running: bool,
    ) -> Result<(History, ContainerHandle), Error> {
        let engine = self.engines.client(&model.image.region)?;
        let container_id = engine
            .create(&model.image.unique_id)
            .await
            .err_tip(|| format!("while creating container for model {}", model.name))?;
        let handle = ContainerHandle::new(engine, container_id);

        match self.prepare(model, &handle, keep_running).await {
            Ok(record) => Ok((record, handle)),
            Err(err) => {
                self.discard(model, &handle, &err).await;
                Err(err)
            }
        }
    }

    async fn prepare(
        &self,
        model: &Model,
        handle: &ContainerHandle,
        keep_running: bool,
    ) -> Result<History, Error> {
        handle
            .engine
            .start(&handle.id)
            .await
            .err_tip(|| format!("while booting container for model {}", model.name))?;

        self.initialize_filesystem(handle, &model.paths)
            .await
            .err_tip(|| format!("while injecting controller for model {}", model.name))?;

        if !keep_running {
            handle
                .engine
                .stop(&handle.id)
                .await
                .err_tip(|| format!("while parking container for model {}", model.name))?;
        }

        self.store
            .save(History::cached(model, handle.id.clone()))
            .await
            .err_tip(|| format!("while recording cached container {}", handle.id))
    }

    /// Removes a container that never made it into the pool.
    async fn discard(&self, model: &Model, handle: &ContainerHandle, cause: &Error) {
        tracing::error!(
            model = model.name,
            container_id = %handle.id,
            error = ?cause,
            "provisioning failed, removing container"
        );
        if let Err(err) = handle.engine.remove(&handle.id).await {
            tracing::error!(
                model = model.name,
                container_id = %handle.id,
                error = ?err,
                "could not remove container, it is left in the engine"
            );
        }
    }

    /// Resets the container's path contract and pushes the controller and
    /// its shared dependencies. Safe to repeat on a reused container.
    pub async fn initialize_filesystem(
        &self,
        handle: &ContainerHandle,
        paths: &ModelPaths,
    ) -> Result<(), Error> {
        let command = filesystem_init_command(paths);
        handle
            .engine
            .exec(&handle.id, vec!["sh".into(), "-c".into(), command])
            .await
            .err_tip(|| format!("while resetting paths of container {}", handle.id))?;

        let dependencies =
            handle
                .engine
                .push_files(&handle.id, &self.bundle.dependencies_path, "/");
        let controller = handle.engine.push_files(
            &handle.id,
            &self.bundle.controller_path,
            &paths.controller_directory,
        );
        tokio::try_join!(dependencies, controller)?;
        Ok(())
    }
}
