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

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::{API_DEFAULT_VERSION, Docker};
use bytes::Bytes;
use chameleon_error::{Code, Error, ResultExt, make_err};
use futures::StreamExt;
use uuid::Uuid;

use crate::engine::{EngineClient, EngineConnector, ExecOutput};
use crate::history::{ContainerId, Region};

/// Seconds to wait on the engine API before giving up on a request.
const ENGINE_REQUEST_TIMEOUT_S: u64 = 120;

/// Translates a Docker API failure into the workspace error type.
pub fn engine_err(err: BollardError) -> Error {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => make_err!(Code::NotFound, "{message}"),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => make_err!(Code::Internal, "engine returned {status_code}: {message}"),
        other => make_err!(Code::Unavailable, "{other}"),
    }
}

/// `EngineClient` backed by a remote Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    region: String,
    stop_timeout_s: u64,
}

impl DockerEngine {
    pub fn connect(region: &Region, stop_timeout_s: u64) -> Result<Self, Error> {
        let address = format!("http://{}:{}", region.host, region.port);
        let docker =
            Docker::connect_with_http(&address, ENGINE_REQUEST_TIMEOUT_S, API_DEFAULT_VERSION)
                .map_err(engine_err)
                .err_tip(|| format!("while connecting to docker at {address}"))?;
        Ok(Self {
            docker,
            region: region.name.clone(),
            stop_timeout_s,
        })
    }

    /// Connector for `EngineFactory` that opens a `DockerEngine` per region.
    pub fn connector(stop_timeout_s: u64) -> EngineConnector {
        Box::new(move |region| {
            let engine: Arc<dyn EngineClient> = Arc::new(Self::connect(region, stop_timeout_s)?);
            Ok(engine)
        })
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn create(&self, image_id: &str) -> Result<ContainerId, Error> {
        let name = format!("chameleon-{}", Uuid::new_v4().simple());
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(image_id.to_string()),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while creating container {name} from {image_id}"))?;
        for warning in &response.warnings {
            tracing::warn!(region = self.region, container = name, warning, "engine warning");
        }
        Ok(ContainerId(response.id))
    }

    async fn start(&self, container: &ContainerId) -> Result<(), Error> {
        self.docker
            .start_container(&container.0, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while starting container {container}"))
    }

    async fn stop(&self, container: &ContainerId) -> Result<(), Error> {
        self.docker
            .stop_container(
                &container.0,
                Some(StopContainerOptions {
                    t: self.stop_timeout_s.try_into().unwrap_or(10),
                }),
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while stopping container {container}"))
    }

    async fn restart(&self, container: &ContainerId) -> Result<(), Error> {
        self.docker
            .restart_container(
                &container.0,
                Some(RestartContainerOptions {
                    t: self.stop_timeout_s.try_into().unwrap_or(10),
                }),
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while restarting container {container}"))
    }

    async fn remove(&self, container: &ContainerId) -> Result<(), Error> {
        self.docker
            .remove_container(
                &container.0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while removing container {container}"))
    }

    async fn exec(&self, container: &ContainerId, argv: Vec<String>) -> Result<ExecOutput, Error> {
        if argv.is_empty() {
            return Err(make_err!(Code::InvalidArgument, "exec requires argv"));
        }
        let exec = self
            .docker
            .create_exec(
                &container.0,
                CreateExecOptions {
                    cmd: Some(argv),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while creating exec in container {container}"))?;

        let mut collected = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while exec'ing in container {container}"))?
        {
            while let Some(chunk) = output.next().await {
                let chunk = chunk
                    .map_err(engine_err)
                    .err_tip(|| format!("while reading exec output of {container}"))?;
                collected.push_str(&chunk.to_string());
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while inspecting exec in container {container}"))?;
        if let Some(code) = inspect.exit_code.filter(|code| *code != 0) {
            return Err(make_err!(
                Code::Internal,
                "exec in container {container} exited with {code}: {collected}"
            ));
        }
        Ok(ExecOutput {
            output: collected,
            exit_code: inspect.exit_code,
        })
    }

    async fn spawn_exec(&self, container: &ContainerId, argv: Vec<String>) -> Result<(), Error> {
        let exec = self
            .docker
            .create_exec(
                &container.0,
                CreateExecOptions {
                    cmd: Some(argv),
                    ..Default::default()
                },
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while creating detached exec in container {container}"))?;
        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while starting detached exec in container {container}"))?;
        Ok(())
    }

    async fn push_files(
        &self,
        container: &ContainerId,
        archive: &Path,
        destination: &str,
    ) -> Result<(), Error> {
        let tar = tokio::fs::read(archive)
            .await
            .err_tip(|| format!("while reading archive {}", archive.display()))?;
        self.docker
            .upload_to_container(
                &container.0,
                Some(UploadToContainerOptions {
                    path: destination.to_string(),
                    ..Default::default()
                }),
                Bytes::from(tar),
            )
            .await
            .map_err(engine_err)
            .err_tip(|| {
                format!(
                    "while pushing {} to {destination} in container {container}",
                    archive.display()
                )
            })
    }

    async fn resolve_image(&self, reference: &str) -> Result<String, Error> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(engine_err)
            .err_tip(|| format!("while inspecting image {reference}"))?;
        image
            .id
            .err_tip_with_code(|_| (Code::NotFound, format!("image {reference} has no id")))
    }
}
