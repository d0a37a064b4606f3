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

use std::sync::Arc;
use std::time::SystemTime;

use chameleon_config::{CallbackConfig, ModelPaths};
use chameleon_error::{Code, Error, ResultExt, error_if, make_err};
use chameleon_util::background_spawn;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::cache_coordinator::{CacheCoordinator, FillOutcome};
use crate::engine::ContainerHandle;
use crate::history::{
    History, HistoryId, HistoryStatus, InputArtifact, Model, OutputInfo, User,
};
use crate::history_store::HistoryStore;
use crate::metrics::PoolMetrics;
use crate::notifier::NotificationPublisher;

/// Claim-or-provision rounds before `execute` gives up on a contended pool.
const MAX_BIND_ATTEMPTS: usize = 5;

/// Everything the caller supplies for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub executor: User,
    pub input: InputArtifact,
    pub parameters: serde_json::Value,
}

/// Outcome reported by the in-container controller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Completion {
    /// `Finished` or `Error`.
    pub status: HistoryStatus,
    #[serde(default)]
    pub output: Option<OutputInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionResult {
    Applied,
    /// The record was not `Running`; nothing changed.
    Ignored,
}

/// Acknowledgement of an accepted execution.
///
/// The record is already `Initializing` and persisted. The remaining work
/// runs on the two spawned tasks; dropping the ticket detaches them.
#[derive(Debug)]
pub struct ExecutionTicket {
    pub history_id: HistoryId,
    /// Moves the record to `Running` and launches the controller. Resolves
    /// to `Running` once the controller is started, or to the error that
    /// drove the record to `Error`.
    pub dispatch: JoinHandle<Result<HistoryStatus, Error>>,
    /// Refills the model's warm pool.
    pub refill: JoinHandle<Result<FillOutcome, Error>>,
}

/// Argv that launches the controller detached, passing it the callback
/// endpoint and the record id, with its output appended to the debug log.
pub fn controller_command(
    paths: &ModelPaths,
    callback: &CallbackConfig,
    history_id: HistoryId,
) -> Vec<String> {
    let controller = format!(
        "{}/controller",
        paths.controller_directory.trim_end_matches('/')
    );
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "chmod 777 \"{controller}\" && \"{controller}\" {} {} {history_id} >> {} 2>&1",
            callback.host, callback.port, paths.debug_log
        ),
    ]
}

/// Entry point for executions: binds a container, drives the record's
/// status and hands follow-up work to background tasks.
#[derive(Debug)]
pub struct ExecutionDispatcher {
    coordinator: Arc<CacheCoordinator>,
    publisher: NotificationPublisher,
    callback: CallbackConfig,
}

impl ExecutionDispatcher {
    pub const fn new(
        coordinator: Arc<CacheCoordinator>,
        publisher: NotificationPublisher,
        callback: CallbackConfig,
    ) -> Self {
        Self {
            coordinator,
            publisher,
            callback,
        }
    }

    pub const fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    fn store(&self) -> &Arc<dyn HistoryStore> {
        self.coordinator.provisioner().store()
    }

    fn metrics(&self) -> &Arc<PoolMetrics> {
        self.coordinator.provisioner().metrics()
    }

    /// Binds a container to `request` and returns once the record is
    /// `Initializing`. Fails only if no container could be bound.
    pub async fn execute(
        self: &Arc<Self>,
        model: &Model,
        request: ExecutionRequest,
    ) -> Result<ExecutionTicket, Error> {
        let (claimed, handle) = self.bind_container(model).await?;

        let mut record = claimed.clone();
        record.executor = Some(request.executor);
        record.input = Some(request.input);
        record.parameters = request.parameters;
        record.started_time = Some(SystemTime::now());
        let record = match self
            .store()
            .compare_and_save(HistoryStatus::Initializing, record)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                self.abandon(&claimed, &err).await;
                return Err(err).err_tip(|| format!("while binding execution of {}", model.name));
            }
        };
        self.publisher.publish(&record);
        let history_id = record
            .id
            .err_tip_with_code(|_| (Code::Internal, "stored record has no id"))?;
        tracing::info!(
            model = model.name,
            history_id = %history_id,
            container_id = %handle.id,
            "execution initializing"
        );

        let coordinator = Arc::clone(&self.coordinator);
        let refill_model = model.clone();
        let refill = background_spawn!(
            "execution_refill",
            async move { coordinator.ensure_filled(&refill_model).await },
            model = model.name
        );

        let dispatcher = Arc::clone(self);
        let paths = model.paths.clone();
        let dispatch = background_spawn!(
            "execution_dispatch",
            async move { dispatcher.dispatch(record, handle, paths).await },
            history_id = %history_id
        );

        Ok(ExecutionTicket {
            history_id,
            dispatch,
            refill,
        })
    }

    /// Claims a warm container or provisions one, returning its record in
    /// `Initializing`.
    async fn bind_container(&self, model: &Model) -> Result<(History, ContainerHandle), Error> {
        for attempt in 1..=MAX_BIND_ATTEMPTS {
            if let Some(bound) = self.claim_cached(model).await? {
                return Ok(bound);
            }

            PoolMetrics::incr(&self.metrics().cache_misses);
            tracing::info!(model = model.name, attempt, "no cached container, provisioning");
            let (mut record, handle) = self
                .coordinator
                .provisioner()
                .provision(model, true)
                .await
                .err_tip(|| format!("while provisioning container for {}", model.name))?;
            record.status = HistoryStatus::Initializing;
            match self
                .store()
                .compare_and_save(HistoryStatus::Cached, record)
                .await
            {
                Ok(record) => return Ok((record, handle)),
                // Another execution claimed the fresh container first.
                Err(err) if err.is_conflict() => {
                    tracing::debug!(model = model.name, attempt, "provisioned container was claimed");
                }
                Err(err) => return Err(err),
            }
        }
        Err(make_err!(
            Code::Aborted,
            "could not bind a container for {} after {MAX_BIND_ATTEMPTS} attempts",
            model.name
        ))
    }

    /// Takes one `Cached` record of the model's image and restarts its
    /// container. A container that fails to restart is written off as
    /// `Error` and `None` is returned so the caller provisions instead.
    async fn claim_cached(
        &self,
        model: &Model,
    ) -> Result<Option<(History, ContainerHandle)>, Error> {
        let Some(claimed) = self
            .store()
            .claim_one_cached(&model.image.unique_id)
            .await
            .err_tip(|| format!("while claiming cached container of {}", model.name))?
        else {
            return Ok(None);
        };
        PoolMetrics::incr(&self.metrics().claims);

        let engine = self
            .coordinator
            .provisioner()
            .engines()
            .client(&model.image.region)?;
        let handle = ContainerHandle::new(engine, claimed.container_id.clone());
        if let Err(err) = handle.restart().await {
            tracing::warn!(
                model = model.name,
                history_id = claimed.id_string(),
                container_id = %handle.id,
                error = ?err,
                "cached container failed to restart"
            );
            self.abandon(&claimed, &err).await;
            return Ok(None);
        }
        tracing::debug!(
            model = model.name,
            history_id = claimed.id_string(),
            container_id = %handle.id,
            "claimed cached container"
        );
        Ok(Some((claimed, handle)))
    }

    async fn dispatch(
        self: Arc<Self>,
        record: History,
        handle: ContainerHandle,
        paths: ModelPaths,
    ) -> Result<HistoryStatus, Error> {
        match self.run_controller(record.clone(), &handle, &paths).await {
            Ok(record) => Ok(record.status),
            Err(err) => {
                PoolMetrics::incr(&self.metrics().dispatch_failures);
                tracing::error!(
                    history_id = record.id_string(),
                    container_id = %handle.id,
                    error = ?err,
                    "execution dispatch failed"
                );
                self.abandon(&record, &err).await;
                Err(err)
            }
        }
    }

    async fn run_controller(
        &self,
        mut record: History,
        handle: &ContainerHandle,
        paths: &ModelPaths,
    ) -> Result<History, Error> {
        let history_id = record
            .id
            .err_tip_with_code(|_| (Code::Internal, "dispatched record has no id"))?;

        // The controller may report back as soon as it starts, so the record
        // must already accept a completion.
        record.status = HistoryStatus::Running;
        record.started_time = Some(SystemTime::now());
        let record = self
            .store()
            .compare_and_save(HistoryStatus::Initializing, record)
            .await
            .err_tip(|| format!("while marking history {history_id} running"))?;
        self.publisher.publish(&record);

        handle
            .spawn_exec(controller_command(paths, &self.callback, history_id))
            .await
            .err_tip(|| format!("while launching controller for history {history_id}"))?;
        tracing::info!(history_id = %history_id, "execution running");
        Ok(record)
    }

    /// Best-effort move of `record` to `Error` after `cause`. Failures are
    /// logged; the record is left as is if it already reached a terminal
    /// status.
    async fn abandon(&self, record: &History, cause: &Error) {
        if let Err(err) = self.fail_record(record).await {
            tracing::error!(
                history_id = record.id_string(),
                error = ?err,
                cause = ?cause,
                "could not mark history as failed"
            );
        }
    }

    async fn fail_record(&self, record: &History) -> Result<(), Error> {
        let id = record
            .id
            .err_tip_with_code(|_| (Code::Internal, "failed record has no id"))?;
        let mut current = self
            .store()
            .get(id)
            .await?
            .err_tip_with_code(|_| (Code::NotFound, format!("history {id} does not exist")))?;
        if current.status.is_terminal() {
            return Ok(());
        }
        let expected = current.status;
        current.status = HistoryStatus::Error;
        current.ended_time = Some(SystemTime::now());
        let current = self.store().compare_and_save(expected, current).await?;
        self.publisher.publish(&current);
        Ok(())
    }

    /// Applies the controller's reported outcome. Only a `Running` record
    /// accepts it; anything else is ignored so duplicates are harmless.
    pub async fn consume_completion(
        &self,
        id: HistoryId,
        completion: Completion,
    ) -> Result<CompletionResult, Error> {
        error_if!(
            !completion.status.is_terminal(),
            "completion status must be FINISHED or ERROR, got {}",
            completion.status
        );
        let mut record = self
            .store()
            .get(id)
            .await?
            .err_tip_with_code(|_| (Code::NotFound, format!("history {id} does not exist")))?;
        if record.status != HistoryStatus::Running {
            return Ok(self.ignore_completion(id, record.status));
        }

        record.status = completion.status;
        record.ended_time = Some(SystemTime::now());
        if completion.output.is_some() {
            record.output = completion.output;
        }
        match self
            .store()
            .compare_and_save(HistoryStatus::Running, record)
            .await
        {
            Ok(record) => {
                PoolMetrics::incr(&self.metrics().completions_applied);
                self.publisher.publish(&record);
                tracing::info!(history_id = %id, status = %record.status, "execution completed");
                Ok(CompletionResult::Applied)
            }
            Err(err) if err.is_conflict() => {
                Ok(self.ignore_completion(id, HistoryStatus::Running))
            }
            Err(err) => Err(err).err_tip(|| format!("while completing history {id}")),
        }
    }

    fn ignore_completion(&self, id: HistoryId, status: HistoryStatus) -> CompletionResult {
        PoolMetrics::incr(&self.metrics().completions_ignored);
        tracing::debug!(history_id = %id, %status, "ignoring completion");
        CompletionResult::Ignored
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn controller_command_passes_callback_and_history_id() {
        let paths = ModelPaths {
            debug_log: "/opt/mctr/debug.log".to_string(),
            ..ModelPaths::default()
        };
        let callback = CallbackConfig {
            host: "chameleon.internal".to_string(),
            port: 5000,
        };
        assert_eq!(
            controller_command(&paths, &callback, HistoryId(42)),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "chmod 777 \"/opt/mctr/controller\" && \"/opt/mctr/controller\" \
                 chameleon.internal 5000 42 >> /opt/mctr/debug.log 2>&1"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn completion_output_is_optional() {
        let completion: Completion = serde_json::from_str(r#"{"status": "FINISHED"}"#).unwrap();
        assert_eq!(
            completion,
            Completion {
                status: HistoryStatus::Finished,
                output: None,
            }
        );
    }
}
