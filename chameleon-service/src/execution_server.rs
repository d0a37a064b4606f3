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

use axum::Json;
use axum::extract::{Path, State};
use chameleon_error::{Code, ResultExt};
use chameleon_orchestrator::{
    Completion, CompletionResult, ExecutionRequest, History, HistoryId, InputArtifact, ModelId,
    User,
};
use serde::{Deserialize, Serialize};

use crate::ServiceState;
use crate::api_error::ApiError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteRequest {
    pub model_id: ModelId,
    pub executor: User,
    pub input: InputArtifact,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecuteResponse {
    pub msg: String,
    pub history_id: HistoryId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompletionResponse {
    pub applied: bool,
}

/// Accepts an execution and answers as soon as its record is
/// `Initializing`. The rest of the execution is not awaited.
pub async fn execute(
    State(state): State<ServiceState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let model = state.registry.model(request.model_id)?;
    let ticket = state
        .dispatcher
        .execute(
            &model,
            ExecutionRequest {
                executor: request.executor,
                input: request.input,
                parameters: request.parameters,
            },
        )
        .await
        .err_tip(|| format!("while executing model {}", model.name))?;
    Ok(Json(ExecuteResponse {
        msg: "ok".to_string(),
        history_id: ticket.history_id,
    }))
}

/// Callback of the in-container controller.
pub async fn completion(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
    Json(completion): Json<Completion>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let result = state
        .dispatcher
        .consume_completion(HistoryId(id), completion)
        .await?;
    Ok(Json(CompletionResponse {
        applied: result == CompletionResult::Applied,
    }))
}

pub async fn history(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<History>, ApiError> {
    let record = state
        .store
        .get(HistoryId(id))
        .await?
        .err_tip_with_code(|_| (Code::NotFound, format!("history {id} does not exist")))?;
    Ok(Json(record))
}
