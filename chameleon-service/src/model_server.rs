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
use chameleon_orchestrator::{FillOutcome, Model, ModelId};
use serde::{Deserialize, Serialize};

use crate::ServiceState;
use crate::api_error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelSummary {
    pub id: ModelId,
    pub unique_name: String,
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub region_name: String,
}

impl From<&Model> for ModelSummary {
    fn from(model: &Model) -> Self {
        Self {
            id: model.id,
            unique_name: model.unique_name.clone(),
            name: model.name.clone(),
            input_type: model.input_type.clone(),
            output_type: model.output_type.clone(),
            region_name: model.image.region.name.clone(),
        }
    }
}

pub async fn list(State(state): State<ServiceState>) -> Json<Vec<ModelSummary>> {
    Json(state.registry.models().iter().map(ModelSummary::from).collect())
}

pub async fn info(
    State(state): State<ServiceState>,
    Path(unique_name): Path<String>,
) -> Result<Json<Model>, ApiError> {
    Ok(Json(state.registry.model_by_unique_name(&unique_name)?))
}

/// Tops up the model's warm pool and waits for the batch. Answers with
/// `already_filling` when another fill is running.
pub async fn fill(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<FillOutcome>, ApiError> {
    let model = state.registry.model(ModelId(id))?;
    let outcome = state
        .dispatcher
        .coordinator()
        .ensure_filled(&model)
        .await?;
    Ok(Json(outcome))
}
