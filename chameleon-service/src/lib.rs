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

use axum::Router;
use axum::routing::{get, post};
use chameleon_orchestrator::{ExecutionDispatcher, HistoryStore, ModelRegistry, PoolMetrics};

pub mod api_error;
pub mod execution_server;
pub mod model_server;
pub mod status_server;

/// Shared handles every route works with.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub registry: Arc<ModelRegistry>,
    pub dispatcher: Arc<ExecutionDispatcher>,
    pub store: Arc<dyn HistoryStore>,
    pub metrics: Arc<PoolMetrics>,
}

/// Every HTTP route of the server.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/model/execute", post(execution_server::execute))
        .route("/model/list", get(model_server::list))
        .route("/model/info/{unique_name}", get(model_server::info))
        .route("/model/{id}/fill", post(model_server::fill))
        .route("/history/{id}", get(execution_server::history))
        .route(
            "/history/{id}/completion",
            post(execution_server::completion),
        )
        .route("/status", get(status_server::status))
        .with_state(state)
}
