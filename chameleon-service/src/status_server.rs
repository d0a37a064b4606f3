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
use axum::extract::State;
use chameleon_orchestrator::PoolMetricsSnapshot;
use serde::Serialize;

use crate::ServiceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub pool: PoolMetricsSnapshot,
}

pub async fn status(State(state): State<ServiceState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        pool: state.metrics.snapshot(),
    })
}
