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

use std::collections::HashSet;
use std::sync::Arc;

use chameleon_error::{Error, ResultExt};
use futures::future::join_all;
use parking_lot::Mutex;
use scopeguard::guard;
use serde::Serialize;

use crate::history::{HistoryStatus, Model, ModelId};
use crate::metrics::PoolMetrics;
use crate::provisioner::ContainerProvisioner;

/// Result of an `ensure_filled` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FillOutcome {
    /// Another fill for the model was in flight; nothing was done.
    AlreadyFilling,
    /// A batch ran to completion. `provisioned + failed == requested`.
    Completed {
        requested: usize,
        provisioned: usize,
        failed: usize,
    },
}

/// Keeps each model's warm pool at its `cache_size`.
///
/// At most one fill runs per model at a time. A call that finds a fill in
/// flight returns immediately instead of waiting for it.
#[derive(Debug)]
pub struct CacheCoordinator {
    provisioner: Arc<ContainerProvisioner>,
    filling: Mutex<HashSet<ModelId>>,
}

impl CacheCoordinator {
    pub fn new(provisioner: Arc<ContainerProvisioner>) -> Self {
        Self {
            provisioner,
            filling: Mutex::new(HashSet::new()),
        }
    }

    pub const fn provisioner(&self) -> &Arc<ContainerProvisioner> {
        &self.provisioner
    }

    /// True while a fill for `model_id` is in flight.
    pub fn is_filling(&self, model_id: ModelId) -> bool {
        self.filling.lock().contains(&model_id)
    }

    /// Provisions the model's pool deficit concurrently and waits for the
    /// whole batch. Individual provisioning failures are logged and counted;
    /// only a failure to read the current pool size is returned.
    pub async fn ensure_filled(&self, model: &Model) -> Result<FillOutcome, Error> {
        let metrics = self.provisioner.metrics();
        if !self.filling.lock().insert(model.id) {
            PoolMetrics::incr(&metrics.fills_skipped);
            tracing::debug!(model = model.name, "fill already in flight");
            return Ok(FillOutcome::AlreadyFilling);
        }
        let _filling = guard((), |()| {
            self.filling.lock().remove(&model.id);
        });
        PoolMetrics::incr(&metrics.fills_started);

        let cached = self
            .provisioner
            .store()
            .count_by_model_and_status(model.id, HistoryStatus::Cached)
            .await
            .err_tip(|| format!("while counting cached containers of {}", model.name))?;
        let requested = model.cache_size.saturating_sub(cached);
        if requested == 0 {
            return Ok(FillOutcome::Completed {
                requested,
                provisioned: 0,
                failed: 0,
            });
        }

        tracing::info!(model = model.name, cached, requested, "filling warm pool");
        let results = join_all(
            (0..requested).map(|_| self.provisioner.provision(model, false)),
        )
        .await;

        let mut failed = 0;
        for err in results.into_iter().filter_map(Result::err) {
            failed += 1;
            tracing::error!(
                model = model.name,
                error = ?err,
                "failed to provision cached container"
            );
        }
        let provisioned = requested - failed;
        tracing::info!(model = model.name, provisioned, failed, "warm pool filled");
        Ok(FillOutcome::Completed {
            requested,
            provisioned,
            failed,
        })
    }
}
