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

use core::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the provisioner, coordinator and dispatcher.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Containers provisioned and recorded.
    pub provisioned: AtomicU64,
    /// Provisioning attempts that failed at any step.
    pub provision_failures: AtomicU64,
    /// Executions served from the warm pool.
    pub claims: AtomicU64,
    /// Executions that had to provision synchronously.
    pub cache_misses: AtomicU64,
    pub fills_started: AtomicU64,
    /// `ensure_filled` calls that found a fill already in flight.
    pub fills_skipped: AtomicU64,
    pub completions_applied: AtomicU64,
    pub completions_ignored: AtomicU64,
    /// Detached executions driven to `Error` after a failure.
    pub dispatch_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub provisioned: u64,
    pub provision_failures: u64,
    pub claims: u64,
    pub cache_misses: u64,
    pub fills_started: u64,
    pub fills_skipped: u64,
    pub completions_applied: u64,
    pub completions_ignored: u64,
    pub dispatch_failures: u64,
}

impl PoolMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            provisioned: self.provisioned.load(Ordering::Relaxed),
            provision_failures: self.provision_failures.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fills_started: self.fills_started.load(Ordering::Relaxed),
            fills_skipped: self.fills_skipped.load(Ordering::Relaxed),
            completions_applied: self.completions_applied.load(Ordering::Relaxed),
            completions_ignored: self.completions_ignored.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}
