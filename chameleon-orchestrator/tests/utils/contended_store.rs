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

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chameleon_error::Error;
use chameleon_orchestrator::{
    History, HistoryId, HistoryStatus, HistoryStore, MemoryHistoryStore, ModelId,
};
use tokio::sync::{Notify, Semaphore};

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// `HistoryStore` that interferes right after a new `Cached` record is
/// saved, before its writer gets control back.
///
/// A save can be paused until `resume`, giving other tasks a window to
/// claim the record. A save can also have its record claimed on the spot,
/// as if a concurrent execution had won the race.
#[derive(Debug)]
pub struct ContendedStore {
    inner: Arc<MemoryHistoryStore>,
    pauses: AtomicUsize,
    steals: AtomicUsize,
    paused: AtomicUsize,
    paused_changed: Notify,
    gate: Semaphore,
}

impl ContendedStore {
    pub fn new(inner: Arc<MemoryHistoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            pauses: AtomicUsize::new(0),
            steals: AtomicUsize::new(0),
            paused: AtomicUsize::new(0),
            paused_changed: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    /// Holds the next new `Cached` save until `resume`.
    pub fn pause_next_cached_save(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    /// Claims the next `times` new `Cached` records as soon as they are saved.
    pub fn steal_next_cached_saves(&self, times: usize) {
        self.steals.fetch_add(times, Ordering::SeqCst);
    }

    /// Waits until a save is being held.
    pub async fn wait_until_paused(&self) {
        loop {
            let changed = self.paused_changed.notified();
            if self.paused.load(Ordering::SeqCst) > 0 {
                return;
            }
            changed.await;
        }
    }

    pub fn resume(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl HistoryStore for ContendedStore {
    async fn save(&self, record: History) -> Result<History, Error> {
        let fresh = record.id.is_none() && record.status == HistoryStatus::Cached;
        let saved = self.inner.save(record).await?;
        if fresh {
            if take_one(&self.steals) {
                self.inner.claim_one_cached(&saved.image_id).await?;
            } else if take_one(&self.pauses) {
                self.paused.fetch_add(1, Ordering::SeqCst);
                self.paused_changed.notify_waiters();
                self.gate.acquire().await.unwrap().forget();
            }
        }
        Ok(saved)
    }

    async fn compare_and_save(
        &self,
        expected: HistoryStatus,
        record: History,
    ) -> Result<History, Error> {
        self.inner.compare_and_save(expected, record).await
    }

    async fn claim_one_cached(&self, image_id: &str) -> Result<Option<History>, Error> {
        self.inner.claim_one_cached(image_id).await
    }

    async fn get(&self, id: HistoryId) -> Result<Option<History>, Error> {
        self.inner.get(id).await
    }

    async fn count_by_model_and_status(
        &self,
        model_id: ModelId,
        status: HistoryStatus,
    ) -> Result<usize, Error> {
        self.inner.count_by_model_and_status(model_id, status).await
    }
}
