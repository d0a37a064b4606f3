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

use core::fmt;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chameleon_error::{Code, Error, make_err};
use parking_lot::Mutex;

use crate::history::{History, HistoryId, HistoryStatus, ModelId};

/// Persistence of `History` records.
///
/// Implementations must make `claim_one_cached` and `compare_and_save`
/// atomic with respect to every other write.
#[async_trait]
pub trait HistoryStore: Send + Sync + fmt::Debug {
    /// Inserts or updates `record`, assigning an id on first insert.
    /// Rejects writes that would move an existing record's status backwards.
    async fn save(&self, record: History) -> Result<History, Error>;

    /// Writes `record` only if the stored status still equals `expected`.
    /// Fails with `Code::Aborted` when another writer got there first.
    async fn compare_and_save(
        &self,
        expected: HistoryStatus,
        record: History,
    ) -> Result<History, Error>;

    /// Atomically moves one `Cached` record of the image to `Initializing`
    /// and returns it, removing it from the pool.
    async fn claim_one_cached(&self, image_id: &str) -> Result<Option<History>, Error>;

    async fn get(&self, id: HistoryId) -> Result<Option<History>, Error>;

    async fn count_by_model_and_status(
        &self,
        model_id: ModelId,
        status: HistoryStatus,
    ) -> Result<usize, Error>;
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    records: BTreeMap<HistoryId, History>,
}

impl StoreState {
    fn check_transition(&self, record: &History) -> Result<(), Error> {
        let Some(id) = record.id else {
            return Ok(());
        };
        let current = self
            .records
            .get(&id)
            .ok_or_else(|| make_err!(Code::NotFound, "history {id} does not exist"))?;
        if !current.status.can_transition_to(record.status) {
            return Err(make_err!(
                Code::FailedPrecondition,
                "history {id} cannot move from {} to {}",
                current.status,
                record.status
            ));
        }
        Ok(())
    }

    fn write(&mut self, mut record: History) -> History {
        let id = *record.id.get_or_insert_with(|| {
            self.next_id += 1;
            HistoryId(self.next_id)
        });
        self.records.insert(id, record.clone());
        record
    }
}

/// In-process `HistoryStore`. All operations run under one lock, so claims
/// and conditional writes are trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: Mutex<StoreState>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, ordered by id.
    pub fn all(&self) -> Vec<History> {
        self.state.lock().records.values().cloned().collect()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, record: History) -> Result<History, Error> {
        let mut state = self.state.lock();
        state.check_transition(&record)?;
        Ok(state.write(record))
    }

    async fn compare_and_save(
        &self,
        expected: HistoryStatus,
        record: History,
    ) -> Result<History, Error> {
        let id = record
            .id
            .ok_or_else(|| make_err!(Code::InvalidArgument, "conditional save needs an id"))?;
        let mut state = self.state.lock();
        let current = state
            .records
            .get(&id)
            .ok_or_else(|| make_err!(Code::NotFound, "history {id} does not exist"))?
            .status;
        if current != expected {
            return Err(make_err!(
                Code::Aborted,
                "history {id} is {current}, expected {expected}"
            ));
        }
        state.check_transition(&record)?;
        Ok(state.write(record))
    }

    async fn claim_one_cached(&self, image_id: &str) -> Result<Option<History>, Error> {
        let mut state = self.state.lock();
        let Some(record) = state
            .records
            .values_mut()
            .find(|record| record.status == HistoryStatus::Cached && record.image_id == image_id)
        else {
            return Ok(None);
        };
        record.status = HistoryStatus::Initializing;
        Ok(Some(record.clone()))
    }

    async fn get(&self, id: HistoryId) -> Result<Option<History>, Error> {
        Ok(self.state.lock().records.get(&id).cloned())
    }

    async fn count_by_model_and_status(
        &self,
        model_id: ModelId,
        status: HistoryStatus,
    ) -> Result<usize, Error> {
        Ok(self
            .state
            .lock()
            .records
            .values()
            .filter(|record| record.model_id == model_id && record.status == status)
            .count())
    }
}
