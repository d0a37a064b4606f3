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
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chameleon_error::{Code, Error, make_err};
use chameleon_orchestrator::{ContainerId, EngineClient, ExecOutput};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Create,
    Start,
    Stop,
    Restart,
    Remove,
    Exec,
    SpawnExec,
    PushFiles,
    ResolveImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create(String),
    Start(ContainerId),
    Stop(ContainerId),
    Restart(ContainerId),
    Remove(ContainerId),
    Exec(ContainerId, Vec<String>),
    SpawnExec(ContainerId, Vec<String>),
    PushFiles(ContainerId, PathBuf, String),
    ResolveImage(String),
}

impl EngineCall {
    pub const fn op(&self) -> EngineOp {
        match self {
            Self::Create(_) => EngineOp::Create,
            Self::Start(_) => EngineOp::Start,
            Self::Stop(_) => EngineOp::Stop,
            Self::Restart(_) => EngineOp::Restart,
            Self::Remove(_) => EngineOp::Remove,
            Self::Exec(..) => EngineOp::Exec,
            Self::SpawnExec(..) => EngineOp::SpawnExec,
            Self::PushFiles(..) => EngineOp::PushFiles,
            Self::ResolveImage(_) => EngineOp::ResolveImage,
        }
    }

    pub fn container(&self) -> Option<&ContainerId> {
        match self {
            Self::Create(_) | Self::ResolveImage(_) => None,
            Self::Start(id)
            | Self::Stop(id)
            | Self::Restart(id)
            | Self::Remove(id)
            | Self::Exec(id, _)
            | Self::SpawnExec(id, _)
            | Self::PushFiles(id, ..) => Some(id),
        }
    }
}

/// In-memory `EngineClient` that records every call.
///
/// Containers are named "container-1", "container-2", ... in creation
/// order. Calls can be made to fail, and `create` can be held on a gate so
/// tests can observe work that is in flight.
#[derive(Debug, Default)]
pub struct MockEngine {
    next_container: AtomicU64,
    calls: Mutex<Vec<EngineCall>>,
    failures: Mutex<HashMap<EngineOp, usize>>,
    create_gate: Mutex<Option<Arc<Semaphore>>>,
    changed: Notify,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, op: EngineOp) -> Vec<EngineCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op() == op)
            .cloned()
            .collect()
    }

    pub fn calls_for(&self, container: &ContainerId) -> Vec<EngineCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.container() == Some(container))
            .cloned()
            .collect()
    }

    pub fn count(&self, op: EngineOp) -> usize {
        self.calls.lock().iter().filter(|call| call.op() == op).count()
    }

    /// Makes the next `times` calls of `op` fail with `Code::Unavailable`.
    pub fn fail_next(&self, op: EngineOp, times: usize) {
        *self.failures.lock().entry(op).or_default() += times;
    }

    /// Blocks every `create` until `release_creates` lets it through.
    pub fn hold_creates(&self) {
        *self.create_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_creates(&self) {
        if let Some(gate) = self.create_gate.lock().take() {
            gate.close();
        }
    }

    /// Waits until at least `n` calls of `op` were made.
    pub async fn wait_for(&self, op: EngineOp, n: usize) {
        loop {
            let changed = self.changed.notified();
            if self.count(op) >= n {
                return;
            }
            changed.await;
        }
    }

    fn record(&self, call: EngineCall) -> Result<(), Error> {
        let op = call.op();
        self.calls.lock().push(call);
        self.changed.notify_waiters();
        let mut failures = self.failures.lock();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(make_err!(Code::Unavailable, "injected {op:?} failure"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EngineClient for MockEngine {
    async fn create(&self, image_id: &str) -> Result<ContainerId, Error> {
        self.record(EngineCall::Create(image_id.to_string()))?;
        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            // Closing the semaphore is the release signal.
            let _ = gate.acquire().await;
        }
        let n = self.next_container.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContainerId(format!("container-{n}")))
    }

    async fn start(&self, container: &ContainerId) -> Result<(), Error> {
        self.record(EngineCall::Start(container.clone()))
    }

    async fn stop(&self, container: &ContainerId) -> Result<(), Error> {
        self.record(EngineCall::Stop(container.clone()))
    }

    async fn restart(&self, container: &ContainerId) -> Result<(), Error> {
        self.record(EngineCall::Restart(container.clone()))
    }

    async fn remove(&self, container: &ContainerId) -> Result<(), Error> {
        self.record(EngineCall::Remove(container.clone()))
    }

    async fn exec(&self, container: &ContainerId, argv: Vec<String>) -> Result<ExecOutput, Error> {
        self.record(EngineCall::Exec(container.clone(), argv))?;
        Ok(ExecOutput {
            output: String::new(),
            exit_code: Some(0),
        })
    }

    async fn spawn_exec(&self, container: &ContainerId, argv: Vec<String>) -> Result<(), Error> {
        self.record(EngineCall::SpawnExec(container.clone(), argv))
    }

    async fn push_files(
        &self,
        container: &ContainerId,
        archive: &Path,
        destination: &str,
    ) -> Result<(), Error> {
        self.record(EngineCall::PushFiles(
            container.clone(),
            archive.to_path_buf(),
            destination.to_string(),
        ))
    }

    async fn resolve_image(&self, reference: &str) -> Result<String, Error> {
        self.record(EngineCall::ResolveImage(reference.to_string()))?;
        Ok(format!("sha256:{reference}"))
    }
}
