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
use std::path::Path;

use async_trait::async_trait;
use chameleon_error::Error;
use chameleon_orchestrator::{ContainerId, EngineClient, ExecOutput};

/// Engine that accepts every call and mints sequential container ids.
#[derive(Debug, Default)]
pub struct StubEngine {
    next_container: AtomicU64,
    spawned: AtomicU64,
}

impl StubEngine {
    /// Number of controllers launched so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EngineClient for StubEngine {
    async fn create(&self, _image_id: &str) -> Result<ContainerId, Error> {
        let n = self.next_container.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(ContainerId(format!("container-{n}")))
    }

    async fn start(&self, _container: &ContainerId) -> Result<(), Error> {
        Ok(())
    }

    async fn stop(&self, _container: &ContainerId) -> Result<(), Error> {
        Ok(())
    }

    async fn restart(&self, _container: &ContainerId) -> Result<(), Error> {
        Ok(())
    }

    async fn remove(&self, _container: &ContainerId) -> Result<(), Error> {
        Ok(())
    }

    async fn exec(&self, _container: &ContainerId, _argv: Vec<String>) -> Result<ExecOutput, Error> {
        Ok(ExecOutput {
            exit_code: Some(0),
            ..ExecOutput::default()
        })
    }

    async fn spawn_exec(&self, _container: &ContainerId, _argv: Vec<String>) -> Result<(), Error> {
        self.spawned.fetch_add(1, Ordering::Release);
        Ok(())
    }

    async fn push_files(
        &self,
        _container: &ContainerId,
        _archive: &Path,
        _destination: &str,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn resolve_image(&self, reference: &str) -> Result<String, Error> {
        Ok(format!("sha256:{reference}"))
    }
}
