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

use std::path::PathBuf;
use std::sync::Arc;

use chameleon_config::{CallbackConfig, ModelConfig, ModelPaths};
use chameleon_orchestrator::{
    CacheCoordinator, ContainerProvisioner, ControllerBundle, EngineClient, EngineFactory,
    ExecutionDispatcher, ExecutionRequest, History, HistoryId, HistoryStatus, HistoryStore,
    InputArtifact, MemoryHistoryStore, Model, ModelRegistry, NotificationPublisher, ObserverHub,
    PoolMetrics, Region, User,
};

use super::mock_engine::MockEngine;

pub const REGION: &str = "main";
pub const CONTROLLER_TAR: &str = "/var/lib/chameleon/controller.tar";
pub const DEPENDENCIES_TAR: &str = "/var/lib/chameleon/dependencies.tar";

pub fn region(cache_size: usize) -> Region {
    Region {
        name: REGION.to_string(),
        host: "10.0.0.2".to_string(),
        port: 2375,
        cache_size,
    }
}

pub fn callback() -> CallbackConfig {
    CallbackConfig {
        host: "chameleon.test".to_string(),
        port: 5000,
    }
}

pub fn model_config(name: &str, cache_size: Option<usize>) -> ModelConfig {
    ModelConfig {
        name: name.to_string(),
        description: format!("{name} description"),
        region: REGION.to_string(),
        repository: "tester".to_string(),
        tag: None,
        cache_size,
        input_type: "text".to_string(),
        output_type: "text".to_string(),
        parameters: serde_json::json!({}),
        paths: ModelPaths::default(),
    }
}

pub fn request(user_id: u64) -> ExecutionRequest {
    ExecutionRequest {
        executor: User {
            id: user_id,
            username: format!("user{user_id}"),
        },
        input: InputArtifact {
            path: "uploads/input.txt".to_string(),
            original_name: "input.txt".to_string(),
            size: 12,
            mime_type: "text/plain".to_string(),
        },
        parameters: serde_json::json!({ "steps": 3 }),
    }
}

/// Every orchestrator component wired to one `MockEngine`.
#[derive(Debug)]
pub struct TestContext {
    pub engine: Arc<MockEngine>,
    pub store: Arc<MemoryHistoryStore>,
    pub hub: Arc<ObserverHub>,
    pub metrics: Arc<PoolMetrics>,
    pub registry: ModelRegistry,
    pub provisioner: Arc<ContainerProvisioner>,
    pub coordinator: Arc<CacheCoordinator>,
    pub dispatcher: Arc<ExecutionDispatcher>,
}

impl TestContext {
    pub fn new(region_cache_size: usize) -> Self {
        Self::with_seams(
            region_cache_size,
            |engine| -> Arc<dyn EngineClient> { engine },
            |store| -> Arc<dyn HistoryStore> { store },
        )
    }

    /// Lets a test wrap the engine and the store the components see. The
    /// context's `engine` and `store` stay the unwrapped ones.
    pub fn with_seams(
        region_cache_size: usize,
        wrap_engine: impl FnOnce(Arc<MockEngine>) -> Arc<dyn EngineClient>,
        wrap_store: impl FnOnce(Arc<MemoryHistoryStore>) -> Arc<dyn HistoryStore>,
    ) -> Self {
        let engine = MockEngine::new();
        let engines = Arc::new(EngineFactory::shared(wrap_engine(engine.clone())));
        let store = Arc::new(MemoryHistoryStore::new());
        let hub = Arc::new(ObserverHub::new());
        let metrics = Arc::new(PoolMetrics::default());
        let provisioner = Arc::new(ContainerProvisioner::new(
            Arc::clone(&engines),
            wrap_store(store.clone()),
            ControllerBundle {
                controller_path: PathBuf::from(CONTROLLER_TAR),
                dependencies_path: PathBuf::from(DEPENDENCIES_TAR),
            },
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(CacheCoordinator::new(Arc::clone(&provisioner)));
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            Arc::clone(&coordinator),
            NotificationPublisher::new(hub.clone()),
            callback(),
        ));
        Self {
            registry: ModelRegistry::new(engines, [region(region_cache_size)]),
            engine,
            store,
            hub,
            metrics,
            provisioner,
            coordinator,
            dispatcher,
        }
    }

    pub async fn model(&self, name: &str, cache_size: Option<usize>) -> Model {
        self.registry
            .register_model(model_config(name, cache_size))
            .await
            .unwrap()
    }

    pub async fn history(&self, record: &History) -> History {
        self.store.get(record.id.unwrap()).await.unwrap().unwrap()
    }

    pub async fn record(&self, id: HistoryId) -> History {
        self.store.get(id).await.unwrap().unwrap()
    }

    pub async fn cached_count(&self, model: &Model) -> usize {
        self.store
            .count_by_model_and_status(model.id, HistoryStatus::Cached)
            .await
            .unwrap()
    }
}
