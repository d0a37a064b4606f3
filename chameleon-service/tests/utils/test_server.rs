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

use core::time::Duration;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use chameleon_config::{CallbackConfig, ModelConfig, ModelPaths, RegionConfig};
use chameleon_orchestrator::{
    CacheCoordinator, ContainerProvisioner, ControllerBundle, EngineClient, EngineFactory,
    ExecutionDispatcher, History, HistoryId, HistoryStatus, HistoryStore, MemoryHistoryStore, Model,
    ModelRegistry, NotificationPublisher, ObserverHub, PoolMetrics,
};
use chameleon_service::{ServiceState, router};
use serde_json::Value;
use tower::ServiceExt;

use super::stub_engine::StubEngine;

/// The service router wired to a `StubEngine`.
#[derive(Debug)]
pub struct TestServer {
    pub engine: Arc<StubEngine>,
    pub store: Arc<MemoryHistoryStore>,
    pub registry: Arc<ModelRegistry>,
    pub app: Router,
}

impl TestServer {
    pub fn new(cache_size: usize) -> Self {
        let engine = Arc::new(StubEngine::default());
        let client: Arc<dyn EngineClient> = engine.clone();
        let engines = Arc::new(EngineFactory::shared(client));
        let store = Arc::new(MemoryHistoryStore::new());
        let metrics = Arc::new(PoolMetrics::default());
        let registry = Arc::new(ModelRegistry::new(
            Arc::clone(&engines),
            [RegionConfig {
                name: "main".to_string(),
                host: "10.0.0.2".to_string(),
                port: 2375,
                cache_size,
            }],
        ));
        let provisioner = Arc::new(ContainerProvisioner::new(
            engines,
            store.clone(),
            ControllerBundle {
                controller_path: PathBuf::from("/var/lib/chameleon/controller.tar"),
                dependencies_path: PathBuf::from("/var/lib/chameleon/dependencies.tar"),
            },
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            Arc::new(CacheCoordinator::new(provisioner)),
            NotificationPublisher::new(Arc::new(ObserverHub::new())),
            CallbackConfig {
                host: "chameleon.test".to_string(),
                port: 5000,
            },
        ));
        let app = router(ServiceState {
            registry: Arc::clone(&registry),
            dispatcher,
            store: store.clone(),
            metrics,
        });
        Self {
            engine,
            store,
            registry,
            app,
        }
    }

    pub async fn model(&self, name: &str) -> Model {
        self.registry
            .register_model(ModelConfig {
                name: name.to_string(),
                description: String::new(),
                region: "main".to_string(),
                repository: "tester".to_string(),
                tag: None,
                cache_size: None,
                input_type: "image".to_string(),
                output_type: "text".to_string(),
                parameters: serde_json::json!({}),
                paths: ModelPaths::default(),
            })
            .await
            .unwrap()
    }

    /// Sends one request and decodes the JSON body. An empty body decodes to
    /// `Value::Null`.
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn store_record(&self, id: HistoryId) -> History {
        self.store.get(id).await.unwrap().unwrap()
    }

    /// Waits until the record reaches `status`.
    pub async fn wait_for_status(&self, id: HistoryId, status: HistoryStatus) {
        for _ in 0..500 {
            if let Some(record) = self.store.get(id).await.unwrap() {
                if record.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("history {id} never reached {status:?}");
    }
}
