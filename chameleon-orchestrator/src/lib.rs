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

//! Model execution and warm container pool orchestration.
//!
//! Every model keeps a pool of pre-started containers, each recorded as a
//! `Cached` [`History`]. An execution claims one of them (or provisions a
//! container on the spot), then walks its record through `Initializing`,
//! `Running` and a terminal status while observers are kept informed.

pub mod cache_coordinator;
pub mod dispatcher;
pub mod docker_engine;
pub mod engine;
pub mod history;
pub mod history_store;
pub mod metrics;
pub mod model_registry;
pub mod notifier;
pub mod provisioner;

pub use cache_coordinator::{CacheCoordinator, FillOutcome};
pub use dispatcher::{
    Completion, CompletionResult, ExecutionDispatcher, ExecutionRequest, ExecutionTicket,
};
pub use docker_engine::DockerEngine;
pub use engine::{ContainerHandle, EngineClient, EngineConnector, EngineFactory, ExecOutput};
pub use history::{
    ContainerId, History, HistoryId, HistoryStatus, Image, InputArtifact, Model, ModelId,
    OutputInfo, Region, User,
};
pub use history_store::{HistoryStore, MemoryHistoryStore};
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use model_registry::ModelRegistry;
pub use notifier::{
    HistoryUpdate, NotificationPublisher, NotificationSink, Observer, ObserverHub, ObserverId,
};
pub use provisioner::{ContainerProvisioner, ControllerBundle};
