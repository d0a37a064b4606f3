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

use std::sync::Arc;

use chameleon_config::ChameleonConfig;
use chameleon_error::{Code, Error, ResultExt};
use chameleon_orchestrator::{
    CacheCoordinator, ContainerProvisioner, ControllerBundle, DockerEngine, EngineFactory,
    ExecutionDispatcher, HistoryStore, MemoryHistoryStore, ModelRegistry, NotificationPublisher,
    ObserverHub, PoolMetrics,
};
use chameleon_service::{ServiceState, router};
use chameleon_util::{background_spawn, init_tracing};
use clap::Parser;
use mimalloc::MiMalloc;
use tokio::net::TcpListener;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Serves ML models out of pre-warmed containers.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Config file to use.
    #[clap(value_parser)]
    config_file: String,
}

async fn inner_main(cfg: ChameleonConfig) -> Result<(), Error> {
    let callback = cfg.callback_endpoint().err_tip_with_code(|_| {
        (
            Code::InvalidArgument,
            format!(
                "callback.host is required when the listener binds to {}",
                cfg.listener.address
            ),
        )
    })?;
    let engines = Arc::new(EngineFactory::new(DockerEngine::connector(
        cfg.controller.stop_timeout_s,
    )));
    let store: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
    let metrics = Arc::new(PoolMetrics::default());
    let hub = Arc::new(ObserverHub::new());

    let registry = Arc::new(ModelRegistry::new(
        Arc::clone(&engines),
        cfg.regions.iter().cloned(),
    ));
    for model in &cfg.models {
        registry
            .register_model(model.clone())
            .await
            .err_tip(|| format!("while registering model {}", model.name))?;
    }

    let provisioner = Arc::new(ContainerProvisioner::new(
        engines,
        Arc::clone(&store),
        ControllerBundle::from(&cfg.controller),
        Arc::clone(&metrics),
    ));
    let coordinator = Arc::new(CacheCoordinator::new(provisioner));
    let dispatcher = Arc::new(ExecutionDispatcher::new(
        Arc::clone(&coordinator),
        NotificationPublisher::new(hub),
        callback,
    ));

    for model in registry.models() {
        let coordinator = Arc::clone(&coordinator);
        let name = model.name.clone();
        drop(background_spawn!(
            "initial_fill",
            async move {
                match coordinator.ensure_filled(&model).await {
                    Ok(outcome) => tracing::info!(?outcome, "initial fill finished"),
                    Err(err) => tracing::error!(?err, "initial fill failed"),
                }
            },
            model = name
        ));
    }

    let app = router(ServiceState {
        registry,
        dispatcher,
        store,
        metrics,
    });
    let listener = TcpListener::bind(&cfg.listener.address)
        .await
        .err_tip(|| format!("Could not bind to {}", cfg.listener.address))?;
    tracing::warn!(address = cfg.listener.address, "Ready, listening");
    axum::serve(listener, app)
        .await
        .err_tip(|| "while serving the http api")
}

async fn get_config() -> Result<ChameleonConfig, Error> {
    let args = Args::parse();
    let json_contents = String::from_utf8(
        tokio::fs::read(&args.config_file)
            .await
            .err_tip(|| format!("Could not open config file {}", args.config_file))?,
    )
    .err_tip(|| format!("Config file {} is not UTF-8", args.config_file))?;
    serde_json5::from_str(&json_contents)
        .err_tip(|| format!("Could not parse config file {}", args.config_file))
}

fn main() -> Result<(), Box<dyn core::error::Error>> {
    init_tracing()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let cfg = runtime.block_on(get_config())?;

    runtime.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "Failed to listen to SIGINT");
            return;
        }
        tracing::warn!("User terminated process via SIGINT");
        std::process::exit(130);
    });

    runtime
        .block_on(inner_main(cfg))
        .err_tip(|| "main() function failed")?;
    Ok(())
}
