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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chameleon_config::ModelConfig;
use chameleon_error::{Code, Error, ResultExt, error_if, make_err};
use parking_lot::RwLock;

use crate::engine::EngineFactory;
use crate::history::{Image, Model, ModelId, Region};

#[derive(Debug, Default)]
struct RegistryState {
    next_model_id: u64,
    regions: HashMap<String, Region>,
    models: BTreeMap<ModelId, Model>,
}

/// Lookup of regions and models.
#[derive(Debug)]
pub struct ModelRegistry {
    engines: Arc<EngineFactory>,
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    pub fn new(engines: Arc<EngineFactory>, regions: impl IntoIterator<Item = Region>) -> Self {
        let regions = regions
            .into_iter()
            .map(|region| (region.name.clone(), region))
            .collect();
        Self {
            engines,
            state: RwLock::new(RegistryState {
                regions,
                ..RegistryState::default()
            }),
        }
    }

    pub fn region(&self, name: &str) -> Result<Region, Error> {
        self.state
            .read()
            .regions
            .get(name)
            .cloned()
            .err_tip_with_code(|_| (Code::NotFound, format!("region {name} does not exist")))
    }

    pub fn model(&self, id: ModelId) -> Result<Model, Error> {
        self.state
            .read()
            .models
            .get(&id)
            .cloned()
            .err_tip_with_code(|_| (Code::NotFound, format!("model {id} does not exist")))
    }

    pub fn model_by_unique_name(&self, unique_name: &str) -> Result<Model, Error> {
        self.state
            .read()
            .models
            .values()
            .find(|model| model.unique_name == unique_name)
            .cloned()
            .err_tip_with_code(|_| (Code::NotFound, format!("model {unique_name} does not exist")))
    }

    pub fn models(&self) -> Vec<Model> {
        self.state.read().models.values().cloned().collect()
    }

    /// Registers a model whose image is already loaded in its region's
    /// engine. The image is resolved to its engine id before the model is
    /// stored. Filling the warm pool is left to the caller.
    pub async fn register_model(&self, config: ModelConfig) -> Result<Model, Error> {
        error_if!(config.name.trim().is_empty(), "model name must not be empty");
        let region = self.region(&config.region)?;
        let repository = config.repository.to_lowercase();
        let tag = match &config.tag {
            Some(tag) => tag.clone(),
            None => self.permalink(&repository, &config.name),
        };
        let reference = format!("{repository}:{tag}");

        let engine = self.engines.client(&region)?;
        let unique_id = engine
            .resolve_image(&reference)
            .await
            .err_tip(|| format!("while resolving image of model {}", config.name))?;

        let mut state = self.state.write();
        if state
            .models
            .values()
            .any(|model| model.image.repository == repository && model.image.tag == tag)
        {
            return Err(make_err!(
                Code::AlreadyExists,
                "image {reference} is already registered"
            ));
        }
        state.next_model_id += 1;
        let model = Model {
            id: ModelId(state.next_model_id),
            unique_name: tag.clone(),
            name: config.name,
            description: config.description,
            cache_size: config.cache_size.unwrap_or(region.cache_size),
            image: Image {
                repository,
                tag,
                unique_id,
                region,
            },
            input_type: config.input_type,
            output_type: config.output_type,
            parameters: config.parameters,
            paths: config.paths,
        };
        state.models.insert(model.id, model.clone());
        tracing::info!(
            model = model.name,
            model_id = %model.id,
            image = model.image.reference(),
            cache_size = model.cache_size,
            "registered model"
        );
        Ok(model)
    }

    /// Derives a tag from `name` that no other image of `repository` uses.
    fn permalink(&self, repository: &str, name: &str) -> String {
        let state = self.state.read();
        let tags = state
            .models
            .values()
            .filter(|model| model.image.repository == repository)
            .map(|model| model.image.tag.as_str());
        next_permalink(name, tags)
    }
}

/// Lower-cases `name` and replaces spaces with dashes. If that tag is taken,
/// appends `-N` where N is one more than the highest suffix in use.
pub fn next_permalink<'a>(name: &str, existing_tags: impl IntoIterator<Item = &'a str>) -> String {
    let base = name.to_lowercase().replace(' ', "-");
    let highest = existing_tags
        .into_iter()
        .filter_map(|tag| {
            if tag == base {
                return Some(0);
            }
            tag.strip_prefix(&base)?
                .strip_prefix('-')?
                .parse::<u64>()
                .ok()
        })
        .max();
    match highest {
        None => base,
        Some(index) => format!("{base}-{}", index + 1),
    }
}
