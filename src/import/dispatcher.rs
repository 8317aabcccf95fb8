//! Entity name to pipeline routing.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialHasher, ValueGenerator};
use crate::entities;
use crate::error::{ImportError, ImportResult};
use crate::import::coordinator::{ImportPipeline, PipelineOptions};
use crate::import::stats::ImportReport;
use crate::import::strategy::EntityStrategy;
use crate::store::EntityStore;

pub struct Dispatcher {
    strategies: &'static [EntityStrategy],
    hasher: Arc<dyn CredentialHasher>,
    generator: Arc<dyn ValueGenerator>,
}

impl Dispatcher {
    pub fn new(hasher: Arc<dyn CredentialHasher>, generator: Arc<dyn ValueGenerator>) -> Self {
        Self {
            strategies: entities::STRATEGIES,
            hasher,
            generator,
        }
    }

    pub fn known_entities(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name).collect()
    }

    /// Case-insensitive lookup by entity name or alias.
    pub fn lookup(&self, name: &str) -> ImportResult<&'static EntityStrategy> {
        self.strategies
            .iter()
            .find(|strategy| strategy.answers_to(name))
            .ok_or_else(|| ImportError::UnknownEntity {
                name: name.to_string(),
                known: self
                    .known_entities()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
    }

    /// Run the import for `entity` and return its result unchanged.
    pub async fn dispatch<S: EntityStore>(
        &self,
        entity: &str,
        path: &Path,
        store: &mut S,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> ImportResult<ImportReport> {
        let strategy = self.lookup(entity)?;
        log::debug!("dispatching '{}' to {:?}", entity, strategy);
        ImportPipeline::new(
            strategy,
            options,
            self.hasher.clone(),
            self.generator.clone(),
            cancel,
        )
        .run(store, path)
        .await
    }
}
