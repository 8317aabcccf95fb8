//! Import coordination.
//!
//! Drives one entity import from file to store: rows stream out of the
//! source one at a time, get validated and built by the entity strategy,
//! are resolved against the store, and land in the batch writer which
//! flushes whenever the batch fills up and once more at the end.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialHasher, ValueGenerator};
use crate::config::{DEFAULT_BATCH_SIZE, HeaderMatch, ImportSettings};
use crate::error::ImportResult;
use crate::import::batch::BatchWriter;
use crate::import::ensure_live;
use crate::import::resolver::{Decision, UpsertResolver};
use crate::import::source::RowSource;
use crate::import::stats::{ImportReport, RejectCounter, RunCounters};
use crate::import::strategy::{EntityStrategy, RunContext};
use crate::import::validate::RowValidator;
use crate::store::EntityStore;

/// Knobs taken from the settings for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub header_match: HeaderMatch,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            header_match: HeaderMatch::default(),
        }
    }
}

impl From<&ImportSettings> for PipelineOptions {
    fn from(settings: &ImportSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            header_match: settings.header_match,
        }
    }
}

/// Generic batched upsert pipeline for one entity strategy.
pub struct ImportPipeline {
    strategy: &'static EntityStrategy,
    options: PipelineOptions,
    hasher: Arc<dyn CredentialHasher>,
    generator: Arc<dyn ValueGenerator>,
    cancel: CancellationToken,
}

impl ImportPipeline {
    pub fn new(
        strategy: &'static EntityStrategy,
        options: PipelineOptions,
        hasher: Arc<dyn CredentialHasher>,
        generator: Arc<dyn ValueGenerator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            strategy,
            options,
            hasher,
            generator,
            cancel,
        }
    }

    /// Import every row of `path` into `store`.
    ///
    /// # Returns
    /// The final counters and reference warnings. On cancellation the staged
    /// batch is dropped and [`ImportError::Cancelled`] is returned; on a
    /// failed flush the store error is returned and counters are not
    /// reconciled.
    ///
    /// [`ImportError::Cancelled`]: crate::error::ImportError::Cancelled
    pub async fn run<S: EntityStore>(&self, store: &mut S, path: &Path) -> ImportResult<ImportReport> {
        let strategy = self.strategy;
        let source = RowSource::open(
            path,
            strategy.name,
            strategy.columns,
            self.options.header_match,
            self.cancel.clone(),
        )?;

        let mut ctx = RunContext::new(self.hasher.clone());
        if strategy.loads_roles {
            ensure_live(&self.cancel)?;
            let roles = store.role_directory().await?;
            log::debug!("{}: loaded {} roles", strategy.name, roles.len());
            ctx.load_roles(roles);
        }

        let validator = RowValidator::new(strategy.columns);
        let mut resolver = UpsertResolver::new(strategy);
        let mut writer = BatchWriter::new(self.options.batch_size, self.generator.clone());
        let mut counters = RunCounters::default();

        log::info!("importing {} from {}", strategy.name, path.display());

        for row in source {
            let row = row?;
            counters.read += 1;

            let built = validator
                .validate(&row)
                .and_then(|valid| (strategy.build)(&valid, &mut ctx));
            match built {
                Ok(candidate) => {
                    let decision = resolver
                        .resolve(store, candidate, &mut writer, &mut ctx, &self.cancel)
                        .await?;
                    tally(&mut counters, decision, strategy.reject);
                }
                Err(rejection) => {
                    log::debug!("{} line {}: {}", strategy.name, row.line, rejection);
                    counters.reject(strategy.reject);
                }
            }

            if writer.is_full() {
                self.flush(store, &mut writer, &mut resolver, &mut counters)
                    .await?;
                log::info!("progress: entity={} {}", strategy.name, counters);
            }

            tokio::task::yield_now().await;
        }

        self.flush(store, &mut writer, &mut resolver, &mut counters)
            .await?;
        log::info!("done: entity={} {}", strategy.name, counters);

        Ok(ImportReport {
            entity: strategy.name,
            counters,
            warnings: ctx.into_warnings(),
        })
    }

    async fn flush<S: EntityStore>(
        &self,
        store: &mut S,
        writer: &mut BatchWriter,
        resolver: &mut UpsertResolver,
        counters: &mut RunCounters,
    ) -> ImportResult<()> {
        ensure_live(&self.cancel)?;
        match writer.flush(store).await {
            Ok(inserted) => {
                counters.inserted += inserted;
                resolver.forget_staged();
                Ok(())
            }
            Err(err) => {
                log::error!(
                    "flush failed: entity={} {} error={}",
                    self.strategy.name,
                    counters,
                    err
                );
                Err(err)
            }
        }
    }
}

/// Inserts are counted when their batch lands; everything else at decision time.
fn tally(counters: &mut RunCounters, decision: Decision, reject: RejectCounter) {
    match decision {
        Decision::Insert | Decision::Unchanged => {}
        Decision::Update => counters.updated += 1,
        Decision::SkipDuplicate => {
            counters.duplicates += 1;
            counters.skipped += 1;
        }
        Decision::SkipInvalidReference => counters.reject(reject),
    }
}
