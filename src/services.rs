//! Wiring of providers, stores and pipeline components

use crate::AdvisoryError;
use crate::advisory::{AdvisoryProvider, GeminiProvider, MessageGenerator};
use crate::batch::BatchOrchestrator;
use crate::config::AdvisoryConfig;
use crate::forecast::{ForecastFetcher, ForecastProvider, JmaForecastProvider};
use crate::processor::RegionProcessor;
use crate::push::{ExpoPushProvider, NotificationDispatcher, PushProvider};
use crate::regions::RegionCatalog;
use crate::store::{DocumentStore, ForecastStore, open_store};
use crate::users::UserDirectory;
use anyhow::Context;
use std::sync::Arc;

/// External collaborators the pipeline talks to
#[derive(Clone)]
pub struct Providers {
    pub forecast: Arc<dyn ForecastProvider>,
    pub advisory: Arc<dyn AdvisoryProvider>,
    pub push: Arc<dyn PushProvider>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Providers {
    /// HTTP bindings and the configured document store
    pub fn from_config(config: &AdvisoryConfig) -> anyhow::Result<Self> {
        Ok(Self {
            forecast: Arc::new(
                JmaForecastProvider::new(&config.forecast)
                    .context("Failed to set up the forecast provider")?,
            ),
            advisory: Arc::new(
                GeminiProvider::new(&config.generator)
                    .context("Failed to set up the advisory provider")?,
            ),
            push: Arc::new(
                ExpoPushProvider::new(&config.push).context("Failed to set up the push provider")?,
            ),
            documents: open_store(&config.store)?,
        })
    }
}

/// Everything the CLI, scheduler and HTTP handlers need
pub struct Services {
    pub config: AdvisoryConfig,
    pub catalog: RegionCatalog,
    pub store: ForecastStore,
    pub users: UserDirectory,
    pub processor: Arc<RegionProcessor>,
    pub orchestrator: BatchOrchestrator,
    pub dispatcher: NotificationDispatcher,
}

impl Services {
    pub fn new(config: AdvisoryConfig, providers: Providers) -> Result<Self, AdvisoryError> {
        let tz = config.schedule.tz()?;
        let store = ForecastStore::new(providers.documents.clone(), tz);
        let users = UserDirectory::new(providers.documents);

        let processor = Arc::new(RegionProcessor::new(
            ForecastFetcher::new(providers.forecast, config.forecast.code_width),
            MessageGenerator::from_config(providers.advisory, &config.generator),
            store.clone(),
        ));
        let orchestrator = BatchOrchestrator::from_config(processor.clone(), &config.batch);
        let dispatcher = NotificationDispatcher::new(
            users.clone(),
            store.clone(),
            providers.push,
            config.push.title.clone(),
        );

        Ok(Self {
            config,
            catalog: RegionCatalog::new(),
            store,
            users,
            processor,
            orchestrator,
            dispatcher,
        })
    }

    pub fn from_config(config: AdvisoryConfig) -> anyhow::Result<Self> {
        let providers = Providers::from_config(&config)?;
        Ok(Self::new(config, providers)?)
    }
}
