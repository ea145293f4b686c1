//! Fetch, generate and store for a single region

use crate::advisory::MessageGenerator;
use crate::error::RegionError;
use crate::forecast::{Forecast, ForecastFetcher};
use crate::store::ForecastStore;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// What a successful region run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RegionResult {
    pub forecast: Forecast,
    pub message: String,
    pub document_id: String,
}

/// Unit of work the batch orchestrator runs per region
#[async_trait]
pub trait RegionHandler: Send + Sync {
    async fn process(&self, region_code: &str) -> Result<RegionResult, RegionError>;
}

/// Runs fetch -> generate -> store. The error variant names the failing stage.
#[derive(Clone)]
pub struct RegionProcessor {
    fetcher: ForecastFetcher,
    generator: MessageGenerator,
    store: ForecastStore,
}

impl RegionProcessor {
    pub fn new(fetcher: ForecastFetcher, generator: MessageGenerator, store: ForecastStore) -> Self {
        Self {
            fetcher,
            generator,
            store,
        }
    }
}

#[async_trait]
impl RegionHandler for RegionProcessor {
    #[instrument(skip(self))]
    async fn process(&self, region_code: &str) -> Result<RegionResult, RegionError> {
        let start = Instant::now();

        let result = async {
            let forecast = self.fetcher.fetch(region_code).await?;
            let message = self.generator.generate(&forecast).await?;
            let document_id = self.store.save(region_code, &forecast, &message).await?;
            Ok::<_, RegionError>(RegionResult {
                forecast,
                message,
                document_id,
            })
        }
        .await;

        match &result {
            Ok(done) => info!(
                document_id = %done.document_id,
                "Region processed in {:.3}s",
                start.elapsed().as_secs_f64()
            ),
            Err(err) => warn!(stage = %err.stage(), error = %err, "Region failed"),
        }
        result
    }
}
