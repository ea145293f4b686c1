//! Japan Meteorological Agency forecast endpoint

use super::ForecastProvider;
use crate::config::ForecastConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct JmaForecastProvider {
    client: Client,
    base_url: String,
}

impl JmaForecastProvider {
    pub fn new(config: &ForecastConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(concat!("weather-advisory/", env!("CARGO_PKG_VERSION")))
            .build()
            .with_context(|| "Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, padded_code: &str) -> String {
        format!(
            "{}/{}.json",
            self.base_url,
            urlencoding::encode(padded_code)
        )
    }
}

#[async_trait]
impl ForecastProvider for JmaForecastProvider {
    async fn fetch_raw(&self, padded_code: &str) -> Result<Value, FetchError> {
        let url = self.url_for(padded_code);
        debug!("JMA request URL: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                region_code: padded_code.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                region_code: padded_code.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| FetchError::Parse {
            region_code: padded_code.to_string(),
            message: e.to_string(),
        })
    }
}
