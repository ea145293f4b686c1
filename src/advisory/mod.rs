//! Advisory message generation
//!
//! [`MessageGenerator`] turns a [`Forecast`] into a short advisory through an
//! [`AdvisoryProvider`]. Every provider call first passes the shared
//! [`RateLimiter`]. Rate-limit responses are retried with exponential
//! backoff; every other failure is returned immediately.

pub mod gemini;
pub mod retry;
pub mod throttle;

use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::forecast::Forecast;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

pub use gemini::GeminiProvider;
pub use retry::BackoffPolicy;
pub use throttle::RateLimiter;

const INSTRUCTION: &str = "\
The following is today's official weather forecast for one region, as JSON. \
Write the single short remark a parent would make to their child heading out \
the door after seeing this forecast on the morning news: mention only what \
matters for the day (umbrella, jacket, heat). Answer with JSON of the form \
{\"advisory\": \"...\"} and nothing else.";

/// Provider call outcome that the retry loop needs to distinguish
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Payload handed to the provider for one region
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryRequest {
    pub region_code: String,
    pub forecast_json: String,
}

impl AdvisoryRequest {
    pub fn from_forecast(forecast: &Forecast) -> Result<Self, GenerationError> {
        let forecast_json = serde_json::to_string_pretty(forecast)
            .map_err(|e| GenerationError::failed(format!("cannot encode forecast: {e}")))?;
        Ok(Self {
            region_code: forecast.region_code.clone(),
            forecast_json,
        })
    }

    /// Full prompt text: instruction followed by the forecast
    #[must_use]
    pub fn prompt(&self) -> String {
        format!("{INSTRUCTION}\n\n{}", self.forecast_json)
    }
}

/// Generative text provider. Returns the raw response text, expected to be
/// a JSON object with an `advisory` string.
#[async_trait]
pub trait AdvisoryProvider: Send + Sync {
    async fn request_advisory(&self, request: &AdvisoryRequest) -> Result<String, ProviderError>;
}

#[derive(Deserialize)]
struct AdvisoryPayload {
    advisory: Option<String>,
}

/// Check the provider's response against the `{advisory: string}` schema.
pub fn parse_advisory(raw: &str, max_chars: usize) -> Result<String, GenerationError> {
    let payload: AdvisoryPayload = serde_json::from_str(raw.trim())
        .map_err(|e| GenerationError::invalid_response(format!("not an advisory object: {e}")))?;

    let advisory = payload
        .advisory
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| GenerationError::invalid_response("advisory is missing or empty"))?;

    let length = advisory.chars().count();
    if length > max_chars {
        return Err(GenerationError::invalid_response(format!(
            "advisory is {length} characters, limit is {max_chars}"
        )));
    }

    Ok(advisory)
}

#[derive(Clone)]
pub struct MessageGenerator {
    provider: Arc<dyn AdvisoryProvider>,
    limiter: Arc<RateLimiter>,
    backoff: BackoffPolicy,
    max_chars: usize,
}

impl MessageGenerator {
    pub fn new(
        provider: Arc<dyn AdvisoryProvider>,
        limiter: Arc<RateLimiter>,
        backoff: BackoffPolicy,
        max_chars: usize,
    ) -> Self {
        Self {
            provider,
            limiter,
            backoff,
            max_chars,
        }
    }

    /// Generator with its own limiter, built from configuration
    pub fn from_config(provider: Arc<dyn AdvisoryProvider>, config: &GeneratorConfig) -> Self {
        Self::new(
            provider,
            Arc::new(RateLimiter::new(config.min_interval())),
            BackoffPolicy::from_config(config),
            config.max_advisory_chars,
        )
    }

    #[instrument(skip(self, forecast), fields(region_code = %forecast.region_code))]
    pub async fn generate(&self, forecast: &Forecast) -> Result<String, GenerationError> {
        let request = AdvisoryRequest::from_forecast(forecast)?;
        let start = Instant::now();
        let max_attempts = self.backoff.max_attempts.max(1);

        for attempt in 0..max_attempts {
            self.limiter.acquire().await;

            match self.provider.request_advisory(&request).await {
                Ok(raw) => {
                    let advisory = parse_advisory(&raw, self.max_chars)?;
                    info!(
                        attempt = attempt + 1,
                        chars = advisory.chars().count(),
                        "Generated advisory in {:.3}s",
                        start.elapsed().as_secs_f64()
                    );
                    return Ok(advisory);
                }
                Err(ProviderError::RateLimited(reason)) => {
                    if attempt + 1 >= max_attempts {
                        warn!(attempt = attempt + 1, %reason, "Rate limited, no attempts left");
                        break;
                    }
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "Rate limited, backing off"
                    );
                    sleep(delay).await;
                }
                Err(ProviderError::Generation(err)) => {
                    debug!(error = %err, "Generation failed, not retrying");
                    return Err(err);
                }
            }
        }

        Err(GenerationError::RateLimitExceeded {
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::TimeSeries;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    fn forecast() -> Forecast {
        Forecast {
            region_code: "130000".to_string(),
            publishing_office: "気象庁".to_string(),
            report_datetime: DateTime::parse_from_rfc3339("2026-10-19T05:00:00+09:00").unwrap(),
            headline: None,
            time_series: vec![TimeSeries {
                time_defines: vec!["2026-10-19T05:00:00+09:00".to_string()],
                areas: vec![],
            }],
        }
    }

    enum Scripted {
        RateLimited,
        Fail,
        Text(&'static str),
    }

    struct ScriptedProvider {
        script: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AdvisoryProvider for ScriptedProvider {
        async fn request_advisory(&self, _request: &AdvisoryRequest) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            match next.unwrap_or(Scripted::RateLimited) {
                Scripted::RateLimited => Err(ProviderError::RateLimited("429".to_string())),
                Scripted::Fail => Err(GenerationError::failed("HTTP 500").into()),
                Scripted::Text(text) => Ok(text.to_string()),
            }
        }
    }

    fn generator(provider: Arc<ScriptedProvider>, min_interval_ms: u64) -> MessageGenerator {
        MessageGenerator::new(
            provider,
            Arc::new(RateLimiter::new(Duration::from_millis(min_interval_ms))),
            BackoffPolicy::new(5, Duration::from_millis(1000), Duration::from_millis(32_000)),
            200,
        )
    }

    #[test]
    fn test_parse_advisory() {
        assert_eq!(
            parse_advisory(r#"{"advisory": "  Take an umbrella.  "}"#, 200).unwrap(),
            "Take an umbrella."
        );
        assert!(matches!(
            parse_advisory("Take an umbrella.", 200),
            Err(GenerationError::InvalidResponse { .. })
        ));
        assert!(matches!(
            parse_advisory(r#"{"advisory": "   "}"#, 200),
            Err(GenerationError::InvalidResponse { .. })
        ));
        assert!(matches!(
            parse_advisory(r#"{"message": "hi"}"#, 200),
            Err(GenerationError::InvalidResponse { .. })
        ));
        assert!(matches!(
            parse_advisory(r#"{"advisory": "傘を持って行きなさい"}"#, 5),
            Err(GenerationError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_prompt_contains_forecast() {
        let request = AdvisoryRequest::from_forecast(&forecast()).unwrap();
        assert!(request.prompt().contains("\"publishingOffice\""));
        assert!(request.prompt().starts_with(INSTRUCTION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limits_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Scripted::RateLimited,
            Scripted::RateLimited,
            Scripted::Text(r#"{"advisory": "Bring a jacket tonight."}"#),
        ]);
        let generator = generator(provider.clone(), 0);
        let start = Instant::now();

        let advisory = generator.generate(&forecast()).await.unwrap();

        assert_eq!(advisory, "Bring a jacket tonight.");
        assert_eq!(provider.call_count(), 3);
        assert!(start.elapsed() >= Duration::from_millis(1000 + 2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_stops_at_max_attempts() {
        let provider = ScriptedProvider::new(vec![]);
        let generator = generator(provider.clone(), 0);

        let err = generator.generate(&forecast()).await.unwrap_err();

        assert!(matches!(err, GenerationError::RateLimitExceeded { attempts: 5 }));
        assert_eq!(provider.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_are_not_retried() {
        let provider = ScriptedProvider::new(vec![Scripted::Fail]);
        let err = generator(provider.clone(), 0)
            .generate(&forecast())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Failed { .. }));
        assert_eq!(provider.call_count(), 1);

        let provider = ScriptedProvider::new(vec![Scripted::Text("not json")]);
        let err = generator(provider.clone(), 0)
            .generate(&forecast())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidResponse { .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_respect_min_interval() {
        let provider = ScriptedProvider::new(vec![
            Scripted::Text(r#"{"advisory": "Sunny."}"#),
            Scripted::Text(r#"{"advisory": "Sunny again."}"#),
        ]);
        let generator = generator(provider.clone(), 1000);

        generator.generate(&forecast()).await.unwrap();
        generator.generate(&forecast()).await.unwrap();

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_millis(1000));
    }
}
