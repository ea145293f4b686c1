//! Cross-module scenarios with in-process collaborators

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use weather_advisory::advisory::{AdvisoryProvider, AdvisoryRequest, MessageGenerator, ProviderError};
use weather_advisory::batch::OutcomeStatus;
use weather_advisory::config::AdvisoryConfig;
use weather_advisory::error::{FetchError, GenerationError, PushError};
use weather_advisory::forecast::{ForecastFetcher, ForecastProvider};
use weather_advisory::processor::RegionHandler;
use weather_advisory::push::{PushMessage, PushProvider};
use weather_advisory::store::{FORECASTS, MemoryStore, document_id};
use weather_advisory::users::User;
use weather_advisory::{Providers, Region, Services, Stage};

const SMOKE_CODES: [&str; 4] = ["016000", "130000", "270000", "471000"];

#[derive(Default)]
struct FakeForecasts {
    failing: HashSet<String>,
}

#[async_trait]
impl ForecastProvider for FakeForecasts {
    async fn fetch_raw(&self, padded_code: &str) -> Result<Value, FetchError> {
        if self.failing.contains(padded_code) {
            return Err(FetchError::Status {
                region_code: padded_code.to_string(),
                status: 503,
            });
        }
        Ok(json!([{
            "publishingOffice": "気象庁",
            "reportDatetime": "2026-10-19T05:00:00+09:00",
            "headlineText": "",
            "timeSeries": [{
                "timeDefines": ["2026-10-19T05:00:00+09:00", "2026-10-20T00:00:00+09:00"],
                "areas": [{"area": {"name": "area", "code": padded_code}, "weathers": ["晴れ", "くもり"]}]
            }]
        }]))
    }
}

/// Signals rate limiting for the first `rate_limited` calls, then answers.
#[derive(Default)]
struct FakeAdvisor {
    rate_limited: AtomicU32,
    calls: Mutex<Vec<Instant>>,
}

impl FakeAdvisor {
    fn rate_limited(times: u32) -> Self {
        Self {
            rate_limited: AtomicU32::new(times),
            ..Self::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AdvisoryProvider for FakeAdvisor {
    async fn request_advisory(&self, request: &AdvisoryRequest) -> Result<String, ProviderError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len()
        };
        let remaining = self.rate_limited.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rate_limited.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::RateLimited("429 Too Many Requests".to_string()));
        }
        Ok(json!({ "advisory": format!("Take an umbrella in {} ({call}).", request.region_code) })
            .to_string())
    }
}

#[derive(Default)]
struct FakePush {
    sent: Mutex<Vec<PushMessage>>,
}

#[async_trait]
impl PushProvider for FakePush {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct Harness {
    services: Services,
    advisor: Arc<FakeAdvisor>,
    push: Arc<FakePush>,
}

fn harness_with(config: AdvisoryConfig, forecasts: FakeForecasts, advisor: FakeAdvisor) -> Harness {
    let advisor = Arc::new(advisor);
    let push = Arc::new(FakePush::default());
    let services = Services::new(
        config,
        Providers {
            forecast: Arc::new(forecasts),
            advisory: advisor.clone(),
            push: push.clone(),
            documents: Arc::new(MemoryStore::new()),
        },
    )
    .unwrap();
    Harness {
        services,
        advisor,
        push,
    }
}

fn harness() -> Harness {
    harness_with(AdvisoryConfig::default(), FakeForecasts::default(), FakeAdvisor::default())
}

fn smoke_regions(services: &Services) -> Vec<Region> {
    services.catalog.select(&SMOKE_CODES).unwrap()
}

fn subscriber(id: &str, region_code: &str, token: Option<&str>) -> User {
    User {
        id: id.to_string(),
        region_code: region_code.to_string(),
        push_token: token.map(str::to_string),
        notifications_enabled: true,
    }
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_smoke_regions() {
    let Harness { services, push, .. } = harness();

    let summary = services.orchestrator.run(&smoke_regions(&services)).await.unwrap();

    assert_eq!(summary.total_regions, 4);
    assert_eq!(summary.success_count, 4);
    assert_eq!(summary.failure_count, 0);
    let codes: Vec<&str> = summary.outcomes.iter().map(|o| o.region_code.as_str()).collect();
    assert_eq!(codes, SMOKE_CODES);

    let today = services.store.today();
    let documents = services.store.documents();
    for code in SMOKE_CODES {
        let stored = documents.get(FORECASTS, &document_id(code, today)).await.unwrap();
        let stored = stored.unwrap_or_else(|| panic!("missing document for {code}"));
        assert_eq!(stored["regionCode"], code);
        assert!(stored["generatedMessage"].as_str().unwrap().contains(code));
    }
    assert_eq!(documents.list(FORECASTS).await.unwrap().len(), 4);

    services
        .users
        .put(&subscriber("u1", "471000", Some("ExponentPushToken[okinawa]")))
        .await
        .unwrap();
    let report = services.dispatcher.dispatch_all().await.unwrap();
    assert_eq!(report.sent, 1);
    let sent = push.sent.lock().unwrap();
    assert_eq!(sent[0].to, "ExponentPushToken[okinawa]");
    assert!(sent[0].body.contains("471000"));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_is_isolated() {
    let forecasts = FakeForecasts {
        failing: HashSet::from(["130000".to_string()]),
    };
    let Harness { services, .. } = harness_with(AdvisoryConfig::default(), forecasts, FakeAdvisor::default());

    let summary = services.orchestrator.run(&smoke_regions(&services)).await.unwrap();

    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.failure_count, 1);
    let failed = &summary.outcomes[1];
    assert_eq!(failed.region_code, "130000");
    assert_eq!(failed.status, OutcomeStatus::Failure);
    assert_eq!(failed.stage, Some(Stage::Fetch));
    assert!(summary.outcomes.iter().filter(|o| o.region_code != "130000").all(|o| o.is_success()));

    let today = services.store.today();
    assert!(services.store.load("130000", Some(today)).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reprocessing_overwrites_the_day_document() {
    let Harness { services, .. } = harness();

    let first = services.processor.process("270000").await.unwrap();
    let second = services.processor.process("270000").await.unwrap();

    assert_eq!(first.document_id, second.document_id);
    assert_ne!(first.message, second.message);
    let documents = services.store.documents().list(FORECASTS).await.unwrap();
    assert_eq!(documents.len(), 1);
    let stored = services.store.load("270000", None).await.unwrap().unwrap();
    assert_eq!(stored.generated_message, second.message);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_generation_backs_off_then_succeeds() {
    let config = AdvisoryConfig::default();
    let advisor = Arc::new(FakeAdvisor::rate_limited(2));
    let fetcher = ForecastFetcher::new(Arc::new(FakeForecasts::default()), 6);
    let generator = MessageGenerator::from_config(advisor.clone(), &config.generator);
    let forecast = fetcher.fetch("130000").await.unwrap();

    let start = Instant::now();
    let message = generator.generate(&forecast).await.unwrap();

    assert!(message.contains("130000"));
    assert_eq!(advisor.call_count(), 3);
    // 1000ms + 2000ms of backoff
    assert!(start.elapsed() >= Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_exhaustion_stops_at_max_retries() {
    let config = AdvisoryConfig::default();
    let advisor = Arc::new(FakeAdvisor::rate_limited(u32::MAX));
    let fetcher = ForecastFetcher::new(Arc::new(FakeForecasts::default()), 6);
    let generator = MessageGenerator::from_config(advisor.clone(), &config.generator);
    let forecast = fetcher.fetch("130000").await.unwrap();

    let err = generator.generate(&forecast).await.unwrap_err();

    assert!(matches!(err, GenerationError::RateLimitExceeded { attempts: 5 }));
    assert_eq!(advisor.call_count(), config.generator.max_retries as usize);
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_generations_are_spaced() {
    let Harness { services, advisor, .. } = harness();

    services.processor.process("016000").await.unwrap();
    services.processor.process("130000").await.unwrap();

    let calls = advisor.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[1] - calls[0] >= Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_twelve_regions_form_three_groups() {
    let mut config = AdvisoryConfig::default();
    config.generator.min_interval_ms = 0;
    let Harness { services, advisor, .. } =
        harness_with(config, FakeForecasts::default(), FakeAdvisor::default());
    let regions: Vec<Region> = services.catalog.all()[..12].to_vec();

    let start = Instant::now();
    let summary = services.orchestrator.run(&regions).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(summary.groups, 3);
    assert_eq!(summary.success_count, 12);
    assert_eq!(advisor.call_count(), 12);
    // two inter-group pauses, none after the last group
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(90));

    let calls = advisor.calls.lock().unwrap();
    assert!(calls[10] - calls[0] >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_skips_users_without_a_document() {
    let Harness { services, push, .. } = harness();
    services.processor.process("130000").await.unwrap();

    for user in [
        subscriber("tokyo", "130000", Some("ExponentPushToken[tokyo]")),
        subscriber("osaka", "270000", Some("ExponentPushToken[osaka]")),
        subscriber("silent", "130000", None),
    ] {
        services.users.put(&user).await.unwrap();
    }

    let report = services.dispatcher.dispatch_all().await.unwrap();

    assert_eq!(report.considered, 3);
    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.failed, 0);
    let sent = push.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ExponentPushToken[tokyo]");
}
