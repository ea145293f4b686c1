//! Forecast document persistence
//!
//! Documents live in named collections of a [`DocumentStore`]. Forecast
//! documents are keyed `{YYYYMMDD}-{regionCode}`, with the date taken in the
//! configured timezone, so one region has at most one document per local
//! day. Writes are whole-document upserts; the last write of a day wins.

pub mod memory;
pub mod migrate;
pub mod redb_store;

use crate::AdvisoryError;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::forecast::Forecast;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub use memory::MemoryStore;
pub use migrate::{MigrationFailure, MigrationReport, migrate};
pub use redb_store::RedbStore;

/// Collection holding one document per region per day
pub const FORECASTS: &str = "forecasts";
/// Collection holding subscriber documents
pub const USERS: &str = "users";

const DATE_FORMAT: &str = "%Y%m%d";

/// Keyed JSON document storage
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or fully replace the document at `id`.
    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// All documents of a collection, ordered by id.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Stored advisory for one region and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDocument {
    pub document_id: String,
    pub region_code: String,
    pub raw_forecast: Value,
    pub generated_message: String,
    pub created_at: DateTime<Utc>,
}

/// Deterministic document id for a region and local calendar day
#[must_use]
pub fn document_id(region_code: &str, date: NaiveDate) -> String {
    format!("{}-{region_code}", date.format(DATE_FORMAT))
}

/// Parse a `YYYYMMDD` date as used in document ids.
pub fn parse_date(value: &str) -> Result<NaiveDate, AdvisoryError> {
    if value.len() != 8 {
        return Err(AdvisoryError::validation(format!(
            "date '{value}' must have the form YYYYMMDD"
        )));
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        AdvisoryError::validation(format!("date '{value}' must have the form YYYYMMDD: {e}"))
    })
}

#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Open the configured backend.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    if config.ephemeral {
        info!("Using in-memory document store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = Path::new(&config.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
    }
    let store = RedbStore::open(path)
        .with_context(|| format!("Failed to open document store at {}", path.display()))?;
    info!(path = %path.display(), "Opened document store");
    Ok(Arc::new(store))
}

/// Per-region-per-day advisory documents
#[derive(Clone)]
pub struct ForecastStore {
    documents: Arc<dyn DocumentStore>,
    tz: Tz,
}

impl ForecastStore {
    pub fn new(documents: Arc<dyn DocumentStore>, tz: Tz) -> Self {
        Self { documents, tz }
    }

    #[must_use]
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Current calendar day in the configured timezone
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Upsert today's document for a region. Returns the document id.
    #[instrument(skip(self, forecast, message))]
    pub async fn save(
        &self,
        region_code: &str,
        forecast: &Forecast,
        message: &str,
    ) -> Result<String, StoreError> {
        let raw_forecast = serde_json::to_value(forecast)?;
        self.save_on(self.today(), region_code, raw_forecast, message)
            .await
    }

    /// Upsert the document for an explicit day.
    pub async fn save_on(
        &self,
        date: NaiveDate,
        region_code: &str,
        raw_forecast: Value,
        message: &str,
    ) -> Result<String, StoreError> {
        if message.trim().is_empty() {
            return Err(StoreError::unknown(format!(
                "refusing to store an empty advisory for {region_code}"
            )));
        }

        let id = document_id(region_code, date);
        let document = ForecastDocument {
            document_id: id.clone(),
            region_code: region_code.to_string(),
            raw_forecast,
            generated_message: message.to_string(),
            created_at: Utc::now(),
        };

        self.documents
            .set(FORECASTS, &id, serde_json::to_value(&document)?)
            .await?;
        debug!(document_id = %id, "Stored forecast document");
        Ok(id)
    }

    /// Point lookup. `None` date means today; a missing document is `Ok(None)`.
    pub async fn load(
        &self,
        region_code: &str,
        date: Option<NaiveDate>,
    ) -> Result<Option<ForecastDocument>, StoreError> {
        let id = document_id(region_code, date.unwrap_or_else(|| self.today()));
        match self.documents.get(FORECASTS, &id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, region_code: &str, date: NaiveDate) -> Result<bool, StoreError> {
        self.documents
            .delete(FORECASTS, &document_id(region_code, date))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::TimeSeries;
    use rstest::rstest;

    fn forecast() -> Forecast {
        Forecast {
            region_code: "270000".to_string(),
            publishing_office: "大阪管区気象台".to_string(),
            report_datetime: DateTime::parse_from_rfc3339("2026-10-19T05:00:00+09:00").unwrap(),
            headline: None,
            time_series: vec![TimeSeries {
                time_defines: vec!["2026-10-19T05:00:00+09:00".to_string()],
                areas: vec![],
            }],
        }
    }

    fn store() -> ForecastStore {
        ForecastStore::new(Arc::new(MemoryStore::new()), chrono_tz::Asia::Tokyo)
    }

    #[rstest]
    #[case("130000", 2026, 10, 19, "20261019-130000")]
    #[case("016000", 2027, 1, 2, "20270102-016000")]
    fn test_document_id(
        #[case] code: &str,
        #[case] y: i32,
        #[case] m: u32,
        #[case] d: u32,
        #[case] expected: &str,
    ) {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(document_id(code, date), expected);
    }

    #[rstest]
    #[case("2026-10-19")]
    #[case("20261340")]
    #[case("2026101")]
    fn test_parse_date_rejects(#[case] input: &str) {
        assert!(matches!(parse_date(input), Err(AdvisoryError::Validation { .. })));
    }

    #[test]
    fn test_parse_date_round_trip() {
        let date = parse_date("20261019").unwrap();
        assert_eq!(format_date(date), "20261019");
    }

    #[test]
    fn test_today_uses_configured_timezone() {
        let tokyo = ForecastStore::new(Arc::new(MemoryStore::new()), chrono_tz::Asia::Tokyo);
        assert_eq!(tokyo.today(), Utc::now().with_timezone(&chrono_tz::Asia::Tokyo).date_naive());
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let store = store();
        let first = store.save("270000", &forecast(), "Morning rain.").await.unwrap();
        let second = store.save("270000", &forecast(), "Clear skies.").await.unwrap();
        assert_eq!(first, second);

        let documents = store.documents().list(FORECASTS).await.unwrap();
        assert_eq!(documents.len(), 1);

        let loaded = store.load("270000", None).await.unwrap().unwrap();
        assert_eq!(loaded.generated_message, "Clear skies.");
        assert_eq!(loaded.document_id, document_id("270000", store.today()));
        assert_eq!(loaded.raw_forecast["publishingOffice"], "大阪管区気象台");
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = store();
        assert!(store.load("130000", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let store = store();
        assert!(store.save("130000", &forecast(), "  ").await.is_err());
        assert!(store.load("130000", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        store
            .save_on(date, "130000", serde_json::json!({}), "Sunny.")
            .await
            .unwrap();
        assert!(store.delete("130000", date).await.unwrap());
        assert!(!store.delete("130000", date).await.unwrap());
        assert!(store.load("130000", Some(date)).await.unwrap().is_none());
    }
}
