//! Rewrites documents written under older key and field layouts
//!
//! Older forecast documents were keyed `{regionCode}_{YYYYMMDD}` and used
//! `area_code`/`areaCode`, `createdat` and a stringified `weatherForecasts`
//! field. Older user documents used `areaCode`, `expoPushToken` and
//! `isPushNotificationEnabled`. Running the migration on already canonical
//! data changes nothing.

use super::{DocumentStore, FORECASTS, ForecastDocument, USERS, document_id};
use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

/// Outcome of one migration pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub unchanged: usize,
    pub failed: Vec<MigrationFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub collection: String,
    pub id: String,
    pub error: String,
}

enum Outcome {
    Migrated,
    Unchanged,
}

/// Legacy field name -> canonical field name, for user documents
const USER_FIELD_RENAMES: [(&str, &str); 3] = [
    ("areaCode", "regionCode"),
    ("expoPushToken", "pushToken"),
    ("isPushNotificationEnabled", "notificationsEnabled"),
];

/// Migrate both collections. Per-document failures are collected, not raised.
#[instrument(skip(store))]
pub async fn migrate(store: &dyn DocumentStore) -> Result<MigrationReport, StoreError> {
    let mut report = MigrationReport::default();

    for (id, document) in store.list(FORECASTS).await? {
        report.scanned += 1;
        let outcome = migrate_forecast(store, &id, document).await;
        record(&mut report, FORECASTS, id, outcome);
    }

    for (id, document) in store.list(USERS).await? {
        report.scanned += 1;
        let outcome = migrate_user(store, &id, document).await;
        record(&mut report, USERS, id, outcome);
    }

    info!(
        scanned = report.scanned,
        migrated = report.migrated,
        unchanged = report.unchanged,
        failed = report.failed.len(),
        "Migration finished"
    );
    Ok(report)
}

fn record(
    report: &mut MigrationReport,
    collection: &str,
    id: String,
    outcome: Result<Outcome, StoreError>,
) {
    match outcome {
        Ok(Outcome::Migrated) => report.migrated += 1,
        Ok(Outcome::Unchanged) => report.unchanged += 1,
        Err(err) => {
            warn!(collection, id = %id, error = %err, "Document could not be migrated");
            report.failed.push(MigrationFailure {
                collection: collection.to_string(),
                id,
                error: err.to_string(),
            });
        }
    }
}

/// Split a forecast document id into (region code, date), accepting both layouts.
fn parse_forecast_id(id: &str) -> Option<(String, NaiveDate)> {
    let parse = |date: &str| {
        (date.len() == 8)
            .then(|| NaiveDate::parse_from_str(date, "%Y%m%d").ok())
            .flatten()
    };

    if let Some((date, code)) = id.split_once('-') {
        if let Some(date) = parse(date).filter(|_| !code.is_empty()) {
            return Some((code.to_string(), date));
        }
    }
    if let Some((code, date)) = id.rsplit_once('_') {
        if let Some(date) = parse(date).filter(|_| !code.is_empty()) {
            return Some((code.to_string(), date));
        }
    }
    None
}

fn string_field<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| fields.get(*name).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(o) => o
            .get("_seconds")
            .or_else(|| o.get("seconds"))
            .and_then(Value::as_i64)
            .and_then(|s| Utc.timestamp_opt(s, 0).single()),
        _ => None,
    }
}

fn canonical_forecast(id: &str, document: &Value) -> Result<ForecastDocument, StoreError> {
    let invalid = |reason: &str| StoreError::unknown(format!("{id}: {reason}"));

    let (code_from_id, date) =
        parse_forecast_id(id).ok_or_else(|| invalid("unrecognized document id"))?;
    let fields = document
        .as_object()
        .ok_or_else(|| invalid("document is not an object"))?;

    let region_code = string_field(fields, &["regionCode", "areaCode", "area_code"])
        .map_or(code_from_id, str::to_string);

    let raw_forecast = match (fields.get("rawForecast"), fields.get("weatherForecasts")) {
        (Some(raw), _) => raw.clone(),
        (None, Some(Value::String(text))) => serde_json::from_str(text)
            .map_err(|e| invalid(&format!("weatherForecasts is not JSON: {e}")))?,
        (None, Some(raw)) => raw.clone(),
        (None, None) => return Err(invalid("no forecast payload")),
    };

    let generated_message = string_field(fields, &["generatedMessage"])
        .ok_or_else(|| invalid("no generated message"))?
        .to_string();

    let created_at = fields
        .get("createdAt")
        .or_else(|| fields.get("createdat"))
        .and_then(parse_timestamp)
        .ok_or_else(|| invalid("missing or unreadable creation time"))?;

    Ok(ForecastDocument {
        document_id: document_id(&region_code, date),
        region_code,
        raw_forecast,
        generated_message,
        created_at,
    })
}

async fn migrate_forecast(
    store: &dyn DocumentStore,
    id: &str,
    document: Value,
) -> Result<Outcome, StoreError> {
    let canonical = canonical_forecast(id, &document)?;
    let value = serde_json::to_value(&canonical)?;

    if canonical.document_id == id {
        if value == document {
            return Ok(Outcome::Unchanged);
        }
        store.set(FORECASTS, id, value).await?;
        return Ok(Outcome::Migrated);
    }

    // A document already stored under the canonical key is newer than the legacy one.
    if store.get(FORECASTS, &canonical.document_id).await?.is_none() {
        store.set(FORECASTS, &canonical.document_id, value).await?;
    }
    store.delete(FORECASTS, id).await?;
    Ok(Outcome::Migrated)
}

async fn migrate_user(
    store: &dyn DocumentStore,
    id: &str,
    document: Value,
) -> Result<Outcome, StoreError> {
    let Value::Object(mut fields) = document else {
        return Err(StoreError::unknown(format!("{id}: document is not an object")));
    };

    let mut changed = false;
    for (legacy, canonical) in USER_FIELD_RENAMES {
        if let Some(value) = fields.remove(legacy) {
            changed = true;
            if !fields.contains_key(canonical) {
                fields.insert(canonical.to_string(), value);
            }
        }
    }

    if !changed {
        return Ok(Outcome::Unchanged);
    }
    store.set(USERS, id, Value::Object(fields)).await?;
    Ok(Outcome::Migrated)
}
