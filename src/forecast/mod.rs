//! Forecast retrieval and normalization
//!
//! [`ForecastFetcher`] pads region codes to the provider's fixed width,
//! calls the [`ForecastProvider`] and validates the report shape. It never
//! retries; failures go straight back to the caller.

pub mod jma;

use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use jma::JmaForecastProvider;

/// Source of raw forecast JSON for a padded region code
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn fetch_raw(&self, padded_code: &str) -> Result<Value, FetchError>;
}

/// Normalized forecast report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub region_code: String,
    pub publishing_office: String,
    pub report_datetime: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    pub time_series: Vec<TimeSeries>,
}

/// One block of forecast values sharing the same time axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub time_defines: Vec<String>,
    pub areas: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    publishing_office: Option<String>,
    report_datetime: Option<String>,
    headline_text: Option<String>,
    time_series: Option<Vec<RawSeries>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSeries {
    #[serde(default)]
    time_defines: Vec<String>,
    #[serde(default)]
    areas: Vec<Value>,
}

/// Left-pad a numeric region code to `width` digits.
pub fn pad_region_code(code: &str, width: usize) -> Result<String, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidRegionCode {
        code: code.to_string(),
        reason: reason.to_string(),
    };

    if code.is_empty() {
        return Err(invalid("code is empty"));
    }
    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("code must contain only digits"));
    }
    if code.len() > width {
        return Err(invalid(&format!("code is longer than {width} digits")));
    }

    Ok(format!("{code:0>width$}"))
}

/// Validate a provider payload and convert it into a [`Forecast`].
///
/// The provider answers with an array of reports; only the first is used.
/// A bare report object is accepted as well.
pub fn normalize(region_code: &str, raw: Value) -> Result<Forecast, FetchError> {
    let parse_error = |message: String| FetchError::Parse {
        region_code: region_code.to_string(),
        message,
    };

    let first = match raw {
        Value::Array(mut reports) => {
            if reports.is_empty() {
                return Err(parse_error("provider returned no reports".to_string()));
            }
            reports.swap_remove(0)
        }
        report @ Value::Object(_) => report,
        other => {
            return Err(parse_error(format!(
                "expected an array of reports, got {}",
                json_kind(&other)
            )));
        }
    };

    let report: RawReport =
        serde_json::from_value(first).map_err(|e| parse_error(e.to_string()))?;

    let series = match report.time_series {
        Some(series) if !series.is_empty() => series,
        _ => {
            return Err(FetchError::MissingTimeSeries {
                region_code: region_code.to_string(),
            });
        }
    };

    let publishing_office = report
        .publishing_office
        .filter(|office| !office.trim().is_empty())
        .ok_or_else(|| parse_error("missing publishing office".to_string()))?;

    let report_datetime = report
        .report_datetime
        .as_deref()
        .ok_or_else(|| parse_error("missing report timestamp".to_string()))
        .and_then(|ts| {
            DateTime::parse_from_rfc3339(ts)
                .map_err(|e| parse_error(format!("bad report timestamp '{ts}': {e}")))
        })?;

    if let Some(index) = series.iter().position(|s| s.time_defines.is_empty()) {
        return Err(parse_error(format!("time series {index} has no time definitions")));
    }

    Ok(Forecast {
        region_code: region_code.to_string(),
        publishing_office,
        report_datetime,
        headline: report.headline_text.filter(|h| !h.trim().is_empty()),
        time_series: series
            .into_iter()
            .map(|s| TimeSeries {
                time_defines: s.time_defines,
                areas: s.areas,
            })
            .collect(),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fetches and validates forecasts for single regions
#[derive(Clone)]
pub struct ForecastFetcher {
    provider: Arc<dyn ForecastProvider>,
    code_width: usize,
}

impl ForecastFetcher {
    pub fn new(provider: Arc<dyn ForecastProvider>, code_width: usize) -> Self {
        Self {
            provider,
            code_width,
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, region_code: &str) -> Result<Forecast, FetchError> {
        let start = Instant::now();
        let padded = pad_region_code(region_code, self.code_width)?;
        debug!(padded_code = %padded, "Requesting forecast");

        let raw = self.provider.fetch_raw(&padded).await?;
        let forecast = normalize(region_code, raw).inspect_err(|e| {
            warn!(error = %e, "Forecast payload rejected");
        })?;

        info!(
            office = %forecast.publishing_office,
            series = forecast.time_series.len(),
            "Fetched forecast in {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(forecast)
    }
}
