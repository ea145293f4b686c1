//! Gemini `generateContent` binding

use super::{AdvisoryProvider, AdvisoryRequest, ProviderError};
use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiProvider {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("generator.api_key is not configured"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .build()
            .with_context(|| "Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| GenerationError::failed(format!("invalid API key header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(&self.model)
        )
    }

    fn body(request: &AdvisoryRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt()),
                }],
            }],
            generation_config: json!({
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": { "advisory": { "type": "STRING" } },
                    "required": ["advisory"]
                }
            }),
        }
    }
}

/// Map a non-success response onto the retry classification.
fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        ProviderError::RateLimited(format!("HTTP {status}"))
    } else {
        ProviderError::Generation(GenerationError::failed(format!(
            "Gemini API error ({status}): {body}"
        )))
    }
}

#[async_trait]
impl AdvisoryProvider for GeminiProvider {
    async fn request_advisory(&self, request: &AdvisoryRequest) -> Result<String, ProviderError> {
        debug!(model = %self.model, region_code = %request.region_code, "Gemini request");

        let response = self
            .http
            .post(self.endpoint())
            .headers(self.headers()?)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| GenerationError::failed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(e.to_string()))?;

        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| GenerationError::invalid_response("response has no text candidate").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#
            ),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "bad schema"),
            ProviderError::Generation(GenerationError::Failed { .. })
        ));
    }

    #[test]
    fn test_requires_api_key() {
        assert!(GeminiProvider::new(&GeneratorConfig::default()).is_err());
    }

    #[test]
    fn test_endpoint_and_body() {
        let provider = GeminiProvider::new(&GeneratorConfig {
            api_key: Some("key".to_string()),
            ..GeneratorConfig::default()
        })
        .unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );

        let request = AdvisoryRequest {
            region_code: "130000".to_string(),
            forecast_json: "{}".to_string(),
        };
        let body = serde_json::to_value(GeminiProvider::body(&request)).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["contents"][0]["role"], "user");
    }
}
