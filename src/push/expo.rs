//! Expo push service binding

use super::{PushMessage, PushProvider};
use crate::config::PushConfig;
use crate::error::PushError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct ExpoPushProvider {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct PushResponse {
    #[serde(default)]
    data: Option<TicketData>,
    #[serde(default)]
    errors: Vec<ResponseError>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TicketData {
    One(Ticket),
    Many(Vec<Ticket>),
}

#[derive(Deserialize)]
struct Ticket {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ResponseError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// `ExponentPushToken[...]` or `ExpoPushToken[...]` with a non-empty body
pub fn is_expo_push_token(token: &str) -> bool {
    ["ExponentPushToken[", "ExpoPushToken["]
        .iter()
        .filter_map(|prefix| token.strip_prefix(prefix))
        .any(|rest| rest.len() > 1 && rest.ends_with(']'))
}

impl ExpoPushProvider {
    pub fn new(config: &PushConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .build()
            .with_context(|| "Failed to create HTTP client")?;

        Ok(Self {
            http,
            endpoint: config.base_url.clone(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn headers(&self) -> Result<HeaderMap, PushError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                PushError::Transport {
                    message: format!("invalid access token header: {e}"),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

fn check_response(response: PushResponse) -> Result<(), PushError> {
    if let Some(error) = response.errors.into_iter().next() {
        return Err(PushError::Rejected {
            message: match error.code {
                Some(code) => format!("{code}: {}", error.message),
                None => error.message,
            },
        });
    }

    let tickets = match response.data {
        Some(TicketData::One(ticket)) => vec![ticket],
        Some(TicketData::Many(tickets)) => tickets,
        None => Vec::new(),
    };

    match tickets.into_iter().find(|t| t.status == "error") {
        Some(ticket) => Err(PushError::Rejected {
            message: match (ticket.message, ticket.details) {
                (Some(message), Some(details)) => format!("{message} ({details})"),
                (Some(message), None) => message,
                (None, _) => "push ticket reported an error".to_string(),
            },
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl PushProvider for ExpoPushProvider {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        if !is_expo_push_token(&message.to) {
            return Err(PushError::InvalidToken {
                token: message.to.clone(),
            });
        }

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(message)
            .send()
            .await
            .map_err(|e| PushError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Transport {
                message: format!("Expo push API error ({status}): {body}"),
            });
        }

        let parsed: PushResponse = response.json().await.map_err(|e| PushError::Transport {
            message: format!("unreadable push response: {e}"),
        })?;
        check_response(parsed)?;
        debug!("Push ticket accepted");
        Ok(())
    }
}
