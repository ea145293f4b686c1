//! Shared-secret basic auth for admin endpoints

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::warn;

/// Expected credentials for one admin route. Without a configured secret
/// every request is refused.
#[derive(Clone)]
pub struct AdminGuard {
    user: String,
    secret: Option<String>,
}

impl AdminGuard {
    pub fn new(user: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    #[must_use]
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = &self.secret else {
            return false;
        };
        let Some(encoded) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };

        decoded == format!("{}:{secret}", self.user).as_bytes()
    }
}

/// Build the header value for these credentials
#[must_use]
pub fn basic_auth_header(user: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{secret}")))
}

/// Middleware rejecting requests without matching credentials before the
/// handler (and its body extractor) runs.
pub async fn require_basic_auth(
    State(guard): State<AdminGuard>,
    request: Request,
    next: Next,
) -> Response {
    if guard.authorize(request.headers()) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejected admin request");
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}
