//! Push delivery of stored advisories
//!
//! [`NotificationDispatcher`] walks the subscribed users, looks up today's
//! document for each user's region and hands it to the [`PushProvider`].
//! Users without a document or token are skipped; one failed send never
//! stops the others, and nothing is retried.

pub mod expo;

use crate::AdvisoryError;
use crate::error::PushError;
use crate::store::{ForecastStore, format_date};
use crate::users::{User, UserDirectory};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use expo::ExpoPushProvider;

/// One notification for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}

/// Per-run delivery counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub considered: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Delivery {
    Sent,
    Skipped(&'static str),
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    users: UserDirectory,
    store: ForecastStore,
    push: Arc<dyn PushProvider>,
    title: String,
}

impl NotificationDispatcher {
    pub fn new(
        users: UserDirectory,
        store: ForecastStore,
        push: Arc<dyn PushProvider>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            users,
            store,
            push,
            title: title.into(),
        }
    }

    /// Notify every user with notifications enabled.
    ///
    /// Only a failure to list the users aborts the run.
    #[instrument(skip(self))]
    pub async fn dispatch_all(&self) -> Result<DispatchReport, AdvisoryError> {
        let users = self
            .users
            .notification_enabled()
            .await
            .map_err(|source| AdvisoryError::Users { source })?;
        info!(users = users.len(), "Dispatching notifications");
        Ok(self.dispatch_to(&users).await)
    }

    /// Notify an explicit list of users.
    pub async fn dispatch_to(&self, users: &[User]) -> DispatchReport {
        let start = Instant::now();
        let date = self.store.today();
        let mut report = DispatchReport::default();

        for user in users {
            report.considered += 1;
            match self.dispatch_one(user, date).await {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Skipped(reason)) => {
                    info!(user_id = %user.id, region_code = %user.region_code, reason, "Skipped user");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(user_id = %user.id, error = %err, "Notification failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            considered = report.considered,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Dispatch finished in {:.3}s",
            start.elapsed().as_secs_f64()
        );
        report
    }

    async fn dispatch_one(&self, user: &User, date: NaiveDate) -> Result<Delivery, AdvisoryError> {
        let Some(token) = user.push_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(Delivery::Skipped("no push token"));
        };

        let Some(document) = self.store.load(&user.region_code, Some(date)).await? else {
            return Ok(Delivery::Skipped("no forecast document for today"));
        };

        let message = PushMessage {
            to: token.to_string(),
            title: self.title.clone(),
            body: document.generated_message,
            data: json!({
                "regionCode": user.region_code,
                "date": format_date(date),
            }),
        };

        self.push.send(&message).await?;
        debug!(user_id = %user.id, "Notification sent");
        Ok(Delivery::Sent)
    }
}
