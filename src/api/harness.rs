//! Notification test harness
//!
//! Creates throwaway users (and, where needed, a throwaway document for a
//! region outside the catalog), dispatches to exactly those users and
//! removes them again. Real subscribers are never contacted.

use crate::AdvisoryError;
use crate::push::DispatchReport;
use crate::services::Services;
use crate::users::User;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Region code outside the catalog used for harness documents
pub const TEST_REGION: &str = "000000";
/// Region whose real document `realForecast` sends
pub const REAL_FORECAST_REGION: &str = "130000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestType {
    Basic,
    MissingForecast,
    MultipleUsers,
    RealForecast,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessRequest {
    pub test_type: TestType,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub push_tokens: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessResponse {
    pub success: bool,
    pub test_type: TestType,
    pub report: DispatchReport,
}

fn test_user(region_code: &str, token: &str) -> User {
    User {
        id: format!("test-user-{}", rand::rng().random_range(100_000..1_000_000)),
        region_code: region_code.to_string(),
        push_token: Some(token.to_string()),
        notifications_enabled: true,
    }
}

impl HarnessRequest {
    fn tokens(&self) -> Result<Vec<String>, AdvisoryError> {
        let tokens: Vec<String> = match self.test_type {
            TestType::MultipleUsers => self.push_tokens.clone().unwrap_or_default(),
            _ => self.push_token.clone().into_iter().collect(),
        };
        let tokens: Vec<String> = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            let field = match self.test_type {
                TestType::MultipleUsers => "pushTokens",
                _ => "pushToken",
            };
            return Err(AdvisoryError::validation(format!("{field} is required")));
        }
        Ok(tokens)
    }
}

pub async fn run(services: &Services, request: HarnessRequest) -> Result<HarnessResponse, AdvisoryError> {
    let tokens = request.tokens()?;
    let today = services.store.today();
    info!(test_type = ?request.test_type, users = tokens.len(), "Running notification test");

    let report = match request.test_type {
        TestType::RealForecast => {
            let users = [test_user(REAL_FORECAST_REGION, &tokens[0])];
            services.dispatcher.dispatch_to(&users).await
        }
        TestType::MissingForecast => {
            services.store.delete(TEST_REGION, today).await?;
            with_test_users(services, TEST_REGION, &tokens).await?
        }
        TestType::Basic | TestType::MultipleUsers => {
            services
                .store
                .save_on(
                    today,
                    TEST_REGION,
                    json!({ "test": true }),
                    "This is a test notification.",
                )
                .await?;
            let report = with_test_users(services, TEST_REGION, &tokens).await;
            if let Err(err) = services.store.delete(TEST_REGION, today).await {
                warn!(error = %err, "Failed to remove test document");
            }
            report?
        }
    };

    Ok(HarnessResponse {
        success: report.failed == 0,
        test_type: request.test_type,
        report,
    })
}

/// Persist one user per token, dispatch to them, then remove them.
async fn with_test_users(
    services: &Services,
    region_code: &str,
    tokens: &[String],
) -> Result<DispatchReport, AdvisoryError> {
    let users: Vec<User> = tokens.iter().map(|t| test_user(region_code, t)).collect();
    for user in &users {
        services.users.put(user).await?;
    }

    let report = services.dispatcher.dispatch_to(&users).await;

    for user in &users {
        if let Err(err) = services.users.remove(&user.id).await {
            warn!(user_id = %user.id, error = %err, "Failed to remove test user");
        }
    }
    Ok(report)
}
