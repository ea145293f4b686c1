//! Daily regional weather advisories
//!
//! Fetches a forecast per region, turns it into a short advisory through a
//! rate-limited generator, stores one document per region and day, and
//! pushes the day's advisory to subscribed users.

pub mod advisory;
pub mod api;
pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod forecast;
pub mod logging;
pub mod processor;
pub mod push;
pub mod regions;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod users;
pub mod web;

// Re-export core types for public API
pub use batch::{BatchOrchestrator, BatchOutcome, BatchSummary};
pub use config::AdvisoryConfig;
pub use error::{AdvisoryError, RegionError, Stage};
pub use forecast::{Forecast, ForecastFetcher};
pub use processor::{RegionProcessor, RegionResult};
pub use push::NotificationDispatcher;
pub use regions::{Region, RegionCatalog};
pub use services::{Providers, Services};
pub use store::{ForecastDocument, ForecastStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, AdvisoryError>;
