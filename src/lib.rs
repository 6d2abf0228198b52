//! Resilient data-access layer for the real-estate portal dashboards.
//!
//! A tiered cache, a sliding-window rate limiter and a durable usage
//! ledger sit in front of a retrying RentCast API client. The host process
//! builds a [`Portal`] once at startup and hands its components to the
//! dashboard features.

pub mod cache;
pub mod core;
pub mod database;
pub mod limiter;
pub mod logger;
pub mod portal;
pub mod providers;
pub mod rentcast;
pub mod usage;

pub use crate::core::{DataAccessError, DataResult, ErrorKind, PortalConfig};
pub use cache::{CacheCategory, CacheStats, TieredCache};
pub use database::Database;
pub use limiter::{Admission, QuotaPlans, RateLimiter};
pub use portal::Portal;
pub use rentcast::{PropertyData, PropertyQuery, RentCastClient, RentEstimateOptions};
pub use usage::{UsageAnalytics, UsageTracker};
