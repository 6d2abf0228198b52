pub mod config;
pub mod constants;
pub mod error;

pub use config::{
    CacheSettings, PortalConfig, QuotaSettings, RateLimitSettings, RentCastConfig, RetrySettings,
};
pub use error::{DataAccessError, DataResult, ErrorKind};
