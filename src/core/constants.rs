// API endpoints
pub const RENTCAST_API_BASE: &str = "https://api.rentcast.io/v1";

// Cache TTLs per category (seconds)
pub const CONFIG_CACHE_TTL_SECS: u64 = 3_600; // 1 hour
pub const PROPERTY_DATA_TTL_SECS: u64 = 7_200; // 2 hours
pub const USER_DATA_TTL_SECS: u64 = 1_800; // 30 minutes
pub const API_USAGE_TTL_SECS: u64 = 300; // 5 minutes
pub const MARKET_DATA_TTL_SECS: u64 = 14_400; // 4 hours

// Cache sizing
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 10_000;

// Rate limiting
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_PER_WINDOW: u32 = 60;

// Quota plans
pub const BASELINE_PLAN_LIMIT: u32 = 30;

// Retry settings
pub const MAX_RETRIES: u32 = 3;
pub const BASE_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;
pub const CONNECTION_RETRY_DELAY_MS: u64 = 2_000;

// Request validation
pub const MIN_ADDRESS_LEN: usize = 5;

// Usage ledger
pub const DESCRIPTOR_MAX_LEN: usize = 200;

// HTTP settings
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const USER_AGENT: &str = "RealEstatePortal/1.0";
