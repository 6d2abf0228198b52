/// Resilient RentCast API client.
///
/// Orchestrates the tiered cache, the sliding-window rate limiter, the
/// usage ledger and the retrying transport. Per logical request:
/// validate, consult the cache, consult the limiter, then attempt the
/// upstream call with classified retry/backoff. Successes are enriched and
/// cached; every terminal outcome writes exactly one ledger row.
pub mod enrich;
pub mod retry;
pub mod transport;
pub mod types;

pub use retry::RetryPolicy;
pub use transport::{HttpTransport, PropertyTransport, TransportError, TransportReply};
pub use types::{InvestmentMetrics, PropertyData, PropertyRecord};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{cache_key, CacheCategory, CacheStats, TieredCache};
use crate::core::config::PortalConfig;
use crate::core::constants;
use crate::core::error::{DataAccessError, DataResult, ErrorKind};
use crate::limiter::RateLimiter;
use crate::usage::{UsageAnalytics, UsageTracker};

use retry::{classify_reply, classify_transport_error, Outcome};

pub const ENDPOINT_PROPERTIES: &str = "properties";
pub const ENDPOINT_RENT_ESTIMATE: &str = "rent-estimate";
pub const ENDPOINT_COMPARABLE_SALES: &str = "comparable-sales";

const DEFAULT_COMPARABLES_COUNT: u32 = 10;

/// Search parameters for a property-details lookup.
#[derive(Debug, Clone, Default)]
pub struct PropertyQuery {
    pub address: String,
    pub city: String,
    pub state: String,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub square_footage: Option<u32>,
    pub property_type: Option<String>,
}

impl PropertyQuery {
    pub fn new(address: &str, city: &str, state: &str) -> Self {
        Self {
            address: address.to_string(),
            city: city.to_string(),
            state: state.to_string(),
            ..Default::default()
        }
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("address".to_string(), self.address.trim().to_string()),
            ("city".to_string(), self.city.trim().to_string()),
            ("state".to_string(), self.state.trim().to_string()),
        ];
        if let Some(bedrooms) = self.bedrooms {
            params.push(("bedrooms".to_string(), bedrooms.to_string()));
        }
        if let Some(bathrooms) = self.bathrooms {
            params.push(("bathrooms".to_string(), bathrooms.to_string()));
        }
        if let Some(square_footage) = self.square_footage {
            params.push(("squareFootage".to_string(), square_footage.to_string()));
        }
        if let Some(property_type) = &self.property_type {
            params.push(("propertyType".to_string(), property_type.clone()));
        }
        params
    }
}

/// Optional refinements for a rent estimate.
#[derive(Debug, Clone, Default)]
pub struct RentEstimateOptions {
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub square_footage: Option<u32>,
}

pub struct RentCastClient {
    transport: Arc<dyn PropertyTransport>,
    cache: Arc<TieredCache>,
    limiter: Arc<RateLimiter>,
    usage: Arc<UsageTracker>,
    retry: RetryPolicy,
    enabled: bool,
}

impl RentCastClient {
    /// Production constructor: wires the HTTP transport from configuration.
    ///
    /// Cache, limiter and tracker are injected by the composition root and
    /// shared with other consumers.
    pub fn new(
        config: &PortalConfig,
        cache: Arc<TieredCache>,
        limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
    ) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.rentcast)?);
        Ok(Self {
            transport,
            cache,
            limiter,
            usage,
            retry: RetryPolicy::from_settings(&config.retry),
            enabled: config.rentcast.enabled,
        })
    }

    /// Constructor with an explicit transport, used by tests and embedders
    /// that bring their own wire layer.
    pub fn with_transport(
        transport: Arc<dyn PropertyTransport>,
        cache: Arc<TieredCache>,
        limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            cache,
            limiter,
            usage,
            retry,
            enabled: true,
        }
    }

    /// Fetch property details, enriched with market and investment
    /// analytics. `Ok(None)` means the upstream has no data for the query.
    pub async fn fetch_property_data(
        &self,
        query: &PropertyQuery,
        subject: &str,
    ) -> DataResult<Option<PropertyData>> {
        self.fetch_property_data_with_deadline(query, subject, None)
            .await
    }

    /// Same as [`fetch_property_data`](Self::fetch_property_data) with an
    /// overall deadline. If the next backoff sleep would overrun it, the
    /// request fails immediately with a timeout.
    pub async fn fetch_property_data_with_deadline(
        &self,
        query: &PropertyQuery,
        subject: &str,
        deadline: Option<Duration>,
    ) -> DataResult<Option<PropertyData>> {
        self.ensure_enabled()?;
        validate_address(&query.address)?;
        if query.city.trim().is_empty() || query.state.trim().is_empty() {
            return Err(DataAccessError::Validation(
                "City and state are required".to_string(),
            ));
        }

        let bedrooms = query.bedrooms.map(|b| b.to_string()).unwrap_or_default();
        let bathrooms = query.bathrooms.map(|b| b.to_string()).unwrap_or_default();
        let square_footage = query
            .square_footage
            .map(|s| s.to_string())
            .unwrap_or_default();
        let key_parts = [
            query.address.as_str(),
            query.city.as_str(),
            query.state.as_str(),
            bedrooms.as_str(),
            bathrooms.as_str(),
            square_footage.as_str(),
            query.property_type.as_deref().unwrap_or(""),
        ];
        let key = cache_key(CacheCategory::PropertyData, Some(subject), &key_parts);

        if let Some(cached) = self.cached::<PropertyData>(&key, CacheCategory::PropertyData) {
            return Ok(Some(cached));
        }

        let payload = self
            .execute_request(
                ENDPOINT_PROPERTIES,
                query.params(),
                subject,
                &key,
                CacheCategory::PropertyData,
                deadline,
                |body| {
                    let record = serde_json::from_str::<types::PropertiesResponse>(body)
                        .map_err(|e| format!("Failed to parse property response: {}", e))?
                        .into_first()
                        .ok_or_else(|| "Empty property response".to_string())?;
                    let mut data = PropertyData::from(record);
                    enrich::enrich_property(&mut data);
                    serde_json::to_string(&data).map_err(|e| e.to_string())
                },
            )
            .await?;

        Ok(payload.and_then(|p| decode_payload(&p)))
    }

    /// Rent estimate with investment metrics attached.
    pub async fn fetch_rent_estimate(
        &self,
        address: &str,
        subject: &str,
        options: &RentEstimateOptions,
    ) -> DataResult<Option<PropertyData>> {
        self.ensure_enabled()?;
        validate_address(address)?;

        let mut params = vec![("address".to_string(), address.trim().to_string())];
        if let Some(bedrooms) = options.bedrooms {
            params.push(("bedrooms".to_string(), bedrooms.to_string()));
        }
        if let Some(bathrooms) = options.bathrooms {
            params.push(("bathrooms".to_string(), bathrooms.to_string()));
        }
        if let Some(square_footage) = options.square_footage {
            params.push(("squareFootage".to_string(), square_footage.to_string()));
        }

        let bedrooms = options.bedrooms.map(|b| b.to_string()).unwrap_or_default();
        let bathrooms = options.bathrooms.map(|b| b.to_string()).unwrap_or_default();
        let square_footage = options
            .square_footage
            .map(|s| s.to_string())
            .unwrap_or_default();
        let key_parts = [
            "rent-estimate",
            address,
            bedrooms.as_str(),
            bathrooms.as_str(),
            square_footage.as_str(),
        ];
        let key = cache_key(CacheCategory::PropertyData, Some(subject), &key_parts);

        if let Some(cached) = self.cached::<PropertyData>(&key, CacheCategory::PropertyData) {
            return Ok(Some(cached));
        }

        let payload = self
            .execute_request(
                ENDPOINT_RENT_ESTIMATE,
                params,
                subject,
                &key,
                CacheCategory::PropertyData,
                None,
                |body| {
                    let record = serde_json::from_str::<types::PropertiesResponse>(body)
                        .map_err(|e| format!("Failed to parse rent estimate: {}", e))?
                        .into_first()
                        .ok_or_else(|| "Empty rent estimate response".to_string())?;
                    let mut data = PropertyData::from(record);
                    enrich::enrich_rent_estimate(&mut data);
                    serde_json::to_string(&data).map_err(|e| e.to_string())
                },
            )
            .await?;

        Ok(payload.and_then(|p| decode_payload(&p)))
    }

    /// Comparable sales near an address, cached raw.
    pub async fn fetch_comparable_sales(
        &self,
        address: &str,
        subject: &str,
        radius_miles: f64,
    ) -> DataResult<Option<Value>> {
        self.ensure_enabled()?;
        validate_address(address)?;

        let params = vec![
            ("address".to_string(), address.trim().to_string()),
            ("radius".to_string(), radius_miles.to_string()),
            ("count".to_string(), DEFAULT_COMPARABLES_COUNT.to_string()),
        ];
        let radius = radius_miles.to_string();
        let key_parts = ["comparable-sales", address, radius.as_str()];
        let key = cache_key(CacheCategory::MarketData, Some(subject), &key_parts);

        if let Some(cached) = self.cached::<Value>(&key, CacheCategory::MarketData) {
            return Ok(Some(cached));
        }

        let payload = self
            .execute_request(
                ENDPOINT_COMPARABLE_SALES,
                params,
                subject,
                &key,
                CacheCategory::MarketData,
                None,
                |body| {
                    serde_json::from_str::<Value>(body)
                        .map(|_| body.to_string())
                        .map_err(|e| format!("Failed to parse comparables: {}", e))
                },
            )
            .await?;

        Ok(payload.and_then(|p| decode_payload(&p)))
    }

    /// Trailing-window usage analytics for a subject.
    pub fn get_usage_summary(
        &self,
        subject: &str,
        period_days: u32,
    ) -> anyhow::Result<UsageAnalytics> {
        self.usage.analytics(subject, period_days)
    }

    /// Drop every cached entry scoped to a subject, across both tiers.
    pub fn invalidate_subject_cache(&self, subject: &str) -> usize {
        self.cache.invalidate_by_subject(subject)
    }

    pub fn cache_stats(&self) -> HashMap<CacheCategory, CacheStats> {
        self.cache.all_stats()
    }

    fn ensure_enabled(&self) -> DataResult<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(DataAccessError::Validation(
                "RentCast client disabled via configuration".to_string(),
            ))
        }
    }

    /// Cache lookup that absorbs undecodable payloads as misses.
    fn cached<T: DeserializeOwned>(&self, key: &str, category: CacheCategory) -> Option<T> {
        let payload = self.cache.get(key, category)?;
        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Discarding undecodable cache payload for {}: {}", key, e);
                self.cache.invalidate(key);
                None
            }
        }
    }

    /// Rate check, retry loop, ledger write and cache population for one
    /// logical request whose cache lookup already missed.
    ///
    /// `process` turns a successful body into the payload to cache and
    /// return; a processing failure is terminal and recorded as such.
    async fn execute_request<F>(
        &self,
        endpoint: &'static str,
        params: Vec<(String, String)>,
        subject: &str,
        key: &str,
        category: CacheCategory,
        deadline: Option<Duration>,
        process: F,
    ) -> DataResult<Option<String>>
    where
        F: Fn(&str) -> Result<String, String>,
    {
        let descriptor = descriptor_for(&params);

        let admission = self.limiter.try_admit(subject, endpoint);
        if !admission.allowed {
            self.usage.record(
                subject,
                endpoint,
                &descriptor,
                false,
                0,
                Some(ErrorKind::RateLimited),
            );
            return Err(DataAccessError::QuotaExceeded {
                endpoint: endpoint.to_string(),
                remaining: admission.remaining,
                reset_at: admission.reset_at,
            });
        }

        let started = Instant::now();
        let deadline_at = deadline.map(|d| started + d);
        let mut attempt: u32 = 0;

        loop {
            let outcome = match self.transport.execute(endpoint, &params).await {
                Ok(reply) => classify_reply(reply),
                Err(err) => classify_transport_error(err),
            };

            match outcome {
                Outcome::Success(body) => {
                    return match process(&body) {
                        Ok(payload) => {
                            self.cache.set(key, &payload, category, None);
                            self.record(subject, endpoint, &descriptor, true, started, None);
                            Ok(Some(payload))
                        }
                        Err(detail) => {
                            self.record(
                                subject,
                                endpoint,
                                &descriptor,
                                false,
                                started,
                                Some(ErrorKind::Unclassified),
                            );
                            Err(DataAccessError::Unclassified {
                                status: 200,
                                detail,
                            })
                        }
                    };
                }

                Outcome::NotFound => {
                    // Absence of data is a successful outcome; the kind
                    // column still marks it for analytics.
                    self.record(
                        subject,
                        endpoint,
                        &descriptor,
                        true,
                        started,
                        Some(ErrorKind::NotFound),
                    );
                    return Ok(None);
                }

                Outcome::Failure {
                    kind,
                    status,
                    retry_after,
                    detail,
                } => {
                    if kind.is_retryable() && attempt < self.retry.max_retries {
                        let delay = self.retry.delay_for(attempt, kind, retry_after);

                        if let Some(deadline_at) = deadline_at {
                            if Instant::now() + delay >= deadline_at {
                                self.record(
                                    subject,
                                    endpoint,
                                    &descriptor,
                                    false,
                                    started,
                                    Some(ErrorKind::Timeout),
                                );
                                return Err(DataAccessError::Timeout {
                                    seconds: started.elapsed().as_secs(),
                                });
                            }
                        }

                        log::debug!(
                            "Retrying {} for {} after {:?} (attempt {}, {})",
                            endpoint,
                            subject,
                            delay,
                            attempt + 1,
                            kind.as_str()
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    self.record(subject, endpoint, &descriptor, false, started, Some(kind));
                    return Err(terminal_error(
                        kind,
                        status,
                        detail,
                        started.elapsed(),
                        endpoint,
                        retry_after,
                    ));
                }
            }
        }
    }

    fn record(
        &self,
        subject: &str,
        endpoint: &str,
        descriptor: &str,
        success: bool,
        started: Instant,
        kind: Option<ErrorKind>,
    ) {
        self.usage.record(
            subject,
            endpoint,
            descriptor,
            success,
            started.elapsed().as_millis() as u64,
            kind,
        );
    }
}

fn validate_address(address: &str) -> DataResult<()> {
    if address.trim().len() < constants::MIN_ADDRESS_LEN {
        return Err(DataAccessError::Validation(format!(
            "Address must be at least {} characters",
            constants::MIN_ADDRESS_LEN
        )));
    }
    Ok(())
}

fn descriptor_for(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_payload<T: DeserializeOwned>(payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Failed to decode freshly built payload: {}", e);
            None
        }
    }
}

/// Map an exhausted or non-retryable classification onto the public error.
fn terminal_error(
    kind: ErrorKind,
    status: Option<u16>,
    detail: String,
    elapsed: Duration,
    endpoint: &str,
    retry_after: Option<u64>,
) -> DataAccessError {
    match kind {
        ErrorKind::Auth => DataAccessError::Auth(detail),
        ErrorKind::Server => DataAccessError::Server {
            status: status.unwrap_or(500),
        },
        ErrorKind::Timeout => DataAccessError::Timeout {
            seconds: elapsed.as_secs(),
        },
        ErrorKind::Connection => DataAccessError::Connection(detail),
        // Upstream 429 after exhausted retries surfaces like a quota denial
        // so callers can show the same reset messaging.
        ErrorKind::RateLimited => DataAccessError::QuotaExceeded {
            endpoint: endpoint.to_string(),
            remaining: 0,
            reset_at: chrono::Utc::now()
                + chrono::Duration::seconds(retry_after.unwrap_or(60) as i64),
        },
        ErrorKind::NotFound | ErrorKind::Unclassified => DataAccessError::Unclassified {
            status: status.unwrap_or(0),
            detail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RateLimitSettings;
    use crate::database::Database;
    use crate::limiter::QuotaPlans;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<TransportReply, TransportError>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<TransportReply, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PropertyTransport for ScriptedTransport {
        async fn execute(
            &self,
            _endpoint: &str,
            _params: &[(String, String)],
        ) -> Result<TransportReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("transport script exhausted"))
        }
    }

    fn status(code: u16) -> Result<TransportReply, TransportError> {
        Ok(TransportReply {
            status: code,
            retry_after: None,
            body: String::new(),
        })
    }

    fn success(body: &str) -> Result<TransportReply, TransportError> {
        Ok(TransportReply {
            status: 200,
            retry_after: None,
            body: body.to_string(),
        })
    }

    struct Fixture {
        client: RentCastClient,
        transport: Arc<ScriptedTransport>,
        db: Database,
    }

    fn fixture(replies: Vec<Result<TransportReply, TransportError>>) -> Fixture {
        fixture_with_quota(replies, 60)
    }

    fn fixture_with_quota(
        replies: Vec<Result<TransportReply, TransportError>>,
        quota: u32,
    ) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let cache = Arc::new(TieredCache::new(100));
        let plans = Arc::new(QuotaPlans::in_memory(quota));
        let settings = RateLimitSettings {
            window_secs: 60,
            default_per_window: quota,
        };
        let limiter = Arc::new(RateLimiter::new(&settings, plans));
        let usage = Arc::new(UsageTracker::new(db.clone()));
        let transport = Arc::new(ScriptedTransport::new(replies));
        let retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            connection_base_delay: Duration::from_millis(20),
        };

        let client = RentCastClient::with_transport(
            transport.clone(),
            cache,
            limiter,
            usage,
            retry,
        );

        Fixture {
            client,
            transport,
            db,
        }
    }

    fn usage_rows(db: &Database) -> Vec<(bool, Option<String>)> {
        let conn = db.lock();
        let mut stmt = conn
            .prepare("SELECT success, error_kind FROM api_usage ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    fn query() -> PropertyQuery {
        PropertyQuery::new("123 Main St", "Austin", "TX")
    }

    const PROPERTY_BODY: &str =
        r#"{"address": "123 Main St", "price": 300000.0, "rentEstimate": {"rent": 2000.0}, "yearBuilt": 2015, "squareFootage": 2100.0}"#;

    #[tokio::test]
    async fn short_address_is_rejected_before_any_side_effect() {
        let fx = fixture(vec![]);
        let result = fx
            .client
            .fetch_property_data(&PropertyQuery::new("12", "Austin", "TX"), "u1")
            .await;

        assert!(matches!(result, Err(DataAccessError::Validation(_))));
        assert_eq!(fx.transport.calls(), 0);
        assert!(usage_rows(&fx.db).is_empty());
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_retries() {
        let fx = fixture(vec![status(500), status(502), status(503), status(500)]);
        let result = fx.client.fetch_property_data(&query(), "u1").await;

        assert!(matches!(
            result,
            Err(DataAccessError::Server { status: 500 })
        ));
        // max_retries = 3: one initial attempt plus three retries.
        assert_eq!(fx.transport.calls(), 4);

        let rows = usage_rows(&fx.db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (false, Some("server".to_string())));
    }

    #[tokio::test]
    async fn auth_failure_is_terminal_after_one_attempt() {
        let fx = fixture(vec![status(401)]);
        let started = Instant::now();
        let result = fx.client.fetch_property_data(&query(), "u1").await;

        assert!(matches!(result, Err(DataAccessError::Auth(_))));
        assert_eq!(fx.transport.calls(), 1);
        // No backoff sleep happened.
        assert!(started.elapsed() < Duration::from_millis(100));

        let rows = usage_rows(&fx.db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (false, Some("auth".to_string())));
    }

    #[tokio::test]
    async fn retry_after_header_is_honored() {
        let fx = fixture(vec![
            Ok(TransportReply {
                status: 429,
                retry_after: Some(1),
                body: String::new(),
            }),
            success(PROPERTY_BODY),
        ]);

        let started = Instant::now();
        let result = fx.client.fetch_property_data(&query(), "u1").await.unwrap();

        assert!(result.is_some());
        assert_eq!(fx.transport.calls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));

        // The single ledger row includes the wait in its response time.
        let conn = fx.db.lock();
        let (success, response_time_ms): (bool, i64) = conn
            .query_row(
                "SELECT success, response_time_ms FROM api_usage",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(success);
        assert!(response_time_ms >= 1000);
    }

    #[tokio::test]
    async fn not_found_returns_none_not_error() {
        let fx = fixture(vec![status(404)]);
        let result = fx.client.fetch_property_data(&query(), "u1").await.unwrap();

        assert!(result.is_none());
        let rows = usage_rows(&fx.db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (true, Some("not_found".to_string())));
    }

    #[tokio::test]
    async fn empty_body_counts_as_not_found() {
        let fx = fixture(vec![success("[]")]);
        let result = fx.client.fetch_property_data(&query(), "u1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn success_is_enriched_cached_and_served_without_refetch() {
        let fx = fixture(vec![success(PROPERTY_BODY)]);

        let first = fx
            .client
            .fetch_property_data(&query(), "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.record.effective_price(), Some(300000.0));
        assert!(first.market_score.is_some());
        assert!(first.investment_metrics.is_some());
        assert!(first.condition_assessment.is_some());

        // Second identical request: cache hit, no transport, no limiter,
        // no new ledger row.
        let second = fx
            .client
            .fetch_property_data(&query(), "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            second.record.effective_price(),
            first.record.effective_price()
        );
        assert_eq!(fx.transport.calls(), 1);
        assert_eq!(usage_rows(&fx.db).len(), 1);

        let stats = fx.client.cache_stats();
        assert_eq!(stats[&CacheCategory::PropertyData].hits, 1);
    }

    #[tokio::test]
    async fn quota_denial_short_circuits_without_network() {
        let fx = fixture_with_quota(vec![success(PROPERTY_BODY)], 1);

        fx.client
            .fetch_property_data(&query(), "u1")
            .await
            .unwrap();

        // Different address: cache miss, limiter already drained.
        let denied = fx
            .client
            .fetch_property_data(&PropertyQuery::new("456 Oak Ave", "Austin", "TX"), "u1")
            .await;

        match denied {
            Err(DataAccessError::QuotaExceeded { remaining, .. }) => assert_eq!(remaining, 0),
            other => panic!("expected quota error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(fx.transport.calls(), 1);

        let rows = usage_rows(&fx.db);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], (false, Some("rate_limited".to_string())));
    }

    #[tokio::test]
    async fn deadline_aborts_instead_of_sleeping_past_it() {
        let fx = fixture(vec![status(500)]);
        // Force a backoff far beyond the deadline.
        let client = RentCastClient {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(1),
                connection_base_delay: Duration::from_millis(500),
            },
            ..fx.client
        };

        let result = client
            .fetch_property_data_with_deadline(&query(), "u1", Some(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(DataAccessError::Timeout { .. })));
        assert_eq!(fx.transport.calls(), 1);

        let rows = usage_rows(&fx.db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (false, Some("timeout".to_string())));
    }

    #[tokio::test]
    async fn connection_errors_retry_then_surface() {
        let fx = fixture(vec![
            Err(TransportError::Connection("refused".to_string())),
            Err(TransportError::Connection("refused".to_string())),
            Err(TransportError::Connection("refused".to_string())),
            Err(TransportError::Connection("reset".to_string())),
        ]);

        let result = fx.client.fetch_property_data(&query(), "u1").await;
        assert!(matches!(result, Err(DataAccessError::Connection(_))));
        assert_eq!(fx.transport.calls(), 4);
    }

    #[tokio::test]
    async fn concurrent_misses_leave_one_coherent_cache_entry() {
        let body_a = r#"{"address": "123 Main St", "price": 300000.0}"#;
        let body_b = r#"{"address": "123 Main St", "price": 301000.0}"#;
        let fx = fixture(vec![success(body_a), success(body_b)]);
        let client = Arc::new(fx.client);

        let (a, b) = tokio::join!(
            {
                let client = Arc::clone(&client);
                async move { client.fetch_property_data(&query(), "u1").await }
            },
            {
                let client = Arc::clone(&client);
                async move { client.fetch_property_data(&query(), "u1").await }
            }
        );
        let fetched: Vec<f64> = [a.unwrap(), b.unwrap()]
            .into_iter()
            .flatten()
            .map(|d| d.record.effective_price().unwrap())
            .collect();

        // Whatever interleaving happened, the cache now serves one of the
        // two fetched values, stably.
        let cached_1 = client
            .fetch_property_data(&query(), "u1")
            .await
            .unwrap()
            .unwrap();
        let cached_2 = client
            .fetch_property_data(&query(), "u1")
            .await
            .unwrap()
            .unwrap();
        let price = cached_1.record.effective_price().unwrap();
        assert_eq!(price, cached_2.record.effective_price().unwrap());
        assert!(fetched.contains(&price));
        assert!(fx.transport.calls() <= 2);
    }

    #[tokio::test]
    async fn rent_estimate_carries_investment_metrics() {
        let body = r#"{"rent": 2000.0, "price": 300000.0}"#;
        let fx = fixture(vec![success(body)]);

        let estimate = fx
            .client
            .fetch_rent_estimate("9 Elm Street", "u1", &RentEstimateOptions::default())
            .await
            .unwrap()
            .unwrap();

        let metrics = estimate.investment_metrics.unwrap();
        assert_eq!(metrics.gross_yield_percent, 8.0);
        // Rent estimates are not market-scored.
        assert!(estimate.market_score.is_none());
    }

    #[tokio::test]
    async fn unparseable_success_body_is_terminal() {
        let fx = fixture(vec![success("not json at all")]);
        let result = fx.client.fetch_property_data(&query(), "u1").await;

        assert!(matches!(
            result,
            Err(DataAccessError::Unclassified { status: 200, .. })
        ));
        let rows = usage_rows(&fx.db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (false, Some("unclassified".to_string())));
    }

    #[tokio::test]
    async fn comparable_sales_are_cached_raw() {
        let body = r#"{"comparables": [{"address": "1 Oak"}, {"address": "2 Oak"}]}"#;
        let fx = fixture(vec![success(body)]);

        let first = fx
            .client
            .fetch_comparable_sales("123 Main St", "u1", 0.5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first["comparables"].as_array().unwrap().len(), 2);

        let second = fx
            .client
            .fetch_comparable_sales("123 Main St", "u1", 0.5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.transport.calls(), 1);
    }
}
