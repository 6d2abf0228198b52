/// Composition root for the data-access layer.
///
/// The host process constructs one `Portal` at startup and passes handles
/// down; no component reaches for a global.
use anyhow::Result;
use std::sync::Arc;

use crate::cache::TieredCache;
use crate::core::config::PortalConfig;
use crate::database::Database;
use crate::limiter::{QuotaPlans, RateLimiter};
use crate::providers::Collaborators;
use crate::rentcast::RentCastClient;
use crate::usage::UsageTracker;

pub struct Portal {
    db: Database,
    cache: Arc<TieredCache>,
    plans: Arc<QuotaPlans>,
    limiter: Arc<RateLimiter>,
    usage: Arc<UsageTracker>,
    client: Arc<RentCastClient>,
    collaborators: Collaborators,
}

impl Portal {
    pub fn new(config: PortalConfig) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: PortalConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.cache.database_path)?;
        Self::build(config, db, collaborators)
    }

    /// Fully in-memory portal: volatile cache tier over an in-memory
    /// database. Used by tests and ephemeral deployments.
    pub fn in_memory(config: PortalConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::open_in_memory()?;
        Self::build(config, db, Collaborators::default())
    }

    fn build(config: PortalConfig, db: Database, collaborators: Collaborators) -> Result<Self> {
        let cache = Arc::new(TieredCache::with_durable(
            config.cache.max_memory_entries,
            db.clone(),
        ));
        let plans = Arc::new(QuotaPlans::load(db.clone(), config.quota.default_limit)?);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, Arc::clone(&plans)));
        let usage = Arc::new(UsageTracker::new(db.clone()));
        let client = Arc::new(RentCastClient::new(
            &config,
            Arc::clone(&cache),
            Arc::clone(&limiter),
            Arc::clone(&usage),
        )?);

        log::info!(
            "Portal data layer ready: {}s rate window, baseline quota {}",
            limiter.window_secs(),
            config.quota.default_limit
        );

        Ok(Self {
            db,
            cache,
            plans,
            limiter,
            usage,
            client,
            collaborators,
        })
    }

    pub fn client(&self) -> Arc<RentCastClient> {
        Arc::clone(&self.client)
    }

    pub fn cache(&self) -> Arc<TieredCache> {
        Arc::clone(&self.cache)
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn quota_plans(&self) -> Arc<QuotaPlans> {
        Arc::clone(&self.plans)
    }

    pub fn usage(&self) -> Arc<UsageTracker> {
        Arc::clone(&self.usage)
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn database(&self) -> Database {
        self.db.clone()
    }
}
