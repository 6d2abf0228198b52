/// Sliding-window admission control per `(subject, endpoint)` pair.
///
/// Enforcement is process-local and in-memory: the usage ledger records
/// history but never gates a request, so admission needs no database
/// round-trip and no cross-insert consistency dance. Deploying more than
/// one service instance per subject requires centralizing this component.
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rusqlite::params;

use crate::core::config::RateLimitSettings;
use crate::database::Database;

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Per-subject quota plans with a baseline default.
///
/// Plans persist in the `quota_plan` table and are loaded once at
/// construction; `set_plan` writes through to the table.
pub struct QuotaPlans {
    db: Option<Database>,
    plans: Mutex<HashMap<String, u32>>,
    default_limit: u32,
}

impl QuotaPlans {
    pub fn load(db: Database, default_limit: u32) -> Result<Self> {
        let mut plans = HashMap::new();
        {
            let conn = db.lock();
            let mut stmt = conn.prepare("SELECT subject_id, monthly_limit FROM quota_plan")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (subject, limit) = row?;
                plans.insert(subject, limit.max(0) as u32);
            }
        }

        Ok(Self {
            db: Some(db),
            plans: Mutex::new(plans),
            default_limit,
        })
    }

    /// Plans without persistence, used by tests and ephemeral deployments.
    pub fn in_memory(default_limit: u32) -> Self {
        Self {
            db: None,
            plans: Mutex::new(HashMap::new()),
            default_limit,
        }
    }

    pub fn limit_for(&self, subject: &str) -> u32 {
        self.plans
            .lock()
            .get(subject)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Upsert a subject's plan, writing through to the durable table.
    pub fn set_plan(&self, subject: &str, limit: u32) -> Result<()> {
        if let Some(db) = &self.db {
            let conn = db.lock();
            conn.execute(
                "INSERT OR REPLACE INTO quota_plan (subject_id, monthly_limit) VALUES (?1, ?2)",
                params![subject, limit as i64],
            )?;
        }
        self.plans.lock().insert(subject.to_string(), limit);
        Ok(())
    }
}

type WindowKey = (String, String);
type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Sliding-window rate limiter.
pub struct RateLimiter {
    window: Duration,
    plans: Arc<QuotaPlans>,
    windows: Mutex<HashMap<WindowKey, Window>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings, plans: Arc<QuotaPlans>) -> Self {
        Self {
            window: Duration::from_secs(settings.window_secs.max(1)),
            plans,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and, if allowed, consume one admission for the pair.
    ///
    /// Prune, check and append happen inside one per-key critical section,
    /// so two concurrent checks for the same pair can never both slip past
    /// the quota boundary. The key registry lock is held only long enough
    /// to clone the per-key handle; unrelated pairs never serialize.
    pub fn try_admit(&self, subject: &str, endpoint: &str) -> Admission {
        let quota = self.plans.limit_for(subject);
        let slot = self.window_for(subject, endpoint);
        let mut window = slot.lock();
        let now = Instant::now();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if (window.len() as u32) < quota {
            window.push_back(now);
            Admission {
                allowed: true,
                remaining: quota - window.len() as u32,
                reset_at: self.reset_at(window.front().copied(), now),
            }
        } else {
            log::debug!(
                "Rate limit denial for {}/{}: {} requests in window",
                subject,
                endpoint,
                window.len()
            );
            Admission {
                allowed: false,
                remaining: 0,
                reset_at: self.reset_at(window.front().copied(), now),
            }
        }
    }

    /// Resolved quota for a subject (plan override or baseline).
    pub fn quota_for(&self, subject: &str) -> u32 {
        self.plans.limit_for(subject)
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    fn window_for(&self, subject: &str, endpoint: &str) -> Window {
        let mut windows = self.windows.lock();
        windows
            .entry((subject.to_string(), endpoint.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// When the oldest remaining admission ages out of the window.
    fn reset_at(&self, oldest: Option<Instant>, now: Instant) -> DateTime<Utc> {
        let until_reset = match oldest {
            Some(oldest) => (oldest + self.window).saturating_duration_since(now),
            None => self.window,
        };
        Utc::now() + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::seconds(self.window.as_secs() as i64))
    }
}
