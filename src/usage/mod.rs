/// Durable, append-only ledger of every API-call attempt.
///
/// The ledger is observability, not a gate: quota enforcement lives in the
/// in-memory rate limiter, so a failed insert here is logged and swallowed
/// rather than failing the caller's request.
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::params;
use std::collections::{BTreeMap, HashMap};

use crate::core::constants::DESCRIPTOR_MAX_LEN;
use crate::core::error::ErrorKind;
use crate::database::Database;

const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Aggregated view over a subject's ledger rows in a trailing window.
#[derive(Debug, Clone, Default)]
pub struct UsageAnalytics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage, 0-100. An empty window reports 100.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub per_endpoint: HashMap<String, u64>,
    /// Hour of day (0-23) to call count.
    pub per_hour: HashMap<u8, u64>,
    /// Calendar date (`YYYY-MM-DD`) to call count.
    pub per_day: BTreeMap<String, u64>,
}

pub struct UsageTracker {
    db: Database,
}

impl UsageTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one record. Never raises on the caller's critical path.
    pub fn record(
        &self,
        subject: &str,
        endpoint: &str,
        descriptor: &str,
        success: bool,
        response_time_ms: u64,
        error_kind: Option<ErrorKind>,
    ) {
        let descriptor: String = descriptor.chars().take(DESCRIPTOR_MAX_LEN).collect();
        let created_at = Utc::now().format(CREATED_AT_FORMAT).to_string();

        let result = {
            let conn = self.db.lock();
            conn.execute(
                "INSERT INTO api_usage
                 (subject_id, endpoint, descriptor, success, response_time_ms, error_kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    subject,
                    endpoint,
                    descriptor,
                    success,
                    response_time_ms as i64,
                    error_kind.map(|k| k.as_str()),
                    created_at
                ],
            )
        };

        if let Err(e) = result {
            log::warn!(
                "Failed to record API usage for {}/{}: {}",
                subject,
                endpoint,
                e
            );
        }
    }

    /// Aggregate a subject's ledger over the trailing `period_days`.
    pub fn analytics(&self, subject: &str, period_days: u32) -> Result<UsageAnalytics> {
        let cutoff = (Utc::now() - ChronoDuration::days(period_days as i64))
            .format(CREATED_AT_FORMAT)
            .to_string();
        let conn = self.db.lock();

        let (total_calls, success_count, avg_response_time_ms): (u64, u64, f64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(response_time_ms), 0)
             FROM api_usage
             WHERE subject_id = ?1 AND created_at >= ?2",
            params![subject, cutoff],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, i64>(1)? as u64,
                    row.get(2)?,
                ))
            },
        )?;

        let mut per_endpoint = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT endpoint, COUNT(*) FROM api_usage
             WHERE subject_id = ?1 AND created_at >= ?2
             GROUP BY endpoint",
        )?;
        let rows = stmt.query_map(params![subject, cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (endpoint, count) = row?;
            per_endpoint.insert(endpoint, count);
        }

        // created_at is `YYYY-MM-DD HH:MM:SS`: chars 1-10 are the date,
        // 12-13 the hour.
        let mut per_hour = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 12, 2), COUNT(*) FROM api_usage
             WHERE subject_id = ?1 AND created_at >= ?2
             GROUP BY substr(created_at, 12, 2)",
        )?;
        let rows = stmt.query_map(params![subject, cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (hour, count) = row?;
            if let Ok(hour) = hour.parse::<u8>() {
                per_hour.insert(hour, count);
            }
        }

        let mut per_day = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10), COUNT(*) FROM api_usage
             WHERE subject_id = ?1 AND created_at >= ?2
             GROUP BY substr(created_at, 1, 10)",
        )?;
        let rows = stmt.query_map(params![subject, cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (day, count) = row?;
            per_day.insert(day, count);
        }

        let failure_count = total_calls - success_count;
        let success_rate = if total_calls == 0 {
            100.0
        } else {
            success_count as f64 / total_calls as f64 * 100.0
        };

        Ok(UsageAnalytics {
            total_calls,
            success_count,
            failure_count,
            success_rate,
            avg_response_time_ms,
            per_endpoint,
            per_hour,
            per_day,
        })
    }
}
