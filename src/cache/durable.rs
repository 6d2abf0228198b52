use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use std::time::Duration;

use crate::database::Database;

use super::{CacheBackend, CacheHit};

/// Durable cache backend over the shared `cache_data` table.
///
/// Survives restarts and is visible to every process sharing the database.
/// Expiry lives in the `expires_at` column (epoch seconds); expired rows
/// are deleted on read and by the `purge_expired` sweep.
pub struct DurableCache {
    db: Database,
}

impl DurableCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl CacheBackend for DurableCache {
    fn get(&self, key: &str) -> Result<Option<CacheHit>> {
        let now = Utc::now().timestamp();
        let conn = self.db.lock();

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, expires_at FROM cache_data WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((_, expires_at)) if expires_at <= now => {
                conn.execute("DELETE FROM cache_data WHERE cache_key = ?1", params![key])?;
                Ok(None)
            }
            Some((payload, expires_at)) => Ok(Some(CacheHit {
                payload,
                expires_in: Duration::from_secs((expires_at - now) as u64),
            })),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, payload: &str, subject: Option<&str>, ttl: Duration) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs().max(1) as i64;
        let conn = self.db.lock();

        conn.execute(
            "INSERT OR REPLACE INTO cache_data
             (cache_key, payload, expires_at, created_at, subject_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![key, payload, expires_at, now, subject],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM cache_data WHERE cache_key = ?1", params![key])?;
        Ok(())
    }

    fn remove_matching(&self, fragment: &str) -> Result<usize> {
        let conn = self.db.lock();
        let pattern = format!("%{}%", fragment);
        let removed = conn.execute(
            "DELETE FROM cache_data WHERE cache_key LIKE ?1",
            params![pattern],
        )?;
        Ok(removed)
    }

    fn remove_by_subject(&self, subject: &str) -> Result<usize> {
        let conn = self.db.lock();
        let removed = conn.execute(
            "DELETE FROM cache_data WHERE subject_id = ?1",
            params![subject],
        )?;
        Ok(removed)
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let conn = self.db.lock();
        let removed = conn.execute(
            "DELETE FROM cache_data WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache() -> DurableCache {
        DurableCache::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn set_then_get_returns_value() {
        let cache = cache();
        cache
            .set("prop:u1:abc", "{\"price\":1}", Some("u1"), Duration::from_secs(60))
            .unwrap();
        let hit = cache.get("prop:u1:abc").unwrap().unwrap();
        assert_eq!(hit.payload, "{\"price\":1}");
    }

    #[test]
    fn expired_row_is_deleted_on_read() {
        let cache = cache();
        cache
            .set("k", "v", None, Duration::from_secs(1))
            .unwrap();
        thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("k").unwrap().is_none());

        let conn = cache.db.lock();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM cache_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn overwrite_replaces_payload() {
        let cache = cache();
        cache.set("k", "old", None, Duration::from_secs(60)).unwrap();
        cache.set("k", "new", None, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().payload, "new");
    }

    #[test]
    fn remove_by_subject_uses_column_scope() {
        let cache = cache();
        cache
            .set("a", "1", Some("u1"), Duration::from_secs(60))
            .unwrap();
        cache
            .set("b", "2", Some("u2"), Duration::from_secs(60))
            .unwrap();
        assert_eq!(cache.remove_by_subject("u1").unwrap(), 1);
        assert!(cache.get("a").unwrap().is_none());
        assert!(cache.get("b").unwrap().is_some());
    }

    #[test]
    fn purge_expired_counts_rows() {
        let cache = cache();
        cache.set("gone", "1", None, Duration::from_secs(1)).unwrap();
        cache.set("kept", "2", None, Duration::from_secs(600)).unwrap();
        thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.get("kept").unwrap().is_some());
    }
}
