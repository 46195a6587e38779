use std::time::Duration;

use log::{error, info, warn};
use rusqlite::OptionalExtension;

use crate::database::Database;
use crate::error::ClubPulseError;

/// Locks older than this are presumed abandoned by a crashed holder
const LOCK_TIMEOUT_SECS: i64 = 30 * 60;

#[derive(Clone, Debug)]
pub struct LockInfo {
    pub club_id: i64,
    pub locked_at: i64,
    pub locked_by: String,
}

/// Per-club advisory lock around the reconciliation pipeline. Contention is an
/// expected outcome ("busy"), not an error.
pub struct ScrapeLock;

impl ScrapeLock {
    /// Try to take the club's lock. Purges stale locks first, then attempts an
    /// exclusive insert. Returns false when another holder has it.
    pub fn acquire(db: &Database, club_id: i64, locked_by: &str) -> Result<bool, ClubPulseError> {
        let conn = db.conn()?;
        let now = chrono::Utc::now().timestamp();

        Database::immediate_transaction(&conn, |c| {
            let purged = c.execute(
                "DELETE FROM scrape_locks WHERE locked_at < ?",
                [now - LOCK_TIMEOUT_SECS],
            )?;
            if purged > 0 {
                warn!("Purged {} stale scrape lock(s)", purged);
            }

            let inserted = c.execute(
                "INSERT INTO scrape_locks (club_id, locked_at, locked_by)
                 VALUES (?, ?, ?)
                 ON CONFLICT (club_id) DO NOTHING",
                rusqlite::params![club_id, now, locked_by],
            )?;

            if inserted == 1 {
                info!("Acquired scrape lock for club {} ({})", club_id, locked_by);
                Ok(true)
            } else {
                info!(
                    "Scrape lock for club {} already held - skipping this trigger",
                    club_id
                );
                Ok(false)
            }
        })
    }

    pub fn release(db: &Database, club_id: i64) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute("DELETE FROM scrape_locks WHERE club_id = ?", [club_id])?;
        info!("Released scrape lock for club {}", club_id);
        Ok(())
    }

    pub fn get_info(db: &Database, club_id: i64) -> Result<Option<LockInfo>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            "SELECT club_id, locked_at, locked_by FROM scrape_locks WHERE club_id = ?",
            [club_id],
            |row| {
                Ok(LockInfo {
                    club_id: row.get(0)?,
                    locked_at: row.get(1)?,
                    locked_by: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    /// Admin escape hatch: drop every lock regardless of age or holder
    pub fn force_release_all(db: &Database) -> Result<usize, ClubPulseError> {
        let conn = db.conn()?;
        let released = conn.execute("DELETE FROM scrape_locks", [])?;
        warn!("Force released {} scrape lock(s)", released);
        Ok(released)
    }

    /// Run `func` while holding the club's lock. Returns Ok(None) when the
    /// lock is busy. The lock is released on every exit path, including when
    /// `func` fails.
    pub fn with_lock<T, F>(
        db: &Database,
        club_id: i64,
        locked_by: &str,
        func: F,
    ) -> Result<Option<T>, ClubPulseError>
    where
        F: FnOnce() -> Result<T, ClubPulseError>,
    {
        if !Self::acquire(db, club_id, locked_by)? {
            return Ok(None);
        }

        let result = func();

        if let Err(e) = Self::release(db, club_id) {
            // The stale-lock purge will eventually self-heal this
            error!("Failed to release scrape lock for club {}: {}", club_id, e);
        }

        result.map(Some)
    }

    /// Bounded wait-with-poll acquisition for callers that prefer waiting to
    /// abandoning. Returns false on timeout.
    pub fn wait_and_acquire(
        db: &Database,
        club_id: i64,
        locked_by: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<bool, ClubPulseError> {
        let deadline = std::time::Instant::now() + max_wait;

        loop {
            if Self::acquire(db, club_id, locked_by)? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                warn!("Timeout waiting for scrape lock on club {}", club_id);
                return Ok(false);
            }
            std::thread::sleep(poll_interval.min(remaining));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::temp_db;

    #[test]
    fn test_acquire_conflict_release() {
        let (_dir, db) = temp_db();

        assert!(ScrapeLock::acquire(&db, 1, "scheduler").unwrap());
        // Second acquisition is busy, not an error
        assert!(!ScrapeLock::acquire(&db, 1, "manual").unwrap());
        // A different club is unaffected
        assert!(ScrapeLock::acquire(&db, 2, "scheduler").unwrap());

        let info = ScrapeLock::get_info(&db, 1).unwrap().unwrap();
        assert_eq!(info.locked_by, "scheduler");

        ScrapeLock::release(&db, 1).unwrap();
        assert!(ScrapeLock::acquire(&db, 1, "manual").unwrap());
    }

    #[test]
    fn test_stale_lock_is_purged_on_acquire() {
        let (_dir, db) = temp_db();

        // Simulate a holder that crashed 31 minutes ago
        let stale_at = chrono::Utc::now().timestamp() - (31 * 60);
        let conn = db.conn().unwrap();
        conn.execute(
            "INSERT INTO scrape_locks (club_id, locked_at, locked_by) VALUES (1, ?, 'crashed')",
            [stale_at],
        )
        .unwrap();

        assert!(ScrapeLock::acquire(&db, 1, "scheduler").unwrap());
        let info = ScrapeLock::get_info(&db, 1).unwrap().unwrap();
        assert_eq!(info.locked_by, "scheduler");
    }

    #[test]
    fn test_fresh_lock_is_not_purged() {
        let (_dir, db) = temp_db();

        let recent_at = chrono::Utc::now().timestamp() - (5 * 60);
        let conn = db.conn().unwrap();
        conn.execute(
            "INSERT INTO scrape_locks (club_id, locked_at, locked_by) VALUES (1, ?, 'running')",
            [recent_at],
        )
        .unwrap();

        assert!(!ScrapeLock::acquire(&db, 1, "scheduler").unwrap());
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let (_dir, db) = temp_db();

        let result: Result<Option<()>, _> = ScrapeLock::with_lock(&db, 1, "scheduler", || {
            Err(ClubPulseError::Error("pass blew up".to_string()))
        });
        assert!(result.is_err());

        // Lock must have been released despite the failure
        assert!(ScrapeLock::get_info(&db, 1).unwrap().is_none());
        assert!(ScrapeLock::acquire(&db, 1, "manual").unwrap());
    }

    #[test]
    fn test_with_lock_busy_returns_none() {
        let (_dir, db) = temp_db();

        assert!(ScrapeLock::acquire(&db, 1, "other").unwrap());
        let result = ScrapeLock::with_lock(&db, 1, "scheduler", || Ok(42)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_force_release_all() {
        let (_dir, db) = temp_db();
        ScrapeLock::acquire(&db, 1, "a").unwrap();
        ScrapeLock::acquire(&db, 2, "b").unwrap();
        assert_eq!(ScrapeLock::force_release_all(&db).unwrap(), 2);
        assert!(ScrapeLock::get_info(&db, 1).unwrap().is_none());
    }
}
