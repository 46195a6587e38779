use chrono::NaiveDate;
use log::info;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::clubs::Club;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::utils::Utils;

/// An effective-dated daily quota override. Entries are append-only: a newer
/// entry shadows an older one at lookup time, it never edits or removes it.
#[derive(Clone, Debug)]
pub struct QuotaScheduleEntry {
    entry_id: i64,
    club_id: i64,
    effective_date: NaiveDate,
    daily_quota: i64,
    set_by: Option<String>,
}

impl QuotaScheduleEntry {
    pub fn entry_id(&self) -> i64 {
        self.entry_id
    }

    pub fn club_id(&self) -> i64 {
        self.club_id
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.effective_date
    }

    pub fn daily_quota(&self) -> i64 {
        self.daily_quota
    }

    pub fn set_by(&self) -> Option<&str> {
        self.set_by.as_deref()
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let date_str: String = row.get(2)?;
        Ok(QuotaScheduleEntry {
            entry_id: row.get(0)?,
            club_id: row.get(1)?,
            effective_date: Utils::date_from_db(&date_str).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    2,
                    "effective_date".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            daily_quota: row.get(3)?,
            set_by: row.get(4)?,
        })
    }

    pub fn append(
        db: &Database,
        club_id: i64,
        effective_date: NaiveDate,
        daily_quota: i64,
        set_by: Option<&str>,
    ) -> Result<Self, ClubPulseError> {
        if daily_quota < 0 {
            return Err(ClubPulseError::Error(
                "daily_quota must not be negative".to_string(),
            ));
        }

        let conn = db.conn()?;
        let entry_id: i64 = conn.query_row(
            "INSERT INTO quota_schedule (club_id, effective_date, daily_quota, set_by, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING entry_id",
            rusqlite::params![
                club_id,
                Utils::date_to_db(effective_date),
                daily_quota,
                set_by,
                chrono::Utc::now().timestamp(),
            ],
            |row| row.get(0),
        )?;

        info!(
            "Quota set to {} fans/day for club {} effective {} (set by {})",
            daily_quota,
            club_id,
            effective_date,
            set_by.unwrap_or("unknown")
        );

        Ok(QuotaScheduleEntry {
            entry_id,
            club_id,
            effective_date,
            daily_quota,
            set_by: set_by.map(str::to_owned),
        })
    }

    /// Daily quota in force on `date`: the most recent schedule entry with
    /// effective_date <= date, falling back to the club default. Entries that
    /// share an effective date shadow by insertion order (newest wins).
    pub fn quota_for_date(db: &Database, club: &Club, date: NaiveDate) -> Result<i64, ClubPulseError> {
        let conn = db.conn()?;
        let quota: Option<i64> = conn
            .query_row(
                "SELECT daily_quota FROM quota_schedule
                 WHERE club_id = ? AND effective_date <= ?
                 ORDER BY effective_date DESC, entry_id DESC
                 LIMIT 1",
                rusqlite::params![club.club_id(), Utils::date_to_db(date)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(quota.unwrap_or_else(|| club.daily_quota()))
    }

    /// Expected cumulative fans over `from..=to`: the sum of each day's
    /// schedule-resolved quota. O(days-in-period), fine at club scale.
    pub fn expected_fans(
        db: &Database,
        club: &Club,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, ClubPulseError> {
        if from > to {
            return Ok(0);
        }

        // One query for the whole window, resolved per-day in memory
        let conn = db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entry_id, club_id, effective_date, daily_quota, set_by
             FROM quota_schedule
             WHERE club_id = ? AND effective_date <= ?
             ORDER BY effective_date ASC, entry_id ASC",
        )?;
        let entries = stmt
            .query_map(
                rusqlite::params![club.club_id(), Utils::date_to_db(to)],
                Self::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut total: i64 = 0;
        let mut day = from;
        while day <= to {
            let quota = entries
                .iter()
                .rev()
                .find(|e| e.effective_date <= day)
                .map(|e| e.daily_quota)
                .unwrap_or_else(|| club.daily_quota());
            total += quota;
            day = day
                .succ_opt()
                .ok_or_else(|| ClubPulseError::Error("Date overflow".to_string()))?;
        }

        Ok(total)
    }

    /// All entries effective within the period containing `reference`
    pub fn list_for_period(
        db: &Database,
        club_id: i64,
        reference: NaiveDate,
    ) -> Result<Vec<Self>, ClubPulseError> {
        let start = Utils::period_start(reference);
        let end = Utils::day_index_to_date(reference, Utils::days_in_period(reference));

        let conn = db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entry_id, club_id, effective_date, daily_quota, set_by
             FROM quota_schedule
             WHERE club_id = ? AND effective_date >= ? AND effective_date <= ?
             ORDER BY effective_date ASC, entry_id ASC",
        )?;
        let entries = stmt
            .query_map(
                rusqlite::params![club_id, Utils::date_to_db(start), Utils::date_to_db(end)],
                Self::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Period reset: schedule entries are period-scoped and are purged with
    /// the ledger. Caller must hold an immediate transaction.
    pub fn clear_for_club_immediate(
        conn: &Connection,
        club_id: i64,
    ) -> Result<(), ClubPulseError> {
        conn.execute("DELETE FROM quota_schedule WHERE club_id = ?", [club_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clubs::CreateClubParams;
    use crate::database::testing::temp_db;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn club_with_default(db: &Database, quota: i64) -> Club {
        Club::create(
            db,
            CreateClubParams {
                club_name: "Quota Club".to_string(),
                daily_quota: quota,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_quota_resolution_falls_back_to_club_default() {
        let (_dir, db) = temp_db();
        let club = club_with_default(&db, 1_000_000);

        assert_eq!(
            QuotaScheduleEntry::quota_for_date(&db, &club, d(2025, 11, 10)).unwrap(),
            1_000_000
        );

        QuotaScheduleEntry::append(&db, club.club_id(), d(2025, 11, 15), 2_000_000, Some("admin"))
            .unwrap();

        // Before the effective date: still the default
        assert_eq!(
            QuotaScheduleEntry::quota_for_date(&db, &club, d(2025, 11, 14)).unwrap(),
            1_000_000
        );
        // On and after: the override
        assert_eq!(
            QuotaScheduleEntry::quota_for_date(&db, &club, d(2025, 11, 15)).unwrap(),
            2_000_000
        );
        assert_eq!(
            QuotaScheduleEntry::quota_for_date(&db, &club, d(2025, 11, 30)).unwrap(),
            2_000_000
        );
    }

    #[test]
    fn test_same_date_entries_shadow_newest_wins() {
        let (_dir, db) = temp_db();
        let club = club_with_default(&db, 1_000_000);

        QuotaScheduleEntry::append(&db, club.club_id(), d(2025, 11, 10), 3_000_000, Some("a"))
            .unwrap();
        QuotaScheduleEntry::append(&db, club.club_id(), d(2025, 11, 10), 1_500_000, Some("b"))
            .unwrap();

        assert_eq!(
            QuotaScheduleEntry::quota_for_date(&db, &club, d(2025, 11, 10)).unwrap(),
            1_500_000
        );
    }

    #[test]
    fn test_expected_fans_flat_quota() {
        let (_dir, db) = temp_db();
        let club = club_with_default(&db, 1_000_000);

        // Joined day 5, queried day 10: days 5..=10 inclusive = 6 days
        let expected =
            QuotaScheduleEntry::expected_fans(&db, &club, d(2025, 11, 5), d(2025, 11, 10)).unwrap();
        assert_eq!(expected, 6_000_000);
    }

    #[test]
    fn test_expected_fans_mid_period_change() {
        let (_dir, db) = temp_db();
        let club = club_with_default(&db, 1_000_000);

        QuotaScheduleEntry::append(&db, club.club_id(), d(2025, 11, 15), 2_000_000, Some("admin"))
            .unwrap();

        // Active since day 1, queried day 20: 14 days at 1M + 6 days at 2M
        let expected =
            QuotaScheduleEntry::expected_fans(&db, &club, d(2025, 11, 1), d(2025, 11, 20)).unwrap();
        assert_eq!(expected, 26_000_000);
    }

    #[test]
    fn test_expected_fans_empty_window() {
        let (_dir, db) = temp_db();
        let club = club_with_default(&db, 1_000_000);
        assert_eq!(
            QuotaScheduleEntry::expected_fans(&db, &club, d(2025, 11, 10), d(2025, 11, 9)).unwrap(),
            0
        );
    }

    #[test]
    fn test_clear_for_club() {
        let (_dir, db) = temp_db();
        let club = club_with_default(&db, 1_000_000);
        QuotaScheduleEntry::append(&db, club.club_id(), d(2025, 11, 2), 500_000, None).unwrap();

        let conn = db.conn().unwrap();
        crate::database::Database::immediate_transaction(&conn, |c| {
            QuotaScheduleEntry::clear_for_club_immediate(c, club.club_id())
        })
        .unwrap();

        assert!(QuotaScheduleEntry::list_for_period(&db, club.club_id(), d(2025, 11, 15))
            .unwrap()
            .is_empty());
    }
}
