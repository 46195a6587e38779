use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::database::Database;
use crate::error::ClubPulseError;
use crate::utils::Utils;

/// How far back consecutive-behind counting looks. Anything beyond this is
/// irrelevant: bomb triggers are single digits.
const BEHIND_LOOKBACK_DAYS: i64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    ledger_id: i64,
    member_id: i64,
    club_id: i64,
    date: NaiveDate,
    cumulative_fans: i64,
    expected_fans: i64,
    deficit_surplus: i64,
    days_behind: i64,
}

impl LedgerEntry {
    pub fn member_id(&self) -> i64 {
        self.member_id
    }

    pub fn club_id(&self) -> i64 {
        self.club_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn cumulative_fans(&self) -> i64 {
        self.cumulative_fans
    }

    pub fn expected_fans(&self) -> i64 {
        self.expected_fans
    }

    pub fn deficit_surplus(&self) -> i64 {
        self.deficit_surplus
    }

    pub fn days_behind(&self) -> i64 {
        self.days_behind
    }

    const SELECT_COLS: &str = "ledger_id, member_id, club_id, date, cumulative_fans,
         expected_fans, deficit_surplus, days_behind";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let date_str: String = row.get(3)?;
        Ok(LedgerEntry {
            ledger_id: row.get(0)?,
            member_id: row.get(1)?,
            club_id: row.get(2)?,
            date: Utils::date_from_db(&date_str).map_err(|_| {
                rusqlite::Error::InvalidColumnType(3, "date".to_string(), rusqlite::types::Type::Text)
            })?,
            cumulative_fans: row.get(4)?,
            expected_fans: row.get(5)?,
            deficit_surplus: row.get(6)?,
            days_behind: row.get(7)?,
        })
    }

    /// Write the (member, date) row, overwriting any existing one. Re-running
    /// a pass for the same day replaces rather than duplicates.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert(
        db: &Database,
        member_id: i64,
        club_id: i64,
        date: NaiveDate,
        cumulative_fans: i64,
        expected_fans: i64,
        deficit_surplus: i64,
        days_behind: i64,
    ) -> Result<Self, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            "INSERT INTO ledger
                 (member_id, club_id, date, cumulative_fans, expected_fans, deficit_surplus, days_behind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (member_id, date) DO UPDATE SET
                 cumulative_fans = ?4,
                 expected_fans = ?5,
                 deficit_surplus = ?6,
                 days_behind = ?7
             RETURNING ledger_id, member_id, club_id, date, cumulative_fans,
                 expected_fans, deficit_surplus, days_behind",
            rusqlite::params![
                member_id,
                club_id,
                Utils::date_to_db(date),
                cumulative_fans,
                expected_fans,
                deficit_surplus,
                days_behind,
            ],
            Self::from_row,
        )
        .map_err(ClubPulseError::DatabaseError)
    }

    pub fn get_latest_for_member(
        db: &Database,
        member_id: i64,
    ) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM ledger WHERE member_id = ? ORDER BY date DESC LIMIT 1",
                Self::SELECT_COLS
            ),
            [member_id],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    /// Most recent entries strictly before `before`, newest first
    pub fn get_before(
        db: &Database,
        member_id: i64,
        before: NaiveDate,
        limit: i64,
    ) -> Result<Vec<Self>, ClubPulseError> {
        let conn = db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ledger WHERE member_id = ? AND date < ?
             ORDER BY date DESC LIMIT ?",
            Self::SELECT_COLS
        ))?;
        let entries = stmt
            .query_map(
                rusqlite::params![member_id, Utils::date_to_db(before), limit],
                Self::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Consecutive days behind as of `date`, given that day's deficit/surplus.
    ///
    /// On track means zero. Otherwise today counts as one behind day, plus the
    /// unbroken run of negative days immediately before `date`. Any row already
    /// stored for `date` itself is excluded so that re-running a pass for the
    /// same day cannot count today twice.
    pub fn consecutive_days_behind(
        db: &Database,
        member_id: i64,
        date: NaiveDate,
        deficit_surplus: i64,
    ) -> Result<i64, ClubPulseError> {
        if deficit_surplus >= 0 {
            return Ok(0);
        }

        let mut days = 1;
        for prior in Self::get_before(db, member_id, date, BEHIND_LOOKBACK_DAYS)? {
            if prior.deficit_surplus < 0 {
                days += 1;
            } else {
                break;
            }
        }
        Ok(days)
    }

    /// Whether any ledger rows exist for (club, date). The scheduler uses this
    /// as the durable already-ran-today check.
    pub fn club_has_entries_for_date(
        db: &Database,
        club_id: i64,
        date: NaiveDate,
    ) -> Result<bool, ClubPulseError> {
        let conn = db.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ledger WHERE club_id = ? AND date = ?",
            rusqlite::params![club_id, Utils::date_to_db(date)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Period reset purge. Caller must hold an immediate transaction.
    pub fn clear_for_club_immediate(conn: &Connection, club_id: i64) -> Result<(), ClubPulseError> {
        conn.execute("DELETE FROM ledger WHERE club_id = ?", [club_id])?;
        Ok(())
    }
}
