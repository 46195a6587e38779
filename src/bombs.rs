use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::database::Database;
use crate::error::ClubPulseError;
use crate::utils::Utils;

#[derive(Clone, Debug)]
pub struct Bomb {
    bomb_id: i64,
    member_id: i64,
    club_id: i64,
    activation_date: NaiveDate,
    days_remaining: i64,
    is_active: bool,
    deactivation_date: Option<NaiveDate>,
    last_countdown_date: NaiveDate,
}

impl Bomb {
    pub fn bomb_id(&self) -> i64 {
        self.bomb_id
    }

    pub fn member_id(&self) -> i64 {
        self.member_id
    }

    pub fn club_id(&self) -> i64 {
        self.club_id
    }

    pub fn activation_date(&self) -> NaiveDate {
        self.activation_date
    }

    pub fn days_remaining(&self) -> i64 {
        self.days_remaining
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn deactivation_date(&self) -> Option<NaiveDate> {
        self.deactivation_date
    }

    const SELECT_COLS: &str = "bomb_id, member_id, club_id, activation_date, days_remaining,
         is_active, deactivation_date, last_countdown_date";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let bad_date = |idx: usize, name: &str| {
            rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
        };
        let activation_str: String = row.get(3)?;
        let deactivation_str: Option<String> = row.get(6)?;
        let countdown_str: String = row.get(7)?;
        Ok(Bomb {
            bomb_id: row.get(0)?,
            member_id: row.get(1)?,
            club_id: row.get(2)?,
            activation_date: Utils::date_from_db(&activation_str)
                .map_err(|_| bad_date(3, "activation_date"))?,
            days_remaining: row.get(4)?,
            is_active: row.get(5)?,
            deactivation_date: deactivation_str
                .map(|s| Utils::date_from_db(&s).map_err(|_| bad_date(6, "deactivation_date")))
                .transpose()?,
            last_countdown_date: Utils::date_from_db(&countdown_str)
                .map_err(|_| bad_date(7, "last_countdown_date"))?,
        })
    }

    /// Create a bomb with a full countdown. Checks for an existing active bomb
    /// inside the same transaction; a member can carry at most one.
    ///
    /// The countdown latch starts at the activation date, so the pass that
    /// creates a bomb can never also decrement it.
    pub fn create(
        db: &Database,
        member_id: i64,
        club_id: i64,
        activation_date: NaiveDate,
        countdown_days: i64,
    ) -> Result<Self, ClubPulseError> {
        let conn = db.conn()?;
        let bomb_id = Database::immediate_transaction(&conn, |c| {
            let existing: Option<i64> = c
                .query_row(
                    "SELECT bomb_id FROM bombs WHERE member_id = ? AND is_active = 1",
                    [member_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                return Err(ClubPulseError::Error(format!(
                    "Member {} already has active bomb {}",
                    member_id, existing_id
                )));
            }

            let bomb_id: i64 = c.query_row(
                "INSERT INTO bombs
                     (member_id, club_id, activation_date, days_remaining, last_countdown_date)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING bomb_id",
                rusqlite::params![
                    member_id,
                    club_id,
                    Utils::date_to_db(activation_date),
                    countdown_days,
                    Utils::date_to_db(activation_date),
                ],
                |row| row.get(0),
            )?;
            Ok(bomb_id)
        })?;

        warn!(
            "Bomb activated for member {} with {} days remaining",
            member_id, countdown_days
        );

        Ok(Bomb {
            bomb_id,
            member_id,
            club_id,
            activation_date,
            days_remaining: countdown_days,
            is_active: true,
            deactivation_date: None,
            last_countdown_date: activation_date,
        })
    }

    pub fn get_active_for_member(
        db: &Database,
        member_id: i64,
    ) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM bombs WHERE member_id = ? AND is_active = 1
                 ORDER BY activation_date DESC LIMIT 1",
                Self::SELECT_COLS
            ),
            [member_id],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    /// All active bombs for a club, soonest to expire first
    pub fn get_all_active_for_club(db: &Database, club_id: i64) -> Result<Vec<Self>, ClubPulseError> {
        let conn = db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bombs WHERE club_id = ? AND is_active = 1
             ORDER BY days_remaining ASC, activation_date ASC",
            Self::SELECT_COLS
        ))?;
        let bombs = stmt
            .query_map([club_id], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bombs)
    }

    /// Decrement the countdown, at most once per calendar day and never below
    /// zero. Returns true when a decrement happened. Repeat passes within the
    /// same day are no-ops.
    pub fn decrement_if_due(&mut self, db: &Database, today: NaiveDate) -> Result<bool, ClubPulseError> {
        if self.last_countdown_date >= today || self.days_remaining <= 0 {
            return Ok(false);
        }

        let conn = db.conn()?;
        conn.execute(
            "UPDATE bombs SET days_remaining = ?, last_countdown_date = ? WHERE bomb_id = ?",
            rusqlite::params![
                self.days_remaining - 1,
                Utils::date_to_db(today),
                self.bomb_id
            ],
        )?;
        self.days_remaining -= 1;
        self.last_countdown_date = today;
        info!(
            "Bomb countdown for member {}: {} days remaining",
            self.member_id, self.days_remaining
        );
        Ok(true)
    }

    /// Member recovered: stop the countdown and stamp the recovery date
    pub fn deactivate(&mut self, db: &Database, deactivation_date: NaiveDate) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute(
            "UPDATE bombs SET is_active = 0, deactivation_date = ? WHERE bomb_id = ?",
            rusqlite::params![Utils::date_to_db(deactivation_date), self.bomb_id],
        )?;
        self.is_active = false;
        self.deactivation_date = Some(deactivation_date);
        info!("Bomb deactivated for member {}", self.member_id);
        Ok(())
    }

    /// Period reset purge. Caller must hold an immediate transaction.
    pub fn clear_for_club_immediate(conn: &Connection, club_id: i64) -> Result<(), ClubPulseError> {
        conn.execute("DELETE FROM bombs WHERE club_id = ?", [club_id])?;
        Ok(())
    }
}
