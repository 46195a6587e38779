use chrono_tz::Tz;
use log::{info, warn};
use rusqlite::{OptionalExtension, Row};

use crate::database::Database;
use crate::error::ClubPulseError;

/// Parameters for creating a new club
pub struct CreateClubParams {
    pub club_name: String,
    pub daily_quota: i64,
    pub timezone: String,
    pub scrape_time: String,
    pub bomb_trigger_days: i64,
    pub bomb_countdown_days: i64,
    pub source_ref: Option<String>,
}

impl Default for CreateClubParams {
    fn default() -> Self {
        CreateClubParams {
            club_name: String::new(),
            daily_quota: 1_000_000,
            timezone: "Europe/Amsterdam".to_string(),
            scrape_time: "16:00".to_string(),
            bomb_trigger_days: 3,
            bomb_countdown_days: 7,
            source_ref: None,
        }
    }
}

/// Optional field updates for an existing club. None leaves a field unchanged.
#[derive(Default)]
pub struct UpdateClubParams {
    pub daily_quota: Option<i64>,
    pub timezone: Option<String>,
    pub scrape_time: Option<String>,
    pub bomb_trigger_days: Option<i64>,
    pub bomb_countdown_days: Option<i64>,
    pub source_ref: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Club {
    club_id: i64,
    club_name: String,
    daily_quota: i64,
    timezone: String,
    scrape_time: String,
    bomb_trigger_days: i64,
    bomb_countdown_days: i64,
    source_ref: Option<String>,
    is_active: bool,
}

impl Club {
    pub fn club_id(&self) -> i64 {
        self.club_id
    }

    pub fn club_name(&self) -> &str {
        &self.club_name
    }

    pub fn daily_quota(&self) -> i64 {
        self.daily_quota
    }

    pub fn bomb_trigger_days(&self) -> i64 {
        self.bomb_trigger_days
    }

    pub fn bomb_countdown_days(&self) -> i64 {
        self.bomb_countdown_days
    }

    pub fn source_ref(&self) -> Option<&str> {
        self.source_ref.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Resolve the club's IANA timezone, falling back to UTC on a bad value.
    /// Upstream admin input is untrusted; a bad timezone must not stop passes.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            warn!(
                "Club '{}' has invalid timezone '{}' - falling back to UTC",
                self.club_name, self.timezone
            );
            Tz::UTC
        })
    }

    /// Scheduled check time as (hour, minute)
    pub fn scrape_time(&self) -> (u32, u32) {
        Self::parse_time_of_day(&self.scrape_time).unwrap_or((16, 0))
    }

    fn parse_time_of_day(time: &str) -> Option<(u32, u32)> {
        let (h, m) = time.split_once(':')?;
        let hours: u32 = h.trim().parse().ok()?;
        let minutes: u32 = m.trim().parse().ok()?;
        if hours >= 24 || minutes >= 60 {
            return None;
        }
        Some((hours, minutes))
    }

    fn validate_settings(
        scrape_time: &str,
        bomb_trigger_days: i64,
        bomb_countdown_days: i64,
        daily_quota: i64,
    ) -> Result<(), ClubPulseError> {
        if Self::parse_time_of_day(scrape_time).is_none() {
            return Err(ClubPulseError::Error(format!(
                "scrape_time must be in HH:MM format, got: '{}'",
                scrape_time
            )));
        }
        if bomb_trigger_days < 1 {
            return Err(ClubPulseError::Error(
                "bomb_trigger_days must be at least 1".to_string(),
            ));
        }
        if bomb_countdown_days < 1 {
            return Err(ClubPulseError::Error(
                "bomb_countdown_days must be at least 1".to_string(),
            ));
        }
        if daily_quota < 0 {
            return Err(ClubPulseError::Error(
                "daily_quota must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Club {
            club_id: row.get(0)?,
            club_name: row.get(1)?,
            daily_quota: row.get(2)?,
            timezone: row.get(3)?,
            scrape_time: row.get(4)?,
            bomb_trigger_days: row.get(5)?,
            bomb_countdown_days: row.get(6)?,
            source_ref: row.get(7)?,
            is_active: row.get(8)?,
        })
    }

    const SELECT_COLS: &str = "club_id, club_name, daily_quota, timezone, scrape_time,
         bomb_trigger_days, bomb_countdown_days, source_ref, is_active";

    pub fn create(db: &Database, params: CreateClubParams) -> Result<Self, ClubPulseError> {
        if params.club_name.trim().is_empty() {
            return Err(ClubPulseError::Error("Club name is empty".to_string()));
        }
        Self::validate_settings(
            &params.scrape_time,
            params.bomb_trigger_days,
            params.bomb_countdown_days,
            params.daily_quota,
        )?;

        let now = chrono::Utc::now().timestamp();
        let conn = db.conn()?;

        let club_id: i64 = conn.query_row(
            "INSERT INTO clubs (club_name, daily_quota, timezone, scrape_time,
                 bomb_trigger_days, bomb_countdown_days, source_ref, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING club_id",
            rusqlite::params![
                params.club_name.trim(),
                params.daily_quota,
                params.timezone,
                params.scrape_time,
                params.bomb_trigger_days,
                params.bomb_countdown_days,
                params.source_ref,
                now,
                now,
            ],
            |row| row.get(0),
        )?;

        info!("Created club '{}' (id {})", params.club_name.trim(), club_id);

        Self::get_by_id(db, club_id)?
            .ok_or_else(|| ClubPulseError::Error(format!("Club {} not found after create", club_id)))
    }

    pub fn get_by_id(db: &Database, club_id: i64) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM clubs WHERE club_id = ?", Self::SELECT_COLS),
            [club_id],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    pub fn get_by_name(db: &Database, club_name: &str) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM clubs WHERE club_name = ?", Self::SELECT_COLS),
            [club_name],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    pub fn get_all_active(db: &Database) -> Result<Vec<Self>, ClubPulseError> {
        let conn = db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clubs WHERE is_active = 1 ORDER BY club_name",
            Self::SELECT_COLS
        ))?;
        let clubs = stmt
            .query_map([], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clubs)
    }

    pub fn get_all(db: &Database) -> Result<Vec<Self>, ClubPulseError> {
        let conn = db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clubs ORDER BY club_name",
            Self::SELECT_COLS
        ))?;
        let clubs = stmt
            .query_map([], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clubs)
    }

    pub fn update_settings(
        &mut self,
        db: &Database,
        params: UpdateClubParams,
    ) -> Result<(), ClubPulseError> {
        let daily_quota = params.daily_quota.unwrap_or(self.daily_quota);
        let timezone = params.timezone.unwrap_or_else(|| self.timezone.clone());
        let scrape_time = params.scrape_time.unwrap_or_else(|| self.scrape_time.clone());
        let bomb_trigger_days = params.bomb_trigger_days.unwrap_or(self.bomb_trigger_days);
        let bomb_countdown_days = params
            .bomb_countdown_days
            .unwrap_or(self.bomb_countdown_days);
        let source_ref = params.source_ref.or_else(|| self.source_ref.clone());

        Self::validate_settings(&scrape_time, bomb_trigger_days, bomb_countdown_days, daily_quota)?;

        let conn = db.conn()?;
        conn.execute(
            "UPDATE clubs
             SET daily_quota = ?, timezone = ?, scrape_time = ?, bomb_trigger_days = ?,
                 bomb_countdown_days = ?, source_ref = ?, updated_at = ?
             WHERE club_id = ?",
            rusqlite::params![
                daily_quota,
                timezone,
                scrape_time,
                bomb_trigger_days,
                bomb_countdown_days,
                source_ref,
                chrono::Utc::now().timestamp(),
                self.club_id,
            ],
        )?;

        self.daily_quota = daily_quota;
        self.timezone = timezone;
        self.scrape_time = scrape_time;
        self.bomb_trigger_days = bomb_trigger_days;
        self.bomb_countdown_days = bomb_countdown_days;
        self.source_ref = source_ref;

        info!("Updated settings for club '{}'", self.club_name);
        Ok(())
    }

    /// Soft-deactivate: all history is preserved
    pub fn set_active(&mut self, db: &Database, active: bool) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute(
            "UPDATE clubs SET is_active = ?, updated_at = ? WHERE club_id = ?",
            rusqlite::params![active, chrono::Utc::now().timestamp(), self.club_id],
        )?;
        self.is_active = active;
        info!(
            "Club '{}' {}",
            self.club_name,
            if active { "activated" } else { "deactivated" }
        );
        Ok(())
    }
}
