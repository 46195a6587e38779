use chrono::NaiveDate;
use log::info;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::database::Database;
use crate::error::ClubPulseError;
use crate::utils::Utils;

#[derive(Clone, Debug)]
pub struct Member {
    member_id: i64,
    club_id: i64,
    external_id: Option<String>,
    display_name: String,
    join_date: NaiveDate,
    is_active: bool,
    manually_deactivated: bool,
    last_seen: NaiveDate,
}

impl Member {
    pub fn member_id(&self) -> i64 {
        self.member_id
    }

    pub fn club_id(&self) -> i64 {
        self.club_id
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn join_date(&self) -> NaiveDate {
        self.join_date
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn manually_deactivated(&self) -> bool {
        self.manually_deactivated
    }

    pub fn last_seen(&self) -> NaiveDate {
        self.last_seen
    }

    /// The key this member appears under in scraped snapshots:
    /// stable external id when present, display name otherwise.
    pub fn snapshot_key(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.display_name)
    }

    const SELECT_COLS: &str = "member_id, club_id, external_id, display_name, join_date,
         is_active, manually_deactivated, last_seen";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let join_str: String = row.get(4)?;
        let seen_str: String = row.get(7)?;
        let bad_date = |idx: usize, name: &str| {
            rusqlite::Error::InvalidColumnType(
                idx,
                name.to_string(),
                rusqlite::types::Type::Text,
            )
        };
        Ok(Member {
            member_id: row.get(0)?,
            club_id: row.get(1)?,
            external_id: row.get(2)?,
            display_name: row.get(3)?,
            join_date: Utils::date_from_db(&join_str).map_err(|_| bad_date(4, "join_date"))?,
            is_active: row.get(5)?,
            manually_deactivated: row.get(6)?,
            last_seen: Utils::date_from_db(&seen_str).map_err(|_| bad_date(7, "last_seen"))?,
        })
    }

    pub fn create(
        db: &Database,
        club_id: i64,
        display_name: &str,
        join_date: NaiveDate,
        external_id: Option<&str>,
    ) -> Result<Self, ClubPulseError> {
        if display_name.trim().is_empty() {
            return Err(ClubPulseError::Error("Member name is empty".to_string()));
        }

        let now = chrono::Utc::now().timestamp();
        let conn = db.conn()?;
        let member_id: i64 = conn.query_row(
            "INSERT INTO members (club_id, external_id, display_name, join_date, last_seen,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING member_id",
            rusqlite::params![
                club_id,
                external_id,
                display_name.trim(),
                Utils::date_to_db(join_date),
                Utils::date_to_db(join_date),
                now,
                now,
            ],
            |row| row.get(0),
        )?;

        info!(
            "Created member '{}' (external id {:?}) for club {}, joined {}",
            display_name.trim(),
            external_id,
            club_id,
            join_date
        );

        Ok(Member {
            member_id,
            club_id,
            external_id: external_id.map(str::to_owned),
            display_name: display_name.trim().to_owned(),
            join_date,
            is_active: true,
            manually_deactivated: false,
            last_seen: join_date,
        })
    }

    pub fn get_by_id(db: &Database, member_id: i64) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM members WHERE member_id = ?", Self::SELECT_COLS),
            [member_id],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    pub fn get_by_external_id(
        db: &Database,
        club_id: i64,
        external_id: &str,
    ) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM members WHERE club_id = ? AND external_id = ?",
                Self::SELECT_COLS
            ),
            rusqlite::params![club_id, external_id],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    /// Display names are not unique; when several match, the oldest row wins
    pub fn get_by_name(
        db: &Database,
        club_id: i64,
        display_name: &str,
    ) -> Result<Option<Self>, ClubPulseError> {
        let conn = db.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM members WHERE club_id = ? AND display_name = ?
                 ORDER BY member_id ASC LIMIT 1",
                Self::SELECT_COLS
            ),
            rusqlite::params![club_id, display_name],
            Self::from_row,
        )
        .optional()
        .map_err(ClubPulseError::DatabaseError)
    }

    pub fn get_all_active(db: &Database, club_id: i64) -> Result<Vec<Self>, ClubPulseError> {
        let conn = db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM members WHERE club_id = ? AND is_active = 1 ORDER BY display_name",
            Self::SELECT_COLS
        ))?;
        let members = stmt
            .query_map([club_id], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    pub fn update_display_name(&mut self, db: &Database, new_name: &str) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute(
            "UPDATE members SET display_name = ?, updated_at = ? WHERE member_id = ?",
            rusqlite::params![new_name, chrono::Utc::now().timestamp(), self.member_id],
        )?;
        info!(
            "Member {} renamed: '{}' -> '{}'",
            self.member_id, self.display_name, new_name
        );
        self.display_name = new_name.to_owned();
        Ok(())
    }

    pub fn update_last_seen(&mut self, db: &Database, last_seen: NaiveDate) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute(
            "UPDATE members SET last_seen = ?, updated_at = ? WHERE member_id = ?",
            rusqlite::params![
                Utils::date_to_db(last_seen),
                chrono::Utc::now().timestamp(),
                self.member_id
            ],
        )?;
        self.last_seen = last_seen;
        Ok(())
    }

    /// Deactivate. `manual` records whether this was an admin action; a manual
    /// deactivation is sticky and survives both scrapes and period resets.
    pub fn deactivate(&mut self, db: &Database, manual: bool) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute(
            "UPDATE members SET is_active = 0, manually_deactivated = ?, updated_at = ?
             WHERE member_id = ?",
            rusqlite::params![manual, chrono::Utc::now().timestamp(), self.member_id],
        )?;
        self.is_active = false;
        self.manually_deactivated = manual;
        info!(
            "{} member '{}'",
            if manual {
                "Manually deactivated"
            } else {
                "Auto-deactivated"
            },
            self.display_name
        );
        Ok(())
    }

    /// Activate and clear the manual-deactivation flag
    pub fn activate(&mut self, db: &Database) -> Result<(), ClubPulseError> {
        let conn = db.conn()?;
        conn.execute(
            "UPDATE members SET is_active = 1, manually_deactivated = 0, updated_at = ?
             WHERE member_id = ?",
            rusqlite::params![chrono::Utc::now().timestamp(), self.member_id],
        )?;
        self.is_active = true;
        self.manually_deactivated = false;
        info!("Activated member '{}'", self.display_name);
        Ok(())
    }

    /// Period reset: bring auto-deactivated members back while leaving manual
    /// deactivations in place. Caller must hold an immediate transaction.
    pub fn clear_auto_deactivations_immediate(
        conn: &Connection,
        club_id: i64,
    ) -> Result<usize, ClubPulseError> {
        let reactivated = conn.execute(
            "UPDATE members SET is_active = 1, updated_at = ?
             WHERE club_id = ? AND is_active = 0 AND manually_deactivated = 0",
            rusqlite::params![chrono::Utc::now().timestamp(), club_id],
        )?;
        Ok(reactivated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clubs::{Club, CreateClubParams};
    use crate::database::testing::temp_db;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_club(db: &Database) -> Club {
        Club::create(
            db,
            CreateClubParams {
                club_name: "Member Club".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_by_external_id_and_name() {
        let (_dir, db) = temp_db();
        let club = test_club(&db);

        let m = Member::create(&db, club.club_id(), "Haru", d(2025, 11, 6), Some("t-100")).unwrap();
        assert_eq!(m.snapshot_key(), "t-100");

        let by_ext = Member::get_by_external_id(&db, club.club_id(), "t-100")
            .unwrap()
            .unwrap();
        assert_eq!(by_ext.member_id(), m.member_id());

        let anon = Member::create(&db, club.club_id(), "Kiri", d(2025, 11, 1), None).unwrap();
        assert_eq!(anon.snapshot_key(), "Kiri");
        let by_name = Member::get_by_name(&db, club.club_id(), "Kiri").unwrap().unwrap();
        assert_eq!(by_name.member_id(), anon.member_id());
    }

    #[test]
    fn test_external_id_unique_per_club() {
        let (_dir, db) = temp_db();
        let club = test_club(&db);

        Member::create(&db, club.club_id(), "One", d(2025, 11, 1), Some("dup")).unwrap();
        let result = Member::create(&db, club.club_id(), "Two", d(2025, 11, 1), Some("dup"));
        assert!(result.is_err());

        // Same external id in a different club is fine
        let other = Club::create(
            &db,
            CreateClubParams {
                club_name: "Other Club".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(Member::create(&db, other.club_id(), "Three", d(2025, 11, 1), Some("dup")).is_ok());
    }

    #[test]
    fn test_deactivate_and_activate() {
        let (_dir, db) = temp_db();
        let club = test_club(&db);
        let mut m = Member::create(&db, club.club_id(), "Flaky", d(2025, 11, 1), None).unwrap();

        m.deactivate(&db, false).unwrap();
        assert!(!m.is_active());
        assert!(!m.manually_deactivated());
        assert!(Member::get_all_active(&db, club.club_id()).unwrap().is_empty());

        m.activate(&db).unwrap();
        assert!(m.is_active());

        m.deactivate(&db, true).unwrap();
        let reloaded = Member::get_by_id(&db, m.member_id()).unwrap().unwrap();
        assert!(reloaded.manually_deactivated());
    }

    #[test]
    fn test_reset_clears_only_auto_deactivations() {
        let (_dir, db) = temp_db();
        let club = test_club(&db);
        let mut auto = Member::create(&db, club.club_id(), "Auto", d(2025, 11, 1), None).unwrap();
        let mut manual = Member::create(&db, club.club_id(), "Manual", d(2025, 11, 1), None).unwrap();

        auto.deactivate(&db, false).unwrap();
        manual.deactivate(&db, true).unwrap();

        let conn = db.conn().unwrap();
        let count = Database::immediate_transaction(&conn, |c| {
            Member::clear_auto_deactivations_immediate(c, club.club_id())
        })
        .unwrap();
        assert_eq!(count, 1);

        let auto = Member::get_by_id(&db, auto.member_id()).unwrap().unwrap();
        let manual = Member::get_by_id(&db, manual.member_id()).unwrap().unwrap();
        assert!(auto.is_active());
        assert!(!manual.is_active());
        assert!(manual.manually_deactivated());
    }
}
