use std::path::Path;

use log::{debug, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};

use crate::error::ClubPulseError;
use crate::schema::{CREATE_SCHEMA_SQL, SCHEMA_VERSION};

const DB_FILENAME: &str = "clubpulse.db";

pub type DbConn = PooledConnection<SqliteConnectionManager>;

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(db_folder: &Path) -> Result<Self, ClubPulseError> {
        if !db_folder.is_dir() {
            std::fs::create_dir_all(db_folder)?;
        }

        let db_path = db_folder.join(DB_FILENAME);
        debug!("Opening database at: {}", db_path.display());

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        let db = Database { pool };
        db.ensure_schema()?;

        info!("Database ready at: {}", db_path.display());
        Ok(db)
    }

    pub fn conn(&self) -> Result<DbConn, ClubPulseError> {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), ClubPulseError> {
        let conn = self.conn()?;

        let table_exists: bool = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);

        if !table_exists {
            conn.execute_batch(CREATE_SCHEMA_SQL)?;
            return Ok(());
        }

        let stored_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version.as_deref() {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(ClubPulseError::Error(format!(
                "Schema version mismatch: found '{}', expected '{}'",
                other, SCHEMA_VERSION
            ))),
            None => Err(ClubPulseError::Error("Schema version missing".to_string())),
        }
    }

    /// Run `func` inside a BEGIN IMMEDIATE transaction, committing on Ok and
    /// rolling back on Err. Multi-row invariants (one active bomb per member,
    /// lock acquisition) rely on the write lock this takes up front.
    pub fn immediate_transaction<T, F>(conn: &Connection, func: F) -> Result<T, ClubPulseError>
    where
        F: FnOnce(&Connection) -> Result<T, ClubPulseError>,
    {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match func(conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                // Preserve the original error even if rollback itself fails
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}
