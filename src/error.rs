use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClubPulseError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into ClubPulseError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Fan source fetch failed after {attempts} attempt(s): {last_error}")]
    SourceExhausted { attempts: u32, last_error: String },

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
