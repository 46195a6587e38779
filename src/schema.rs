pub const SCHEMA_VERSION: &str = "3";

pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '3');

-- Clubs table stores per-club configuration
CREATE TABLE IF NOT EXISTS clubs (
    club_id INTEGER PRIMARY KEY AUTOINCREMENT,
    club_name TEXT NOT NULL UNIQUE,
    daily_quota INTEGER NOT NULL,           -- Default fans/day when no schedule entry applies
    timezone TEXT NOT NULL,                 -- IANA timezone name for the scrape schedule
    scrape_time TEXT NOT NULL,              -- 'HH:MM' local time of the daily check
    bomb_trigger_days INTEGER NOT NULL,     -- Consecutive behind days before a bomb activates
    bomb_countdown_days INTEGER NOT NULL,   -- Days a bomb runs before expiry
    source_ref TEXT DEFAULT NULL,           -- Backend-specific locator (circle id or fixture path)
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,            -- Unix timestamp (UTC)
    updated_at INTEGER NOT NULL
);

-- Quota schedule: append-only effective-dated overrides of the club default.
-- Entries are never edited; newer entries shadow older ones at lookup time.
CREATE TABLE IF NOT EXISTS quota_schedule (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    club_id INTEGER NOT NULL,
    effective_date TEXT NOT NULL,           -- ISO date; applies from this day onward
    daily_quota INTEGER NOT NULL,
    set_by TEXT DEFAULT NULL,               -- Audit: who appended the entry
    created_at INTEGER NOT NULL,
    FOREIGN KEY (club_id) REFERENCES clubs(club_id)
);

CREATE INDEX IF NOT EXISTS idx_quota_schedule_lookup ON quota_schedule (club_id, effective_date);

-- Members table: club roster with identity resolution
CREATE TABLE IF NOT EXISTS members (
    member_id INTEGER PRIMARY KEY AUTOINCREMENT,
    club_id INTEGER NOT NULL,
    external_id TEXT DEFAULT NULL,          -- Stable upstream id; preferred lookup key
    display_name TEXT NOT NULL,             -- Not unique; members can rename
    join_date TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    manually_deactivated BOOLEAN NOT NULL DEFAULT 0,
    last_seen TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (club_id) REFERENCES clubs(club_id),
    UNIQUE (club_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_members_club_name ON members (club_id, display_name);

-- Progress ledger: one row per member per day, overwritten on re-runs
CREATE TABLE IF NOT EXISTS ledger (
    ledger_id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id INTEGER NOT NULL,
    club_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    cumulative_fans INTEGER NOT NULL,       -- This period's cumulative value, not lifetime
    expected_fans INTEGER NOT NULL,
    deficit_surplus INTEGER NOT NULL,       -- cumulative - expected; negative = behind
    days_behind INTEGER NOT NULL DEFAULT 0, -- Consecutive days behind, including this one
    FOREIGN KEY (member_id) REFERENCES members(member_id),
    FOREIGN KEY (club_id) REFERENCES clubs(club_id),
    UNIQUE (member_id, date)
);

CREATE INDEX IF NOT EXISTS idx_ledger_member_date ON ledger (member_id, date);
CREATE INDEX IF NOT EXISTS idx_ledger_club_date ON ledger (club_id, date);

-- Bombs table: escalating warnings with a per-day countdown latch
CREATE TABLE IF NOT EXISTS bombs (
    bomb_id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id INTEGER NOT NULL,
    club_id INTEGER NOT NULL,
    activation_date TEXT NOT NULL,
    days_remaining INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    deactivation_date TEXT DEFAULT NULL,
    last_countdown_date TEXT NOT NULL,      -- Latch: at most one decrement per calendar day
    FOREIGN KEY (member_id) REFERENCES members(member_id),
    FOREIGN KEY (club_id) REFERENCES clubs(club_id)
);

CREATE INDEX IF NOT EXISTS idx_bombs_member_active ON bombs (member_id, is_active);
CREATE INDEX IF NOT EXISTS idx_bombs_club_active ON bombs (club_id, is_active);

-- Scrape locks: one advisory row per club, purged when stale
CREATE TABLE IF NOT EXISTS scrape_locks (
    club_id INTEGER PRIMARY KEY,
    locked_at INTEGER NOT NULL,             -- Unix timestamp (UTC)
    locked_by TEXT NOT NULL
);

COMMIT;
"#;
