use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use log::{debug, error, info};
use threadpool::ThreadPool;

use crate::clubs::Club;
use crate::config::Config;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::ledger::LedgerEntry;
use crate::pipeline::{self, PassOutcome};
use crate::reports::ReportSink;

/// Periodic tick loop. Each due club's pass runs on the worker pool, so
/// independent clubs proceed in parallel; the per-club scrape lock keeps
/// competing triggers for the same club from double-processing a day.
pub fn run_forever(
    db: Arc<Database>,
    config: Arc<Config>,
    sink: Arc<dyn ReportSink>,
) -> Result<(), ClubPulseError> {
    let pool = ThreadPool::new(config.scheduler.workers);
    info!(
        "Scheduler started (tick every {}s, {} worker(s))",
        config.scheduler.tick_secs, config.scheduler.workers
    );

    loop {
        if let Err(e) = tick(&db, &config, &pool, &sink) {
            error!("Scheduler tick failed: {}", e);
        }
        std::thread::sleep(Duration::from_secs(config.scheduler.tick_secs));
    }
}

fn tick(
    db: &Arc<Database>,
    config: &Arc<Config>,
    pool: &ThreadPool,
    sink: &Arc<dyn ReportSink>,
) -> Result<(), ClubPulseError> {
    let clubs = Club::get_all_active(db)?;
    debug!("Scheduler tick: {} active club(s)", clubs.len());

    for club in clubs {
        let now_local = Utc::now().with_timezone(&club.tz());
        match should_run(db, &club, now_local) {
            Ok(true) => {
                info!(
                    "Time to check club '{}' ({} {})",
                    club.club_name(),
                    now_local.format("%H:%M"),
                    club.tz()
                );
                dispatch(db, config, pool, sink, club);
            }
            Ok(false) => {}
            Err(e) => error!("Scheduler check failed for '{}': {}", club.club_name(), e),
        }
    }

    Ok(())
}

/// Due when the club's local clock is inside the scheduled hour at or past the
/// scheduled minute, and today's pass hasn't written ledger rows yet. The
/// ledger is the durable already-ran record: restarts cannot cause a skipped
/// day or a duplicate run (upserts make re-runs harmless anyway).
fn should_run(db: &Database, club: &Club, now_local: DateTime<Tz>) -> Result<bool, ClubPulseError> {
    let (target_hour, target_minute) = club.scrape_time();
    if now_local.hour() != target_hour || now_local.minute() < target_minute {
        return Ok(false);
    }

    let today = now_local.date_naive();
    if LedgerEntry::club_has_entries_for_date(db, club.club_id(), today)? {
        debug!("Club '{}' already ran today ({})", club.club_name(), today);
        return Ok(false);
    }

    Ok(true)
}

fn dispatch(
    db: &Arc<Database>,
    config: &Arc<Config>,
    pool: &ThreadPool,
    sink: &Arc<dyn ReportSink>,
    club: Club,
) {
    let db = Arc::clone(db);
    let config = Arc::clone(config);
    let sink = Arc::clone(sink);

    pool.execute(move || {
        let effective_date = Utc::now().with_timezone(&club.tz()).date_naive();
        match pipeline::run_pass(&db, &config, &club, "scheduler") {
            Ok(PassOutcome::Completed(summary)) => sink.deliver(&summary),
            Ok(PassOutcome::Busy) => {
                info!(
                    "Club '{}' is already being processed - skipping this trigger",
                    club.club_name()
                );
            }
            Err(e) => sink.deliver_failure(club.club_name(), effective_date, &e.to_string()),
        }
    });
}
