use std::time::Duration;

use log::{info, warn, Level};
use logging_timer::timer;

use crate::bomb_machine;
use crate::clubs::Club;
use crate::config::Config;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::locks::ScrapeLock;
use crate::reconcile;
use crate::reports::PassSummary;
use crate::sources::{self, FanSource, PeriodSnapshot};

/// How a triggered pass ended. Busy is an expected outcome, not an error:
/// another trigger won the lock and is doing the same work.
pub enum PassOutcome {
    Completed(Box<PassSummary>),
    Busy,
}

/// Bounded retry with exponential backoff, applied at the pipeline boundary
/// around the external fetch
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            max_attempts: config.retry.max_attempts,
            base_delay: Duration::from_secs(config.retry.base_delay_secs),
            multiplier: config.retry.multiplier,
        }
    }
}

/// Run one full pass for one club: fetch (with retries), reconcile, bomb
/// escalation, all under the club's scrape lock. `trigger` tags the lock
/// holder ("scheduler" or "manual") for diagnostics.
pub fn run_pass(
    db: &Database,
    config: &Config,
    club: &Club,
    trigger: &str,
) -> Result<PassOutcome, ClubPulseError> {
    let source = sources::source_for_club(config, club)?;
    let policy = RetryPolicy::from_config(config);
    run_pass_with_source(db, club, source.as_ref(), policy, trigger)
}

pub fn run_pass_with_source(
    db: &Database,
    club: &Club,
    source: &dyn FanSource,
    policy: RetryPolicy,
    trigger: &str,
) -> Result<PassOutcome, ClubPulseError> {
    let _tmr = timer!(Level::Debug; "run_pass", "{}", club.club_name());

    let outcome = ScrapeLock::with_lock(db, club.club_id(), trigger, || {
        // Fetch first: if the source is down, the pass aborts before any write
        let snapshot = fetch_with_retry(source, policy, club)?;

        // The date results are recorded under comes from the producer when it
        // fell back to a previous period, else the club-local calendar date
        let effective_date = snapshot.effective_date.unwrap_or_else(|| {
            chrono::Utc::now().with_timezone(&club.tz()).date_naive()
        });

        info!(
            "Running pass for club '{}' (day index {}, effective {})",
            club.club_name(),
            snapshot.current_day_index,
            effective_date
        );

        let stats = reconcile::reconcile(db, club, &snapshot, effective_date)?;
        let bombs = bomb_machine::run(db, club, effective_date)?;

        Ok(PassSummary::new(club.clone(), effective_date, stats, bombs))
    })?;

    Ok(match outcome {
        Some(summary) => PassOutcome::Completed(Box::new(summary)),
        None => PassOutcome::Busy,
    })
}

fn fetch_with_retry(
    source: &dyn FanSource,
    policy: RetryPolicy,
    club: &Club,
) -> Result<PeriodSnapshot, ClubPulseError> {
    let mut delay = policy.base_delay;
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        match source.fetch() {
            Ok(snapshot) => {
                info!(
                    "Fetch succeeded for club '{}' on attempt {}/{} ({} member(s))",
                    club.club_name(),
                    attempt,
                    policy.max_attempts,
                    snapshot.members.len()
                );
                return Ok(snapshot);
            }
            Err(e) => {
                warn!(
                    "Fetch failed for club '{}' (attempt {}/{}): {}",
                    club.club_name(),
                    attempt,
                    policy.max_attempts,
                    e
                );
                last_error = e.to_string();
                if attempt < policy.max_attempts {
                    std::thread::sleep(delay);
                    delay *= policy.multiplier;
                }
            }
        }
    }

    Err(ClubPulseError::SourceExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
