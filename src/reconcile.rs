use chrono::{Datelike, NaiveDate};
use log::{debug, error, info, warn};

use crate::clubs::Club;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::ledger::LedgerEntry;
use crate::members::Member;
use crate::quotas::QuotaScheduleEntry;
use crate::sources::{MemberSnapshot, PeriodSnapshot};
use crate::utils::Utils;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub new_members: u32,
    pub updated_members: u32,
    pub auto_deactivated: u32,
    pub reset_detected: bool,
}

/// One reconciliation pass for one club on one effective date.
///
/// `effective_date` is supplied by the caller (normally the snapshot's own
/// data date, else the club-local calendar date) and is never re-derived
/// here. Safe to re-run: every ledger write is an upsert keyed on
/// (member, date) and consecutive-behind counting excludes the same-day row.
pub fn reconcile(
    db: &Database,
    club: &Club,
    snapshot: &PeriodSnapshot,
    effective_date: NaiveDate,
) -> Result<ReconcileStats, ClubPulseError> {
    let mut stats = ReconcileStats::default();

    // 1. A sudden large drop in a member's cumulative value means the external
    //    counter itself rolled over to a new period
    if detect_period_reset(db, club, snapshot)? {
        apply_period_reset(db, club)?;
        stats.reset_detected = true;
    }

    // 2. Active members missing from the snapshot have left the club
    stats.auto_deactivated = deactivate_absent(db, club, snapshot)?;

    // 3. Per-member upsert; one bad record must not block the rest
    for (key, snap) in &snapshot.members {
        match upsert_member(db, club, snap, snapshot.current_day_index, effective_date) {
            Ok(MemberOutcome::Created) => stats.new_members += 1,
            Ok(MemberOutcome::Updated) => stats.updated_members += 1,
            Ok(MemberOutcome::Skipped) => {}
            Err(e) => {
                error!(
                    "Failed to process member '{}' ({}) for club '{}': {}",
                    snap.display_name,
                    key,
                    club.club_name(),
                    e
                );
            }
        }
    }

    info!(
        "Processed {} members for club '{}' ({} new, {} auto-deactivated{})",
        stats.new_members + stats.updated_members,
        club.club_name(),
        stats.new_members,
        stats.auto_deactivated,
        if stats.reset_detected {
            ", period reset"
        } else {
            ""
        }
    );

    Ok(stats)
}

/// Reset iff any tracked member's new value is positive but below half the
/// stored previous value. Counters only move up within a period, so a big drop
/// means the period rolled over. A genuine external correction can
/// false-positive here; there is no signal to tell the cases apart.
fn detect_period_reset(
    db: &Database,
    club: &Club,
    snapshot: &PeriodSnapshot,
) -> Result<bool, ClubPulseError> {
    for member in Member::get_all_active(db, club.club_id())? {
        let Some(snap) = snapshot.members.get(member.snapshot_key()) else {
            continue;
        };
        let Some(&new_value) = snap.daily_values.last() else {
            continue;
        };
        let Some(previous) = LedgerEntry::get_latest_for_member(db, member.member_id())? else {
            continue;
        };

        let prev_value = previous.cumulative_fans();
        if prev_value > 0 && new_value > 0 && 2 * new_value < prev_value {
            warn!(
                "Period reset detected for club '{}': '{}' went from {} to {}",
                club.club_name(),
                member.display_name(),
                prev_value,
                new_value
            );
            return Ok(true);
        }
    }
    Ok(false)
}

/// Purge all period-scoped state: ledger rows, bombs, and quota schedule
/// entries. Auto-deactivated members come back; manual deactivations survive.
fn apply_period_reset(db: &Database, club: &Club) -> Result<(), ClubPulseError> {
    let conn = db.conn()?;
    Database::immediate_transaction(&conn, |c| {
        LedgerEntry::clear_for_club_immediate(c, club.club_id())?;
        crate::bombs::Bomb::clear_for_club_immediate(c, club.club_id())?;
        QuotaScheduleEntry::clear_for_club_immediate(c, club.club_id())?;
        let reactivated = Member::clear_auto_deactivations_immediate(c, club.club_id())?;
        info!(
            "Period reset applied for club '{}' ({} members reactivated)",
            club.club_name(),
            reactivated
        );
        Ok(())
    })
}

fn deactivate_absent(
    db: &Database,
    club: &Club,
    snapshot: &PeriodSnapshot,
) -> Result<u32, ClubPulseError> {
    let mut deactivated = 0;
    for mut member in Member::get_all_active(db, club.club_id())? {
        if snapshot.members.contains_key(member.snapshot_key()) {
            continue;
        }
        match member.deactivate(db, false) {
            Ok(()) => deactivated += 1,
            Err(e) => error!(
                "Failed to auto-deactivate member '{}': {}",
                member.display_name(),
                e
            ),
        }
    }
    Ok(deactivated)
}

enum MemberOutcome {
    Created,
    Updated,
    Skipped,
}

fn upsert_member(
    db: &Database,
    club: &Club,
    snap: &MemberSnapshot,
    current_day_index: u32,
    effective_date: NaiveDate,
) -> Result<MemberOutcome, ClubPulseError> {
    let Some(cumulative) = resolve_cumulative(snap, current_day_index) else {
        warn!("No fan data for '{}' - skipping", snap.display_name);
        return Ok(MemberOutcome::Skipped);
    };

    let existing = match snap.external_id.as_deref() {
        Some(ext) => Member::get_by_external_id(db, club.club_id(), ext)?,
        None => Member::get_by_name(db, club.club_id(), &snap.display_name)?,
    };

    let (mut member, outcome) = match existing {
        None => {
            let join_date = infer_join_date(effective_date, snap.join_day_index);
            let member = Member::create(
                db,
                club.club_id(),
                &snap.display_name,
                join_date,
                snap.external_id.as_deref(),
            )?;
            (member, MemberOutcome::Created)
        }
        Some(member) if member.manually_deactivated() => {
            // Manual intent is absolute: no reactivation, no writes at all
            debug!(
                "Skipping manually deactivated member '{}'",
                member.display_name()
            );
            return Ok(MemberOutcome::Skipped);
        }
        Some(mut member) => {
            if member.display_name() != snap.display_name {
                member.update_display_name(db, &snap.display_name)?;
            }
            if !member.is_active() {
                // Returned to the club after an automatic deactivation
                member.activate(db)?;
            }
            (member, MemberOutcome::Updated)
        }
    };

    member.update_last_seen(db, effective_date)?;

    // Expected progress runs from the join date when it falls inside this
    // period, otherwise from the period's first day
    let effective_start = if Utils::same_period(member.join_date(), effective_date) {
        member.join_date()
    } else {
        Utils::period_start(effective_date)
    };

    let expected = QuotaScheduleEntry::expected_fans(db, club, effective_start, effective_date)?;
    let deficit_surplus = cumulative - expected;
    let days_behind =
        LedgerEntry::consecutive_days_behind(db, member.member_id(), effective_date, deficit_surplus)?;

    LedgerEntry::upsert(
        db,
        member.member_id(),
        club.club_id(),
        effective_date,
        cumulative,
        expected,
        deficit_surplus,
        days_behind,
    )?;

    debug!(
        "{}: {} fans (expected {}, {:+}), {} day(s) behind",
        member.display_name(),
        cumulative,
        expected,
        deficit_surplus,
        days_behind
    );

    Ok(outcome)
}

/// Today's cumulative value: the entry at `current_day_index`, clamped to the
/// last available day when the index runs past the series
fn resolve_cumulative(snap: &MemberSnapshot, current_day_index: u32) -> Option<i64> {
    if snap.daily_values.is_empty() {
        return None;
    }
    let wanted = (current_day_index as usize).saturating_sub(1);
    let idx = if wanted >= snap.daily_values.len() {
        warn!(
            "Day index {} out of range for '{}' ({} day(s) of data) - using last entry",
            current_day_index,
            snap.display_name,
            snap.daily_values.len()
        );
        snap.daily_values.len() - 1
    } else {
        wanted
    };
    // Negative values are never expected; treat as zero rather than fail
    Some(snap.daily_values[idx].max(0))
}

/// Translate the inferred 1-based join day into a calendar date. A join day
/// later than the effective date's day-of-month belongs to the previous
/// period (the producer fell back to reporting the prior period).
fn infer_join_date(effective_date: NaiveDate, join_day_index: u32) -> NaiveDate {
    if join_day_index > effective_date.day() {
        Utils::day_index_to_date(Utils::previous_period_end(effective_date), join_day_index)
    } else {
        Utils::day_index_to_date(effective_date, join_day_index)
    }
}
