// Escalation pass, in strict stage order:
// 1. Activate
//      - Every active member at or past the behind threshold, without an
//        existing active bomb, gets a bomb with a full countdown
// 2. Countdown
//      - Every active bomb loses one day, at most once per calendar day;
//        bombs created in stage 1 are latched and skip today
// 3. Deactivate
//      - Every active bomb whose member's latest ledger row shows a
//        non-negative deficit/surplus is deactivated
// 4. Expiry check
//      - Every still-active bomb at zero days, with the member still behind
//        and still active, flags the member for removal. Nothing is mutated;
//        removal is a human decision.

use chrono::NaiveDate;
use log::{error, info, warn};

use crate::bombs::Bomb;
use crate::clubs::Club;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::ledger::LedgerEntry;
use crate::members::Member;

/// A freshly activated bomb with its member, for alerting
#[derive(Clone, Debug)]
pub struct BombAlert {
    pub bomb: Bomb,
    pub member: Member,
}

/// A deactivated bomb with the ledger row that cleared it
#[derive(Clone, Debug)]
pub struct BombRecovery {
    pub bomb: Bomb,
    pub member: Member,
    pub entry: LedgerEntry,
}

#[derive(Clone, Debug, Default)]
pub struct BombOutcome {
    pub newly_activated: Vec<BombAlert>,
    pub deactivated: Vec<BombRecovery>,
    pub flagged_for_removal: Vec<Member>,
}

/// Run the full escalation pass for one club. Each member's bomb logic is
/// independent; a failure on one is logged and the pass continues.
pub fn run(db: &Database, club: &Club, effective_date: NaiveDate) -> Result<BombOutcome, ClubPulseError> {
    let newly_activated = activate_due(db, club, effective_date)?;
    run_countdowns(db, club, effective_date)?;
    let deactivated = deactivate_recovered(db, club, effective_date)?;
    let flagged_for_removal = check_expired(db, club)?;

    info!(
        "Bomb pass for club '{}': {} activated, {} deactivated, {} flagged for removal",
        club.club_name(),
        newly_activated.len(),
        deactivated.len(),
        flagged_for_removal.len()
    );

    Ok(BombOutcome {
        newly_activated,
        deactivated,
        flagged_for_removal,
    })
}

fn activate_due(
    db: &Database,
    club: &Club,
    effective_date: NaiveDate,
) -> Result<Vec<BombAlert>, ClubPulseError> {
    let mut activated = Vec::new();

    for member in Member::get_all_active(db, club.club_id())? {
        let result = (|| -> Result<Option<Bomb>, ClubPulseError> {
            if Bomb::get_active_for_member(db, member.member_id())?.is_some() {
                return Ok(None);
            }

            // The latest ledger row carries the consecutive-behind count as of
            // its date; reconciliation keeps it current
            let Some(latest) = LedgerEntry::get_latest_for_member(db, member.member_id())? else {
                return Ok(None);
            };
            if latest.days_behind() < club.bomb_trigger_days() {
                return Ok(None);
            }

            let bomb = Bomb::create(
                db,
                member.member_id(),
                club.club_id(),
                effective_date,
                club.bomb_countdown_days(),
            )?;
            warn!(
                "Bomb activated for '{}' ({} days behind)",
                member.display_name(),
                latest.days_behind()
            );
            Ok(Some(bomb))
        })();

        match result {
            Ok(Some(bomb)) => activated.push(BombAlert { bomb, member }),
            Ok(None) => {}
            Err(e) => error!(
                "Bomb activation failed for '{}': {}",
                member.display_name(),
                e
            ),
        }
    }

    Ok(activated)
}

fn run_countdowns(db: &Database, club: &Club, effective_date: NaiveDate) -> Result<(), ClubPulseError> {
    for mut bomb in Bomb::get_all_active_for_club(db, club.club_id())? {
        if let Err(e) = bomb.decrement_if_due(db, effective_date) {
            error!(
                "Bomb countdown failed for member {}: {}",
                bomb.member_id(),
                e
            );
        }
    }
    Ok(())
}

fn deactivate_recovered(
    db: &Database,
    club: &Club,
    effective_date: NaiveDate,
) -> Result<Vec<BombRecovery>, ClubPulseError> {
    let mut recovered = Vec::new();

    for mut bomb in Bomb::get_all_active_for_club(db, club.club_id())? {
        let result = (|| -> Result<Option<BombRecovery>, ClubPulseError> {
            let Some(entry) = LedgerEntry::get_latest_for_member(db, bomb.member_id())? else {
                return Ok(None);
            };
            if entry.deficit_surplus() < 0 {
                return Ok(None);
            }

            bomb.deactivate(db, effective_date)?;
            let member = Member::get_by_id(db, bomb.member_id())?.ok_or_else(|| {
                ClubPulseError::Error(format!("Member {} not found", bomb.member_id()))
            })?;
            info!(
                "Bomb deactivated for '{}' (back on track with {:+})",
                member.display_name(),
                entry.deficit_surplus()
            );
            Ok(Some(BombRecovery {
                bomb: bomb.clone(),
                member,
                entry,
            }))
        })();

        match result {
            Ok(Some(recovery)) => recovered.push(recovery),
            Ok(None) => {}
            Err(e) => error!(
                "Bomb deactivation check failed for member {}: {}",
                bomb.member_id(),
                e
            ),
        }
    }

    Ok(recovered)
}

fn check_expired(db: &Database, club: &Club) -> Result<Vec<Member>, ClubPulseError> {
    let mut flagged = Vec::new();

    for bomb in Bomb::get_all_active_for_club(db, club.club_id())? {
        if bomb.days_remaining() > 0 {
            continue;
        }

        let result = (|| -> Result<Option<Member>, ClubPulseError> {
            let Some(entry) = LedgerEntry::get_latest_for_member(db, bomb.member_id())? else {
                return Ok(None);
            };
            if entry.deficit_surplus() >= 0 {
                return Ok(None);
            }

            let Some(member) = Member::get_by_id(db, bomb.member_id())? else {
                return Ok(None);
            };
            // An already-deactivated member is a stale signal, not a removal
            // candidate
            if !member.is_active() {
                return Ok(None);
            }

            warn!(
                "Removal required: '{}' (bomb expired, still {} behind)",
                member.display_name(),
                entry.deficit_surplus()
            );
            Ok(Some(member))
        })();

        match result {
            Ok(Some(member)) => flagged.push(member),
            Ok(None) => {}
            Err(e) => error!(
                "Bomb expiry check failed for member {}: {}",
                bomb.member_id(),
                e
            ),
        }
    }

    Ok(flagged)
}

/// Active bombs joined with member and latest ledger context, soonest to
/// expire first. Report surface.
pub fn active_bombs_overview(
    db: &Database,
    club: &Club,
) -> Result<Vec<(Bomb, Member, Option<LedgerEntry>)>, ClubPulseError> {
    let mut overview = Vec::new();
    for bomb in Bomb::get_all_active_for_club(db, club.club_id())? {
        let Some(member) = Member::get_by_id(db, bomb.member_id())? else {
            continue;
        };
        let entry = LedgerEntry::get_latest_for_member(db, bomb.member_id())?;
        overview.push((bomb, member, entry));
    }
    Ok(overview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clubs::CreateClubParams;
    use crate::database::testing::temp_db;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
    }

    fn setup(db: &Database) -> (Club, Member) {
        // bomb_trigger_days = 3, bomb_countdown_days = 7 (defaults)
        let club = Club::create(
            db,
            CreateClubParams {
                club_name: "Machine Club".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let member = Member::create(db, club.club_id(), "Target", d(1), Some("t-1")).unwrap();
        (club, member)
    }

    fn write_day(db: &Database, club: &Club, member: &Member, day: u32, deficit: i64) {
        let days_behind = LedgerEntry::consecutive_days_behind(db, member.member_id(), d(day), deficit)
            .unwrap();
        LedgerEntry::upsert(
            db,
            member.member_id(),
            club.club_id(),
            d(day),
            1_000_000,
            1_000_000 - deficit,
            deficit,
            days_behind,
        )
        .unwrap();
    }

    #[test]
    fn test_bomb_lifecycle_with_recovery() {
        let (_dir, db) = temp_db();
        let (club, member) = setup(&db);

        // Days 1-2 behind: below the trigger, no bomb
        write_day(&db, &club, &member, 1, -100);
        run(&db, &club, d(1)).unwrap();
        write_day(&db, &club, &member, 2, -100);
        let outcome = run(&db, &club, d(2)).unwrap();
        assert!(outcome.newly_activated.is_empty());

        // Day 3: third consecutive behind day activates a bomb at full count
        write_day(&db, &club, &member, 3, -100);
        let outcome = run(&db, &club, d(3)).unwrap();
        assert_eq!(outcome.newly_activated.len(), 1);
        let bomb = Bomb::get_active_for_member(&db, member.member_id())
            .unwrap()
            .unwrap();
        assert_eq!(bomb.days_remaining(), 7);

        // Day 4 still behind: countdown ticks once
        write_day(&db, &club, &member, 4, -100);
        run(&db, &club, d(4)).unwrap();
        let bomb = Bomb::get_active_for_member(&db, member.member_id())
            .unwrap()
            .unwrap();
        assert_eq!(bomb.days_remaining(), 6);

        // Day 5 recovered: bomb deactivated with the recovery date
        write_day(&db, &club, &member, 5, 200);
        let outcome = run(&db, &club, d(5)).unwrap();
        assert_eq!(outcome.deactivated.len(), 1);
        assert!(outcome.flagged_for_removal.is_empty());
        assert!(Bomb::get_active_for_member(&db, member.member_id())
            .unwrap()
            .is_none());

        let recovery = &outcome.deactivated[0];
        assert_eq!(recovery.bomb.deactivation_date(), Some(d(5)));
        assert_eq!(recovery.entry.deficit_surplus(), 200);
    }

    #[test]
    fn test_bomb_expiry_flags_member_for_removal() {
        let (_dir, db) = temp_db();
        let (club, member) = setup(&db);

        // Behind every day from day 1; bomb activates on day 3
        for day in 1..=3 {
            write_day(&db, &club, &member, day, -100);
            run(&db, &club, d(day)).unwrap();
        }

        // Days 4-9: countdown 7 -> 1, never recovering
        for day in 4..=9 {
            write_day(&db, &club, &member, day, -100);
            let outcome = run(&db, &club, d(day)).unwrap();
            assert!(outcome.flagged_for_removal.is_empty());
        }

        // Day 10: countdown reaches 0 and the member is still behind
        write_day(&db, &club, &member, 10, -100);
        let outcome = run(&db, &club, d(10)).unwrap();
        assert_eq!(outcome.flagged_for_removal.len(), 1);
        assert_eq!(outcome.flagged_for_removal[0].member_id(), member.member_id());

        // The bomb is not auto-resolved: still active at zero
        let bomb = Bomb::get_active_for_member(&db, member.member_id())
            .unwrap()
            .unwrap();
        assert!(bomb.is_active());
        assert_eq!(bomb.days_remaining(), 0);
    }

    #[test]
    fn test_rerun_same_day_does_not_double_count() {
        let (_dir, db) = temp_db();
        let (club, member) = setup(&db);

        for day in 1..=3 {
            write_day(&db, &club, &member, day, -100);
            run(&db, &club, d(day)).unwrap();
        }
        write_day(&db, &club, &member, 4, -100);
        run(&db, &club, d(4)).unwrap();

        // Re-running day 4 repeatedly: no second bomb, no extra decrement
        for _ in 0..3 {
            let outcome = run(&db, &club, d(4)).unwrap();
            assert!(outcome.newly_activated.is_empty());
        }

        let bombs = Bomb::get_all_active_for_club(&db, club.club_id()).unwrap();
        assert_eq!(bombs.len(), 1);
        assert_eq!(bombs[0].days_remaining(), 6);
    }

    #[test]
    fn test_expired_bomb_of_deactivated_member_not_flagged() {
        let (_dir, db) = temp_db();
        let (club, mut member) = setup(&db);

        for day in 1..=3 {
            write_day(&db, &club, &member, day, -100);
            run(&db, &club, d(day)).unwrap();
        }
        for day in 4..=10 {
            write_day(&db, &club, &member, day, -100);
            run(&db, &club, d(day)).unwrap();
        }

        // Member left the club before anyone acted on the expiry
        member.deactivate(&db, false).unwrap();
        let outcome = run(&db, &club, d(11)).unwrap();
        assert!(outcome.flagged_for_removal.is_empty());
    }

    #[test]
    fn test_overview_sorted_by_days_remaining() {
        let (_dir, db) = temp_db();
        let (club, member) = setup(&db);
        let other = Member::create(&db, club.club_id(), "Other", d(1), Some("t-2")).unwrap();

        Bomb::create(&db, member.member_id(), club.club_id(), d(2), 7).unwrap();
        Bomb::create(&db, other.member_id(), club.club_id(), d(3), 2).unwrap();

        let overview = active_bombs_overview(&db, &club).unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].1.member_id(), other.member_id());
        assert_eq!(overview[0].0.days_remaining(), 2);
    }
}
