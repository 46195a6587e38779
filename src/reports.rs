use std::fmt::Write as _;

use chrono::NaiveDate;
use log::info;

use crate::bomb_machine::{self, BombAlert, BombOutcome, BombRecovery};
use crate::clubs::Club;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::ledger::LedgerEntry;
use crate::members::Member;
use crate::quotas::QuotaScheduleEntry;
use crate::reconcile::ReconcileStats;

/// Everything one completed pass hands to the reporting boundary
#[derive(Clone, Debug)]
pub struct PassSummary {
    pub club: Club,
    pub effective_date: NaiveDate,
    pub new_member_count: u32,
    pub updated_member_count: u32,
    pub reset_detected: bool,
    pub newly_activated_bombs: Vec<BombAlert>,
    pub deactivated_bombs: Vec<BombRecovery>,
    pub members_flagged_for_removal: Vec<Member>,
}

impl PassSummary {
    pub fn new(
        club: Club,
        effective_date: NaiveDate,
        stats: ReconcileStats,
        bombs: BombOutcome,
    ) -> Self {
        PassSummary {
            club,
            effective_date,
            new_member_count: stats.new_members,
            updated_member_count: stats.updated_members,
            reset_detected: stats.reset_detected,
            newly_activated_bombs: bombs.newly_activated,
            deactivated_bombs: bombs.deactivated,
            members_flagged_for_removal: bombs.flagged_for_removal,
        }
    }
}

/// Delivery boundary for pass summaries. Rendering and transport live on the
/// other side; this crate only guarantees the hand-off shape.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, summary: &PassSummary);

    /// A pass that could not complete (fetch exhausted or processing failure)
    fn deliver_failure(&self, club_name: &str, effective_date: NaiveDate, reason: &str);
}

/// Default sink: writes the summary to the log
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn deliver(&self, summary: &PassSummary) {
        info!(
            "[{}] {} pass complete: {} updated, {} new, {} bombs activated, {} deactivated, {} flagged for removal{}",
            summary.club.club_name(),
            summary.effective_date,
            summary.updated_member_count,
            summary.new_member_count,
            summary.newly_activated_bombs.len(),
            summary.deactivated_bombs.len(),
            summary.members_flagged_for_removal.len(),
            if summary.reset_detected {
                " (period reset)"
            } else {
                ""
            }
        );
    }

    fn deliver_failure(&self, club_name: &str, effective_date: NaiveDate, reason: &str) {
        log::error!("[{}] {} pass failed: {}", club_name, effective_date, reason);
    }
}

pub struct MemberStatus {
    pub member: Member,
    pub entry: LedgerEntry,
}

pub struct StatusSummary {
    pub on_track: Vec<MemberStatus>,
    pub behind: Vec<MemberStatus>,
    pub total_members: usize,
}

/// Split active members by their latest ledger row: on-track sorted by surplus
/// descending, behind sorted most-behind-first. Members with no history yet
/// are counted but not listed.
pub fn member_status_summary(db: &Database, club: &Club) -> Result<StatusSummary, ClubPulseError> {
    let members = Member::get_all_active(db, club.club_id())?;
    let total_members = members.len();

    let mut on_track = Vec::new();
    let mut behind = Vec::new();

    for member in members {
        let Some(entry) = LedgerEntry::get_latest_for_member(db, member.member_id())? else {
            continue;
        };
        let status = MemberStatus { member, entry };
        if status.entry.deficit_surplus() >= 0 {
            on_track.push(status);
        } else {
            behind.push(status);
        }
    }

    on_track.sort_by_key(|s| std::cmp::Reverse(s.entry.deficit_surplus()));
    behind.sort_by_key(|s| s.entry.deficit_surplus());

    Ok(StatusSummary {
        on_track,
        behind,
        total_members,
    })
}

/// Compact fan count for terminal output: 2.5M, 750.0K, 321
pub fn format_fans(fans: i64) -> String {
    let magnitude = fans.abs();
    if magnitude >= 1_000_000 {
        format!("{:.1}M", fans as f64 / 1_000_000.0)
    } else if magnitude >= 1_000 {
        format!("{:.1}K", fans as f64 / 1_000.0)
    } else {
        fans.to_string()
    }
}

/// Render the club's standing as plain text for the status command
pub fn render_status(db: &Database, club: &Club, date: NaiveDate) -> Result<String, ClubPulseError> {
    let summary = member_status_summary(db, club)?;
    let quota = QuotaScheduleEntry::quota_for_date(db, club, date)?;
    let bombs = bomb_machine::active_bombs_overview(db, club)?;

    let mut out = String::new();
    let _ = writeln!(out, "{} - {}", club.club_name(), date);
    let _ = writeln!(
        out,
        "Daily quota: {} fans/day, {} active member(s)",
        format_fans(quota),
        summary.total_members
    );

    if !summary.on_track.is_empty() {
        let _ = writeln!(out, "\nOn track ({}):", summary.on_track.len());
        for s in &summary.on_track {
            let _ = writeln!(
                out,
                "  {:<24} {:>10} ({:+})",
                s.member.display_name(),
                format_fans(s.entry.cumulative_fans()),
                s.entry.deficit_surplus()
            );
        }
    }

    if !summary.behind.is_empty() {
        let _ = writeln!(out, "\nBehind ({}):", summary.behind.len());
        for s in &summary.behind {
            let _ = writeln!(
                out,
                "  {:<24} {:>10} ({:+}, {} day(s) behind)",
                s.member.display_name(),
                format_fans(s.entry.cumulative_fans()),
                s.entry.deficit_surplus(),
                s.entry.days_behind()
            );
        }
    }

    if !bombs.is_empty() {
        let _ = writeln!(out, "\nActive bombs ({}):", bombs.len());
        for (bomb, member, _) in &bombs {
            let _ = writeln!(
                out,
                "  {:<24} {} day(s) remaining (since {})",
                member.display_name(),
                bomb.days_remaining(),
                bomb.activation_date()
            );
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clubs::CreateClubParams;
    use crate::database::testing::temp_db;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
    }

    #[test]
    fn test_format_fans() {
        assert_eq!(format_fans(2_500_000), "2.5M");
        assert_eq!(format_fans(750_000), "750.0K");
        assert_eq!(format_fans(321), "321");
        assert_eq!(format_fans(-1_500_000), "-1.5M");
    }

    #[test]
    fn test_status_summary_sorting() {
        let (_dir, db) = temp_db();
        let club = Club::create(
            &db,
            CreateClubParams {
                club_name: "Status Club".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let specs: [(&str, i64); 4] = [("Ahead", 500), ("WayAhead", 2_000), ("Behind", -300), ("WayBehind", -900)];
        for (name, ds) in specs {
            let member = Member::create(&db, club.club_id(), name, d(1), None).unwrap();
            LedgerEntry::upsert(
                &db,
                member.member_id(),
                club.club_id(),
                d(2),
                1_000 + ds,
                1_000,
                ds,
                if ds < 0 { 1 } else { 0 },
            )
            .unwrap();
        }
        // A member with no history yet counts toward the total only
        Member::create(&db, club.club_id(), "Fresh", d(2), None).unwrap();

        let summary = member_status_summary(&db, &club).unwrap();
        assert_eq!(summary.total_members, 5);
        assert_eq!(summary.on_track.len(), 2);
        assert_eq!(summary.behind.len(), 2);
        assert_eq!(summary.on_track[0].member.display_name(), "WayAhead");
        assert_eq!(summary.behind[0].member.display_name(), "WayBehind");
    }

    #[test]
    fn test_render_status_mentions_members() {
        let (_dir, db) = temp_db();
        let club = Club::create(
            &db,
            CreateClubParams {
                club_name: "Render Club".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let member = Member::create(&db, club.club_id(), "Haru", d(1), None).unwrap();
        LedgerEntry::upsert(&db, member.member_id(), club.club_id(), d(2), 2_000_000, 2_000_000, 0, 0)
            .unwrap();

        let text = render_status(&db, &club, d(2)).unwrap();
        assert!(text.contains("Render Club"));
        assert!(text.contains("Haru"));
        assert!(text.contains("On track (1)"));
    }
}
