use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::clubs::{Club, CreateClubParams, UpdateClubParams};
use crate::config::Config;
use crate::database::Database;
use crate::error::ClubPulseError;
use crate::locks::ScrapeLock;
use crate::members::Member;
use crate::pipeline::{self, PassOutcome};
use crate::quotas::QuotaScheduleEntry;
use crate::reports::{self, format_fans, LogReportSink, ReportSink};
use crate::scheduler;
use crate::utils::Utils;

#[derive(Parser)]
#[command(
    name = "clubpulse",
    version,
    about = "clubpulse: club fan quota tracking and escalation service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler loop (default if no command specified)
    Serve,

    /// Run one reconciliation pass for a club right now
    Check {
        /// Club name
        #[arg(long)]
        club: String,
    },

    /// Show a club's current standings
    Status {
        /// Club name
        #[arg(long)]
        club: String,
    },

    /// Manage clubs
    Club {
        #[command(subcommand)]
        command: ClubCommand,
    },

    /// Manage a club's quota schedule
    Quota {
        #[command(subcommand)]
        command: QuotaCommand,
    },

    /// Manage club members
    Member {
        #[command(subcommand)]
        command: MemberCommand,
    },

    /// Manage scrape locks
    Locks {
        #[command(subcommand)]
        command: LockCommand,
    },
}

#[derive(Subcommand)]
pub enum ClubCommand {
    /// Register a new club
    Add {
        #[arg(long)]
        name: String,

        /// Default daily quota (fans/day)
        #[arg(long, default_value_t = 1_000_000)]
        quota: i64,

        /// IANA timezone for the daily check
        #[arg(long, default_value = "Europe/Amsterdam")]
        timezone: String,

        /// Local time of the daily check (HH:MM)
        #[arg(long, default_value = "16:00")]
        scrape_time: String,

        /// Consecutive behind days before a bomb activates
        #[arg(long, default_value_t = 3)]
        trigger_days: i64,

        /// Days a bomb runs before expiry
        #[arg(long, default_value_t = 7)]
        countdown_days: i64,

        /// Source locator (circle id for the API backend, file name for fixtures)
        #[arg(long)]
        source_ref: Option<String>,
    },

    /// List all clubs
    List,

    /// Update a club's settings
    Set {
        #[arg(long)]
        name: String,

        #[arg(long)]
        quota: Option<i64>,

        #[arg(long)]
        timezone: Option<String>,

        #[arg(long)]
        scrape_time: Option<String>,

        #[arg(long)]
        trigger_days: Option<i64>,

        #[arg(long)]
        countdown_days: Option<i64>,

        #[arg(long)]
        source_ref: Option<String>,
    },

    /// Deactivate a club (history is preserved)
    Deactivate {
        #[arg(long)]
        name: String,
    },

    /// Reactivate a club
    Activate {
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum QuotaCommand {
    /// Append a quota schedule entry
    Set {
        #[arg(long)]
        club: String,

        /// Fans/day
        #[arg(long)]
        amount: i64,

        /// Effective date (YYYY-MM-DD, default today)
        #[arg(long)]
        effective_date: Option<String>,

        /// Audit tag for who set it
        #[arg(long)]
        set_by: Option<String>,
    },

    /// List this period's quota schedule entries
    List {
        #[arg(long)]
        club: String,
    },
}

#[derive(Subcommand)]
pub enum MemberCommand {
    /// Add a member by hand
    Add {
        #[arg(long)]
        club: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        external_id: Option<String>,

        /// Join date (YYYY-MM-DD, default today)
        #[arg(long)]
        join_date: Option<String>,
    },

    /// Manually deactivate a member; they will not be auto-reactivated
    Deactivate {
        #[arg(long)]
        club: String,

        #[arg(long)]
        name: String,
    },

    /// Reactivate a member and clear the manual-deactivation flag
    Activate {
        #[arg(long)]
        club: String,

        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum LockCommand {
    /// Force-release every scrape lock (use with caution)
    Clear,
}

impl Cli {
    pub fn handle_command_line(config: Config, db: Database) -> Result<(), ClubPulseError> {
        let args = Cli::parse();

        // Default to Serve if no command specified
        match args.command.unwrap_or(Command::Serve) {
            Command::Serve => {
                let sink: Arc<dyn ReportSink> = Arc::new(LogReportSink);
                scheduler::run_forever(Arc::new(db), Arc::new(config), sink)
            }
            Command::Check { club } => Self::manual_check(&config, &db, &club),
            Command::Status { club } => {
                let club = require_club(&db, &club)?;
                let today = chrono::Utc::now().with_timezone(&club.tz()).date_naive();
                print!("{}", reports::render_status(&db, &club, today)?);
                Ok(())
            }
            Command::Club { command } => Self::handle_club(&db, command),
            Command::Quota { command } => Self::handle_quota(&db, command),
            Command::Member { command } => Self::handle_member(&db, command),
            Command::Locks { command } => match command {
                LockCommand::Clear => {
                    let released = ScrapeLock::force_release_all(&db)?;
                    println!("Released {} lock(s)", released);
                    Ok(())
                }
            },
        }
    }

    /// Manual trigger. Goes through the same guard as the scheduled path and
    /// reports a distinct outcome for busy, fetch failure, and processing
    /// failure so the operator knows whether to retry, wait, or investigate.
    fn manual_check(config: &Config, db: &Database, club_name: &str) -> Result<(), ClubPulseError> {
        let club = require_club(db, club_name)?;

        match pipeline::run_pass(db, config, &club, "manual") {
            Ok(PassOutcome::Completed(summary)) => {
                println!(
                    "Pass complete for '{}' ({}): {} updated, {} new{}",
                    summary.club.club_name(),
                    summary.effective_date,
                    summary.updated_member_count,
                    summary.new_member_count,
                    if summary.reset_detected {
                        " - period reset detected"
                    } else {
                        ""
                    }
                );
                for alert in &summary.newly_activated_bombs {
                    println!(
                        "  Bomb activated: {} ({} days remaining)",
                        alert.member.display_name(),
                        alert.bomb.days_remaining()
                    );
                }
                for recovery in &summary.deactivated_bombs {
                    println!(
                        "  Bomb deactivated: {} ({:+})",
                        recovery.member.display_name(),
                        recovery.entry.deficit_surplus()
                    );
                }
                for member in &summary.members_flagged_for_removal {
                    println!("  REMOVAL REQUIRED: {}", member.display_name());
                }
                LogReportSink.deliver(&summary);
                Ok(())
            }
            Ok(PassOutcome::Busy) => {
                println!(
                    "A pass for '{}' is already running - wait for it to finish and retry",
                    club_name
                );
                Ok(())
            }
            Err(e @ ClubPulseError::SourceExhausted { .. }) => {
                eprintln!("Source fetch failed - check the data source and retry: {}", e);
                Err(e)
            }
            Err(e) => {
                eprintln!("Processing failed - investigate before retrying: {}", e);
                Err(e)
            }
        }
    }

    fn handle_club(db: &Database, command: ClubCommand) -> Result<(), ClubPulseError> {
        match command {
            ClubCommand::Add {
                name,
                quota,
                timezone,
                scrape_time,
                trigger_days,
                countdown_days,
                source_ref,
            } => {
                let club = Club::create(
                    db,
                    CreateClubParams {
                        club_name: name,
                        daily_quota: quota,
                        timezone,
                        scrape_time,
                        bomb_trigger_days: trigger_days,
                        bomb_countdown_days: countdown_days,
                        source_ref,
                    },
                )?;
                println!("Created club '{}' (id {})", club.club_name(), club.club_id());
                Ok(())
            }
            ClubCommand::List => {
                for club in Club::get_all(db)? {
                    println!(
                        "{:<24} {:>10}/day  trigger {}d  countdown {}d  {}",
                        club.club_name(),
                        format_fans(club.daily_quota()),
                        club.bomb_trigger_days(),
                        club.bomb_countdown_days(),
                        if club.is_active() { "active" } else { "inactive" }
                    );
                }
                Ok(())
            }
            ClubCommand::Set {
                name,
                quota,
                timezone,
                scrape_time,
                trigger_days,
                countdown_days,
                source_ref,
            } => {
                let mut club = require_club(db, &name)?;
                club.update_settings(
                    db,
                    UpdateClubParams {
                        daily_quota: quota,
                        timezone,
                        scrape_time,
                        bomb_trigger_days: trigger_days,
                        bomb_countdown_days: countdown_days,
                        source_ref,
                    },
                )?;
                println!("Updated club '{}'", club.club_name());
                Ok(())
            }
            ClubCommand::Deactivate { name } => {
                let mut club = require_club(db, &name)?;
                club.set_active(db, false)?;
                println!("Deactivated club '{}'", club.club_name());
                Ok(())
            }
            ClubCommand::Activate { name } => {
                let mut club = require_club(db, &name)?;
                club.set_active(db, true)?;
                println!("Activated club '{}'", club.club_name());
                Ok(())
            }
        }
    }

    fn handle_quota(db: &Database, command: QuotaCommand) -> Result<(), ClubPulseError> {
        match command {
            QuotaCommand::Set {
                club,
                amount,
                effective_date,
                set_by,
            } => {
                let club = require_club(db, &club)?;
                let effective = match effective_date.as_deref() {
                    Some(s) => Utils::date_from_db(s)?,
                    None => chrono::Utc::now().with_timezone(&club.tz()).date_naive(),
                };
                let entry = QuotaScheduleEntry::append(
                    db,
                    club.club_id(),
                    effective,
                    amount,
                    set_by.as_deref(),
                )?;
                println!(
                    "Quota for '{}' set to {}/day effective {}",
                    club.club_name(),
                    format_fans(entry.daily_quota()),
                    entry.effective_date()
                );
                Ok(())
            }
            QuotaCommand::List { club } => {
                let club = require_club(db, &club)?;
                let today = chrono::Utc::now().with_timezone(&club.tz()).date_naive();
                let entries = QuotaScheduleEntry::list_for_period(db, club.club_id(), today)?;
                println!(
                    "Current quota: {}/day",
                    format_fans(QuotaScheduleEntry::quota_for_date(db, &club, today)?)
                );
                if entries.is_empty() {
                    println!(
                        "No schedule changes this period (club default {}/day)",
                        format_fans(club.daily_quota())
                    );
                } else {
                    for entry in entries {
                        println!(
                            "  from {} -> {}/day (set by {})",
                            entry.effective_date(),
                            format_fans(entry.daily_quota()),
                            entry.set_by().unwrap_or("unknown")
                        );
                    }
                }
                Ok(())
            }
        }
    }

    fn handle_member(db: &Database, command: MemberCommand) -> Result<(), ClubPulseError> {
        match command {
            MemberCommand::Add {
                club,
                name,
                external_id,
                join_date,
            } => {
                let club = require_club(db, &club)?;
                let join = match join_date.as_deref() {
                    Some(s) => Utils::date_from_db(s)?,
                    None => chrono::Utc::now().with_timezone(&club.tz()).date_naive(),
                };
                let member =
                    Member::create(db, club.club_id(), &name, join, external_id.as_deref())?;
                println!(
                    "Added member '{}' to '{}' (joined {})",
                    member.display_name(),
                    club.club_name(),
                    member.join_date()
                );
                Ok(())
            }
            MemberCommand::Deactivate { club, name } => {
                let club = require_club(db, &club)?;
                let mut member = require_member(db, &club, &name)?;
                member.deactivate(db, true)?;
                println!(
                    "Deactivated '{}' - they will not be auto-reactivated",
                    member.display_name()
                );
                Ok(())
            }
            MemberCommand::Activate { club, name } => {
                let club = require_club(db, &club)?;
                let mut member = require_member(db, &club, &name)?;
                member.activate(db)?;
                println!("Reactivated '{}'", member.display_name());
                Ok(())
            }
        }
    }
}

fn require_club(db: &Database, name: &str) -> Result<Club, ClubPulseError> {
    Club::get_by_name(db, name)?
        .ok_or_else(|| ClubPulseError::Error(format!("Club '{}' not found", name)))
}

fn require_member(db: &Database, club: &Club, name: &str) -> Result<Member, ClubPulseError> {
    Member::get_by_name(db, club.club_id(), name)?.ok_or_else(|| {
        ClubPulseError::Error(format!(
            "Member '{}' not found in club '{}'",
            name,
            club.club_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing_no_command_defaults_to_serve() {
        let cli = Cli::try_parse_from(["clubpulse"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(cli.command.unwrap_or(Command::Serve), Command::Serve));
    }

    #[test]
    fn test_cli_parsing_check_requires_club() {
        assert!(Cli::try_parse_from(["clubpulse", "check"]).is_err());

        let cli = Cli::try_parse_from(["clubpulse", "check", "--club", "Twilight"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Check { club }) if club == "Twilight"));
    }

    #[test]
    fn test_cli_parsing_club_add_defaults() {
        let cli = Cli::try_parse_from(["clubpulse", "club", "add", "--name", "Dawn"]).unwrap();
        let Some(Command::Club {
            command:
                ClubCommand::Add {
                    name,
                    quota,
                    trigger_days,
                    countdown_days,
                    ..
                },
        }) = cli.command
        else {
            panic!("expected club add");
        };
        assert_eq!(name, "Dawn");
        assert_eq!(quota, 1_000_000);
        assert_eq!(trigger_days, 3);
        assert_eq!(countdown_days, 7);
    }

    #[test]
    fn test_cli_parsing_quota_set() {
        let cli = Cli::try_parse_from([
            "clubpulse",
            "quota",
            "set",
            "--club",
            "Dawn",
            "--amount",
            "2000000",
            "--effective-date",
            "2025-11-15",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Quota {
                command: QuotaCommand::Set { amount: 2_000_000, .. }
            })
        ));
    }

    #[test]
    fn test_cli_parsing_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["clubpulse", "nonexistent-command"]).is_err());
    }
}
