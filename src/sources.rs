use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::clubs::Club;
use crate::config::{Config, SourceBackend};
use crate::error::ClubPulseError;
use crate::utils::Utils;

/// One member's slice of a period snapshot. Fixed shape, validated at the
/// boundary; nothing downstream handles loose maps.
#[derive(Clone, Debug)]
pub struct MemberSnapshot {
    pub display_name: String,
    pub external_id: Option<String>,
    /// Cumulative fans for this period, day-indexed (entry i = day i+1)
    pub daily_values: Vec<i64>,
    /// 1-based day-of-period the member first showed activity
    pub join_day_index: u32,
}

/// Everything one fetch produces. `effective_date` is set only when the
/// producer fell back to a previous period; the caller must then record
/// results under that date instead of today.
#[derive(Clone, Debug, Default)]
pub struct PeriodSnapshot {
    pub members: BTreeMap<String, MemberSnapshot>,
    pub current_day_index: u32,
    pub effective_date: Option<NaiveDate>,
}

/// Capability interface for daily-value producers. The reconciliation engine
/// depends only on this; backends are chosen by configuration.
pub trait FanSource {
    fn fetch(&self) -> Result<PeriodSnapshot, ClubPulseError>;

    /// Short tag for logs and lock ownership
    fn describe(&self) -> String;
}

/// Clamp raw values defensively and drop unusable records. Scraped data is
/// untrusted; a bad record must not take the pass down.
fn validate_members(
    raw: impl IntoIterator<Item = (String, MemberSnapshot)>,
) -> BTreeMap<String, MemberSnapshot> {
    let mut members = BTreeMap::new();
    for (key, mut snap) in raw {
        if snap.daily_values.is_empty() {
            warn!("No fan data for '{}' - skipping", snap.display_name);
            continue;
        }
        for value in snap.daily_values.iter_mut() {
            if *value < 0 {
                warn!(
                    "Negative fan value for '{}' clamped to 0",
                    snap.display_name
                );
                *value = 0;
            }
        }
        if snap.join_day_index == 0 {
            snap.join_day_index = 1;
        }
        members.insert(key, snap);
    }
    members
}

pub fn source_for_club(
    config: &Config,
    club: &Club,
) -> Result<Box<dyn FanSource>, ClubPulseError> {
    let source_ref = club.source_ref().ok_or_else(|| {
        ClubPulseError::Error(format!(
            "Club '{}' has no source_ref configured",
            club.club_name()
        ))
    })?;

    match config.source.backend() {
        SourceBackend::Api => Ok(Box::new(ApiFanSource::new(
            &config.source.api_base_url,
            source_ref,
        )?)),
        SourceBackend::Fixture => {
            let path = PathBuf::from(&config.source.fixture_dir).join(source_ref);
            Ok(Box::new(FixtureFanSource::new(path)))
        }
    }
}

// ============================================================================
// API backend
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    members: Vec<ApiMember>,
}

#[derive(Debug, Deserialize)]
struct ApiMember {
    viewer_id: Option<i64>,
    trainer_name: Option<String>,
    /// Lifetime cumulative fans per day of the month
    #[serde(default)]
    daily_fans: Vec<i64>,
}

/// Fetches a circle's member series from the fan-count API. The API reports
/// lifetime totals; they are converted to period-cumulative values here.
pub struct ApiFanSource {
    client: reqwest::blocking::Client,
    base_url: String,
    circle_id: String,
}

impl ApiFanSource {
    pub fn new(base_url: &str, circle_id: &str) -> Result<Self, ClubPulseError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("clubpulse/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(ApiFanSource {
            client,
            base_url: base_url.to_owned(),
            circle_id: circle_id.to_owned(),
        })
    }

    fn fetch_month(&self, year: i32, month: u32) -> Result<ApiResponse, ClubPulseError> {
        let year_str = year.to_string();
        let month_str = month.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("circle_id", self.circle_id.as_str()),
                ("year", year_str.as_str()),
                ("month", month_str.as_str()),
            ])
            .send()?;

        if !response.status().is_success() {
            return Err(ClubPulseError::Error(format!(
                "Fan API returned status {} for {}-{:02}",
                response.status(),
                year,
                month
            )));
        }

        Ok(response.json()?)
    }

    fn fetch_for_date(&self, today: NaiveDate) -> Result<PeriodSnapshot, ClubPulseError> {
        if today.day() == 1 {
            // Day 1: the new period hasn't populated upstream yet. Report the
            // previous period's close-out, dated to its last day, and use the
            // new period's first sample to correct the final totals.
            let data_date = Utils::previous_period_end(today);
            let current_day = data_date.day();
            info!(
                "Day 1: falling back to previous period ({}-{:02}), data date {}",
                data_date.year(),
                data_date.month(),
                data_date
            );

            let primary = self.fetch_month(data_date.year(), data_date.month())?;
            let endpoint = match self.fetch_month(today.year(), today.month()) {
                Ok(resp) => Some(resp.members),
                Err(e) => {
                    warn!(
                        "Could not fetch current period for endpoint correction: {} - using previous period's last snapshot",
                        e
                    );
                    None
                }
            };

            let members =
                parse_api_members(&primary.members, current_day, endpoint.as_deref());
            Ok(PeriodSnapshot {
                members,
                current_day_index: current_day,
                effective_date: Some(data_date),
            })
        } else {
            let current_day = today.day();
            let primary = self.fetch_month(today.year(), today.month())?;
            let members = parse_api_members(&primary.members, current_day, None);
            Ok(PeriodSnapshot {
                members,
                current_day_index: current_day,
                effective_date: None,
            })
        }
    }
}

impl FanSource for ApiFanSource {
    fn fetch(&self) -> Result<PeriodSnapshot, ClubPulseError> {
        self.fetch_for_date(chrono::Utc::now().date_naive())
    }

    fn describe(&self) -> String {
        format!("api:{}", self.circle_id)
    }
}

/// Convert raw API members into validated snapshots: drop members who left
/// (current-day value 0), detect join day, and rebase lifetime totals to
/// period-cumulative values. `endpoint_members` is the new period's first
/// sample, used on day 1 to recover fans earned after the last snapshot.
fn parse_api_members(
    members: &[ApiMember],
    current_day: u32,
    endpoint_members: Option<&[ApiMember]>,
) -> BTreeMap<String, MemberSnapshot> {
    let current_idx = (current_day as usize).saturating_sub(1);

    // viewer_id -> lifetime fans at the new period's index 0
    let mut endpoint_totals: BTreeMap<String, i64> = BTreeMap::new();
    if let Some(endpoint) = endpoint_members {
        for m in endpoint {
            if let (Some(vid), Some(&first)) = (m.viewer_id, m.daily_fans.first()) {
                if first > 0 {
                    endpoint_totals.insert(vid.to_string(), first);
                }
            }
        }
    }

    let mut raw = Vec::new();
    for member in members {
        let (viewer_id, trainer_name) = match (member.viewer_id, member.trainer_name.as_deref()) {
            (Some(vid), Some(name)) => (vid.to_string(), name),
            _ => {
                warn!(
                    "Skipping member with missing identity: viewer_id={:?}, name={:?}",
                    member.viewer_id, member.trainer_name
                );
                continue;
            }
        };

        let lifetime = &member.daily_fans;
        if current_idx >= lifetime.len() {
            warn!(
                "Current day {} exceeds series length for '{}' - skipping",
                current_day, trainer_name
            );
            continue;
        }
        if lifetime[current_idx] == 0 {
            // Zero on the current day means the member left the club
            debug!("Skipping inactive member (left club): '{}'", trainer_name);
            continue;
        }

        // Join day = first day with activity; its value rebases the series
        let mut join_day: u32 = 1;
        let mut starting_fans: i64 = 0;
        for (idx, &fans) in lifetime.iter().take(current_day as usize).enumerate() {
            if fans > 0 {
                join_day = idx as u32 + 1;
                starting_fans = fans;
                break;
            }
        }

        let mut period_values: Vec<i64> = lifetime
            .iter()
            .take(current_day as usize)
            .map(|&total| if total == 0 { 0 } else { total - starting_fans })
            .collect();

        if let Some(&endpoint_lifetime) = endpoint_totals.get(&viewer_id) {
            if endpoint_lifetime >= starting_fans {
                let corrected = endpoint_lifetime - starting_fans;
                if period_values.last().is_some_and(|&last| corrected > last) {
                    debug!(
                        "Endpoint correction for '{}': {} -> {}",
                        trainer_name,
                        period_values.last().copied().unwrap_or(0),
                        corrected
                    );
                    if let Some(last) = period_values.last_mut() {
                        *last = corrected;
                    }
                }
            } else {
                warn!(
                    "Endpoint correction skipped for '{}': endpoint lifetime {} < starting {}",
                    trainer_name, endpoint_lifetime, starting_fans
                );
            }
        }

        raw.push((
            viewer_id.clone(),
            MemberSnapshot {
                display_name: trainer_name.to_owned(),
                external_id: Some(viewer_id),
                daily_values: period_values,
                join_day_index: join_day,
            },
        ));
    }

    validate_members(raw)
}

// ============================================================================
// Fixture backend
// ============================================================================

#[derive(Debug, Deserialize)]
struct FixtureFile {
    current_day_index: u32,
    #[serde(default)]
    effective_date: Option<String>,
    #[serde(default)]
    members: Vec<FixtureMember>,
}

#[derive(Debug, Deserialize)]
struct FixtureMember {
    display_name: String,
    #[serde(default)]
    external_id: Option<String>,
    daily_values: Vec<i64>,
    #[serde(default = "default_join_day")]
    join_day_index: u32,
}

fn default_join_day() -> u32 {
    1
}

/// Reads an already-parsed snapshot from a JSON file. Used for offline
/// operation and for driving the pipeline in tests.
pub struct FixtureFanSource {
    path: PathBuf,
}

impl FixtureFanSource {
    pub fn new(path: PathBuf) -> Self {
        FixtureFanSource { path }
    }
}

impl FanSource for FixtureFanSource {
    fn fetch(&self) -> Result<PeriodSnapshot, ClubPulseError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let fixture: FixtureFile = serde_json::from_str(&contents)
            .map_err(|e| ClubPulseError::Error(format!("Malformed fixture file: {}", e)))?;

        let effective_date = fixture
            .effective_date
            .as_deref()
            .map(Utils::date_from_db)
            .transpose()?;

        let raw = fixture.members.into_iter().map(|m| {
            let key = m
                .external_id
                .clone()
                .unwrap_or_else(|| m.display_name.clone());
            (
                key,
                MemberSnapshot {
                    display_name: m.display_name,
                    external_id: m.external_id,
                    daily_values: m.daily_values,
                    join_day_index: m.join_day_index,
                },
            )
        });

        Ok(PeriodSnapshot {
            members: validate_members(raw),
            current_day_index: fixture.current_day_index,
            effective_date,
        })
    }

    fn describe(&self) -> String {
        format!("fixture:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn api_member(vid: i64, name: &str, fans: &[i64]) -> ApiMember {
        ApiMember {
            viewer_id: Some(vid),
            trainer_name: Some(name.to_string()),
            daily_fans: fans.to_vec(),
        }
    }

    #[test]
    fn test_parse_api_members_rebases_lifetime_to_period() {
        // Joined day 1 with 10M lifetime; day 3 lifetime is 13M
        let members = vec![api_member(7, "Haru", &[10_000_000, 11_500_000, 13_000_000])];
        let parsed = parse_api_members(&members, 3, None);

        let snap = &parsed["7"];
        assert_eq!(snap.join_day_index, 1);
        assert_eq!(snap.daily_values, vec![0, 1_500_000, 3_000_000]);
        assert_eq!(snap.external_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_api_members_detects_late_join() {
        // Zero until day 3: joined day 3
        let members = vec![api_member(9, "Kiri", &[0, 0, 5_000_000, 5_800_000])];
        let parsed = parse_api_members(&members, 4, None);

        let snap = &parsed["9"];
        assert_eq!(snap.join_day_index, 3);
        assert_eq!(snap.daily_values, vec![0, 0, 0, 800_000]);
    }

    #[test]
    fn test_parse_api_members_drops_departed_and_short_series() {
        let members = vec![
            api_member(1, "Gone", &[1_000, 2_000, 0]), // zero today: left
            api_member(2, "Short", &[1_000]),          // series too short for day 3
            api_member(3, "Here", &[1_000, 2_000, 3_000]),
        ];
        let parsed = parse_api_members(&members, 3, None);
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key("3"));
    }

    #[test]
    fn test_parse_api_members_endpoint_correction() {
        let members = vec![api_member(5, "Edge", &[10_000_000, 12_000_000])];
        // New period's first sample shows 12.5M lifetime
        let endpoint = vec![api_member(5, "Edge", &[12_500_000])];
        let parsed = parse_api_members(&members, 2, Some(&endpoint));

        assert_eq!(parsed["5"].daily_values, vec![0, 2_500_000]);
    }

    #[test]
    fn test_validate_members_clamps_negatives_and_drops_empty() {
        let raw = vec![
            (
                "a".to_string(),
                MemberSnapshot {
                    display_name: "A".to_string(),
                    external_id: None,
                    daily_values: vec![100, -5, 200],
                    join_day_index: 0,
                },
            ),
            (
                "b".to_string(),
                MemberSnapshot {
                    display_name: "B".to_string(),
                    external_id: None,
                    daily_values: vec![],
                    join_day_index: 1,
                },
            ),
        ];
        let members = validate_members(raw);
        assert_eq!(members.len(), 1);
        assert_eq!(members["a"].daily_values, vec![100, 0, 200]);
        assert_eq!(members["a"].join_day_index, 1);
    }

    #[test]
    fn test_fixture_source_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "current_day_index": 2,
                "effective_date": "2025-11-02",
                "members": [
                    {{"display_name": "Haru", "external_id": "t-1",
                      "daily_values": [1000000, 2500000], "join_day_index": 1}},
                    {{"display_name": "NoId", "daily_values": [500000, 900000]}}
                ]
            }}"#
        )
        .unwrap();

        let source = FixtureFanSource::new(path);
        let snapshot = source.fetch().unwrap();

        assert_eq!(snapshot.current_day_index, 2);
        assert_eq!(
            snapshot.effective_date,
            Some(NaiveDate::from_ymd_opt(2025, 11, 2).unwrap())
        );
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(snapshot.members["t-1"].daily_values[1], 2_500_000);
        // Members without an external id are keyed by display name
        assert!(snapshot.members.contains_key("NoId"));
    }

    #[test]
    fn test_fixture_source_missing_file_is_an_error() {
        let source = FixtureFanSource::new(PathBuf::from("/nonexistent/snapshot.json"));
        assert!(source.fetch().is_err());
    }
}
