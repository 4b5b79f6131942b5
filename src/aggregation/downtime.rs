//! Downtime reconciliation
//!
//! Downtimes reported by a connector become suppression rules for that
//! connector's alerts, valid for the current cycle only.

use chrono::{DateTime, Duration, Utc};

use crate::connectors::Downtime;
use crate::rules::Rule;

const MAX_DESCRIPTION_CHARS: usize = 100;

/// Relative phrase for a downtime ending at `end`, seen from `now`
pub fn nice_date(end: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = end - now;

    if remaining > Duration::days(2) {
        end.format("until %Y-%m-%d").to_string()
    } else if remaining > Duration::hours(2) {
        format!("for {}h", rounded(remaining, 3600))
    } else if remaining > Duration::minutes(2) {
        format!("for {}m", rounded(remaining, 60))
    } else if remaining > Duration::zero() {
        format!("for {}s", rounded(remaining, 1))
    } else {
        end.format("ended %Y-%m-%d %H:%M").to_string()
    }
}

fn rounded(d: Duration, unit_secs: i64) -> i64 {
    let millis = d.num_milliseconds() as f64;
    (millis / (unit_secs as f64 * 1000.0)).round_ties_even() as i64
}

/// Human description of a downtime, at most 100 characters
pub fn downtime_description(downtime: &Downtime, now: DateTime<Utc>) -> String {
    let description = format!(
        "Downtimed {}: {}",
        nice_date(downtime.end_time, now),
        downtime.comment
    );

    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        let mut truncated: String = description.chars().take(MAX_DESCRIPTION_CHARS - 1).collect();
        truncated.push('…');
        truncated
    } else {
        description
    }
}

/// Suppression rules for one connector's downtimes
pub fn downtime_rules(downtimes: &[Downtime], now: DateTime<Utc>) -> Vec<Rule> {
    downtimes
        .iter()
        .map(|downtime| Rule {
            description: downtime_description(downtime, now),
            what: None,
            when: None,
            labels: downtime.matchers.clone(),
        })
        .collect()
}
