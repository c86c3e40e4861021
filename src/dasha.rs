//! Vimshottari period selection over the upstream dasha lists.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One planetary period as reported by the provider. Timestamps stay as the
/// upstream ISO strings; comparison parses them leniently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashaPeriod {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub antardasha: Vec<DashaPeriod>,
}

impl DashaPeriod {
    pub fn start_utc(&self) -> Option<DateTime<Utc>> {
        self.start.as_deref().and_then(parse_flexible_datetime)
    }

    pub fn end_utc(&self) -> Option<DateTime<Utc>> {
        self.end.as_deref().and_then(parse_flexible_datetime)
    }
}

/// Parse upstream timestamps: RFC 3339, naive `YYYY-MM-DDTHH:MM:SS`
/// (treated as UTC), or a bare date.
pub fn parse_flexible_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

/// Decode a period list out of an upstream JSON array, skipping entries that
/// do not look like periods.
pub fn periods_from_value(v: &Value) -> Vec<DashaPeriod> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|p| serde_json::from_value(p.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Select the period active at `now`.
///
/// Pre-birth entries (ending before `birth`) are ignored. The first period
/// in list order whose `[start, end]` contains `now` wins; otherwise the
/// chronologically earliest remaining period; otherwise the raw first entry.
/// An empty list yields `None`.
pub fn current_period<'a>(
    periods: &'a [DashaPeriod],
    birth: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<&'a DashaPeriod> {
    if periods.is_empty() {
        return None;
    }

    let mut candidates: Vec<(DateTime<Utc>, DateTime<Utc>, &DashaPeriod)> = Vec::new();
    for p in periods {
        let (Some(start), Some(end)) = (p.start_utc(), p.end_utc()) else {
            continue;
        };
        if let Some(birth) = birth {
            if end < birth {
                continue;
            }
        }
        candidates.push((start, end, p));
    }

    for (start, end, p) in &candidates {
        if *start <= now && now <= *end {
            return Some(p);
        }
    }

    candidates.sort_by_key(|(start, _, _)| *start);
    candidates
        .first()
        .map(|(_, _, p)| *p)
        .or_else(|| periods.first())
}
