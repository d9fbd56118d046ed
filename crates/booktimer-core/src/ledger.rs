//! Day-keyed reading-time ledger.
//!
//! Totals and per-day records, keyed by the local calendar day
//! (`YYYY-MM-DD`). A commit spanning local midnight is split so each
//! day only receives the time actually read on it.

use chrono::{DateTime, Days, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::session::CommitRequest;
use crate::span;
use crate::types::Site;

/// Persisted store keys.
pub mod keys {
    pub const TOTAL: &str = "rt_total_ms";
    pub const DAILY: &str = "rt_daily_ms";
    pub const LOG: &str = "rt_daily_log";
    pub const DETAILS: &str = "rt_details";
    pub const SITE_ENABLE: &str = "rt_site_enable";
    pub const SETTINGS: &str = "rt_settings";
    pub const VERSION: &str = "rt_version";

    /// Keys accepted by `import-store` and returned by `export-store`.
    pub const PORTABLE: [&str; 6] = [TOTAL, DAILY, LOG, DETAILS, SETTINGS, SITE_ENABLE];
}

/// Number of records returned as `recent`.
pub const RECENT_LIMIT: usize = 30;

/// One merged reading record within a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub site: Option<Site>,
    pub work_title: String,
    pub episode_title: String,
    #[serde(default)]
    pub author: String,
    pub session_id: String,
    #[serde(default)]
    pub url: String,
    pub ms: u64,
    /// Epoch milliseconds of the latest span end merged into this record.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

impl CommitRecord {
    fn same_key(&self, req: &CommitRequest) -> bool {
        let id = &req.identity;
        self.site == id.site
            && self.work_title == id.work_title
            && self.episode_title == id.episode_title
            && self.url == req.url
            && self.site_id == id.site_id
            && self.session_id == req.session_id
    }
}

/// A slice of a commit falling on one local day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPart {
    pub day: String,
    pub ms: u64,
    pub ts: DateTime<Utc>,
}

/// Local day key of an instant.
pub fn day_key<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format("%Y-%m-%d").to_string()
}

/// First local midnight strictly after `at`, as UTC.
fn next_midnight<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
    let date = at.with_timezone(tz).date_naive().checked_add_days(Days::new(1))?;
    let local = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&local)
        .earliest()
        // Midnight inside a DST gap: take the first valid hour.
        .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Split `[start, stop]` holding `total_ms` at each local midnight.
///
/// Every part but the last is stamped one millisecond before the
/// midnight that closes it; the last part is stamped `stop` and takes
/// whatever remains so the parts always sum to `total_ms`.
pub fn split_across_days<Tz: TimeZone>(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    total_ms: u64,
    tz: &Tz,
) -> Vec<DayPart>
where
    Tz::Offset: std::fmt::Display,
{
    let stop_day = day_key(stop, tz);
    let mut parts = Vec::new();
    let mut cursor = start;
    let mut remaining = total_ms;

    while day_key(cursor, tz) != stop_day && cursor < stop {
        let Some(midnight) = next_midnight(cursor, tz) else {
            break;
        };
        let ms = crate::elapsed_ms(cursor, midnight).min(remaining);
        parts.push(DayPart {
            day: day_key(cursor, tz),
            ms,
            ts: midnight - TimeDelta::milliseconds(1),
        });
        remaining -= ms;
        cursor = midnight;
    }
    parts.push(DayPart {
        day: stop_day,
        ms: remaining,
        ts: stop,
    });
    parts
}

/// Stats pushed to viewers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total: u64,
    pub daily: u64,
    pub inflight_ms: u64,
    pub recent: Vec<CommitRecord>,
}

impl LedgerStats {
    /// Content signature; identical signatures are not re-pushed.
    pub fn signature(&self) -> String {
        let top_ts = self.recent.first().map_or(0, |r| r.ts);
        let sum: u64 = self.recent.iter().map(|r| r.ms).sum();
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.total,
            self.daily,
            self.inflight_ms,
            top_ts,
            self.recent.len(),
            sum
        )
    }
}

/// The durable reading-time totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub total_ms: u64,
    /// Today's total as of the last write.
    pub daily_ms: u64,
    pub daily_log: BTreeMap<String, u64>,
    pub details: BTreeMap<String, Vec<CommitRecord>>,
}

impl Ledger {
    /// Apply a commit. Returns the milliseconds added, zero for a no-op.
    pub fn commit<Tz: TimeZone>(&mut self, req: &CommitRequest, tz: &Tz) -> u64
    where
        Tz::Offset: std::fmt::Display,
    {
        if req.delta_ms == 0 || !req.identity.is_billable() {
            return 0;
        }
        let start = req.at - span(req.delta_ms);
        let mut added = 0;
        for part in split_across_days(start, req.at, req.delta_ms, tz) {
            if part.ms == 0 {
                continue;
            }
            let records = self.details.entry(part.day.clone()).or_default();
            match records.iter_mut().find(|r| r.same_key(req)) {
                Some(existing) => {
                    existing.ms += part.ms;
                    existing.ts = part.ts.timestamp_millis();
                    if existing.url.is_empty() {
                        existing.url.clone_from(&req.url);
                    }
                }
                None => records.push(CommitRecord {
                    site: req.identity.site,
                    work_title: req.identity.work_title.clone(),
                    episode_title: req.identity.episode_title.clone(),
                    author: req.identity.author.clone(),
                    session_id: req.session_id.clone(),
                    url: req.url.clone(),
                    ms: part.ms,
                    ts: part.ts.timestamp_millis(),
                    site_id: req.identity.site_id.clone(),
                }),
            }
            *self.daily_log.entry(part.day).or_default() += part.ms;
            added += part.ms;
        }
        self.total_ms += added;
        self.daily_ms = self.today_ms(req.at, tz);
        added
    }

    pub fn today_ms<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> u64
    where
        Tz::Offset: std::fmt::Display,
    {
        self.daily_log.get(&day_key(now, tz)).copied().unwrap_or(0)
    }

    /// Remove today's time from the totals and drop today's records.
    pub fn reset_today<Tz: TimeZone>(&mut self, now: DateTime<Utc>, tz: &Tz)
    where
        Tz::Offset: std::fmt::Display,
    {
        let today = day_key(now, tz);
        let today_ms = self.daily_log.remove(&today).unwrap_or(0);
        self.details.remove(&today);
        self.total_ms = self.total_ms.saturating_sub(today_ms);
        self.daily_ms = 0;
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    pub fn stats<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz, inflight_ms: u64) -> LedgerStats
    where
        Tz::Offset: std::fmt::Display,
    {
        let today = day_key(now, tz);
        let mut recent = self.details.get(&today).cloned().unwrap_or_default();
        recent.sort_by(|a, b| b.ts.cmp(&a.ts));
        recent.truncate(RECENT_LIMIT);
        LedgerStats {
            total: self.total_ms,
            daily: self.today_ms(now, tz),
            inflight_ms,
            recent,
        }
    }

    /// Ledger keys as persisted.
    pub fn to_snapshot(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(keys::TOTAL.into(), Value::from(self.total_ms));
        map.insert(keys::DAILY.into(), Value::from(self.daily_ms));
        map.insert(
            keys::LOG.into(),
            serde_json::to_value(&self.daily_log).unwrap_or_default(),
        );
        map.insert(
            keys::DETAILS.into(),
            serde_json::to_value(&self.details).unwrap_or_default(),
        );
        map
    }

    /// Rebuild from persisted keys. Missing keys take their defaults;
    /// malformed keys are reported and defaulted.
    pub fn from_snapshot(map: &Map<String, Value>) -> (Self, Vec<&'static str>) {
        fn field<T: serde::de::DeserializeOwned + Default>(
            map: &Map<String, Value>,
            key: &'static str,
            bad: &mut Vec<&'static str>,
        ) -> T {
            match map.get(key) {
                None | Some(Value::Null) => T::default(),
                Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|_| {
                    bad.push(key);
                    T::default()
                }),
            }
        }

        let mut bad = Vec::new();
        let ledger = Self {
            total_ms: field(map, keys::TOTAL, &mut bad),
            daily_ms: field(map, keys::DAILY, &mut bad),
            daily_log: field(map, keys::LOG, &mut bad),
            details: field(map, keys::DETAILS, &mut bad),
        };
        (ledger, bad)
    }
}
