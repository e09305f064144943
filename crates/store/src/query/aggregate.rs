// crates/store/src/query/aggregate.rs
//! Aggregations over query results: grouped statistics and gap-filled
//! timelines.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use redline_types::Change;
use serde::Serialize;

/// Field to group on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupByField {
    Category,
    Source,
    Provider,
    Model,
    Mode,
    Status,
}

/// Statistics for one group key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStat {
    pub key: String,
    pub count: usize,
    /// Share of the grouped population, 0–100.
    pub percentage: f64,
    pub mean_confidence: f64,
    /// Mean net character delta of the group's changes.
    pub mean_char_delta: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupedStats {
    pub field: Option<GroupByField>,
    pub total: usize,
    pub groups: Vec<GroupStat>,
}

/// Group `changes` by `field`. Changes without the field (e.g. no
/// attribution when grouping by model) fall into an `"(none)"` bucket.
pub fn group_by(changes: &[Change], field: GroupByField) -> GroupedStats {
    let mut buckets: BTreeMap<String, Vec<&Change>> = BTreeMap::new();
    for change in changes {
        let key = match field {
            GroupByField::Category => change.category.to_string(),
            GroupByField::Source => change.source.clone(),
            GroupByField::Status => change.status.to_string(),
            GroupByField::Provider => change
                .attribution
                .as_ref()
                .map(|a| a.provider.clone())
                .unwrap_or_else(|| "(none)".into()),
            GroupByField::Model => change
                .attribution
                .as_ref()
                .map(|a| a.model.clone())
                .unwrap_or_else(|| "(none)".into()),
            GroupByField::Mode => change
                .attribution
                .as_ref()
                .and_then(|a| a.mode.clone())
                .unwrap_or_else(|| "(none)".into()),
        };
        buckets.entry(key).or_default().push(change);
    }

    let total = changes.len();
    let groups = buckets
        .into_iter()
        .map(|(key, members)| {
            let count = members.len();
            let mean_confidence =
                members.iter().map(|c| c.confidence).sum::<f64>() / count as f64;
            let mean_char_delta =
                members.iter().map(|c| c.char_delta() as f64).sum::<f64>() / count as f64;
            GroupStat {
                key,
                count,
                percentage: if total == 0 {
                    0.0
                } else {
                    count as f64 * 100.0 / total as f64
                },
                mean_confidence,
                mean_char_delta,
            }
        })
        .collect();
    GroupedStats {
        field: Some(field),
        total,
        groups,
    }
}

/// Timeline bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineBucket {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimelineBucket {
    fn truncate(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let no_subminute = Utc
            .with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
            .single()
            .unwrap_or(at);
        match self {
            TimelineBucket::Minute => no_subminute,
            TimelineBucket::Hour => Utc
                .with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), 0, 0)
                .single()
                .unwrap_or(no_subminute),
            TimelineBucket::Day => Utc
                .with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
                .single()
                .unwrap_or(no_subminute),
            TimelineBucket::Week => {
                let day_start = Utc
                    .with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
                    .single()
                    .unwrap_or(no_subminute);
                // ISO week: roll back to Monday.
                day_start - Duration::days(at.weekday().num_days_from_monday() as i64)
            }
        }
    }

    fn step(&self) -> Duration {
        match self {
            TimelineBucket::Minute => Duration::minutes(1),
            TimelineBucket::Hour => Duration::hours(1),
            TimelineBucket::Day => Duration::days(1),
            TimelineBucket::Week => Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub bucket_start: DateTime<Utc>,
    pub count: usize,
    pub mean_confidence: f64,
}

/// Bucket changes over time. With `fill_gaps`, empty buckets between the
/// first and last populated ones are emitted with zero counts, so plots
/// have no holes.
pub fn timeline(
    changes: &[Change],
    bucket: TimelineBucket,
    fill_gaps: bool,
) -> Vec<TimelinePoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&Change>> = BTreeMap::new();
    for change in changes {
        buckets
            .entry(bucket.truncate(change.timestamp))
            .or_default()
            .push(change);
    }
    let Some((&first, _)) = buckets.iter().next() else {
        return Vec::new();
    };
    let &last = buckets.keys().next_back().expect("non-empty map");

    let mut points = Vec::new();
    if fill_gaps {
        let mut cursor = first;
        while cursor <= last {
            let members = buckets.get(&cursor);
            points.push(point_for(cursor, members.map(|v| v.as_slice()).unwrap_or(&[])));
            cursor += bucket.step();
        }
    } else {
        for (start, members) in &buckets {
            points.push(point_for(*start, members));
        }
    }
    points
}

fn point_for(bucket_start: DateTime<Utc>, members: &[&Change]) -> TimelinePoint {
    let count = members.len();
    let mean_confidence = if count == 0 {
        0.0
    } else {
        members.iter().map(|c| c.confidence).sum::<f64>() / count as f64
    };
    TimelinePoint {
        bucket_start,
        count,
        mean_confidence,
    }
}
