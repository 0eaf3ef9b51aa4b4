//! Weekly partition keys.
//!
//! Every job row carries a `part` column derived from its due time so the
//! tables can be partitioned or archived by week. The key must be
//! reproducible from either the original `process_at` or the decoded id.

use crate::{record_id_to_time, CoreResult};
use chrono::{DateTime, Datelike, Days, Local, NaiveTime, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// How a due time maps to its partition key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// End of the ISO week containing the due time.
    #[default]
    EndOfWeek,
    /// One week after the end of the containing ISO week.
    ArchiveAfterOneWeek,
}

impl PartitionPolicy {
    /// Partition key for a due time, computed in the given time zone.
    #[must_use]
    pub fn partition_in<Tz: TimeZone>(self, at: &DateTime<Tz>) -> DateTime<Tz> {
        let end = end_of_week(at);
        match self {
            Self::EndOfWeek => end,
            Self::ArchiveAfterOneWeek => end + chrono::Duration::days(7),
        }
    }

    /// Partition key for a due time, bucketed in the local time zone.
    #[must_use]
    pub fn partition_for(self, process_at: DateTime<Utc>) -> DateTime<Utc> {
        self.partition_in(&process_at.with_timezone(&Local))
            .with_timezone(&Utc)
    }

    /// Partition key recovered from a time-prefixed record id.
    pub fn partition_for_id(self, id: &str) -> CoreResult<DateTime<Utc>> {
        record_id_to_time(id).map(|at| self.partition_for(at))
    }
}

/// Sunday 23:59:59 of the ISO week containing `at`, in `at`'s time zone.
///
/// The input is first truncated to the top of its hour.
#[must_use]
pub fn end_of_week<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Tz> {
    let local = at.naive_local();
    let hour = local.with_minute(0).and_then(|t| t.with_second(0)).unwrap_or(local);

    let date = hour.date();
    let to_sunday = 6 - u64::from(date.weekday().num_days_from_monday());
    let sunday = date.checked_add_days(Days::new(to_sunday)).unwrap_or(date);
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    let end = sunday.and_time(last_second);

    let tz = at.timezone();
    tz.from_local_datetime(&end)
        .latest()
        // A DST gap at that wall time: keep the input's offset.
        .unwrap_or_else(|| tz.from_utc_datetime(&(end - at.offset().fix())))
}
