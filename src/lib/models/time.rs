use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};

use crate::{
    constants::SECONDS_PER_HOUR,
    error::{RosError, RosResult},
};

pub fn floor_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    let ts = time.timestamp();
    let floored = ts.div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR;
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(time)
}

/// midnight UTC of the day holding `time`
pub fn floor_day(time: DateTime<Utc>) -> DateTime<Utc> {
    let ts = time.timestamp();
    let floored = ts.div_euclid(24 * SECONDS_PER_HOUR) * 24 * SECONDS_PER_HOUR;
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(time)
}

pub fn ceil_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_hour(time);
    if floored == time {
        floored
    } else {
        floored + Duration::hours(1)
    }
}

pub fn is_hour_aligned(time: &DateTime<Utc>) -> bool {
    time.minute() == 0 && time.second() == 0 && time.nanosecond() == 0
}

/// Strictly increasing, hour-aligned UTC instants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeAxis {
    times: Vec<DateTime<Utc>>,
}

impl TimeAxis {
    /// `duration_hours` consecutive hours, the first one being `ceil_hour(start)`
    pub fn for_window(start: DateTime<Utc>, duration_hours: u32) -> Self {
        let first = ceil_hour(start);
        let times = (0..duration_hours as i64)
            .map(|h| first + Duration::hours(h))
            .collect();
        TimeAxis { times }
    }

    pub fn from_times(times: Vec<DateTime<Utc>>) -> RosResult<Self> {
        if let Some(t) = times.iter().find(|t| !is_hour_aligned(t)) {
            return Err(RosError::format(
                "time axis",
                format!("{} is not aligned to the hour", t),
            ));
        }
        if !times.iter().tuple_windows().all(|(a, b)| b > a) {
            return Err(RosError::format(
                "time axis",
                "timestamps must be strictly increasing",
            ));
        }
        Ok(TimeAxis { times })
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first(&self) -> Option<&DateTime<Utc>> {
        self.times.first()
    }

    pub fn position(&self, time: &DateTime<Utc>) -> Option<usize> {
        self.times.binary_search(time).ok()
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        self.position(time).is_some()
    }

    /// Hours of the axis grouped by calendar day, in order
    pub fn by_date(&self) -> Vec<(NaiveDate, Vec<u32>)> {
        self.times
            .iter()
            .chunk_by(|t| t.date_naive())
            .into_iter()
            .map(|(date, hours)| (date, hours.map(|t| t.hour()).collect()))
            .collect()
    }

    /// instants of this axis missing from `other`
    pub fn missing_from(&self, other: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
        self.times
            .iter()
            .filter(|t| other.binary_search(t).is_err())
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_starts_at_ceiled_hour() {
        let start = Utc.with_ymd_and_hms(2023, 8, 15, 13, 20, 0).unwrap();
        let axis = TimeAxis::for_window(start, 3);
        assert_eq!(axis.len(), 3);
        assert_eq!(
            axis.times()[0],
            Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap()
        );
        assert_eq!(
            axis.times()[2],
            Utc.with_ymd_and_hms(2023, 8, 15, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn aligned_start_is_kept() {
        let start = Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap();
        assert_eq!(ceil_hour(start), start);
        assert_eq!(floor_hour(start), start);
        assert_eq!(TimeAxis::for_window(start, 1).times()[0], start);
    }

    #[test]
    fn window_across_midnight_is_split_by_day() {
        let start = Utc.with_ymd_and_hms(2023, 8, 15, 22, 0, 0).unwrap();
        let days = TimeAxis::for_window(start, 4).by_date();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].1, vec![22, 23]);
        assert_eq!(days[1].0, NaiveDate::from_ymd_opt(2023, 8, 16).unwrap());
        assert_eq!(days[1].1, vec![0, 1]);
    }

    #[test]
    fn days_start_at_midnight() {
        let noon = Utc.with_ymd_and_hms(2023, 8, 15, 12, 30, 0).unwrap();
        assert_eq!(floor_day(noon), Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap());
        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(floor_day(before_epoch), Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn unordered_times_are_rejected() {
        let t0 = Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(1);
        assert!(TimeAxis::from_times(vec![t1, t0]).is_err());
        assert!(TimeAxis::from_times(vec![t0 + Duration::minutes(5)]).is_err());
    }
}
