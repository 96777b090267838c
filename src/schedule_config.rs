//! Posting Time Configuration
//!
//! The per-weekday table of optimal posting times, the legacy morning and
//! evening windows, and the helpers that turn either into concrete local
//! times for today.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Timelike, Weekday};
use rand::Rng;
use thiserror::Error;

/// Jitter applied around each optimal time, in minutes either way.
pub const JITTER_MINUTES: i64 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("no optimal posting times configured for {0}")]
    NoTimesForDay(Weekday),

    #[error("slot {index} is out of range for {day} ({count} slots configured)")]
    SlotOutOfRange { day: Weekday, index: usize, count: usize },

    #[error("{0} does not exist in the local timezone")]
    NonexistentLocalTime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingTime {
    pub hour: u32,
    pub minute: u32,
}

impl PostingTime {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }
}

/// Optimal times indexed by days from Sunday (0 = Sunday .. 6 = Saturday).
pub const OPTIMAL_POSTING_TIMES: [&[PostingTime]; 7] = [
    &[PostingTime::new(10, 0), PostingTime::new(14, 0)],
    &[PostingTime::new(11, 0), PostingTime::new(14, 0), PostingTime::new(19, 0)],
    &[PostingTime::new(9, 0), PostingTime::new(13, 0), PostingTime::new(19, 0)],
    &[PostingTime::new(14, 0), PostingTime::new(17, 0), PostingTime::new(20, 0)],
    &[PostingTime::new(9, 0), PostingTime::new(12, 0), PostingTime::new(19, 0)],
    &[PostingTime::new(10, 0), PostingTime::new(14, 0)],
    &[PostingTime::new(9, 0), PostingTime::new(11, 0)],
];

/// Weekday lookup table for optimal posting times.
#[derive(Debug, Clone)]
pub struct OptimalTimes {
    table: [Vec<PostingTime>; 7],
}

impl Default for OptimalTimes {
    fn default() -> Self {
        Self {
            table: OPTIMAL_POSTING_TIMES.map(|times| times.to_vec()),
        }
    }
}

impl OptimalTimes {
    pub fn new(table: [Vec<PostingTime>; 7]) -> Self {
        Self { table }
    }

    pub fn times_for(&self, day: Weekday) -> &[PostingTime] {
        &self.table[day.num_days_from_sunday() as usize]
    }

    /// A random table entry for `day`, jittered, on today's date.
    pub fn generate_optimal_posting_time(&self, day: Weekday) -> Result<DateTime<Local>, ScheduleError> {
        let count = self.times_for(day).len();
        if count == 0 {
            return Err(ScheduleError::NoTimesForDay(day));
        }
        let index = rand::thread_rng().gen_range(0..count);
        self.posting_time_on(Local::now().date_naive(), day, index)
    }

    /// Table entry `index` for `day`, jittered, on today's date.
    pub fn generate_specific_optimal_posting_time(
        &self,
        day: Weekday,
        index: usize,
    ) -> Result<DateTime<Local>, ScheduleError> {
        self.posting_time_on(Local::now().date_naive(), day, index)
    }

    /// Table entry `index` for `day`, jittered, on `date`.
    pub fn posting_time_on(&self, date: NaiveDate, day: Weekday, index: usize) -> Result<DateTime<Local>, ScheduleError> {
        let times = self.times_for(day);
        if times.is_empty() {
            return Err(ScheduleError::NoTimesForDay(day));
        }
        let slot = times.get(index).ok_or(ScheduleError::SlotOutOfRange {
            day,
            index,
            count: times.len(),
        })?;

        let base = local_time(date, slot.hour, slot.minute)?;
        let jitter = rand::thread_rng().gen_range(-JITTER_MINUTES..=JITTER_MINUTES);
        Ok(base + Duration::minutes(jitter))
    }
}

/// Coarse clock window used by the legacy scheduling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub label: &'static str,
}

/// 06:00 - 11:00
pub const MORNING_WINDOW: TimeWindow = TimeWindow {
    start_hour: 6,
    end_hour: 11,
    label: "morning",
};

/// 16:00 - 21:00
pub const EVENING_WINDOW: TimeWindow = TimeWindow {
    start_hour: 16,
    end_hour: 21,
    label: "evening",
};

/// Uniformly random minute within `window` on today's date.
pub fn generate_random_time_in_window(window: &TimeWindow) -> Result<DateTime<Local>, ScheduleError> {
    random_time_in_window_on(Local::now().date_naive(), window)
}

pub fn random_time_in_window_on(date: NaiveDate, window: &TimeWindow) -> Result<DateTime<Local>, ScheduleError> {
    let start = local_time(date, window.start_hour, 0)?;
    let size = i64::from(window.end_hour.saturating_sub(window.start_hour)) * 60;
    if size == 0 {
        return Ok(start);
    }
    let offset = rand::thread_rng().gen_range(0..size);
    Ok(start + Duration::minutes(offset))
}

/// `HH:MM` for a random time within `window` today.
pub fn generate_random_time_string(window: &TimeWindow) -> Result<String, ScheduleError> {
    generate_random_time_in_window(window).map(|time| time.format("%H:%M").to_string())
}

pub fn is_time_in_window<Tz: TimeZone>(time: &DateTime<Tz>, window: &TimeWindow) -> bool {
    let hour = time.hour();
    hour >= window.start_hour && hour < window.end_hour
}

/// Daily cron expression (`minute hour * * *`) firing at `time`'s wall clock.
pub fn format_date_to_cron<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    format!("{} {} * * *", time.minute(), time.hour())
}

/// Weekday of a date as days from Sunday, matching the table index.
pub fn day_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

fn local_time(date: NaiveDate, hour: u32, minute: u32) -> Result<DateTime<Local>, ScheduleError> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ScheduleError::NonexistentLocalTime(format!("{} {:02}:{:02}", date, hour, minute)))?;
    let naive = date.and_time(time);

    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ScheduleError::NonexistentLocalTime(naive.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wednesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    fn minutes_of_day<Tz: TimeZone>(time: &DateTime<Tz>) -> i64 {
        i64::from(time.hour() * 60 + time.minute())
    }

    #[test]
    fn every_day_has_two_or_three_slots() {
        let times = OptimalTimes::default();
        for day in [
            Weekday::Sun,
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
        ] {
            let count = times.times_for(day).len();
            assert!((2..=3).contains(&count), "{} has {} slots", day, count);
        }
        assert_eq!(
            times.times_for(Weekday::Wed),
            &[PostingTime::new(14, 0), PostingTime::new(17, 0), PostingTime::new(20, 0)]
        );
    }

    #[test]
    fn specific_time_stays_within_jitter_on_the_same_date() {
        let times = OptimalTimes::default();
        for _ in 0..200 {
            for (index, slot) in times.times_for(Weekday::Wed).iter().enumerate() {
                let at = times.posting_time_on(wednesday(), Weekday::Wed, index).unwrap();
                let target = i64::from(slot.hour * 60 + slot.minute);

                assert_eq!(at.date_naive(), wednesday());
                assert!((minutes_of_day(&at) - target).abs() <= JITTER_MINUTES);
            }
        }
    }

    #[test]
    fn todays_time_lands_on_todays_date() {
        let times = OptimalTimes::default();
        let day = Local::now().weekday();
        let at = times.generate_specific_optimal_posting_time(day, 0).unwrap();
        assert_eq!(at.date_naive(), Local::now().date_naive());
    }

    #[test]
    fn random_pick_matches_some_table_entry() {
        let times = OptimalTimes::default();
        let at = times.generate_optimal_posting_time(Weekday::Wed).unwrap();
        let near_entry = times
            .times_for(Weekday::Wed)
            .iter()
            .any(|slot| (minutes_of_day(&at) - i64::from(slot.hour * 60 + slot.minute)).abs() <= JITTER_MINUTES);
        assert!(near_entry);
    }

    #[test]
    fn day_without_entries_is_an_error() {
        let mut table: [Vec<PostingTime>; 7] = Default::default();
        table[1] = vec![PostingTime::new(9, 0)];
        let times = OptimalTimes::new(table);

        assert_eq!(
            times.generate_optimal_posting_time(Weekday::Sun),
            Err(ScheduleError::NoTimesForDay(Weekday::Sun))
        );
        assert_eq!(
            times.posting_time_on(wednesday(), Weekday::Mon, 4),
            Err(ScheduleError::SlotOutOfRange {
                day: Weekday::Mon,
                index: 4,
                count: 1
            })
        );
    }

    #[test]
    fn window_times_fall_inside_the_window() {
        for _ in 0..200 {
            let at = random_time_in_window_on(wednesday(), &MORNING_WINDOW).unwrap();
            assert!(is_time_in_window(&at, &MORNING_WINDOW));
            assert!(!is_time_in_window(&at, &EVENING_WINDOW));
        }
        let label = generate_random_time_string(&EVENING_WINDOW).unwrap();
        let hour: u32 = label[..2].parse().unwrap();
        assert_eq!(label.len(), 5);
        assert!((16..21).contains(&hour));
    }

    #[test]
    fn cron_expression_uses_minute_then_hour() {
        let at = Local
            .from_local_datetime(&wednesday().and_hms_opt(13, 47, 0).unwrap())
            .earliest()
            .unwrap();
        assert_eq!(format_date_to_cron(&at), "47 13 * * *");
        assert_eq!(day_index(wednesday()), 3);
    }
}
