use super::{CaosDateTime, CaosDateTimeExt};
use hifitime::Duration;

/// A half-open query window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub start: CaosDateTime,
    pub end: CaosDateTime,
}

impl DateRange {
    pub fn new(start: CaosDateTime, end: CaosDateTime) -> Self {
        Self { start, end }
    }

    /// Window length in whole seconds.
    pub fn span_seconds(&self) -> i64 {
        (self.end - self.start).to_seconds().floor() as i64
    }

    /// The preset window ending at the midnight before `now`.
    pub fn preset(preset: DatePreset, now: CaosDateTime) -> Self {
        let end = midnight_utc(now);
        let start = end - preset.span();
        Self { start, end }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.start.to_wire(), self.end.to_wire())
    }
}

/// Relative window presets offered by the dashboard.
///
/// Month-based presets are fixed 30/90/365 day spans; the backend buckets
/// by seconds and has no calendar arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    Day,
    Week,
    Month,
    ThreeMonths,
    Year,
}

impl DatePreset {
    pub const ALL: [DatePreset; 5] = [
        DatePreset::Day,
        DatePreset::Week,
        DatePreset::Month,
        DatePreset::ThreeMonths,
        DatePreset::Year,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DatePreset::Day => "day",
            DatePreset::Week => "week",
            DatePreset::Month => "month",
            DatePreset::ThreeMonths => "3 months",
            DatePreset::Year => "year",
        }
    }

    fn span(&self) -> Duration {
        let days = match self {
            DatePreset::Day => 1,
            DatePreset::Week => 7,
            DatePreset::Month => 30,
            DatePreset::ThreeMonths => 90,
            DatePreset::Year => 365,
        };
        Duration::from_days(days as f64)
    }
}

/// Truncates to 00:00:00 UTC of the same day.
pub fn midnight_utc(datetime: CaosDateTime) -> CaosDateTime {
    let (year, month, day, _, _, _, _) = datetime.to_gregorian_utc();
    CaosDateTime::from_gregorian_utc_at_midnight(year, month, day)
}
