//! Granularity presets and the points-per-pixel guard.

use crate::datamodel::DateRange;

/// Bucket width preset for aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    /// Presets ordered from finest to coarsest.
    pub const PRESETS: [Granularity; 3] =
        [Granularity::Hour, Granularity::Day, Granularity::Week];

    pub fn seconds(&self) -> u32 {
        match self {
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
            Granularity::Week => 604_800,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Granularity::Hour => "1 hour",
            Granularity::Day => "1 day",
            Granularity::Week => "1 week",
        }
    }

    fn next_coarser(&self) -> Option<Granularity> {
        match self {
            Granularity::Hour => Some(Granularity::Day),
            Granularity::Day => Some(Granularity::Week),
            Granularity::Week => None,
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" | "1h" => Ok(Granularity::Hour),
            "day" | "1d" => Ok(Granularity::Day),
            "week" | "1w" => Ok(Granularity::Week),
            other => Err(format!(
                "unknown granularity \"{other}\", expected hour, day or week"
            )),
        }
    }
}

/// Whether fetching `range` at `granularity_seconds` stays within the
/// points-per-pixel budget of a graph `width_pixels` wide.
pub fn check_ppp(
    range: &DateRange,
    granularity_seconds: u32,
    width_pixels: u32,
    max_points_per_pixel: f64,
) -> bool {
    if granularity_seconds == 0 || width_pixels == 0 {
        return false;
    }
    let points = range.span_seconds() as f64 / granularity_seconds as f64;
    points / width_pixels as f64 <= max_points_per_pixel
}

/// Coarsens `granularity` until the points-per-pixel budget holds.
///
/// Returns the granularity to use and whether it differs from the one
/// requested. The coarsest preset is returned even when it still
/// exceeds the budget, so a fetch always proceeds.
pub fn coarsen_to_fit(
    range: &DateRange,
    granularity: Granularity,
    width_pixels: u32,
    max_points_per_pixel: f64,
) -> (Granularity, bool) {
    let mut current = granularity;
    while !check_ppp(range, current.seconds(), width_pixels, max_points_per_pixel) {
        match current.next_coarser() {
            Some(coarser) => current = coarser,
            None => break,
        }
    }
    (current, current != granularity)
}
