pub type CaosDateTime = hifitime::Epoch;
use anyhow::{Result, bail};

/// Wire timestamp format used by the CAOS API (`%Y-%m-%dT%H:%M:%SZ`).
///
/// The API truncates to whole seconds and always uses UTC with a literal
/// trailing `Z`, so formatting goes through the Gregorian parts instead of
/// a generic RFC 3339 renderer.
pub trait CaosDateTimeExt {
    fn from_unix_seconds_f64(timestamp: f64) -> Self;
    fn from_wire(timestamp: &str) -> Result<Self>
    where
        Self: Sized;
    fn to_wire(&self) -> String;
    fn floor_unix_seconds(&self) -> i64;
}

impl CaosDateTimeExt for CaosDateTime {
    fn from_unix_seconds_f64(timestamp: f64) -> Self {
        Self::from_unix_seconds(timestamp)
    }

    fn from_wire(timestamp: &str) -> Result<Self> {
        let Some(rest) = timestamp.strip_suffix('Z') else {
            bail!("invalid timestamp '{}': missing trailing Z", timestamp);
        };
        let Some((date, time)) = rest.split_once('T') else {
            bail!("invalid timestamp '{}': missing date/time separator", timestamp);
        };

        let date_parts: Vec<&str> = date.split('-').collect();
        let time_parts: Vec<&str> = time.split(':').collect();
        if date_parts.len() != 3 || time_parts.len() != 3 {
            bail!("invalid timestamp '{}'", timestamp);
        }

        let year: i32 = date_parts[0].parse()?;
        let month: u8 = date_parts[1].parse()?;
        let day: u8 = date_parts[2].parse()?;
        let hour: u8 = time_parts[0].parse()?;
        let minute: u8 = time_parts[1].parse()?;
        let second: u8 = time_parts[2].parse()?;

        Ok(Self::maybe_from_gregorian_utc(
            year, month, day, hour, minute, second, 0,
        )?)
    }

    fn to_wire(&self) -> String {
        let (year, month, day, hour, minute, second, _nanos) = self.to_gregorian_utc();
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            year, month, day, hour, minute, second
        )
    }

    fn floor_unix_seconds(&self) -> i64 {
        self.to_unix_seconds().floor() as i64
    }
}
