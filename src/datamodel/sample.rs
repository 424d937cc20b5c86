use super::CaosDateTime;

/// One aggregated point of a series: bucket end timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub datetime: CaosDateTime,
    pub value: f64,
}

impl Sample {
    pub fn new(datetime: CaosDateTime, value: f64) -> Self {
        Self { datetime, value }
    }
}
