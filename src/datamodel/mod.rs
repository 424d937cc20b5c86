pub mod aggregate;
pub mod caos_datetime;
pub mod date_range;
pub mod metric;
pub mod sample;
pub mod tag;

pub use aggregate::AggregateFunction;
pub use caos_datetime::{CaosDateTime, CaosDateTimeExt};
pub use date_range::{DatePreset, DateRange};
pub use metric::Metric;
pub use sample::Sample;
pub use tag::TagFilter;
