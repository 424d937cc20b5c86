pub mod config;
pub mod fetch;
pub mod granularity;

pub use config::{AggregateSeries, ExpressionSeries, SeriesConfig, SeriesConfigError};
pub use fetch::{FetchAlert, SeriesData, SeriesFetch, SeriesFetcher};
pub use granularity::{Granularity, check_ppp, coarsen_to_fit};
