//! Concurrent series fetching.
//!
//! All series of a view are queried concurrently, but results are
//! emitted in input order so callers can line them up with their
//! configs. Progress is reported through a watch channel as the
//! fraction of series completed. A series that fails is replaced by
//! empty data and reported on the alert channel instead of failing the
//! whole fetch.

use futures::stream::{FuturesOrdered, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::api::{ApiClient, ApiError};
use crate::datamodel::{CaosDateTime, CaosDateTimeExt, DateRange, Sample};
use crate::series::config::{FROM_VARIABLE, GRANULARITY_VARIABLE, SeriesConfig, TO_VARIABLE};

/// Samples fetched for one series, paired with the config that produced
/// them. Samples are sorted by time, ascending.
#[derive(Debug, Clone)]
pub struct SeriesData {
    pub config: Arc<SeriesConfig>,
    pub samples: Vec<Sample>,
}

impl SeriesData {
    /// Empty result standing in for a failed series.
    pub fn empty(config: Arc<SeriesConfig>) -> Self {
        SeriesData {
            config,
            samples: Vec::new(),
        }
    }

    /// Sum of all sample values. Zero for an empty series.
    pub fn sum(&self) -> f64 {
        self.samples.iter().map(|sample| sample.value).sum()
    }
}

/// Notification that part of a fetch went wrong while the rest carried
/// on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAlert {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct WireSample {
    unix_ts: f64,
    v: f64,
}

/// Fetches batches of series over a shared API client.
pub struct SeriesFetcher {
    client: Arc<ApiClient>,
    alerts: mpsc::UnboundedSender<FetchAlert>,
}

impl SeriesFetcher {
    pub fn new(client: Arc<ApiClient>, alerts: mpsc::UnboundedSender<FetchAlert>) -> Self {
        SeriesFetcher { client, alerts }
    }

    /// Starts fetching every config over `range` at `granularity_seconds`.
    /// Configs with a pinned bucket width keep it instead.
    ///
    /// The returned [`SeriesFetch`] yields one [`SeriesData`] per config,
    /// in the order the configs were given, regardless of response
    /// arrival order.
    pub fn query(
        &self,
        configs: &[Arc<SeriesConfig>],
        range: DateRange,
        granularity_seconds: u32,
    ) -> SeriesFetch {
        let total = configs.len();
        let initial = if total == 0 { None } else { Some(0.0) };
        let (progress_tx, progress_rx) = watch::channel(initial);

        let mut pending = FuturesOrdered::new();
        for config in configs {
            let client = Arc::clone(&self.client);
            let config = Arc::clone(config);
            pending.push_back(async move {
                let result = Self::fetch_one(&client, &config, &range, granularity_seconds).await;
                (config, result)
            });
        }

        let alerts = self.alerts.clone();
        let stream = pending.enumerate().map(move |(index, (config, result))| {
            let samples = match result {
                Ok(samples) => samples,
                Err(error) => {
                    warn!("series \"{}\" failed: {}", config.label(), error);
                    let _ = alerts.send(FetchAlert {
                        label: config.label().to_string(),
                        message: error.to_string(),
                    });
                    Vec::new()
                }
            };

            let done = index + 1;
            if done == total {
                let _ = progress_tx.send(Some(1.0));
                let _ = progress_tx.send(None);
            } else {
                let _ = progress_tx.send(Some(done as f64 / total as f64));
            }

            SeriesData {
                config,
                samples,
            }
        });

        SeriesFetch {
            stream: Box::pin(stream),
            progress: progress_rx,
        }
    }

    async fn fetch_one(
        client: &ApiClient,
        config: &SeriesConfig,
        range: &DateRange,
        granularity_seconds: u32,
    ) -> Result<Vec<Sample>, ApiError> {
        let granularity = config
            .granularity_override()
            .unwrap_or(granularity_seconds);

        let mut variables = config.variables();
        variables.insert(
            FROM_VARIABLE.to_string(),
            Value::String(range.start.to_wire()),
        );
        variables.insert(TO_VARIABLE.to_string(), Value::String(range.end.to_wire()));
        variables.insert(GRANULARITY_VARIABLE.to_string(), Value::from(granularity));

        let data = client.graphql(config.query(), Value::Object(variables)).await?;
        let samples = parse_samples(&data)?;
        let mut samples = config.transform(samples);
        samples.sort_by(|a, b| {
            a.datetime
                .partial_cmp(&b.datetime)
                .unwrap_or(Ordering::Equal)
        });
        Ok(samples)
    }
}

/// Extracts samples from a GraphQL data document.
///
/// A missing or null `samples` field means the server had nothing for
/// the window and decodes to an empty list; a present but malformed
/// list is an error.
fn parse_samples(data: &Value) -> Result<Vec<Sample>, ApiError> {
    let samples = match data.get("samples") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(samples) => samples,
    };

    let wire: Vec<WireSample> = serde_json::from_value(samples.clone())?;
    Ok(wire
        .into_iter()
        .map(|sample| {
            Sample::new(
                CaosDateTime::from_unix_seconds_f64(sample.unix_ts),
                sample.v,
            )
        })
        .collect())
}

/// An in-flight fetch: a stream of per-series results plus a progress
/// watch.
pub struct SeriesFetch {
    stream: Pin<Box<dyn Stream<Item = SeriesData> + Send>>,
    progress: watch::Receiver<Option<f64>>,
}

impl SeriesFetch {
    /// Progress as the fraction of series completed. Starts at
    /// `Some(0.0)`, ends at `None` once every series has been emitted.
    /// An empty fetch reports `None` from the start.
    pub fn progress(&self) -> watch::Receiver<Option<f64>> {
        self.progress.clone()
    }

    /// Drains the stream, returning all results in input order.
    pub async fn collect(self) -> Vec<SeriesData> {
        self.stream.collect().await
    }
}

impl Stream for SeriesFetch {
    type Item = SeriesData;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}
