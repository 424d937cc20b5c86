//! Accounting session state.
//!
//! An [`AccountingSession`] holds the current metric, date range and
//! granularity selection, refetches accounting data whenever one of
//! them changes, and publishes everything through watch channels so any
//! number of observers can follow along. A subscriber always sees the
//! latest value immediately, then every later change.
//!
//! Selection changes can overlap in-flight fetches. Each fetch takes a
//! generation number; only the fetch holding the latest generation may
//! publish its result, so a slow stale fetch can never overwrite data
//! from a newer selection.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::api::{ApiClient, ApiError, Project};
use crate::datamodel::tag::{HYPERVISOR_TAG_KEY, PROJECT_TAG_KEY};
use crate::datamodel::{AggregateFunction, DateRange, Metric, Sample, TagFilter, metric};
use crate::series::{
    AggregateSeries, ExpressionSeries, FetchAlert, Granularity, SeriesConfig, SeriesConfigError,
    SeriesFetcher, coarsen_to_fit,
};
use futures::StreamExt;

/// Accounting samples are collected in hourly buckets.
pub const ACCOUNTING_PERIOD: u32 = 3600;

/// Label of the pseudo-project aggregating every project.
pub const OVERALL_LABEL: &str = "OVERALL";

/// The metrics the accounting view can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingMetric {
    CpuTime,
    WallClockTime,
    CpuEfficiency,
}

impl AccountingMetric {
    pub const ALL: [AccountingMetric; 3] = [
        AccountingMetric::CpuTime,
        AccountingMetric::WallClockTime,
        AccountingMetric::CpuEfficiency,
    ];

    /// Backend metric name.
    pub fn name(&self) -> &'static str {
        match self {
            AccountingMetric::CpuTime => "cpu",
            AccountingMetric::WallClockTime => "wallclocktime",
            AccountingMetric::CpuEfficiency => "cpu.efficiency",
        }
    }

    /// Catalog metric used when samples are drawn.
    pub fn catalog(&self) -> &'static Metric {
        match self {
            AccountingMetric::CpuTime => &*metric::VM_CPU_TIME_USAGE,
            AccountingMetric::WallClockTime => &*metric::VM_WALLCLOCK_TIME_USAGE,
            AccountingMetric::CpuEfficiency => &*metric::VM_CPU_EFFICIENCY,
        }
    }

    pub fn label(&self) -> &str {
        self.catalog().display_label()
    }
}

impl FromStr for AccountingMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(AccountingMetric::CpuTime),
            "wallclocktime" => Ok(AccountingMetric::WallClockTime),
            "efficiency" | "cpu.efficiency" => Ok(AccountingMetric::CpuEfficiency),
            other => Err(format!(
                "unknown accounting metric \"{other}\", expected cpu, wallclocktime or efficiency"
            )),
        }
    }
}

/// Accounting samples for one project.
#[derive(Debug, Clone)]
pub struct ProjectAccount {
    pub project: Project,
    pub samples: Vec<Sample>,
}

/// One complete accounting fetch: the overall series plus one series per
/// project, all over the same window and granularity.
///
/// Values are in backend units (seconds per bucket for time metrics);
/// exporters convert to display units themselves.
#[derive(Debug, Clone)]
pub struct AccountingData {
    pub metric: AccountingMetric,
    pub range: DateRange,
    pub granularity_seconds: u32,
    pub overall: Vec<Sample>,
    pub projects: Vec<ProjectAccount>,
}

/// Series fetched for the accounting table and report exports.
///
/// Uses pass-through metrics so values stay in backend units: the first
/// entry is the all-projects aggregate, followed by one entry per
/// project in the given order. The efficiency metric has no stored
/// series and is computed server-side from cpu and wallclocktime.
pub fn accounting_plan(
    metric: AccountingMetric,
    projects: &[Project],
) -> Result<Vec<Arc<SeriesConfig>>, SeriesConfigError> {
    let mut configs = Vec::with_capacity(projects.len() + 1);

    configs.push(Arc::new(accounting_series(metric, OVERALL_LABEL, None)?));
    for project in projects {
        configs.push(Arc::new(accounting_series(
            metric,
            &project.name,
            Some(project),
        )?));
    }

    Ok(configs)
}

fn accounting_series(
    metric: AccountingMetric,
    label: &str,
    project: Option<&Project>,
) -> Result<SeriesConfig, SeriesConfigError> {
    match metric {
        AccountingMetric::CpuEfficiency => efficiency_series(label, project),
        AccountingMetric::CpuTime | AccountingMetric::WallClockTime => {
            let series = AggregateSeries::new(Metric::raw(metric.name()), ACCOUNTING_PERIOD)
                .with_label(label)
                .with_aggregate(AggregateFunction::Sum)
                .with_downsample(AggregateFunction::Sum);
            let series = match project {
                Some(project) => {
                    series.filtered_by([TagFilter::value(PROJECT_TAG_KEY, &project.id)])
                }
                None => series.grouped_by(TagFilter::group(PROJECT_TAG_KEY)),
            };
            Ok(SeriesConfig::Aggregate(series))
        }
    }
}

/// Efficiency as a server-side expression over the cpu and
/// wallclocktime series of the same scope.
fn efficiency_series(
    label: &str,
    project: Option<&Project>,
) -> Result<SeriesConfig, SeriesConfigError> {
    let term = |name: &str| {
        let series = AggregateSeries::new(Metric::raw(name), ACCOUNTING_PERIOD)
            .with_aggregate(AggregateFunction::Sum)
            .with_downsample(AggregateFunction::Sum);
        match project {
            Some(project) => series.filtered_by([TagFilter::value(PROJECT_TAG_KEY, &project.id)]),
            None => series.grouped_by(TagFilter::group(PROJECT_TAG_KEY)),
        }
    };

    let mut terms = BTreeMap::new();
    terms.insert("x".to_string(), term("cpu"));
    terms.insert("y".to_string(), term("wallclocktime"));

    let series = ExpressionSeries::new(
        label,
        metric::VM_CPU_EFFICIENCY.clone(),
        "x / y * 100",
        terms,
    )?;
    Ok(SeriesConfig::Expression(series))
}

/// Series drawn on the accounting graph: the overall line, the capacity
/// line where one exists, then one line per project.
///
/// Unlike [`accounting_plan`] this uses catalog metrics, so sample
/// values come out in display units. For the time metrics a TOTAL
/// expression converts the average available cores per bucket into
/// core-hours, giving the capacity ceiling the usage lines run under.
pub fn graph_plan(
    metric: AccountingMetric,
    projects: &[Project],
) -> Result<Vec<Arc<SeriesConfig>>, SeriesConfigError> {
    let mut configs: Vec<Arc<SeriesConfig>> = Vec::with_capacity(projects.len() + 2);

    match metric {
        AccountingMetric::CpuEfficiency => {
            configs.push(Arc::new(efficiency_series(OVERALL_LABEL, None)?));
            for project in projects {
                configs.push(Arc::new(efficiency_series(&project.name, Some(project))?));
            }
        }
        AccountingMetric::CpuTime | AccountingMetric::WallClockTime => {
            let catalog = metric.catalog();
            let capacity: &Metric = match metric {
                AccountingMetric::WallClockTime => &*metric::HYPERVISOR_VCPUS_TOTAL,
                _ => &*metric::HYPERVISOR_CPUS_TOTAL,
            };

            configs.push(Arc::new(SeriesConfig::Aggregate(
                AggregateSeries::new(catalog.clone(), ACCOUNTING_PERIOD)
                    .with_label(OVERALL_LABEL)
                    .grouped_by(TagFilter::group(PROJECT_TAG_KEY))
                    .with_aggregate(AggregateFunction::Sum)
                    .with_downsample(AggregateFunction::Sum),
            )));
            configs.push(Arc::new(total_series(capacity)?));
            for project in projects {
                configs.push(Arc::new(SeriesConfig::Aggregate(
                    AggregateSeries::new(catalog.clone(), ACCOUNTING_PERIOD)
                        .with_label(project.name.as_str())
                        .filtered_by([TagFilter::value(PROJECT_TAG_KEY, &project.id)])
                        .with_aggregate(AggregateFunction::Sum)
                        .with_downsample(AggregateFunction::Sum),
                )));
            }
        }
    }

    Ok(configs)
}

/// Capacity in core-hours per bucket, from the average number of cores
/// available across hypervisors.
fn total_series(capacity: &Metric) -> Result<SeriesConfig, SeriesConfigError> {
    let mut terms = BTreeMap::new();
    terms.insert(
        "x".to_string(),
        AggregateSeries::new(capacity.clone(), 0)
            .grouped_by(TagFilter::group(HYPERVISOR_TAG_KEY))
            .with_aggregate(AggregateFunction::Sum)
            .with_downsample(AggregateFunction::Avg),
    );

    let series = ExpressionSeries::new("TOTAL", capacity.clone(), "x * GRANULARITY/3600", terms)?;
    Ok(SeriesConfig::Expression(series))
}

pub struct AccountingSession {
    client: Arc<ApiClient>,
    fetcher: SeriesFetcher,
    graph_width_pixels: u32,
    max_points_per_pixel: f64,

    metric: watch::Sender<AccountingMetric>,
    date_range: watch::Sender<Option<DateRange>>,
    granularity: watch::Sender<Granularity>,
    projects: watch::Sender<Vec<Project>>,
    data: watch::Sender<Option<Arc<AccountingData>>>,
    progress: watch::Sender<Option<f64>>,

    alerts: mpsc::UnboundedSender<FetchAlert>,
    generation: AtomicU64,
    granularity_advisory_sent: AtomicBool,
}

impl AccountingSession {
    /// Creates a session with the default selection (CPU time, hourly
    /// buckets, no date range yet). Nothing is fetched until a date
    /// range is set.
    ///
    /// The returned receiver carries alerts for series that failed
    /// mid-fetch and for granularity adjustments.
    pub fn new(
        client: Arc<ApiClient>,
        graph_width_pixels: u32,
        max_points_per_pixel: f64,
    ) -> (Arc<AccountingSession>, mpsc::UnboundedReceiver<FetchAlert>) {
        let (alerts_tx, alerts_rx) = mpsc::unbounded_channel();
        let fetcher = SeriesFetcher::new(Arc::clone(&client), alerts_tx.clone());

        let session = AccountingSession {
            client,
            fetcher,
            graph_width_pixels,
            max_points_per_pixel,

            metric: watch::Sender::new(AccountingMetric::CpuTime),
            date_range: watch::Sender::new(None),
            granularity: watch::Sender::new(Granularity::Hour),
            projects: watch::Sender::new(Vec::new()),
            data: watch::Sender::new(None),
            progress: watch::Sender::new(None),

            alerts: alerts_tx,
            generation: AtomicU64::new(0),
            granularity_advisory_sent: AtomicBool::new(false),
        };

        (Arc::new(session), alerts_rx)
    }

    /// Loads the project list and runs the initial fetch if a date
    /// range is already selected.
    pub async fn activate(self: &Arc<Self>) -> Result<(), ApiError> {
        let projects = self.client.projects().await?.to_vec();
        self.projects.send_replace(projects);
        self.refetch();
        Ok(())
    }

    pub fn set_metric(self: &Arc<Self>, metric: AccountingMetric) {
        self.metric.send_replace(metric);
        self.refetch();
    }

    pub fn set_date_range(self: &Arc<Self>, range: DateRange) {
        self.date_range.send_replace(Some(range));
        self.refetch();
    }

    pub fn set_granularity(self: &Arc<Self>, granularity: Granularity) {
        self.granularity.send_replace(granularity);
        self.refetch();
    }

    pub fn watch_metric(&self) -> watch::Receiver<AccountingMetric> {
        self.metric.subscribe()
    }

    pub fn watch_date_range(&self) -> watch::Receiver<Option<DateRange>> {
        self.date_range.subscribe()
    }

    pub fn watch_granularity(&self) -> watch::Receiver<Granularity> {
        self.granularity.subscribe()
    }

    pub fn watch_projects(&self) -> watch::Receiver<Vec<Project>> {
        self.projects.subscribe()
    }

    pub fn watch_data(&self) -> watch::Receiver<Option<Arc<AccountingData>>> {
        self.data.subscribe()
    }

    /// Fetch progress: `None` when idle, otherwise the completed
    /// fraction of the running fetch.
    pub fn watch_progress(&self) -> watch::Receiver<Option<f64>> {
        self.progress.subscribe()
    }

    /// Starts a fetch for the current selection, if complete.
    ///
    /// When the selected granularity would produce more points than the
    /// graph can usefully draw, it is first bumped to the next coarser
    /// preset that fits. The adjustment is published on the granularity
    /// watch and, the first time it happens, explained on the alert
    /// channel.
    fn refetch(self: &Arc<Self>) {
        let Some(range) = *self.date_range.borrow() else {
            return;
        };
        let metric = *self.metric.borrow();
        let requested = *self.granularity.borrow();

        let (granularity, coarsened) = coarsen_to_fit(
            &range,
            requested,
            self.graph_width_pixels,
            self.max_points_per_pixel,
        );
        if coarsened {
            self.granularity.send_replace(granularity);
            if !self.granularity_advisory_sent.swap(true, Ordering::Relaxed) {
                let _ = self.alerts.send(FetchAlert {
                    label: "granularity".to_string(),
                    message: format!(
                        "too many points for the selected window, granularity set to {granularity}"
                    ),
                });
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.send_replace(Some(0.0));

        let session = Arc::clone(self);
        tokio::spawn(async move {
            match session.fetch_accounting(generation, metric, range, granularity).await {
                // Data is published before the progress reset so that a
                // consumer waking on the final `None` always sees it.
                Ok(Some(data)) if session.is_current(generation) => {
                    session.data.send_replace(Some(Arc::new(data)));
                    session.progress.send_replace(None);
                }
                Ok(_) => {
                    debug!("discarding superseded accounting fetch");
                }
                Err(error) => {
                    if session.is_current(generation) {
                        session.progress.send_replace(None);
                    }
                    error!("accounting fetch could not be planned: {error}");
                }
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Runs the accounting fetch plan. Returns `Ok(None)` when a newer
    /// fetch superseded this one while it ran.
    async fn fetch_accounting(
        &self,
        generation: u64,
        metric: AccountingMetric,
        range: DateRange,
        granularity: Granularity,
    ) -> Result<Option<AccountingData>, SeriesConfigError> {
        let projects = self.projects.borrow().clone();
        let configs = accounting_plan(metric, &projects)?;
        let total = configs.len();

        let mut fetch = self.fetcher.query(&configs, range, granularity.seconds());
        let mut results = Vec::with_capacity(total);
        while let Some(series) = fetch.next().await {
            results.push(series);
            if self.is_current(generation) {
                self.progress
                    .send_replace(Some(results.len() as f64 / total as f64));
            }
        }

        if !self.is_current(generation) {
            return Ok(None);
        }

        let mut results = results.into_iter();
        let overall = results.next().map(|series| series.samples).unwrap_or_default();
        let accounts = projects
            .into_iter()
            .zip(results)
            .map(|(project, series)| ProjectAccount {
                project,
                samples: series.samples,
            })
            .collect();

        Ok(Some(AccountingData {
            metric,
            range,
            granularity_seconds: granularity.seconds(),
            overall,
            projects: accounts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn projects() -> Vec<Project> {
        vec![
            Project {
                id: "p1".to_string(),
                name: "astro".to_string(),
            },
            Project {
                id: "p2".to_string(),
                name: "bio".to_string(),
            },
        ]
    }

    #[test]
    fn test_accounting_plan_order_and_labels() {
        let configs = accounting_plan(AccountingMetric::CpuTime, &projects()).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].label(), "OVERALL");
        assert_eq!(configs[1].label(), "astro");
        assert_eq!(configs[2].label(), "bio");
    }

    #[test]
    fn test_accounting_plan_uses_raw_metrics() {
        // report values must stay in backend seconds
        let configs = accounting_plan(AccountingMetric::WallClockTime, &projects()).unwrap();
        for config in &configs {
            assert_eq!(config.metric().scale, 1.0);
        }
    }

    #[test]
    fn test_accounting_plan_scopes() {
        let configs = accounting_plan(AccountingMetric::CpuTime, &projects()).unwrap();

        let overall = Value::Object(configs[0].variables());
        assert_eq!(overall["series"]["tag"]["key"], "project");
        assert!(overall["series"].get("tags").is_none());

        let project = Value::Object(configs[1].variables());
        assert!(project["series"].get("tag").is_none());
        assert_eq!(project["series"]["tags"][0]["value"], "p1");
    }

    #[test]
    fn test_accounting_plan_efficiency_uses_expression() {
        let configs = accounting_plan(AccountingMetric::CpuEfficiency, &projects()).unwrap();
        for config in configs.iter() {
            assert!(matches!(config.as_ref(), SeriesConfig::Expression(_)));
            let variables = Value::Object(config.variables());
            assert_eq!(variables["expression"], "x / y * 100");
            assert_eq!(variables["terms"][0]["series"]["metric"]["name"], "cpu");
            assert_eq!(
                variables["terms"][1]["series"]["metric"]["name"],
                "wallclocktime"
            );
        }
    }

    #[test]
    fn test_graph_plan_includes_capacity_line() {
        let configs = graph_plan(AccountingMetric::CpuTime, &projects()).unwrap();
        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0].label(), "OVERALL");
        assert_eq!(configs[1].label(), "TOTAL");
        assert_eq!(configs[2].label(), "astro");

        let total = Value::Object(configs[1].variables());
        assert_eq!(total["expression"], "x * GRANULARITY/3600");
        assert_eq!(
            total["terms"][0]["series"]["metric"]["name"],
            "hypervisor.cpus.total"
        );
        assert_eq!(total["terms"][0]["series"]["period"], 0);
        assert_eq!(total["terms"][0]["downsample"], "AVG");
        assert_eq!(total["terms"][0]["function"], "SUM");
    }

    #[test]
    fn test_graph_plan_wallclock_capacity_metric() {
        let configs = graph_plan(AccountingMetric::WallClockTime, &projects()).unwrap();
        let total = Value::Object(configs[1].variables());
        assert_eq!(
            total["terms"][0]["series"]["metric"]["name"],
            "hypervisor.vcpus.total"
        );
    }

    #[test]
    fn test_graph_plan_efficiency_has_no_capacity_line() {
        let configs = graph_plan(AccountingMetric::CpuEfficiency, &projects()).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].label(), "OVERALL");
        assert!(configs.iter().all(|c| c.label() != "TOTAL"));
    }

    #[test]
    fn test_graph_plan_uses_catalog_scale() {
        let configs = graph_plan(AccountingMetric::CpuTime, &projects()).unwrap();
        // graph samples are converted from seconds to hours
        assert!((configs[0].metric().scale - 1.0 / 3600.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!(
            "cpu".parse::<AccountingMetric>().unwrap(),
            AccountingMetric::CpuTime
        );
        assert_eq!(
            "efficiency".parse::<AccountingMetric>().unwrap(),
            AccountingMetric::CpuEfficiency
        );
        assert!("disk".parse::<AccountingMetric>().is_err());
    }

    #[test]
    fn test_metric_labels() {
        assert_eq!(AccountingMetric::CpuTime.label(), "CPU Time");
        assert_eq!(AccountingMetric::WallClockTime.label(), "Wall Clock Time");
        assert_eq!(AccountingMetric::CpuEfficiency.label(), "CPU Efficiency");
    }
}
