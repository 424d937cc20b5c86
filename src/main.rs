#![forbid(unsafe_code)]
use crate::api::ApiClient;
use crate::config::CaosConfig;
use crate::config::load_configuration;
use crate::datamodel::date_range::midnight_utc;
use crate::datamodel::{CaosDateTime, CaosDateTimeExt, DateRange};
use crate::exporters::{CsvExporter, SortField, UsageRow, UsageTable};
use crate::overview::{HypervisorOverview, ProjectOverview, UsageClass, usage_class};
use crate::series::Granularity;
use crate::session::{AccountingData, AccountingMetric, AccountingSession};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing::event;
mod api;
mod config;
mod datamodel;
mod exporters;
mod overview;
mod series;
mod session;

#[derive(Debug, Parser)]
#[command(
    name = "caos-dashboard",
    version,
    about = "Command line client for the CAOS cloud accounting API"
)]
struct Cli {
    /// API username, overriding the configured one.
    #[arg(long, global = true)]
    username: Option<String>,

    /// API password, overriding the configured one.
    #[arg(long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the API status and whether the stored credentials are accepted.
    Status,

    /// List the projects known to the API.
    Projects,

    /// Latest resource usage per project or per hypervisor.
    Overview {
        /// What to summarise, projects by default.
        #[arg(value_enum)]
        kind: Option<OverviewKind>,
    },

    /// Per-project accounting over a date range, one CSV row per bucket.
    Report {
        /// Accounting metric: cpu, wallclocktime or efficiency.
        #[arg(long, default_value = "cpu")]
        metric: AccountingMetric,

        /// Start of the window, e.g. 2024-01-01T00:00:00Z. Defaults to a
        /// week before the end.
        #[arg(long)]
        from: Option<String>,

        /// End of the window. Defaults to today at midnight UTC.
        #[arg(long)]
        to: Option<String>,

        /// Bucket width: hour, day or week.
        #[arg(long, default_value = "hour")]
        granularity: Granularity,

        /// Write the CSV here instead of stdout.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Per-project usage totals over a date range.
    Usage {
        /// Accounting metric: cpu or wallclocktime.
        #[arg(long, default_value = "cpu")]
        metric: AccountingMetric,

        /// Start of the window. Defaults to a week before the end.
        #[arg(long)]
        from: Option<String>,

        /// End of the window. Defaults to today at midnight UTC.
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OverviewKind {
    Projects,
    Hypervisors,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install CryptoProvider: {:?}", e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Initialize tracing subscriber for command logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load configuration
    load_configuration().context("Failed to load configuration")?;
    let config = config::get().context("Failed to get configuration")?;

    // Initialize Sentry if DSN is provided
    let _sentry = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                debug: true,
                ..Default::default()
            },
        ))
    });

    // Exit the program if a panic occurs
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let base_url = config
        .parse_api_url()
        .context("Failed to parse the API URL")?;
    eprintln!("📡 CAOS API at {}", base_url);

    let client = Arc::new(
        ApiClient::new(
            base_url,
            std::time::Duration::from_secs(config.api_timeout_seconds),
        )
        .context("Failed to create the API client")?,
    );

    // Log in when credentials are given, flags taking precedence over
    // the configuration. Anonymous access still covers the read-only
    // endpoints.
    let username = cli.username.as_deref().or(config.username.as_deref());
    let password = cli.password.as_deref().or(config.password.as_deref());
    if let (Some(username), Some(password)) = (username, password) {
        let authenticated = client
            .login(username, password)
            .await
            .context("Login failed")?;
        if authenticated {
            eprintln!("✅ Authenticated as {}", username);
        } else {
            event!(Level::WARN, "The API issued a token but reports auth=no");
        }
    }

    match run(&cli.command, &client, &config).await {
        Ok(()) => Ok(()),
        Err(error) => {
            event!(Level::ERROR, "Command failed: {:?}", error);
            Err(error)
        }
    }
}

async fn run(command: &Command, client: &Arc<ApiClient>, config: &CaosConfig) -> Result<()> {
    match command {
        Command::Status => {
            let status = client.status().await?;
            println!("status:  {}", status.status);
            println!("version: {}", status.version);
            println!("auth:    {}", if status.auth { "yes" } else { "no" });
        }

        Command::Projects => {
            for project in client.projects().await? {
                println!("{}  {}", project.id, project.name);
            }
        }

        Command::Overview { kind } => match kind.unwrap_or(OverviewKind::Projects) {
            OverviewKind::Projects => print_project_overview(client).await?,
            OverviewKind::Hypervisors => print_hypervisor_overview(client).await?,
        },

        Command::Report {
            metric,
            from,
            to,
            granularity,
            output,
        } => {
            let range = parse_range(from.as_deref(), to.as_deref())?;
            let data = fetch_accounting_data(client, config, *metric, range, *granularity).await?;
            let csv = CsvExporter::to_csv(&data);
            match output {
                Some(path) => std::fs::write(path, csv)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{}", csv),
            }
        }

        Command::Usage { metric, from, to } => {
            if !UsageTable::enabled_for(*metric) {
                bail!(
                    "per-project totals are not meaningful for {}",
                    metric.label()
                );
            }
            let range = parse_range(from.as_deref(), to.as_deref())?;
            let data =
                fetch_accounting_data(client, config, *metric, range, Granularity::Hour).await?;
            let mut table = UsageTable::from_data(&data);
            table.sort_by(SortField::Value, false);
            print_usage_table(*metric, &table);
        }
    }

    Ok(())
}

fn parse_range(from: Option<&str>, to: Option<&str>) -> Result<DateRange> {
    let end = match to {
        Some(wire) => CaosDateTime::from_wire(wire)?,
        None => midnight_utc(CaosDateTime::now().context("System time unavailable")?),
    };
    let start = match from {
        Some(wire) => CaosDateTime::from_wire(wire)?,
        None => end - hifitime::Duration::from_days(7.0),
    };
    if start >= end {
        bail!(
            "empty date range: {} is not before {}",
            start.to_wire(),
            end.to_wire()
        );
    }
    Ok(DateRange { start, end })
}

/// Runs one accounting fetch through a session and waits for the result.
///
/// The session publishes data before clearing the progress watch, so once
/// progress reads `None` the data watch already holds the final value.
async fn fetch_accounting_data(
    client: &Arc<ApiClient>,
    config: &CaosConfig,
    metric: AccountingMetric,
    range: DateRange,
    granularity: Granularity,
) -> Result<Arc<AccountingData>> {
    let (session, mut alerts) = AccountingSession::new(
        Arc::clone(client),
        config.graph_width_pixels,
        config.max_points_per_pixel,
    );
    session
        .activate()
        .await
        .context("Failed to load the project list")?;
    session.set_metric(metric);
    session.set_granularity(granularity);

    let mut data_rx = session.watch_data();
    session.set_date_range(range);

    let mut progress_rx = session.watch_progress();
    progress_rx
        .wait_for(|progress| progress.is_none())
        .await
        .context("The accounting session terminated early")?;

    let data = data_rx.borrow_and_update().clone();

    while let Ok(alert) = alerts.try_recv() {
        eprintln!("warning: {}: {}", alert.label, alert.message);
    }

    data.context("The accounting fetch produced no data")
}

fn print_usage_table(metric: AccountingMetric, table: &UsageTable) {
    println!(
        "{:<28} {:>14} {:>8}",
        "project",
        metric.catalog().unit,
        "share"
    );
    print_usage_row(&table.overall);
    for row in &table.rows {
        print_usage_row(row);
    }
}

fn print_usage_row(row: &UsageRow) {
    println!(
        "{:<28} {:>14.2} {:>7.1}%",
        row.project.name,
        row.value / 3600.0,
        row.percent * 100.0,
    );
}

fn class_marker(percent: f64) -> &'static str {
    match usage_class(percent) {
        UsageClass::Danger => "!!",
        UsageClass::Warning => "!",
        UsageClass::Success => "",
    }
}

async fn print_project_overview(client: &ApiClient) -> Result<()> {
    let projects = overview::project_overview(client).await?;

    for project in &projects {
        println!(
            "{:<28} vcpus {:>5.1}%{:<2} memory {:>5.1}%{:<2} vms {}/{}",
            project.name(),
            project.vcpus_usage_percent(),
            class_marker(project.vcpus_usage_percent()),
            project.memory_usage_percent(),
            class_marker(project.memory_usage_percent()),
            project.vms_active,
            project.vms_total,
        );
    }

    let overall = ProjectOverview::overall(&projects);
    println!(
        "{:<28} vcpus {:>5.1}%   memory {:>5.1}%   vms {}/{}",
        "OVERALL",
        overall.vcpus_usage_percent(),
        overall.memory_usage_percent(),
        overall.vms_active,
        overall.vms_total,
    );

    Ok(())
}

async fn print_hypervisor_overview(client: &ApiClient) -> Result<()> {
    let hypervisors = overview::hypervisor_overview(client).await?;

    for hypervisor in &hypervisors {
        let state = if hypervisor.is_enabled() {
            "enabled"
        } else {
            "disabled"
        };
        println!(
            "{:<24} {:<8} vcpus {:>5.1}%{:<2} ram {:>5.1}%{:<2} load {:.2}",
            hypervisor.hostname,
            state,
            hypervisor.vcpus_used_percent(),
            class_marker(hypervisor.vcpus_used_percent()),
            hypervisor.ram_used_percent(),
            class_marker(hypervisor.ram_used_percent()),
            hypervisor.load_15m,
        );
    }

    let totals = HypervisorOverview::totals(&hypervisors);
    println!(
        "{:<24} {:<8} vcpus {:>5.1}%   ram {:>5.1}%   load {:.2}",
        "TOTAL",
        "enabled",
        totals.vcpus_used_percent(),
        totals.ram_used_percent(),
        totals.load_15m,
    );

    Ok(())
}
