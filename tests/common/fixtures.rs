//! Accounting data fixtures shared by exporter and session tests.

use caos_dashboard::api::Project;
use caos_dashboard::session::{AccountingData, AccountingMetric, ProjectAccount};
use caos_dashboard::test_utils::{samples_hourly, test_range};

pub fn project(id: &str, name: &str) -> Project {
    Project {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// CPU time for two projects over two hourly buckets.
///
/// Values are in backend units (seconds per bucket): the overall series
/// is the sum of the project series, as the API would report it.
pub fn two_project_accounting() -> AccountingData {
    AccountingData {
        metric: AccountingMetric::CpuTime,
        range: test_range(),
        granularity_seconds: 3600,
        overall: samples_hourly(&[7200.0, 3600.0]),
        projects: vec![
            ProjectAccount {
                project: project("p1", "astro"),
                samples: samples_hourly(&[3600.0, 1800.0]),
            },
            ProjectAccount {
                project: project("p2", "bio"),
                samples: samples_hourly(&[1800.0, 900.0]),
            },
        ],
    }
}
