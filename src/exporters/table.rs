//! Per-project usage summary derived from accounting data.

use std::cmp::Ordering;

use crate::api::Project;
use crate::session::{AccountingData, AccountingMetric};

/// One table row: a project's total over the window and its share of
/// the overall total.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub project: Project,
    pub value: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Value,
    Percent,
}

/// Usage totals per project plus the overall row.
///
/// The overall row's percent is its value divided by itself, which is
/// NaN when nothing was used at all; consumers render that as-is rather
/// than pretending the share is known.
#[derive(Debug, Clone)]
pub struct UsageTable {
    pub overall: UsageRow,
    pub rows: Vec<UsageRow>,
}

impl UsageTable {
    /// Totals are meaningless for ratio metrics, so no table is offered
    /// for efficiency.
    pub fn enabled_for(metric: AccountingMetric) -> bool {
        metric != AccountingMetric::CpuEfficiency
    }

    pub fn from_data(data: &AccountingData) -> UsageTable {
        let overall_value: f64 = data.overall.iter().map(|sample| sample.value).sum();

        let overall = UsageRow {
            project: Project {
                id: String::new(),
                name: crate::session::OVERALL_LABEL.to_string(),
            },
            value: overall_value,
            // shares divide by the overall total, so a zero total reads NaN
            percent: overall_value / overall_value,
        };

        let rows = data
            .projects
            .iter()
            .map(|account| {
                let value: f64 = account.samples.iter().map(|sample| sample.value).sum();
                UsageRow {
                    project: account.project.clone(),
                    value,
                    percent: value / overall_value,
                }
            })
            .collect();

        UsageTable { overall, rows }
    }

    /// Sorts the project rows in place. NaN percents compare as equal,
    /// so their relative order is preserved.
    pub fn sort_by(&mut self, field: SortField, ascending: bool) {
        self.rows.sort_by(|a, b| {
            let ordering = match field {
                SortField::Name => a.project.name.cmp(&b.project.name),
                SortField::Value => a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal),
                SortField::Percent => a
                    .percent
                    .partial_cmp(&b.percent)
                    .unwrap_or(Ordering::Equal),
            };
            if ascending { ordering } else { ordering.reverse() }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{CaosDateTime, CaosDateTimeExt, DateRange, Sample};
    use crate::session::ProjectAccount;
    use hifitime::Epoch;

    fn account(id: &str, name: &str, values: &[f64]) -> ProjectAccount {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                Sample::new(
                    CaosDateTime::from_unix_seconds_f64(1_704_067_200.0 + i as f64 * 3600.0),
                    *value,
                )
            })
            .collect();
        ProjectAccount {
            project: Project {
                id: id.to_string(),
                name: name.to_string(),
            },
            samples,
        }
    }

    fn fixture() -> AccountingData {
        AccountingData {
            metric: AccountingMetric::CpuTime,
            range: DateRange {
                start: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1),
                end: Epoch::from_gregorian_utc_at_midnight(2024, 1, 2),
            },
            granularity_seconds: 3600,
            overall: vec![
                Sample::new(CaosDateTime::from_unix_seconds_f64(1_704_067_200.0), 600.0),
                Sample::new(CaosDateTime::from_unix_seconds_f64(1_704_070_800.0), 400.0),
            ],
            projects: vec![
                account("p1", "astro", &[600.0]),
                account("p2", "bio", &[150.0, 250.0]),
            ],
        }
    }

    #[test]
    fn test_values_and_shares() {
        let table = UsageTable::from_data(&fixture());

        assert_eq!(table.overall.value, 1000.0);
        assert_eq!(table.overall.percent, 1.0);

        assert_eq!(table.rows[0].value, 600.0);
        assert!((table.rows[0].percent - 0.6).abs() < 1e-12);
        assert_eq!(table.rows[1].value, 400.0);
        assert!((table.rows[1].percent - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_zero_overall_gives_nan_share() {
        let mut data = fixture();
        data.overall.clear();
        data.projects = vec![account("p1", "astro", &[])];

        let table = UsageTable::from_data(&data);
        assert_eq!(table.overall.value, 0.0);
        assert!(table.overall.percent.is_nan());
        assert!(table.rows[0].percent.is_nan());
    }

    #[test]
    fn test_sorting() {
        let mut table = UsageTable::from_data(&fixture());

        table.sort_by(SortField::Value, true);
        assert_eq!(table.rows[0].project.name, "bio");

        table.sort_by(SortField::Value, false);
        assert_eq!(table.rows[0].project.name, "astro");

        table.sort_by(SortField::Name, true);
        assert_eq!(table.rows[0].project.name, "astro");
    }

    #[test]
    fn test_not_enabled_for_efficiency() {
        assert!(UsageTable::enabled_for(AccountingMetric::CpuTime));
        assert!(!UsageTable::enabled_for(AccountingMetric::CpuEfficiency));
    }
}
