use crate::datamodel::{CaosDateTime, CaosDateTimeExt, Sample};
use crate::session::{AccountingData, OVERALL_LABEL};
use hifitime::Duration;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Escape a field if it contains a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace("\"", "\"\""))
    } else {
        value.to_string()
    }
}

fn sample_at(samples: &[Sample], at: CaosDateTime) -> Option<&Sample> {
    samples.iter().find(|sample| sample.datetime == at)
}

fn hours_cell(samples: &[Sample], at: CaosDateTime) -> String {
    match sample_at(samples, at) {
        Some(sample) => format!("{}", sample.value / SECONDS_PER_HOUR),
        None => "NaN".to_string(),
    }
}

fn hours_total(samples: &[Sample]) -> String {
    let total: f64 = samples.iter().map(|sample| sample.value).sum();
    format!("{}", total / SECONDS_PER_HOUR)
}

/// Converter for accounting data to CSV format
pub struct CsvExporter;

impl CsvExporter {
    /// Render accounting data as CSV.
    ///
    /// One column per series (overall first, then each project), one row
    /// per bucket, and a final row totalling the whole window. Values
    /// arrive in seconds per bucket and are written in hours; a bucket a
    /// series has no sample for is written as `NaN`. Bucket rows carry
    /// the bucket's start and end, the totals row the window's.
    pub fn to_csv(data: &AccountingData) -> String {
        let mut lines: Vec<String> = Vec::new();

        let mut header: Vec<String> = Vec::new();
        header.push("From".to_string());
        header.push("To".to_string());
        header.push(OVERALL_LABEL.to_string());
        for account in &data.projects {
            header.push(csv_field(&account.project.name));
        }
        lines.push(header.join(","));

        // every timestamp seen in any series, ascending
        let mut timestamps: Vec<CaosDateTime> = Vec::new();
        for sample in &data.overall {
            timestamps.push(sample.datetime);
        }
        for account in &data.projects {
            for sample in &account.samples {
                timestamps.push(sample.datetime);
            }
        }
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        timestamps.dedup();

        let bucket = Duration::from_seconds(f64::from(data.granularity_seconds));
        for at in timestamps {
            let mut row: Vec<String> = Vec::new();
            row.push((at - bucket).to_wire());
            row.push(at.to_wire());
            row.push(hours_cell(&data.overall, at));
            for account in &data.projects {
                row.push(hours_cell(&account.samples, at));
            }
            lines.push(row.join(","));
        }

        let mut totals: Vec<String> = Vec::new();
        totals.push(data.range.start.to_wire());
        totals.push(data.range.end.to_wire());
        totals.push(hours_total(&data.overall));
        for account in &data.projects {
            totals.push(hours_total(&account.samples));
        }
        lines.push(totals.join(","));

        lines.join("\n")
    }
}
