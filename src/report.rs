//! Text, CSV and JSON reports of request statistics.

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::percentiles::{percentile_label, REPORTED_PERCENTILES};
use crate::stats::{EntrySnapshot, StatsSnapshot};

/// Errors that can occur while writing reports.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write report file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

const NAME_WIDTH: usize = 54;

fn truncate_name(name: &str) -> String {
    if name.chars().count() <= NAME_WIDTH {
        name.to_string()
    } else {
        let head: String = name.chars().take(NAME_WIDTH - 3).collect();
        format!("{}...", head)
    }
}

fn format_stats_row(entry: &EntrySnapshot) -> String {
    let fails = format!(
        "{}({:.2}%)",
        entry.num_failures,
        entry.fail_ratio * 100.0
    );
    format!(
        "{:<8} {:<width$} {:>7} {:>12} | {:>7.0} {:>7.0} {:>7.0} {:>7.0} | {:>7.2} {:>11.2}",
        entry.method,
        truncate_name(&entry.name),
        entry.num_requests,
        fails,
        entry.avg_response_time_ms,
        entry.min_response_time_ms,
        entry.max_response_time_ms,
        entry.median_response_time_ms,
        entry.requests_per_sec,
        entry.failures_per_sec,
        width = NAME_WIDTH,
    )
}

fn separator() -> String {
    format!(
        "{}|{}|{}|{}\n",
        "-".repeat(8),
        "-".repeat(NAME_WIDTH + 23),
        "-".repeat(33),
        "-".repeat(20)
    )
}

/// Request statistics table with an aggregated row.
pub fn format_stats_table(snapshot: &StatsSnapshot) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<8} {:<width$} {:>7} {:>12} | {:>7} {:>7} {:>7} {:>7} | {:>7} {:>11}\n",
        "Type",
        "Name",
        "# reqs",
        "# fails",
        "Avg",
        "Min",
        "Max",
        "Med",
        "req/s",
        "failures/s",
        width = NAME_WIDTH,
    ));
    output.push_str(&separator());

    for entry in &snapshot.entries {
        output.push_str(&format_stats_row(entry));
        output.push('\n');
    }

    output.push_str(&separator());
    output.push_str(&format_stats_row(&snapshot.total));
    output.push('\n');
    output
}

/// Response time percentiles per entry, in milliseconds.
pub fn format_percentiles_table(snapshot: &StatsSnapshot) -> String {
    let mut output = String::from("Response time percentiles (approximated)\n");
    output.push_str(&format!("{:<8} {:<width$}", "Type", "Name", width = NAME_WIDTH));
    for quantile in REPORTED_PERCENTILES {
        output.push_str(&format!(" {:>7}", percentile_label(quantile)));
    }
    output.push_str(&format!(" {:>7}\n", "# reqs"));
    output.push_str(&"-".repeat(NAME_WIDTH + 9 + REPORTED_PERCENTILES.len() * 8 + 8));
    output.push('\n');

    let rows = snapshot.entries.iter().chain(std::iter::once(&snapshot.total));
    for entry in rows {
        output.push_str(&format!(
            "{:<8} {:<width$}",
            entry.method,
            truncate_name(&entry.name),
            width = NAME_WIDTH
        ));
        for value in &entry.percentiles_ms {
            output.push_str(&format!(" {:>7.0}", value));
        }
        output.push_str(&format!(" {:>7}\n", entry.num_requests));
    }
    output
}

/// Distinct failures with their occurrence counts.
pub fn format_failures_table(snapshot: &StatsSnapshot) -> String {
    if snapshot.errors.is_empty() {
        return String::from("Error report\nNo failures.\n");
    }

    let mut output = String::from("Error report\n");
    output.push_str(&format!("{:>12}  {}\n", "# occurrences", "Error"));
    output.push_str(&"-".repeat(80));
    output.push('\n');
    for error in &snapshot.errors {
        output.push_str(&format!(
            "{:>12}  {} {}: {}\n",
            error.occurrences, error.method, error.name, error.error
        ));
    }
    output
}

fn stats_header() -> Vec<String> {
    let mut header: Vec<String> = [
        "Type",
        "Name",
        "Request Count",
        "Failure Count",
        "Median Response Time",
        "Average Response Time",
        "Min Response Time",
        "Max Response Time",
        "Average Content Size",
        "Requests/s",
        "Failures/s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(REPORTED_PERCENTILES.iter().map(|q| percentile_label(*q)));
    header
}

fn stats_record(entry: &EntrySnapshot) -> Vec<String> {
    let mut record = vec![
        entry.method.clone(),
        entry.name.clone(),
        entry.num_requests.to_string(),
        entry.num_failures.to_string(),
        format!("{:.0}", entry.median_response_time_ms),
        format!("{:.2}", entry.avg_response_time_ms),
        format!("{:.2}", entry.min_response_time_ms),
        format!("{:.2}", entry.max_response_time_ms),
        format!("{:.2}", entry.avg_content_length),
        format!("{:.6}", entry.requests_per_sec),
        format!("{:.6}", entry.failures_per_sec),
    ];
    if entry.num_requests == 0 {
        record.extend(REPORTED_PERCENTILES.iter().map(|_| "N/A".to_string()));
    } else {
        record.extend(entry.percentiles_ms.iter().map(|v| format!("{:.0}", v)));
    }
    record
}

/// Writes `<prefix>_stats.csv` and `<prefix>_failures.csv`.
///
/// Returns the paths of the two files.
pub fn write_csv(prefix: &str, snapshot: &StatsSnapshot) -> Result<(PathBuf, PathBuf), ReportError> {
    let stats_path = PathBuf::from(format!("{}_stats.csv", prefix));
    let failures_path = PathBuf::from(format!("{}_failures.csv", prefix));

    let mut stats_writer = csv::Writer::from_path(&stats_path)?;
    stats_writer.write_record(stats_header())?;
    for entry in &snapshot.entries {
        stats_writer.write_record(stats_record(entry))?;
    }
    stats_writer.write_record(stats_record(&snapshot.total))?;
    stats_writer.flush()?;

    let mut failures_writer = csv::Writer::from_path(&failures_path)?;
    failures_writer.write_record(["Method", "Name", "Error", "Occurrences"])?;
    for error in &snapshot.errors {
        failures_writer.write_record([
            error.method.as_str(),
            error.name.as_str(),
            error.error.as_str(),
            error.occurrences.to_string().as_str(),
        ])?;
    }
    failures_writer.flush()?;

    info!(
        stats = %stats_path.display(),
        failures = %failures_path.display(),
        "CSV reports written"
    );
    Ok((stats_path, failures_path))
}

pub fn to_json(snapshot: &StatsSnapshot) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Writes the JSON summary to `path`.
pub fn write_json(path: &Path, snapshot: &StatsSnapshot) -> Result<(), ReportError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, snapshot)?;
    info!(path = %path.display(), "JSON summary written");
    Ok(())
}
