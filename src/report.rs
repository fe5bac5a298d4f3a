//! Flat-file export of an experiment run.

use crate::error::ReportError;
use crate::experiment::{ExperimentLog, ExperimentSummary, IterationRecord};
use std::fs;
use std::path::{Path, PathBuf};

pub const CSV_HEADER: &str =
    "iteration,scenario_type,attack_amount,threshold,triggered,success,block_diff,gas_cost,status_label";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub csv: PathBuf,
    pub summary: PathBuf,
}

pub fn csv_row(record: &IterationRecord) -> String {
    match record {
        IterationRecord::Completed(done) => format!(
            "{},{},{:.2},{},{},{},{},{},{}",
            done.iteration,
            done.attack_kind.as_str(),
            done.attempt.magnitude,
            done.threshold,
            done.outcome.triggered,
            done.outcome.defended,
            done.outcome
                .block_diff()
                .map(|diff| diff.to_string())
                .unwrap_or_default(),
            done.outcome.gas_cost,
            done.outcome.status.as_str()
        ),
        IterationRecord::Errored(failed) => format!(
            "{},{},{},{},,false,,{},{}",
            failed.iteration,
            failed.attack_kind.as_str(),
            failed
                .magnitude
                .map(|m| format!("{m:.2}"))
                .unwrap_or_default(),
            failed.threshold,
            failed.gas_cost,
            record.status_label()
        ),
    }
}

pub fn render_csv(log: &ExperimentLog) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + log.len() * 96);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for record in log.records() {
        out.push_str(&csv_row(record));
        out.push('\n');
    }
    out
}

/// Writes `<stem>.csv` and `<stem>_summary.json` under `dir`, creating it when needed.
pub fn write_exports(
    dir: &Path,
    stem: &str,
    log: &ExperimentLog,
    summary: &ExperimentSummary,
) -> Result<ExportPaths, ReportError> {
    fs::create_dir_all(dir)?;
    let csv = dir.join(format!("{stem}.csv"));
    fs::write(&csv, render_csv(log))?;
    let summary_path = dir.join(format!("{stem}_summary.json"));
    fs::write(&summary_path, serde_json::to_vec_pretty(summary)?)?;
    tracing::info!(
        "[REPORT] wrote {} rows to {} and summary to {}",
        log.len(),
        csv.display(),
        summary_path.display()
    );
    Ok(ExportPaths {
        csv,
        summary: summary_path,
    })
}
