use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::dataset::Sample;
use crate::harness::{ExampleImage, ExcludedSample, SplitReport};
use crate::summary::{EvaluationRecord, SplitSummary};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to save image: {0}")]
    Image(#[from] image::ImageError),
}

/// Files written for one split.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub records_csv: PathBuf,
    pub summary_json: PathBuf,
    pub examples: Vec<PathBuf>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    file: &'a str,
    mode: &'a str,
    chosen_mode: &'a str,
    margin: String,
    base_char_acc: String,
    pre_char_acc: String,
    delta: String,
    base_conf: String,
    pre_conf: String,
    base_score: String,
    pre_score: String,
    gt_preview: &'a str,
    base_preview: &'a str,
    pre_preview: &'a str,
}

impl<'a> CsvRow<'a> {
    fn new(r: &'a EvaluationRecord) -> Self {
        let auto = r.mode == "auto";
        Self {
            file: &r.id,
            mode: &r.mode,
            chosen_mode: &r.chosen_variant,
            margin: if auto { format!("{:.2}", r.margin) } else { String::new() },
            base_char_acc: format!("{:.4}", r.baseline_accuracy),
            pre_char_acc: format!("{:.4}", r.auto_accuracy),
            delta: format!("{:.4}", r.delta()),
            base_conf: format!("{:.4}", r.baseline_confidence),
            pre_conf: format!("{:.4}", r.auto_confidence),
            base_score: format!("{:.4}", r.baseline_score),
            pre_score: format!("{:.4}", r.auto_score),
            gt_preview: &r.ground_truth_preview,
            base_preview: &r.baseline_preview,
            pre_preview: &r.auto_preview,
        }
    }
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    summary: &'a SplitSummary,
    cancelled: bool,
    excluded: &'a [ExcludedSample],
}

/// Base name shared by a split's output files. Auto runs embed the margin
/// so margin sweeps don't overwrite each other.
pub fn output_stem(summary: &SplitSummary) -> String {
    let mut stem = format!("sroie_{}_{}", summary.split, summary.mode);
    if summary.mode == "auto" {
        stem.push_str(&format!("_m{:.2}", summary.margin));
    }
    stem
}

pub fn write_records_csv(path: &Path, records: &[EvaluationRecord]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    if records.is_empty() {
        writer.write_record([
            "file",
            "mode",
            "chosen_mode",
            "margin",
            "base_char_acc",
            "pre_char_acc",
            "delta",
            "base_conf",
            "pre_conf",
            "base_score",
            "pre_score",
            "gt_preview",
            "base_preview",
            "pre_preview",
        ])?;
    }
    for record in records {
        writer.serialize(CsvRow::new(record))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, report: &SplitReport) -> Result<(), ReportError> {
    let doc = SummaryDocument {
        generated_at: Utc::now(),
        summary: &report.summary,
        cancelled: report.cancelled,
        excluded: &report.excluded,
    };
    std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

/// Save each example as `<stem>_processed_<variant>.png` under `dir`.
pub fn save_examples(dir: &Path, examples: &[ExampleImage]) -> Result<Vec<PathBuf>, ReportError> {
    std::fs::create_dir_all(dir)?;
    examples
        .iter()
        .map(|example| -> Result<PathBuf, ReportError> {
            let path = dir.join(format!("{}_processed_{}.png", Sample::stem(&example.id), example.variant));
            example.image.save(&path)?;
            Ok(path)
        })
        .collect()
}

/// Write the CSV, the JSON summary and any example images into `out_dir`.
pub fn write_report(out_dir: &Path, report: &SplitReport) -> Result<ReportPaths, ReportError> {
    std::fs::create_dir_all(out_dir)?;
    let stem = output_stem(&report.summary);

    let records_csv = out_dir.join(format!("{stem}_results.csv"));
    write_records_csv(&records_csv, &report.records)?;

    let summary_json = out_dir.join(format!("{stem}_summary.json"));
    write_summary_json(&summary_json, report)?;

    let examples = if report.examples.is_empty() {
        Vec::new()
    } else {
        save_examples(&out_dir.join(&stem), &report.examples)?
    };

    tracing::info!(csv = %records_csv.display(), summary = %summary_json.display(), "Report written");
    Ok(ReportPaths { records_csv, summary_json, examples })
}
