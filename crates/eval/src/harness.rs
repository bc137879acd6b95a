use image::GrayImage;
use ocrmode_core::normalize_text;
use ocrmode_ocr::preprocess::load_image_from_bytes;
use ocrmode_ocr::{OcrBackend, PipelineError, Selection, SelectionPipeline};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::accuracy::char_accuracy;
use crate::dataset::Sample;
use crate::summary::{EvaluationRecord, SplitSummary, SummaryAccumulator};

/// Samples between progress log lines.
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Unknown variant: '{0}'")]
    UnknownVariant(String),
    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,
}

/// What the "auto" column of a run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalMode {
    /// The adaptive selector.
    Auto,
    /// Always one named variant, compared against the baseline.
    Fixed(String),
}

impl EvalMode {
    pub fn label(&self) -> &str {
        match self {
            EvalMode::Auto => "auto",
            EvalMode::Fixed(name) => name,
        }
    }
}

impl From<&str> for EvalMode {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("auto") {
            EvalMode::Auto
        } else {
            EvalMode::Fixed(s.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub mode: EvalMode,
    pub concurrency: usize,
    pub preview_chars: usize,
    /// Keep the chosen image of this many leading samples for export.
    pub keep_images: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self { mode: EvalMode::Auto, concurrency: 4, preview_chars: 160, keep_images: 0 }
    }
}

/// Why a sample was left out of the aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    /// Annotation missing, unreadable or without transcriptions.
    GroundTruth,
    /// Image bytes missing, undecodable or zero-sized.
    EmptyInput,
    /// Anything else: baseline failure, runtime error, panicked task.
    Failed,
}

/// A sample left out of the aggregates, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedSample {
    pub id: String,
    pub kind: ExclusionKind,
    pub reason: String,
}

/// Chosen variant image of an evaluated sample.
#[derive(Debug, Clone)]
pub struct ExampleImage {
    pub id: String,
    pub variant: String,
    pub image: Arc<GrayImage>,
}

#[derive(Debug, Clone)]
pub struct SplitReport {
    pub summary: SplitSummary,
    /// In dataset order.
    pub records: Vec<EvaluationRecord>,
    pub excluded: Vec<ExcludedSample>,
    pub examples: Vec<ExampleImage>,
    /// True when the run was cancelled before every sample finished.
    pub cancelled: bool,
}

enum SampleOutcome {
    Evaluated(EvaluationRecord, Option<ExampleImage>),
    Excluded(ExcludedSample),
}

/// Evaluate every sample of a split and summarize baseline against the
/// selected output.
///
/// Samples run on a bounded worker pool; the report keeps dataset order.
/// A failing sample is excluded and counted, never aborting the run.
/// Cancelling `cancel` stops scheduling, aborts in-flight samples and
/// returns what had completed.
pub async fn evaluate_split<R: OcrBackend>(
    pipeline: Arc<SelectionPipeline<R>>,
    split: &str,
    samples: Vec<Sample>,
    options: &HarnessOptions,
    cancel: CancellationToken,
) -> Result<SplitReport, HarnessError> {
    if options.concurrency == 0 {
        return Err(HarnessError::ZeroConcurrency);
    }
    if let EvalMode::Fixed(name) = &options.mode {
        if !pipeline.config().menu.iter().any(|v| &v.name == name) {
            return Err(HarnessError::UnknownVariant(name.clone()));
        }
    }

    let margin = pipeline.config().selector.margin;
    let total = samples.len();
    tracing::info!(split, mode = options.mode.label(), margin, samples = total, "Evaluation started");

    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<Id, (usize, String)> = HashMap::with_capacity(total);
    let mut slots: Vec<Option<SampleOutcome>> = (0..total).map(|_| None).collect();
    let mut cancelled = false;

    for (index, sample) in samples.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let pipeline = Arc::clone(&pipeline);
        let options = options.clone();
        let sample_id = sample.id.clone();
        let handle = tasks.spawn(async move {
            let _permit = permit;
            let keep_image = index < options.keep_images;
            (index, evaluate_sample(&pipeline, sample, &options, keep_image).await)
        });
        pending.insert(handle.id(), (index, sample_id));
    }

    let mut finished = 0usize;
    while !cancelled {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            joined = tasks.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        if settle(&mut slots, &pending, joined) {
            finished += 1;
            if finished % PROGRESS_EVERY == 0 {
                tracing::info!(split, finished, total, "Evaluation progress");
            }
        }
    }

    if cancelled {
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            settle(&mut slots, &pending, joined);
        }
        tracing::warn!(split, "Evaluation cancelled; reporting completed samples only");
    }

    let mut acc = SummaryAccumulator::new(split, options.mode.label(), margin);
    let mut records = Vec::new();
    let mut excluded = Vec::new();
    let mut examples = Vec::new();
    for outcome in slots.into_iter().flatten() {
        match outcome {
            SampleOutcome::Evaluated(record, example) => {
                acc.push(&record);
                records.push(record);
                examples.extend(example);
            }
            SampleOutcome::Excluded(sample) => {
                acc.exclude();
                excluded.push(sample);
            }
        }
    }

    let summary = acc.finish();
    tracing::info!(
        split,
        mode = %summary.mode,
        samples = summary.sample_count,
        excluded = summary.excluded_count,
        baseline_mean = summary.baseline_mean_accuracy,
        auto_mean = summary.auto_mean_accuracy,
        improved = summary.improved_count,
        "Split summary"
    );

    Ok(SplitReport { summary, records, excluded, examples, cancelled })
}

/// Store the outcome of a joined sample task. A panicked task is recorded as
/// an exclusion of its sample; an aborted one leaves the slot empty.
/// Returns whether a slot was filled.
fn settle(
    slots: &mut [Option<SampleOutcome>],
    pending: &HashMap<Id, (usize, String)>,
    joined: Result<(usize, SampleOutcome), JoinError>,
) -> bool {
    match joined {
        Ok((index, outcome)) => {
            slots[index] = Some(outcome);
            true
        }
        Err(e) if e.is_panic() => {
            let Some((index, id)) = pending.get(&e.id()) else {
                tracing::error!(error = %e, "Untracked sample task panicked");
                return false;
            };
            tracing::error!(sample = %id, error = %e, "Sample task panicked");
            slots[*index] = Some(SampleOutcome::Excluded(ExcludedSample {
                id: id.clone(),
                kind: ExclusionKind::Failed,
                reason: format!("Sample task panicked: {e}"),
            }));
            true
        }
        Err(_) => false,
    }
}

async fn evaluate_sample<R: OcrBackend>(
    pipeline: &SelectionPipeline<R>,
    sample: Sample,
    options: &HarnessOptions,
    keep_image: bool,
) -> SampleOutcome {
    let exclude = |kind: ExclusionKind, reason: String| {
        tracing::warn!(sample = %sample.id, ?kind, %reason, "Sample excluded");
        SampleOutcome::Excluded(ExcludedSample { id: sample.id.clone(), kind, reason })
    };

    let ground_truth = match &sample.ground_truth {
        Ok(text) => text,
        Err(e) => return exclude(ExclusionKind::GroundTruth, e.to_string()),
    };
    let bytes = match sample.image.read().await {
        Ok(bytes) => bytes,
        Err(e) => return exclude(ExclusionKind::EmptyInput, format!("Failed to read image: {e}")),
    };

    let selection = match run_mode(pipeline, &bytes, &options.mode).await {
        Ok(selection) => selection,
        Err(e) if e.is_empty_input() => return exclude(ExclusionKind::EmptyInput, e.to_string()),
        Err(e) => return exclude(ExclusionKind::Failed, e.to_string()),
    };

    let decision = &selection.decision;
    let baseline_text = decision.baseline_result.text();
    let auto_text = decision.text();
    let preview = |text: &str| normalize_text(text).chars().take(options.preview_chars).collect::<String>();

    let baseline_accuracy = char_accuracy(ground_truth, &baseline_text);
    let auto_accuracy = char_accuracy(ground_truth, &auto_text);
    let record = EvaluationRecord {
        id: sample.id.clone(),
        ground_truth: ground_truth.clone(),
        mode: options.mode.label().to_string(),
        chosen_variant: decision.variant.clone(),
        switched: decision.switched,
        margin: decision.margin,
        baseline_accuracy,
        auto_accuracy,
        improved: auto_accuracy > baseline_accuracy,
        baseline_confidence: decision.baseline_confidence(),
        auto_confidence: decision.confidence(),
        baseline_score: decision.baseline_score.value(),
        auto_score: decision.score.value(),
        ground_truth_preview: preview(ground_truth),
        baseline_preview: preview(&baseline_text),
        auto_preview: preview(&auto_text),
    };
    tracing::debug!(
        sample = %record.id,
        variant = %record.chosen_variant,
        delta = record.delta(),
        "Sample evaluated"
    );

    let example = keep_image.then(|| ExampleImage {
        id: sample.id.clone(),
        variant: decision.variant.clone(),
        image: Arc::clone(&selection.chosen_image),
    });
    SampleOutcome::Evaluated(record, example)
}

async fn run_mode<R: OcrBackend>(
    pipeline: &SelectionPipeline<R>,
    bytes: &[u8],
    mode: &EvalMode,
) -> Result<Selection, PipelineError> {
    match mode {
        EvalMode::Auto => pipeline.select_bytes(bytes).await,
        EvalMode::Fixed(name) => {
            let img = load_image_from_bytes(bytes)?;
            pipeline.select_fixed(img, name).await
        }
    }
}
