//! ocrmode - adaptive OCR preprocessing selection
//!
//! Usage:
//!   ocrmode select <image> [--gt TEXT]     Pick a variant for one image
//!   ocrmode eval --split test --mode auto  Evaluate a SROIE v2 split
//!   ocrmode watch <dir>                    Select for every new image in a folder

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ocrmode_core::AppConfig;
use ocrmode_eval::{char_accuracy, evaluate_split, load_split, write_report, EvalMode, HarnessOptions};
use ocrmode_ocr::pipeline::spawn_intake_watcher;
use ocrmode_ocr::preprocess::load_image;
use ocrmode_ocr::{sha256_bytes, to_hex, OcrBackend, Selection, SelectionPipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Leading samples whose chosen image is saved with `--save-examples`.
const SAVED_EXAMPLES: usize = 10;

#[derive(Parser)]
#[command(name = "ocrmode", version, about = "Adaptive OCR preprocessing selection")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML configuration file (menu, margin, scoring, eval)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the selector margin
    #[arg(long, global = true)]
    margin: Option<f64>,

    /// Tesseract language
    #[arg(long, global = true, default_value = "eng")]
    lang: String,

    /// Tesseract data directory
    #[arg(long, global = true)]
    tessdata: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the selector on one image
    Select {
        image: PathBuf,

        /// Ground-truth text; prints baseline and chosen accuracy
        #[arg(long)]
        gt: Option<String>,

        /// `auto` or a variant name
        #[arg(long, default_value = "auto")]
        mode: String,

        /// Number of top-confidence spans to print
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },
    /// Evaluate baseline against preprocessing on a SROIE v2 split
    Eval {
        #[arg(long, default_value = "train")]
        split: String,

        /// `auto` or a variant name
        #[arg(long, default_value = "auto")]
        mode: String,

        /// Limit the number of images
        #[arg(long, default_value_t = 200)]
        max: usize,

        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long, default_value = "data/sroie_v2")]
        data_root: PathBuf,

        #[arg(long, default_value = "outputs")]
        out: PathBuf,

        /// Save the chosen image of the first samples
        #[arg(long)]
        save_examples: bool,
    },
    /// Watch a folder and emit one JSON decision line per new image
    Watch { dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.common, &cli.command)?;
    let recognizer = build_recognizer(&cli.common);
    let pipeline = Arc::new(
        SelectionPipeline::new(recognizer, config).context("Failed to build selection pipeline")?,
    );

    match cli.command {
        Command::Select { image, gt, mode, top, json } => {
            run_select(&pipeline, &image, gt.as_deref(), &EvalMode::from(mode.as_str()), top, json).await
        }
        Command::Eval { split, mode, max, data_root, out, save_examples, .. } => {
            run_eval(pipeline, &split, EvalMode::from(mode.as_str()), max, &data_root, &out, save_examples).await
        }
        Command::Watch { dir } => run_watch(&pipeline, &dir).await,
    }
}

fn load_config(common: &CommonArgs, command: &Command) -> Result<AppConfig> {
    let mut config = match &common.config {
        Some(path) => {
            AppConfig::load(path).with_context(|| format!("Failed to load config: {}", path.display()))?
        }
        None => AppConfig::default(),
    };
    if let Some(margin) = common.margin {
        config.selector.margin = margin;
    }
    if let Command::Eval { concurrency: Some(concurrency), .. } = command {
        config.eval.concurrency = *concurrency;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(feature = "tesseract")]
fn build_recognizer(common: &CommonArgs) -> ocrmode_ocr::recognizer::tesseract_backend::TesseractRecognizer {
    tracing::info!(lang = %common.lang, "Using Tesseract recognizer");
    ocrmode_ocr::recognizer::tesseract_backend::TesseractRecognizer::new(common.tessdata.clone(), &common.lang)
}

#[cfg(not(feature = "tesseract"))]
fn build_recognizer(common: &CommonArgs) -> ocrmode_ocr::MockRecognizer {
    tracing::warn!(
        lang = %common.lang,
        tessdata = ?common.tessdata,
        "Built without the `tesseract` feature; every variant recognizes as empty"
    );
    ocrmode_ocr::MockRecognizer::new(ocrmode_core::RecognitionResult::empty())
}

async fn select_one<R: OcrBackend>(
    pipeline: &SelectionPipeline<R>,
    image: &Path,
    mode: &EvalMode,
) -> Result<Selection> {
    let selection = match mode {
        EvalMode::Auto => pipeline.select_file(image).await?,
        EvalMode::Fixed(name) => {
            let img = load_image(image)?;
            pipeline.select_fixed(img, name).await?
        }
    };
    Ok(selection)
}

async fn run_select<R: OcrBackend>(
    pipeline: &SelectionPipeline<R>,
    image: &Path,
    gt: Option<&str>,
    mode: &EvalMode,
    top: usize,
    json: bool,
) -> Result<()> {
    let selection = select_one(pipeline, image, mode)
        .await
        .with_context(|| format!("Selection failed for {}", image.display()))?;
    let d = &selection.decision;

    if json {
        println!("{}", serde_json::to_string_pretty(d)?);
        return Ok(());
    }

    println!(
        "Chosen variant: {} (score {}, baseline {} {}, conf {:.4})",
        d.variant,
        d.score,
        d.baseline_variant,
        d.baseline_score,
        d.confidence()
    );
    for t in &d.trace {
        println!(
            "  {:<20} score {} delta {:+.4} {:?}{}",
            t.variant,
            t.score,
            t.delta,
            t.outcome,
            t.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
        );
    }

    println!("\nTop spans:");
    for span in d.result.top_spans(top) {
        println!("  {:.2}  {}", span.confidence, span.text);
    }

    if let Some(gt) = gt {
        println!(
            "\nChar accuracy: baseline {:.4} | chosen {:.4}",
            char_accuracy(gt, &d.baseline_result.text()),
            char_accuracy(gt, &d.text())
        );
    }

    println!("\n{}", d.text());
    Ok(())
}

async fn run_eval<R: OcrBackend>(
    pipeline: Arc<SelectionPipeline<R>>,
    split: &str,
    mode: EvalMode,
    max: usize,
    data_root: &Path,
    out: &Path,
    save_examples: bool,
) -> Result<()> {
    let samples = load_split(data_root, split, Some(max))
        .await
        .with_context(|| format!("Failed to load split '{split}' from {}", data_root.display()))?;

    let eval = &pipeline.config().eval;
    let options = HarnessOptions {
        mode,
        concurrency: eval.concurrency,
        preview_chars: eval.preview_chars,
        keep_images: if save_examples { SAVED_EXAMPLES } else { 0 },
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing with completed samples");
            on_signal.cancel();
        }
    });

    let report = evaluate_split(Arc::clone(&pipeline), split, samples, &options, cancel).await?;
    let paths = write_report(out, &report).context("Failed to write report")?;

    let s = &report.summary;
    println!("\n=== {} SUMMARY (mode={}) ===", s.split.to_uppercase(), s.mode);
    println!("Samples evaluated: {} (excluded {})", s.sample_count, s.excluded_count);
    println!("Mean char accuracy (baseline): {:.4}", s.baseline_mean_accuracy);
    println!("Mean char accuracy (preproc):  {:.4}", s.auto_mean_accuracy);
    println!("Improvement: {:+.4}", s.improvement);
    println!("Improved cases: {}/{}", s.improved_count, s.sample_count);
    println!("Regressed cases: {}/{}", s.regressed_count, s.sample_count);
    println!("Switched from baseline: {}/{}", s.switched_count, s.sample_count);
    if report.cancelled {
        println!("Run was cancelled; figures cover completed samples only.");
    }
    println!("\nSaved results CSV: {}", paths.records_csv.display());
    println!("Saved summary JSON: {}", paths.summary_json.display());
    if !paths.examples.is_empty() {
        println!("Saved {} example images", paths.examples.len());
    }
    Ok(())
}

async fn run_watch<R: OcrBackend>(pipeline: &SelectionPipeline<R>, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    // The channel bridges the notify watcher thread and the async loop.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = spawn_intake_watcher(dir, tx).context("Failed to start folder watcher")?;
    tracing::info!("Watching folder: {}", dir.display());

    loop {
        let path = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = rx.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Failed to read image");
                continue;
            }
        };
        match pipeline.select_bytes(&bytes).await {
            Ok(selection) => {
                let line = serde_json::json!({
                    "file": path.display().to_string(),
                    "sha256": to_hex(&sha256_bytes(&bytes)),
                    "decision": selection.decision,
                });
                println!("{line}");
            }
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "Selection failed"),
        }
    }
    Ok(())
}
