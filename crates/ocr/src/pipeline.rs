use image::{DynamicImage, GrayImage};
use ocrmode_core::{AppConfig, ConfigError, VariantSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::hash::{image_digest, to_hex};
use crate::preprocess::{self, PreprocessError, TransformError};
use crate::recognizer::{OcrBackend, OcrError};
use crate::score::QualityScorer;
use crate::selector::{self, Decision, EvaluatedVariant};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Baseline variant unavailable: {0}")]
    Baseline(#[from] TransformError),
    #[error("Unknown variant: '{0}'")]
    UnknownVariant(String),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// The input image itself was unreadable or empty, as opposed to a
    /// problem with the menu or the runtime.
    pub fn is_empty_input(&self) -> bool {
        matches!(
            self,
            PipelineError::Io(_)
                | PipelineError::Preprocess(PreprocessError::Load(_))
                | PipelineError::Preprocess(PreprocessError::EmptyImage { .. })
        )
    }
}

/// A decision together with the image of the chosen variant.
#[derive(Debug, Clone)]
pub struct Selection {
    pub decision: Decision,
    pub chosen_image: Arc<GrayImage>,
}

struct MenuOutcome {
    baseline: EvaluatedVariant,
    candidates: Vec<EvaluatedVariant>,
    images: Vec<(String, Arc<GrayImage>)>,
}

/// Orchestrates: decode → variants → recognize (bounded) → score → select.
///
/// The pipeline holds no per-image state; one instance can serve many
/// concurrent images.
pub struct SelectionPipeline<R: OcrBackend> {
    recognizer: Arc<R>,
    config: Arc<AppConfig>,
    scorer: QualityScorer,
}

impl<R: OcrBackend> SelectionPipeline<R> {
    pub fn new(recognizer: R, config: AppConfig) -> Result<Self, PipelineError> {
        Self::from_shared(Arc::new(recognizer), Arc::new(config))
    }

    pub fn from_shared(recognizer: Arc<R>, config: Arc<AppConfig>) -> Result<Self, PipelineError> {
        config.validate()?;
        let scorer = QualityScorer::new(config.scoring.clone());
        Ok(Self { recognizer, config, scorer })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.selector.recognition_timeout_ms)
    }

    /// Run the adaptive selector on a file on disk.
    pub async fn select_file(&self, path: &Path) -> Result<Selection, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        self.select_bytes(&bytes).await
    }

    /// Run the adaptive selector on raw encoded image bytes.
    pub async fn select_bytes(&self, data: &[u8]) -> Result<Selection, PipelineError> {
        let img = preprocess::load_image_from_bytes(data)?;
        self.select_image(img).await
    }

    /// Evaluate the whole menu and pick one variant.
    pub async fn select_image(&self, img: DynamicImage) -> Result<Selection, PipelineError> {
        let outcome = self.evaluate_menu(img, self.config.menu.clone()).await?;
        let decision = selector::select(outcome.baseline, outcome.candidates, self.config.selector.margin);
        Self::finish(decision, outcome.images)
    }

    /// Evaluate only the baseline and `variant`, reporting `variant`.
    pub async fn select_fixed(&self, img: DynamicImage, variant: &str) -> Result<Selection, PipelineError> {
        let baseline = self.baseline_spec()?.clone();
        let margin = self.config.selector.margin;

        if baseline.name == variant {
            let outcome = self.evaluate_menu(img, vec![baseline]).await?;
            let decision = selector::select(outcome.baseline, vec![], margin);
            return Self::finish(decision, outcome.images);
        }

        let spec = self
            .config
            .menu
            .iter()
            .find(|v| v.name == variant)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownVariant(variant.to_string()))?;
        let mut outcome = self.evaluate_menu(img, vec![baseline, spec]).await?;
        let candidate = outcome.candidates.remove(0);
        let decision = selector::fixed(outcome.baseline, candidate, margin);
        Self::finish(decision, outcome.images)
    }

    fn baseline_spec(&self) -> Result<&VariantSpec, PipelineError> {
        self.config
            .baseline()
            .ok_or_else(|| PipelineError::Config(ConfigError::Invalid("variant menu is empty".into())))
    }

    fn finish(decision: Decision, images: Vec<(String, Arc<GrayImage>)>) -> Result<Selection, PipelineError> {
        let chosen_image = images
            .into_iter()
            .find(|(name, _)| *name == decision.variant)
            .map(|(_, img)| img)
            .ok_or_else(|| PipelineError::Task(format!("no image for variant '{}'", decision.variant)))?;

        tracing::info!(
            variant = %decision.variant,
            score = %decision.score,
            baseline_score = %decision.baseline_score,
            switched = decision.switched,
            "Variant selected"
        );
        Ok(Selection { decision, chosen_image })
    }

    async fn evaluate_menu(&self, img: DynamicImage, menu: Vec<VariantSpec>) -> Result<MenuOutcome, PipelineError> {
        let generated = tokio::task::spawn_blocking(move || {
            let img = preprocess::prepare_input(img)?;
            preprocess::generate_variants(&img, &menu)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))??;

        let mut entries = generated.entries.into_iter();
        let (baseline_name, baseline_image) = match entries.next() {
            Some((name, outcome)) => (name, Arc::new(outcome?)),
            None => {
                return Err(PipelineError::Config(ConfigError::Invalid("variant menu is empty".into())))
            }
        };
        tracing::debug!(variant = %baseline_name, digest = %short_digest(&baseline_image), "Baseline generated");

        let mut images = vec![(baseline_name.clone(), Arc::clone(&baseline_image))];

        // Baseline first: it anchors every comparison.
        let deadline = Instant::now() + self.timeout();
        let handle = self.spawn_recognition(Arc::clone(&baseline_image));
        let baseline = self.await_recognition(&baseline_name, handle, deadline).await;

        // Candidates run concurrently; results stay in menu order.
        let deadline = Instant::now() + self.timeout();
        let mut pending = Vec::new();
        for (name, outcome) in entries {
            match outcome {
                Ok(image) => {
                    tracing::debug!(variant = %name, digest = %short_digest(&image), "Candidate generated");
                    let image = Arc::new(image);
                    images.push((name.clone(), Arc::clone(&image)));
                    pending.push((name, Ok(self.spawn_recognition(image))));
                }
                Err(e) => pending.push((name, Err(e))),
            }
        }

        let mut candidates = Vec::with_capacity(pending.len());
        for (name, handle) in pending {
            let evaluated = match handle {
                Ok(handle) => self.await_recognition(&name, handle, deadline).await,
                Err(e) => EvaluatedVariant::skipped(name, e.to_string()),
            };
            candidates.push(evaluated);
        }

        Ok(MenuOutcome { baseline, candidates, images })
    }

    fn spawn_recognition(&self, image: Arc<GrayImage>) -> JoinHandle<Result<ocrmode_core::RecognitionResult, OcrError>> {
        let recognizer = Arc::clone(&self.recognizer);
        tokio::task::spawn_blocking(move || recognizer.recognize(&image))
    }

    /// Wait for a recognition call until `deadline`. A timed-out call is
    /// abandoned; its blocking thread finishes in the background and the
    /// result is discarded.
    async fn await_recognition(
        &self,
        name: &str,
        handle: JoinHandle<Result<ocrmode_core::RecognitionResult, OcrError>>,
        deadline: Instant,
    ) -> EvaluatedVariant {
        let outcome = match tokio::time::timeout_at(deadline, handle).await {
            Err(_) => Err(OcrError::Timeout(self.timeout())),
            Ok(Err(join)) => Err(OcrError::Engine(format!("recognition task failed: {join}"))),
            Ok(Ok(outcome)) => outcome,
        };

        match outcome {
            Ok(result) => {
                let score = self.scorer.score(&result);
                tracing::debug!(variant = name, spans = result.spans().len(), %score, "Variant scored");
                EvaluatedVariant::recognized(name, result, score)
            }
            Err(e) => {
                tracing::warn!(variant = name, error = %e, "Recognition failed; scoring as zero");
                EvaluatedVariant::failed(name, e.to_string())
            }
        }
    }
}

/// Short content digest of a variant image for log correlation.
pub fn short_digest(image: &GrayImage) -> String {
    to_hex(&image_digest(image))[..12].to_string()
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a notify watcher on `watch_dir` that sends newly created image paths to `tx`.
/// The returned watcher must be kept alive for watching to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            if matches!(ev.kind, EventKind::Create(_)) {
                for path in ev.paths.into_iter().filter(|p| preprocess::is_supported_image(p)) {
                    let _ = tx.try_send(path);
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::apply_variant;
    use crate::recognizer::{MockRecognizer, ScriptedRecognizer};
    use image::{ImageBuffer, Luma, Rgb, RgbImage};
    use ocrmode_core::{RecognitionResult, Span};
    use std::io::Cursor;

    fn receipt_like() -> DynamicImage {
        let img: RgbImage = ImageBuffer::from_fn(48, 32, |x, y| {
            if y % 8 == 4 && x % 3 != 0 {
                Rgb([40, 40, 40])
            } else {
                Rgb([200 + (x % 7) as u8, 200, 190])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn spans(text: &str, conf: f32) -> RecognitionResult {
        RecognitionResult::new(vec![Span::new(text, conf)])
    }

    fn variant_image(img: &DynamicImage, config: &AppConfig, name: &str) -> GrayImage {
        let spec = config.menu.iter().find(|v| v.name == name).unwrap();
        apply_variant(img, spec).unwrap()
    }

    fn config_with_margin(margin: f64) -> AppConfig {
        let mut config = AppConfig::default();
        config.selector.margin = margin;
        config
    }

    struct SlowRecognizer {
        delay: Duration,
    }

    impl OcrBackend for SlowRecognizer {
        fn recognize(&self, _image: &GrayImage) -> Result<RecognitionResult, OcrError> {
            std::thread::sleep(self.delay);
            Ok(spans("TOO LATE", 1.0))
        }
    }

    /// Answers quickly for one image and hangs for every other one.
    struct OnlyBaselineRecognizer {
        baseline: GrayImage,
    }

    impl OcrBackend for OnlyBaselineRecognizer {
        fn recognize(&self, image: &GrayImage) -> Result<RecognitionResult, OcrError> {
            if *image == self.baseline {
                Ok(spans("STARBUCKS TOTAL 5.50", 0.6))
            } else {
                std::thread::sleep(Duration::from_millis(500));
                Ok(spans("STARBUCKS TOTAL 5.50 VISA", 1.0))
            }
        }
    }

    #[tokio::test]
    async fn picks_candidate_that_clears_margin() {
        let img = receipt_like();
        let config = config_with_margin(0.05);
        let clahe = variant_image(&img, &config, "clahe");
        let recognizer = ScriptedRecognizer::new(Ok(spans("STARBUCKS", 0.3)))
            .respond(&clahe, Ok(spans("STARBUCKS COFFEE TOTAL 5.50", 0.95)));

        let pipeline = SelectionPipeline::new(recognizer, config).unwrap();
        let selection = pipeline.select_image(img).await.unwrap();

        assert_eq!(selection.decision.variant, "clahe");
        assert!(selection.decision.switched);
        assert_eq!(*selection.chosen_image, clahe);
        assert_eq!(selection.decision.trace.len(), 3);
    }

    #[tokio::test]
    async fn identical_responses_keep_baseline() {
        let pipeline = SelectionPipeline::new(
            MockRecognizer::new(spans("STARBUCKS TOTAL 5.50", 0.8)),
            AppConfig::default(),
        )
        .unwrap();
        let selection = pipeline.select_image(receipt_like()).await.unwrap();
        assert_eq!(selection.decision.variant, "grayscale");
        assert!(!selection.decision.switched);
        assert_eq!(selection.decision.text(), "STARBUCKS TOTAL 5.50");
    }

    #[tokio::test]
    async fn repeated_runs_give_identical_decisions() {
        let img = receipt_like();
        let config = config_with_margin(0.03);
        let denoise = variant_image(&img, &config, "denoise");
        let clahe = variant_image(&img, &config, "clahe");
        let recognizer = ScriptedRecognizer::new(Ok(spans("TOTAL", 0.4)))
            .respond(&clahe, Ok(spans("TOTAL 12.00 CASH", 0.7)))
            .respond(&denoise, Ok(spans("TOTAL 12.00 CASH", 0.7)));
        let pipeline = SelectionPipeline::new(recognizer, config).unwrap();

        let first = pipeline.select_image(img.clone()).await.unwrap().decision;
        for _ in 0..3 {
            let again = pipeline.select_image(img.clone()).await.unwrap().decision;
            assert_eq!(again.variant, first.variant);
            assert_eq!(again.trace, first.trace);
        }
        // Tie between clahe and denoise goes to the earlier menu entry.
        assert_eq!(first.variant, "clahe");
    }

    #[tokio::test]
    async fn failing_candidates_fall_back_to_baseline() {
        let img = receipt_like();
        let config = AppConfig::default();
        let gray = variant_image(&img, &config, "grayscale");
        let recognizer = ScriptedRecognizer::new(Err(OcrError::Engine("crashed".into())))
            .respond(&gray, Ok(spans("STARBUCKS", 0.5)));

        let pipeline = SelectionPipeline::new(recognizer, config).unwrap();
        let decision = pipeline.select_image(img).await.unwrap().decision;
        assert_eq!(decision.variant, "grayscale");
        assert!(decision
            .trace
            .iter()
            .all(|t| t.outcome == crate::selector::CandidateOutcome::Failed));
    }

    #[tokio::test]
    async fn candidate_timeouts_fall_back_to_baseline() {
        let img = receipt_like();
        let mut config = AppConfig::default();
        config.selector.recognition_timeout_ms = 100;
        let baseline = variant_image(&img, &config, "grayscale");

        let pipeline = SelectionPipeline::new(OnlyBaselineRecognizer { baseline }, config).unwrap();
        let decision = pipeline.select_image(img).await.unwrap().decision;

        assert_eq!(decision.variant, "grayscale");
        assert_eq!(decision.text(), "STARBUCKS TOTAL 5.50");
        for t in &decision.trace {
            assert_eq!(t.outcome, crate::selector::CandidateOutcome::Failed);
            assert!(t.reason.as_deref().unwrap().contains("timed out"));
        }
    }

    #[tokio::test]
    async fn baseline_timeout_scores_zero() {
        let mut config = AppConfig::default();
        config.selector.recognition_timeout_ms = 50;
        let pipeline =
            SelectionPipeline::new(SlowRecognizer { delay: Duration::from_millis(300) }, config).unwrap();
        let decision = pipeline.select_image(receipt_like()).await.unwrap().decision;
        assert_eq!(decision.variant, "grayscale");
        assert!(decision.result.is_empty());
        assert_eq!(decision.baseline_score.value(), 0.0);
    }

    #[tokio::test]
    async fn variant_too_large_for_image_is_skipped() {
        // 12x12 is smaller than the 31px adaptive-threshold block.
        let img: RgbImage = ImageBuffer::from_fn(12, 12, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 128]));
        let pipeline =
            SelectionPipeline::new(MockRecognizer::new(spans("TOTAL 1.00", 0.5)), AppConfig::default()).unwrap();

        let decision = pipeline.select_image(DynamicImage::ImageRgb8(img)).await.unwrap().decision;
        assert_eq!(decision.trace.len(), 3);
        assert_eq!(decision.trace[2].variant, "adaptive_threshold");
        assert_eq!(decision.trace[2].outcome, crate::selector::CandidateOutcome::Skipped);
        assert_eq!(decision.variant, "grayscale");
    }

    #[tokio::test]
    async fn empty_image_is_rejected_as_empty_input() {
        let pipeline = SelectionPipeline::new(MockRecognizer::new(spans("X", 1.0)), AppConfig::default()).unwrap();
        let err = pipeline
            .select_image(DynamicImage::ImageLuma8(GrayImage::new(0, 0)))
            .await
            .unwrap_err();
        assert!(err.is_empty_input());
    }

    #[tokio::test]
    async fn undecodable_bytes_are_empty_input() {
        let pipeline = SelectionPipeline::new(MockRecognizer::new(spans("X", 1.0)), AppConfig::default()).unwrap();
        let err = pipeline.select_bytes(b"definitely not a png").await.unwrap_err();
        assert!(err.is_empty_input());
    }

    #[tokio::test]
    async fn select_bytes_decodes_png() {
        let img: GrayImage = ImageBuffer::from_fn(8, 8, |x, _| Luma([(x * 30) as u8]));
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let pipeline = SelectionPipeline::new(MockRecognizer::new(spans("HELLO", 0.9)), AppConfig::default()).unwrap();
        let selection = pipeline.select_bytes(&png).await.unwrap();
        assert_eq!(selection.decision.text(), "HELLO");
    }

    #[tokio::test]
    async fn select_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.png");
        receipt_like().save(&path).unwrap();
        let pipeline = SelectionPipeline::new(MockRecognizer::new(spans("RECEIPT", 0.9)), AppConfig::default()).unwrap();

        let selection = pipeline.select_file(&path).await.unwrap();
        assert_eq!(selection.decision.text(), "RECEIPT");
        assert_eq!(selection.chosen_image.dimensions(), (48, 32));

        let err = pipeline.select_file(&dir.path().join("missing.png")).await.unwrap_err();
        assert!(err.is_empty_input());
    }

    #[tokio::test]
    async fn fixed_mode_reports_requested_variant() {
        let pipeline =
            SelectionPipeline::new(MockRecognizer::new(spans("TOTAL 9.99", 0.5)), AppConfig::default()).unwrap();
        let decision = pipeline.select_fixed(receipt_like(), "denoise").await.unwrap().decision;
        assert_eq!(decision.variant, "denoise");
        assert_eq!(decision.trace.len(), 1);

        let decision = pipeline.select_fixed(receipt_like(), "grayscale").await.unwrap().decision;
        assert_eq!(decision.variant, "grayscale");
        assert!(!decision.switched);
    }

    #[tokio::test]
    async fn fixed_mode_rejects_unknown_variant() {
        let pipeline = SelectionPipeline::new(MockRecognizer::new(spans("X", 1.0)), AppConfig::default()).unwrap();
        let err = pipeline.select_fixed(receipt_like(), "sharpen").await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownVariant(ref v) if v == "sharpen"));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = config_with_margin(0.0);
        assert!(matches!(
            SelectionPipeline::new(MockRecognizer::new(RecognitionResult::empty()), config),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn short_digest_is_twelve_hex_chars() {
        let img: GrayImage = ImageBuffer::from_fn(2, 2, |_, _| Luma([1u8]));
        assert_eq!(short_digest(&img).len(), 12);
    }
}
