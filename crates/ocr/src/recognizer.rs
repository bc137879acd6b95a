use image::GrayImage;
use ocrmode_core::RecognitionResult;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::hash::{image_digest, to_hex};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Recognition timed out after {0:?}")]
    Timeout(Duration),
}

/// Abstraction over an OCR backend.
/// Implementations map a grayscale image to ordered spans with confidences
/// already normalized to 0.0-1.0. Calls may block; callers bound them with a timeout.
pub trait OcrBackend: Send + Sync + 'static {
    fn recognize(&self, image: &GrayImage) -> Result<RecognitionResult, OcrError>;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set result for every image, so the pipeline runs without
/// Tesseract installed.
pub struct MockRecognizer {
    pub result: RecognitionResult,
}

impl MockRecognizer {
    pub fn new(result: RecognitionResult) -> Self {
        Self { result }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image: &GrayImage) -> Result<RecognitionResult, OcrError> {
        Ok(self.result.clone())
    }
}

// ── Scripted backend (per-image responses keyed by content digest) ────────────

/// Answers by image content: each registered image digest maps to a fixed
/// response. Unknown images get the fallback.
pub struct ScriptedRecognizer {
    responses: HashMap<String, Result<RecognitionResult, OcrError>>,
    fallback: Result<RecognitionResult, OcrError>,
}

impl ScriptedRecognizer {
    pub fn new(fallback: Result<RecognitionResult, OcrError>) -> Self {
        Self { responses: HashMap::new(), fallback }
    }

    pub fn respond(mut self, image: &GrayImage, response: Result<RecognitionResult, OcrError>) -> Self {
        self.responses.insert(to_hex(&image_digest(image)), response);
        self
    }
}

impl OcrBackend for ScriptedRecognizer {
    fn recognize(&self, image: &GrayImage) -> Result<RecognitionResult, OcrError> {
        let key = to_hex(&image_digest(image));
        self.responses.get(&key).unwrap_or(&self.fallback).clone()
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use crate::preprocess::encode_as_png;
    use image::GrayImage;
    use leptess::LepTess;
    use ocrmode_core::{RecognitionResult, Span};

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        /// One span per non-empty line; Tesseract only reports a page-level
        /// mean confidence here, so every line carries it.
        fn recognize(&self, image: &GrayImage) -> Result<RecognitionResult, OcrError> {
            let png = encode_as_png(image).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let confidence = lt.mean_text_conf().clamp(0, 100) as f32 / 100.0;
            Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| Span::new(l, confidence))
                .collect())
        }
    }
}
