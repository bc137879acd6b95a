use ocrmode_core::{QualityScore, RecognitionResult, ScoringConfig};

/// Character statistics of recognized text used by the plausibility heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStats {
    /// Non-whitespace characters.
    pub len: usize,
    pub alnum: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        let (len, alnum) = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .fold((0, 0), |(len, alnum), c| (len + 1, alnum + usize::from(c.is_alphanumeric())));
        Self { len, alnum }
    }

    pub fn alnum_ratio(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            self.alnum as f64 / self.len as f64
        }
    }
}

/// Ground-truth-free quality estimate of a recognition result.
///
/// `score = (w_conf * mean_conf + w_text * text_quality) * penalties`, where
/// `text_quality = alnum_ratio + min(len, cap) / cap`. Empty and symbol-only
/// results score exactly zero. Penalties depend on the text only, so the score
/// never decreases when confidence rises.
pub struct QualityScorer {
    config: ScoringConfig,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl QualityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, result: &RecognitionResult) -> QualityScore {
        if result.is_empty() {
            return QualityScore::ZERO;
        }
        let stats = TextStats::of(&result.text());
        if stats.len == 0 || stats.alnum == 0 {
            return QualityScore::ZERO;
        }

        let c = &self.config;
        let alnum_ratio = stats.alnum_ratio();
        let length_bonus = stats.len.min(c.length_cap) as f64 / c.length_cap as f64;
        let text_quality = alnum_ratio + length_bonus;

        let mut multiplier = 1.0;
        if stats.len < c.min_chars {
            multiplier *= c.short_text_penalty;
        }
        if alnum_ratio < c.min_alnum_ratio {
            multiplier *= c.low_alnum_penalty;
        }

        let raw = c.confidence_weight * result.mean_confidence() + c.text_weight * text_quality;
        QualityScore::new(raw * multiplier)
    }
}
