use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One recognized text fragment with the engine's confidence (0.0–1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub confidence: f32,
}

impl Span {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self { text: text.into(), confidence }
    }
}

/// Ordered spans produced by a recognition backend for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    spans: Vec<Span>,
}

impl RecognitionResult {
    pub fn new(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Non-empty span texts joined line by line.
    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mean span confidence, 0.0 when nothing was recognized.
    pub fn mean_confidence(&self) -> f64 {
        if self.spans.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.spans.iter().map(|s| s.confidence as f64).sum();
        sum / self.spans.len() as f64
    }

    /// Spans sorted by descending confidence, at most `n` of them.
    pub fn top_spans(&self, n: usize) -> Vec<&Span> {
        let mut sorted: Vec<&Span> = self.spans.iter().collect();
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        sorted.truncate(n);
        sorted
    }
}

impl FromIterator<Span> for RecognitionResult {
    fn from_iter<I: IntoIterator<Item = Span>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Comparable quality of a recognition result. Never NaN, never negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct QualityScore(f64);

impl QualityScore {
    pub const ZERO: QualityScore = QualityScore(0.0);

    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            QualityScore(value)
        } else {
            QualityScore::ZERO
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<QualityScore> for f64 {
    fn from(score: QualityScore) -> Self {
        score.0
    }
}

impl TryFrom<f64> for QualityScore {
    type Error = String;

    /// Strict counterpart of [`QualityScore::new`] for values read back from
    /// reports: NaN, infinities and negatives are rejected, not clamped.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_finite() && value >= 0.0 {
            Ok(QualityScore::new(value))
        } else {
            Err(format!("quality score must be finite and non-negative, got {value}"))
        }
    }
}

impl PartialEq for QualityScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QualityScore {}

impl PartialOrd for QualityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_score_serializes_as_plain_number() {
        let json = serde_json::to_string(&QualityScore::new(0.75)).unwrap();
        assert_eq!(json, "0.75");
        let back: QualityScore = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value(), 0.75);
        let zero: QualityScore = serde_json::from_str("0.0").unwrap();
        assert_eq!(zero, QualityScore::ZERO);
    }

    #[test]
    fn quality_score_deserialization_rejects_invalid_values() {
        assert!(serde_json::from_str::<QualityScore>("-1.0").is_err());
        assert!(serde_json::from_str::<QualityScore>("\"NaN\"").is_err());
        assert!(QualityScore::try_from(f64::NAN).is_err());
        assert!(QualityScore::try_from(f64::INFINITY).is_err());
        assert_eq!(QualityScore::try_from(0.5).unwrap().value(), 0.5);
    }

    #[test]
    fn span_clamps_confidence() {
        assert_eq!(Span::new("a", 1.5).confidence, 1.0);
        assert_eq!(Span::new("a", -0.2).confidence, 0.0);
        assert_eq!(Span::new("a", f32::NAN).confidence, 0.0);
    }

    #[test]
    fn empty_result_has_zero_confidence_and_no_text() {
        let r = RecognitionResult::empty();
        assert!(r.is_empty());
        assert_eq!(r.mean_confidence(), 0.0);
        assert_eq!(r.text(), "");
    }

    #[test]
    fn text_joins_spans_by_line_and_skips_blanks() {
        let r: RecognitionResult =
            vec![Span::new("STARBUCKS ", 0.9), Span::new("  ", 0.1), Span::new("TOTAL 5.50", 0.8)]
                .into_iter()
                .collect();
        assert_eq!(r.text(), "STARBUCKS\nTOTAL 5.50");
    }

    #[test]
    fn mean_confidence_averages_all_spans() {
        let r = RecognitionResult::new(vec![Span::new("a", 0.5), Span::new("b", 1.0)]);
        assert!((r.mean_confidence() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn top_spans_orders_by_confidence() {
        let r = RecognitionResult::new(vec![
            Span::new("low", 0.2),
            Span::new("high", 0.9),
            Span::new("mid", 0.5),
        ]);
        let top: Vec<&str> = r.top_spans(2).iter().map(|s| s.text.as_str()).collect();
        assert_eq!(top, vec!["high", "mid"]);
    }

    #[test]
    fn quality_score_rejects_nan_and_negative() {
        assert_eq!(QualityScore::new(f64::NAN), QualityScore::ZERO);
        assert_eq!(QualityScore::new(-1.0), QualityScore::ZERO);
        assert_eq!(QualityScore::new(0.5).value(), 0.5);
    }

    #[test]
    fn quality_score_is_totally_ordered() {
        let mut scores = vec![QualityScore::new(0.7), QualityScore::ZERO, QualityScore::new(0.3)];
        scores.sort();
        assert_eq!(scores, vec![QualityScore::ZERO, QualityScore::new(0.3), QualityScore::new(0.7)]);
    }
}
