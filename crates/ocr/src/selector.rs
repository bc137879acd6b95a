//! The adaptive mode-selection policy.
//!
//! Selection is a pure function over the baseline outcome, the candidate
//! outcomes (in menu order) and the margin. Running the recognizer is the
//! pipeline's job; nothing here performs I/O or keeps state between images.

use ocrmode_core::{QualityScore, RecognitionResult};
use serde::Serialize;

/// Scores closer than this to the margin count as meeting it, so that
/// e.g. `0.55 - 0.50` clears a margin of `0.05` despite float rounding.
pub const MARGIN_TOLERANCE: f64 = 1e-9;

/// What happened to one menu entry for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantStatus {
    Recognized,
    /// Recognition failed or timed out; scored as zero.
    Failed(String),
    /// The transform could not be applied; never sent to the recognizer.
    Skipped(String),
}

/// A menu entry after recognition and scoring.
#[derive(Debug, Clone)]
pub struct EvaluatedVariant {
    pub name: String,
    pub result: RecognitionResult,
    pub score: QualityScore,
    pub status: VariantStatus,
}

impl EvaluatedVariant {
    pub fn recognized(name: impl Into<String>, result: RecognitionResult, score: QualityScore) -> Self {
        Self { name: name.into(), result, score, status: VariantStatus::Recognized }
    }

    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: RecognitionResult::empty(),
            score: QualityScore::ZERO,
            status: VariantStatus::Failed(reason.into()),
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: RecognitionResult::empty(),
            score: QualityScore::ZERO,
            status: VariantStatus::Skipped(reason.into()),
        }
    }

    fn is_recognized(&self) -> bool {
        self.status == VariantStatus::Recognized
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOutcome {
    /// Gain over baseline met the margin.
    Cleared,
    BelowMargin,
    Failed,
    Skipped,
}

/// Audit entry for one candidate: its score and how it fared against the margin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateTrace {
    pub variant: String,
    pub score: QualityScore,
    pub delta: f64,
    pub outcome: CandidateOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The selector's verdict for one image.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub variant: String,
    pub result: RecognitionResult,
    pub score: QualityScore,
    pub baseline_variant: String,
    pub baseline_result: RecognitionResult,
    pub baseline_score: QualityScore,
    pub margin: f64,
    /// True when a candidate replaced the baseline.
    pub switched: bool,
    pub trace: Vec<CandidateTrace>,
}

impl Decision {
    pub fn text(&self) -> String {
        self.result.text()
    }

    pub fn confidence(&self) -> f64 {
        self.result.mean_confidence()
    }

    pub fn baseline_confidence(&self) -> f64 {
        self.baseline_result.mean_confidence()
    }
}

pub fn clears_margin(candidate: QualityScore, baseline: QualityScore, margin: f64) -> bool {
    candidate.value() - baseline.value() + MARGIN_TOLERANCE >= margin
}

/// Pick the variant to report for one image.
///
/// A candidate may replace the baseline only when it was recognized and its
/// score beats the baseline's by at least `margin`. Among those, the highest
/// score wins and ties go to the earlier menu entry.
pub fn select(baseline: EvaluatedVariant, candidates: Vec<EvaluatedVariant>, margin: f64) -> Decision {
    let trace: Vec<CandidateTrace> = candidates
        .iter()
        .map(|c| {
            let delta = c.score.value() - baseline.score.value();
            let (outcome, reason) = match &c.status {
                VariantStatus::Recognized if clears_margin(c.score, baseline.score, margin) => {
                    (CandidateOutcome::Cleared, None)
                }
                VariantStatus::Recognized => (CandidateOutcome::BelowMargin, None),
                VariantStatus::Failed(r) => (CandidateOutcome::Failed, Some(r.clone())),
                VariantStatus::Skipped(r) => (CandidateOutcome::Skipped, Some(r.clone())),
            };
            CandidateTrace { variant: c.name.clone(), score: c.score, delta, outcome, reason }
        })
        .collect();

    let mut best: Option<usize> = None;
    for (i, t) in trace.iter().enumerate() {
        if t.outcome != CandidateOutcome::Cleared {
            continue;
        }
        match best {
            Some(b) if trace[b].score >= t.score => {}
            _ => best = Some(i),
        }
    }

    let chosen = best.map(|i| candidates[i].clone());
    build_decision(baseline, chosen, margin, trace)
}

/// Report a fixed variant instead of selecting one. Falls back to the baseline
/// when that variant was skipped or failed.
pub fn fixed(baseline: EvaluatedVariant, candidate: EvaluatedVariant, margin: f64) -> Decision {
    let delta = candidate.score.value() - baseline.score.value();
    let (outcome, reason) = match &candidate.status {
        VariantStatus::Recognized => (CandidateOutcome::Cleared, None),
        VariantStatus::Failed(r) => (CandidateOutcome::Failed, Some(r.clone())),
        VariantStatus::Skipped(r) => (CandidateOutcome::Skipped, Some(r.clone())),
    };
    let trace = vec![CandidateTrace {
        variant: candidate.name.clone(),
        score: candidate.score,
        delta,
        outcome,
        reason,
    }];
    let chosen = candidate.is_recognized().then_some(candidate);
    build_decision(baseline, chosen, margin, trace)
}

fn build_decision(
    baseline: EvaluatedVariant,
    chosen: Option<EvaluatedVariant>,
    margin: f64,
    trace: Vec<CandidateTrace>,
) -> Decision {
    match chosen {
        Some(c) => Decision {
            variant: c.name,
            result: c.result,
            score: c.score,
            baseline_variant: baseline.name,
            baseline_result: baseline.result,
            baseline_score: baseline.score,
            margin,
            switched: true,
            trace,
        },
        None => Decision {
            variant: baseline.name.clone(),
            result: baseline.result.clone(),
            score: baseline.score,
            baseline_variant: baseline.name,
            baseline_result: baseline.result,
            baseline_score: baseline.score,
            margin,
            switched: false,
            trace,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrmode_core::Span;

    fn variant(name: &str, score: f64) -> EvaluatedVariant {
        EvaluatedVariant::recognized(
            name,
            RecognitionResult::new(vec![Span::new(format!("{name} text"), 0.5)]),
            QualityScore::new(score),
        )
    }

    #[test]
    fn gain_equal_to_margin_switches() {
        let d = select(variant("grayscale", 0.50), vec![variant("clahe", 0.55)], 0.05);
        assert_eq!(d.variant, "clahe");
        assert!(d.switched);
        assert_eq!(d.trace[0].outcome, CandidateOutcome::Cleared);
    }

    #[test]
    fn gain_just_below_margin_keeps_baseline() {
        let d = select(variant("grayscale", 0.50), vec![variant("clahe", 0.549)], 0.05);
        assert_eq!(d.variant, "grayscale");
        assert!(!d.switched);
        assert_eq!(d.result.text(), "grayscale text");
        assert_eq!(d.trace[0].outcome, CandidateOutcome::BelowMargin);
    }

    #[test]
    fn large_gain_switches() {
        let d = select(variant("grayscale", 0.40), vec![variant("clahe", 0.70)], 0.05);
        assert_eq!(d.variant, "clahe");
        assert_eq!(d.score, QualityScore::new(0.70));
        assert_eq!(d.baseline_score, QualityScore::new(0.40));
        assert!((d.trace[0].delta - 0.30).abs() < 1e-9);
    }

    #[test]
    fn higher_raw_score_within_margin_is_not_chosen() {
        let d = select(
            variant("grayscale", 0.60),
            vec![variant("clahe", 0.61), variant("denoise", 0.62)],
            0.03,
        );
        assert_eq!(d.variant, "grayscale");
        assert!(d.score < QualityScore::new(0.62));
    }

    #[test]
    fn best_cleared_candidate_wins() {
        let d = select(
            variant("grayscale", 0.20),
            vec![variant("clahe", 0.50), variant("denoise", 0.70), variant("threshold", 0.60)],
            0.05,
        );
        assert_eq!(d.variant, "denoise");
        let cleared = d.trace.iter().filter(|t| t.outcome == CandidateOutcome::Cleared).count();
        assert_eq!(cleared, 3);
    }

    #[test]
    fn tie_goes_to_earlier_menu_entry() {
        let d = select(
            variant("grayscale", 0.20),
            vec![variant("clahe", 0.70), variant("denoise", 0.70)],
            0.05,
        );
        assert_eq!(d.variant, "clahe");
    }

    #[test]
    fn failed_candidates_never_clear() {
        let d = select(
            variant("grayscale", 0.0),
            vec![
                EvaluatedVariant::failed("clahe", "timeout"),
                EvaluatedVariant::skipped("denoise", "bad radius"),
            ],
            0.05,
        );
        assert_eq!(d.variant, "grayscale");
        assert_eq!(d.trace[0].outcome, CandidateOutcome::Failed);
        assert_eq!(d.trace[0].reason.as_deref(), Some("timeout"));
        assert_eq!(d.trace[1].outcome, CandidateOutcome::Skipped);
    }

    #[test]
    fn failed_baseline_can_be_replaced() {
        let d = select(EvaluatedVariant::failed("grayscale", "engine"), vec![variant("clahe", 0.30)], 0.05);
        assert_eq!(d.variant, "clahe");
        assert!(d.baseline_result.is_empty());
        assert_eq!(d.baseline_score, QualityScore::ZERO);
    }

    #[test]
    fn no_candidates_returns_baseline() {
        let d = select(variant("grayscale", 0.4), vec![], 0.05);
        assert_eq!(d.variant, "grayscale");
        assert!(d.trace.is_empty());
    }

    #[test]
    fn selection_is_deterministic() {
        let run = || {
            select(
                variant("grayscale", 0.31),
                vec![variant("a", 0.40), variant("b", 0.40), variant("c", 0.33)],
                0.03,
            )
        };
        let first = run();
        for _ in 0..10 {
            let again = run();
            assert_eq!(again.variant, first.variant);
            assert_eq!(again.trace, first.trace);
        }
    }

    #[test]
    fn margin_property_holds_over_a_grid() {
        // Whenever candidate - baseline < margin the baseline must win.
        for b in 0..=20 {
            for c in 0..=20 {
                let base = b as f64 * 0.05;
                let cand = c as f64 * 0.05 + 0.001;
                let margin = 0.07;
                let d = select(variant("base", base), vec![variant("cand", cand)], margin);
                if cand - base < margin - MARGIN_TOLERANCE {
                    assert_eq!(d.variant, "base", "base={base} cand={cand}");
                }
            }
        }
    }

    #[test]
    fn gain_within_float_rounding_of_margin_clears_it() {
        // 0.3 - 0.2 rounds to just under 0.1 but still clears it
        assert!(0.3 - 0.2 < 0.1);
        let d = select(variant("base", 0.2), vec![variant("cand", 0.3)], 0.1);
        assert_eq!(d.variant, "cand");

        // a gain short of the margin by more than the band does not
        let d = select(variant("base", 0.5), vec![variant("cand", 0.55 - 1e-8)], 0.05);
        assert_eq!(d.variant, "base");
        assert!(!clears_margin(QualityScore::new(0.55 - 1e-8), QualityScore::new(0.5), 0.05));
    }

    #[test]
    fn fixed_reports_candidate_regardless_of_margin() {
        let d = fixed(variant("grayscale", 0.50), variant("otsu", 0.10), 0.05);
        assert_eq!(d.variant, "otsu");
        assert!(d.switched);
    }

    #[test]
    fn fixed_falls_back_when_candidate_failed() {
        let d = fixed(variant("grayscale", 0.50), EvaluatedVariant::failed("otsu", "timeout"), 0.05);
        assert_eq!(d.variant, "grayscale");
        assert!(!d.switched);
        assert_eq!(d.trace[0].outcome, CandidateOutcome::Failed);
    }

    #[test]
    fn decision_serializes_trace() {
        let d = select(variant("grayscale", 0.40), vec![variant("clahe", 0.70)], 0.05);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["variant"], "clahe");
        assert_eq!(json["trace"][0]["outcome"], "cleared");
        assert!(json["trace"][0].get("reason").is_none());
    }
}
