use serde::Serialize;

/// Per-sample outcome of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub ground_truth: String,
    /// `auto` or the fixed variant name.
    pub mode: String,
    pub chosen_variant: String,
    pub switched: bool,
    pub margin: f64,
    pub baseline_accuracy: f64,
    pub auto_accuracy: f64,
    /// Auto accuracy strictly above baseline accuracy.
    pub improved: bool,
    pub baseline_confidence: f64,
    pub auto_confidence: f64,
    pub baseline_score: f64,
    pub auto_score: f64,
    pub ground_truth_preview: String,
    pub baseline_preview: String,
    pub auto_preview: String,
}

impl EvaluationRecord {
    pub fn delta(&self) -> f64 {
        self.auto_accuracy - self.baseline_accuracy
    }
}

/// Aggregate accuracy figures for one split.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitSummary {
    pub split: String,
    pub mode: String,
    pub margin: f64,
    pub sample_count: usize,
    pub excluded_count: usize,
    pub baseline_mean_accuracy: f64,
    pub auto_mean_accuracy: f64,
    pub improvement: f64,
    pub improved_count: usize,
    pub regressed_count: usize,
    pub switched_count: usize,
}

/// Running fold over evaluation records.
#[derive(Debug, Clone)]
pub struct SummaryAccumulator {
    split: String,
    mode: String,
    margin: f64,
    count: usize,
    excluded: usize,
    baseline_sum: f64,
    auto_sum: f64,
    improved: usize,
    regressed: usize,
    switched: usize,
}

impl SummaryAccumulator {
    pub fn new(split: impl Into<String>, mode: impl Into<String>, margin: f64) -> Self {
        Self {
            split: split.into(),
            mode: mode.into(),
            margin,
            count: 0,
            excluded: 0,
            baseline_sum: 0.0,
            auto_sum: 0.0,
            improved: 0,
            regressed: 0,
            switched: 0,
        }
    }

    pub fn push(&mut self, record: &EvaluationRecord) {
        self.count += 1;
        self.baseline_sum += record.baseline_accuracy;
        self.auto_sum += record.auto_accuracy;
        if record.improved {
            self.improved += 1;
        } else if record.delta() < 0.0 {
            self.regressed += 1;
        }
        if record.switched {
            self.switched += 1;
        }
    }

    pub fn exclude(&mut self) {
        self.excluded += 1;
    }

    pub fn finish(&self) -> SplitSummary {
        let mean = |sum: f64| if self.count == 0 { 0.0 } else { sum / self.count as f64 };
        let baseline_mean_accuracy = mean(self.baseline_sum);
        let auto_mean_accuracy = mean(self.auto_sum);
        SplitSummary {
            split: self.split.clone(),
            mode: self.mode.clone(),
            margin: self.margin,
            sample_count: self.count,
            excluded_count: self.excluded,
            baseline_mean_accuracy,
            auto_mean_accuracy,
            improvement: auto_mean_accuracy - baseline_mean_accuracy,
            improved_count: self.improved,
            regressed_count: self.regressed,
            switched_count: self.switched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, baseline: f64, auto: f64, switched: bool) -> EvaluationRecord {
        EvaluationRecord {
            id: id.into(),
            ground_truth: "TOTAL".into(),
            mode: "auto".into(),
            chosen_variant: if switched { "clahe".into() } else { "grayscale".into() },
            switched,
            margin: 0.03,
            baseline_accuracy: baseline,
            auto_accuracy: auto,
            improved: auto > baseline,
            baseline_confidence: 0.5,
            auto_confidence: 0.5,
            baseline_score: 0.4,
            auto_score: 0.4,
            ground_truth_preview: String::new(),
            baseline_preview: String::new(),
            auto_preview: String::new(),
        }
    }

    #[test]
    fn empty_split_has_zero_means() {
        let summary = SummaryAccumulator::new("test", "auto", 0.03).finish();
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.baseline_mean_accuracy, 0.0);
        assert_eq!(summary.improvement, 0.0);
    }

    #[test]
    fn reproduces_two_hundred_sample_run() {
        let baseline = 0.1285;
        let gain = 0.0074 * 200.0 / 53.0;
        let mut acc = SummaryAccumulator::new("test", "auto", 0.03);
        for i in 0..200 {
            let improved = i < 53;
            let auto = if improved { baseline + gain } else { baseline };
            acc.push(&record(&format!("X{i:03}.jpg"), baseline, auto, improved));
        }
        let summary = acc.finish();
        assert_eq!(summary.sample_count, 200);
        assert_eq!(summary.improved_count, 53);
        assert_eq!(summary.regressed_count, 0);
        assert_eq!(summary.switched_count, 53);
        assert!((summary.baseline_mean_accuracy - 0.1285).abs() < 1e-9);
        assert!((summary.improvement - 0.0074).abs() < 1e-9);
        assert!((summary.auto_mean_accuracy - 0.1359).abs() < 1e-9);
    }

    #[test]
    fn counts_regressions_and_exclusions_separately() {
        let mut acc = SummaryAccumulator::new("train", "otsu", 0.03);
        acc.push(&record("a", 0.5, 0.4, true));
        acc.push(&record("b", 0.5, 0.5, false));
        acc.exclude();
        let summary = acc.finish();
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.excluded_count, 1);
        assert_eq!(summary.improved_count, 0);
        assert_eq!(summary.regressed_count, 1);
        assert!((summary.improvement + 0.05).abs() < 1e-12);
    }

    #[test]
    fn record_delta() {
        assert!((record("a", 0.25, 0.75, true).delta() - 0.5).abs() < 1e-12);
    }
}
