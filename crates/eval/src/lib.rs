pub mod accuracy;
pub mod dataset;
pub mod harness;
pub mod report;
pub mod summary;

pub use accuracy::{char_accuracy, levenshtein_distance};
pub use dataset::{load_split, DatasetError, GroundTruthError, ImageSource, Sample};
pub use harness::{
    evaluate_split, EvalMode, ExampleImage, ExcludedSample, ExclusionKind, HarnessError, HarnessOptions, SplitReport,
};
pub use report::{output_stem, write_report, ReportError, ReportPaths};
pub use summary::{EvaluationRecord, SplitSummary, SummaryAccumulator};
