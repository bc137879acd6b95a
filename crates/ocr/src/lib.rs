pub mod filters;
pub mod hash;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod score;
pub mod selector;

pub use hash::{image_digest, sha256_bytes, to_hex};
pub use pipeline::{PipelineError, Selection, SelectionPipeline};
pub use preprocess::{apply_variant, generate_variants, GeneratedVariants, PreprocessError, TransformError};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, ScriptedRecognizer};
pub use score::{QualityScorer, TextStats};
pub use selector::{CandidateOutcome, CandidateTrace, Decision, EvaluatedVariant, VariantStatus};
