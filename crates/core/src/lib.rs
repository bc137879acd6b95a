pub mod config;
pub mod recognition;
pub mod text;

pub use config::{AppConfig, ConfigError, EvalConfig, ScoringConfig, SelectorConfig, Transform, VariantSpec};
pub use recognition::{QualityScore, RecognitionResult, Span};
pub use text::normalize_text;
