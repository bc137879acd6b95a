use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A single preprocessing step. Every step consumes and produces a grayscale image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// Contrast-limited adaptive histogram equalization.
    Clahe { clip_limit: f32, tile_grid: u32 },
    /// Median filter.
    Denoise { radius: u32 },
    GaussianBlur { sigma: f32 },
    /// Local-mean threshold: a pixel is white when it is brighter than
    /// `mean(block) - offset`.
    AdaptiveThreshold { block_radius: u32, offset: i32 },
    Otsu,
    /// Morphological closing (dilate then erode).
    Close { radius: u8 },
}

impl Transform {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Transform::Clahe { clip_limit, tile_grid } => {
                if !(clip_limit.is_finite() && *clip_limit > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "clahe clip_limit must be > 0, got {clip_limit}"
                    )));
                }
                if *tile_grid == 0 {
                    return Err(ConfigError::Invalid("clahe tile_grid must be > 0".into()));
                }
            }
            Transform::Denoise { radius } => {
                if *radius == 0 {
                    return Err(ConfigError::Invalid("denoise radius must be > 0".into()));
                }
            }
            Transform::GaussianBlur { sigma } => {
                if !(sigma.is_finite() && *sigma > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "gaussian_blur sigma must be > 0, got {sigma}"
                    )));
                }
            }
            Transform::AdaptiveThreshold { block_radius, .. } => {
                if *block_radius == 0 {
                    return Err(ConfigError::Invalid(
                        "adaptive_threshold block_radius must be > 0".into(),
                    ));
                }
            }
            Transform::Otsu => {}
            Transform::Close { radius } => {
                if *radius == 0 {
                    return Err(ConfigError::Invalid("close radius must be > 0".into()));
                }
            }
        }
        Ok(())
    }
}

/// A named menu entry: grayscale conversion followed by `steps` in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Transform>,
}

impl VariantSpec {
    pub fn new(name: impl Into<String>, steps: Vec<Transform>) -> Self {
        Self { name: name.into(), steps }
    }

    pub fn grayscale() -> Self {
        Self::new("grayscale", vec![])
    }

    /// The fixed menu evaluated when no configuration file overrides it.
    pub fn default_menu() -> Vec<VariantSpec> {
        vec![
            VariantSpec::grayscale(),
            VariantSpec::new("clahe", vec![Transform::Clahe { clip_limit: 2.0, tile_grid: 8 }]),
            VariantSpec::new("denoise", vec![Transform::Denoise { radius: 1 }]),
            VariantSpec::new(
                "adaptive_threshold",
                vec![
                    Transform::Denoise { radius: 1 },
                    Transform::AdaptiveThreshold { block_radius: 15, offset: 10 },
                    Transform::Close { radius: 1 },
                ],
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Minimum score gain over the baseline before switching (inclusive).
    pub margin: f64,
    /// Upper bound on a single recognition call.
    pub recognition_timeout_ms: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self { margin: 0.03, recognition_timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub confidence_weight: f64,
    pub text_weight: f64,
    /// Text length (non-whitespace chars) at which the length bonus saturates.
    pub length_cap: usize,
    pub min_chars: usize,
    pub short_text_penalty: f64,
    pub min_alnum_ratio: f64,
    pub low_alnum_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 0.6,
            text_weight: 0.4,
            length_cap: 80,
            min_chars: 4,
            short_text_penalty: 0.5,
            min_alnum_ratio: 0.5,
            low_alnum_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Number of samples processed concurrently.
    pub concurrency: usize,
    /// Characters of normalized text kept in report previews.
    pub preview_chars: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self { concurrency: 4, preview_chars: 160 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub selector: SelectorConfig,
    pub scoring: ScoringConfig,
    pub eval: EvalConfig,
    /// Ordered variant menu. The first entry is the baseline.
    pub menu: Vec<VariantSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            scoring: ScoringConfig::default(),
            eval: EvalConfig::default(),
            menu: VariantSpec::default_menu(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The variant every candidate is compared against.
    pub fn baseline(&self) -> Option<&VariantSpec> {
        self.menu.first()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let margin = self.selector.margin;
        if !(margin.is_finite() && margin > 0.0) {
            return Err(ConfigError::Invalid(format!("selector margin must be > 0, got {margin}")));
        }
        if self.selector.recognition_timeout_ms == 0 {
            return Err(ConfigError::Invalid("recognition_timeout_ms must be > 0".into()));
        }

        let s = &self.scoring;
        let weights = [
            ("confidence_weight", s.confidence_weight),
            ("text_weight", s.text_weight),
            ("short_text_penalty", s.short_text_penalty),
            ("min_alnum_ratio", s.min_alnum_ratio),
            ("low_alnum_penalty", s.low_alnum_penalty),
        ];
        for (name, value) in weights {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!("scoring {name} must be >= 0, got {value}")));
            }
        }
        if s.length_cap == 0 {
            return Err(ConfigError::Invalid("scoring length_cap must be > 0".into()));
        }

        if self.eval.concurrency == 0 {
            return Err(ConfigError::Invalid("eval concurrency must be > 0".into()));
        }

        if self.menu.is_empty() {
            return Err(ConfigError::Invalid("variant menu must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for variant in &self.menu {
            if variant.name.trim().is_empty() {
                return Err(ConfigError::Invalid("variant name must not be empty".into()));
            }
            if !seen.insert(variant.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate variant name: '{}'",
                    variant.name
                )));
            }
            for step in &variant.steps {
                step.validate()?;
            }
        }
        Ok(())
    }
}
