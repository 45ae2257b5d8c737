//! Engine configuration
//!
//! Every threshold the engine applies is configurable. Files are read by
//! extension (`.toml`, `.yaml`/`.yml`, `.json`); a few keys can be
//! overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NegotiationError, Result};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub quorum: QuorumConfig,
    pub negotiation: NegotiatorConfig,
    pub extraction: ExtractionConfig,
    pub augmentation: AugmentationConfig,
    pub generator: GeneratorConfig,
    pub budget: BudgetConfig,
}

/// Promotion quorum thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    /// Minimum distinct entity instances (K)
    pub min_entities: usize,
    /// Minimum distinct blocks (M)
    pub min_blocks: usize,
    /// Block diversity below this raises a warning
    pub diversity_warning_threshold: f64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            min_entities: 5,
            min_blocks: 3,
            diversity_warning_threshold: 0.5,
        }
    }
}

/// Negotiation policy constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiatorConfig {
    /// Expected fields below this share of the strongest support are demoted
    pub demotion_ratio: f64,
    /// Confidence a discoverable field must exceed to be promoted
    pub discoverable_promotion_confidence: f64,
    /// Multiplier for fields only the augmented track found
    pub llm_only_discount: f64,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            demotion_ratio: 0.3,
            discoverable_promotion_confidence: 0.8,
            llm_only_discount: 0.8,
        }
    }
}

/// Deterministic track confidence baselines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Ceiling for any deterministic hit
    pub max_confidence: f64,
    pub selector_confidence: f64,
    pub metadata_confidence: f64,
    pub keyword_confidence: f64,
    pub pattern_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_confidence: 0.95,
            selector_confidence: 0.9,
            metadata_confidence: 0.85,
            keyword_confidence: 0.7,
            pattern_confidence: 0.6,
        }
    }
}

/// Augmented track gating and sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Deterministic confidence below this triggers augmentation
    pub confidence_gate: f64,
    /// Maximum fragments sent per request
    pub max_samples: usize,
    /// Maximum characters per fragment
    pub max_sample_chars: usize,
    /// Repeated children needed for a container to count as a list
    pub min_repeated_children: usize,
    /// Resolved anchors a new-field proposal needs
    pub min_new_field_anchors: usize,
    pub timeout_ms: u64,
    /// Name passed to the resilience wrapper
    pub circuit_name: String,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            confidence_gate: 0.7,
            max_samples: 5,
            max_sample_chars: 2000,
            min_repeated_children: 3,
            min_new_field_anchors: 3,
            timeout_ms: 15_000,
            circuit_name: "llm-augmenter".to_string(),
        }
    }
}

/// Contract generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Known-contract score needed to adapt instead of synthesize
    pub match_threshold: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.8,
        }
    }
}

/// Per-request execution ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_wall_clock_ms: u64,
    pub max_augmentation_requests: usize,
    pub max_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_wall_clock_ms: 30_000,
            max_augmentation_requests: 1,
            max_tokens: 8_000,
        }
    }
}

impl NegotiationConfig {
    /// Load from a file, dispatching on extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config: Self = match extension.as_str() {
            "toml" => toml::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => {
                return Err(NegotiationError::parse(format!(
                    "Unsupported config format '{}' for {}",
                    other,
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply `ATLAS_*` environment overrides
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(k) = env_usize("ATLAS_QUORUM_MIN_ENTITIES")? {
            self.quorum.min_entities = k;
        }
        if let Some(m) = env_usize("ATLAS_QUORUM_MIN_BLOCKS")? {
            self.quorum.min_blocks = m;
        }
        if let Some(ms) = env_usize("ATLAS_AUGMENT_TIMEOUT_MS")? {
            self.augmentation.timeout_ms = ms as u64;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> Result<()> {
        if self.quorum.min_entities == 0 {
            return Err(NegotiationError::invalid_config("quorum.min_entities must be > 0"));
        }
        if self.quorum.min_blocks == 0 {
            return Err(NegotiationError::invalid_config("quorum.min_blocks must be > 0"));
        }

        let ratios = [
            ("quorum.diversity_warning_threshold", self.quorum.diversity_warning_threshold),
            ("negotiation.demotion_ratio", self.negotiation.demotion_ratio),
            (
                "negotiation.discoverable_promotion_confidence",
                self.negotiation.discoverable_promotion_confidence,
            ),
            ("negotiation.llm_only_discount", self.negotiation.llm_only_discount),
            ("extraction.max_confidence", self.extraction.max_confidence),
            ("extraction.selector_confidence", self.extraction.selector_confidence),
            ("extraction.metadata_confidence", self.extraction.metadata_confidence),
            ("extraction.keyword_confidence", self.extraction.keyword_confidence),
            ("extraction.pattern_confidence", self.extraction.pattern_confidence),
            ("augmentation.confidence_gate", self.augmentation.confidence_gate),
            ("generator.match_threshold", self.generator.match_threshold),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(NegotiationError::invalid_config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.augmentation.max_samples == 0 {
            return Err(NegotiationError::invalid_config("augmentation.max_samples must be > 0"));
        }

        Ok(())
    }

    /// Threshold strings recorded on decision events
    pub fn constraint_labels(&self) -> Vec<String> {
        vec![
            format!("quorum.min_entities={}", self.quorum.min_entities),
            format!("quorum.min_blocks={}", self.quorum.min_blocks),
            format!("negotiation.demotion_ratio={}", self.negotiation.demotion_ratio),
            format!(
                "negotiation.discoverable_promotion_confidence={}",
                self.negotiation.discoverable_promotion_confidence
            ),
        ]
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| NegotiationError::invalid_config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
