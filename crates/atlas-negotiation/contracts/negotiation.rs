//! Negotiation and promotion verdict types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{FieldKind, FieldSpec, FieldValue, TrackType};

/// Overall negotiation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Success,
    Error,
}

/// Output of a negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationResult {
    pub status: NegotiationStatus,

    /// Negotiated schema; empty when status is error
    pub final_schema: Vec<FieldSpec>,

    /// Final values for every schema field
    pub final_data: BTreeMap<String, NegotiatedField>,

    /// Schema change log
    pub changes: SchemaChanges,

    pub evidence_summary: EvidenceSummary,

    /// Set when a required field had no evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NegotiationFailure>,

    /// Non-blocking observations (quorum diversity, ledger, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl NegotiationResult {
    /// Failed negotiation with no partial schema
    pub fn failure(failure: NegotiationFailure, evidence_summary: EvidenceSummary) -> Self {
        Self {
            status: NegotiationStatus::Error,
            final_schema: Vec::new(),
            final_data: BTreeMap::new(),
            changes: SchemaChanges::default(),
            evidence_summary,
            error: Some(failure),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NegotiationStatus::Success
    }

    /// Final schema field names, in order
    pub fn field_names(&self) -> Vec<&str> {
        self.final_schema.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn schema_field(&self, name: &str) -> Option<&FieldSpec> {
        self.final_schema.iter().find(|f| f.name == name)
    }
}

/// Diagnostic for a required field without evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationFailure {
    pub code: String,

    pub field: String,

    pub message: String,

    /// Every selector and strategy tried against the field
    pub strategies_attempted: Vec<String>,
}

impl NegotiationFailure {
    pub const MISSING_REQUIRED_FIELD: &'static str = "MISSING_REQUIRED_FIELD";

    pub fn missing_required(field: impl Into<String>, strategies_attempted: Vec<String>) -> Self {
        let field = field.into();
        let tried = if strategies_attempted.is_empty() {
            "none".to_string()
        } else {
            strategies_attempted.join(", ")
        };
        Self {
            code: Self::MISSING_REQUIRED_FIELD.to_string(),
            message: format!(
                "Required field '{}' has no evidence in either track (attempted: {})",
                field, tried
            ),
            field,
            strategies_attempted,
        }
    }
}

/// Schema change log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaChanges {
    pub pruned: Vec<ChangeRecord>,
    pub added: Vec<ChangeRecord>,
    pub demoted: Vec<ChangeRecord>,
    /// Discoverable fields promoted to expected
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promoted: Vec<ChangeRecord>,
}

impl SchemaChanges {
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty()
            && self.added.is_empty()
            && self.demoted.is_empty()
            && self.promoted.is_empty()
    }

    pub fn was_pruned(&self, field: &str) -> bool {
        self.pruned.iter().any(|c| c.field == field)
    }

    pub fn was_added(&self, field: &str) -> bool {
        self.added.iter().any(|c| c.field == field)
    }

    pub fn was_demoted(&self, field: &str) -> bool {
        self.demoted.iter().any(|c| c.field == field)
    }
}

/// A single schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub field: String,

    /// Machine-readable reason, e.g. `zero_evidence_found`
    pub reason: String,

    /// Evidence hits across both tracks
    pub support: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ChangeRecord {
    pub fn new(field: impl Into<String>, reason: impl Into<String>, support: usize) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            support,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Final value for a negotiated field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiatedField {
    pub value: FieldValue,

    pub confidence: f64,

    pub support: usize,

    pub kind: FieldKind,

    /// Track the value was taken from
    pub source: TrackType,

    /// Tracks that found the field
    pub found_by: Vec<TrackType>,
}

/// Aggregate evidence statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    /// Sum of support across final fields
    pub total_support: usize,

    /// min(total_support / final_field_count, 1.0)
    pub reliability_score: f64,

    pub final_field_count: usize,

    /// Support per considered field
    pub field_support: BTreeMap<String, usize>,

    pub deterministic_confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmented_confidence: Option<f64>,

    /// Quorum metadata for every field run through the quorum
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quorum_analysis: BTreeMap<String, PromotionQuorumMetadata>,
}

/// Verdict of the quorum acceptance test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuorumValidationResult {
    pub field_name: String,

    pub is_valid: bool,

    /// One entry per failed threshold
    pub errors: Vec<String>,

    pub warnings: Vec<String>,

    pub metadata: PromotionQuorumMetadata,
}

/// Counts and distributions behind a quorum verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionQuorumMetadata {
    pub entity_count: usize,

    pub block_count: usize,

    pub unique_signatures: usize,

    pub required_entities: usize,

    pub required_blocks: usize,

    pub meets_entity_threshold: bool,

    pub meets_block_threshold: bool,

    /// unique signatures / blocks
    pub block_diversity_score: f64,

    /// Entities per block id
    pub entity_distribution: BTreeMap<String, usize>,

    /// Entities per producing track
    pub source_distribution: BTreeMap<String, usize>,

    pub average_confidence: f64,

    pub min_confidence: f64,

    pub max_confidence: f64,

    pub is_promotion_valid: bool,
}

/// Authoritative promotion verdict for a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub field_name: String,

    pub should_promote: bool,

    pub metadata: PromotionQuorumMetadata,

    pub reason: String,
}
