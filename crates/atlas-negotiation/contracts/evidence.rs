//! Evidence types
//!
//! `DomEvidence` is the atomic proof unit. Tracks keep values and evidence in
//! parallel ordered maps keyed by field name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::schema::FieldType;

/// Pointer into the source document backing a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomEvidence {
    /// Selector that located the element
    pub selector: String,

    /// Element path, e.g. `html/body/div.products/div.product[3]/h2.title`
    pub dom_path: String,

    /// Text content at the anchor
    pub text_content: String,

    /// Confidence of this single observation
    pub confidence: f64,
}

impl DomEvidence {
    pub fn new(
        selector: impl Into<String>,
        dom_path: impl Into<String>,
        text_content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            selector: selector.into(),
            dom_path: dom_path.into(),
            text_content: text_content.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Tagged extracted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Render as plain text
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items
                .iter()
                .map(FieldValue::as_text)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Number of scalar values carried
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which extraction pass produced a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Deterministic,
    LlmAugmented,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::LlmAugmented => "llm_augmented",
        }
    }
}

/// One independent extraction pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceTrack {
    /// Producing track
    #[serde(rename = "type")]
    pub track_type: TrackType,

    /// Track-level confidence (0.0-1.0)
    pub confidence: f64,

    /// Extracted values by field
    pub fields: BTreeMap<String, FieldValue>,

    /// Evidence by field, parallel to `fields`
    pub evidence: BTreeMap<String, Vec<DomEvidence>>,

    /// Per-field confidence
    pub field_confidence: BTreeMap<String, f64>,

    /// Track metadata
    #[serde(default)]
    pub metadata: TrackMetadata,
}

impl EvidenceTrack {
    /// Create an empty track
    pub fn empty(track_type: TrackType) -> Self {
        Self {
            track_type,
            confidence: 0.0,
            fields: BTreeMap::new(),
            evidence: BTreeMap::new(),
            field_confidence: BTreeMap::new(),
            metadata: TrackMetadata::default(),
        }
    }

    /// Zero-confidence track carrying an error
    pub fn failed(track_type: TrackType, error: impl Into<String>) -> Self {
        let mut track = Self::empty(track_type);
        track.metadata.error = Some(error.into());
        track
    }

    /// Insert a field with its evidence and confidence
    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: FieldValue,
        evidence: Vec<DomEvidence>,
        confidence: f64,
    ) {
        let field = field.into();
        self.fields.insert(field.clone(), value);
        self.evidence.insert(field.clone(), evidence);
        self.field_confidence
            .insert(field, confidence.clamp(0.0, 1.0));
    }

    /// Evidence hit count for a field
    pub fn support(&self, field: &str) -> usize {
        self.evidence.get(field).map(Vec::len).unwrap_or(0)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.support(field) > 0
    }

    pub fn confidence_of(&self, field: &str) -> Option<f64> {
        self.field_confidence.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Track metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Strategies tried per field (including ones that found nothing)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub strategies_attempted: BTreeMap<String, Vec<String>>,

    /// Required fields that received evidence
    #[serde(default)]
    pub required_satisfied: usize,

    /// Required fields in the contract
    #[serde(default)]
    pub required_total: usize,

    /// Fatal error that zeroed the track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Non-fatal strategy errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// SHA-256 of the document text the track read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Declared types of fields the track proposes beyond the contract
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proposed_types: BTreeMap<String, FieldType>,

    /// Duration in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
}

/// One concrete observation of a field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInstance {
    /// Deterministic id (track, field, path, selector, value)
    pub id: String,

    pub field_name: String,

    pub value: String,

    pub evidence: DomEvidence,

    /// Block the observation belongs to
    pub block_id: String,

    pub confidence: f64,

    /// Producing track
    pub source: TrackType,

    pub extracted_at: DateTime<Utc>,
}

/// Structural grouping derived from an entity's DOM path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,

    /// Normalised path (positional indices stripped)
    pub dom_path: String,

    pub depth: usize,

    pub characteristics: BlockCharacteristics,

    /// Fields observed in this block
    pub fields_found: BTreeSet<String>,

    /// Distinct entities observed in this block
    pub entity_count: usize,
}

/// Shape of the element a block is anchored on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCharacteristics {
    pub tag_name: String,

    pub class_names: Vec<String>,

    /// Hash of the normalised path
    pub structural_signature: String,
}
