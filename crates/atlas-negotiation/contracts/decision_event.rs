//! DecisionEvent for negotiation outcomes
//!
//! Serialisable summary of one negotiation, handed to the evidence ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{NegotiationResult, NegotiationStatus};

/// Negotiation decision event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationDecisionEvent {
    /// Unique event identifier
    pub event_id: Uuid,

    /// Engine identifier
    pub agent_id: String,

    /// Engine version
    pub agent_version: String,

    /// Decision type
    pub decision_type: NegotiationDecisionType,

    /// Hash of inputs for deduplication
    pub inputs_hash: String,

    /// Structured outputs
    pub outputs: NegotiationOutputs,

    /// Confidence score (0.0-1.0)
    pub confidence: f64,

    /// Thresholds that were applied
    pub constraints_applied: Vec<String>,

    /// Execution reference (request ID)
    pub execution_ref: String,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Additional metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NegotiationDecisionEvent {
    /// Engine version constant
    pub const AGENT_VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Engine identifier constant
    pub const AGENT_ID: &'static str = "schema-negotiation-engine";

    /// Create from a negotiation result
    pub fn from_result(
        inputs_hash: String,
        result: &NegotiationResult,
        constraints_applied: Vec<String>,
        execution_ref: String,
    ) -> Self {
        let decision_type = if result.changes.added.is_empty() {
            NegotiationDecisionType::SchemaNegotiation
        } else {
            NegotiationDecisionType::FieldPromotion
        };

        Self {
            event_id: Uuid::new_v4(),
            agent_id: Self::AGENT_ID.to_string(),
            agent_version: Self::AGENT_VERSION.to_string(),
            decision_type,
            inputs_hash,
            outputs: NegotiationOutputs::from_result(result),
            confidence: result.evidence_summary.reliability_score.clamp(0.0, 1.0),
            constraints_applied,
            execution_ref,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get summary for logging
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} - success={}, confidence={:.2}, fields={}, pruned={}, added={}, demoted={}",
            self.agent_id,
            self.decision_type.as_str(),
            self.outputs.success,
            self.confidence,
            self.outputs.final_fields.len(),
            self.outputs.pruned.len(),
            self.outputs.added.len(),
            self.outputs.demoted.len(),
        )
    }
}

/// Negotiation decision types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationDecisionType {
    /// Schema negotiated without new fields
    SchemaNegotiation,

    /// Negotiation admitted at least one new field
    FieldPromotion,
}

impl NegotiationDecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaNegotiation => "schema_negotiation",
            Self::FieldPromotion => "field_promotion",
        }
    }
}

/// Structured outputs for the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationOutputs {
    pub success: bool,

    pub final_fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pruned: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub demoted: Vec<String>,

    pub total_support: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_field: Option<String>,
}

impl NegotiationOutputs {
    pub fn from_result(result: &NegotiationResult) -> Self {
        Self {
            success: result.status == NegotiationStatus::Success,
            final_fields: result.final_schema.iter().map(|f| f.name.clone()).collect(),
            pruned: result.changes.pruned.iter().map(|c| c.field.clone()).collect(),
            added: result.changes.added.iter().map(|c| c.field.clone()).collect(),
            demoted: result.changes.demoted.iter().map(|c| c.field.clone()).collect(),
            total_support: result.evidence_summary.total_support,
            failed_field: result.error.as_ref().map(|e| e.field.clone()),
        }
    }
}
