//! LLM augmentation (Track B)
//!
//! Runs only when the deterministic track is insufficient. The remote call is
//! made through a [`ResilienceGuard`] under a timeout. Every completion and
//! new-field proposal is validated against the live document before it can
//! enter the augmented track. Any failure degrades to an empty result.

mod sampling;
mod validation;

pub use sampling::{select_samples, ContentSample};
pub use validation::{resolve_anchor, resolve_anchors, AnchorRejection};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::AugmentationConfig;
use crate::contracts::*;
use crate::document::DomDocument;

/// Failures of the augmentation call. None of these fail a request.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AugmentationError {
    #[error("Augmentation call timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed augmentation response: {0}")]
    Malformed(String),

    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Augmentation call failed: {0}")]
    CallFailed(String),

    #[error("Execution budget exhausted: {0}")]
    BudgetExhausted(String),
}

/// Boxed future returned by [`AugmentationClient::call`]
pub type AugmentationFuture =
    Pin<Box<dyn Future<Output = Result<AugmentationResponse, AugmentationError>> + Send>>;

/// Remote augmentation capability
pub trait AugmentationClient: Send + Sync {
    /// Perform the call (takes the owned request so the future is `'static`)
    fn call(&self, request: AugmentationRequest) -> AugmentationFuture;
}

/// Circuit breaking and rate limiting around the augmentation call
pub trait ResilienceGuard: Send + Sync {
    /// Rate limit check for `name` scoped by caller/domain `context`
    fn check_rate_limit(&self, name: &str, context: &str) -> Result<(), AugmentationError>;

    /// Refuse the call when the circuit is open
    fn before_call(&self, name: &str) -> Result<(), AugmentationError>;

    /// Report the call outcome
    fn record_outcome(&self, name: &str, success: bool);
}

/// Guard that admits every call
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughGuard;

impl ResilienceGuard for PassThroughGuard {
    fn check_rate_limit(&self, _name: &str, _context: &str) -> Result<(), AugmentationError> {
        Ok(())
    }

    fn before_call(&self, _name: &str) -> Result<(), AugmentationError> {
        Ok(())
    }

    fn record_outcome(&self, _name: &str, _success: bool) {}
}

/// Request handed to the augmentation client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationRequest {
    pub contract: SchemaContract,

    /// Deterministic findings so far
    pub findings: BTreeMap<String, FieldValue>,

    pub deterministic_confidence: f64,

    /// Contract fields the deterministic track did not find
    pub missing_fields: Vec<String>,

    pub samples: Vec<ContentSample>,

    pub max_tokens: usize,
}

/// Pointer the model cites as proof
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAnchor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Literal text expected in the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_path: Option<String>,
}

/// Value proposed for a contract field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCompletion {
    pub field: String,
    pub value: FieldValue,
    #[serde(default)]
    pub evidence: Vec<EvidenceAnchor>,
    pub confidence: f64,
}

/// Field the contract does not know about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFieldProposal {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    pub value: FieldValue,
    #[serde(default)]
    pub evidence: Vec<EvidenceAnchor>,
    pub confidence: f64,
}

/// Suggested canonical form of an extracted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub field: String,
    pub original: String,
    pub normalized: FieldValue,
}

/// Raw augmentation output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AugmentationResponse {
    #[serde(default)]
    pub completions: Vec<FieldCompletion>,
    #[serde(default)]
    pub new_fields: Vec<NewFieldProposal>,
    #[serde(default)]
    pub normalizations: Vec<Normalization>,
    #[serde(default)]
    pub tokens_used: usize,
}

impl AugmentationResponse {
    /// Parse a client's JSON payload
    pub fn from_json(json: &str) -> Result<Self, AugmentationError> {
        serde_json::from_str(json).map_err(|e| AugmentationError::Malformed(e.to_string()))
    }
}

/// How the augmented track came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationSource {
    /// Deterministic track was sufficient
    SkippedSufficientDeterministic,
    /// Execution budget left no room for the call
    SkippedBudgetExhausted,
    Augmented,
    /// The call failed; result is empty
    Degraded,
}

impl AugmentationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkippedSufficientDeterministic => "skipped_sufficient_deterministic",
            Self::SkippedBudgetExhausted => "skipped_budget_exhausted",
            Self::Augmented => "augmented",
            Self::Degraded => "degraded",
        }
    }

    /// Whether the call was attempted
    pub fn ran(&self) -> bool {
        matches!(self, Self::Augmented | Self::Degraded)
    }
}

/// Proposal refused by validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedProposal {
    pub field: String,
    pub reason: String,
}

/// Validated augmentation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmAugmentationResult {
    pub source: AugmentationSource,

    pub confidence: f64,

    /// Accepted values by field
    pub fields: BTreeMap<String, FieldValue>,

    /// Resolved evidence by field, parallel to `fields`
    pub evidence: BTreeMap<String, Vec<DomEvidence>>,

    pub field_confidence: BTreeMap<String, f64>,

    pub field_completions: Vec<FieldCompletion>,

    pub new_field_proposals: Vec<NewFieldProposal>,

    pub normalizations: Vec<Normalization>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedProposal>,

    /// Failure that degraded the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AugmentationError>,

    pub tokens_used: usize,

    pub duration_ms: u64,
}

impl LlmAugmentationResult {
    fn empty(source: AugmentationSource) -> Self {
        Self {
            source,
            confidence: 0.0,
            fields: BTreeMap::new(),
            evidence: BTreeMap::new(),
            field_confidence: BTreeMap::new(),
            field_completions: Vec::new(),
            new_field_proposals: Vec::new(),
            normalizations: Vec::new(),
            rejected: Vec::new(),
            error: None,
            tokens_used: 0,
            duration_ms: 0,
        }
    }

    /// Track B was not needed
    pub fn skipped() -> Self {
        Self::empty(AugmentationSource::SkippedSufficientDeterministic)
    }

    /// Budget left no room for Track B
    pub fn budget_exhausted(reason: impl Into<String>) -> Self {
        let mut result = Self::empty(AugmentationSource::SkippedBudgetExhausted);
        result.error = Some(AugmentationError::BudgetExhausted(reason.into()));
        result
    }

    /// Empty result after a failed call
    pub fn degraded(error: AugmentationError) -> Self {
        let mut result = Self::empty(AugmentationSource::Degraded);
        result.error = Some(error);
        result
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self.error, Some(AugmentationError::BudgetExhausted(_)))
    }

    /// Augmented evidence track for negotiation
    pub fn to_track(&self) -> EvidenceTrack {
        let mut track = EvidenceTrack::empty(TrackType::LlmAugmented);
        for (field, value) in &self.fields {
            let evidence = self.evidence.get(field).cloned().unwrap_or_default();
            let confidence = self.field_confidence.get(field).copied().unwrap_or(0.0);
            track.insert(field.clone(), value.clone(), evidence, confidence);
        }
        for proposal in &self.new_field_proposals {
            track
                .metadata
                .proposed_types
                .insert(proposal.name.clone(), proposal.field_type);
        }
        track.confidence = self.confidence;
        track.metadata.error = self.error.as_ref().map(ToString::to_string);
        track.metadata.duration_ms = self.duration_ms;
        track
    }

    fn accept(&mut self, field: &str, value: FieldValue, evidence: Vec<DomEvidence>, confidence: f64) {
        self.fields.insert(field.to_string(), value);
        self.evidence.insert(field.to_string(), evidence);
        self.field_confidence
            .insert(field.to_string(), confidence.clamp(0.0, 1.0));
    }

    fn reject(&mut self, field: &str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(field = %field, reason = %reason, "Augmentation proposal rejected");
        self.rejected.push(RejectedProposal {
            field: field.to_string(),
            reason,
        });
    }
}

/// Clamped to [0, 1]; NaN and infinities are refused
fn finite_confidence(raw: f64) -> Option<f64> {
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}

/// Track B
pub struct LlmAugmenter {
    client: Arc<dyn AugmentationClient>,
    guard: Arc<dyn ResilienceGuard>,
    config: AugmentationConfig,
}

impl LlmAugmenter {
    pub fn new(client: Arc<dyn AugmentationClient>, config: AugmentationConfig) -> Self {
        Self {
            client,
            guard: Arc::new(PassThroughGuard),
            config,
        }
    }

    /// Route calls through an external resilience wrapper
    pub fn with_guard(mut self, guard: Arc<dyn ResilienceGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Augment only when the deterministic track is weak or incomplete
    pub fn should_augment(&self, findings: &EvidenceTrack) -> bool {
        findings.confidence < self.config.confidence_gate
            || findings.metadata.required_satisfied < findings.metadata.required_total
    }

    /// Run Track B with the configured timeout
    pub async fn augment(
        &self,
        findings: &EvidenceTrack,
        contract: &SchemaContract,
        document: &dyn DomDocument,
    ) -> LlmAugmentationResult {
        self.augment_within(findings, contract, document, self.config.timeout_ms, usize::MAX)
            .await
    }

    /// Run Track B under explicit time and token ceilings
    pub async fn augment_within(
        &self,
        findings: &EvidenceTrack,
        contract: &SchemaContract,
        document: &dyn DomDocument,
        timeout_ms: u64,
        max_tokens: usize,
    ) -> LlmAugmentationResult {
        if !self.should_augment(findings) {
            debug!(
                confidence = findings.confidence,
                "Deterministic track sufficient, skipping augmentation"
            );
            return LlmAugmentationResult::skipped();
        }

        let start = Instant::now();
        let mut result = match self
            .call_guarded(findings, contract, document, timeout_ms, max_tokens)
            .await
        {
            Ok(response) => self.validate(response, contract, document),
            Err(e) => {
                warn!(contract = %contract.id, error = %e, "Augmentation degraded to empty result");
                LlmAugmentationResult::degraded(e)
            }
        };
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            contract = %contract.id,
            source = result.source.as_str(),
            accepted = result.fields.len(),
            rejected = result.rejected.len(),
            "Augmented track complete"
        );
        result
    }

    async fn call_guarded(
        &self,
        findings: &EvidenceTrack,
        contract: &SchemaContract,
        document: &dyn DomDocument,
        timeout_ms: u64,
        max_tokens: usize,
    ) -> Result<AugmentationResponse, AugmentationError> {
        let name = self.config.circuit_name.as_str();
        let context = document.url().unwrap_or(contract.id.as_str());

        self.guard.check_rate_limit(name, context)?;
        self.guard.before_call(name)?;

        let request = AugmentationRequest {
            contract: contract.clone(),
            findings: findings.fields.clone(),
            deterministic_confidence: findings.confidence,
            missing_fields: contract
                .fields
                .iter()
                .filter(|f| !findings.has_field(&f.name))
                .map(|f| f.name.clone())
                .collect(),
            samples: select_samples(document, &self.config),
            max_tokens,
        };

        let outcome = match timeout(Duration::from_millis(timeout_ms), self.client.call(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AugmentationError::Timeout(timeout_ms)),
        };

        let outcome = outcome.and_then(|response| {
            if response.tokens_used > max_tokens {
                Err(AugmentationError::BudgetExhausted(format!(
                    "{} tokens used, {} allowed",
                    response.tokens_used, max_tokens
                )))
            } else {
                Ok(response)
            }
        });

        self.guard.record_outcome(name, outcome.is_ok());
        outcome
    }

    /// Keep only proposals whose anchors resolve in the document
    fn validate(
        &self,
        response: AugmentationResponse,
        contract: &SchemaContract,
        document: &dyn DomDocument,
    ) -> LlmAugmentationResult {
        let mut result = LlmAugmentationResult::empty(AugmentationSource::Augmented);
        result.tokens_used = response.tokens_used;

        for completion in response.completions {
            if !contract.contains(&completion.field) {
                result.reject(&completion.field, "not_in_contract");
                continue;
            }
            let Some(confidence) = finite_confidence(completion.confidence) else {
                result.reject(&completion.field, "invalid_confidence");
                continue;
            };
            match resolve_anchors(document, &completion.evidence, confidence, 1) {
                Ok(evidence) => {
                    if let Some(&kept) = result.field_confidence.get(&completion.field) {
                        warn!(
                            field = %completion.field,
                            kept,
                            offered = confidence,
                            "Duplicate completion, keeping the more confident one"
                        );
                        if kept >= confidence {
                            result.reject(&completion.field, "duplicate_completion");
                            continue;
                        }
                        result.field_completions.retain(|c| c.field != completion.field);
                        result.reject(&completion.field, "superseded_completion");
                    }
                    result.accept(&completion.field, completion.value.clone(), evidence, confidence);
                    result.field_completions.push(completion);
                }
                Err(rejection) => result.reject(&completion.field, rejection.reason()),
            }
        }

        for proposal in response.new_fields {
            if contract.contains(&proposal.name) {
                result.reject(&proposal.name, "already_in_contract");
                continue;
            }
            if result.fields.contains_key(&proposal.name) {
                result.reject(&proposal.name, "duplicate_proposal");
                continue;
            }
            let Some(confidence) = finite_confidence(proposal.confidence) else {
                result.reject(&proposal.name, "invalid_confidence");
                continue;
            };
            match resolve_anchors(
                document,
                &proposal.evidence,
                confidence,
                self.config.min_new_field_anchors,
            ) {
                Ok(evidence) => {
                    result.accept(&proposal.name, proposal.value.clone(), evidence, confidence);
                    result.new_field_proposals.push(proposal);
                }
                Err(rejection) => result.reject(&proposal.name, rejection.reason()),
            }
        }

        result.normalizations = response
            .normalizations
            .into_iter()
            .filter(|n| result.fields.contains_key(&n.field) || contract.contains(&n.field))
            .collect();

        if !result.field_confidence.is_empty() {
            result.confidence = result.field_confidence.values().sum::<f64>()
                / result.field_confidence.len() as f64;
        }

        result
    }
}
