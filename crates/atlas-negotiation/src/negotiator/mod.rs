//! Evidence negotiation
//!
//! Reconciles a contract with the deterministic and augmented tracks into a
//! new schema. Policy, in order:
//!
//! 1. Required fields with no support fail the negotiation outright.
//! 2. Expected fields with no support are pruned; weak relative support demotes.
//! 3. Discoverable fields need confidence above the promotion gate and the
//!    promotion quorum to become expected; otherwise they are pruned.
//! 4. Fields only the augmented track proposes need governance support and
//!    the promotion quorum to be added.
//!
//! The input contract is never mutated.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::NegotiatorConfig;
use crate::contracts::*;
use crate::quorum::PromotionQuorumManager;

/// Strategy label recorded for the augmented track in failure diagnostics
pub const AUGMENTATION_STRATEGY: &str = "llm_augmentation";

/// Change-log reasons
pub mod reasons {
    pub const ZERO_EVIDENCE: &str = "zero_evidence_found";
    pub const WEAK_SUPPORT: &str = "weak_relative_support";
    pub const BELOW_CONFIDENCE: &str = "confidence_below_promotion_threshold";
    pub const QUORUM_NOT_MET: &str = "quorum_not_met";
    pub const QUORUM_UNAVAILABLE: &str = "quorum_unavailable";
    pub const PROMOTED: &str = "confidence_and_quorum_met";
    pub const NEW_FIELDS_DISALLOWED: &str = "new_fields_disallowed";
    pub const INSUFFICIENT_SUPPORT: &str = "insufficient_support";
    pub const DISCOVERABLE_LIMIT: &str = "discoverable_limit_reached";
    pub const ADDED: &str = "quorum_met_new_field";
}

/// Evidence negotiator
#[derive(Debug, Clone, Default)]
pub struct EvidenceNegotiator {
    config: NegotiatorConfig,
}

/// Support and confidence of one field across both tracks
struct FieldEvidence<'a> {
    track_a: &'a EvidenceTrack,
    track_b: Option<&'a EvidenceTrack>,
}

impl<'a> FieldEvidence<'a> {
    fn support(&self, field: &str) -> usize {
        self.track_a.support(field) + self.track_b.map(|b| b.support(field)).unwrap_or(0)
    }

    fn b_has(&self, field: &str) -> bool {
        self.track_b.map(|b| b.has_field(field)).unwrap_or(false)
    }

    /// Max across tracks when both found the field, otherwise the single
    /// producing track's confidence (augmented-only is discounted)
    fn confidence(&self, field: &str, llm_only_discount: f64) -> f64 {
        let a = self.track_a.confidence_of(field).filter(|_| self.track_a.has_field(field));
        let b = self
            .track_b
            .and_then(|b| b.confidence_of(field).filter(|_| b.has_field(field)));
        match (a, b) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b * llm_only_discount,
            (None, None) => 0.0,
        }
    }

    fn final_field(&self, field: &str, kind: FieldKind, llm_only_discount: f64) -> Option<NegotiatedField> {
        let mut found_by = Vec::new();
        if self.track_a.has_field(field) {
            found_by.push(TrackType::Deterministic);
        }
        if self.b_has(field) {
            found_by.push(TrackType::LlmAugmented);
        }

        // Deterministic value wins when both tracks have one
        let (value, source) = match self.track_a.fields.get(field).filter(|_| self.track_a.has_field(field)) {
            Some(value) => (value.clone(), TrackType::Deterministic),
            None => (
                self.track_b?.fields.get(field)?.clone(),
                TrackType::LlmAugmented,
            ),
        };

        Some(NegotiatedField {
            value,
            confidence: self.confidence(field, llm_only_discount),
            support: self.support(field),
            kind,
            source,
            found_by,
        })
    }

    fn attempted(&self, field: &str) -> Vec<String> {
        let mut attempted = self
            .track_a
            .metadata
            .strategies_attempted
            .get(field)
            .cloned()
            .unwrap_or_default();
        if self.track_b.is_some() {
            attempted.push(AUGMENTATION_STRATEGY.to_string());
        }
        attempted
    }
}

impl EvidenceNegotiator {
    pub fn new(config: NegotiatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NegotiatorConfig {
        &self.config
    }

    /// Negotiate a new schema. Both tracks are registered with the quorum
    /// manager (when given) before any promotion is evaluated.
    pub fn negotiate(
        &self,
        contract: &SchemaContract,
        track_a: &EvidenceTrack,
        track_b: Option<&EvidenceTrack>,
        mut quorum: Option<&mut PromotionQuorumManager>,
    ) -> NegotiationResult {
        if let Some(manager) = quorum.as_deref_mut() {
            manager.register_track(track_a);
            if let Some(track_b) = track_b {
                manager.register_track(track_b);
            }
        }

        let evidence = FieldEvidence { track_a, track_b };

        let mut summary = EvidenceSummary {
            deterministic_confidence: track_a.confidence,
            augmented_confidence: track_b.map(|b| b.confidence),
            ..EvidenceSummary::default()
        };
        for field in &contract.fields {
            summary
                .field_support
                .insert(field.name.clone(), evidence.support(&field.name));
        }

        // Rule 1: any unsupported required field fails the whole negotiation
        if let Some(missing) = contract
            .fields_of_kind(FieldKind::Required)
            .find(|f| evidence.support(&f.name) == 0)
        {
            let failure = NegotiationFailure::missing_required(&missing.name, evidence.attempted(&missing.name));
            warn!(
                contract = %contract.id,
                field = %missing.name,
                attempted = failure.strategies_attempted.len(),
                "Negotiation failed: required field has no evidence"
            );
            return NegotiationResult::failure(failure, summary);
        }

        let max_support = contract
            .fields
            .iter()
            .map(|f| evidence.support(&f.name))
            .max()
            .unwrap_or(0);

        let mut schema: Vec<FieldSpec> = Vec::new();
        let mut changes = SchemaChanges::default();
        let mut warnings: Vec<String> = Vec::new();

        for field in &contract.fields {
            let support = evidence.support(&field.name);
            let confidence = evidence.confidence(&field.name, self.config.llm_only_discount);

            match field.kind {
                FieldKind::Required => schema.push(field.clone()),

                FieldKind::Expected => {
                    if support == 0 {
                        debug!(field = %field.name, "Pruned expected field with no evidence");
                        changes
                            .pruned
                            .push(ChangeRecord::new(&field.name, reasons::ZERO_EVIDENCE, 0));
                        continue;
                    }

                    let ratio = support as f64 / max_support as f64;
                    if ratio < self.config.demotion_ratio {
                        debug!(field = %field.name, ratio, "Demoted weakly evidenced field");
                        changes.demoted.push(
                            ChangeRecord::new(&field.name, reasons::WEAK_SUPPORT, support)
                                .with_confidence(confidence),
                        );
                        let mut demoted = field.clone();
                        demoted.weakly_evidenced = true;
                        schema.push(demoted);
                    } else {
                        schema.push(field.clone());
                    }
                }

                FieldKind::Discoverable => {
                    if support == 0 {
                        changes
                            .pruned
                            .push(ChangeRecord::new(&field.name, reasons::ZERO_EVIDENCE, 0));
                        continue;
                    }
                    if confidence <= self.config.discoverable_promotion_confidence {
                        changes.pruned.push(
                            ChangeRecord::new(&field.name, reasons::BELOW_CONFIDENCE, support)
                                .with_confidence(confidence),
                        );
                        continue;
                    }

                    match self.quorum_verdict(&field.name, quorum.as_deref_mut(), &mut summary, &mut warnings) {
                        Ok(()) => {
                            info!(field = %field.name, support, confidence, "Promoted discoverable field");
                            changes.promoted.push(
                                ChangeRecord::new(&field.name, reasons::PROMOTED, support)
                                    .with_confidence(confidence),
                            );
                            schema.push(field.retagged(FieldKind::Expected));
                        }
                        Err(reason) => {
                            changes.pruned.push(
                                ChangeRecord::new(&field.name, reason, support).with_confidence(confidence),
                            );
                        }
                    }
                }
            }
        }

        // Rule 4: fields only the augmented track proposes
        if let Some(track_b) = track_b {
            let mut candidates: Vec<(&String, usize)> = track_b
                .fields
                .keys()
                .filter(|name| !contract.contains(name))
                .map(|name| (name, evidence.support(name)))
                .filter(|(_, support)| *support > 0)
                .collect();
            candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

            let governance = &contract.governance;
            let mut added = 0usize;

            for (name, support) in candidates {
                summary.field_support.insert(name.clone(), support);
                let confidence = evidence.confidence(name, self.config.llm_only_discount);
                let reject = |reason: String| ChangeRecord::new(name, reason, support).with_confidence(confidence);

                if !governance.allow_new_fields {
                    changes.pruned.push(reject(reasons::NEW_FIELDS_DISALLOWED.to_string()));
                    continue;
                }
                if support < governance.min_support_threshold {
                    changes.pruned.push(reject(reasons::INSUFFICIENT_SUPPORT.to_string()));
                    continue;
                }
                if added >= governance.max_discoverable_fields {
                    changes.pruned.push(reject(reasons::DISCOVERABLE_LIMIT.to_string()));
                    continue;
                }

                match self.quorum_verdict(name, quorum.as_deref_mut(), &mut summary, &mut warnings) {
                    Ok(()) => {
                        let field_type = track_b
                            .metadata
                            .proposed_types
                            .get(name.as_str())
                            .copied()
                            .unwrap_or_else(|| infer_type(&track_b.fields[name.as_str()]));
                        info!(field = %name, support, confidence, "Added new field");
                        changes
                            .added
                            .push(ChangeRecord::new(name, reasons::ADDED, support).with_confidence(confidence));
                        schema.push(FieldSpec::expected(name.clone(), field_type));
                        added += 1;
                    }
                    Err(reason) => changes.pruned.push(reject(reason)),
                }
            }
        }

        let mut final_data = BTreeMap::new();
        for field in &schema {
            if let Some(value) = evidence.final_field(&field.name, field.kind, self.config.llm_only_discount) {
                final_data.insert(field.name.clone(), value);
            }
        }

        summary.final_field_count = schema.len();
        summary.total_support = schema.iter().map(|f| evidence.support(&f.name)).sum();
        summary.reliability_score = if schema.is_empty() {
            0.0
        } else {
            (summary.total_support as f64 / schema.len() as f64).min(1.0)
        };

        info!(
            contract = %contract.id,
            fields = schema.len(),
            pruned = changes.pruned.len(),
            demoted = changes.demoted.len(),
            promoted = changes.promoted.len(),
            added = changes.added.len(),
            "Negotiation complete"
        );

        NegotiationResult {
            status: NegotiationStatus::Success,
            final_schema: schema,
            final_data,
            changes,
            evidence_summary: summary,
            error: None,
            warnings,
        }
    }

    /// Run the promotion quorum for one field. `Err` carries the pruning reason.
    fn quorum_verdict(
        &self,
        field: &str,
        quorum: Option<&mut PromotionQuorumManager>,
        summary: &mut EvidenceSummary,
        warnings: &mut Vec<String>,
    ) -> Result<(), String> {
        let Some(manager) = quorum else {
            debug!(field = %field, "No quorum manager, promotion refused");
            return Err(reasons::QUORUM_UNAVAILABLE.to_string());
        };

        let decision = manager.evaluate_field_promotion(field);
        let threshold = manager.config().diversity_warning_threshold;
        if decision.metadata.block_count > 0 && decision.metadata.block_diversity_score < threshold {
            warnings.push(format!(
                "Low block diversity for '{}': {:.2}",
                field, decision.metadata.block_diversity_score
            ));
        }
        summary
            .quorum_analysis
            .insert(field.to_string(), decision.metadata.clone());

        if decision.should_promote {
            Ok(())
        } else {
            Err(format!("{}: {}", reasons::QUORUM_NOT_MET, decision.reason))
        }
    }
}

/// Type for a proposed field that arrived without one
fn infer_type(value: &FieldValue) -> FieldType {
    match value {
        FieldValue::Number(_) => FieldType::Number,
        FieldValue::Bool(_) => FieldType::Boolean,
        FieldValue::List(_) => FieldType::List,
        FieldValue::Text(_) => FieldType::Text,
    }
}
