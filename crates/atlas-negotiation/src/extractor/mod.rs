//! Deterministic extraction (Track A)
//!
//! Runs every applicable [`FieldExtractor`] strategy for each contract field
//! and folds the hits into an [`EvidenceTrack`]. Hit confidence is capped
//! below certainty so the augmented track can still register disagreement.
//! Internal failures never escape: they yield a zero-confidence track with
//! the error recorded in its metadata.

mod strategies;
mod values;

pub use strategies::*;
pub use values::{coerce_values, parse_number};

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::contracts::*;
use crate::document::{DocumentError, DomDocument};

/// One value located by a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct FieldHit {
    pub value: String,
    pub evidence: DomEvidence,
}

impl FieldHit {
    pub fn new(value: impl Into<String>, evidence: DomEvidence) -> Self {
        Self {
            value: value.into(),
            evidence,
        }
    }
}

/// Pluggable extraction strategy
pub trait FieldExtractor: Send + Sync {
    /// Strategy identifier
    fn id(&self) -> &str;

    /// Check if the strategy can say anything about this field
    fn applies_to(&self, field: &FieldSpec) -> bool;

    /// Human-readable list of what will be tried, for diagnostics
    fn describe(&self, _field: &FieldSpec) -> Vec<String> {
        vec![self.id().to_string()]
    }

    /// Locate values for the field
    fn extract(
        &self,
        document: &dyn DomDocument,
        field: &FieldSpec,
    ) -> Result<Vec<FieldHit>, DocumentError>;
}

/// Track A extractor
pub struct DeterministicExtractor {
    strategies: Vec<Box<dyn FieldExtractor>>,
    config: ExtractionConfig,
}

impl Default for DeterministicExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

impl DeterministicExtractor {
    /// Create extractor with the default strategies
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            strategies: vec![
                Box::new(SelectorHintStrategy::new(config.selector_confidence)),
                Box::new(MetadataStrategy::new(config.metadata_confidence)),
                Box::new(ClassKeywordStrategy::new(config.keyword_confidence)),
                Box::new(PatternStrategy::new(config.pattern_confidence)),
            ],
            config,
        }
    }

    /// Create extractor with no strategies
    pub fn empty(config: ExtractionConfig) -> Self {
        Self {
            strategies: Vec::new(),
            config,
        }
    }

    /// Register a strategy
    pub fn register(&mut self, strategy: Box<dyn FieldExtractor>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_ids(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Run Track A. Never fails.
    pub fn extract(&self, document: &dyn DomDocument, contract: &SchemaContract) -> EvidenceTrack {
        let start = Instant::now();

        let mut track = match self.try_extract(document, contract) {
            Ok(track) => track,
            Err(e) => {
                warn!(contract = %contract.id, error = %e, "Deterministic extraction failed");
                let mut track = EvidenceTrack::failed(TrackType::Deterministic, e.to_string());
                track.metadata.required_total = contract.required_count();
                track
            }
        };

        track.metadata.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            contract = %contract.id,
            confidence = track.confidence,
            fields_found = track.fields.len(),
            required_satisfied = track.metadata.required_satisfied,
            required_total = track.metadata.required_total,
            "Deterministic track complete"
        );
        track
    }

    fn try_extract(
        &self,
        document: &dyn DomDocument,
        contract: &SchemaContract,
    ) -> Result<EvidenceTrack, DocumentError> {
        let elements = document.elements()?;
        if elements.is_empty() {
            return Err(DocumentError::Empty);
        }

        let mut track = EvidenceTrack::empty(TrackType::Deterministic);
        track.metadata.content_hash = Some(hex::encode(Sha256::digest(document.text().as_bytes())));
        track.metadata.required_total = contract.required_count();

        for field in &contract.fields {
            let mut attempted = Vec::new();
            let mut hits = Vec::new();

            for strategy in self.strategies.iter().filter(|s| s.applies_to(field)) {
                attempted.extend(strategy.describe(field));
                match strategy.extract(document, field) {
                    Ok(found) => hits.extend(found),
                    Err(e) => {
                        debug!(field = %field.name, strategy = strategy.id(), error = %e, "Strategy failed");
                        track
                            .metadata
                            .warnings
                            .push(format!("{}:{}: {}", field.name, strategy.id(), e));
                    }
                }
            }

            track
                .metadata
                .strategies_attempted
                .insert(field.name.clone(), attempted);

            let hits = self.accept_hits(field, hits);
            if hits.is_empty() {
                continue;
            }

            let confidence =
                hits.iter().map(|h| h.evidence.confidence).sum::<f64>() / hits.len() as f64;
            let raw: Vec<String> = hits.iter().map(|h| h.value.clone()).collect();
            let evidence = hits.into_iter().map(|h| h.evidence).collect();

            track.insert(
                field.name.clone(),
                coerce_values(field.field_type, &raw),
                evidence,
                confidence,
            );

            if field.kind == FieldKind::Required {
                track.metadata.required_satisfied += 1;
            }
        }

        track.confidence = track_confidence(&track);
        Ok(track)
    }

    /// Deduplicate by element, apply validators, cap confidence
    fn accept_hits(&self, field: &FieldSpec, hits: Vec<FieldHit>) -> Vec<FieldHit> {
        let mut by_path: HashMap<String, usize> = HashMap::new();
        let mut accepted: Vec<FieldHit> = Vec::new();

        for mut hit in hits {
            if !field.validators.iter().all(|v| v.accepts(&hit.value)) {
                continue;
            }
            hit.evidence.confidence = hit.evidence.confidence.min(self.config.max_confidence);

            match by_path.get(&hit.evidence.dom_path) {
                Some(&i) => {
                    if hit.evidence.confidence > accepted[i].evidence.confidence {
                        accepted[i] = hit;
                    }
                }
                None => {
                    by_path.insert(hit.evidence.dom_path.clone(), accepted.len());
                    accepted.push(hit);
                }
            }
        }

        accepted
    }
}

/// Mean field confidence scaled by the share of required fields satisfied
fn track_confidence(track: &EvidenceTrack) -> f64 {
    if track.field_confidence.is_empty() {
        return 0.0;
    }
    let mean = track.field_confidence.values().sum::<f64>() / track.field_confidence.len() as f64;
    let required_factor = if track.metadata.required_total == 0 {
        1.0
    } else {
        track.metadata.required_satisfied as f64 / track.metadata.required_total as f64
    };
    (mean * required_factor).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentSnapshot, SnapshotNode};

    fn listing(count: usize) -> DocumentSnapshot {
        let items = (0..count).map(|i| {
            SnapshotNode::new("li")
                .class("item")
                .child(SnapshotNode::new("span").class("item-name").text(format!("Widget {}", i)))
                .child(SnapshotNode::new("span").class("cost").text(format!("${}.50", i + 1)))
        });
        let root = SnapshotNode::new("html").child(
            SnapshotNode::new("body").child(SnapshotNode::new("ul").class("items").children(items)),
        );
        DocumentSnapshot::new(None, root)
    }

    fn contract() -> SchemaContract {
        SchemaContract::new("shop", "Shop")
            .with_field(FieldSpec::required("name", FieldType::Text).with_selectors(["li .item-name"]))
            .with_field(FieldSpec::expected("price", FieldType::Currency))
            .with_field(FieldSpec::discoverable("rating", FieldType::Number))
    }

    #[test]
    fn test_extracts_and_caps_confidence() {
        let doc = listing(3);
        let track = DeterministicExtractor::default().extract(&doc, &contract());

        assert_eq!(track.track_type, TrackType::Deterministic);
        assert_eq!(track.support("name"), 3);
        assert_eq!(track.support("price"), 3);
        assert!(!track.has_field("rating"));
        assert!(track.field_confidence.values().all(|c| *c <= 0.95));
        assert_eq!(track.metadata.required_satisfied, 1);
        assert!(track.metadata.content_hash.is_some());
        assert_eq!(
            track.fields.get("price"),
            Some(&FieldValue::List(vec![
                FieldValue::Number(1.5),
                FieldValue::Number(2.5),
                FieldValue::Number(3.5)
            ]))
        );
    }

    #[test]
    fn test_same_element_counted_once() {
        let doc = listing(2);
        // Selector and class keyword both land on the same spans
        let contract = SchemaContract::new("c", "C").with_field(
            FieldSpec::required("name", FieldType::Text).with_selectors(["span.item-name"]),
        );
        let track = DeterministicExtractor::default().extract(&doc, &contract);
        assert_eq!(track.support("name"), 2);
        assert_eq!(track.confidence_of("name"), Some(0.9));
    }

    #[test]
    fn test_track_confidence_weighted_by_required() {
        let doc = listing(2);
        let contract = contract().with_field(
            FieldSpec::required("sku", FieldType::Text).with_selectors(["span.sku"]),
        );
        let track = DeterministicExtractor::default().extract(&doc, &contract);
        assert_eq!(track.metadata.required_total, 2);
        assert_eq!(track.metadata.required_satisfied, 1);
        let mean = track.field_confidence.values().sum::<f64>() / track.field_confidence.len() as f64;
        assert!((track.confidence - mean * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_validators_filter_hits() {
        let doc = listing(3);
        let contract = SchemaContract::new("c", "C").with_field(
            FieldSpec::required("name", FieldType::Text)
                .with_selectors(["span.item-name"])
                .with_validator(Validator::Pattern {
                    regex: "Widget [02]".to_string(),
                }),
        );
        let track = DeterministicExtractor::default().extract(&doc, &contract);
        assert_eq!(track.support("name"), 2);
    }

    #[test]
    fn test_bad_selector_is_recorded_not_fatal() {
        let doc = listing(1);
        let contract = SchemaContract::new("c", "C").with_field(
            FieldSpec::required("name", FieldType::Text).with_selectors(["span::before"]),
        );
        let track = DeterministicExtractor::default().extract(&doc, &contract);
        assert!(track.metadata.error.is_none());
        assert_eq!(track.metadata.warnings.len(), 1);
        assert!(track.metadata.strategies_attempted["name"].contains(&"selector:span::before".to_string()));
    }

    #[test]
    fn test_empty_document_yields_zero_confidence_track() {
        let doc = DocumentSnapshot::new(None, SnapshotNode::default());

        struct NoElements;
        impl DomDocument for NoElements {
            fn select(&self, _: &str) -> Result<Vec<crate::document::DomElement>, DocumentError> {
                Ok(Vec::new())
            }
            fn elements(&self) -> Result<Vec<crate::document::DomElement>, DocumentError> {
                Err(DocumentError::Empty)
            }
            fn children(&self, _: &str) -> Vec<crate::document::DomElement> {
                Vec::new()
            }
            fn contains_text(&self, _: &str) -> bool {
                false
            }
            fn text(&self) -> String {
                String::new()
            }
            fn url(&self) -> Option<&str> {
                None
            }
        }

        let track = DeterministicExtractor::default().extract(&NoElements, &contract());
        assert_eq!(track.confidence, 0.0);
        assert!(track.is_empty());
        assert_eq!(track.metadata.error.as_deref(), Some("Document is empty"));
        assert_eq!(track.metadata.required_total, 1);

        // A bare root still extracts (nothing)
        let track = DeterministicExtractor::default().extract(&doc, &contract());
        assert!(track.metadata.error.is_none());
        assert_eq!(track.confidence, 0.0);
    }
}
