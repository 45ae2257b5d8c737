//! Promotion quorum
//!
//! Acceptance gate for every field promotion or admission. A field passes iff
//! it has at least K distinct entity instances AND at least M distinct
//! blocks. The gate looks at volume and spread only; per-instance confidence
//! is reported but never gates.
//!
//! One manager per negotiation session. Registries are never shared between
//! documents and are cleared with [`PromotionQuorumManager::clear`].

pub mod signature;

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::QuorumConfig;
use crate::contracts::*;

/// Build an entity instance for one observation
pub fn observe(
    field_name: impl Into<String>,
    evidence: DomEvidence,
    source: TrackType,
) -> EntityInstance {
    let field_name = field_name.into();
    let signature = signature::structural_signature(&evidence.dom_path);
    let block_id = signature::block_id(&signature, &evidence.selector);
    let id = signature::entity_id(
        source,
        &field_name,
        &evidence.dom_path,
        &evidence.selector,
        &evidence.text_content,
    );

    EntityInstance {
        id,
        value: evidence.text_content.clone(),
        confidence: evidence.confidence,
        field_name,
        evidence,
        block_id,
        source,
        extracted_at: Utc::now(),
    }
}

/// Session-scoped entity/block registry and quorum evaluator
#[derive(Debug, Clone)]
pub struct PromotionQuorumManager {
    config: QuorumConfig,
    entities: BTreeMap<String, EntityInstance>,
    blocks: BTreeMap<String, ContentBlock>,
    block_entities: BTreeMap<String, BTreeSet<String>>,
    decisions: BTreeMap<String, PromotionDecision>,
}

impl Default for PromotionQuorumManager {
    fn default() -> Self {
        Self::new(QuorumConfig::default())
    }
}

impl PromotionQuorumManager {
    pub fn new(config: QuorumConfig) -> Self {
        Self {
            config,
            entities: BTreeMap::new(),
            blocks: BTreeMap::new(),
            block_entities: BTreeMap::new(),
            decisions: BTreeMap::new(),
        }
    }

    /// Manager with explicit K and M
    pub fn with_thresholds(min_entities: usize, min_blocks: usize) -> Self {
        Self::new(QuorumConfig {
            min_entities,
            min_blocks,
            ..QuorumConfig::default()
        })
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Register one observation. Re-registering an id overwrites it.
    /// Returns the block id.
    pub fn register_entity(&mut self, instance: EntityInstance) -> String {
        if let Some(previous) = self.entities.get(&instance.id) {
            if previous.block_id != instance.block_id {
                let (old_block, id) = (previous.block_id.clone(), previous.id.clone());
                self.detach(&old_block, &id);
            }
        }

        let block_id = instance.block_id.clone();
        let block = self
            .blocks
            .entry(block_id.clone())
            .or_insert_with(|| ContentBlock {
                id: block_id.clone(),
                dom_path: signature::normalize_dom_path(&instance.evidence.dom_path),
                depth: signature::path_depth(&instance.evidence.dom_path),
                characteristics: signature::characteristics(&instance.evidence.dom_path),
                fields_found: BTreeSet::new(),
                entity_count: 0,
            });
        block.fields_found.insert(instance.field_name.clone());

        let members = self.block_entities.entry(block_id.clone()).or_default();
        members.insert(instance.id.clone());
        block.entity_count = members.len();

        self.entities.insert(instance.id.clone(), instance);
        block_id
    }

    fn detach(&mut self, block_id: &str, entity_id: &str) {
        if let Some(members) = self.block_entities.get_mut(block_id) {
            members.remove(entity_id);
            let remaining = members.len();
            if let Some(block) = self.blocks.get_mut(block_id) {
                block.entity_count = remaining;
            }
        }
    }

    /// Register every evidence entry of a track. Returns entities registered.
    pub fn register_track(&mut self, track: &EvidenceTrack) -> usize {
        let mut registered = 0;
        for (field, evidence) in &track.evidence {
            for item in evidence {
                self.register_entity(observe(field.clone(), item.clone(), track.track_type));
                registered += 1;
            }
        }
        registered
    }

    /// Entities observed for a field
    pub fn entities_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a EntityInstance> {
        self.entities.values().filter(move |e| e.field_name == field)
    }

    /// Blocks holding at least one entity of a field
    pub fn blocks_for(&self, field: &str) -> Vec<&ContentBlock> {
        let ids: BTreeSet<&str> = self.entities_for(field).map(|e| e.block_id.as_str()).collect();
        ids.into_iter().filter_map(|id| self.blocks.get(id)).collect()
    }

    pub fn distinct_entity_count(&self, field: &str) -> usize {
        self.entities_for(field).count()
    }

    pub fn distinct_block_count(&self, field: &str) -> usize {
        self.entities_for(field)
            .map(|e| e.block_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, block_id: &str) -> Option<&ContentBlock> {
        self.blocks.get(block_id)
    }

    fn metadata_for(&self, field: &str) -> PromotionQuorumMetadata {
        let mut entity_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut source_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut confidences = Vec::new();

        for entity in self.entities_for(field) {
            *entity_distribution.entry(entity.block_id.clone()).or_default() += 1;
            *source_distribution
                .entry(entity.source.as_str().to_string())
                .or_default() += 1;
            confidences.push(entity.confidence);
        }

        let entity_count = confidences.len();
        let block_count = entity_distribution.len();
        let unique_signatures = entity_distribution
            .keys()
            .filter_map(|id| self.blocks.get(id))
            .map(|b| b.characteristics.structural_signature.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let block_diversity_score = if block_count == 0 {
            0.0
        } else {
            unique_signatures as f64 / block_count as f64
        };

        let (average_confidence, min_confidence, max_confidence) = if confidences.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f64 = confidences.iter().sum();
            let min = confidences.iter().copied().fold(f64::INFINITY, f64::min);
            let max = confidences.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (sum / entity_count as f64, min, max)
        };

        let meets_entity_threshold = entity_count >= self.config.min_entities;
        let meets_block_threshold = block_count >= self.config.min_blocks;

        PromotionQuorumMetadata {
            entity_count,
            block_count,
            unique_signatures,
            required_entities: self.config.min_entities,
            required_blocks: self.config.min_blocks,
            meets_entity_threshold,
            meets_block_threshold,
            block_diversity_score,
            entity_distribution,
            source_distribution,
            average_confidence,
            min_confidence,
            max_confidence,
            is_promotion_valid: meets_entity_threshold && meets_block_threshold,
        }
    }

    /// K-entities AND M-blocks acceptance test
    pub fn enforce_promotion_quorum(&self, field: &str) -> QuorumValidationResult {
        let metadata = self.metadata_for(field);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !metadata.meets_entity_threshold {
            errors.push(format!(
                "Insufficient entities for '{}': {} found, {} required",
                field, metadata.entity_count, metadata.required_entities
            ));
        }
        if !metadata.meets_block_threshold {
            errors.push(format!(
                "Insufficient blocks for '{}': {} found, {} required",
                field, metadata.block_count, metadata.required_blocks
            ));
        }
        if metadata.block_count > 0
            && metadata.block_diversity_score < self.config.diversity_warning_threshold
        {
            warnings.push(format!(
                "Low block diversity for '{}': {:.2} ({} signatures across {} blocks)",
                field,
                metadata.block_diversity_score,
                metadata.unique_signatures,
                metadata.block_count
            ));
        }

        QuorumValidationResult {
            field_name: field.to_string(),
            is_valid: metadata.is_promotion_valid,
            errors,
            warnings,
            metadata,
        }
    }

    /// Evaluate and cache the promotion verdict, replacing any earlier one
    pub fn evaluate_field_promotion(&mut self, field: &str) -> PromotionDecision {
        let validation = self.enforce_promotion_quorum(field);

        for warning in &validation.warnings {
            warn!(field = %field, "{}", warning);
        }

        let reason = if validation.is_valid {
            format!(
                "Quorum met: {} entities across {} blocks",
                validation.metadata.entity_count, validation.metadata.block_count
            )
        } else {
            validation.errors.join("; ")
        };

        let decision = PromotionDecision {
            field_name: field.to_string(),
            should_promote: validation.is_valid,
            metadata: validation.metadata,
            reason,
        };

        debug!(
            field = %field,
            should_promote = decision.should_promote,
            entities = decision.metadata.entity_count,
            blocks = decision.metadata.block_count,
            "Promotion evaluated"
        );

        self.decisions.insert(field.to_string(), decision.clone());
        decision
    }

    /// Latest cached decision
    pub fn decision(&self, field: &str) -> Option<&PromotionDecision> {
        self.decisions.get(field)
    }

    pub fn decisions(&self) -> &BTreeMap<String, PromotionDecision> {
        &self.decisions
    }

    /// Drop all entities, blocks and decisions
    pub fn clear(&mut self) {
        self.entities.clear();
        self.blocks.clear();
        self.block_entities.clear();
        self.decisions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn evidence(path: &str, selector: &str, text: &str) -> DomEvidence {
        DomEvidence::new(selector, path, text, 0.8)
    }

    /// Register `count` entities spread round-robin over `blocks` distinct regions
    fn seed(manager: &mut PromotionQuorumManager, field: &str, count: usize, blocks: usize) {
        for i in 0..count {
            let region = i % blocks;
            let path = format!("html/body/section.region{}/div.item[{}]/span", region, i);
            manager.register_entity(observe(
                field,
                evidence(&path, "span", &format!("{} {}", field, i)),
                TrackType::Deterministic,
            ));
        }
    }

    #[test]
    fn test_fails_both_thresholds() {
        let mut manager = PromotionQuorumManager::default();
        seed(&mut manager, "price", 4, 2);

        let result = manager.enforce_promotion_quorum("price");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("entities"));
        assert!(result.errors[1].contains("blocks"));
        assert_eq!(result.metadata.entity_count, 4);
        assert_eq!(result.metadata.block_count, 2);
    }

    #[test]
    fn test_passes_quorum() {
        let mut manager = PromotionQuorumManager::default();
        seed(&mut manager, "name", 6, 4);

        let decision = manager.evaluate_field_promotion("name");
        assert!(decision.should_promote);
        assert!(decision.metadata.is_promotion_valid);
        assert_eq!(decision.metadata.block_diversity_score, 1.0);
        assert_eq!(manager.decision("name"), Some(&decision));
    }

    #[test]
    fn test_index_only_paths_collapse_into_one_block() {
        let mut manager = PromotionQuorumManager::default();
        let a = manager.register_entity(observe(
            "name",
            evidence("html/body/div.product[0]/h2", "h2", "A"),
            TrackType::Deterministic,
        ));
        let b = manager.register_entity(observe(
            "name",
            evidence("html/body/div.product[7]/h2", "h2", "B"),
            TrackType::Deterministic,
        ));
        assert_eq!(a, b);
        assert_eq!(manager.distinct_entity_count("name"), 2);
        assert_eq!(manager.distinct_block_count("name"), 1);
        assert_eq!(manager.block(&a).map(|b| b.entity_count), Some(2));
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let mut manager = PromotionQuorumManager::default();
        seed(&mut manager, "name", 6, 4);
        let first = manager.evaluate_field_promotion("name");

        seed(&mut manager, "name", 6, 4);
        let second = manager.evaluate_field_promotion("name");

        assert_eq!(first, second);
        assert_eq!(manager.distinct_entity_count("name"), 6);
        assert_eq!(manager.decisions().len(), 1);
    }

    #[test]
    fn test_same_region_different_selectors_lowers_diversity() {
        let mut manager = PromotionQuorumManager::with_thresholds(1, 1);
        for selector in ["span", "div span", ".label", "span.x"] {
            manager.register_entity(observe(
                "brand",
                evidence("html/body/div.card/span", selector, "Acme"),
                TrackType::LlmAugmented,
            ));
        }

        let result = manager.enforce_promotion_quorum("brand");
        assert!(result.is_valid);
        assert_eq!(result.metadata.block_count, 4);
        assert_eq!(result.metadata.unique_signatures, 1);
        assert_eq!(result.metadata.block_diversity_score, 0.25);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_clear_resets_session() {
        let mut manager = PromotionQuorumManager::default();
        seed(&mut manager, "name", 6, 4);
        manager.evaluate_field_promotion("name");

        manager.clear();
        assert_eq!(manager.entity_count(), 0);
        assert_eq!(manager.block_count(), 0);
        assert!(manager.decision("name").is_none());
        assert!(!manager.enforce_promotion_quorum("name").is_valid);
    }

    #[test]
    fn test_fields_are_isolated() {
        let mut manager = PromotionQuorumManager::default();
        seed(&mut manager, "name", 6, 4);
        seed(&mut manager, "price", 1, 1);
        assert!(manager.enforce_promotion_quorum("name").is_valid);
        assert!(!manager.enforce_promotion_quorum("price").is_valid);
    }

    proptest! {
        #[test]
        fn prop_validity_matches_thresholds(
            k in 1usize..8,
            m in 1usize..5,
            count in 0usize..20,
            regions in 1usize..6,
        ) {
            let mut manager = PromotionQuorumManager::with_thresholds(k, m);
            seed(&mut manager, "field", count, regions);

            let result = manager.enforce_promotion_quorum("field");
            let entities = manager.distinct_entity_count("field");
            let blocks = manager.distinct_block_count("field");
            prop_assert_eq!(result.is_valid, entities >= k && blocks >= m);
        }

        #[test]
        fn prop_same_block_never_adds_blocks(
            count in 1usize..15,
            regions in 1usize..5,
            extra_index in 100usize..200,
        ) {
            let mut manager = PromotionQuorumManager::with_thresholds(1, regions + 1);
            seed(&mut manager, "field", count, regions);
            let before = manager.enforce_promotion_quorum("field");

            // Same structural slot as region 0, new list position
            let path = format!("html/body/section.region0/div.item[{}]/span", extra_index);
            manager.register_entity(observe(
                "field",
                evidence(&path, "span", "extra"),
                TrackType::Deterministic,
            ));
            let after = manager.enforce_promotion_quorum("field");

            prop_assert_eq!(after.metadata.block_count, before.metadata.block_count);
            prop_assert!(after.metadata.entity_count >= before.metadata.entity_count);
            prop_assert_eq!(after.metadata.meets_block_threshold, before.metadata.meets_block_threshold);
        }
    }
}
