//! Per-document orchestration
//!
//! contract -> Track A -> (gated) Track B -> negotiation -> decision event.
//! Each run owns a fresh quorum manager, so documents never share
//! promotion state.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::augmenter::{AugmentationError, LlmAugmentationResult, LlmAugmenter};
use crate::config::NegotiationConfig;
use crate::contracts::*;
use crate::document::DomDocument;
use crate::extractor::DeterministicExtractor;
use crate::generator::SchemaContractGenerator;
use crate::ledger::{EvidenceLedger, ProofHandle};
use crate::negotiator::EvidenceNegotiator;
use crate::quorum::PromotionQuorumManager;

/// Everything produced for one document
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub request_id: uuid::Uuid,
    pub contract: SchemaContract,
    pub track_a: EvidenceTrack,

    /// `None` when no augmenter is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub augmentation: Option<LlmAugmentationResult>,

    pub result: NegotiationResult,
    pub event: NegotiationDecisionEvent,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofHandle>,

    /// An execution ceiling cut Track B short
    pub budget_exhausted: bool,

    pub duration_ms: u64,
}

/// Schema negotiation pipeline
pub struct ExtractionPipeline {
    config: NegotiationConfig,
    generator: SchemaContractGenerator,
    extractor: DeterministicExtractor,
    negotiator: EvidenceNegotiator,
    augmenter: Option<LlmAugmenter>,
    ledger: Option<Arc<dyn EvidenceLedger>>,
}

impl ExtractionPipeline {
    /// Deterministic-only pipeline
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            generator: SchemaContractGenerator::new(config.generator.clone()),
            extractor: DeterministicExtractor::new(config.extraction.clone()),
            negotiator: EvidenceNegotiator::new(config.negotiation.clone()),
            augmenter: None,
            ledger: None,
            config,
        }
    }

    pub fn with_augmenter(mut self, augmenter: LlmAugmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn EvidenceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Replace the default strategy set
    pub fn with_extractor(mut self, extractor: DeterministicExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Contract for a request, using the document text as content sample
    pub fn contract_for(
        &self,
        request: &ExtractionRequest,
        document: &dyn DomDocument,
        known_contracts: &[SchemaContract],
    ) -> SchemaContract {
        let sample: String = document
            .text()
            .chars()
            .take(self.config.augmentation.max_sample_chars)
            .collect();
        let url = request.url_hint.as_deref().or_else(|| document.url());
        self.generator
            .generate(&request.query, url, Some(&sample), known_contracts)
    }

    /// Generate a contract and negotiate it against the document
    pub async fn run(
        &self,
        request: &ExtractionRequest,
        document: &dyn DomDocument,
        known_contracts: &[SchemaContract],
    ) -> PipelineOutcome {
        let contract = self.contract_for(request, document, known_contracts);
        self.run_with_contract(request, contract, document).await
    }

    /// Negotiate a caller-supplied contract against the document
    pub async fn run_with_contract(
        &self,
        request: &ExtractionRequest,
        contract: SchemaContract,
        document: &dyn DomDocument,
    ) -> PipelineOutcome {
        let start = Instant::now();
        info!(
            request_id = %request.request_id,
            contract = %contract.id,
            fields = contract.fields.len(),
            "Negotiation started"
        );

        let track_a = self.extractor.extract(document, &contract);
        debug!(
            confidence = track_a.confidence,
            fields = track_a.fields.len(),
            "Deterministic track complete"
        );

        let augmentation = match &self.augmenter {
            Some(augmenter) => Some(self.augment(augmenter, &track_a, &contract, document, start).await),
            None => None,
        };
        let budget_exhausted = augmentation
            .as_ref()
            .map(LlmAugmentationResult::is_budget_exhausted)
            .unwrap_or(false);

        let track_b = augmentation
            .as_ref()
            .filter(|a| a.source.ran())
            .map(LlmAugmentationResult::to_track);

        let mut quorum = PromotionQuorumManager::new(self.config.quorum.clone());
        let result = self
            .negotiator
            .negotiate(&contract, &track_a, track_b.as_ref(), Some(&mut quorum));

        let inputs_hash = compute_inputs_hash(request, &contract, &track_a);
        let mut event = NegotiationDecisionEvent::from_result(
            inputs_hash,
            &result,
            self.config.constraint_labels(),
            request.request_id.to_string(),
        )
        .with_metadata("contract_id", serde_json::json!(contract.id))
        .with_metadata("requested_by", serde_json::json!(request.requested_by))
        .with_metadata("budget_exhausted", serde_json::json!(budget_exhausted));
        if let Some(augmentation) = &augmentation {
            event = event.with_metadata(
                "augmentation",
                serde_json::json!(augmentation.source.as_str()),
            );
        }

        let proof = self.ledger.as_ref().and_then(|ledger| {
            match ledger.record_evidence(&event) {
                Ok(proof) => Some(proof),
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "Failed to record decision event");
                    None
                }
            }
        });

        info!("{}", event.summary());

        PipelineOutcome {
            request_id: request.request_id,
            contract,
            track_a,
            augmentation,
            result,
            event,
            proof,
            budget_exhausted,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Track B under the request's execution budget
    async fn augment(
        &self,
        augmenter: &LlmAugmenter,
        track_a: &EvidenceTrack,
        contract: &SchemaContract,
        document: &dyn DomDocument,
        start: Instant,
    ) -> LlmAugmentationResult {
        if !augmenter.should_augment(track_a) {
            return LlmAugmentationResult::skipped();
        }

        let budget = &self.config.budget;
        if budget.max_augmentation_requests == 0 {
            warn!(contract = %contract.id, "Augmentation request budget is zero");
            return LlmAugmentationResult::budget_exhausted("augmentation request limit reached");
        }

        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed >= budget.max_wall_clock_ms {
            warn!(contract = %contract.id, elapsed, "Wall-clock budget spent before augmentation");
            return LlmAugmentationResult::budget_exhausted(format!(
                "wall clock limit of {}ms reached",
                budget.max_wall_clock_ms
            ));
        }

        let remaining = budget.max_wall_clock_ms - elapsed;
        let clock_bound = remaining < augmenter.config().timeout_ms;
        let timeout_ms = remaining.min(augmenter.config().timeout_ms);

        let mut result = augmenter
            .augment_within(track_a, contract, document, timeout_ms, budget.max_tokens)
            .await;

        // A timeout cut short by the wall clock is budget exhaustion
        if clock_bound && matches!(result.error, Some(AugmentationError::Timeout(_))) {
            result.error = Some(AugmentationError::BudgetExhausted(format!(
                "wall clock limit of {}ms reached",
                budget.max_wall_clock_ms
            )));
        }
        result
    }
}

/// Hash of the inputs that determine a negotiation
pub fn compute_inputs_hash(
    request: &ExtractionRequest,
    contract: &SchemaContract,
    track_a: &EvidenceTrack,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.query.as_bytes());
    hasher.update(request.url_hint.as_deref().unwrap_or_default().as_bytes());
    hasher.update(contract.id.as_bytes());
    if let Ok(fields) = serde_json::to_string(&contract.fields) {
        hasher.update(fields.as_bytes());
    }
    hasher.update(
        track_a
            .metadata
            .content_hash
            .as_deref()
            .unwrap_or_default()
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augmenter::{
        AugmentationClient, AugmentationFuture, AugmentationRequest, AugmentationResponse,
        AugmentationSource, EvidenceAnchor, NewFieldProposal,
    };
    use crate::document::{DocumentSnapshot, SnapshotNode};
    use crate::ledger::InMemoryLedger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        response: AugmentationResponse,
    }

    impl Counting {
        fn new(response: AugmentationResponse) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response,
            })
        }
    }

    impl AugmentationClient for Counting {
        fn call(&self, _request: AugmentationRequest) -> AugmentationFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    struct Stalled;

    impl AugmentationClient for Stalled {
        fn call(&self, _request: AugmentationRequest) -> AugmentationFuture {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                Ok(AugmentationResponse::default())
            })
        }
    }

    fn catalogue(products: usize) -> DocumentSnapshot {
        let items = (0..products).map(|i| {
            SnapshotNode::new("div")
                .class("product")
                .child(SnapshotNode::new("h2").class("title").text(format!("Widget {}", i)))
                .child(SnapshotNode::new("span").class("price").text(format!("${}.99", i + 10)))
                .child(SnapshotNode::new("span").class("brand").text(format!("Acme {}", i)))
        });
        DocumentSnapshot::new(
            Some("https://shop.example.com/widgets".to_string()),
            SnapshotNode::new("html").child(
                SnapshotNode::new("body").child(SnapshotNode::new("div").class("products").children(items)),
            ),
        )
    }

    fn contract() -> SchemaContract {
        SchemaContract::new("widgets", "Widgets")
            .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]))
            .with_field(FieldSpec::expected("price", FieldType::Currency).with_selectors([".price"]))
    }

    fn brand_proposal() -> AugmentationResponse {
        let anchors = (0..3)
            .map(|i| EvidenceAnchor {
                text: Some(format!("Acme {}", i)),
                ..EvidenceAnchor::default()
            })
            .collect();
        AugmentationResponse {
            new_fields: vec![NewFieldProposal {
                name: "brand".to_string(),
                field_type: FieldType::Text,
                value: FieldValue::Text("Acme 0".to_string()),
                evidence: anchors,
                confidence: 0.8,
            }],
            ..AugmentationResponse::default()
        }
    }

    #[tokio::test]
    async fn test_deterministic_only_run() {
        let pipeline = ExtractionPipeline::new(NegotiationConfig::default());
        let request = ExtractionRequest::new("widget titles and prices", "test");

        let outcome = pipeline
            .run_with_contract(&request, contract(), &catalogue(6))
            .await;

        assert!(outcome.result.is_success());
        assert!(outcome.augmentation.is_none());
        assert!(outcome.result.final_data.contains_key("title"));
        assert!(outcome.result.final_data.contains_key("price"));
        assert_eq!(outcome.event.execution_ref, request.request_id.to_string());
        assert!(!outcome.budget_exhausted);
    }

    #[tokio::test]
    async fn test_strong_track_skips_augmentation() {
        let client = Counting::new(brand_proposal());
        let augmenter = LlmAugmenter::new(client.clone(), Default::default());
        let pipeline = ExtractionPipeline::new(NegotiationConfig::default()).with_augmenter(augmenter);

        let outcome = pipeline
            .run_with_contract(&ExtractionRequest::new("widgets", "test"), contract(), &catalogue(6))
            .await;

        let augmentation = outcome.augmentation.unwrap();
        assert_eq!(augmentation.source, AugmentationSource::SkippedSufficientDeterministic);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(!outcome.result.changes.was_added("brand"));
    }

    #[tokio::test]
    async fn test_augmentation_adds_quorum_backed_field() {
        let client = Counting::new(brand_proposal());
        let mut config = NegotiationConfig::default();
        config.augmentation.confidence_gate = 1.0;
        config.quorum.min_entities = 3;
        config.quorum.min_blocks = 1;
        let augmenter = LlmAugmenter::new(client.clone(), config.augmentation.clone());
        let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

        let outcome = pipeline
            .run_with_contract(&ExtractionRequest::new("widgets", "test"), contract(), &catalogue(6))
            .await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(outcome.result.changes.was_added("brand"));
        assert_eq!(
            outcome.event.decision_type,
            NegotiationDecisionType::FieldPromotion
        );
    }

    #[tokio::test]
    async fn test_zero_request_budget() {
        let client = Counting::new(brand_proposal());
        let mut config = NegotiationConfig::default();
        config.augmentation.confidence_gate = 1.0;
        config.budget.max_augmentation_requests = 0;
        let augmenter = LlmAugmenter::new(client.clone(), config.augmentation.clone());
        let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

        let outcome = pipeline
            .run_with_contract(&ExtractionRequest::new("widgets", "test"), contract(), &catalogue(6))
            .await;

        assert!(outcome.budget_exhausted);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            outcome.augmentation.unwrap().source,
            AugmentationSource::SkippedBudgetExhausted
        );
        assert!(outcome.result.is_success());
    }

    #[tokio::test]
    async fn test_wall_clock_cuts_augmentation_short() {
        let mut config = NegotiationConfig::default();
        config.augmentation.confidence_gate = 1.0;
        config.budget.max_wall_clock_ms = 50;
        let augmenter = LlmAugmenter::new(Arc::new(Stalled), config.augmentation.clone());
        let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

        let outcome = pipeline
            .run_with_contract(&ExtractionRequest::new("widgets", "test"), contract(), &catalogue(6))
            .await;

        assert!(outcome.budget_exhausted);
        let augmentation = outcome.augmentation.unwrap();
        assert_eq!(augmentation.source, AugmentationSource::Degraded);
        assert!(augmentation.fields.is_empty());
        assert!(outcome.result.is_success());
    }

    #[tokio::test]
    async fn test_events_reach_the_ledger() {
        let ledger = Arc::new(InMemoryLedger::new());
        let pipeline =
            ExtractionPipeline::new(NegotiationConfig::default()).with_ledger(ledger.clone());

        let outcome = pipeline
            .run_with_contract(&ExtractionRequest::new("widgets", "test"), contract(), &catalogue(2))
            .await;

        let proof = outcome.proof.unwrap();
        assert_eq!(proof.event_id, outcome.event.event_id);
        assert!(ledger.verify(&proof));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_inputs_hash_tracks_content() {
        let request = ExtractionRequest::new("widgets", "test");
        let mut track = EvidenceTrack::empty(TrackType::Deterministic);
        track.metadata.content_hash = Some("aaa".to_string());
        let first = compute_inputs_hash(&request, &contract(), &track);
        assert_eq!(first, compute_inputs_hash(&request, &contract(), &track));
        assert_eq!(first.len(), 64);

        track.metadata.content_hash = Some("bbb".to_string());
        assert_ne!(first, compute_inputs_hash(&request, &contract(), &track));
    }
}
