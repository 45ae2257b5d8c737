//! Integration tests for the schema negotiation engine

use atlas_negotiation::augmenter::{
    AugmentationFuture, AugmentationRequest, AugmentationResponse, EvidenceAnchor, NewFieldProposal,
};
use atlas_negotiation::contracts::*;
use atlas_negotiation::quorum::observe;
use atlas_negotiation::{
    AugmentationClient, AugmentationSource, DocumentSnapshot, EvidenceLedger, EvidenceNegotiator,
    ExtractionPipeline, InMemoryLedger, LlmAugmenter, NegotiationConfig, PromotionQuorumManager, SnapshotNode,
};
use std::io::Write;
use std::sync::Arc;

struct Recorded(AugmentationResponse);

impl AugmentationClient for Recorded {
    fn call(&self, _request: AugmentationRequest) -> AugmentationFuture {
        let response = self.0.clone();
        Box::pin(async move { Ok(response) })
    }
}

fn create_catalogue(products: usize) -> DocumentSnapshot {
    let items = (0..products).map(|i| {
        SnapshotNode::new("div")
            .class("product")
            .child(SnapshotNode::new("h2").class("title").text(format!("Widget {}", i)))
            .child(SnapshotNode::new("span").class("price").text(format!("${}.50", i + 3)))
    });
    DocumentSnapshot::new(
        Some("https://shop.example.com/catalogue".to_string()),
        SnapshotNode::new("html").child(
            SnapshotNode::new("body").child(SnapshotNode::new("div").class("products").children(items)),
        ),
    )
}

/// Brands shown in three structurally different regions of the page
fn create_storefront() -> DocumentSnapshot {
    let card = |title: &str, brand: &str| {
        SnapshotNode::new("div")
            .class("card")
            .child(SnapshotNode::new("h2").class("title").text(title))
            .child(SnapshotNode::new("span").class("brand").text(brand))
    };
    let item = |title: &str, brand: &str| {
        SnapshotNode::new("div")
            .class("item")
            .child(SnapshotNode::new("h2").class("title").text(title))
            .child(SnapshotNode::new("span").class("brand").text(brand))
    };

    let body = SnapshotNode::new("body")
        .child(
            SnapshotNode::new("section")
                .class("featured")
                .child(card("Rocket Skates", "Acme"))
                .child(card("Hover Board", "Globex")),
        )
        .child(
            SnapshotNode::new("section")
                .class("catalog")
                .child(item("Stapler", "Initech"))
                .child(item("Raincoat", "Umbrella")),
        )
        .child(
            SnapshotNode::new("aside").class("sidebar").child(
                SnapshotNode::new("div")
                    .class("promo")
                    .child(SnapshotNode::new("span").class("brand").text("Hooli")),
            ),
        );

    DocumentSnapshot::new(
        Some("https://shop.example.com/".to_string()),
        SnapshotNode::new("html").child(body),
    )
}

fn text_anchor(text: &str) -> EvidenceAnchor {
    EvidenceAnchor {
        text: Some(text.to_string()),
        ..EvidenceAnchor::default()
    }
}

fn brand_proposal(anchors: &[&str]) -> AugmentationResponse {
    AugmentationResponse {
        new_fields: vec![NewFieldProposal {
            name: "brand".to_string(),
            field_type: FieldType::Text,
            value: FieldValue::Text(anchors.first().copied().unwrap_or_default().to_string()),
            evidence: anchors.iter().map(|t| text_anchor(t)).collect(),
            confidence: 0.8,
        }],
        ..AugmentationResponse::default()
    }
}

fn evidence(selector: &str, path: &str, text: &str) -> DomEvidence {
    DomEvidence::new(selector, path, text, 0.9)
}

// Scenario A
#[tokio::test]
async fn test_missing_required_field_fails_request() {
    let document = DocumentSnapshot::new(
        None,
        SnapshotNode::new("html")
            .child(SnapshotNode::new("body").child(SnapshotNode::new("p").text("Nothing to see"))),
    );
    let contract = SchemaContract::new("people", "People")
        .with_field(FieldSpec::required("name", FieldType::Text).with_selectors(["h2.person-name"]))
        .with_field(FieldSpec::expected("bio", FieldType::Text));

    let pipeline = ExtractionPipeline::new(NegotiationConfig::default());
    let outcome = pipeline
        .run_with_contract(&ExtractionRequest::new("people", "test"), contract, &document)
        .await;

    assert_eq!(outcome.result.status, NegotiationStatus::Error);
    assert!(outcome.result.final_schema.is_empty());

    let failure = outcome.result.error.expect("failure diagnostic");
    assert_eq!(failure.code, NegotiationFailure::MISSING_REQUIRED_FIELD);
    assert_eq!(failure.field, "name");
    assert!(failure.message.contains("name"));
    assert!(failure
        .strategies_attempted
        .iter()
        .any(|s| s.contains("h2.person-name")));
    assert!(!outcome.event.outputs.success);
}

// Scenario B
#[test]
fn test_quorum_fails_both_thresholds() {
    let mut manager = PromotionQuorumManager::with_thresholds(5, 3);
    for (section, i) in [("featured", 0), ("featured", 1), ("list", 0), ("list", 1)] {
        let path = format!("html/body/section.{}/div.card[{}]/span.price", section, i);
        manager.register_entity(observe(
            "price",
            evidence("span.price", &path, &format!("${}", i + 1)),
            TrackType::Deterministic,
        ));
    }

    let validation = manager.enforce_promotion_quorum("price");
    assert!(!validation.is_valid);
    assert_eq!(validation.metadata.entity_count, 4);
    assert_eq!(validation.metadata.block_count, 2);
    assert_eq!(validation.errors.len(), 2);
    assert!(validation.errors[0].contains("entities"));
    assert!(validation.errors[1].contains("blocks"));
}

// Scenario C
#[test]
fn test_quorum_passes_with_spread() {
    let mut manager = PromotionQuorumManager::with_thresholds(5, 3);
    let regions = ["hero", "grid", "sidebar", "footer"];
    for i in 0..6 {
        let path = format!("html/body/div.{}/div.entry[{}]/h3", regions[i % 4], i);
        manager.register_entity(observe(
            "name",
            evidence("h3", &path, &format!("Entry {}", i)),
            TrackType::Deterministic,
        ));
    }

    let decision = manager.evaluate_field_promotion("name");
    assert!(decision.should_promote);
    assert_eq!(decision.metadata.entity_count, 6);
    assert_eq!(decision.metadata.block_count, 4);
    assert_eq!(manager.decision("name"), Some(&decision));
}

// Scenario D
#[tokio::test]
async fn test_sufficient_deterministic_track_skips_augmentation() {
    let mut config = NegotiationConfig::default();
    config.extraction.selector_confidence = 0.85;

    let contract = SchemaContract::new("widgets", "Widgets")
        .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]));
    let augmenter = LlmAugmenter::new(
        Arc::new(Recorded(brand_proposal(&["Widget 0"]))),
        config.augmentation.clone(),
    );
    let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

    let outcome = pipeline
        .run_with_contract(&ExtractionRequest::new("widget titles", "test"), contract, &create_catalogue(4))
        .await;

    assert!((outcome.track_a.confidence - 0.85).abs() < 1e-9);
    assert_eq!(outcome.track_a.metadata.required_satisfied, 1);

    let augmentation = outcome.augmentation.expect("augmenter configured");
    assert_eq!(augmentation.source, AugmentationSource::SkippedSufficientDeterministic);
    assert!(augmentation.fields.is_empty());

    let json = serde_json::to_value(&augmentation).unwrap();
    assert_eq!(json["source"], "skipped_sufficient_deterministic");
    assert_eq!(json["fields"], serde_json::json!({}));
}

// Scenario E
#[tokio::test]
async fn test_quorum_backed_new_field_is_added() {
    let mut config = NegotiationConfig::default();
    // Force the augmented track
    config.augmentation.confidence_gate = 0.95;

    let contract = SchemaContract::new("storefront", "Storefront")
        .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]));
    let proposal = brand_proposal(&["Acme", "Globex", "Initech", "Umbrella", "Hooli"]);
    let augmenter = LlmAugmenter::new(Arc::new(Recorded(proposal)), config.augmentation.clone());
    let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

    let outcome = pipeline
        .run_with_contract(&ExtractionRequest::new("storefront", "test"), contract.clone(), &create_storefront())
        .await;

    let result = &outcome.result;
    assert!(result.is_success());
    assert!(result.changes.was_added("brand"));

    let brand = result.schema_field("brand").expect("brand admitted");
    assert_eq!(brand.kind, FieldKind::Expected);
    assert_eq!(brand.field_type, FieldType::Text);

    let quorum = &result.evidence_summary.quorum_analysis["brand"];
    assert_eq!(quorum.entity_count, 5);
    assert_eq!(quorum.unique_signatures, 3);
    assert!(quorum.is_promotion_valid);

    let value = &result.final_data["brand"];
    assert_eq!(value.found_by, vec![TrackType::LlmAugmented]);
    assert!((value.confidence - 0.8 * 0.8).abs() < 1e-9);

    // Input contract is untouched
    assert!(!contract.contains("brand"));
}

#[tokio::test]
async fn test_new_field_without_block_spread_is_pruned() {
    let mut config = NegotiationConfig::default();
    config.augmentation.confidence_gate = 0.95;

    let contract = SchemaContract::new("storefront", "Storefront")
        .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]));
    // Four anchors from only two regions
    let proposal = brand_proposal(&["Acme", "Globex", "Initech", "Umbrella"]);
    let augmenter = LlmAugmenter::new(Arc::new(Recorded(proposal)), config.augmentation.clone());
    let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

    let outcome = pipeline
        .run_with_contract(&ExtractionRequest::new("storefront", "test"), contract, &create_storefront())
        .await;

    let result = &outcome.result;
    assert!(result.is_success());
    assert!(result.changes.was_pruned("brand"));
    assert!(result.schema_field("brand").is_none());
    assert!(!result.final_data.contains_key("brand"));
}

#[tokio::test]
async fn test_fabricated_anchor_is_rejected() {
    let mut config = NegotiationConfig::default();
    config.augmentation.confidence_gate = 0.95;

    let contract = SchemaContract::new("storefront", "Storefront")
        .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]));
    let proposal = brand_proposal(&["Acme", "Globex", "Initech", "Umbrella", "Cyberdyne"]);
    let augmenter = LlmAugmenter::new(Arc::new(Recorded(proposal)), config.augmentation.clone());
    let pipeline = ExtractionPipeline::new(config).with_augmenter(augmenter);

    let outcome = pipeline
        .run_with_contract(&ExtractionRequest::new("storefront", "test"), contract, &create_storefront())
        .await;

    let augmentation = outcome.augmentation.unwrap();
    assert_eq!(augmentation.source, AugmentationSource::Augmented);
    assert!(augmentation.rejected.iter().any(|r| r.field == "brand"));
    assert!(outcome.result.schema_field("brand").is_none());
}

#[tokio::test]
async fn test_generated_contract_end_to_end() {
    let ledger = Arc::new(InMemoryLedger::new());
    let pipeline = ExtractionPipeline::new(NegotiationConfig::default()).with_ledger(ledger.clone());
    let request = ExtractionRequest::new("Extract product names and prices", "test");

    let outcome = pipeline.run(&request, &create_catalogue(6), &[]).await;

    assert_eq!(outcome.contract.field("name").map(|f| f.kind), Some(FieldKind::Required));
    assert_eq!(outcome.contract.field("price").map(|f| f.kind), Some(FieldKind::Expected));
    assert!(outcome.result.is_success());

    // One name per product card, never the card or list text
    let name = &outcome.result.final_data["name"];
    assert_eq!(name.support, 6);
    assert_eq!(outcome.result.evidence_summary.field_support["name"], 6);
    let expected_names: Vec<FieldValue> = (0..6)
        .map(|i| FieldValue::Text(format!("Widget {}", i)))
        .collect();
    assert_eq!(name.value, FieldValue::List(expected_names));
    assert!(!name.value.as_text().contains('$'));
    assert!(outcome.track_a.evidence["name"]
        .iter()
        .all(|e| e.dom_path.ends_with("h2.title")));

    let price = &outcome.result.final_data["price"];
    assert_eq!(price.support, 6);
    let expected_prices: Vec<FieldValue> = (0..6)
        .map(|i| FieldValue::Number(i as f64 + 3.5))
        .collect();
    assert_eq!(price.value, FieldValue::List(expected_prices));
    assert!((outcome.result.evidence_summary.reliability_score - 1.0).abs() < 1e-9);

    let proof = outcome.proof.expect("ledger configured");
    assert!(ledger.verify(&proof));
    assert_eq!(outcome.event.execution_ref, request.request_id.to_string());
}

#[tokio::test]
async fn test_every_final_field_has_evidence() {
    let contract = SchemaContract::new("widgets", "Widgets")
        .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]))
        .with_field(FieldSpec::expected("price", FieldType::Currency).with_selectors([".price"]))
        .with_field(FieldSpec::expected("sku", FieldType::Text).with_selectors([".sku"]))
        .with_field(FieldSpec::discoverable("rating", FieldType::Number).with_selectors([".stars"]));

    let pipeline = ExtractionPipeline::new(NegotiationConfig::default());
    let outcome = pipeline
        .run_with_contract(&ExtractionRequest::new("widgets", "test"), contract, &create_catalogue(5))
        .await;

    let result = &outcome.result;
    assert!(result.is_success());
    for field in &result.final_schema {
        assert!(
            result.evidence_summary.field_support[&field.name] > 0,
            "{} has no evidence",
            field.name
        );
    }
    assert!(result.changes.was_pruned("sku"));
    assert!(result.changes.was_pruned("rating"));
}

#[tokio::test]
async fn test_negotiation_is_repeatable() {
    let contract = SchemaContract::new("widgets", "Widgets")
        .with_field(FieldSpec::required("title", FieldType::Text).with_selectors(["h2.title"]))
        .with_field(FieldSpec::expected("price", FieldType::Currency).with_selectors([".price"]));
    let request = ExtractionRequest::new("widgets", "test");
    let pipeline = ExtractionPipeline::new(NegotiationConfig::default());
    let document = create_catalogue(5);

    let first = pipeline.run_with_contract(&request, contract.clone(), &document).await;
    let second = pipeline.run_with_contract(&request, contract, &document).await;

    assert_eq!(first.result.final_schema, second.result.final_schema);
    assert_eq!(first.result.final_data, second.result.final_data);
    assert_eq!(first.event.inputs_hash, second.event.inputs_hash);
    assert_ne!(first.event.event_id, second.event.event_id);
}

#[test]
fn test_negotiator_without_quorum_never_admits() {
    let contract = SchemaContract::new("c", "C").with_field(FieldSpec::required("title", FieldType::Text));

    let mut track_a = EvidenceTrack::empty(TrackType::Deterministic);
    track_a.insert(
        "title",
        FieldValue::Text("Hello".into()),
        vec![evidence("h1", "html/body/h1", "Hello")],
        0.9,
    );
    let mut track_b = EvidenceTrack::empty(TrackType::LlmAugmented);
    let brands = (0..6)
        .map(|i| evidence("span.brand", &format!("html/body/div.r{}/span.brand", i), "Acme"))
        .collect();
    track_b.insert("brand", FieldValue::Text("Acme".into()), brands, 0.9);

    let result = EvidenceNegotiator::default().negotiate(&contract, &track_a, Some(&track_b), None);

    assert!(result.is_success());
    assert!(result.changes.was_pruned("brand"));
    assert_eq!(result.field_names(), vec!["title"]);
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[quorum]
min_entities = 4
min_blocks = 2

[negotiation]
demotion_ratio = 0.25
"#
    )
    .unwrap();

    let config = NegotiationConfig::from_file(file.path()).unwrap();
    assert_eq!(config.quorum.min_entities, 4);
    assert_eq!(config.quorum.min_blocks, 2);
    assert_eq!(config.negotiation.demotion_ratio, 0.25);
    assert_eq!(config.negotiation.discoverable_promotion_confidence, 0.8);
    assert!(config
        .constraint_labels()
        .contains(&"quorum.min_entities=4".to_string()));
}

#[test]
fn test_invalid_config_rejected() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "quorum:\n  min_blocks: 0").unwrap();

    let err = NegotiationConfig::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("min_blocks"));
}
