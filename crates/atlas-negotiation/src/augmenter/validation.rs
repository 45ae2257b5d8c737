//! Evidence anchor resolution
//!
//! Augmentation output is untrusted. A proposal survives only if every
//! anchor it cites resolves against the live document: the selector
//! matches an element, or the literal text is present.

use std::collections::BTreeSet;

use super::EvidenceAnchor;
use crate::contracts::DomEvidence;
use crate::document::{normalize_whitespace, DomDocument, DomElement};

/// Why an anchor set was refused
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorRejection {
    NoAnchors,
    Unresolved { index: usize },
    TooFewAnchors { resolved: usize, required: usize },
}

impl AnchorRejection {
    pub fn reason(&self) -> String {
        match self {
            Self::NoAnchors => "no_evidence_anchors".to_string(),
            Self::Unresolved { index } => format!("anchor_{}_unresolved", index),
            Self::TooFewAnchors { resolved, required } => {
                format!("insufficient_anchors: {} of {}", resolved, required)
            }
        }
    }
}

fn candidates(document: &dyn DomDocument, anchor: &EvidenceAnchor) -> Vec<DomElement> {
    let text = anchor
        .text
        .as_deref()
        .map(normalize_whitespace)
        .filter(|t| !t.is_empty());

    let pool = match (&anchor.dom_path, &anchor.selector) {
        (Some(path), _) => document
            .elements()
            .unwrap_or_default()
            .into_iter()
            .filter(|e| &e.dom_path == path)
            .collect(),
        (None, Some(selector)) => document.select(selector).unwrap_or_default(),
        (None, None) => {
            let Some(text) = &text else {
                return Vec::new();
            };
            if !document.contains_text(text) {
                return Vec::new();
            }
            let found: Vec<DomElement> = document
                .elements()
                .unwrap_or_default()
                .into_iter()
                .filter(|e| e.text_content.contains(text.as_str()))
                .collect();
            // Only the tightest containers; their ancestors are not separate evidence
            let tightest = found
                .iter()
                .filter(|e| {
                    let prefix = format!("{}/", e.dom_path);
                    !found.iter().any(|other| other.dom_path.starts_with(&prefix))
                })
                .cloned()
                .collect();
            return tightest;
        }
    };

    match &text {
        Some(text) => pool
            .into_iter()
            .filter(|e| e.text_content.contains(text.as_str()))
            .collect(),
        None => pool,
    }
}

fn to_evidence(anchor: &EvidenceAnchor, element: &DomElement, confidence: f64) -> DomEvidence {
    let selector = anchor
        .selector
        .clone()
        .unwrap_or_else(|| element.short_selector());
    DomEvidence::new(
        selector,
        element.dom_path.clone(),
        element.text_content.clone(),
        confidence,
    )
}

/// Resolve one anchor to the first matching element
pub fn resolve_anchor(
    document: &dyn DomDocument,
    anchor: &EvidenceAnchor,
    confidence: f64,
) -> Option<DomEvidence> {
    candidates(document, anchor)
        .first()
        .map(|element| to_evidence(anchor, element, confidence))
}

/// Resolve every anchor; any miss rejects the whole set. Anchors prefer
/// elements not already claimed by an earlier anchor, and the result holds
/// one evidence entry per distinct element.
pub fn resolve_anchors(
    document: &dyn DomDocument,
    anchors: &[EvidenceAnchor],
    confidence: f64,
    min_distinct: usize,
) -> Result<Vec<DomEvidence>, AnchorRejection> {
    if anchors.is_empty() {
        return Err(AnchorRejection::NoAnchors);
    }

    let mut claimed: BTreeSet<String> = BTreeSet::new();
    let mut evidence = Vec::new();

    for (index, anchor) in anchors.iter().enumerate() {
        let found = candidates(document, anchor);
        let Some(element) = found
            .iter()
            .find(|e| !claimed.contains(&e.dom_path))
            .or_else(|| found.first())
        else {
            return Err(AnchorRejection::Unresolved { index });
        };

        if claimed.insert(element.dom_path.clone()) {
            evidence.push(to_evidence(anchor, element, confidence));
        }
    }

    if evidence.len() < min_distinct.max(1) {
        return Err(AnchorRejection::TooFewAnchors {
            resolved: evidence.len(),
            required: min_distinct.max(1),
        });
    }

    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentSnapshot, SnapshotNode};

    fn doc() -> DocumentSnapshot {
        let cards = (0..3).map(|i| {
            SnapshotNode::new("div")
                .class("card")
                .child(SnapshotNode::new("span").class("brand").text(format!("Brand {}", i)))
        });
        DocumentSnapshot::new(
            None,
            SnapshotNode::new("html").child(SnapshotNode::new("body").children(cards)),
        )
    }

    fn by_selector(selector: &str) -> EvidenceAnchor {
        EvidenceAnchor {
            selector: Some(selector.to_string()),
            ..EvidenceAnchor::default()
        }
    }

    fn by_text(text: &str) -> EvidenceAnchor {
        EvidenceAnchor {
            text: Some(text.to_string()),
            ..EvidenceAnchor::default()
        }
    }

    #[test]
    fn test_text_anchor_lands_on_deepest_element() {
        let evidence = resolve_anchor(&doc(), &by_text("Brand 1"), 0.7).unwrap();
        assert_eq!(evidence.dom_path, "html/body/div.card[1]/span.brand");
        assert_eq!(evidence.selector, "span.brand");
    }

    #[test]
    fn test_unresolvable_anchor_rejects_set() {
        let anchors = vec![by_selector(".brand"), by_text("Brand 9")];
        assert_eq!(
            resolve_anchors(&doc(), &anchors, 0.7, 1),
            Err(AnchorRejection::Unresolved { index: 1 })
        );
        assert!(resolve_anchor(&doc(), &by_selector("span::after"), 0.7).is_none());
        assert_eq!(
            resolve_anchors(&doc(), &[], 0.7, 1),
            Err(AnchorRejection::NoAnchors)
        );
    }

    #[test]
    fn test_repeated_selector_claims_distinct_elements() {
        let anchors = vec![by_selector(".brand"), by_selector(".brand"), by_selector(".brand")];
        let evidence = resolve_anchors(&doc(), &anchors, 0.7, 3).unwrap();
        let paths: BTreeSet<_> = evidence.iter().map(|e| e.dom_path.clone()).collect();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_duplicate_anchors_do_not_count_twice() {
        let anchors = vec![by_text("Brand 0"), by_text("Brand 0"), by_text("Brand 0")];
        assert_eq!(
            resolve_anchors(&doc(), &anchors, 0.7, 3),
            Err(AnchorRejection::TooFewAnchors {
                resolved: 1,
                required: 3
            })
        );
    }
}
