//! Representative fragment selection
//!
//! The augmentation request carries a few structural containers that look
//! like list or record data, never the whole document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::AugmentationConfig;
use crate::document::{DomDocument, DomElement};

/// One fragment sent to the augmentation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSample {
    pub dom_path: String,

    /// Selector for the container
    pub selector: String,

    /// Children sharing the dominant shape
    pub repeated_children: usize,

    /// Container text, truncated
    pub text: String,
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Count of the most common child shape
fn dominant_repeat(children: &[DomElement]) -> usize {
    let mut shapes: HashMap<String, usize> = HashMap::new();
    for child in children {
        *shapes.entry(child.shape()).or_default() += 1;
    }
    shapes.into_values().max().unwrap_or(0)
}

fn overlaps(a: &str, b: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner == outer || inner.starts_with(&format!("{}/", outer))
    };
    nested(a, b) || nested(b, a)
}

/// Select up to `max_samples` repeated-structure containers, largest first.
/// Falls back to one truncated whole-document sample when nothing repeats.
pub fn select_samples(document: &dyn DomDocument, config: &AugmentationConfig) -> Vec<ContentSample> {
    let Ok(elements) = document.elements() else {
        return Vec::new();
    };

    let mut candidates: Vec<(usize, usize, &DomElement)> = elements
        .iter()
        .enumerate()
        .filter(|(_, e)| e.child_count >= config.min_repeated_children)
        .filter_map(|(order, element)| {
            let repeated = dominant_repeat(&document.children(&element.dom_path));
            (repeated >= config.min_repeated_children).then_some((repeated, order, element))
        })
        .collect();

    // Most repetition first, then document order
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut samples: Vec<ContentSample> = Vec::new();
    for (repeated, _, element) in candidates {
        if samples.len() >= config.max_samples {
            break;
        }
        if samples.iter().any(|s| overlaps(&s.dom_path, &element.dom_path)) {
            continue;
        }
        samples.push(ContentSample {
            dom_path: element.dom_path.clone(),
            selector: element.short_selector(),
            repeated_children: repeated,
            text: truncate_chars(&element.text_content, config.max_sample_chars),
        });
    }

    if samples.is_empty() {
        if let Some(root) = elements.first() {
            let text = document.text();
            if !text.is_empty() {
                samples.push(ContentSample {
                    dom_path: root.dom_path.clone(),
                    selector: root.short_selector(),
                    repeated_children: 0,
                    text: truncate_chars(&text, config.max_sample_chars),
                });
            }
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentSnapshot, SnapshotNode};

    fn list(class: &str, count: usize) -> SnapshotNode {
        SnapshotNode::new("ul").class(class).children(
            (0..count).map(|i| SnapshotNode::new("li").class("row").text(format!("{} {}", class, i))),
        )
    }

    #[test]
    fn test_prefers_largest_repeated_containers() {
        let root = SnapshotNode::new("html").child(
            SnapshotNode::new("body")
                .child(list("small", 3))
                .child(list("large", 8))
                .child(list("tiny", 2)),
        );
        let doc = DocumentSnapshot::new(None, root);
        let config = AugmentationConfig::default();

        let samples = select_samples(&doc, &config);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].selector, "ul.large");
        assert_eq!(samples[0].repeated_children, 8);
        assert_eq!(samples[1].selector, "ul.small");
    }

    #[test]
    fn test_caps_count_and_length() {
        let body = SnapshotNode::new("body").children((0..8).map(|i| list(&format!("l{}", i), 4)));
        let doc = DocumentSnapshot::new(None, SnapshotNode::new("html").child(body));
        let config = AugmentationConfig {
            max_samples: 3,
            max_sample_chars: 10,
            ..AugmentationConfig::default()
        };

        let samples = select_samples(&doc, &config);
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.text.chars().count() <= 10));
    }

    #[test]
    fn test_nested_containers_sampled_once() {
        // body repeats ul children, each ul repeats li children
        let body = SnapshotNode::new("body").children((0..3).map(|_| list("group", 3)));
        let doc = DocumentSnapshot::new(None, SnapshotNode::new("html").child(body));
        let samples = select_samples(&doc, &AugmentationConfig::default());
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].dom_path, "html/body");
    }

    #[test]
    fn test_falls_back_to_document_text() {
        let root = SnapshotNode::new("html").child(SnapshotNode::new("p").text("lonely paragraph"));
        let doc = DocumentSnapshot::new(None, root);
        let samples = select_samples(&doc, &AugmentationConfig::default());
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].text, "lonely paragraph");
        assert_eq!(samples[0].repeated_children, 0);
    }
}
