//! Document access
//!
//! The engine never parses markup itself. It reads documents through
//! [`DomDocument`]; [`DocumentSnapshot`] is the element tree delivered by the
//! rendering worker, with a small CSS selector evaluator on top.

mod selector;
mod snapshot;

pub use selector::Selector;
pub use snapshot::{DocumentSnapshot, SnapshotNode};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// DOM access errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Document is empty")]
    Empty,

    #[error("Malformed document: {0}")]
    Malformed(String),
}

impl DocumentError {
    pub(crate) fn invalid_selector(selector: &str, reason: impl Into<String>) -> Self {
        DocumentError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}

/// Queryable view of a parsed document
pub trait DomDocument: Send + Sync {
    /// Elements matching a CSS selector, in document order
    fn select(&self, selector: &str) -> Result<Vec<DomElement>, DocumentError>;

    /// Every element, in document order
    fn elements(&self) -> Result<Vec<DomElement>, DocumentError>;

    /// Direct children of the element at `dom_path`
    fn children(&self, dom_path: &str) -> Vec<DomElement>;

    /// Whether the literal text occurs in the document's text content
    fn contains_text(&self, needle: &str) -> bool;

    /// Whole-document text content
    fn text(&self) -> String;

    /// Source URL, when known
    fn url(&self) -> Option<&str>;
}

/// Owned view of a single element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomElement {
    /// Path from the root, e.g. `html/body/ul.items/li.item[2]`
    pub dom_path: String,

    pub tag_name: String,

    pub class_names: Vec<String>,

    pub attributes: BTreeMap<String, String>,

    /// Own and descendant text, whitespace-normalised
    pub text_content: String,

    pub depth: usize,

    pub child_count: usize,
}

impl DomElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// `tag.class1.class2` (or `tag#id` when the element has an id)
    pub fn short_selector(&self) -> String {
        if let Some(id) = self.id() {
            return format!("{}#{}", self.tag_name, id);
        }
        let mut selector = self.tag_name.clone();
        for class in &self.class_names {
            selector.push('.');
            selector.push_str(class);
        }
        selector
    }

    /// Tag plus classes, without positional information
    pub fn shape(&self) -> String {
        let mut shape = self.tag_name.clone();
        for class in &self.class_names {
            shape.push('.');
            shape.push_str(class);
        }
        shape
    }

    /// Value for a field: the type's carrier attribute if present, else text
    pub fn value_for(&self, attribute: Option<&str>) -> String {
        attribute
            .and_then(|a| self.attr(a))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.text_content.clone())
    }
}

/// Collapse runs of whitespace to single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
