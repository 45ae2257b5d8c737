//! Element-tree snapshot of a rendered page
//!
//! The rendering worker serialises the DOM as nested `{tag, attributes,
//! text, children}` nodes. The snapshot flattens that tree into an arena so
//! paths, parents and text can be resolved without re-walking it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::selector::{Combinator, Matchable, Selector, Step};
use super::{normalize_whitespace, DocumentError, DomDocument, DomElement};

/// Serialised DOM node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub tag: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    /// Text directly inside this node
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Set the `class` attribute
    pub fn class(self, classes: impl Into<String>) -> Self {
        self.attr("class", classes)
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children<I: IntoIterator<Item = SnapshotNode>>(mut self, children: I) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotSource {
    #[serde(default)]
    url: Option<String>,
    root: SnapshotNode,
}

#[derive(Debug, Clone)]
struct FlatNode {
    parent: Option<usize>,
    children: Vec<usize>,
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    own_text: String,
    path: String,
    depth: usize,
}

impl Matchable for FlatNode {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Flattened, queryable document
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    url: Option<String>,
    nodes: Vec<FlatNode>,
    by_path: HashMap<String, usize>,
    text: String,
}

impl DocumentSnapshot {
    /// Build from a root node
    pub fn new(url: Option<String>, root: SnapshotNode) -> Self {
        let mut nodes = Vec::new();
        flatten(&root, None, "", 0, &mut nodes);

        let by_path = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.path.clone(), i))
            .collect();

        let mut snapshot = Self {
            url,
            nodes,
            by_path,
            text: String::new(),
        };
        snapshot.text = if snapshot.nodes.is_empty() {
            String::new()
        } else {
            snapshot.text_of(0)
        };
        snapshot
    }

    /// Parse the worker's JSON form: `{"url": ..., "root": {...}}`
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let source: SnapshotSource =
            serde_json::from_str(json).map_err(|e| DocumentError::Malformed(e.to_string()))?;
        if source.root.tag.trim().is_empty() {
            return Err(DocumentError::Empty);
        }
        Ok(Self::new(source.url, source.root))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn text_of(&self, index: usize) -> String {
        let mut parts = Vec::new();
        self.collect_text(index, &mut parts);
        normalize_whitespace(&parts.join(" "))
    }

    fn collect_text<'a>(&'a self, index: usize, parts: &mut Vec<&'a str>) {
        let node = &self.nodes[index];
        if !node.own_text.is_empty() {
            parts.push(&node.own_text);
        }
        for &child in &node.children {
            self.collect_text(child, parts);
        }
    }

    fn element(&self, index: usize) -> DomElement {
        let node = &self.nodes[index];
        DomElement {
            dom_path: node.path.clone(),
            tag_name: node.tag.clone(),
            class_names: node.classes.clone(),
            attributes: node.attributes.clone(),
            text_content: self.text_of(index),
            depth: node.depth,
            child_count: node.children.len(),
        }
    }

    fn matches_steps(&self, index: usize, steps: &[Step]) -> bool {
        let Some((last, rest)) = steps.split_last() else {
            return true;
        };
        if !last.compound.matches(&self.nodes[index]) {
            return false;
        }
        if rest.is_empty() {
            return true;
        }

        match last.combinator {
            Combinator::Child => self.nodes[index]
                .parent
                .map(|p| self.matches_steps(p, rest))
                .unwrap_or(false),
            Combinator::Descendant => {
                let mut ancestor = self.nodes[index].parent;
                while let Some(a) = ancestor {
                    if self.matches_steps(a, rest) {
                        return true;
                    }
                    ancestor = self.nodes[a].parent;
                }
                false
            }
        }
    }
}

fn flatten(
    node: &SnapshotNode,
    parent: Option<usize>,
    segment: &str,
    depth: usize,
    nodes: &mut Vec<FlatNode>,
) -> usize {
    let tag = node.tag.trim().to_ascii_lowercase();
    let classes: Vec<String> = node
        .attributes
        .get("class")
        .map(|c| c.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let path = match parent {
        Some(p) => format!("{}/{}", nodes[p].path, segment),
        None => segment_for(&tag, &classes, None),
    };

    let index = nodes.len();
    nodes.push(FlatNode {
        parent,
        children: Vec::new(),
        tag,
        classes,
        attributes: node.attributes.clone(),
        own_text: normalize_whitespace(&node.text),
        path,
        depth,
    });

    // Positional index only when a tag repeats among siblings
    let mut tag_totals: HashMap<String, usize> = HashMap::new();
    for child in &node.children {
        *tag_totals
            .entry(child.tag.trim().to_ascii_lowercase())
            .or_default() += 1;
    }
    let mut tag_seen: HashMap<String, usize> = HashMap::new();

    for child in &node.children {
        let child_tag = child.tag.trim().to_ascii_lowercase();
        let child_classes: Vec<String> = child
            .attributes
            .get("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let position = if tag_totals.get(&child_tag).copied().unwrap_or(0) > 1 {
            let seen = tag_seen.entry(child_tag.clone()).or_default();
            let current = *seen;
            *seen += 1;
            Some(current)
        } else {
            None
        };
        let child_segment = segment_for(&child_tag, &child_classes, position);
        let child_index = flatten(child, Some(index), &child_segment, depth + 1, nodes);
        nodes[index].children.push(child_index);
    }

    index
}

fn segment_for(tag: &str, classes: &[String], position: Option<usize>) -> String {
    let mut segment = tag.to_string();
    for class in classes {
        segment.push('.');
        segment.push_str(class);
    }
    if let Some(position) = position {
        segment.push_str(&format!("[{}]", position));
    }
    segment
}

impl DomDocument for DocumentSnapshot {
    fn select(&self, selector: &str) -> Result<Vec<DomElement>, DocumentError> {
        let parsed = Selector::parse(selector)?;
        let matches = (0..self.nodes.len())
            .filter(|&i| {
                parsed
                    .groups()
                    .iter()
                    .any(|steps| self.matches_steps(i, steps))
            })
            .map(|i| self.element(i))
            .collect();
        Ok(matches)
    }

    fn elements(&self) -> Result<Vec<DomElement>, DocumentError> {
        if self.nodes.is_empty() {
            return Err(DocumentError::Empty);
        }
        Ok((0..self.nodes.len()).map(|i| self.element(i)).collect())
    }

    fn children(&self, dom_path: &str) -> Vec<DomElement> {
        self.by_path
            .get(dom_path)
            .map(|&i| {
                self.nodes[i]
                    .children
                    .iter()
                    .map(|&c| self.element(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn contains_text(&self, needle: &str) -> bool {
        let needle = normalize_whitespace(needle);
        !needle.is_empty() && self.text.contains(&needle)
    }

    fn text(&self) -> String {
        self.text.clone()
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DocumentSnapshot {
        let products = (0..3).map(|i| {
            SnapshotNode::new("div")
                .class("product")
                .child(SnapshotNode::new("h2").class("title").text(format!("Item {}", i)))
                .child(SnapshotNode::new("span").class("price").text(format!("${}.99", i + 10)))
        });
        let root = SnapshotNode::new("html")
            .child(SnapshotNode::new("head").child(SnapshotNode::new("title").text("Shop")))
            .child(
                SnapshotNode::new("body")
                    .child(SnapshotNode::new("div").class("products").children(products)),
            );
        DocumentSnapshot::new(Some("https://shop.example/list".to_string()), root)
    }

    #[test]
    fn test_paths_carry_sibling_positions() {
        let doc = catalog();
        let titles = doc.select("h2.title").unwrap();
        assert_eq!(titles.len(), 3);
        assert_eq!(
            titles[2].dom_path,
            "html/body/div.products/div.product[2]/h2.title"
        );
        assert_eq!(titles[0].text_content, "Item 0");
    }

    #[test]
    fn test_combinators() {
        let doc = catalog();
        assert_eq!(doc.select("div.products > div.product").unwrap().len(), 3);
        assert_eq!(doc.select("body > div.product").unwrap().len(), 0);
        assert_eq!(doc.select("body .price").unwrap().len(), 3);
        assert_eq!(doc.select("head title, .title").unwrap().len(), 4);
    }

    #[test]
    fn test_text_and_children() {
        let doc = catalog();
        assert!(doc.contains_text("$11.99"));
        assert!(!doc.contains_text("$99.99"));
        assert!(!doc.contains_text("   "));
        let children = doc.children("html/body/div.products");
        assert_eq!(children.len(), 3);
        assert_eq!(children[1].text_content, "Item 1 $11.99");
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"url":"https://a.example","root":{"tag":"html","children":[{"tag":"p","text":"hello"}]}}"#;
        let doc = DocumentSnapshot::from_json(json).unwrap();
        assert_eq!(doc.url(), Some("https://a.example"));
        assert_eq!(doc.select("p").unwrap()[0].dom_path, "html/p");
        assert!(matches!(
            DocumentSnapshot::from_json("{"),
            Err(DocumentError::Malformed(_))
        ));
    }
}
