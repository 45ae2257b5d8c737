//! Deterministic extraction strategies

use regex::Regex;

use crate::contracts::*;
use crate::document::{DocumentError, DomDocument, DomElement};
use crate::extractor::{FieldExtractor, FieldHit};

/// Tags never treated as value carriers
const SKIPPED_TAGS: &[&str] = &["html", "head", "body", "script", "style", "noscript"];

/// Longest text a keyword/pattern hit may carry before it is treated as a container
const MAX_LEAF_TEXT: usize = 200;

fn is_value_carrier(element: &DomElement) -> bool {
    !SKIPPED_TAGS.contains(&element.tag_name.as_str())
        && (element.child_count == 0 || element.text_content.chars().count() <= MAX_LEAF_TEXT)
}

/// Runs the contract's hint selectors
pub struct SelectorHintStrategy {
    confidence: f64,
}

impl SelectorHintStrategy {
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }
}

impl FieldExtractor for SelectorHintStrategy {
    fn id(&self) -> &str {
        "selector"
    }

    fn applies_to(&self, field: &FieldSpec) -> bool {
        !field.hints.selectors.is_empty()
    }

    fn describe(&self, field: &FieldSpec) -> Vec<String> {
        field
            .hints
            .selectors
            .iter()
            .map(|s| format!("selector:{}", s))
            .collect()
    }

    fn extract(
        &self,
        document: &dyn DomDocument,
        field: &FieldSpec,
    ) -> Result<Vec<FieldHit>, DocumentError> {
        let attribute = field.field_type.value_attribute();
        let mut hits = Vec::new();

        for selector in &field.hints.selectors {
            for element in document.select(selector)? {
                let value = element.value_for(attribute);
                if value.is_empty() {
                    continue;
                }
                hits.push(FieldHit::new(
                    value,
                    DomEvidence::new(
                        selector.clone(),
                        element.dom_path.clone(),
                        element.text_content.clone(),
                        self.confidence,
                    ),
                ));
            }
        }

        Ok(hits)
    }
}

/// Reads `<title>` and `<meta>` tags for title/description/author/image-like fields
pub struct MetadataStrategy {
    confidence: f64,
}

impl MetadataStrategy {
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }

    fn selectors_for(field: &FieldSpec) -> &'static [&'static str] {
        match field.name.as_str() {
            "title" | "headline" | "name" | "page_title" => {
                &["title", "meta[property=\"og:title\"]"]
            }
            "description" | "summary" | "metadata" => &[
                "meta[name=\"description\"]",
                "meta[property=\"og:description\"]",
            ],
            "author" | "byline" => &["meta[name=\"author\"]"],
            "image" | "thumbnail" => &["meta[property=\"og:image\"]"],
            _ => &[],
        }
    }
}

impl FieldExtractor for MetadataStrategy {
    fn id(&self) -> &str {
        "metadata"
    }

    fn applies_to(&self, field: &FieldSpec) -> bool {
        !Self::selectors_for(field).is_empty()
    }

    fn describe(&self, field: &FieldSpec) -> Vec<String> {
        Self::selectors_for(field)
            .iter()
            .map(|s| format!("metadata:{}", s))
            .collect()
    }

    fn extract(
        &self,
        document: &dyn DomDocument,
        field: &FieldSpec,
    ) -> Result<Vec<FieldHit>, DocumentError> {
        let mut hits = Vec::new();
        for selector in Self::selectors_for(field) {
            for element in document.select(selector)? {
                let value = element.value_for(Some("content"));
                if value.is_empty() {
                    continue;
                }
                hits.push(FieldHit::new(
                    value.clone(),
                    DomEvidence::new(*selector, element.dom_path.clone(), value, self.confidence),
                ));
            }
        }
        Ok(hits)
    }
}

/// Matches field keywords against class names, ids and itemprops
pub struct ClassKeywordStrategy {
    confidence: f64,
}

impl ClassKeywordStrategy {
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }

    fn matches(element: &DomElement, keywords: &[String]) -> bool {
        let mut markers: Vec<String> = element
            .class_names
            .iter()
            .map(|c| c.to_lowercase())
            .collect();
        for attribute in ["id", "itemprop", "data-field"] {
            if let Some(value) = element.attr(attribute) {
                markers.push(value.to_lowercase());
            }
        }
        markers
            .iter()
            .any(|marker| keywords.iter().any(|k| marker.contains(k.as_str())))
    }
}

impl FieldExtractor for ClassKeywordStrategy {
    fn id(&self) -> &str {
        "class_keyword"
    }

    fn applies_to(&self, field: &FieldSpec) -> bool {
        !field.search_keywords().is_empty()
    }

    fn describe(&self, field: &FieldSpec) -> Vec<String> {
        vec![format!("class_keyword:{}", field.search_keywords().join("|"))]
    }

    fn extract(
        &self,
        document: &dyn DomDocument,
        field: &FieldSpec,
    ) -> Result<Vec<FieldHit>, DocumentError> {
        let keywords = field.search_keywords();
        let attribute = field.field_type.value_attribute();

        let matched: Vec<DomElement> = document
            .elements()?
            .into_iter()
            .filter(|e| is_value_carrier(e) && Self::matches(e, &keywords))
            .collect();

        // A match that contains another match is a container, not a value
        let innermost: Vec<&DomElement> = matched
            .iter()
            .filter(|outer| {
                let prefix = format!("{}/", outer.dom_path);
                !matched.iter().any(|inner| inner.dom_path.starts_with(&prefix))
            })
            .collect();

        let hits = innermost
            .into_iter()
            .filter_map(|element| {
                let value = element.value_for(attribute);
                if value.is_empty() {
                    return None;
                }
                Some(FieldHit::new(
                    value,
                    DomEvidence::new(
                        element.short_selector(),
                        element.dom_path.clone(),
                        element.text_content.clone(),
                        self.confidence,
                    ),
                ))
            })
            .collect();

        Ok(hits)
    }
}

/// Regex scan of leaf text for typed values (email, phone, price, date, url)
pub struct PatternStrategy {
    confidence: f64,
    patterns: Vec<(FieldType, Regex)>,
}

impl PatternStrategy {
    pub fn new(confidence: f64) -> Self {
        let sources = [
            (
                FieldType::Email,
                r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            ),
            (FieldType::Phone, r"\+?\d[\d\s().-]{7,}\d"),
            (
                FieldType::Currency,
                r"[$€£¥]\s?\d[\d,]*(?:\.\d{1,2})?|\d[\d,]*(?:\.\d{1,2})?\s?(?:USD|EUR|GBP)",
            ),
            (
                FieldType::Date,
                r"\b\d{4}-\d{2}-\d{2}\b|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.? \d{1,2},? \d{4}\b",
            ),
            (FieldType::Url, r#"https?://[^\s"'<>]+"#),
        ];

        let patterns = sources
            .into_iter()
            .filter_map(|(field_type, source)| Regex::new(source).ok().map(|re| (field_type, re)))
            .collect();

        Self {
            confidence,
            patterns,
        }
    }

    fn pattern_for(&self, field_type: FieldType) -> Option<&Regex> {
        self.patterns
            .iter()
            .find(|(t, _)| *t == field_type)
            .map(|(_, re)| re)
    }
}

impl FieldExtractor for PatternStrategy {
    fn id(&self) -> &str {
        "pattern"
    }

    fn applies_to(&self, field: &FieldSpec) -> bool {
        self.pattern_for(field.field_type).is_some()
    }

    fn describe(&self, field: &FieldSpec) -> Vec<String> {
        let field_type = serde_json::to_value(field.field_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        vec![format!("pattern:{}", field_type)]
    }

    fn extract(
        &self,
        document: &dyn DomDocument,
        field: &FieldSpec,
    ) -> Result<Vec<FieldHit>, DocumentError> {
        let Some(pattern) = self.pattern_for(field.field_type) else {
            return Ok(Vec::new());
        };

        let hits = document
            .elements()?
            .into_iter()
            .filter(|e| e.child_count == 0 && is_value_carrier(e))
            .filter_map(|element| {
                let found = pattern.find(&element.text_content)?;
                Some(FieldHit::new(
                    found.as_str().trim().to_string(),
                    DomEvidence::new(
                        element.short_selector(),
                        element.dom_path.clone(),
                        element.text_content.clone(),
                        self.confidence,
                    ),
                ))
            })
            .collect();

        Ok(hits)
    }
}
