//! Schema contract types
//!
//! A contract is the typed field list a query is negotiated against. Contracts
//! are immutable once negotiated: negotiation always builds a new one.

use serde::{Deserialize, Serialize};

/// Query-derived field contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Contract identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Description used for contract matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Domain keywords used for contract matching
    #[serde(default)]
    pub domain_keywords: Vec<String>,

    /// Field specifications, in contract order
    pub fields: Vec<FieldSpec>,

    /// Negotiation governance
    #[serde(default)]
    pub governance: Governance,
}

impl SchemaContract {
    /// Create an empty contract with default governance
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            domain_keywords: Vec::new(),
            fields: Vec::new(),
            governance: Governance::default(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set domain keywords
    pub fn with_domain_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set governance
    pub fn with_governance(mut self, governance: Governance) -> Self {
        self.governance = governance;
        self
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the contract declares this field
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Fields of the given kind
    pub fn fields_of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |f| f.kind == kind)
    }

    /// Number of required fields
    pub fn required_count(&self) -> usize {
        self.fields_of_kind(FieldKind::Required).count()
    }
}

/// Negotiation governance attached to a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Governance {
    /// Minimum evidence hits for a new field to be considered
    #[serde(default = "default_min_support")]
    pub min_support_threshold: usize,

    /// Maximum number of new fields admitted per negotiation
    #[serde(default = "default_max_discoverable")]
    pub max_discoverable_fields: usize,

    /// Whether fields outside the contract may be admitted at all
    #[serde(default = "default_allow_new")]
    pub allow_new_fields: bool,
}

fn default_min_support() -> usize {
    3
}

fn default_max_discoverable() -> usize {
    10
}

fn default_allow_new() -> bool {
    true
}

impl Default for Governance {
    fn default() -> Self {
        Self {
            min_support_threshold: default_min_support(),
            max_discoverable_fields: default_max_discoverable(),
            allow_new_fields: default_allow_new(),
        }
    }
}

/// A single field in a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name (snake_case)
    pub name: String,

    /// Negotiation tier
    pub kind: FieldKind,

    /// Value type
    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    /// Value validators applied to deterministic hits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,

    /// Extraction hints for the deterministic track
    #[serde(default)]
    pub hints: ExtractionHints,

    /// Example values, used for contract matching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,

    /// Set on expected fields kept with weak relative support
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub weakly_evidenced: bool,
}

impl FieldSpec {
    /// Create a field with no hints
    pub fn new(name: impl Into<String>, kind: FieldKind, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            field_type,
            validators: Vec::new(),
            hints: ExtractionHints::default(),
            examples: Vec::new(),
            weakly_evidenced: false,
        }
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, FieldKind::Required, field_type)
    }

    pub fn expected(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, FieldKind::Expected, field_type)
    }

    pub fn discoverable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, FieldKind::Discoverable, field_type)
    }

    /// Add hint selectors
    pub fn with_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints
            .selectors
            .extend(selectors.into_iter().map(Into::into));
        self
    }

    /// Add hint keywords
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints
            .keywords
            .extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Add a validator
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Add example values
    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples.extend(examples.into_iter().map(Into::into));
        self
    }

    /// Copy with a different kind
    pub fn retagged(&self, kind: FieldKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Keywords used when scanning class names: hint keywords plus the name parts
    pub fn search_keywords(&self) -> Vec<String> {
        let mut keywords: Vec<String> = self
            .hints
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        for part in self.name.split('_').filter(|p| p.len() > 2) {
            let part = part.to_lowercase();
            if !keywords.contains(&part) {
                keywords.push(part);
            }
        }
        keywords
    }
}

/// Negotiation tier of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Must be evidenced or negotiation fails
    Required,
    /// Kept when evidenced, pruned otherwise
    Expected,
    /// Promoted only on strong evidence
    Discoverable,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Expected => "expected",
            Self::Discoverable => "discoverable",
        }
    }
}

/// Value types a field can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    Currency,
    Boolean,
    Url,
    Image,
    Date,
    Email,
    Phone,
    List,
}

impl FieldType {
    /// Attribute that carries the value for link-like types
    pub fn value_attribute(&self) -> Option<&'static str> {
        match self {
            Self::Url => Some("href"),
            Self::Image => Some("src"),
            Self::Date => Some("datetime"),
            _ => None,
        }
    }
}

/// Extraction hints consumed by the deterministic track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionHints {
    /// CSS selectors tried first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,

    /// Keywords matched against class names, ids and itemprops
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Value validators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Validator {
    /// Value must contain non-whitespace
    NonEmpty,

    /// Minimum character length
    MinLength { length: usize },

    /// Maximum character length
    MaxLength { length: usize },

    /// Regex the value must match
    Pattern { regex: String },

    /// Allowed values (case-insensitive)
    OneOf { values: Vec<String> },
}

impl Validator {
    /// Check a raw text value. Invalid patterns reject the value.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::NonEmpty => !value.trim().is_empty(),
            Self::MinLength { length } => value.chars().count() >= *length,
            Self::MaxLength { length } => value.chars().count() <= *length,
            Self::Pattern { regex } => regex::Regex::new(regex)
                .map(|re| re.is_match(value))
                .unwrap_or(false),
            Self::OneOf { values } => values.iter().any(|v| v.eq_ignore_ascii_case(value.trim())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NonEmpty => "non_empty",
            Self::MinLength { .. } => "min_length",
            Self::MaxLength { .. } => "max_length",
            Self::Pattern { .. } => "pattern",
            Self::OneOf { .. } => "one_of",
        }
    }
}
