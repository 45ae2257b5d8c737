//! Query to field contract
//!
//! A known contract is reused when it scores above the match threshold
//! against the query; otherwise a contract is synthesized from field
//! archetypes named in the query. Generation never fails: with nothing to go
//! on it returns the generic `title` / `content` / `metadata` contract.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::contracts::*;

/// Signal weights for known-contract scoring
const DOMAIN_WEIGHT: f64 = 0.3;
const FIELD_WEIGHT: f64 = 0.4;
const DESCRIPTION_WEIGHT: f64 = 0.3;

const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "by", "data", "each", "every",
    "extract", "find", "for", "from", "get", "give", "in", "into", "is", "it", "its", "list",
    "me", "of", "on", "or", "page", "please", "pull", "scrape", "show", "that", "the", "their",
    "them", "this", "to", "what", "which", "with",
];

/// A field shape recognisable from query wording
struct Archetype {
    name: &'static str,
    field_type: FieldType,
    triggers: &'static [&'static str],
    selectors: &'static [&'static str],
}

const ARCHETYPES: &[Archetype] = &[
    Archetype {
        name: "name",
        field_type: FieldType::Text,
        triggers: &["name", "title", "product", "item", "headline", "heading", "listing"],
        selectors: &["h1", "h2", "h3", ".name", ".title"],
    },
    Archetype {
        name: "description",
        field_type: FieldType::Text,
        triggers: &["description", "summary", "detail", "overview", "about", "bio"],
        selectors: &[".description", ".summary"],
    },
    Archetype {
        name: "url",
        field_type: FieldType::Url,
        triggers: &["url", "link", "href", "website"],
        selectors: &["a[href]"],
    },
    Archetype {
        name: "price",
        field_type: FieldType::Currency,
        triggers: &["price", "cost", "pricing", "usd", "fee"],
        selectors: &[".price"],
    },
    Archetype {
        name: "date",
        field_type: FieldType::Date,
        triggers: &["date", "published", "posted", "deadline", "when"],
        selectors: &["time[datetime]", ".date"],
    },
    Archetype {
        name: "email",
        field_type: FieldType::Email,
        triggers: &["email", "mail", "contact"],
        selectors: &["a[href^=\"mailto:\"]"],
    },
    Archetype {
        name: "phone",
        field_type: FieldType::Phone,
        triggers: &["phone", "telephone", "tel", "mobile"],
        selectors: &["a[href^=\"tel:\"]"],
    },
    Archetype {
        name: "image",
        field_type: FieldType::Image,
        triggers: &["image", "photo", "picture", "thumbnail", "img"],
        selectors: &["img[src]"],
    },
    Archetype {
        name: "author",
        field_type: FieldType::Text,
        triggers: &["author", "writer", "byline"],
        selectors: &[".author", ".byline"],
    },
    Archetype {
        name: "category",
        field_type: FieldType::Text,
        triggers: &["category", "tag", "genre", "section"],
        selectors: &[".category", ".tag"],
    },
];

impl Archetype {
    fn triggered_by(&self, tokens: &BTreeSet<String>) -> bool {
        self.triggers.iter().any(|t| tokens.contains(*t))
    }

    /// True when the contract already has this field or one named by a trigger
    fn covered_by(&self, contract: &SchemaContract) -> bool {
        contract.contains(self.name)
            || contract
                .fields
                .iter()
                .any(|f| tokenize(&f.name).iter().any(|t| self.triggers.contains(&t.as_str())))
    }

    fn spec(&self, kind: FieldKind) -> FieldSpec {
        FieldSpec::new(self.name, kind, self.field_type)
            .with_selectors(self.selectors.iter().copied())
            .with_keywords(self.triggers.iter().copied())
    }
}

/// Naive singular form: `categories` -> `category`, `prices` -> `price`
fn singular(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Lowercased, singularised content words
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .map(|w| singular(&w))
        .collect()
}

/// |a ∩ b| / min(|a|, |b|)
fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())[..12].to_string()
}

/// Contract generator
#[derive(Debug, Clone, Default)]
pub struct SchemaContractGenerator {
    config: GeneratorConfig,
}

impl SchemaContractGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Weighted match of a known contract against query tokens
    pub fn score(&self, contract: &SchemaContract, query_tokens: &BTreeSet<String>, url_tokens: &BTreeSet<String>) -> f64 {
        let domain: BTreeSet<String> = contract
            .domain_keywords
            .iter()
            .flat_map(|k| tokenize(k))
            .collect();
        let context: BTreeSet<String> = query_tokens.union(url_tokens).cloned().collect();

        let field_terms: BTreeSet<String> = contract
            .fields
            .iter()
            .flat_map(|f| {
                let mut terms = tokenize(&f.name);
                for example in &f.examples {
                    terms.extend(tokenize(example));
                }
                terms
            })
            .collect();

        let description = contract
            .description
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();

        DOMAIN_WEIGHT * overlap(&domain, &context)
            + FIELD_WEIGHT * overlap(&field_terms, query_tokens)
            + DESCRIPTION_WEIGHT * overlap(&description, query_tokens)
    }

    /// Produce a contract for the query
    pub fn generate(
        &self,
        query: &str,
        url_hint: Option<&str>,
        content_sample: Option<&str>,
        known_contracts: &[SchemaContract],
    ) -> SchemaContract {
        let query_tokens = tokenize(query);
        let url_tokens = url_hint.map(tokenize).unwrap_or_default();

        let best = known_contracts
            .iter()
            .map(|c| (c, self.score(c, &query_tokens, &url_tokens)))
            .fold(None::<(&SchemaContract, f64)>, |best, (c, s)| match best {
                Some((_, top)) if top >= s => best,
                _ => Some((c, s)),
            });

        if let Some((known, score)) = best {
            debug!(contract = %known.id, score, "Best known contract");
            if score > self.config.match_threshold {
                let adapted = self.adapt(known, query, &query_tokens);
                info!(contract = %adapted.id, base = %known.id, score, "Adapted known contract");
                return adapted;
            }
        }

        let contract = self.synthesize(query, &query_tokens, content_sample);
        info!(
            contract = %contract.id,
            fields = contract.fields.len(),
            "Synthesized contract"
        );
        contract
    }

    /// Re-tag discoverable fields the query names and append inferred fields
    fn adapt(&self, known: &SchemaContract, query: &str, query_tokens: &BTreeSet<String>) -> SchemaContract {
        let mut adapted = known.clone();
        adapted.id = format!("{}-{}", known.id, short_hash(&[query]));

        for field in adapted.fields.iter_mut() {
            if field.kind == FieldKind::Discoverable
                && tokenize(&field.name).iter().any(|t| query_tokens.contains(t))
            {
                field.kind = FieldKind::Expected;
            }
        }

        for archetype in ARCHETYPES.iter().filter(|a| a.triggered_by(query_tokens)) {
            if archetype.covered_by(&adapted) {
                debug!(archetype = archetype.name, "Archetype already covered by contract");
                continue;
            }
            adapted.fields.push(archetype.spec(FieldKind::Expected));
        }

        adapted
    }

    fn synthesize(&self, query: &str, query_tokens: &BTreeSet<String>, content_sample: Option<&str>) -> SchemaContract {
        let id = format!("contract-{}", short_hash(&[query, content_sample.unwrap_or_default()]));
        let base = SchemaContract::new(id, query.trim())
            .with_description(query.trim())
            .with_domain_keywords(query_tokens.iter().cloned());

        let requested: Vec<&Archetype> = ARCHETYPES
            .iter()
            .filter(|a| a.triggered_by(query_tokens))
            .collect();

        if requested.is_empty() {
            return base
                .with_field(
                    FieldSpec::required("title", FieldType::Text).with_selectors(["title", "h1"]),
                )
                .with_field(
                    FieldSpec::expected("content", FieldType::Text)
                        .with_selectors(["article", "main"]),
                )
                .with_field(FieldSpec::discoverable("metadata", FieldType::Text));
        }

        let mut contract = base;
        for (i, archetype) in requested.iter().enumerate() {
            let kind = if i == 0 {
                FieldKind::Required
            } else {
                FieldKind::Expected
            };
            contract = contract.with_field(archetype.spec(kind));
        }

        // Archetypes the content suggests but the query did not ask for
        if let Some(sample) = content_sample {
            let sample_tokens = tokenize(sample);
            let limit = contract.governance.max_discoverable_fields;
            let discovered: Vec<FieldSpec> = ARCHETYPES
                .iter()
                .filter(|a| !a.covered_by(&contract) && a.triggered_by(&sample_tokens))
                .take(limit)
                .map(|a| a.spec(FieldKind::Discoverable))
                .collect();
            for field in discovered {
                contract = contract.with_field(field);
            }
        }

        contract
    }
}
