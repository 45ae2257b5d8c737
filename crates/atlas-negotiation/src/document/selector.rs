//! CSS selector subset
//!
//! Supports type, universal, class, id and attribute selectors
//! (`[a]`, `[a=v]`, `[a*=v]`, `[a^=v]`, `[a$=v]`, `[a~=v]`), descendant and
//! child combinators, and comma-separated groups.

use super::DocumentError;

/// Parsed selector
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    groups: Vec<Vec<Step>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    /// Relation to the step on the left; ignored for the first step
    pub combinator: Combinator,
    pub compound: Compound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Compound {
    pub tag: Option<String>,
    pub ids: Vec<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeMatcher>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AttributeMatcher {
    pub name: String,
    pub op: AttributeOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttributeOp {
    Exists,
    Equals,
    Contains,
    Prefix,
    Suffix,
    Word,
}

/// Minimal element interface the matcher needs
pub(crate) trait Matchable {
    fn tag(&self) -> &str;
    fn classes(&self) -> &[String];
    fn attribute(&self, name: &str) -> Option<&str>;
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DocumentError::invalid_selector(input, "empty selector"));
        }

        let groups = split_groups(trimmed)
            .into_iter()
            .map(|group| parse_group(input, group.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { groups })
    }

    pub(crate) fn groups(&self) -> &[Vec<Step>] {
        &self.groups
    }
}

/// Split on commas outside attribute brackets and quotes
fn split_groups(input: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                groups.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&input[start..]);
    groups
}

fn parse_group(original: &str, group: &str) -> Result<Vec<Step>, DocumentError> {
    let chars: Vec<char> = group.chars().collect();
    let mut i = 0;
    let mut steps = Vec::new();
    let mut pending = Combinator::Descendant;
    let mut saw_child = false;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '>' {
            if steps.is_empty() || saw_child {
                return Err(DocumentError::invalid_selector(original, "dangling '>'"));
            }
            pending = Combinator::Child;
            saw_child = true;
            i += 1;
            continue;
        }

        let compound = parse_compound(original, &chars, &mut i)?;
        steps.push(Step {
            combinator: pending,
            compound,
        });
        pending = Combinator::Descendant;
        saw_child = false;
    }

    if steps.is_empty() {
        return Err(DocumentError::invalid_selector(original, "empty selector group"));
    }
    if saw_child {
        return Err(DocumentError::invalid_selector(original, "dangling '>'"));
    }
    Ok(steps)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], i: &mut usize) -> String {
    let start = *i;
    while *i < chars.len() && is_ident_char(chars[*i]) {
        *i += 1;
    }
    chars[start..*i].iter().collect()
}

fn skip_ws(chars: &[char], i: &mut usize) {
    while *i < chars.len() && chars[*i].is_whitespace() {
        *i += 1;
    }
}

fn parse_compound(
    original: &str,
    chars: &[char],
    i: &mut usize,
) -> Result<Compound, DocumentError> {
    let start = *i;
    let mut compound = Compound::default();

    if chars[*i] == '*' {
        *i += 1;
    } else if is_ident_char(chars[*i]) {
        compound.tag = Some(read_ident(chars, i).to_ascii_lowercase());
    }

    while let Some(&c) = chars.get(*i) {
        match c {
            '.' => {
                *i += 1;
                let class = read_ident(chars, i);
                if class.is_empty() {
                    return Err(DocumentError::invalid_selector(original, "empty class name"));
                }
                compound.classes.push(class);
            }
            '#' => {
                *i += 1;
                let id = read_ident(chars, i);
                if id.is_empty() {
                    return Err(DocumentError::invalid_selector(original, "empty id"));
                }
                compound.ids.push(id);
            }
            '[' => {
                *i += 1;
                compound
                    .attributes
                    .push(parse_attribute(original, chars, i)?);
            }
            _ => break,
        }
    }

    if *i == start {
        return Err(DocumentError::invalid_selector(
            original,
            format!("unexpected character '{}'", chars[start]),
        ));
    }
    if let Some(&c) = chars.get(*i) {
        if !c.is_whitespace() && c != '>' {
            return Err(DocumentError::invalid_selector(
                original,
                format!("unsupported syntax at '{}'", c),
            ));
        }
    }
    Ok(compound)
}

fn parse_attribute(
    original: &str,
    chars: &[char],
    i: &mut usize,
) -> Result<AttributeMatcher, DocumentError> {
    skip_ws(chars, i);
    let name = read_ident(chars, i).to_ascii_lowercase();
    if name.is_empty() {
        return Err(DocumentError::invalid_selector(original, "empty attribute name"));
    }
    skip_ws(chars, i);

    let op = match (chars.get(*i), chars.get(*i + 1)) {
        (Some(']'), _) => {
            *i += 1;
            return Ok(AttributeMatcher {
                name,
                op: AttributeOp::Exists,
                value: String::new(),
            });
        }
        (Some('='), _) => {
            *i += 1;
            AttributeOp::Equals
        }
        (Some(c), Some('=')) => {
            let op = match c {
                '*' => AttributeOp::Contains,
                '^' => AttributeOp::Prefix,
                '$' => AttributeOp::Suffix,
                '~' => AttributeOp::Word,
                _ => {
                    return Err(DocumentError::invalid_selector(
                        original,
                        format!("unknown attribute operator '{}='", c),
                    ))
                }
            };
            *i += 2;
            op
        }
        _ => {
            return Err(DocumentError::invalid_selector(
                original,
                "unterminated attribute selector",
            ))
        }
    };

    skip_ws(chars, i);
    let value = match chars.get(*i) {
        Some(&q) if q == '"' || q == '\'' => {
            *i += 1;
            let start = *i;
            while *i < chars.len() && chars[*i] != q {
                *i += 1;
            }
            if *i >= chars.len() {
                return Err(DocumentError::invalid_selector(original, "unterminated quote"));
            }
            let value: String = chars[start..*i].iter().collect();
            *i += 1;
            value
        }
        _ => {
            let start = *i;
            while *i < chars.len() && chars[*i] != ']' && !chars[*i].is_whitespace() {
                *i += 1;
            }
            chars[start..*i].iter().collect()
        }
    };

    skip_ws(chars, i);
    if chars.get(*i) != Some(&']') {
        return Err(DocumentError::invalid_selector(
            original,
            "unterminated attribute selector",
        ));
    }
    *i += 1;

    Ok(AttributeMatcher { name, op, value })
}

impl Compound {
    pub(crate) fn matches(&self, element: &impl Matchable) -> bool {
        if let Some(tag) = &self.tag {
            if !element.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if !self
            .classes
            .iter()
            .all(|c| element.classes().iter().any(|ec| ec == c))
        {
            return false;
        }
        if !self
            .ids
            .iter()
            .all(|id| element.attribute("id") == Some(id.as_str()))
        {
            return false;
        }
        self.attributes.iter().all(|m| m.matches(element))
    }
}

impl AttributeMatcher {
    fn matches(&self, element: &impl Matchable) -> bool {
        let Some(actual) = element.attribute(&self.name) else {
            return false;
        };
        match self.op {
            AttributeOp::Exists => true,
            AttributeOp::Equals => actual == self.value,
            AttributeOp::Contains => !self.value.is_empty() && actual.contains(&self.value),
            AttributeOp::Prefix => !self.value.is_empty() && actual.starts_with(&self.value),
            AttributeOp::Suffix => !self.value.is_empty() && actual.ends_with(&self.value),
            AttributeOp::Word => actual.split_whitespace().any(|w| w == self.value),
        }
    }
}
