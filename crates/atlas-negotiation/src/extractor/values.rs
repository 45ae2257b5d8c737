//! Raw text to typed field values

use crate::contracts::{FieldType, FieldValue};

/// Parse a number out of display text: `$1,299.00` -> 1299.0, `12,50 €` -> 12.5
///
/// A comma is the decimal separator when it follows the last dot
/// (`1.299,00`) or is the only separator and not followed by exactly three
/// digits (`12,50`). Otherwise commas group thousands.
pub fn parse_number(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let decimal_comma = match (kept.rfind(','), kept.rfind('.')) {
        (Some(comma), Some(dot)) => comma > dot,
        (Some(comma), None) => kept.matches(',').count() == 1 && kept.len() - comma - 1 != 3,
        _ => false,
    };

    let cleaned: String = if decimal_comma {
        kept.chars()
            .filter(|c| *c != '.')
            .map(|c| if c == ',' { '.' } else { c })
            .collect()
    } else {
        kept.chars().filter(|c| *c != ',').collect()
    };
    cleaned.parse().ok()
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "in stock" | "available" => Some(true),
        "false" | "no" | "n" | "0" | "out of stock" | "unavailable" => Some(false),
        _ => None,
    }
}

fn coerce_one(field_type: FieldType, raw: &str) -> FieldValue {
    let typed = match field_type {
        FieldType::Number | FieldType::Currency => parse_number(raw).map(FieldValue::Number),
        FieldType::Boolean => parse_bool(raw).map(FieldValue::Bool),
        _ => None,
    };
    typed.unwrap_or_else(|| FieldValue::Text(raw.trim().to_string()))
}

/// One hit yields a scalar, several yield a list.
/// Values that do not parse as the declared type stay as text.
pub fn coerce_values(field_type: FieldType, raw: &[String]) -> FieldValue {
    match raw {
        [single] if field_type != FieldType::List => coerce_one(field_type, single),
        _ => FieldValue::List(raw.iter().map(|r| coerce_one(field_type, r)).collect()),
    }
}
