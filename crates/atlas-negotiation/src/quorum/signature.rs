//! Structural signatures and deterministic ids
//!
//! A block is identified by the hash of its normalised DOM path (positional
//! indices stripped) combined with the selector that matched it. Two
//! observations share a block iff both parts agree.

use sha2::{Digest, Sha256};

use crate::contracts::{BlockCharacteristics, TrackType};

/// Length of the hex prefix kept from SHA-256 digests
const ID_HEX_LEN: usize = 16;

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..ID_HEX_LEN].to_string()
}

/// Strip `[n]` positional suffixes: `div.product[7]` -> `div.product`
pub fn normalize_dom_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '[' {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if !digits.is_empty() && chars.peek() == Some(&']') {
                chars.next();
                continue;
            }
            normalized.push('[');
            normalized.push_str(&digits);
            continue;
        }
        normalized.push(c);
    }

    normalized
}

/// Hash of the normalised path
pub fn structural_signature(dom_path: &str) -> String {
    short_hash(&[&normalize_dom_path(dom_path)])
}

/// Block id from a structural signature and the matching selector
pub fn block_id(signature: &str, selector: &str) -> String {
    format!("blk_{}", short_hash(&[signature, selector.trim()]))
}

/// Deterministic entity id; the same observation from the same track
/// always maps to the same id
pub fn entity_id(
    source: TrackType,
    field_name: &str,
    dom_path: &str,
    selector: &str,
    value: &str,
) -> String {
    format!(
        "ent_{}",
        short_hash(&[source.as_str(), field_name, dom_path, selector, value])
    )
}

/// Tag and classes of the last path segment
pub fn characteristics(dom_path: &str) -> BlockCharacteristics {
    let normalized = normalize_dom_path(dom_path);
    let last = normalized.rsplit('/').next().unwrap_or_default();
    let mut parts = last.split('.');
    let tag_name = parts.next().unwrap_or_default().to_string();
    let class_names = parts.filter(|p| !p.is_empty()).map(str::to_string).collect();

    BlockCharacteristics {
        tag_name,
        class_names,
        structural_signature: structural_signature(dom_path),
    }
}

/// Path depth (number of segments)
pub fn path_depth(dom_path: &str) -> usize {
    dom_path.split('/').filter(|s| !s.is_empty()).count()
}
