//! Lead fingerprints and the per-run dedup index.
//!
//! Fingerprint priority is phone, then email, then name plus address:
//!
//! - `phone:<last 10 digits>` when the phone has at least 7 digits
//! - `email:<lowercased email>` when an email is present
//! - `name:<alnum name>:<first 20 alnum chars of address>` otherwise

use prospector_core::Lead;
use std::collections::HashSet;

const MIN_PHONE_DIGITS: usize = 7;
const PHONE_DIGITS_KEPT: usize = 10;
const ADDRESS_CHARS_KEPT: usize = 20;

/// Normalized identity of a lead.
#[must_use]
pub fn fingerprint(lead: &Lead) -> String {
    if let Some(digits) = lead.phone.as_deref().and_then(normalize_phone) {
        return format!("phone:{digits}");
    }

    if let Some(email) = lead.email.as_deref().map(|e| e.trim().to_lowercase()) {
        if !email.is_empty() {
            return format!("email:{email}");
        }
    }

    let name = alnum_lower(&lead.name);
    let address: String = alnum_lower(lead.address.as_deref().unwrap_or_default())
        .chars()
        .take(ADDRESS_CHARS_KEPT)
        .collect();
    format!("name:{name}:{address}")
}

/// Last ten digits of a phone number with at least seven digits.
fn normalize_phone(phone: &str) -> Option<String> {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return None;
    }
    let start = digits.len().saturating_sub(PHONE_DIGITS_KEPT);
    Some(digits[start..].iter().collect())
}

fn alnum_lower(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Fingerprints seen during one run.
///
/// Entries are never removed; a fingerprint counts at most once per run.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashSet<String>,
}

impl DedupIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the lead's fingerprint. Returns `false` for a duplicate.
    pub fn insert(&mut self, lead: &Lead) -> bool {
        self.seen.insert(fingerprint(lead))
    }

    /// Whether the lead's fingerprint has been seen.
    #[must_use]
    pub fn contains(&self, lead: &Lead) -> bool {
        self.seen.contains(&fingerprint(lead))
    }

    /// Number of distinct fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
