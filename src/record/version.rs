//! Version entries and dotted-numeric ordering
//!
//! Numeric dotted versions compare component-wise with missing components
//! treated as 0; when two versions are equal under that rule the one with more
//! components is greater (`1.2 < 1.2.0`). Strings that do not parse as dotted
//! numbers always sort below every numeric version and compare ordinally among
//! themselves, so a malformed tag can never become "latest".

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A version directory and the location of its manifest listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub location: String,
}

impl VersionEntry {
    pub fn new(version: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            location: location.into(),
        }
    }
}

fn parse_components(version: &str) -> Option<Vec<u64>> {
    if version.is_empty() {
        return None;
    }

    version
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                part.parse::<u64>().ok()
            }
        })
        .collect()
}

fn compare_components(a: &[u64], b: &[u64]) -> Ordering {
    let width = a.len().max(b.len());
    for i in 0..width {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Compares two version strings in ascending order
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_components(a), parse_components(b)) {
        (Some(left), Some(right)) => compare_components(&left, &right),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Sorts entries latest first
pub fn sort_descending(entries: &mut [VersionEntry]) {
    entries.sort_by(|a, b| compare_versions(&b.version, &a.version));
}
