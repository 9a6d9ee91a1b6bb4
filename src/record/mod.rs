//! Record module: the canonical data model of the mirror
//!
//! This module contains:
//! - Tree nodes discovered while walking the remote hierarchy
//! - Version entries and the dotted-numeric version ordering
//! - Manifest documents and their filename classification
//! - The record builder that merges documents into a `PackageRecord`

mod builder;
mod document;
mod version;

pub use builder::{resolve_field, resolve_tags, ManifestSet, RecordBuilder, RecordField};
pub use document::{DocumentKind, ManifestDocument, RECOGNIZED_EXTENSIONS};
pub use version::{compare_versions, sort_descending, VersionEntry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A top-level namespace owner in the remote tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherNode {
    pub name: String,
    pub listing_location: String,
}

/// A package directory below a publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    pub publisher_name: String,
    pub name: String,
    pub listing_location: String,
}

impl PackageNode {
    /// Record id: `publisher.package`
    pub fn id(&self) -> String {
        format!("{}.{}", self.publisher_name, self.name)
    }
}

impl fmt::Display for PackageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher_name, self.name)
    }
}

/// Metadata of the latest version, merged from the manifest documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestInfo {
    pub name: String,
    pub publisher: String,
    pub version: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub author: Option<String>,
}

/// The canonical output unit of a crawl
///
/// Built once by the `RecordBuilder` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub id: String,

    /// Version strings, latest first
    pub versions: Vec<String>,

    pub latest: LatestInfo,

    /// Opaque installer descriptors from the installer document
    pub installers: Vec<serde_json::Value>,

    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PackageRecord {
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}
