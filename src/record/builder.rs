//! Record builder
//!
//! Merges the manifest documents of a package's latest version into a
//! `PackageRecord`. This is a pure transformation: no network I/O.
//!
//! # Field precedence
//!
//! Every field is resolved by walking the documents in the fixed order
//! LocaleDoc, PrimaryDoc, InstallerDoc and taking the first non-empty value;
//! within one document the keys of a field are tried in the listed order.
//!
//! | Field       | Keys                            | Fallback            |
//! |-------------|---------------------------------|---------------------|
//! | name        | PackageName                     | package node name   |
//! | publisher   | Publisher                       | publisher node name |
//! | description | ShortDescription, Description   | none                |
//! | homepage    | PackageUrl, Homepage            | none                |
//! | license     | License                         | none                |
//! | author      | Author                          | none                |
//! | tags        | Tags                            | empty               |
//! | updatedAt   | ReleaseDate                     | build time          |

use crate::record::document::{DocumentKind, ManifestDocument};
use crate::record::version::{sort_descending, VersionEntry};
use crate::record::{LatestInfo, PackageNode, PackageRecord};
use chrono::{DateTime, NaiveDate, Utc};

/// A conceptual record field that documents may supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Name,
    Publisher,
    Description,
    Homepage,
    License,
    Author,
    Tags,
    ReleaseDate,
}

impl RecordField {
    /// Document keys for this field, in lookup order
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            Self::Name => &["PackageName"],
            Self::Publisher => &["Publisher"],
            Self::Description => &["ShortDescription", "Description"],
            Self::Homepage => &["PackageUrl", "Homepage"],
            Self::License => &["License"],
            Self::Author => &["Author"],
            Self::Tags => &["Tags"],
            Self::ReleaseDate => &["ReleaseDate"],
        }
    }
}

/// The documents selected for one version, at most one per category
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    pub locale: Option<ManifestDocument>,
    pub primary: Option<ManifestDocument>,
    pub installer: Option<ManifestDocument>,
}

impl ManifestSet {
    /// Stores a document under its category
    ///
    /// Returns `false` and keeps the existing document when the category is
    /// already filled (first match wins).
    pub fn insert(&mut self, kind: DocumentKind, document: ManifestDocument) -> bool {
        let slot = match kind {
            DocumentKind::Locale => &mut self.locale,
            DocumentKind::Primary => &mut self.primary,
            DocumentKind::Installer => &mut self.installer,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(document);
        true
    }

    /// Documents in precedence order: locale, primary, installer
    pub fn in_precedence_order(&self) -> impl Iterator<Item = &ManifestDocument> {
        [&self.locale, &self.primary, &self.installer]
            .into_iter()
            .flatten()
    }
}

/// Resolves a scalar field across documents using the precedence order
pub fn resolve_field(set: &ManifestSet, field: RecordField) -> Option<String> {
    set.in_precedence_order()
        .find_map(|doc| field.keys().iter().find_map(|key| doc.get_str(key)))
}

/// Resolves tags from the first document that supplies a non-empty list
pub fn resolve_tags(set: &ManifestSet) -> Vec<String> {
    set.in_precedence_order()
        .find_map(|doc| {
            RecordField::Tags
                .keys()
                .iter()
                .filter_map(|key| doc.get_list(key))
                .find(|tags| !tags.is_empty())
        })
        .unwrap_or_default()
}

fn resolve_installers(set: &ManifestSet, package_id: &str) -> Vec<serde_json::Value> {
    let source = [&set.installer, &set.primary]
        .into_iter()
        .flatten()
        .find_map(|doc| doc.get("Installers"));

    let Some(serde_yaml::Value::Sequence(items)) = source else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::to_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Dropping unrepresentable installer entry in {}: {}", package_id, e);
                None
            }
        })
        .collect()
}

fn parse_release_date(text: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Builds canonical package records from fetched documents
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBuilder;

impl RecordBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds a record, stamping it with the current time
    pub fn build(
        &self,
        node: &PackageNode,
        versions: &[VersionEntry],
        documents: &ManifestSet,
    ) -> Option<PackageRecord> {
        self.build_at(node, versions, documents, Utc::now())
    }

    /// Builds a record with an explicit build time
    ///
    /// Returns `None` when no versions were discovered; this is the skip
    /// signal for a package with nothing to mirror.
    pub fn build_at(
        &self,
        node: &PackageNode,
        versions: &[VersionEntry],
        documents: &ManifestSet,
        now: DateTime<Utc>,
    ) -> Option<PackageRecord> {
        if versions.is_empty() {
            return None;
        }

        let mut ordered = versions.to_vec();
        sort_descending(&mut ordered);
        let versions: Vec<String> = ordered.into_iter().map(|e| e.version).collect();
        let id = node.id();

        let latest = LatestInfo {
            name: resolve_field(documents, RecordField::Name).unwrap_or_else(|| node.name.clone()),
            publisher: resolve_field(documents, RecordField::Publisher)
                .unwrap_or_else(|| node.publisher_name.clone()),
            version: versions[0].clone(),
            description: resolve_field(documents, RecordField::Description),
            tags: resolve_tags(documents),
            homepage: resolve_field(documents, RecordField::Homepage),
            license: resolve_field(documents, RecordField::License),
            author: resolve_field(documents, RecordField::Author),
        };

        let updated_at = resolve_field(documents, RecordField::ReleaseDate)
            .and_then(|text| parse_release_date(&text))
            .unwrap_or(now);

        Some(PackageRecord {
            installers: resolve_installers(documents, &id),
            id,
            versions,
            latest,
            updated_at,
            created_at: now,
        })
    }
}
