//! Tree walker for the publisher / package / version hierarchy
//!
//! Listings are JSON arrays of directory entries. Only `dir` entries count as
//! publishers, packages and versions; only `file` entries with a recognized
//! extension count as manifests. Empty results are valid and returned as
//! empty vectors.

use crate::crawler::fetcher::{FetchError, FetchResult, HttpTransport, RateLimitedFetcher, Transport};
use crate::record::{
    sort_descending, DocumentKind, ManifestDocument, ManifestSet, PackageNode, PublisherNode,
    VersionEntry,
};
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

/// Failure while walking one package
#[derive(Debug, Error)]
pub enum WalkError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Malformed manifest at {location}: {source}")]
    Manifest {
        location: String,
        source: serde_yaml::Error,
    },
}

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
    #[serde(other)]
    Other,
}

/// One entry of a directory listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: EntryKind,

    /// Listing location of the entry
    #[serde(default)]
    pub url: Option<String>,

    /// Raw content location (files only)
    #[serde(default)]
    pub download_url: Option<String>,
}

impl ListingEntry {
    fn listing_location(&self) -> Option<String> {
        self.url.clone().filter(|u| !u.is_empty())
    }

    /// Raw content only; the listing `url` serves a JSON envelope, not the file
    fn content_location(&self) -> Option<String> {
        self.download_url.clone().filter(|u| !u.is_empty())
    }
}

/// A classified manifest file of one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLocation {
    pub file_name: String,
    pub kind: DocumentKind,
    pub location: String,
}

/// Walks the remote tree through a rate-limited fetcher
pub struct TreeWalker<T: Transport = HttpTransport> {
    fetcher: RateLimitedFetcher<T>,
    root_location: String,
}

impl<T: Transport> TreeWalker<T> {
    pub fn new(fetcher: RateLimitedFetcher<T>, root_location: impl Into<String>) -> Self {
        Self {
            fetcher,
            root_location: root_location.into(),
        }
    }

    pub fn root_location(&self) -> &str {
        &self.root_location
    }

    /// Fetches a listing, following `rel="next"` pages in order
    pub async fn fetch_listing(&self, location: &str) -> FetchResult<Vec<ListingEntry>> {
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(location.to_string());

        while let Some(page_location) = next {
            if !visited.insert(page_location.clone()) {
                tracing::warn!("Pagination loop detected at {}", page_location);
                break;
            }

            let page = self.fetcher.fetch(&page_location).await?;
            let mut batch: Vec<ListingEntry> = serde_json::from_str(&page.body).map_err(|e| {
                FetchError::fatal(&page_location, format!("malformed listing: {}", e))
            })?;
            entries.append(&mut batch);
            next = page.next_page;
        }

        Ok(entries)
    }

    async fn list_directories(&self, location: &str) -> FetchResult<Vec<(String, String)>> {
        let entries = self.fetch_listing(location).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Dir)
            .filter_map(|entry| match entry.listing_location() {
                Some(child) => Some((entry.name, child)),
                None => {
                    tracing::debug!("Directory {} under {} has no location", entry.name, location);
                    None
                }
            })
            .collect())
    }

    /// Lists publishers at the tree root
    pub async fn list_publishers(&self) -> FetchResult<Vec<PublisherNode>> {
        let dirs = self.list_directories(&self.root_location).await?;
        Ok(dirs
            .into_iter()
            .map(|(name, listing_location)| PublisherNode {
                name,
                listing_location,
            })
            .collect())
    }

    /// Lists packages of a publisher, in listing order
    pub async fn list_packages(&self, publisher: &PublisherNode) -> FetchResult<Vec<PackageNode>> {
        let dirs = self.list_directories(&publisher.listing_location).await?;
        Ok(dirs
            .into_iter()
            .map(|(name, listing_location)| PackageNode {
                publisher_name: publisher.name.clone(),
                name,
                listing_location,
            })
            .collect())
    }

    /// Lists versions of a package, latest first
    pub async fn list_versions(&self, package: &PackageNode) -> FetchResult<Vec<VersionEntry>> {
        let dirs = self.list_directories(&package.listing_location).await?;
        let mut versions: Vec<VersionEntry> = dirs
            .into_iter()
            .map(|(version, location)| VersionEntry::new(version, location))
            .collect();
        sort_descending(&mut versions);
        Ok(versions)
    }

    /// Lists the manifest files of a version, filtered to recognized extensions
    pub async fn locate_manifests(&self, version: &VersionEntry) -> FetchResult<Vec<ManifestLocation>> {
        let entries = self.fetch_listing(&version.location).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .filter_map(|entry| {
                let kind = DocumentKind::classify(&entry.name)?;
                let Some(location) = entry.content_location() else {
                    tracing::debug!(
                        "Manifest {} under {} has no download location, skipping",
                        entry.name,
                        version.location
                    );
                    return None;
                };
                Some(ManifestLocation {
                    file_name: entry.name,
                    kind,
                    location,
                })
            })
            .collect())
    }

    /// Fetches and parses the selected manifests of a version
    pub async fn fetch_manifests(
        &self,
        package: &PackageNode,
        version: &VersionEntry,
        locations: &[ManifestLocation],
    ) -> Result<ManifestSet, WalkError> {
        let mut set = ManifestSet::default();

        for manifest in select_manifests(package, version, locations) {
            let text = self.fetcher.fetch_text(&manifest.location).await?;
            let document = ManifestDocument::parse(&text).map_err(|source| WalkError::Manifest {
                location: manifest.location.clone(),
                source,
            })?;
            set.insert(manifest.kind, document);
        }

        Ok(set)
    }
}

/// Keeps the first manifest of each category
///
/// Further manifests of an already-filled category are a data anomaly: they
/// are logged and ignored.
pub fn select_manifests<'a>(
    package: &PackageNode,
    version: &VersionEntry,
    locations: &'a [ManifestLocation],
) -> Vec<&'a ManifestLocation> {
    let mut seen = HashSet::new();
    locations
        .iter()
        .filter(|manifest| {
            if seen.insert(manifest.kind) {
                return true;
            }
            tracing::warn!(
                "Data anomaly: {} {} has more than one {} manifest, ignoring {}",
                package,
                version.version,
                manifest.kind,
                manifest.file_name
            );
            false
        })
        .collect()
}
