//! Local filesystem snapshot writer
//!
//! ## Snapshot Layout
//!
//! ```text
//! {snapshot-dir}/
//! ├── packages.json         # Full record list
//! ├── stats.json            # Summary statistics
//! ├── run.json              # Checkpoint progress (used by --resume)
//! ├── publishers/           # One shard per latest.publisher
//! │   └── <slug>.json
//! └── packages/             # One file per record id
//!     └── <slug>.json
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place. After
//! a write, shard and record files that do not belong to the current state are
//! removed, so the directory always reflects exactly one materialization.

use crate::output::stats::SnapshotStats;
use crate::output::traits::{SnapshotError, SnapshotReport, SnapshotResult, SnapshotWriter};
use crate::record::PackageRecord;
use crate::state::{CheckpointProgress, CrawlState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const PACKAGES_FILE: &str = "packages.json";
pub const STATS_FILE: &str = "stats.json";
pub const RUN_FILE: &str = "run.json";
pub const PUBLISHERS_DIR: &str = "publishers";
pub const RECORDS_DIR: &str = "packages";

#[derive(Serialize)]
struct PackageListOut<'a> {
    generated_at: DateTime<Utc>,
    count: usize,
    packages: &'a [PackageRecord],
}

#[derive(Deserialize)]
struct PackageListIn {
    packages: Vec<PackageRecord>,
}

#[derive(Serialize)]
struct PublisherShard<'a> {
    publisher: &'a str,
    count: usize,
    packages: Vec<&'a PackageRecord>,
}

/// Converts a name into a file stem
///
/// ASCII alphanumerics, `.`, `-` and `_` are kept; everything else becomes `_`.
///
/// # Arguments
///
/// * `name` - Publisher name or record id
///
/// # Returns
///
/// A non-empty stem that is never `.` or `..`
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Dot-only stems would resolve outside the directory
    if slug.is_empty() || slug.chars().all(|c| c == '.') {
        format!("_{}", slug)
    } else {
        slug
    }
}

/// Assigns unique slugs to names, in sorted name order
///
/// Names whose slug is already taken get a `-2`, `-3`, ... suffix.
///
/// # Arguments
///
/// * `names` - Names to map; duplicates collapse to one entry
///
/// # Returns
///
/// A map from each name to its unique slug
pub fn assign_slugs<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeMap<&'a str, String> {
    let sorted: BTreeSet<&str> = names.into_iter().collect();
    let mut taken = HashSet::new();
    let mut slugs = BTreeMap::new();

    for name in sorted {
        let base = slugify(name);
        let mut slug = base.clone();
        let mut suffix = 2;
        while !taken.insert(slug.to_ascii_lowercase()) {
            slug = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        slugs.insert(name, slug);
    }

    slugs
}

/// Writes snapshots under a local directory
#[derive(Debug, Clone)]
pub struct LocalSnapshotWriter {
    root_dir: PathBuf,
    top_n: usize,
    config_hash: Option<String>,
}

impl LocalSnapshotWriter {
    pub fn new(root_dir: impl Into<PathBuf>, top_n: usize) -> Self {
        Self {
            root_dir: root_dir.into(),
            top_n,
            config_hash: None,
        }
    }

    /// Records the configuration hash in every `run.json`
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    async fn ensure_dir(&self, dir: &Path) -> SnapshotResult<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(SnapshotError::io(dir))
    }

    /// Write bytes atomically (write to temp, then rename)
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> SnapshotResult<()> {
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(SnapshotError::io(&tmp))?;
        file.write_all(bytes).await.map_err(SnapshotError::io(&tmp))?;
        file.sync_all().await.map_err(SnapshotError::io(&tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(SnapshotError::io(path))
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> SnapshotResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(path, &bytes).await
    }

    /// Read JSON data, returning None if the file doesn't exist
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> SnapshotResult<Option<T>> {
        let path = self.path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotError::io(&path)(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnapshotError::Malformed { path, source })
    }

    /// Removes files in `dir` whose names are not in `keep`
    async fn remove_stale(&self, dir: &Path, keep: &HashSet<String>) -> SnapshotResult<usize> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(SnapshotError::io(dir))?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(SnapshotError::io(dir))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.contains(&name) {
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(SnapshotError::io(&path))?;
                tracing::debug!("Removed stale snapshot file {}", path.display());
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Loads the state persisted by the last checkpoint
    ///
    /// # Returns
    ///
    /// * `Ok(Some(CrawlState))` - Records from `packages.json` seeded with the
    ///   progress in `run.json`
    /// * `Ok(None)` - No complete checkpoint exists
    /// * `Err(SnapshotError)` - A checkpoint file exists but cannot be read or parsed
    pub async fn load_checkpoint(&self) -> SnapshotResult<Option<CrawlState>> {
        let Some(progress) = self.read_json::<CheckpointProgress>(RUN_FILE).await? else {
            return Ok(None);
        };
        let Some(list) = self.read_json::<PackageListIn>(PACKAGES_FILE).await? else {
            return Ok(None);
        };

        if let (Some(saved), Some(current)) = (&progress.config_hash, &self.config_hash) {
            if saved != current {
                tracing::warn!("Resuming a checkpoint written with a different configuration");
            }
        }

        Ok(Some(CrawlState::from_checkpoint(list.packages, progress)))
    }

    /// Loads `stats.json`, if present
    pub async fn load_stats(&self) -> SnapshotResult<Option<SnapshotStats>> {
        self.read_json(STATS_FILE).await
    }
}

#[async_trait]
impl SnapshotWriter for LocalSnapshotWriter {
    async fn write(&self, state: &CrawlState) -> SnapshotResult<SnapshotReport> {
        let records = state.records();
        let publishers_dir = self.path(PUBLISHERS_DIR);
        let records_dir = self.path(RECORDS_DIR);
        self.ensure_dir(&publishers_dir).await?;
        self.ensure_dir(&records_dir).await?;

        // One file per record id
        let record_slugs = assign_slugs(records.iter().map(|r| r.id.as_str()));
        let mut record_files = HashSet::new();
        for record in records {
            let Some(slug) = record_slugs.get(record.id.as_str()) else {
                continue;
            };
            let file_name = format!("{}.json", slug);
            self.write_json(&records_dir.join(&file_name), record).await?;
            record_files.insert(file_name);
        }

        // One shard per publisher, records in accumulation order
        let mut by_publisher: HashMap<&str, Vec<&PackageRecord>> = HashMap::new();
        for record in records {
            by_publisher
                .entry(record.latest.publisher.as_str())
                .or_default()
                .push(record);
        }
        let shard_slugs = assign_slugs(by_publisher.keys().copied());
        let mut shard_files = HashSet::new();
        for (&publisher, slug) in &shard_slugs {
            let packages = by_publisher.remove(publisher).unwrap_or_default();
            let shard = PublisherShard {
                publisher,
                count: packages.len(),
                packages,
            };
            let file_name = format!("{}.json", slug);
            self.write_json(&publishers_dir.join(&file_name), &shard).await?;
            shard_files.insert(file_name);
        }

        let list = PackageListOut {
            generated_at: Utc::now(),
            count: records.len(),
            packages: records,
        };
        self.write_json(&self.path(PACKAGES_FILE), &list).await?;

        let stats = SnapshotStats::compute(state, self.top_n);
        self.write_json(&self.path(STATS_FILE), &stats).await?;

        // Written last: a run.json always describes a complete snapshot
        let progress = state.progress(self.config_hash.as_deref());
        self.write_json(&self.path(RUN_FILE), &progress).await?;

        let stale_removed = self.remove_stale(&records_dir, &record_files).await?
            + self.remove_stale(&publishers_dir, &shard_files).await?;

        tracing::info!(
            "Snapshot written to {}: {} records, {} publisher shards",
            self.root_dir.display(),
            records.len(),
            shard_files.len()
        );

        Ok(SnapshotReport {
            records: records.len(),
            shards: shard_files.len(),
            stale_removed,
        })
    }
}
