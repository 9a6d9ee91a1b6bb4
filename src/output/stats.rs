//! Snapshot statistics
//!
//! This module derives the summary statistics artifact from the crawl state
//! and prints it for the `--stats` mode.

use crate::state::CrawlState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A name with its occurrence count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

/// Run counters carried into the statistics artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Snapshot statistics summary (`stats.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub generated_at: DateTime<Utc>,

    /// Number of records in the snapshot
    pub total_records: u64,

    /// Number of distinct `latest.publisher` values
    pub distinct_publishers: u64,

    /// Sum of version counts over all records
    pub total_versions: u64,

    /// Most frequent publishers, by record count
    pub top_publishers: Vec<NamedCount>,

    /// Most frequent tags, by occurrence
    pub top_tags: Vec<NamedCount>,

    pub run: RunCounters,
}

impl SnapshotStats {
    /// Computes statistics over the records of a crawl state
    pub fn compute(state: &CrawlState, top_n: usize) -> Self {
        let records = state.records();

        let mut publishers: HashMap<&str, u64> = HashMap::new();
        let mut tags: HashMap<&str, u64> = HashMap::new();
        let mut total_versions = 0u64;

        for record in records {
            *publishers.entry(record.latest.publisher.as_str()).or_default() += 1;
            for tag in &record.latest.tags {
                *tags.entry(tag.as_str()).or_default() += 1;
            }
            total_versions += record.version_count() as u64;
        }

        let distinct_publishers = publishers.len() as u64;

        Self {
            generated_at: Utc::now(),
            total_records: records.len() as u64,
            distinct_publishers,
            total_versions,
            top_publishers: top_counts(publishers, top_n),
            top_tags: top_counts(tags, top_n),
            run: RunCounters {
                processed: state.processed,
                skipped: state.skipped,
                errors: state.errors,
            },
        }
    }
}

/// Highest counts first, ties broken by name
fn top_counts(counts: HashMap<&str, u64>, top_n: usize) -> Vec<NamedCount> {
    let mut entries: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount {
            name: name.to_string(),
            count,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(top_n);
    entries
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &SnapshotStats) {
    println!("=== Snapshot Statistics ===\n");

    println!("Overview:");
    println!("  Generated at: {}", stats.generated_at.to_rfc3339());
    println!("  Total records: {}", stats.total_records);
    println!("  Distinct publishers: {}", stats.distinct_publishers);
    println!("  Total versions: {}", stats.total_versions);
    println!();

    println!("Run Counters:");
    println!("  Packages processed: {}", stats.run.processed);
    println!("  Skipped (no versions): {}", stats.run.skipped);
    println!("  Errors: {}", stats.run.errors);
    println!();

    if !stats.top_publishers.is_empty() {
        println!("Top Publishers:");
        for entry in &stats.top_publishers {
            println!("  {}: {}", entry.name, entry.count);
        }
        println!();
    }

    if !stats.top_tags.is_empty() {
        println!("Top Tags:");
        for entry in &stats.top_tags {
            println!("  {}: {}", entry.name, entry.count);
        }
        println!();
    }

    let average = if stats.total_records > 0 {
        stats.total_versions as f64 / stats.total_records as f64
    } else {
        0.0
    };
    println!("Average versions per record: {:.1}", average);
}
