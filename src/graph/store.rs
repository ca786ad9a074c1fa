//! Canonical graph store.
//!
//! Holds the authoritative snapshot and the simulation side table. The first
//! update replaces the empty store wholesale; every later update is merged:
//! ids present before and after keep their simulation state and take all
//! other attributes from the new data, new ids are added, vanished ids are
//! dropped together with their coordinates.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::ingest::{ingest, IngestReport, RawGraphUpdate};
use super::models::{AdjacencyIndex, CoordinateTable, Node, SimState, Snapshot};
use super::synthesis::{process, ProcessedGraph};

static CITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cite:(.*)").expect("valid cite key regex"));

/// Outcome of one merge, for logging and for consumers that care.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Ids that existed before and still exist
    pub kept: usize,
    pub added: usize,
    pub removed: usize,
    pub ghosts: usize,
    pub links: usize,
    pub ingest: IngestReport,
}

/// Owner of the canonical snapshot and its coordinate side table.
#[derive(Debug, Default)]
pub struct GraphStore {
    snapshot: Snapshot,
    coordinates: CoordinateTable,
    updates: u64,
}

impl GraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn coordinates(&self) -> &CoordinateTable {
        &self.coordinates
    }

    /// Number of updates merged so far.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// Record simulation state reported by the renderer.
    ///
    /// Ids unknown to the snapshot are ignored.
    pub fn record_positions<'a>(&mut self, positions: impl IntoIterator<Item = (&'a str, SimState)>) {
        for (id, state) in positions {
            if self.snapshot.nodes.contains_key(id) {
                self.coordinates.set(id, state);
            }
        }
    }

    /// Merge a raw update into the canonical snapshot.
    ///
    /// Never fails: invalid records are dropped during ingestion and the rest
    /// of the batch is applied.
    pub fn merge(&mut self, update: &RawGraphUpdate) -> MergeStats {
        let ingested = ingest(update);
        let report = ingested.report.clone();
        let ProcessedGraph {
            nodes,
            links,
            tags,
            seeds,
            ghosts,
        } = process(ingested);

        let mut stats = MergeStats {
            ghosts,
            links: links.len(),
            ingest: report,
            ..Default::default()
        };

        if self.snapshot.is_empty() {
            stats.added = nodes.len();
            self.coordinates = seeds;
            self.coordinates.retain(|id| nodes.contains_key(id));
        } else {
            for id in nodes.keys() {
                if self.snapshot.nodes.contains_key(id) {
                    stats.kept += 1;
                } else {
                    stats.added += 1;
                    if let Some(state) = seeds.get(id) {
                        self.coordinates.set(id.as_str(), state);
                    }
                }
            }
            stats.removed = self.snapshot.nodes.len() - stats.kept;
            self.coordinates.retain(|id| nodes.contains_key(id));
        }

        let cites = cite_index(&nodes);
        self.snapshot = Snapshot {
            adjacency: AdjacencyIndex::build(&links),
            nodes,
            links,
            tags,
            cites,
        };
        self.updates += 1;

        tracing::debug!(
            kept = stats.kept,
            added = stats.added,
            removed = stats.removed,
            ghosts = stats.ghosts,
            links = stats.links,
            "Merged graph update"
        );
        stats
    }
}

/// Citation key → node id for nodes whose `ROAM_REFS` mention `cite:`.
fn cite_index(nodes: &BTreeMap<String, Node>) -> BTreeMap<String, String> {
    nodes
        .values()
        .filter_map(|node| {
            let refs = node.roam_refs()?;
            if !refs.contains("cite") {
                return None;
            }
            let key = CITE_KEY.replace_all(refs, "$1").into_owned();
            (!key.is_empty()).then(|| (key, node.id.clone()))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
