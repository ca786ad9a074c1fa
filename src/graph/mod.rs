//! Graph synchronization and derived views.
//!
//! Keeps a canonical note graph in step with a live source and derives the
//! views a renderer draws from it.
//!
//! ## Architecture
//!
//! ```text
//! RawGraphUpdate ──► ingest ──► synthesis ──► GraphStore (canonical snapshot)
//!                                                   │
//!                                                filter
//!                                                   │
//!                                  ┌────────────────┴───────────────┐
//!                               scope                          clustering
//!                                  └────────────────┬───────────────┘
//!                                                   │
//!                                  ViewEngine ──► DerivedView ──► ViewSink
//! ```
//!
//! ## Modules
//!
//! - [`models`]: Nodes, links, adjacency, snapshot, coordinate side table
//! - [`ingest`]: Record-by-record validation of raw updates
//! - [`synthesis`]: Link normalization, heading/parent links, ghost nodes
//! - [`store`]: `GraphStore` with identity-preserving merge
//! - [`filter`]: Predicate filtering and orphan pruning
//! - [`scope`]: Focal-set state machine and bounded neighborhood expansion
//! - [`clustering`]: Deterministic multi-level Louvain
//! - [`engine`]: `ViewEngine` orchestrating the stages, `ViewSink` boundary
//! - [`mock`]: `RecordingSink` for testing (cfg(test) only)

pub mod clustering;
pub mod engine;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod scope;
pub mod store;
pub mod synthesis;

#[cfg(test)]
pub mod mock;

// Re-export primary types for convenience
pub use clustering::{cluster, ClusterAssignment, ClusteringConfig, ClusteringMode};
pub use engine::{DerivedView, JsonLinesSink, Stages, ViewEngine, ViewSettings, ViewSink};
pub use filter::{apply, apply_with, FilterConfig, FilteredGraph, LinkStructure, OrphanMode};
pub use ingest::{IngestError, IngestReport, RawGraphUpdate};
pub use models::{
    AdjacencyIndex, CoordinateTable, Link, LinkType, Node, NodeProperty, SimState, Snapshot,
    SourceVariables,
};
pub use scope::{expand, LocalBehavior, LocalConfig, Scope, ScopeCommand, ScopedGraph};
pub use store::{GraphStore, MergeStats};
pub use synthesis::{normalize, synthesize};
