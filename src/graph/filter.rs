//! Predicate-based filtering of the canonical snapshot.
//!
//! Filtering is a pure function of `(snapshot, config, source variables)`:
//!
//! 1. nodes matching any enabled exclusion predicate are hidden
//! 2. links survive when both endpoints survive and the link-structure mode
//!    shows their type
//! 3. optional orphan pruning runs on the adjacency of the surviving links
//!
//! The hidden ids are part of the output instead of being accumulated in
//! shared state, so two passes with the same inputs are identical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::models::{AdjacencyIndex, Link, LinkType, Node, Snapshot, SourceVariables};

// ============================================================================
// Configuration
// ============================================================================

/// Which of the two synthesized structural link sets is displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkStructure {
    /// Headings link to their nearest enclosing heading
    #[default]
    #[serde(alias = "heading")]
    HeadingOnly,
    /// Headings link straight to their file node
    #[serde(alias = "parent")]
    ParentOnly,
    /// No structural links at all
    Neither,
}

impl LinkStructure {
    pub fn shows(self, link_type: LinkType) -> bool {
        match self {
            Self::HeadingOnly => link_type != LinkType::Parent,
            Self::ParentOnly => link_type != LinkType::Heading,
            Self::Neither => !link_type.is_structural(),
        }
    }
}

/// How nodes left without links are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanMode {
    #[default]
    KeepAll,
    /// Hide nodes without any surviving link
    DropIsolated,
    /// Hide nodes without a surviving content link; structural links alone
    /// do not keep a node visible
    DropUnlessParentLinked,
}

/// Filter settings chosen by the user.
///
/// Unknown keys are ignored and an unrecognized mode value falls back to the
/// default for that option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub dirs_allowlist: Vec<String>,
    pub dirs_blocklist: Vec<String>,
    pub tags_allowlist: Vec<String>,
    pub tags_blocklist: Vec<String>,
    pub exclude_fileless_citations: bool,
    pub exclude_bad: bool,
    pub exclude_dailies: bool,
    pub exclude_noter_pages: bool,
    #[serde(deserialize_with = "crate::lenient")]
    pub link_structure: LinkStructure,
    #[serde(deserialize_with = "crate::lenient")]
    pub orphans: OrphanMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dirs_allowlist: Vec::new(),
            dirs_blocklist: Vec::new(),
            tags_allowlist: Vec::new(),
            tags_blocklist: Vec::new(),
            exclude_fileless_citations: false,
            exclude_bad: true,
            exclude_dailies: false,
            exclude_noter_pages: true,
            link_structure: LinkStructure::HeadingOnly,
            orphans: OrphanMode::KeepAll,
        }
    }
}

impl FilterConfig {
    /// Every exclusion predicate off and orphans kept.
    ///
    /// The link-structure mode stays `HeadingOnly`: the synthesized parent
    /// links are still hidden, every other link passes through.
    pub fn permissive() -> Self {
        Self {
            exclude_bad: false,
            exclude_noter_pages: false,
            ..Self::default()
        }
    }

    /// Whether `node` matches an enabled exclusion predicate.
    pub fn excludes(&self, node: &Node, variables: &SourceVariables) -> bool {
        let in_dir = |dir: &String| node.file.contains(dir.as_str());

        if self.dirs_blocklist.iter().any(in_dir) {
            return true;
        }
        if !self.dirs_allowlist.is_empty() && !self.dirs_allowlist.iter().any(in_dir) {
            return true;
        }
        if self.tags_blocklist.iter().any(|t| node.has_tag(t)) {
            return true;
        }
        if !self.tags_allowlist.is_empty() && !self.tags_allowlist.iter().any(|t| node.has_tag(t))
        {
            return true;
        }
        if self.exclude_fileless_citations && node.is_fileless() {
            return true;
        }
        if self.exclude_bad && node.is_bad() {
            return true;
        }
        if self.exclude_dailies {
            if let Some(daily) = variables.daily_dir.as_deref().filter(|d| !d.is_empty()) {
                if node.file.contains(daily) {
                    return true;
                }
            }
        }
        self.exclude_noter_pages && node.noter_page().is_some()
    }
}

// ============================================================================
// Output
// ============================================================================

/// The subgraph left after filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilteredGraph {
    /// Surviving nodes, ordered by id
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    pub adjacency: AdjacencyIndex,
    /// Ids hidden by a predicate or by orphan pruning in this pass
    pub hidden: BTreeSet<String>,
}

impl FilteredGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// `id` and every node sharing a surviving link with it.
    pub fn neighborhood(&self, id: &str) -> BTreeSet<&str> {
        let Some(node) = self.node(id) else {
            return BTreeSet::new();
        };
        let mut ids = self.adjacency.neighbors(id);
        ids.insert(node.id.as_str());
        ids
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Filter a snapshot without source variables (the dailies predicate is inert).
pub fn apply(snapshot: &Snapshot, config: &FilterConfig) -> FilteredGraph {
    apply_with(snapshot, config, &SourceVariables::default())
}

/// Filter a snapshot.
pub fn apply_with(
    snapshot: &Snapshot,
    config: &FilterConfig,
    variables: &SourceVariables,
) -> FilteredGraph {
    let mut hidden: BTreeSet<String> = BTreeSet::new();
    let mut survivors: BTreeSet<&str> = BTreeSet::new();
    for node in snapshot.nodes.values() {
        if config.excludes(node, variables) {
            hidden.insert(node.id.clone());
        } else {
            survivors.insert(node.id.as_str());
        }
    }
    let predicate_hidden = hidden.len();

    let mut links: Vec<Link> = snapshot
        .links
        .iter()
        .filter(|l| {
            survivors.contains(l.source.as_str())
                && survivors.contains(l.target.as_str())
                && config.link_structure.shows(l.link_type)
        })
        .cloned()
        .collect();
    let mut adjacency = AdjacencyIndex::build(&links);

    let orphans: Vec<&str> = survivors
        .iter()
        .copied()
        .filter(|id| is_orphan(&adjacency, id, config.orphans))
        .collect();
    if !orphans.is_empty() {
        for id in &orphans {
            survivors.remove(id);
            hidden.insert(id.to_string());
        }
        links.retain(|l| {
            survivors.contains(l.source.as_str()) && survivors.contains(l.target.as_str())
        });
        adjacency = AdjacencyIndex::build(&links);
    }

    let nodes: Vec<Node> = survivors
        .iter()
        .filter_map(|id| snapshot.nodes.get(*id).cloned())
        .collect();

    tracing::debug!(
        nodes = nodes.len(),
        links = links.len(),
        hidden_by_predicate = predicate_hidden,
        hidden_as_orphan = orphans.len(),
        "Filtered graph"
    );

    FilteredGraph {
        nodes,
        links,
        adjacency,
        hidden,
    }
}

fn is_orphan(adjacency: &AdjacencyIndex, id: &str, mode: OrphanMode) -> bool {
    match mode {
        OrphanMode::KeepAll => false,
        OrphanMode::DropIsolated => adjacency.degree(id) == 0,
        OrphanMode::DropUnlessParentLinked => !adjacency
            .links_of(id)
            .iter()
            .any(|l| !l.link_type.is_structural()),
    }
}

// ============================================================================
// Tests
// ============================================================================
