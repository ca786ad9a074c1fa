//! Graph data models.
//!
//! Defines the complete type system for the synchronization engine:
//!
//! ## Canonical graph
//! - [`Node`] / [`NodeProperty`]: notes and headings with validated properties
//! - [`LinkType`] / [`Link`]: references between nodes
//! - [`AdjacencyIndex`]: node id → incident links, rebuilt from a link list
//! - [`Snapshot`]: the authoritative merged graph
//!
//! ## Simulation state
//! - [`SimState`] / [`CoordinateTable`]: renderer coordinates keyed by node id
//!
//! ## Source metadata
//! - [`SourceVariables`]: directories reported by the live source

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// Nodes
// ============================================================================

/// A validated node property.
///
/// The live source sends an open key/value bag; the keys the engine acts on
/// are lifted into variants at ingestion, anything else is kept in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeProperty {
    /// `FILELESS`: the node has no backing note file (e.g. a bare citation)
    Fileless,
    /// `bad`: the node stands in for an unresolved reference
    Bad,
    /// `NOTER_PAGE`: the heading annotates a page of a document
    NoterPage { page: String },
    /// `ROAM_REFS`: external reference identifiers (citation keys, URLs)
    RoamRefs { refs: String },
    /// Any other property, preserved verbatim
    Other { key: String, value: String },
}

impl NodeProperty {
    /// Lift a raw `(key, value)` pair into a property.
    pub fn from_pair(key: &str, value: String) -> Self {
        match key {
            "FILELESS" => Self::Fileless,
            "bad" => Self::Bad,
            "NOTER_PAGE" => Self::NoterPage { page: value },
            "ROAM_REFS" => Self::RoamRefs { refs: value },
            _ => Self::Other {
                key: key.to_string(),
                value,
            },
        }
    }
}

/// A note (level 0) or heading (level > 0) in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Source file path (empty for ghost nodes)
    pub file: String,
    /// Hierarchy level: 0 = file node, >0 = heading depth
    pub level: u32,
    /// Position of the heading within its file
    pub pos: u64,
    /// Outline path: titles of the ancestor headings
    pub olp: Vec<String>,
    pub tags: Vec<String>,
    pub properties: Vec<NodeProperty>,
}

impl Node {
    /// Placeholder for a link endpoint that does not resolve to any node.
    pub fn ghost(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            file: String::new(),
            level: 0,
            pos: 0,
            olp: Vec::new(),
            tags: vec!["bad".to_string()],
            properties: vec![NodeProperty::Fileless, NodeProperty::Bad],
        }
    }

    pub fn is_file_node(&self) -> bool {
        self.level == 0
    }

    pub fn is_fileless(&self) -> bool {
        self.properties.contains(&NodeProperty::Fileless)
    }

    pub fn is_bad(&self) -> bool {
        self.properties.contains(&NodeProperty::Bad)
    }

    pub fn noter_page(&self) -> Option<&str> {
        self.properties.iter().find_map(|p| match p {
            NodeProperty::NoterPage { page } => Some(page.as_str()),
            _ => None,
        })
    }

    pub fn roam_refs(&self) -> Option<&str> {
        self.properties.iter().find_map(|p| match p {
            NodeProperty::RoamRefs { refs } => Some(refs.as_str()),
            _ => None,
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

// ============================================================================
// Links
// ============================================================================

/// Type of a link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Heading → its file node (synthesized)
    Parent,
    /// Heading → nearest enclosing heading or file node (synthesized)
    Heading,
    /// Citation reference from note content
    Cite,
    /// Any other content reference
    Ref,
    /// Link with an endpoint that did not resolve
    Bad,
}

impl LinkType {
    /// Map a link type tag from the live source.
    ///
    /// The source reports several content-link flavours (`id`, `file`,
    /// `https`, ...); everything that is not a known tag is a `Ref`.
    pub fn from_source_tag(tag: &str) -> Self {
        match tag {
            "parent" => Self::Parent,
            "heading" => Self::Heading,
            "cite" => Self::Cite,
            "bad" => Self::Bad,
            _ => Self::Ref,
        }
    }

    /// `parent` and `heading` links derive from the file outline.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Parent | Self::Heading)
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Heading => write!(f, "heading"),
            Self::Cite => write!(f, "cite"),
            Self::Ref => write!(f, "ref"),
            Self::Bad => write!(f, "bad"),
        }
    }
}

/// A link as supplied by the source (or synthesized).
///
/// `source`/`target` keep the direction the source reported; use
/// [`Link::endpoints`] for the canonical, order-independent pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
}

impl Link {
    pub fn new(source: impl Into<String>, target: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            link_type,
        }
    }

    /// Canonical endpoint pair: the two ids in lexical order.
    pub fn endpoints(&self) -> (&str, &str) {
        if self.source <= self.target {
            (&self.source, &self.target)
        } else {
            (&self.target, &self.source)
        }
    }

    /// Whether `id` is one of the two endpoints.
    pub fn touches(&self, id: &str) -> bool {
        self.source == id || self.target == id
    }

    /// The endpoint opposite `id` (`id` itself for a self link).
    pub fn other_end(&self, id: &str) -> &str {
        if self.source == id {
            &self.target
        } else {
            &self.source
        }
    }
}

// ============================================================================
// AdjacencyIndex
// ============================================================================

/// Node id → links incident to that node, in link-list order.
///
/// Always built from a complete link list; there is no way to patch it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdjacencyIndex {
    by_node: HashMap<String, Vec<Link>>,
}

impl AdjacencyIndex {
    pub fn build<'a>(links: impl IntoIterator<Item = &'a Link>) -> Self {
        let mut by_node: HashMap<String, Vec<Link>> = HashMap::new();
        for link in links {
            by_node
                .entry(link.source.clone())
                .or_default()
                .push(link.clone());
            if link.target != link.source {
                by_node
                    .entry(link.target.clone())
                    .or_default()
                    .push(link.clone());
            }
        }
        Self { by_node }
    }

    /// Links incident to `id` (empty if the node has none).
    pub fn links_of(&self, id: &str) -> &[Link] {
        self.by_node.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct ids adjacent to `id`, sorted.
    pub fn neighbors(&self, id: &str) -> BTreeSet<&str> {
        self.links_of(id)
            .iter()
            .map(|l| l.other_end(id))
            .filter(|other| *other != id)
            .collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.links_of(id).len()
    }

    /// Number of nodes with at least one incident link.
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// The canonical graph at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Nodes keyed by id
    pub nodes: BTreeMap<String, Node>,
    /// All links, synthesized ones included
    pub links: Vec<Link>,
    /// Incident links per node, derived from `links`
    pub adjacency: AdjacencyIndex,
    /// Tag catalogue reported by the source
    pub tags: Vec<String>,
    /// Citation key → id of the node carrying that key in `ROAM_REFS`
    pub cites: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Ids of nodes referring to `id`, i.e. links where `id` is not the
    /// reported source.
    pub fn backlinks(&self, id: &str) -> Vec<&str> {
        self.adjacency
            .links_of(id)
            .iter()
            .filter(|l| l.source != id)
            .map(|l| l.source.as_str())
            .collect()
    }

    /// Node carrying the given citation key.
    pub fn node_by_cite(&self, key: &str) -> Option<&Node> {
        self.cites.get(key).and_then(|id| self.nodes.get(id))
    }
}

// ============================================================================
// Simulation state
// ============================================================================

/// Position and velocity owned by the renderer's physics simulation.
///
/// Opaque to the engine: carried across recomputes by node id, never read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimState {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

impl SimState {
    /// At rest at the origin.
    pub const ORIGIN: SimState = SimState {
        x: 0.0,
        y: 0.0,
        vx: 0.0,
        vy: 0.0,
    };

    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Self::ORIGIN
        }
    }
}

/// Side table of simulation state keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinateTable {
    states: HashMap<String, SimState>,
}

impl CoordinateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SimState> {
        self.states.get(id).copied()
    }

    pub fn set(&mut self, id: impl Into<String>, state: SimState) {
        self.states.insert(id.into(), state);
    }

    /// Insert only if `id` has no state yet.
    pub fn seed(&mut self, id: &str, state: SimState) {
        self.states.entry(id.to_string()).or_insert(state);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    /// Drop every entry whose id fails the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.states.retain(|id, _| keep(id));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SimState)> {
        self.states.iter().map(|(id, s)| (id.as_str(), *s))
    }
}

// ============================================================================
// Source variables
// ============================================================================

/// Directories reported by the live source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceVariables {
    /// Root directory of the note collection
    #[serde(alias = "roam_dir")]
    pub roam_dir: Option<String>,
    /// Directory holding daily notes; enables the dailies filter
    #[serde(alias = "daily_dir")]
    pub daily_dir: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
