//! Local-neighborhood scoping.
//!
//! A [`Scope`] tracks which ids the user focused on and which ids they removed
//! from the local view. Commands move it between three states:
//!
//! ```text
//!            Add / Replace / Follow
//!   Empty ───────────────────────────▶ Single(id)
//!     ▲                                 │   ▲
//!     │ Clear / Remove last             │Add│ Remove (one left)
//!     │                                 ▼   │
//!     └──────────────────────────────── Multi(ids)
//! ```
//!
//! Every transition reports how the scoped graph has to be rebuilt:
//! [`Transition::Fresh`] recomputes the neighborhood with every node at the
//! origin, [`Transition::Extend`] keeps the previously scoped nodes with their
//! coordinates and only adds the new frontier, [`Transition::Prune`]
//! recomputes the neighborhood but keeps coordinates of the nodes that stay.
//! Only adding focal ids extends; a removal always recomputes reachability.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use super::filter::FilteredGraph;
use super::models::{CoordinateTable, Link, Node, SimState};

// ============================================================================
// Configuration
// ============================================================================

/// What following a node does while a local view is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalBehavior {
    /// Grow the view when the followed node touches it
    #[default]
    Add,
    /// Always start a new view around the followed node
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Maximum number of hops from a focal node
    pub depth: usize,
    #[serde(deserialize_with = "crate::lenient")]
    pub behavior: LocalBehavior,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            depth: 1,
            behavior: LocalBehavior::Add,
        }
    }
}

// ============================================================================
// State machine
// ============================================================================

/// A request to change the focal set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "id", rename_all = "snake_case")]
pub enum ScopeCommand {
    Add(String),
    Remove(String),
    Replace(String),
    Clear,
    /// Open or grow the local view around a node, per [`LocalBehavior`]
    Follow(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeState {
    #[default]
    Empty,
    Single(String),
    Multi(BTreeSet<String>),
}

/// How the scoped graph must be rebuilt after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed
    Unchanged,
    /// Scoping turned off
    Cleared,
    Fresh,
    Extend,
    /// Reachability shrank while several focal ids remain
    Prune,
}

/// Focal ids plus the ids excluded from the local view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    state: ScopeState,
    excluded: BTreeSet<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ScopeState {
        &self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == ScopeState::Empty
    }

    pub fn focal(&self) -> BTreeSet<&str> {
        match &self.state {
            ScopeState::Empty => BTreeSet::new(),
            ScopeState::Single(id) => BTreeSet::from([id.as_str()]),
            ScopeState::Multi(ids) => ids.iter().map(String::as_str).collect(),
        }
    }

    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    /// Apply a command.
    ///
    /// `Follow` consults `filtered` to decide whether the followed node touches
    /// the current view.
    pub fn apply(
        &mut self,
        command: ScopeCommand,
        behavior: LocalBehavior,
        filtered: &FilteredGraph,
    ) -> Transition {
        match command {
            ScopeCommand::Add(id) => self.add(id),
            ScopeCommand::Remove(id) => self.remove(id),
            ScopeCommand::Replace(id) => self.replace(id),
            ScopeCommand::Clear => self.clear(),
            ScopeCommand::Follow(id) => match self.resolve_follow(id, behavior, filtered) {
                ScopeCommand::Replace(id) => self.refocus(id),
                resolved => self.apply(resolved, behavior, filtered),
            },
        }
    }

    fn resolve_follow(
        &self,
        id: String,
        behavior: LocalBehavior,
        filtered: &FilteredGraph,
    ) -> ScopeCommand {
        if self.is_empty() || behavior == LocalBehavior::Replace {
            return ScopeCommand::Replace(id);
        }
        let focal = self.focal();
        let touches_view = filtered
            .adjacency
            .neighbors(&id)
            .iter()
            .any(|n| focal.contains(n));
        if touches_view {
            ScopeCommand::Add(id)
        } else {
            ScopeCommand::Replace(id)
        }
    }

    fn add(&mut self, id: String) -> Transition {
        self.excluded.remove(&id);
        match std::mem::take(&mut self.state) {
            ScopeState::Empty => {
                self.state = ScopeState::Single(id);
                Transition::Fresh
            }
            ScopeState::Single(current) if current == id => {
                self.state = ScopeState::Single(current);
                Transition::Unchanged
            }
            ScopeState::Single(current) => {
                self.state = ScopeState::Multi(BTreeSet::from([current, id]));
                Transition::Extend
            }
            ScopeState::Multi(mut ids) => {
                let added = ids.insert(id);
                self.state = ScopeState::Multi(ids);
                if added {
                    Transition::Extend
                } else {
                    Transition::Unchanged
                }
            }
        }
    }

    fn remove(&mut self, id: String) -> Transition {
        let state = std::mem::take(&mut self.state);
        let (state, transition) = match state {
            ScopeState::Empty => (ScopeState::Empty, Transition::Unchanged),
            ScopeState::Single(current) if current == id => {
                (ScopeState::Empty, Transition::Cleared)
            }
            ScopeState::Single(current) => (ScopeState::Single(current), Transition::Fresh),
            ScopeState::Multi(mut ids) => {
                let was_focal = ids.remove(&id);
                if ids.len() == 1 && was_focal {
                    let last = ids.into_iter().next().unwrap_or_default();
                    (ScopeState::Single(last), Transition::Fresh)
                } else {
                    (ScopeState::Multi(ids), Transition::Prune)
                }
            }
        };
        self.state = state;
        self.excluded.insert(id);
        transition
    }

    fn replace(&mut self, id: String) -> Transition {
        self.excluded.clear();
        self.state = ScopeState::Single(id);
        Transition::Fresh
    }

    /// Focus on `id` alone, keeping the other exclusions.
    fn refocus(&mut self, id: String) -> Transition {
        self.excluded.remove(&id);
        self.state = ScopeState::Single(id);
        Transition::Fresh
    }

    fn clear(&mut self) -> Transition {
        if self.is_empty() {
            return Transition::Unchanged;
        }
        self.state = ScopeState::Empty;
        Transition::Cleared
    }
}

// ============================================================================
// Expansion
// ============================================================================

/// The local view: a bounded neighborhood of the filtered graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScopedGraph {
    pub focal: BTreeSet<String>,
    /// Scoped nodes, ordered by id
    pub nodes: Vec<Node>,
    /// Links between scoped nodes as canonical `(a, b)` pairs
    pub links: Vec<Link>,
    /// Simulation state for every scoped node
    pub positions: CoordinateTable,
}

impl ScopedGraph {
    pub fn contains(&self, id: &str) -> bool {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .is_ok()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }
}

/// Ids within `depth` hops of the focal ids, never entering an excluded id.
pub fn reachable<'a>(
    filtered: &'a FilteredGraph,
    focal: &BTreeSet<&str>,
    excluded: &BTreeSet<String>,
    depth: usize,
) -> BTreeSet<&'a str> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
    for id in focal {
        if excluded.contains(*id) {
            continue;
        }
        if let Some(node) = filtered.node(id) {
            if seen.insert(node.id.as_str()) {
                queue.push_back((node.id.as_str(), 0));
            }
        }
    }

    while let Some((current, hops)) = queue.pop_front() {
        if hops == depth {
            continue;
        }
        for neighbor in filtered.adjacency.neighbors(current) {
            if excluded.contains(neighbor) || !seen.insert(neighbor) {
                continue;
            }
            queue.push_back((neighbor, hops + 1));
        }
    }
    seen
}

/// Scope the filtered graph around `focal`.
///
/// Without `previous` every scoped node starts at the origin. With
/// `previous`, nodes already in it keep their place and coordinates (unless
/// excluded or no longer in the filtered graph) and only newly reachable
/// nodes are added at the origin.
pub fn expand(
    filtered: &FilteredGraph,
    focal: &BTreeSet<&str>,
    excluded: &BTreeSet<String>,
    depth: usize,
    previous: Option<&ScopedGraph>,
) -> ScopedGraph {
    let mut ids = reachable(filtered, focal, excluded, depth);
    let mut positions = CoordinateTable::new();

    if let Some(previous) = previous {
        for id in previous.node_ids() {
            if excluded.contains(id) {
                continue;
            }
            if let Some(node) = filtered.node(id) {
                ids.insert(node.id.as_str());
                if let Some(state) = previous.positions.get(id) {
                    positions.set(id, state);
                }
            }
        }
    }
    for id in &ids {
        positions.seed(id, SimState::ORIGIN);
    }

    let scoped = assemble(filtered, focal, ids, positions);
    tracing::debug!(
        focal = scoped.focal.len(),
        nodes = scoped.nodes.len(),
        links = scoped.links.len(),
        extend = previous.is_some(),
        "Scoped graph"
    );
    scoped
}

/// Recompute the neighborhood from scratch after the filtered graph changed,
/// carrying coordinates over for nodes that stay in scope.
pub fn refresh(
    filtered: &FilteredGraph,
    focal: &BTreeSet<&str>,
    excluded: &BTreeSet<String>,
    depth: usize,
    previous: &ScopedGraph,
) -> ScopedGraph {
    let ids = reachable(filtered, focal, excluded, depth);
    let mut positions = CoordinateTable::new();
    for id in &ids {
        positions.set(*id, previous.positions.get(id).unwrap_or(SimState::ORIGIN));
    }
    assemble(filtered, focal, ids, positions)
}

fn assemble(
    filtered: &FilteredGraph,
    focal: &BTreeSet<&str>,
    ids: BTreeSet<&str>,
    positions: CoordinateTable,
) -> ScopedGraph {
    let links = filtered
        .links
        .iter()
        .filter(|l| ids.contains(l.source.as_str()) && ids.contains(l.target.as_str()))
        .map(|l| {
            let (a, b) = l.endpoints();
            Link::new(a, b, l.link_type)
        })
        .collect();
    let nodes = filtered
        .nodes
        .iter()
        .filter(|n| ids.contains(n.id.as_str()))
        .cloned()
        .collect();

    ScopedGraph {
        focal: focal
            .iter()
            .filter(|id| ids.contains(*id))
            .map(|id| id.to_string())
            .collect(),
        nodes,
        links,
        positions,
    }
}

// ============================================================================
// Tests
// ============================================================================
