//! Community detection on the filtered graph.
//!
//! Multi-level Louvain over a weighted undirected view of the filtered links:
//! local moves until no node can improve modularity, then every community
//! becomes a super-node and the process repeats on the aggregated graph.
//!
//! The greedy moves are order-sensitive, so the iteration order is fixed:
//! nodes are visited in ascending id order, candidate communities in
//! ascending community id, a move needs a strictly positive improvement and
//! equally good candidates resolve to the lowest community id. Final
//! community ids are numbered by first appearance in id order.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::models::{Link, LinkType, Node};

/// Gains closer than this are treated as equal.
const GAIN_EPSILON: f64 = 1e-12;
/// Upper bound on local-move sweeps per level.
const MAX_SWEEPS: usize = 100;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMode {
    /// Every node is its own community
    Off,
    #[default]
    Community,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    #[serde(deserialize_with = "crate::lenient")]
    pub mode: ClusteringMode,
    /// Modularity resolution; values above 1 favour smaller communities
    pub resolution: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            mode: ClusteringMode::Community,
            resolution: 1.0,
        }
    }
}

impl ClusteringConfig {
    pub fn enabled(&self) -> bool {
        self.mode != ClusteringMode::Off
    }
}

// ============================================================================
// Weighted graph
// ============================================================================

/// Weight of a link in the clustering graph.
pub fn link_weight(link_type: LinkType) -> f64 {
    match link_type {
        LinkType::Cite => 1.0,
        _ => 2.0,
    }
}

/// Undirected petgraph view of a filtered graph, with id ↔ index mapping.
///
/// Nodes are inserted in ascending id order, so index order is id order.
/// Parallel links between the same pair add up into one edge.
#[derive(Debug, Clone, Default)]
pub struct ClusterGraph {
    pub graph: UnGraph<String, f64>,
    pub id_to_index: HashMap<String, NodeIndex>,
}

impl ClusterGraph {
    pub fn build(nodes: &[Node], links: &[Link]) -> Self {
        let ids: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut graph = UnGraph::with_capacity(ids.len(), links.len());
        let mut id_to_index = HashMap::with_capacity(ids.len());
        for id in ids {
            let idx = graph.add_node(id.to_string());
            id_to_index.insert(id.to_string(), idx);
        }

        for link in links {
            let (a, b) = link.endpoints();
            if a == b {
                continue;
            }
            let (Some(&ia), Some(&ib)) = (id_to_index.get(a), id_to_index.get(b)) else {
                continue;
            };
            let weight = link_weight(link.link_type);
            match graph.find_edge(ia, ib) {
                Some(edge) => graph[edge] += weight,
                None => {
                    graph.add_edge(ia, ib, weight);
                }
            }
        }

        Self { graph, id_to_index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn get_index(&self, id: &str) -> Option<NodeIndex> {
        self.id_to_index.get(id).copied()
    }
}

// ============================================================================
// Result
// ============================================================================

/// Node id → community id, valid for the filtered graph it was computed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub communities: BTreeMap<String, u32>,
    pub community_count: usize,
    pub modularity: f64,
}

impl ClusterAssignment {
    /// Every id in its own community, numbered in id order.
    pub fn singletons<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let ids: BTreeSet<&str> = ids.into_iter().collect();
        let communities: BTreeMap<String, u32> = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i as u32))
            .collect();
        Self {
            community_count: communities.len(),
            communities,
            modularity: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    pub fn community_of(&self, id: &str) -> Option<u32> {
        self.communities.get(id).copied()
    }

    /// Ids in community `community`, sorted.
    pub fn members(&self, community: u32) -> Vec<&str> {
        self.communities
            .iter()
            .filter(|(_, c)| **c == community)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

// ============================================================================
// Louvain
// ============================================================================

/// Cluster a filtered graph at resolution 1.
pub fn cluster(nodes: &[Node], links: &[Link]) -> ClusterAssignment {
    louvain(&ClusterGraph::build(nodes, links), 1.0)
}

/// One level of the hierarchy: adjacency lists without self loops plus the
/// weight folded into each node by aggregation.
#[derive(Debug, Clone)]
struct Level {
    adj: Vec<Vec<(usize, f64)>>,
    loops: Vec<f64>,
}

impl Level {
    fn from_graph(graph: &ClusterGraph) -> Self {
        let g = &graph.graph;
        let n = g.node_count();
        let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for edge in g.edge_references() {
            let s = edge.source().index();
            let t = edge.target().index();
            let w = *edge.weight();
            adj[s].push((t, w));
            adj[t].push((s, w));
        }
        for neighbors in adj.iter_mut() {
            neighbors.sort_by_key(|(j, _)| *j);
        }
        Self {
            adj,
            loops: vec![0.0; n],
        }
    }

    fn len(&self) -> usize {
        self.adj.len()
    }

    /// Weighted degree; an internal loop counts twice.
    fn strength(&self, i: usize) -> f64 {
        self.adj[i].iter().map(|(_, w)| w).sum::<f64>() + 2.0 * self.loops[i]
    }

    /// Collapse each community into one node.
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut loops = vec![0.0; count];
        let mut edges: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (i, neighbors) in self.adj.iter().enumerate() {
            let ci = community[i];
            loops[ci] += self.loops[i];
            for &(j, w) in neighbors {
                if j <= i {
                    continue;
                }
                let cj = community[j];
                if ci == cj {
                    loops[ci] += w;
                } else {
                    *edges.entry((ci.min(cj), ci.max(cj))).or_default() += w;
                }
            }
        }

        let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); count];
        for ((a, b), w) in edges {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        for neighbors in adj.iter_mut() {
            neighbors.sort_by_key(|(j, _)| *j);
        }
        Self { adj, loops }
    }
}

/// Greedy local moves on one level. Returns the community of every node and
/// whether any node moved.
fn local_moves(level: &Level, resolution: f64, m2: f64) -> (Vec<usize>, bool) {
    let n = level.len();
    let strengths: Vec<f64> = (0..n).map(|i| level.strength(i)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut total: Vec<f64> = strengths.clone();
    let mut moved_any = false;

    for _ in 0..MAX_SWEEPS {
        let mut moved = false;
        for i in 0..n {
            let ki = strengths[i];
            if ki == 0.0 {
                continue;
            }
            let current = community[i];

            let mut weights: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &level.adj[i] {
                *weights.entry(community[j]).or_default() += w;
            }

            total[current] -= ki;
            let gain = |c: usize, w_in: f64| w_in - resolution * total[c] * ki / m2;

            let mut best = current;
            let mut best_gain = gain(current, weights.get(&current).copied().unwrap_or(0.0));
            for (&candidate, &w_in) in &weights {
                if candidate == current {
                    continue;
                }
                let g = gain(candidate, w_in);
                if g - best_gain > GAIN_EPSILON {
                    best = candidate;
                    best_gain = g;
                }
            }

            total[best] += ki;
            if best != current {
                community[i] = best;
                moved = true;
                moved_any = true;
            }
        }
        if !moved {
            break;
        }
    }

    (community, moved_any)
}

/// Renumber communities by first appearance; returns the number of communities.
fn renumber(community: &mut [usize]) -> usize {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    for c in community.iter_mut() {
        let next = remap.len();
        *c = *remap.entry(*c).or_insert(next);
    }
    remap.len()
}

/// Newman modularity of a partition of the base level.
fn modularity(level: &Level, community: &[usize], resolution: f64, m2: f64) -> f64 {
    if m2 == 0.0 {
        return 0.0;
    }
    let count = community.iter().max().map_or(0, |c| c + 1);
    let mut inside = vec![0.0; count];
    let mut total = vec![0.0; count];
    for (i, neighbors) in level.adj.iter().enumerate() {
        let ci = community[i];
        total[ci] += level.strength(i);
        inside[ci] += level.loops[i];
        for &(j, w) in neighbors {
            if j > i && community[j] == ci {
                inside[ci] += w;
            }
        }
    }
    let m = m2 / 2.0;
    inside
        .iter()
        .zip(&total)
        .map(|(in_c, tot_c)| in_c / m - resolution * (tot_c / m2).powi(2))
        .sum()
}

/// Detect communities with multi-level Louvain.
pub fn louvain(graph: &ClusterGraph, resolution: f64) -> ClusterAssignment {
    let n = graph.node_count();
    if n == 0 {
        return ClusterAssignment::default();
    }

    let base = Level::from_graph(graph);
    let m2: f64 = (0..n).map(|i| base.strength(i)).sum();
    let ids = graph.graph.node_indices().map(|idx| graph.graph[idx].as_str());
    if m2 == 0.0 {
        return ClusterAssignment::singletons(ids);
    }

    let mut membership: Vec<usize> = (0..n).collect();
    let mut level = base.clone();
    let mut levels = 0;
    loop {
        let (mut community, moved) = local_moves(&level, resolution, m2);
        if !moved {
            break;
        }
        let count = renumber(&mut community);
        for m in membership.iter_mut() {
            *m = community[*m];
        }
        levels += 1;
        if count == level.len() {
            break;
        }
        level = level.aggregate(&community, count);
    }
    let count = renumber(&mut membership);
    let q = modularity(&base, &membership, resolution, m2);

    tracing::debug!(
        nodes = n,
        edges = graph.edge_count(),
        communities = count,
        levels,
        modularity = q,
        "Louvain clustering complete"
    );

    ClusterAssignment {
        communities: ids
            .zip(membership)
            .map(|(id, c)| (id.to_string(), c as u32))
            .collect(),
        community_count: count,
        modularity: q,
    }
}

// ============================================================================
// Tests
// ============================================================================
