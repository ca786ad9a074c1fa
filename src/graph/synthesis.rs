//! Link normalization and synthesis.
//!
//! The live source only reports content links. The outline structure of
//! each file is turned into links here:
//!
//! - **heading links**: heading → nearest enclosing heading (or the file node)
//! - **parent links**: heading → file node, one hop
//!
//! Both sets are always produced; the filter decides which one is shown.
//! Endpoints that do not resolve get a ghost node so that every link in a
//! snapshot references two existing nodes.

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use super::ingest::IngestedGraph;
use super::models::{CoordinateTable, Link, LinkType, Node};

/// Progress cookies such as `[2/5]` that org headings carry in their title
/// but not in the outline paths of their children.
static PROGRESS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" *\[\d*/\d*\] *").expect("valid progress marker regex"));

/// Remove progress cookies from a heading title.
pub fn strip_progress_marker(title: &str) -> String {
    PROGRESS_MARKER.replace_all(title, "").into_owned()
}

/// Canonical `(a, b)` endpoint pair of a link, independent of which field
/// held which id.
pub fn normalize(link: &Link) -> (&str, &str) {
    link.endpoints()
}

// ============================================================================
// Structural links
// ============================================================================

/// Nodes of one file, ordered by position, with the file node split out.
struct FileOutline<'a> {
    root: &'a Node,
    headings: Vec<&'a Node>,
    all: Vec<&'a Node>,
}

/// Group nodes by file; files without a level-0 node are skipped.
fn outlines(nodes: &BTreeMap<String, Node>) -> Vec<FileOutline<'_>> {
    let mut by_file: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
    for node in nodes.values() {
        by_file.entry(node.file.as_str()).or_default().push(node);
    }

    by_file
        .into_iter()
        .filter_map(|(file, mut all)| {
            all.sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.id.cmp(&b.id)));
            let Some(root) = all.iter().copied().find(|n| n.is_file_node()) else {
                tracing::debug!(file, nodes = all.len(), "No file node, skipping outline links");
                return None;
            };
            let headings = all.iter().copied().filter(|n| !n.is_file_node()).collect();
            Some(FileOutline {
                root,
                headings,
                all,
            })
        })
        .collect()
}

/// Heading → nearest enclosing heading, or the file node when none encloses it.
///
/// An enclosing candidate sits at a lower level, earlier in the file, and its
/// (marker-stripped) title appears in the heading's outline path. The deepest
/// candidate wins; among equally deep candidates the closest preceding one,
/// not the first in outline order, so a repeated sibling title resolves to
/// the sibling right above the heading.
pub fn heading_links(nodes: &BTreeMap<String, Node>) -> Vec<Link> {
    let mut links = Vec::new();
    for outline in outlines(nodes) {
        let titles: HashMap<&str, String> = outline
            .all
            .iter()
            .map(|n| (n.id.as_str(), strip_progress_marker(&n.title)))
            .collect();

        for heading in &outline.headings {
            let target = outline
                .all
                .iter()
                .filter(|candidate| {
                    candidate.level < heading.level
                        && candidate.pos < heading.pos
                        && heading.olp.contains(&titles[candidate.id.as_str()])
                })
                .max_by(|a, b| a.level.cmp(&b.level).then_with(|| a.pos.cmp(&b.pos)))
                .copied()
                .unwrap_or(outline.root);
            links.push(Link::new(&heading.id, &target.id, LinkType::Heading));
        }
    }
    links
}

/// Heading → its file node.
pub fn parent_links(nodes: &BTreeMap<String, Node>) -> Vec<Link> {
    outlines(nodes)
        .into_iter()
        .flat_map(|outline| {
            let root = outline.root;
            outline
                .headings
                .into_iter()
                .map(move |h| Link::new(&h.id, &root.id, LinkType::Parent))
        })
        .collect()
}

/// All structural links for a node set: heading links, then parent links.
pub fn synthesize(nodes: &BTreeMap<String, Node>) -> Vec<Link> {
    let mut links = heading_links(nodes);
    links.extend(parent_links(nodes));
    links
}

// ============================================================================
// Dangling references
// ============================================================================

/// Give every unresolved endpoint a ghost node and re-tag its links as `Bad`.
///
/// Returns the number of ghost nodes created.
pub fn resolve_dangling(nodes: &mut BTreeMap<String, Node>, links: &mut [Link]) -> usize {
    let mut ghost_ids: HashSet<String> = HashSet::new();
    for link in links.iter_mut() {
        let mut dangling = false;
        for id in [&link.source, &link.target] {
            if ghost_ids.contains(id.as_str()) {
                dangling = true;
            } else if !nodes.contains_key(id.as_str()) {
                nodes.insert(id.clone(), Node::ghost(id));
                ghost_ids.insert(id.clone());
                dangling = true;
            }
        }
        if dangling {
            link.link_type = LinkType::Bad;
        }
    }
    ghost_ids.len()
}

// ============================================================================
// Full processing pass
// ============================================================================

/// A batch with structural links added and every endpoint resolved.
#[derive(Debug, Clone, Default)]
pub struct ProcessedGraph {
    pub nodes: BTreeMap<String, Node>,
    pub links: Vec<Link>,
    pub tags: Vec<String>,
    pub seeds: CoordinateTable,
    pub ghosts: usize,
}

/// Synthesize structural links and resolve dangling references.
pub fn process(ingested: IngestedGraph) -> ProcessedGraph {
    let IngestedGraph {
        mut nodes,
        mut links,
        tags,
        seeds,
        ..
    } = ingested;

    links.extend(synthesize(&nodes));
    let ghosts = resolve_dangling(&mut nodes, &mut links);
    if ghosts > 0 {
        tracing::debug!(ghosts, "Synthesized ghost nodes for unresolved references");
    }

    ProcessedGraph {
        nodes,
        links,
        tags,
        seeds,
        ghosts,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{file_node, heading_node, node_map};

    #[test]
    fn test_strip_progress_marker() {
        assert_eq!(strip_progress_marker("Tasks [2/5]"), "Tasks");
        assert_eq!(strip_progress_marker("Tasks [/]"), "Tasks");
        assert_eq!(strip_progress_marker("[1/3] Reading list"), "Reading list");
        assert_eq!(strip_progress_marker("Plain"), "Plain");
    }

    #[test]
    fn test_normalize_swap_invariant() {
        let link = Link::new("b-node", "a-node", LinkType::Cite);
        let swapped = Link::new("a-node", "b-node", LinkType::Cite);
        assert_eq!(normalize(&link), normalize(&swapped));
        assert_eq!(normalize(&link), ("a-node", "b-node"));
    }

    #[test]
    fn test_heading_links_nearest_ancestor() {
        let nodes = node_map(vec![
            file_node("R", "f.org"),
            heading_node("H1", "f.org", 1, 10, &[]),
            heading_node("H2", "f.org", 2, 20, &["H1"]),
        ]);
        let links = heading_links(&nodes);
        assert_eq!(links.len(), 2);
        assert!(links.contains(&Link::new("H1", "R", LinkType::Heading)));
        assert!(links.contains(&Link::new("H2", "H1", LinkType::Heading)));
    }

    #[test]
    fn test_heading_links_strip_progress_in_ancestor_title() {
        let mut parent = heading_node("P", "f.org", 1, 10, &[]);
        parent.title = "Project [1/4]".to_string();
        let nodes = node_map(vec![
            file_node("R", "f.org"),
            parent,
            heading_node("C", "f.org", 2, 20, &["Project"]),
        ]);
        let links = heading_links(&nodes);
        assert!(links.contains(&Link::new("C", "P", LinkType::Heading)));
    }

    #[test]
    fn test_heading_links_requires_earlier_position() {
        // H2 names H1 in its outline but appears before it: falls back to root
        let nodes = node_map(vec![
            file_node("R", "f.org"),
            heading_node("H1", "f.org", 1, 30, &[]),
            heading_node("H2", "f.org", 2, 20, &["H1"]),
        ]);
        let links = heading_links(&nodes);
        assert!(links.contains(&Link::new("H2", "R", LinkType::Heading)));
    }

    #[test]
    fn test_heading_links_same_title_picks_closest() {
        let nodes: BTreeMap<String, Node> = node_map(vec![
            file_node("R", "f.org"),
            heading_node("first", "f.org", 1, 10, &[]),
            heading_node("second", "f.org", 1, 30, &[]),
            heading_node("child", "f.org", 2, 40, &["H"]),
        ])
        .into_iter()
        .map(|(id, mut n)| {
            if id == "first" || id == "second" {
                n.title = "H".to_string();
            }
            (id, n)
        })
        .collect();
        let links = heading_links(&nodes);
        assert!(links.contains(&Link::new("child", "second", LinkType::Heading)));
    }

    #[test]
    fn test_heading_links_skip_file_without_root() {
        let nodes = node_map(vec![
            heading_node("H1", "orphan.org", 1, 10, &[]),
            heading_node("H2", "orphan.org", 2, 20, &["H1"]),
        ]);
        assert!(heading_links(&nodes).is_empty());
        assert!(parent_links(&nodes).is_empty());
    }

    #[test]
    fn test_parent_links_flat() {
        let nodes = node_map(vec![
            file_node("R", "f.org"),
            heading_node("H1", "f.org", 1, 10, &[]),
            heading_node("H2", "f.org", 2, 20, &["H1"]),
            file_node("S", "g.org"),
        ]);
        let links = parent_links(&nodes);
        assert_eq!(links.len(), 2);
        assert!(links.contains(&Link::new("H1", "R", LinkType::Parent)));
        assert!(links.contains(&Link::new("H2", "R", LinkType::Parent)));
    }

    #[test]
    fn test_resolve_dangling_creates_ghosts() {
        let mut nodes = node_map(vec![file_node("a", "a.org")]);
        let mut links = vec![
            Link::new("a", "missing", LinkType::Cite),
            Link::new("gone", "also-gone", LinkType::Ref),
            Link::new("a", "missing", LinkType::Ref),
        ];
        let ghosts = resolve_dangling(&mut nodes, &mut links);
        assert_eq!(ghosts, 3);
        assert!(nodes["missing"].is_bad());
        assert!(nodes.contains_key("gone"));
        assert!(nodes.contains_key("also-gone"));
        assert!(links.iter().all(|l| l.link_type == LinkType::Bad));
        for link in &links {
            assert!(nodes.contains_key(&link.source));
            assert!(nodes.contains_key(&link.target));
        }
    }

    #[test]
    fn test_resolve_dangling_leaves_resolved_links() {
        let mut nodes = node_map(vec![file_node("a", "a.org"), file_node("b", "b.org")]);
        let mut links = vec![Link::new("a", "b", LinkType::Cite)];
        assert_eq!(resolve_dangling(&mut nodes, &mut links), 0);
        assert_eq!(links[0].link_type, LinkType::Cite);
    }
}
