//! Test helper factories
//!
//! Provides convenience functions for creating nodes, links, snapshots and
//! raw updates with sensible defaults.
#![allow(dead_code)]

use crate::graph::ingest::RawGraphUpdate;
use crate::graph::models::{AdjacencyIndex, Link, LinkType, Node, Snapshot};
use serde_json::{json, Value};
use std::collections::BTreeMap;

// ============================================================================
// Nodes
// ============================================================================

/// Level-0 node for `file`.
pub fn file_node(id: &str, file: &str) -> Node {
    Node {
        id: id.to_string(),
        title: id.to_string(),
        file: file.to_string(),
        level: 0,
        pos: 1,
        olp: Vec::new(),
        tags: Vec::new(),
        properties: Vec::new(),
    }
}

/// Heading node titled after its id.
pub fn heading_node(id: &str, file: &str, level: u32, pos: u64, olp: &[&str]) -> Node {
    Node {
        id: id.to_string(),
        title: id.to_string(),
        file: file.to_string(),
        level,
        pos,
        olp: olp.iter().map(|s| s.to_string()).collect(),
        tags: Vec::new(),
        properties: Vec::new(),
    }
}

/// File node in its own file named `<id>.org`.
pub fn note(id: &str) -> Node {
    file_node(id, &format!("/notes/{}.org", id))
}

pub fn node_map(nodes: Vec<Node>) -> BTreeMap<String, Node> {
    nodes.into_iter().map(|n| (n.id.clone(), n)).collect()
}

// ============================================================================
// Links and snapshots
// ============================================================================

pub fn cite(a: &str, b: &str) -> Link {
    Link::new(a, b, LinkType::Cite)
}

pub fn reference(a: &str, b: &str) -> Link {
    Link::new(a, b, LinkType::Ref)
}

/// Snapshot over the given nodes and links, adjacency included.
pub fn snapshot(nodes: Vec<Node>, links: Vec<Link>) -> Snapshot {
    Snapshot {
        nodes: node_map(nodes),
        adjacency: AdjacencyIndex::build(&links),
        links,
        ..Default::default()
    }
}

/// Snapshot of single-file notes with the given ids, linked by `links`.
pub fn notes_snapshot(ids: &[&str], links: Vec<Link>) -> Snapshot {
    snapshot(ids.iter().map(|id| note(id)).collect(), links)
}

/// Two triangles `a0-a1-a2` and `b0-b1-b2` with no edge between them.
pub fn two_triangles() -> Snapshot {
    notes_snapshot(
        &["a0", "a1", "a2", "b0", "b1", "b2"],
        vec![
            reference("a0", "a1"),
            reference("a1", "a2"),
            reference("a2", "a0"),
            cite("b0", "b1"),
            cite("b1", "b2"),
            cite("b2", "b0"),
        ],
    )
}

// ============================================================================
// Raw updates
// ============================================================================

pub fn raw_node(id: &str, file: &str, level: u32, pos: u64, olp: &[&str]) -> Value {
    json!({
        "id": id,
        "title": id,
        "file": file,
        "level": level,
        "pos": pos,
        "olp": olp,
        "tags": [],
        "properties": {}
    })
}

pub fn raw_note(id: &str) -> Value {
    raw_node(id, &format!("/notes/{}.org", id), 0, 1, &[])
}

pub fn raw_link(source: &str, target: &str, link_type: &str) -> Value {
    json!({"source": source, "target": target, "type": link_type})
}

pub fn raw_update(nodes: Vec<Value>, links: Vec<Value>) -> RawGraphUpdate {
    RawGraphUpdate {
        nodes,
        links,
        tags: Vec::new(),
    }
}
