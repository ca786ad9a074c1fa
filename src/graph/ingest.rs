//! Raw update ingestion.
//!
//! The live source delivers one JSON batch per update. Records are decoded
//! and validated one at a time so a malformed node or link only costs that
//! record: it is logged, counted in the [`IngestReport`] and skipped.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::models::{CoordinateTable, Link, LinkType, Node, NodeProperty, SimState};

// ============================================================================
// Raw wire types
// ============================================================================

/// One atomic batch from the live source.
///
/// Records are kept as untyped JSON until [`ingest`] validates them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawGraphUpdate {
    pub nodes: Vec<Value>,
    pub links: Vec<Value>,
    pub tags: Vec<Value>,
}

impl RawGraphUpdate {
    /// Parse a batch, treating `null` collections as empty.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        let take = |key: &str| match value.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Self {
            nodes: take("nodes"),
            links: take("links"),
            tags: take("tags"),
        }
    }
}

impl<'de> Deserialize<'de> for RawGraphUpdate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

#[derive(Debug, Deserialize)]
struct RawNode {
    id: Option<String>,
    title: Option<String>,
    file: Option<String>,
    level: Option<i64>,
    pos: Option<i64>,
    #[serde(alias = "outline")]
    olp: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    properties: Option<BTreeMap<String, Value>>,
    x: Option<f64>,
    y: Option<f64>,
    vx: Option<f64>,
    vy: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    source: Option<String>,
    target: Option<String>,
    #[serde(rename = "type")]
    link_type: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Node,
    Link,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Link => write!(f, "link"),
        }
    }
}

/// Why a single record was rejected.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed {kind} record: {error}")]
    Malformed {
        kind: RecordKind,
        #[source]
        error: serde_json::Error,
    },
    #[error("{kind} record is missing required field `{field}`")]
    MissingField {
        kind: RecordKind,
        field: &'static str,
    },
    #[error("{kind} record has invalid `{field}`: {reason}")]
    InvalidField {
        kind: RecordKind,
        field: &'static str,
        reason: String,
    },
}

/// Counts of what an ingestion pass kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub nodes_accepted: usize,
    pub links_accepted: usize,
    pub nodes_dropped: usize,
    pub links_dropped: usize,
    /// Records whose id repeated an earlier record in the same batch
    pub duplicate_ids: usize,
}

impl IngestReport {
    pub fn dropped(&self) -> usize {
        self.nodes_dropped + self.links_dropped
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// A validated batch, before link synthesis.
#[derive(Debug, Clone, Default)]
pub struct IngestedGraph {
    pub nodes: BTreeMap<String, Node>,
    pub links: Vec<Link>,
    pub tags: Vec<String>,
    /// Simulation state carried on raw records, used only for new ids
    pub seeds: CoordinateTable,
    pub report: IngestReport,
}

/// Validate every record of a raw batch, dropping the bad ones.
///
/// A repeated id replaces the earlier record so ids stay unique.
pub fn ingest(update: &RawGraphUpdate) -> IngestedGraph {
    let mut out = IngestedGraph::default();

    for value in &update.nodes {
        match parse_node(value) {
            Ok((node, seed)) => {
                if let Some(state) = seed {
                    out.seeds.set(node.id.clone(), state);
                }
                if out.nodes.insert(node.id.clone(), node).is_some() {
                    out.report.duplicate_ids += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping node record");
                out.report.nodes_dropped += 1;
            }
        }
    }
    out.report.nodes_accepted = out.nodes.len();

    for value in &update.links {
        match parse_link(value) {
            Ok(link) => out.links.push(link),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping link record");
                out.report.links_dropped += 1;
            }
        }
    }
    out.report.links_accepted = out.links.len();

    out.tags = update
        .tags
        .iter()
        .filter_map(|t| t.as_str().map(str::to_string))
        .collect();

    tracing::debug!(
        nodes = out.report.nodes_accepted,
        links = out.report.links_accepted,
        nodes_dropped = out.report.nodes_dropped,
        links_dropped = out.report.links_dropped,
        "Ingested raw graph update"
    );
    out
}

fn parse_node(value: &Value) -> Result<(Node, Option<SimState>), IngestError> {
    let kind = RecordKind::Node;
    let raw: RawNode = serde_json::from_value(value.clone())
        .map_err(|error| IngestError::Malformed { kind, error })?;

    let id = required_id(kind, "id", raw.id)?;
    let file = raw.file.ok_or(IngestError::MissingField { kind, field: "file" })?;
    let level = raw.level.ok_or(IngestError::MissingField { kind, field: "level" })?;
    let level = u32::try_from(level).map_err(|_| IngestError::InvalidField {
        kind,
        field: "level",
        reason: format!("{} is not a hierarchy level", level),
    })?;
    let pos = u64::try_from(raw.pos.unwrap_or(0)).map_err(|_| IngestError::InvalidField {
        kind,
        field: "pos",
        reason: "position must not be negative".to_string(),
    })?;

    let properties = raw
        .properties
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| property_text(value).map(|v| NodeProperty::from_pair(&key, v)))
        .collect();

    let seed = match (raw.x, raw.y) {
        (Some(x), Some(y)) => Some(SimState {
            x,
            y,
            vx: raw.vx.unwrap_or(0.0),
            vy: raw.vy.unwrap_or(0.0),
        }),
        _ => None,
    };

    let node = Node {
        title: raw.title.unwrap_or_else(|| id.clone()),
        id,
        file,
        level,
        pos,
        olp: raw.olp.unwrap_or_default(),
        tags: raw.tags.unwrap_or_default(),
        properties,
    };
    Ok((node, seed))
}

fn parse_link(value: &Value) -> Result<Link, IngestError> {
    let kind = RecordKind::Link;
    let raw: RawLink = serde_json::from_value(value.clone())
        .map_err(|error| IngestError::Malformed { kind, error })?;

    let source = required_id(kind, "source", raw.source)?;
    let target = required_id(kind, "target", raw.target)?;
    let tag = raw.link_type.ok_or(IngestError::MissingField { kind, field: "type" })?;
    Ok(Link::new(source, target, LinkType::from_source_tag(&tag)))
}

fn required_id(
    kind: RecordKind,
    field: &'static str,
    value: Option<String>,
) -> Result<String, IngestError> {
    match value {
        Some(id) if !id.is_empty() => Ok(id),
        Some(_) => Err(IngestError::InvalidField {
            kind,
            field,
            reason: "empty id".to_string(),
        }),
        None => Err(IngestError::MissingField { kind, field }),
    }
}

/// Text of a property value; `None` for values the source uses to mean
/// "unset" (`null`, `false`, empty string).
fn property_text(value: Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("t".to_string()),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
