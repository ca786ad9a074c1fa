//! Event types consumed by a view session.
//!
//! Messages from the live source arrive in a `{"type": ..., "data": ...}`
//! envelope (`graphdata`, `variables`, `command`). The host adds its own
//! events for settings changes and renderer position reports using the same
//! envelope, so a recorded session is one JSON object per line.

use serde::{Deserialize, Serialize};

use crate::graph::clustering::ClusteringConfig;
use crate::graph::filter::FilterConfig;
use crate::graph::ingest::RawGraphUpdate;
use crate::graph::models::{SimState, SourceVariables};
use crate::graph::scope::{LocalConfig, ScopeCommand};

/// An input to the view engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GraphEvent {
    /// Full graph batch from the live source
    #[serde(rename = "graphdata")]
    GraphData(RawGraphUpdate),
    /// Directories reported by the live source
    Variables(SourceVariables),
    /// Editor command forwarded by the live source
    Command(SourceCommand),
    /// Scope command issued by the host UI
    Scope(ScopeCommand),
    Filter(FilterConfig),
    Local(LocalConfig),
    Clustering(ClusteringConfig),
    /// Simulation state reported by the renderer
    Positions(Vec<PositionReport>),
}

impl GraphEvent {
    /// Decode one enveloped message.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Command sent by the editor side of the live source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCommand {
    pub command_name: String,
    #[serde(default)]
    pub id: Option<String>,
    /// `add`, `remove` or `replace` for `change-local-graph`
    #[serde(default)]
    pub manipulation: Option<String>,
}

impl SourceCommand {
    /// The scope change this command asks for, if any.
    ///
    /// `zoom` and other view-only commands yield `None`.
    pub fn scope_command(&self) -> Option<ScopeCommand> {
        let id = self.id.clone().filter(|id| !id.is_empty())?;
        match self.command_name.as_str() {
            "local" => Some(ScopeCommand::Replace(id)),
            "follow" => Some(ScopeCommand::Follow(id)),
            "change-local-graph" => match self.manipulation.as_deref() {
                Some("add") => Some(ScopeCommand::Add(id)),
                Some("remove") => Some(ScopeCommand::Remove(id)),
                Some("replace") | None => Some(ScopeCommand::Replace(id)),
                Some(other) => {
                    tracing::debug!(manipulation = other, "Unknown local graph manipulation");
                    None
                }
            },
            _ => None,
        }
    }
}

/// Simulation state of one node as reported by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub id: String,
    #[serde(flatten)]
    pub state: SimState,
}
