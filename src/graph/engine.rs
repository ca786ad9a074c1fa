//! View engine: orchestrates the derived-view pipeline.
//!
//! ```text
//! raw update ──► GraphStore::merge ──► filter ──┬──► clustering
//!                                               └──► scope (when focused)
//! ```
//!
//! Each input only recomputes the stages downstream of it:
//!
//! | input                     | merge | filter | cluster | scope |
//! |---------------------------|:-----:|:------:|:-------:|:-----:|
//! | graph update              |   x   |   x    |    x    |   x   |
//! | filter / source variables |       |   x    |    x    |   x   |
//! | clustering settings       |       |        |    x    |       |
//! | scope command / local cfg |       |        |         |   x   |
//! | position report           |       |        |         |       |
//!
//! The engine is owned by a single call site; hosts that receive events
//! concurrently serialize them through [`crate::events::ViewSession`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;

use super::clustering::{louvain, ClusterAssignment, ClusterGraph, ClusteringConfig};
use super::filter::{apply_with, FilterConfig, FilteredGraph};
use super::ingest::RawGraphUpdate;
use super::models::{CoordinateTable, SimState, Snapshot, SourceVariables};
use super::scope::{expand, refresh, LocalConfig, Scope, ScopeCommand, ScopedGraph, Transition};
use super::store::{GraphStore, MergeStats};
use crate::events::GraphEvent;

// ============================================================================
// Settings and output
// ============================================================================

/// Everything that shapes the derived views besides the graph itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub filter: FilterConfig,
    pub local: LocalConfig,
    pub clustering: ClusteringConfig,
    pub variables: SourceVariables,
}

/// Which stages an input recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stages {
    pub merge: bool,
    pub filter: bool,
    pub cluster: bool,
    pub scope: bool,
}

impl Stages {
    pub const NONE: Stages = Stages {
        merge: false,
        filter: false,
        cluster: false,
        scope: false,
    };

    /// Whether the published view changed.
    pub fn any(&self) -> bool {
        self.merge || self.filter || self.cluster || self.scope
    }
}

impl std::ops::BitOrAssign for Stages {
    fn bitor_assign(&mut self, rhs: Stages) {
        self.merge |= rhs.merge;
        self.filter |= rhs.filter;
        self.cluster |= rhs.cluster;
        self.scope |= rhs.scope;
    }
}

/// The views handed to the renderer after a recompute.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedView {
    /// Number of graph updates merged so far
    pub updates: u64,
    pub graph: FilteredGraph,
    /// Simulation state known for nodes of the filtered graph
    pub positions: CoordinateTable,
    /// Present while a local view is open
    pub local: Option<ScopedGraph>,
    pub clusters: ClusterAssignment,
    pub computed_at: DateTime<Utc>,
}

/// Receiver of recomputed views (the renderer boundary).
pub trait ViewSink: Send {
    fn publish(&mut self, view: &DerivedView) -> Result<()>;
}

/// Writes every view as one JSON line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ViewSink for JsonLinesSink<W> {
    fn publish(&mut self, view: &DerivedView) -> Result<()> {
        serde_json::to_writer(&mut self.writer, view)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Canonical store plus the current filtered, scoped and clustered views.
pub struct ViewEngine {
    settings: ViewSettings,
    store: GraphStore,
    scope: Scope,
    filtered: FilteredGraph,
    scoped: Option<ScopedGraph>,
    clusters: ClusterAssignment,
}

impl ViewEngine {
    pub fn new(settings: ViewSettings) -> Self {
        Self {
            settings,
            store: GraphStore::new(),
            scope: Scope::new(),
            filtered: FilteredGraph::default(),
            scoped: None,
            clusters: ClusterAssignment::default(),
        }
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.store.snapshot()
    }

    pub fn filtered(&self) -> &FilteredGraph {
        &self.filtered
    }

    pub fn scoped(&self) -> Option<&ScopedGraph> {
        self.scoped.as_ref()
    }

    pub fn clusters(&self) -> &ClusterAssignment {
        &self.clusters
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Dispatch one event to the matching operation.
    pub fn handle(&mut self, event: GraphEvent) -> Stages {
        match event {
            GraphEvent::GraphData(update) => self.apply_update(&update).1,
            GraphEvent::Variables(variables) => self.set_variables(variables),
            GraphEvent::Command(command) => match command.scope_command() {
                Some(command) => self.command(command),
                None => {
                    tracing::debug!(command = %command.command_name, "Command has no effect on derived views");
                    Stages::NONE
                }
            },
            GraphEvent::Scope(command) => self.command(command),
            GraphEvent::Filter(filter) => self.set_filter(filter),
            GraphEvent::Local(local) => self.set_local(local),
            GraphEvent::Clustering(clustering) => self.set_clustering(clustering),
            GraphEvent::Positions(reports) => {
                self.record_positions(reports.iter().map(|r| (r.id.as_str(), r.state)));
                Stages::NONE
            }
        }
    }

    /// Merge a raw update and recompute every downstream view.
    pub fn apply_update(&mut self, update: &RawGraphUpdate) -> (MergeStats, Stages) {
        let stats = self.store.merge(update);
        if stats.ingest.dropped() > 0 {
            tracing::warn!(
                nodes_dropped = stats.ingest.nodes_dropped,
                links_dropped = stats.ingest.links_dropped,
                "Dropped malformed records from graph update"
            );
        }
        let mut stages = self.upstream_changed();
        stages.merge = true;
        (stats, stages)
    }

    pub fn set_filter(&mut self, filter: FilterConfig) -> Stages {
        if self.settings.filter == filter {
            return Stages::NONE;
        }
        self.settings.filter = filter;
        self.upstream_changed()
    }

    pub fn set_variables(&mut self, variables: SourceVariables) -> Stages {
        if self.settings.variables == variables {
            return Stages::NONE;
        }
        self.settings.variables = variables;
        self.upstream_changed()
    }

    pub fn set_clustering(&mut self, clustering: ClusteringConfig) -> Stages {
        if self.settings.clustering == clustering {
            return Stages::NONE;
        }
        self.settings.clustering = clustering;
        self.recluster();
        Stages {
            cluster: true,
            ..Stages::NONE
        }
    }

    /// Change depth or follow behaviour. A depth change rebuilds an open local
    /// view, keeping coordinates of nodes that stay.
    pub fn set_local(&mut self, local: LocalConfig) -> Stages {
        if self.settings.local == local {
            return Stages::NONE;
        }
        let depth_changed = self.settings.local.depth != local.depth;
        self.settings.local = local;
        if depth_changed && self.scoped.is_some() {
            self.rescope();
            return Stages {
                scope: true,
                ..Stages::NONE
            };
        }
        Stages::NONE
    }

    /// Apply a scope command and rebuild the local view accordingly.
    pub fn command(&mut self, command: ScopeCommand) -> Stages {
        let transition = self
            .scope
            .apply(command, self.settings.local.behavior, &self.filtered);
        let depth = self.settings.local.depth;
        match transition {
            Transition::Unchanged => return Stages::NONE,
            Transition::Cleared => self.scoped = None,
            Transition::Fresh => {
                self.scoped = Some(expand(
                    &self.filtered,
                    &self.scope.focal(),
                    self.scope.excluded(),
                    depth,
                    None,
                ));
            }
            Transition::Extend => {
                self.scoped = Some(expand(
                    &self.filtered,
                    &self.scope.focal(),
                    self.scope.excluded(),
                    depth,
                    self.scoped.as_ref(),
                ));
            }
            Transition::Prune => self.rescope(),
        }
        tracing::debug!(?transition, focal = self.scope.focal().len(), "Scope changed");
        Stages {
            scope: true,
            ..Stages::NONE
        }
    }

    /// Store simulation state reported by the renderer.
    pub fn record_positions<'a>(&mut self, positions: impl IntoIterator<Item = (&'a str, SimState)>) {
        let positions: Vec<(&str, SimState)> = positions.into_iter().collect();
        if let Some(scoped) = self.scoped.as_mut() {
            for (id, state) in &positions {
                if scoped.contains(id) {
                    scoped.positions.set(*id, *state);
                }
            }
        }
        self.store.record_positions(positions);
    }

    /// `id` and its neighbours in the filtered graph.
    pub fn neighborhood(&self, id: &str) -> BTreeSet<&str> {
        self.filtered.neighborhood(id)
    }

    /// Ids of nodes linking to `id` in the canonical graph.
    pub fn backlinks(&self, id: &str) -> Vec<&str> {
        self.store.snapshot().backlinks(id)
    }

    /// Assemble the current views for publishing.
    pub fn view(&self) -> DerivedView {
        let mut positions = CoordinateTable::new();
        for id in self.filtered.node_ids() {
            if let Some(state) = self.store.coordinates().get(id) {
                positions.set(id, state);
            }
        }
        DerivedView {
            updates: self.store.update_count(),
            graph: self.filtered.clone(),
            positions,
            local: self.scoped.clone(),
            clusters: self.clusters.clone(),
            computed_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    fn upstream_changed(&mut self) -> Stages {
        self.filtered = apply_with(
            self.store.snapshot(),
            &self.settings.filter,
            &self.settings.variables,
        );
        self.recluster();
        let scope = !self.scope.is_empty();
        if scope {
            self.rescope();
        }
        Stages {
            merge: false,
            filter: true,
            cluster: true,
            scope,
        }
    }

    fn recluster(&mut self) {
        self.clusters = if self.settings.clustering.enabled() {
            let graph = ClusterGraph::build(&self.filtered.nodes, &self.filtered.links);
            louvain(&graph, self.settings.clustering.resolution)
        } else {
            ClusterAssignment::singletons(self.filtered.node_ids())
        };
    }

    fn rescope(&mut self) {
        let focal = self.scope.focal();
        let depth = self.settings.local.depth;
        let scoped = match &self.scoped {
            Some(previous) => refresh(&self.filtered, &focal, self.scope.excluded(), depth, previous),
            None => expand(&self.filtered, &focal, self.scope.excluded(), depth, None),
        };
        self.scoped = Some(scoped);
    }
}

impl Default for ViewEngine {
    fn default() -> Self {
        Self::new(ViewSettings::default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::clustering::ClusteringMode;
    use crate::graph::filter::OrphanMode;
    use crate::graph::mock::RecordingSink;
    use crate::test_helpers::{raw_link, raw_note, raw_update};

    fn chain_update() -> RawGraphUpdate {
        raw_update(
            vec![raw_note("A"), raw_note("B"), raw_note("C"), raw_note("D")],
            vec![
                raw_link("A", "B", "cite"),
                raw_link("A", "C", "cite"),
                raw_link("C", "D", "cite"),
            ],
        )
    }

    fn engine() -> ViewEngine {
        let mut engine = ViewEngine::default();
        engine.apply_update(&chain_update());
        engine
    }

    fn scoped_ids(engine: &ViewEngine) -> Vec<&str> {
        engine.scoped().map(|s| s.node_ids().collect()).unwrap_or_default()
    }

    #[test]
    fn test_update_recomputes_everything() {
        let mut engine = ViewEngine::default();
        let (stats, stages) = engine.apply_update(&chain_update());
        assert_eq!(stats.added, 4);
        assert!(stages.merge && stages.filter && stages.cluster);
        assert!(!stages.scope);
        assert_eq!(engine.filtered().nodes.len(), 4);
        assert_eq!(engine.clusters().communities.len(), 4);
    }

    #[test]
    fn test_clustering_change_only_reclusters() {
        let mut engine = engine();
        let stages = engine.set_clustering(ClusteringConfig {
            mode: ClusteringMode::Off,
            ..Default::default()
        });
        assert_eq!(
            stages,
            Stages {
                cluster: true,
                ..Stages::NONE
            }
        );
        assert_eq!(engine.clusters().community_count, 4);

        // same settings again: nothing to do
        let stages = engine.set_clustering(ClusteringConfig {
            mode: ClusteringMode::Off,
            ..Default::default()
        });
        assert!(!stages.any());
    }

    #[test]
    fn test_filter_change_refreshes_scope() {
        let mut engine = engine();
        engine.command(ScopeCommand::Replace("A".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "C"]);
        engine.record_positions([("C", SimState::at(4.0, 2.0))]);

        let stages = engine.set_filter(FilterConfig {
            dirs_blocklist: vec!["/B.org".into()],
            ..FilterConfig::permissive()
        });
        assert!(stages.filter && stages.cluster && stages.scope);
        assert_eq!(scoped_ids(&engine), vec!["A", "C"]);
        let scoped = engine.scoped().unwrap();
        assert_eq!(scoped.positions.get("C"), Some(SimState::at(4.0, 2.0)));
        assert_eq!(scoped.positions.get("A"), Some(SimState::ORIGIN));
    }

    #[test]
    fn test_scope_command_only_rescopes() {
        let mut engine = engine();
        let stages = engine.command(ScopeCommand::Replace("A".into()));
        assert_eq!(
            stages,
            Stages {
                scope: true,
                ..Stages::NONE
            }
        );
        let stages = engine.command(ScopeCommand::Add("D".into()));
        assert!(stages.scope);
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "C", "D"]);

        engine.command(ScopeCommand::Clear);
        assert!(engine.scoped().is_none());
    }

    #[test]
    fn test_remove_drops_nodes_reachable_only_through_it() {
        let mut engine = engine();
        engine.set_local(LocalConfig {
            depth: 2,
            ..Default::default()
        });
        engine.command(ScopeCommand::Replace("A".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "C", "D"]);

        engine.command(ScopeCommand::Remove("C".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B"]);
        let scoped = engine.scoped().unwrap();
        assert_eq!(scoped.links.len(), 1);
    }

    #[test]
    fn test_remove_with_several_focal_ids_keeps_coordinates() {
        let mut engine = engine();
        engine.command(ScopeCommand::Replace("A".into()));
        engine.command(ScopeCommand::Add("B".into()));
        engine.record_positions([("B", SimState::at(7.0, 1.0))]);

        // C is the only way to D
        engine.command(ScopeCommand::Add("D".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "C", "D"]);
        engine.command(ScopeCommand::Remove("C".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "D"]);
        engine.command(ScopeCommand::Remove("D".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B"]);

        engine.command(ScopeCommand::Add("C".into()));
        engine.command(ScopeCommand::Remove("C".into()));
        let scoped = engine.scoped().unwrap();
        assert_eq!(scoped_ids(&engine), vec!["A", "B"]);
        assert_eq!(scoped.positions.get("B"), Some(SimState::at(7.0, 1.0)));
    }

    #[test]
    fn test_local_depth_change_rebuilds_open_view() {
        let mut engine = engine();
        assert!(!engine
            .set_local(LocalConfig {
                depth: 2,
                ..Default::default()
            })
            .any());

        engine.command(ScopeCommand::Replace("B".into()));
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "C"]);
        let stages = engine.set_local(LocalConfig {
            depth: 3,
            ..Default::default()
        });
        assert!(stages.scope);
        assert_eq!(scoped_ids(&engine), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_positions_do_not_recompute() {
        let mut engine = engine();
        engine.command(ScopeCommand::Replace("A".into()));
        let before = engine.filtered().clone();
        engine.record_positions([("A", SimState::at(1.0, 1.0)), ("D", SimState::at(2.0, 2.0))]);
        assert_eq!(engine.filtered(), &before);
        let scoped = engine.scoped().unwrap();
        assert_eq!(scoped.positions.get("A"), Some(SimState::at(1.0, 1.0)));
        assert!(!scoped.positions.contains("D"));

        let view = engine.view();
        assert_eq!(view.positions.get("D"), Some(SimState::at(2.0, 2.0)));
    }

    #[test]
    fn test_update_removing_focal_node_empties_local_view() {
        let mut engine = engine();
        engine.command(ScopeCommand::Replace("C".into()));
        engine.apply_update(&raw_update(vec![raw_note("A"), raw_note("B")], vec![raw_link("A", "B", "cite")]));
        let scoped = engine.scoped().unwrap();
        assert!(scoped.nodes.is_empty());
        assert!(scoped.links.is_empty());
    }

    #[test]
    fn test_orphan_setting_hides_nodes_from_every_view() {
        let mut engine = ViewEngine::default();
        engine.apply_update(&raw_update(
            vec![raw_note("a"), raw_note("b"), raw_note("lonely")],
            vec![raw_link("a", "b", "id")],
        ));
        engine.set_filter(FilterConfig {
            orphans: OrphanMode::DropIsolated,
            ..FilterConfig::default()
        });
        assert!(!engine.filtered().contains("lonely"));
        assert!(engine.clusters().community_of("lonely").is_none());
        assert!(engine.filtered().hidden.contains("lonely"));
    }

    #[test]
    fn test_neighborhood_and_backlinks() {
        let engine = engine();
        let hood: Vec<&str> = engine.neighborhood("C").into_iter().collect();
        assert_eq!(hood, vec!["A", "C", "D"]);
        assert_eq!(engine.backlinks("C"), vec!["A"]);
    }

    #[test]
    fn test_view_published_to_sink() {
        let engine = engine();
        let mut sink = RecordingSink::new();
        sink.publish(&engine.view()).unwrap();
        let views = sink.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].updates, 1);
        assert_eq!(views[0].graph.nodes.len(), 4);
    }

    #[test]
    fn test_json_lines_sink() {
        let engine = engine();
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&engine.view()).unwrap();
        sink.publish(&engine.view()).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["graph"]["nodes"].as_array().unwrap().len(), 4);
        assert!(value["local"].is_null());
    }
}
