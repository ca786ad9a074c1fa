//! Notegraph Engine
//!
//! Synchronization core for a live knowledge-graph viewer:
//! - Canonical note graph merged from a live source, identity preserved
//! - Synthesized outline links and ghost nodes for dangling references
//! - Filtered, locally scoped and clustered views recomputed per event
//! - Channel-fed view sessions publishing to a renderer sink

pub mod events;
pub mod graph;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::Path;

use graph::clustering::{ClusteringConfig, ClusteringMode};
use graph::engine::ViewSettings;
use graph::filter::FilterConfig;
use graph::models::SourceVariables;
use graph::scope::{LocalBehavior, LocalConfig};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub filter: FilterConfig,
    pub local: LocalConfig,
    pub clustering: ClusteringConfig,
    /// Source variables to assume until the live source reports its own
    pub variables: SourceVariables,
    pub session: SessionYamlConfig,
}

/// Session configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionYamlConfig {
    /// Capacity of the event channel feeding the engine
    pub channel_capacity: usize,
}

impl Default for SessionYamlConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// Deserialize an option value, falling back to its default when the value
/// is not one the option knows.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_option(value))
}

fn parse_option<T: DeserializeOwned + Default>(value: serde_json::Value) -> T {
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(%value, error = %e, "Unknown option value, using default");
            T::default()
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub view: ViewSettings,
    pub channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "notegraph.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);

        // 2. Apply env var overrides
        let mut view = ViewSettings {
            filter: yaml.filter,
            local: yaml.local,
            clustering: yaml.clustering,
            variables: yaml.variables,
        };
        if let Ok(dir) = std::env::var("NOTEGRAPH_DAILY_DIR") {
            view.variables.daily_dir = Some(dir).filter(|d| !d.is_empty());
        }
        if let Some(depth) = std::env::var("NOTEGRAPH_SCOPE_DEPTH")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            view.local.depth = depth;
        }
        if let Ok(mode) = std::env::var("NOTEGRAPH_CLUSTERING") {
            view.clustering.mode = parse_option::<ClusteringMode>(mode.into());
        }
        if let Ok(behavior) = std::env::var("NOTEGRAPH_LOCAL_SAME") {
            view.local.behavior = parse_option::<LocalBehavior>(behavior.into());
        }

        Ok(Self {
            view,
            channel_capacity: std::env::var("NOTEGRAPH_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|c| *c > 0)
                .unwrap_or(yaml.session.channel_capacity.max(1)),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("notegraph.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use crate::graph::filter::{LinkStructure, OrphanMode};
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
filter:
  tags_blocklist: [private]
  exclude_dailies: true
  link_structure: parent-only
  orphans: drop-unless-parent-linked

local:
  depth: 2
  behavior: replace

clustering:
  mode: community
  resolution: 1.5

variables:
  daily_dir: /notes/daily

session:
  channel_capacity: 16
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.filter.tags_blocklist, vec!["private"]);
        assert!(config.filter.exclude_dailies);
        assert_eq!(config.filter.link_structure, LinkStructure::ParentOnly);
        assert_eq!(config.filter.orphans, OrphanMode::DropUnlessParentLinked);
        assert_eq!(config.local.depth, 2);
        assert_eq!(config.local.behavior, LocalBehavior::Replace);
        assert_eq!(config.clustering.resolution, 1.5);
        assert_eq!(config.variables.daily_dir.as_deref(), Some("/notes/daily"));
        assert_eq!(config.session.channel_capacity, 16);
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.local.depth, 1);
        assert_eq!(config.local.behavior, LocalBehavior::Add);
        assert!(config.clustering.enabled());
        assert!(config.filter.exclude_bad);
        assert_eq!(config.filter.orphans, OrphanMode::KeepAll);
        assert!(config.variables.daily_dir.is_none());
        assert_eq!(config.session.channel_capacity, 64);
    }

    #[test]
    fn test_unknown_options_ignored() {
        let yaml = r#"
theme: dark
filter:
  orphans: sometimes
  colour: red
local:
  behavior: 42
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.filter.orphans, OrphanMode::KeepAll);
        assert_eq!(config.local.behavior, LocalBehavior::Add);
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "NOTEGRAPH_DAILY_DIR",
                "NOTEGRAPH_SCOPE_DEPTH",
                "NOTEGRAPH_CLUSTERING",
                "NOTEGRAPH_LOCAL_SAME",
                "NOTEGRAPH_CHANNEL_CAPACITY",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
local:
  depth: 2
clustering:
  mode: off
variables:
  daily_dir: /yaml/daily
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("notegraph.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.view.local.depth, 2);
        assert!(!config.view.clustering.enabled());
        assert_eq!(config.view.variables.daily_dir.as_deref(), Some("/yaml/daily"));
        assert_eq!(config.channel_capacity, 64);

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("NOTEGRAPH_SCOPE_DEPTH", "4");
        std::env::set_var("NOTEGRAPH_CLUSTERING", "community");
        std::env::set_var("NOTEGRAPH_DAILY_DIR", "/env/daily");
        std::env::set_var("NOTEGRAPH_LOCAL_SAME", "replace");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.view.local.depth, 4);
        assert!(config.view.clustering.enabled());
        assert_eq!(config.view.variables.daily_dir.as_deref(), Some("/env/daily"));
        assert_eq!(config.view.local.behavior, LocalBehavior::Replace);

        // Unparsable env values keep the YAML value or fall back to the default
        std::env::set_var("NOTEGRAPH_SCOPE_DEPTH", "deep");
        std::env::set_var("NOTEGRAPH_LOCAL_SAME", "merge");
        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.view.local.depth, 2);
        assert_eq!(config.view.local.behavior, LocalBehavior::Add);

        clear_env();

        // --- Phase 3: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-notegraph-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.view, ViewSettings::default());

        // --- Phase 4: Broken YAML → defaults ---
        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "filter: [not, a, map").unwrap();
        let config = Config::from_yaml_and_env(Some(&broken)).unwrap();
        assert_eq!(config.view, ViewSettings::default());
    }

    #[test]
    fn test_clustering_mode_default_is_community() {
        assert_eq!(ClusteringMode::default(), ClusteringMode::Community);
        assert_eq!(
            parse_option::<ClusteringMode>(serde_json::Value::from("off")),
            ClusteringMode::Off
        );
    }
}
