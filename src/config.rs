//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/formgraph/formgraph.toml`
//! 3. Local config: a file given with `--config`
//! 4. Environment variables: `FORMGRAPH_*` prefix

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;
use crate::domain::{CacheRefresh, GraphOptions};

/// Unified configuration for formgraph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Maintain graph edges on every tree mutation
    pub update_graph: bool,
    /// Recompute dependents right after each mutation
    pub recompute_eagerly: bool,
    /// Partial recompute does not descend past user-overridden formulas
    pub stop_at_override: bool,
    /// How selector caches are refreshed before evaluation
    pub cache_refresh: CacheRefresh,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_graph: true,
            recompute_eagerly: true,
            stop_at_override: true,
            cache_refresh: CacheRefresh::Incremental,
        }
    }
}

/// Raw settings for intermediate parsing (`None` means "not specified").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub update_graph: Option<bool>,
    pub recompute_eagerly: Option<bool>,
    pub stop_at_override: Option<bool>,
    pub cache_refresh: Option<CacheRefresh>,
}

/// Get the XDG config directory for formgraph.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "formgraph").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("formgraph.toml"))
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Overlay wins where it specifies a value.
    pub fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            update_graph: overlay.update_graph.unwrap_or(self.update_graph),
            recompute_eagerly: overlay.recompute_eagerly.unwrap_or(self.recompute_eagerly),
            stop_at_override: overlay.stop_at_override.unwrap_or(self.stop_at_override),
            cache_refresh: overlay.cache_refresh.unwrap_or(self.cache_refresh),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local` - Optional config file given on the command line; it must exist
    pub fn load(local: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                current = current.merge_with(&raw);
            }
        }

        if let Some(local_path) = local {
            let raw = load_raw_settings(local_path)?;
            current = current.merge_with(&raw);
        }

        Self::apply_env_overrides(current)
    }

    /// Apply FORMGRAPH_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("FORMGRAPH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_bool("update_graph") {
            settings.update_graph = val;
        }
        if let Ok(val) = config.get_bool("recompute_eagerly") {
            settings.recompute_eagerly = val;
        }
        if let Ok(val) = config.get_bool("stop_at_override") {
            settings.stop_at_override = val;
        }
        match config.get::<CacheRefresh>("cache_refresh") {
            Ok(val) => settings.cache_refresh = val,
            Err(ConfigError::NotFound(_)) => {}
            Err(e) => return Err(config_err(e)),
        }

        Ok(settings)
    }

    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            update_graph: self.update_graph,
            recompute_eagerly: self.recompute_eagerly,
            stop_at_override: self.stop_at_override,
            cache_refresh: self.cache_refresh,
        }
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# formgraph configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/formgraph/formgraph.toml
#   Local:  file passed with --config
#   Env:    FORMGRAPH_* environment variables (e.g. FORMGRAPH_CACHE_REFRESH=from_scratch)

# Maintain dependency edges on every tree mutation
# update_graph = true

# Recompute dependents right after each mutation
# recompute_eagerly = true

# Do not propagate a recompute past a field the user has overridden
# stop_at_override = true

# "incremental" drops dead matches only, "from_scratch" re-runs every selector
# cache_refresh = "incremental"
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_defaults_when_created_then_eager_incremental() {
        let settings = Settings::default();
        assert!(settings.update_graph);
        assert!(settings.recompute_eagerly);
        assert!(settings.stop_at_override);
        assert_eq!(settings.cache_refresh, CacheRefresh::Incremental);
    }

    #[test]
    fn given_partial_overlay_when_merged_then_only_specified_fields_change() {
        let overlay = RawSettings {
            recompute_eagerly: Some(false),
            cache_refresh: Some(CacheRefresh::FromScratch),
            ..Default::default()
        };
        let merged = Settings::default().merge_with(&overlay);
        assert!(merged.update_graph);
        assert!(!merged.recompute_eagerly);
        assert_eq!(merged.cache_refresh, CacheRefresh::FromScratch);
    }

    #[test]
    fn given_settings_when_to_toml_then_parses_back() {
        let settings = Settings {
            cache_refresh: CacheRefresh::FromScratch,
            ..Default::default()
        };
        let text = settings.to_toml().unwrap();
        assert!(text.contains("cache_refresh = \"from_scratch\""));
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn given_template_when_parsed_then_yields_defaults() {
        let raw: RawSettings = toml::from_str(&Settings::template()).unwrap();
        assert_eq!(Settings::default().merge_with(&raw), Settings::default());
    }
}
