//! Integration tests for layered Settings loading.
//!
//! These tests pass a local config file explicitly; a global config on the
//! machine running them only affects fields the tests do not assert on.

use std::fs;

use tempfile::TempDir;

use formgraph::application::ApplicationError;
use formgraph::config::Settings;
use formgraph::domain::CacheRefresh;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("formgraph.toml");
    fs::write(&path, content).expect("write config");
    path
}

#[test]
fn given_local_config_when_load_then_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
recompute_eagerly = false
cache_refresh = "from_scratch"
"#,
    );

    let settings = Settings::load(Some(&path)).expect("load settings");

    assert!(!settings.recompute_eagerly);
    assert_eq!(settings.cache_refresh, CacheRefresh::FromScratch);
    let options = settings.graph_options();
    assert!(!options.recompute_eagerly);
    assert_eq!(options.cache_refresh, CacheRefresh::FromScratch);
}

#[test]
fn given_missing_local_config_when_load_then_config_error() {
    let dir = TempDir::new().unwrap();
    let result = Settings::load(Some(&dir.path().join("absent.toml")));
    assert!(matches!(result, Err(ApplicationError::Config { .. })));
}

#[test]
fn given_malformed_local_config_when_load_then_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "cache_refresh = \"sometimes\"\n");
    let result = Settings::load(Some(&path));
    assert!(matches!(result, Err(ApplicationError::Config { .. })));
}

#[test]
fn given_env_override_when_load_then_env_wins_over_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "update_graph = true\n");

    std::env::set_var("FORMGRAPH_UPDATE_GRAPH", "false");
    let result = Settings::load(Some(&path));
    std::env::remove_var("FORMGRAPH_UPDATE_GRAPH");

    assert!(!result.expect("load settings").update_graph);
}
