//! formgraph: formula dependency engine for tree-shaped forms
//!
//! Layers, innermost first:
//! - [`domain`]: field tree, selectors, formulas and the dependency graph
//! - [`application`]: the [`application::Form`] service and document loading
//! - [`infrastructure`]: filesystem boundary and service wiring
//! - [`cli`]: argument parsing and command dispatch

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
