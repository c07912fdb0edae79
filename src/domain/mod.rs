//! Domain layer: form tree, selectors and the formula dependency engine
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod document;
pub mod error;
pub mod formula;
pub mod graph;
pub mod path;
pub mod registry;
pub mod schedule;
pub mod selector;
pub mod tree;
pub mod value;

pub use document::{FieldDef, FormDocument};
pub use error::{DomainError, DomainResult};
pub use formula::{Argument, Formula, Operator};
pub use graph::{FormulaGraph, FormulaNode, GraphOptions, RecomputeReport};
pub use path::{NodePath, PathToken};
pub use registry::{CacheRefresh, InstanceId, MatchDiff, SelectorInstance, SelectorRegistry};
pub use schedule::{Schedule, ScheduleFlag, ScheduleGuard, Scheduled};
pub use selector::{PatternToken, Selector, WILDCARD};
pub use tree::{FieldNode, FieldTree, NodeId, NodeKind, TreeNodeConvert, TEMPLATE_INDEX};
pub use value::{Number, Value};
