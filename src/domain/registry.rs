//! Selector registry: the explicit context shared by all formulas of one form.
//!
//! Holds compiled selectors by source string and selector instances keyed by
//! (selector string, resolution base path). Formulas on sibling nodes that use
//! the same relative selector, or any formulas using the same absolute
//! selector, share one instance and therefore one match cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use generational_arena::{Arena, Index};
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};

use crate::domain::error::DomainResult;
use crate::domain::path::NodePath;
use crate::domain::selector::Selector;
use crate::domain::tree::{FieldTree, NodeId};

pub type InstanceId = Index;

/// How a match cache is brought up to date before it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRefresh {
    /// Re-run the forward match against the live tree
    FromScratch,
    /// Drop entries that died or stopped matching; additions arrive via the graph
    #[default]
    Incremental,
}

/// A selector bound to one resolution base.
#[derive(Debug, Clone)]
pub struct SelectorInstance {
    selector: Arc<Selector>,
    base: NodeId,
    base_path: NodePath,
    matches: HashSet<NodeId>,
    consumers: HashSet<NodeId>,
}

impl SelectorInstance {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn base(&self) -> NodeId {
        self.base
    }

    pub fn base_path(&self) -> &NodePath {
        &self.base_path
    }

    /// Cached matches; only fresh right after a refresh.
    pub fn matches(&self) -> &HashSet<NodeId> {
        &self.matches
    }

    /// Formula nodes whose formulas reference this instance.
    pub fn consumers(&self) -> &HashSet<NodeId> {
        &self.consumers
    }

    /// Cached matches in match order (shallow first, then by path).
    pub fn ordered_matches(&self, tree: &FieldTree) -> Vec<NodeId> {
        let mut keyed: Vec<(NodePath, NodeId)> = self
            .matches
            .iter()
            .filter(|&&m| tree.contains(m))
            .map(|&m| (tree.path(m), m))
            .collect();
        keyed.sort_by(|a, b| a.0.match_order(&b.0));
        keyed.into_iter().map(|(_, m)| m).collect()
    }

    pub fn reverse_match(&self, tree: &FieldTree, candidate: NodeId) -> bool {
        self.selector.reverse_match(tree, &self.base_path, candidate)
    }

    pub(crate) fn insert_match(&mut self, node: NodeId) -> bool {
        self.matches.insert(node)
    }

    pub(crate) fn remove_match(&mut self, node: NodeId) -> bool {
        self.matches.remove(&node)
    }
}

/// Change of a match cache produced by a refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl MatchDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SelectorRegistry {
    selectors: HashMap<String, Arc<Selector>>,
    instances: Arena<SelectorInstance>,
    keys: HashMap<(String, NodePath), InstanceId>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile (or fetch the cached compilation of) a selector string.
    pub fn compile(&mut self, source: &str) -> DomainResult<Arc<Selector>> {
        if let Some(selector) = self.selectors.get(source) {
            return Ok(selector.clone());
        }
        let selector = Arc::new(Selector::compile(source)?);
        self.selectors.insert(source.to_string(), selector.clone());
        Ok(selector)
    }

    /// Number of live selector instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.len() == 0
    }

    pub fn get(&self, id: InstanceId) -> Option<&SelectorInstance> {
        self.instances.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut SelectorInstance> {
        self.instances.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &SelectorInstance)> {
        self.instances.iter()
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|(id, _)| id).collect()
    }

    pub fn lookup(&self, source: &str, base_path: &NodePath) -> Option<InstanceId> {
        self.keys.get(&(source.to_string(), base_path.clone())).copied()
    }

    /// Register `consumer` as a user of `source` anchored at `anchor`.
    ///
    /// Returns the instance and whether it was newly created. A new instance
    /// starts with an empty cache; the caller fills it.
    #[instrument(level = "trace", skip(self, tree))]
    pub fn acquire(
        &mut self,
        tree: &FieldTree,
        source: &str,
        anchor: NodeId,
        consumer: NodeId,
    ) -> DomainResult<(InstanceId, bool)> {
        let selector = self.compile(source)?;
        let base = selector.resolution_base(tree, anchor);
        let base_path = tree.path(base);
        let key = (source.to_string(), base_path.clone());
        if let Some(&id) = self.keys.get(&key) {
            if let Some(instance) = self.instances.get_mut(id) {
                instance.consumers.insert(consumer);
                return Ok((id, false));
            }
            warn!("registry key {:?} points at a dead instance", key);
            debug_assert!(false, "registry key points at a dead instance");
            self.keys.remove(&key);
        }
        let id = self.instances.insert(SelectorInstance {
            selector,
            base,
            base_path,
            matches: HashSet::new(),
            consumers: HashSet::from([consumer]),
        });
        self.keys.insert(key, id);
        trace!("registered selector instance {} ({:?})", source, id);
        Ok((id, true))
    }

    /// Drop `consumer` from an instance; the instance is unregistered and
    /// returned once nobody uses it.
    pub fn release(&mut self, id: InstanceId, consumer: NodeId) -> Option<SelectorInstance> {
        let Some(instance) = self.instances.get_mut(id) else {
            warn!("release of unknown selector instance {:?}", id);
            debug_assert!(false, "release of unknown selector instance");
            return None;
        };
        if !instance.consumers.remove(&consumer) {
            warn!(
                "{:?} released selector {} it never acquired",
                consumer,
                instance.selector.source()
            );
        }
        if !instance.consumers.is_empty() {
            return None;
        }
        let instance = self.instances.remove(id)?;
        self.keys
            .remove(&(instance.selector.source().to_string(), instance.base_path.clone()));
        trace!("unregistered selector instance {}", instance.selector.source());
        Some(instance)
    }

    /// Move every instance keyed by `old_path` to `new_path`.
    ///
    /// Returns the moved instances.
    #[instrument(level = "trace", skip(self))]
    pub fn rekey(&mut self, old_path: &NodePath, new_path: &NodePath) -> Vec<InstanceId> {
        if old_path == new_path {
            return Vec::new();
        }
        let stale: Vec<(String, NodePath)> = self
            .keys
            .keys()
            .filter(|(_, path)| path == old_path)
            .cloned()
            .collect();
        let mut moved = Vec::new();
        for key in stale {
            let new_key = (key.0.clone(), new_path.clone());
            if self.keys.contains_key(&new_key) {
                warn!("rekey collision for {} at {}", key.0, new_path);
                debug_assert!(false, "selector instance rekey collision");
                continue;
            }
            if let Some(id) = self.keys.remove(&key) {
                if let Some(instance) = self.instances.get_mut(id) {
                    instance.base_path = new_path.clone();
                }
                self.keys.insert(new_key, id);
                moved.push(id);
            }
        }
        moved
    }

    /// Instances whose pattern matches `candidate`. Linear in the number of
    /// registered instances.
    pub fn reverse_match(&self, tree: &FieldTree, candidate: NodeId) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|(_, instance)| instance.reverse_match(tree, candidate))
            .map(|(id, _)| id)
            .collect()
    }

    /// What the cache of `id` should contain, without touching it.
    pub fn fresh_matches(&self, tree: &FieldTree, id: InstanceId, mode: CacheRefresh) -> Option<HashSet<NodeId>> {
        let instance = self.instances.get(id)?;
        Some(match mode {
            CacheRefresh::FromScratch => instance
                .selector
                .forward_match(tree, instance.base)
                .into_iter()
                .collect(),
            CacheRefresh::Incremental => instance
                .matches
                .iter()
                .copied()
                .filter(|&m| instance.reverse_match(tree, m))
                .collect(),
        })
    }

    /// Difference between the cache of `id` and `fresh`.
    pub fn diff(&self, id: InstanceId, fresh: &HashSet<NodeId>) -> MatchDiff {
        let Some(instance) = self.instances.get(id) else {
            return MatchDiff::default();
        };
        MatchDiff {
            added: fresh.difference(&instance.matches).copied().collect(),
            removed: instance.matches.difference(fresh).copied().collect(),
        }
    }

    /// Bring one match cache up to date.
    pub fn refresh(&mut self, tree: &FieldTree, id: InstanceId, mode: CacheRefresh) -> MatchDiff {
        let Some(fresh) = self.fresh_matches(tree, id, mode) else {
            return MatchDiff::default();
        };
        let diff = self.diff(id, &fresh);
        if let Some(instance) = self.instances.get_mut(id) {
            instance.matches = fresh;
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path::PathToken;
    use crate::domain::tree::NodeKind;

    fn tree_with_group() -> (FieldTree, NodeId, NodeId, NodeId) {
        let mut tree = FieldTree::new();
        let root = tree.root();
        let group = tree.insert(root, PathToken::id("g"), NodeKind::Group).unwrap();
        let a = tree.insert(group, PathToken::id("a"), NodeKind::Field).unwrap();
        let b = tree.insert(group, PathToken::id("b"), NodeKind::Field).unwrap();
        (tree, group, a, b)
    }

    #[test]
    fn given_siblings_with_same_relative_selector_when_acquire_then_shared() {
        let (tree, _, a, b) = tree_with_group();
        let mut registry = SelectorRegistry::new();
        let (first, created) = registry.acquire(&tree, "./c", a, a).unwrap();
        assert!(created);
        let (second, created) = registry.acquire(&tree, "./c", b, b).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(first).unwrap().consumers().len(), 2);
    }

    #[test]
    fn given_last_consumer_when_release_then_unregistered() {
        let (tree, _, a, b) = tree_with_group();
        let mut registry = SelectorRegistry::new();
        let (id, _) = registry.acquire(&tree, "/g.a", b, b).unwrap();
        registry.acquire(&tree, "/g.a", a, a).unwrap();
        assert!(registry.release(id, a).is_none());
        assert!(registry.release(id, b).is_some());
        assert!(registry.is_empty());
        assert!(registry.lookup("/g.a", &NodePath::root()).is_none());
    }

    #[test]
    fn given_from_scratch_refresh_when_tree_has_match_then_diff_added() {
        let (tree, _, a, b) = tree_with_group();
        let mut registry = SelectorRegistry::new();
        let (id, _) = registry.acquire(&tree, "./a", b, b).unwrap();
        let diff = registry.refresh(&tree, id, CacheRefresh::FromScratch);
        assert_eq!(diff.added, vec![a]);
        assert!(registry.refresh(&tree, id, CacheRefresh::FromScratch).is_empty());
    }

    #[test]
    fn given_removed_node_when_incremental_refresh_then_dropped() {
        let (mut tree, _, a, b) = tree_with_group();
        let mut registry = SelectorRegistry::new();
        let (id, _) = registry.acquire(&tree, "./a", b, b).unwrap();
        registry.refresh(&tree, id, CacheRefresh::FromScratch);
        tree.remove_subtree(a).unwrap();
        let diff = registry.refresh(&tree, id, CacheRefresh::Incremental);
        assert_eq!(diff.removed, vec![a]);
        assert!(registry.get(id).unwrap().matches().is_empty());
    }

    #[test]
    fn given_base_renamed_when_rekey_then_lookup_follows() {
        let (tree, _, _, b) = tree_with_group();
        let mut registry = SelectorRegistry::new();
        let (id, _) = registry.acquire(&tree, "./a", b, b).unwrap();
        let old = NodePath::parse("g").unwrap();
        let new = NodePath::parse("h").unwrap();
        assert_eq!(registry.rekey(&old, &new), vec![id]);
        assert_eq!(registry.lookup("./a", &new), Some(id));
        assert_eq!(registry.get(id).unwrap().base_path(), &new);
    }
}
