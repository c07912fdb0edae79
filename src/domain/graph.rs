//! Formula dependency graph.
//!
//! Edges run from a matched node (predecessor) to every formula consuming a
//! selector instance that matches it (dependent). A node is kept in the graph
//! while it owns a formula or is matched by at least one instance.
//!
//! All operations take the tree and the selector registry as explicit
//! context; the graph only stores handles into both.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, instrument, trace, warn};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::formula::Formula;
use crate::domain::path::NodePath;
use crate::domain::registry::{CacheRefresh, InstanceId, SelectorRegistry};
use crate::domain::schedule::{Schedule, ScheduleFlag, Scheduled};
use crate::domain::tree::{FieldTree, NodeId};

#[derive(Debug, Clone)]
pub struct FormulaNode {
    node: NodeId,
    formula: Option<Formula>,
    predecessors: HashSet<NodeId>,
    successors: HashSet<InstanceId>,
}

impl FormulaNode {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            formula: None,
            predecessors: HashSet::new(),
            successors: HashSet::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn formula(&self) -> Option<&Formula> {
        self.formula.as_ref()
    }

    pub fn has_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Nodes matched by this node's formula.
    pub fn predecessors(&self) -> &HashSet<NodeId> {
        &self.predecessors
    }

    /// Selector instances whose caches contain this node.
    pub fn successors(&self) -> &HashSet<InstanceId> {
        &self.successors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    pub update_graph: bool,
    pub recompute_eagerly: bool,
    /// Partial recompute does not descend past user-overridden formulas
    pub stop_at_override: bool,
    pub cache_refresh: CacheRefresh,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            update_graph: true,
            recompute_eagerly: true,
            stop_at_override: true,
            cache_refresh: CacheRefresh::Incremental,
        }
    }
}

/// Outcome of one recompute pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecomputeReport {
    /// Evaluated formula nodes in evaluation order
    pub evaluated: Vec<NodeId>,
    /// How many of them changed their formula value
    pub changed: usize,
}

#[derive(Debug)]
pub struct FormulaGraph {
    nodes: HashMap<NodeId, FormulaNode>,
    levels: HashMap<NodeId, usize>,
    levels_dirty: bool,
    pending: HashSet<NodeId>,
    schedule: Schedule,
    stop_at_override: bool,
    cache_refresh: CacheRefresh,
}

impl Default for FormulaGraph {
    fn default() -> Self {
        Self::new(GraphOptions::default())
    }
}

impl Scheduled for FormulaGraph {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }
}

impl FormulaGraph {
    pub fn new(options: GraphOptions) -> Self {
        Self {
            nodes: HashMap::new(),
            levels: HashMap::new(),
            levels_dirty: false,
            pending: HashSet::new(),
            schedule: Schedule::new(options.update_graph, options.recompute_eagerly),
            stop_at_override: options.stop_at_override,
            cache_refresh: options.cache_refresh,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn node(&self, node: NodeId) -> Option<&FormulaNode> {
        self.nodes.get(&node)
    }

    pub fn pending(&self) -> &HashSet<NodeId> {
        &self.pending
    }

    /// Nodes owning a formula.
    pub fn formula_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.has_formula())
            .map(|n| n.node)
            .collect()
    }

    /// Number of predecessor edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.predecessors.len()).sum()
    }

    /// Formula nodes consuming an instance that matches `node`.
    pub fn dependents(&self, registry: &SelectorRegistry, node: NodeId) -> HashSet<NodeId> {
        self.nodes
            .get(&node)
            .map(|n| {
                n.successors
                    .iter()
                    .filter_map(|&i| registry.get(i))
                    .flat_map(|i| i.consumers().iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Level of `node`, if levels are current.
    pub fn level(&self, node: NodeId) -> Option<usize> {
        if self.levels_dirty {
            return None;
        }
        self.levels.get(&node).copied()
    }

    /// Every graph node with its level, ordered by level then path.
    pub fn levels(&mut self, tree: &FieldTree) -> DomainResult<Vec<(NodeId, usize)>> {
        self.compute_levels(tree)?;
        let mut leveled: Vec<(usize, NodePath, NodeId)> = self
            .levels
            .iter()
            .map(|(&n, &l)| (l, tree.path(n), n))
            .collect();
        leveled.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.match_order(&b.1)));
        Ok(leveled.into_iter().map(|(l, _, n)| (n, l)).collect())
    }

    // ---------------------------------------------------------------------
    // structural reactions
    // ---------------------------------------------------------------------

    /// Register `node`, with its formula if it has one.
    ///
    /// The node is matched against all existing instances. On a cycle the
    /// node is rolled back and the registry keeps no trace of its formula.
    #[instrument(level = "debug", skip(self, tree, registry))]
    pub fn add_formula_node(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
        node: NodeId,
        expression: Option<&str>,
    ) -> DomainResult<()> {
        if !self.schedule.is_set(ScheduleFlag::UpdateGraph) {
            return Ok(());
        }
        self.attach(tree, registry, node, expression)?;
        self.maybe_recompute(tree, registry)
    }

    /// Unregister `node` and every edge touching it.
    ///
    /// Call before the node leaves the tree; consumers become pending.
    #[instrument(level = "debug", skip(self, tree, registry))]
    pub fn remove_formula_node(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
        node: NodeId,
    ) -> DomainResult<()> {
        if !self.schedule.is_set(ScheduleFlag::UpdateGraph) {
            return Ok(());
        }
        self.detach(registry, node);
        self.maybe_recompute(tree, registry)
    }

    /// Move registry keys based at `old_path` to the node's current path.
    #[instrument(level = "debug", skip(self, tree, registry))]
    pub fn update_formula_node_selectors(
        &mut self,
        tree: &FieldTree,
        registry: &mut SelectorRegistry,
        old_path: &NodePath,
        node: NodeId,
    ) -> DomainResult<()> {
        if !self.schedule.is_set(ScheduleFlag::UpdateGraph) {
            return Ok(());
        }
        let new_path = tree.path(node);
        let moved = registry.rekey(old_path, &new_path);
        if !moved.is_empty() {
            trace!("moved {} instances {} -> {}", moved.len(), old_path, new_path);
        }
        Ok(())
    }

    /// Re-derive predecessor and successor edges of `node` after its path changed.
    #[instrument(level = "debug", skip(self, tree, registry))]
    pub fn update_formula_node_neighbors(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
        old_path: &NodePath,
        node: NodeId,
    ) -> DomainResult<()> {
        if !self.schedule.is_set(ScheduleFlag::UpdateGraph) {
            return Ok(());
        }
        self.relink(tree, registry, node)?;
        self.maybe_recompute(tree, registry)
    }

    /// A node moved: rekey its instances, then relink it.
    pub fn rename(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
        old_path: &NodePath,
        node: NodeId,
    ) -> DomainResult<()> {
        self.update_formula_node_selectors(tree, registry, old_path, node)?;
        self.update_formula_node_neighbors(tree, registry, old_path, node)
    }

    /// The value of `node` changed; its dependents need recomputation.
    pub fn value_changed(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
        node: NodeId,
    ) -> DomainResult<()> {
        if self.nodes.contains_key(&node) {
            self.pending.insert(node);
        }
        self.maybe_recompute(tree, registry)
    }

    /// Drop every edge and derive the graph again from the formulas in the tree.
    ///
    /// Used after bulk loading with graph maintenance suspended.
    #[instrument(level = "debug", skip(self, tree, registry))]
    pub fn rebuild(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
        recompute: bool,
    ) -> DomainResult<()> {
        self.clear(registry);
        if !registry.is_empty() {
            warn!("{} selector instances outlived their formulas", registry.len());
        }
        if let Err(e) = self.derive(tree, registry) {
            warn!("rebuild failed, graph left empty: {}", e);
            self.clear(registry);
            return Err(e);
        }
        debug!(
            "rebuilt graph: {} nodes, {} edges, {} instances",
            self.nodes.len(),
            self.edge_count(),
            registry.len()
        );

        if recompute {
            self.recompute_pending_formulas(tree, registry)?;
        }
        Ok(())
    }

    /// Release every formula's selector instances and drop all nodes.
    fn clear(&mut self, registry: &mut SelectorRegistry) {
        for entry in self.nodes.values() {
            if let Some(formula) = &entry.formula {
                formula.release(registry);
            }
        }
        self.nodes.clear();
        self.levels.clear();
        self.pending.clear();
        self.levels_dirty = false;
    }

    fn derive(&mut self, tree: &FieldTree, registry: &mut SelectorRegistry) -> DomainResult<()> {
        self.levels_dirty = true;
        let anchors: Vec<(NodeId, String)> = tree
            .iter()
            .filter_map(|(id, n)| n.formula.clone().map(|f| (id, f)))
            .filter(|(id, _)| !tree.in_template(*id))
            .collect();
        for (node, expression) in &anchors {
            let formula = Formula::parse(registry, tree, *node, expression)?;
            let mut entry = FormulaNode::new(*node);
            entry.formula = Some(formula);
            self.nodes.insert(*node, entry);
            self.pending.insert(*node);
        }

        for inst in registry.ids() {
            let Some(fresh) = registry.fresh_matches(tree, inst, CacheRefresh::FromScratch) else {
                continue;
            };
            for &m in &fresh {
                self.nodes
                    .entry(m)
                    .or_insert_with(|| FormulaNode::new(m))
                    .successors
                    .insert(inst);
            }
            if let Some(instance) = registry.get_mut(inst) {
                for m in fresh {
                    instance.insert_match(m);
                }
            }
        }
        for node in self.formula_nodes() {
            self.recompute_predecessors(registry, node);
        }
        self.compute_levels(tree)
    }

    // ---------------------------------------------------------------------
    // recomputation
    // ---------------------------------------------------------------------

    /// Evaluate the pending nodes and everything downstream of them in
    /// ascending level order.
    #[instrument(level = "debug", skip_all)]
    pub fn recompute_pending_formulas(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
    ) -> DomainResult<RecomputeReport> {
        let seeds: HashSet<NodeId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|n| self.nodes.contains_key(n) && tree.contains(*n))
            .collect();
        if seeds.is_empty() {
            return Ok(RecomputeReport::default());
        }
        let mut affected = self.descendants(tree, registry, &seeds);

        let instances: HashSet<InstanceId> = affected
            .iter()
            .filter_map(|n| self.nodes.get(n))
            .filter_map(|n| n.formula.as_ref())
            .flat_map(|f| f.instances())
            .collect();
        for inst in instances {
            if let Err(e) = self.sync_instance(tree, registry, inst, self.cache_refresh) {
                self.pending.extend(affected);
                return Err(e);
            }
        }
        // refreshing caches may have exposed further dependents
        let late: HashSet<NodeId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|n| !affected.contains(n) && self.nodes.contains_key(n))
            .collect();
        if !late.is_empty() {
            affected.extend(self.descendants(tree, registry, &late));
        }

        if let Err(e) = self.compute_levels(tree) {
            self.pending.extend(affected);
            return Err(e);
        }
        let mut order: Vec<(usize, NodeId)> = affected
            .into_iter()
            .filter(|n| tree.contains(*n) && self.nodes.get(n).is_some_and(|e| e.has_formula()))
            .map(|n| (self.levels.get(&n).copied().unwrap_or(0), n))
            .collect();
        order.sort_by_key(|(level, _)| *level);

        let mut report = RecomputeReport::default();
        for (_, node) in order {
            let value = match self.nodes.get(&node).and_then(|e| e.formula.as_ref()) {
                Some(formula) => formula.evaluate_cached(registry, tree),
                None => continue,
            };
            if tree.set_formula_value(node, value)? {
                report.changed += 1;
            }
            report.evaluated.push(node);
        }
        debug!(
            "recomputed {} formulas, {} changed",
            report.evaluated.len(),
            report.changed
        );
        Ok(report)
    }

    /// Evaluate every formula node.
    pub fn recompute_all(
        &mut self,
        tree: &mut FieldTree,
        registry: &mut SelectorRegistry,
    ) -> DomainResult<RecomputeReport> {
        let all = self.formula_nodes();
        self.pending.extend(all);
        self.recompute_pending_formulas(tree, registry)
    }

    /// Text listing of the graph: one `predecessor -> dependent` line per
    /// edge, then the formula nodes without predecessors.
    pub fn export_graph(&mut self, tree: &FieldTree) -> DomainResult<String> {
        self.compute_levels(tree)?;
        let mut formula_nodes: Vec<(usize, NodePath, NodeId)> = self
            .nodes
            .values()
            .filter(|n| n.has_formula())
            .map(|n| (self.levels.get(&n.node).copied().unwrap_or(0), tree.path(n.node), n.node))
            .collect();
        formula_nodes.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.match_order(&b.1)));

        let mut edges = Vec::new();
        let mut roots = Vec::new();
        for (_, path, node) in &formula_nodes {
            let Some(entry) = self.nodes.get(node) else { continue };
            if entry.predecessors.is_empty() {
                roots.push(path.to_string());
                continue;
            }
            let mut preds: Vec<NodePath> = entry.predecessors.iter().map(|&p| tree.path(p)).collect();
            preds.sort_by(|a, b| a.match_order(b));
            for pred in preds {
                edges.push(format!("{} -> {}", pred, path));
            }
        }

        let mut out = String::new();
        for line in edges.iter().chain(roots.iter()) {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // internals
    // ---------------------------------------------------------------------

    fn maybe_recompute(&mut self, tree: &mut FieldTree, registry: &mut SelectorRegistry) -> DomainResult<()> {
        if self.schedule.is_set(ScheduleFlag::RecomputeEagerly) && !self.pending.is_empty() {
            self.recompute_pending_formulas(tree, registry)?;
        }
        Ok(())
    }

    fn attach(
        &mut self,
        tree: &FieldTree,
        registry: &mut SelectorRegistry,
        node: NodeId,
        expression: Option<&str>,
    ) -> DomainResult<()> {
        if !tree.contains(node) {
            return Err(DomainError::NodeNotFound(format!("{:?}", node)));
        }
        if tree.in_template(node) {
            trace!("{} is inside a template, not registered", tree.path(node));
            return Ok(());
        }
        if self.nodes.get(&node).is_some_and(|n| n.has_formula()) {
            warn!("{} registered twice, replacing", tree.path(node));
            debug_assert!(false, "formula node registered twice");
            self.detach(registry, node);
        }

        if let Some(expression) = expression {
            let formula = Formula::parse(registry, tree, node, expression)?;
            let instances = formula.instances();
            self.nodes
                .entry(node)
                .or_insert_with(|| FormulaNode::new(node))
                .formula = Some(formula);
            self.pending.insert(node);
            self.levels_dirty = true;
            if let Err(e) = self.connect_formula(tree, registry, node, &instances) {
                warn!("rejecting formula at {}: {}", tree.path(node), e);
                self.detach(registry, node);
                return Err(e);
            }
        }

        for inst in registry.reverse_match(tree, node) {
            if self.nodes.get(&node).is_some_and(|n| n.successors.contains(&inst)) {
                continue;
            }
            if let Err(e) = self.link_match(tree, registry, inst, node) {
                warn!("rejecting {}: {}", tree.path(node), e);
                self.detach(registry, node);
                return Err(e);
            }
        }
        self.prune(node);
        Ok(())
    }

    /// Link the matches of a freshly parsed formula's instances.
    fn connect_formula(
        &mut self,
        tree: &FieldTree,
        registry: &mut SelectorRegistry,
        node: NodeId,
        instances: &[InstanceId],
    ) -> DomainResult<()> {
        for &inst in instances {
            // a shared instance already carries matches; they become predecessors too
            let cached: Vec<NodeId> = registry
                .get(inst)
                .map(|i| i.matches().iter().copied().collect())
                .unwrap_or_default();
            for m in cached {
                if let Some(path) = self.find_path(registry, node, m) {
                    return Err(Self::cycle_error(tree, &path, node));
                }
            }
            self.sync_instance(tree, registry, inst, CacheRefresh::FromScratch)?;
        }
        self.recompute_predecessors(registry, node);
        Ok(())
    }

    /// Remove `node` and every edge touching it, releasing its formula.
    fn detach(&mut self, registry: &mut SelectorRegistry, node: NodeId) {
        let Some(entry) = self.nodes.remove(&node) else {
            return;
        };
        for &inst in &entry.successors {
            let consumers: Vec<NodeId> = match registry.get_mut(inst) {
                Some(instance) => {
                    instance.remove_match(node);
                    instance.consumers().iter().copied().collect()
                }
                None => Vec::new(),
            };
            for c in consumers.into_iter().filter(|&c| c != node) {
                self.recompute_predecessors(registry, c);
                self.pending.insert(c);
            }
        }
        if let Some(formula) = &entry.formula {
            for inst in formula.instances() {
                if let Some(dropped) = registry.release(inst, node) {
                    for &m in dropped.matches() {
                        if let Some(matched) = self.nodes.get_mut(&m) {
                            matched.successors.remove(&inst);
                        }
                        self.prune(m);
                    }
                }
            }
        }
        self.levels.remove(&node);
        self.pending.remove(&node);
        self.levels_dirty = true;
    }

    fn relink(&mut self, tree: &FieldTree, registry: &mut SelectorRegistry, node: NodeId) -> DomainResult<()> {
        if !tree.contains(node) || tree.in_template(node) {
            return Ok(());
        }
        let instances = self
            .nodes
            .get(&node)
            .and_then(|n| n.formula.as_ref())
            .map(|f| f.instances());
        if let Some(instances) = instances {
            for inst in instances {
                self.sync_instance(tree, registry, inst, CacheRefresh::FromScratch)?;
            }
            self.recompute_predecessors(registry, node);
            self.pending.insert(node);
        }

        let should: HashSet<InstanceId> = registry.reverse_match(tree, node).into_iter().collect();
        let current: HashSet<InstanceId> = self
            .nodes
            .get(&node)
            .map(|n| n.successors.clone())
            .unwrap_or_default();
        for &inst in current.difference(&should) {
            self.unlink_match(registry, inst, node);
        }
        for &inst in should.difference(&current) {
            self.link_match(tree, registry, inst, node)?;
        }
        self.prune(node);
        self.levels_dirty = true;
        Ok(())
    }

    /// Bring the cache of `inst` up to date and apply the change as edges.
    fn sync_instance(
        &mut self,
        tree: &FieldTree,
        registry: &mut SelectorRegistry,
        inst: InstanceId,
        mode: CacheRefresh,
    ) -> DomainResult<()> {
        let Some(fresh) = registry.fresh_matches(tree, inst, mode) else {
            return Ok(());
        };
        let diff = registry.diff(inst, &fresh);
        for m in diff.removed {
            self.unlink_match(registry, inst, m);
        }
        for m in diff.added {
            self.link_match(tree, registry, inst, m)?;
        }
        Ok(())
    }

    /// Add `m` to the cache of `inst`, creating the edges `m -> consumer`.
    fn link_match(
        &mut self,
        tree: &FieldTree,
        registry: &mut SelectorRegistry,
        inst: InstanceId,
        m: NodeId,
    ) -> DomainResult<()> {
        let consumers: Vec<NodeId> = registry
            .get(inst)
            .map(|i| i.consumers().iter().copied().collect())
            .unwrap_or_default();
        for &c in &consumers {
            if let Some(path) = self.find_path(registry, c, m) {
                return Err(Self::cycle_error(tree, &path, c));
            }
        }

        if let Some(instance) = registry.get_mut(inst) {
            instance.insert_match(m);
        }
        self.nodes
            .entry(m)
            .or_insert_with(|| FormulaNode::new(m))
            .successors
            .insert(inst);
        for c in consumers {
            if let Some(consumer) = self.nodes.get_mut(&c) {
                consumer.predecessors.insert(m);
            }
            self.pending.insert(c);
        }
        self.levels_dirty = true;
        Ok(())
    }

    /// Remove `m` from the cache of `inst` and drop the edges it carried.
    fn unlink_match(&mut self, registry: &mut SelectorRegistry, inst: InstanceId, m: NodeId) {
        let consumers: Vec<NodeId> = match registry.get_mut(inst) {
            Some(instance) => {
                instance.remove_match(m);
                instance.consumers().iter().copied().collect()
            }
            None => Vec::new(),
        };
        if let Some(matched) = self.nodes.get_mut(&m) {
            matched.successors.remove(&inst);
        }
        for c in consumers {
            // another instance of the same formula may still match m
            self.recompute_predecessors(registry, c);
            self.pending.insert(c);
        }
        self.prune(m);
        self.levels_dirty = true;
    }

    fn recompute_predecessors(&mut self, registry: &SelectorRegistry, node: NodeId) {
        let Some(formula) = self.nodes.get(&node).and_then(|n| n.formula.as_ref()) else {
            return;
        };
        let predecessors: HashSet<NodeId> = formula
            .instances()
            .into_iter()
            .filter_map(|i| registry.get(i))
            .flat_map(|i| i.matches().iter().copied())
            .collect();
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.predecessors = predecessors;
        }
    }

    /// Drop a node that neither owns a formula nor is matched.
    fn prune(&mut self, node: NodeId) {
        let isolated = self
            .nodes
            .get(&node)
            .is_some_and(|n| !n.has_formula() && n.successors.is_empty());
        if isolated {
            self.nodes.remove(&node);
            self.levels.remove(&node);
            self.levels_dirty = true;
        }
    }

    /// Dependency path `from -> ... -> to`, if `to` is downstream of `from`.
    fn find_path(&self, registry: &SelectorRegistry, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(n) = queue.pop_front() {
            for d in self.dependents(registry, n) {
                if d == from || parent.contains_key(&d) {
                    continue;
                }
                parent.insert(d, n);
                if d == to {
                    let mut path = vec![to];
                    let mut current = to;
                    while let Some(&p) = parent.get(&current) {
                        path.push(p);
                        current = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(d);
            }
        }
        None
    }

    /// `path` runs from `closing` down to the node whose new edge closes it.
    fn cycle_error(tree: &FieldTree, path: &[NodeId], closing: NodeId) -> DomainError {
        let mut names: Vec<String> = path.iter().map(|&n| tree.path(n).to_string()).collect();
        names.push(tree.path(closing).to_string());
        warn!("cycle detected: {}", names.join(" -> "));
        DomainError::CycleDetected(names)
    }

    /// Transitive dependents of `seeds`, seeds included.
    fn descendants(&self, tree: &FieldTree, registry: &SelectorRegistry, seeds: &HashSet<NodeId>) -> HashSet<NodeId> {
        let mut seen = seeds.clone();
        let mut queue: VecDeque<NodeId> = seeds.iter().copied().collect();
        while let Some(n) = queue.pop_front() {
            for d in self.dependents(registry, n) {
                if !seen.insert(d) {
                    continue;
                }
                if self.stop_at_override && tree.get(d).is_some_and(|x| x.is_overridden()) {
                    trace!("not descending past override at {}", tree.path(d));
                    continue;
                }
                queue.push_back(d);
            }
        }
        seen
    }

    /// Longest-predecessor-chain levels, recomputed when dirty.
    fn compute_levels(&mut self, tree: &FieldTree) -> DomainResult<()> {
        if !self.levels_dirty {
            return Ok(());
        }
        let mut levels: HashMap<NodeId, usize> = HashMap::with_capacity(self.nodes.len());
        for &start in self.nodes.keys() {
            if levels.contains_key(&start) {
                continue;
            }
            // nodes whose predecessors are being visited, dependent first
            let mut on_path: Vec<NodeId> = Vec::new();
            let mut stack = vec![(start, false)];
            while let Some((n, expanded)) = stack.pop() {
                if expanded {
                    let level = self.nodes[&n]
                        .predecessors
                        .iter()
                        .filter_map(|p| levels.get(p))
                        .map(|l| l + 1)
                        .max()
                        .unwrap_or(0);
                    levels.insert(n, level);
                    on_path.pop();
                    continue;
                }
                if levels.contains_key(&n) {
                    continue;
                }
                let Some(entry) = self.nodes.get(&n) else {
                    continue;
                };
                on_path.push(n);
                stack.push((n, true));
                for &p in &entry.predecessors {
                    if levels.contains_key(&p) {
                        continue;
                    }
                    if !self.nodes.contains_key(&p) {
                        warn!("dangling predecessor {} of {}", tree.path(p), tree.path(n));
                        debug_assert!(false, "dangling predecessor");
                        continue;
                    }
                    if let Some(pos) = on_path.iter().position(|&x| x == p) {
                        let cycle: Vec<NodeId> = on_path[pos..].iter().rev().copied().collect();
                        return Err(Self::cycle_error(tree, &cycle, n));
                    }
                    stack.push((p, false));
                }
            }
        }
        self.levels = levels;
        self.levels_dirty = false;
        Ok(())
    }
}
