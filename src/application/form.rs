//! Form service
//!
//! Owns the field tree, the selector registry and the formula graph, and
//! turns user-level edits into the tree notifications the graph reacts to.

use tracing::{debug, instrument};

use crate::application::ApplicationResult;
use crate::config::Settings;
use crate::domain::{
    DomainError, FieldDef, FieldTree, FormDocument, FormulaGraph, NodeId, NodeKind, NodePath,
    PathToken, RecomputeReport, Schedule, ScheduleFlag, Scheduled, SelectorRegistry, Value,
};

#[derive(Debug)]
pub struct Form {
    tree: FieldTree,
    registry: SelectorRegistry,
    graph: FormulaGraph,
}

impl Scheduled for Form {
    fn schedule(&self) -> &Schedule {
        self.graph.schedule()
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        self.graph.schedule_mut()
    }
}

impl Form {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tree: FieldTree::new(),
            registry: SelectorRegistry::new(),
            graph: FormulaGraph::new(settings.graph_options()),
        }
    }

    /// Build a form from a document.
    ///
    /// The tree is loaded with graph maintenance suspended, then the graph is
    /// rebuilt once and every formula evaluated.
    #[instrument(level = "debug", skip_all)]
    pub fn from_document(document: &FormDocument, settings: &Settings) -> ApplicationResult<Self> {
        document.validate()?;
        let mut form = Self::new(settings);
        {
            let mut form = form.scoped(ScheduleFlag::UpdateGraph, false);
            let root = form.tree.root();
            for def in &document.fields {
                form.load_def(root, def)?;
            }
        }
        form.rebuild()?;
        debug!(
            "loaded form: {} nodes, {} graph nodes, {} selector instances",
            form.tree.len(),
            form.graph.len(),
            form.registry.len()
        );
        Ok(form)
    }

    pub fn tree(&self) -> &FieldTree {
        &self.tree
    }

    pub fn registry(&self) -> &SelectorRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &FormulaGraph {
        &self.graph
    }

    pub fn resolve(&self, path: &str) -> ApplicationResult<NodeId> {
        let parsed = NodePath::parse(path)?;
        Ok(self
            .tree
            .find(&parsed)
            .ok_or_else(|| DomainError::NodeNotFound(path.to_string()))?)
    }

    /// Add a node under `parent` (`""` or `/` for the root).
    ///
    /// Adding under an array extends its template and every existing element.
    #[instrument(level = "debug", skip(self))]
    pub fn add_field(
        &mut self,
        parent: &str,
        key: &str,
        kind: NodeKind,
        formula: Option<&str>,
    ) -> ApplicationResult<NodeId> {
        let parent = self.resolve(parent)?;
        self.add_node(parent, PathToken::id(key), kind, formula)
    }

    /// Append an element to an array by copying its template.
    #[instrument(level = "debug", skip(self))]
    pub fn push_element(&mut self, array: &str) -> ApplicationResult<NodeId> {
        let array = self.resolve(array)?;
        self.push_element_at(array)
    }

    /// Remove element `index`; later elements shift down by one.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_element(&mut self, array: &str, index: usize) -> ApplicationResult<()> {
        let array_id = self.resolve(array)?;
        self.expect_array(array_id)?;
        let index = index as i64;
        let element = self
            .tree
            .child_by_key(array_id, &PathToken::Index(index))
            .ok_or_else(|| DomainError::NodeNotFound(format!("{}[{}]", array, index)))?;
        self.batch(|form| {
            form.discard_subtree(element)?;
            let mut later: Vec<(i64, NodeId)> = form
                .tree
                .elements(array_id)
                .into_iter()
                .filter_map(|e| match form.tree.get(e).and_then(|n| n.key.clone()) {
                    Some(PathToken::Index(i)) if i > index => Some((i, e)),
                    _ => None,
                })
                .collect();
            later.sort_by_key(|(i, _)| *i);
            for (i, e) in later {
                form.rename_subtree(e, PathToken::Index(i - 1))?;
            }
            Ok(())
        })
    }

    /// Store a user value; on a formula field this overrides the formula.
    #[instrument(level = "debug", skip(self))]
    pub fn set_value(&mut self, path: &str, value: Value) -> ApplicationResult<()> {
        let id = self.resolve(path)?;
        self.set_value_at(id, value)
    }

    /// Drop the user value; formula fields return to their derived value.
    #[instrument(level = "debug", skip(self))]
    pub fn clear_override(&mut self, path: &str) -> ApplicationResult<()> {
        let id = self.resolve(path)?;
        self.set_value_at(id, Value::Void)
    }

    /// Authoritative value at `path`; `None` if indeterminate.
    pub fn value(&self, path: &str) -> ApplicationResult<Option<Value>> {
        let id = self.resolve(path)?;
        Ok(self.tree.authoritative_value(id))
    }

    /// Every field outside templates with its authoritative value, in tree order.
    pub fn values(&self) -> Vec<(NodePath, Option<Value>)> {
        self.tree
            .fields()
            .into_iter()
            .map(|id| (self.tree.path(id), self.tree.authoritative_value(id)))
            .collect()
    }

    pub fn recompute_pending(&mut self) -> ApplicationResult<RecomputeReport> {
        Ok(self
            .graph
            .recompute_pending_formulas(&mut self.tree, &mut self.registry)?)
    }

    pub fn recompute_all(&mut self) -> ApplicationResult<RecomputeReport> {
        Ok(self.graph.recompute_all(&mut self.tree, &mut self.registry)?)
    }

    /// Derive the graph from scratch and recompute everything.
    pub fn rebuild(&mut self) -> ApplicationResult<()> {
        Ok(self.graph.rebuild(&mut self.tree, &mut self.registry, true)?)
    }

    pub fn export_graph(&mut self) -> ApplicationResult<String> {
        Ok(self.graph.export_graph(&self.tree)?)
    }

    /// Formula nodes with their level, ordered by level then path.
    pub fn levels(&mut self) -> ApplicationResult<Vec<(NodePath, usize)>> {
        let leveled = self.graph.levels(&self.tree)?;
        Ok(leveled
            .into_iter()
            .filter(|(id, _)| self.graph.node(*id).is_some_and(|n| n.has_formula()))
            .map(|(id, level)| (self.tree.path(id), level))
            .collect())
    }

    // ---------------------------------------------------------------------
    // tree mutations
    // ---------------------------------------------------------------------

    fn load_def(&mut self, parent: NodeId, def: &FieldDef) -> ApplicationResult<()> {
        let id = self.add_node(parent, PathToken::id(&def.key), def.kind(), def.formula.as_deref())?;
        if let Some(value) = &def.value {
            self.set_value_at(id, value.clone())?;
        }
        for child in &def.fields {
            self.load_def(id, child)?;
        }
        if let Some(template) = &def.template {
            let master = self
                .tree
                .template(id)
                .ok_or_else(|| DomainError::NotAnArray(self.tree.path(id).to_string()))?;
            for child in template {
                self.load_def(master, child)?;
            }
            for item in &def.items {
                let element = self.push_element_at(id)?;
                let base = self.tree.path(element);
                for (key, value) in item {
                    let relative = NodePath::parse(key)?;
                    let path = NodePath::new([base.tokens(), relative.tokens()].concat());
                    let target = self
                        .tree
                        .find(&path)
                        .ok_or_else(|| DomainError::NodeNotFound(path.to_string()))?;
                    self.set_value_at(target, value.clone())?;
                }
            }
        }
        Ok(())
    }

    fn add_node(
        &mut self,
        parent: NodeId,
        key: PathToken,
        kind: NodeKind,
        formula: Option<&str>,
    ) -> ApplicationResult<NodeId> {
        let parent_kind = self
            .tree
            .get(parent)
            .map(|n| n.kind)
            .ok_or_else(|| DomainError::NodeNotFound(format!("{:?}", parent)))?;
        match parent_kind {
            NodeKind::Field => Err(DomainError::NotAContainer(self.tree.path(parent).to_string()).into()),
            NodeKind::Array => self.extend_array(parent, key, kind, formula),
            NodeKind::Group => self.batch(|form| form.insert_node(parent, key, kind, formula)),
        }
    }

    /// Insert one node and notify the graph; template contents stay unregistered.
    fn insert_node(
        &mut self,
        parent: NodeId,
        key: PathToken,
        kind: NodeKind,
        formula: Option<&str>,
    ) -> ApplicationResult<NodeId> {
        if formula.is_some() && kind != NodeKind::Field {
            return Err(DomainError::InvalidPath {
                path: self.tree.path(parent).child(key).to_string(),
                reason: "only fields carry formulas".to_string(),
            }
            .into());
        }
        let id = self.tree.insert(parent, key, kind)?;
        if kind == NodeKind::Array {
            self.tree.insert_template(id)?;
        }
        self.tree.set_formula(id, formula.map(String::from))?;
        if let Err(e) = self.node_added(id) {
            self.tree.remove_subtree(id)?;
            return Err(e);
        }
        Ok(id)
    }

    /// Add a node to the template of `array` and to each existing element.
    ///
    /// If any copy is rejected, the template node and every copy are removed
    /// again. An array without elements instantiates a throwaway element so
    /// template formulas are checked for cycles up front.
    fn extend_array(
        &mut self,
        array: NodeId,
        key: PathToken,
        kind: NodeKind,
        formula: Option<&str>,
    ) -> ApplicationResult<NodeId> {
        let master = self
            .tree
            .template(array)
            .ok_or_else(|| DomainError::NotAnArray(self.tree.path(array).to_string()))?;
        self.batch(|form| {
            let id = form.insert_node(master, key.clone(), kind, formula)?;
            let elements = form.tree.elements(array);
            let copied = if elements.is_empty() {
                form.trial_element(array, master)
            } else {
                form.copy_into_elements(&elements, id, &key)
            };
            if let Err(e) = copied {
                debug!("template extension rejected: {}", e);
                form.tree.remove_subtree(id)?;
                return Err(e);
            }
            Ok(id)
        })
    }

    /// Copy template node `id` into each element; all or nothing.
    fn copy_into_elements(&mut self, elements: &[NodeId], id: NodeId, key: &PathToken) -> ApplicationResult<()> {
        let mut copies = Vec::with_capacity(elements.len());
        for &element in elements {
            let created = self.tree.copy_subtree(id, element, key.clone())?;
            if let Err(e) = self.notify_added(&created) {
                for copy in copies {
                    self.discard_subtree(copy)?;
                }
                return Err(e);
            }
            copies.push(created[0]);
        }
        Ok(())
    }

    /// Instantiate the template once and drop it again.
    fn trial_element(&mut self, array: NodeId, master: NodeId) -> ApplicationResult<()> {
        let index = self.next_index(array);
        let created = self.tree.copy_subtree(master, array, PathToken::Index(index))?;
        self.notify_added(&created)?;
        self.discard_subtree(created[0])
    }

    fn next_index(&self, array: NodeId) -> i64 {
        self.tree
            .elements(array)
            .iter()
            .filter_map(|&e| match self.tree.get(e).and_then(|n| n.key.clone()) {
                Some(PathToken::Index(i)) => Some(i + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn push_element_at(&mut self, array: NodeId) -> ApplicationResult<NodeId> {
        self.expect_array(array)?;
        let master = self
            .tree
            .template(array)
            .ok_or_else(|| DomainError::NotAnArray(self.tree.path(array).to_string()))?;
        let next = self.next_index(array);
        self.batch(|form| {
            let created = form.tree.copy_subtree(master, array, PathToken::Index(next))?;
            form.notify_added(&created)?;
            Ok(created[0])
        })
    }

    /// Register freshly copied nodes; on failure the copy is discarded again.
    fn notify_added(&mut self, created: &[NodeId]) -> ApplicationResult<()> {
        for &id in created {
            if let Err(e) = self.node_added(id) {
                if let Some(&root) = created.first() {
                    self.discard_subtree(root)?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unregister every node below `root` from the graph, then drop the subtree.
    fn discard_subtree(&mut self, root: NodeId) -> ApplicationResult<()> {
        let doomed: Vec<NodeId> = self.tree.iter_postorder_from(root).map(|(id, _)| id).collect();
        for id in doomed {
            self.node_removed(id)?;
        }
        self.tree.remove_subtree(root)?;
        Ok(())
    }

    /// Give `id` a new key and tell the graph about every moved node.
    fn rename_subtree(&mut self, id: NodeId, key: PathToken) -> ApplicationResult<()> {
        let moved: Vec<(NodeId, NodePath)> = self
            .tree
            .iter_from(id)
            .map(|(n, _)| (n, self.tree.path(n)))
            .collect();
        self.tree.rekey(id, key)?;
        for (node, old_path) in moved {
            self.node_renamed(&old_path, node)?;
        }
        Ok(())
    }

    fn set_value_at(&mut self, id: NodeId, value: Value) -> ApplicationResult<()> {
        let kind = self.tree.get(id).map(|n| n.kind);
        if kind != Some(NodeKind::Field) {
            return Err(DomainError::InvalidPath {
                path: self.tree.path(id).to_string(),
                reason: "only fields carry values".to_string(),
            }
            .into());
        }
        self.tree.set_value(id, value)?;
        self.value_changed(id)
    }

    fn expect_array(&self, id: NodeId) -> ApplicationResult<()> {
        match self.tree.get(id).map(|n| n.kind) {
            Some(NodeKind::Array) => Ok(()),
            _ => Err(DomainError::NotAnArray(self.tree.path(id).to_string()).into()),
        }
    }

    /// Run `f` with eager recomputation suspended, then recompute once.
    fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> ApplicationResult<R>) -> ApplicationResult<R> {
        let eager = self.schedule().is_set(ScheduleFlag::RecomputeEagerly);
        let result = {
            let mut form = self.scoped(ScheduleFlag::RecomputeEagerly, false);
            f(&mut form)
        }?;
        if eager {
            self.recompute_pending()?;
        }
        Ok(result)
    }

    // ---------------------------------------------------------------------
    // notifications
    // ---------------------------------------------------------------------

    fn node_added(&mut self, id: NodeId) -> ApplicationResult<()> {
        let Some(node) = self.tree.get(id) else {
            return Ok(());
        };
        if node.kind != NodeKind::Field || self.tree.in_template(id) {
            return Ok(());
        }
        let formula = node.formula.clone();
        self.graph
            .add_formula_node(&mut self.tree, &mut self.registry, id, formula.as_deref())?;
        Ok(())
    }

    fn node_removed(&mut self, id: NodeId) -> ApplicationResult<()> {
        self.graph
            .remove_formula_node(&mut self.tree, &mut self.registry, id)?;
        Ok(())
    }

    fn node_renamed(&mut self, old_path: &NodePath, id: NodeId) -> ApplicationResult<()> {
        self.graph
            .rename(&mut self.tree, &mut self.registry, old_path, id)?;
        Ok(())
    }

    fn value_changed(&mut self, id: NodeId) -> ApplicationResult<()> {
        self.graph
            .value_changed(&mut self.tree, &mut self.registry, id)?;
        Ok(())
    }
}
