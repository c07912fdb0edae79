//! Arena-backed field tree.
//!
//! Nodes are addressed by stable arena handles and by paths. Every array keeps
//! a template element under index `-1`; new elements are copies of it.

use generational_arena::{Arena, Index};
use termtree::Tree;
use tracing::{instrument, warn};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::path::{NodePath, PathToken};
use crate::domain::value::Value;

/// Stable handle of a field node.
pub type NodeId = Index;

/// Key under which an array keeps its template element.
pub const TEMPLATE_INDEX: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Leaf carrying a value
    Field,
    /// Named children
    Group,
    /// Indexed elements plus one template element
    Array,
}

/// Tree node in the arena-based form structure.
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Key within the parent, None for the root
    pub key: Option<PathToken>,
    pub kind: NodeKind,
    /// User-entered value
    pub value: Value,
    /// Last formula result, None if indeterminate or never computed
    pub formula_value: Option<Value>,
    /// Formula expression, if the field is derived
    pub formula: Option<String>,
    /// No user-entered value; formula fields are in derived mode while void
    pub is_void: bool,
    /// Template element of an array, never matched or computed
    pub is_array_master: bool,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<NodeId>,
    /// Indices of child nodes in the arena
    pub children: Vec<NodeId>,
}

impl FieldNode {
    fn new(key: Option<PathToken>, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            key,
            kind,
            value: Value::Void,
            formula_value: None,
            formula: None,
            is_void: true,
            is_array_master: false,
            parent,
            children: Vec::new(),
        }
    }

    /// A formula field whose derived value was replaced by the user.
    pub fn is_overridden(&self) -> bool {
        self.formula.is_some() && !self.is_void
    }

    /// The value readers should see.
    ///
    /// Formula fields report their formula value unless overridden.
    /// `None` means indeterminate.
    pub fn authoritative_value(&self) -> Option<Value> {
        if self.formula.is_some() && self.is_void {
            self.formula_value.clone()
        } else if self.is_void {
            None
        } else {
            Some(self.value.clone())
        }
    }
}

/// Arena-based form tree.
///
/// Uses a generational arena so that handles held by the formula graph
/// never alias a node inserted after the original was removed.
#[derive(Debug)]
pub struct FieldTree {
    arena: Arena<FieldNode>,
    root: NodeId,
}

impl Default for FieldTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldTree {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(FieldNode::new(None, NodeKind::Group, None));
        Self { arena, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&FieldNode> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut FieldNode> {
        self.arena.get_mut(id)
    }

    fn node(&self, id: NodeId) -> DomainResult<&FieldNode> {
        self.arena
            .get(id)
            .ok_or_else(|| DomainError::NodeNotFound(format!("{:?}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> DomainResult<&mut FieldNode> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| DomainError::NodeNotFound(format!("{:?}", id)))
    }

    /// Insert a node under `parent`.
    ///
    /// Groups take id keys, arrays take index keys.
    #[instrument(level = "trace", skip(self))]
    pub fn insert(&mut self, parent: NodeId, key: PathToken, kind: NodeKind) -> DomainResult<NodeId> {
        let parent_node = self.node(parent)?;
        let key_fits = matches!(
            (parent_node.kind, &key),
            (NodeKind::Group, PathToken::Id(_)) | (NodeKind::Array, PathToken::Index(_))
        );
        if !key_fits {
            return Err(DomainError::NotAContainer(format!(
                "{} (key {})",
                self.path(parent),
                key
            )));
        }
        if self.child_by_key(parent, &key).is_some() {
            return Err(DomainError::DuplicateKey {
                parent: self.path(parent).to_string(),
                key: key.to_string(),
            });
        }
        let id = self.arena.insert(FieldNode::new(Some(key), kind, Some(parent)));
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Create the template element of an array.
    pub fn insert_template(&mut self, array: NodeId) -> DomainResult<NodeId> {
        if self.node(array)?.kind != NodeKind::Array {
            return Err(DomainError::NotAnArray(self.path(array).to_string()));
        }
        let id = self.insert(array, PathToken::Index(TEMPLATE_INDEX), NodeKind::Group)?;
        self.node_mut(id)?.is_array_master = true;
        Ok(id)
    }

    pub fn template(&self, array: NodeId) -> Option<NodeId> {
        self.get(array)?
            .children
            .iter()
            .copied()
            .find(|&c| self.get(c).is_some_and(|n| n.is_array_master))
    }

    /// Data elements of an array in index order.
    pub fn elements(&self, array: NodeId) -> Vec<NodeId> {
        let Some(node) = self.get(array) else {
            return Vec::new();
        };
        let mut elements: Vec<(i64, NodeId)> = node
            .children
            .iter()
            .filter_map(|&c| {
                let child = self.get(c)?;
                match (&child.key, child.is_array_master) {
                    (Some(PathToken::Index(i)), false) => Some((*i, c)),
                    _ => None,
                }
            })
            .collect();
        elements.sort_by_key(|(i, _)| *i);
        elements.into_iter().map(|(_, c)| c).collect()
    }

    pub fn child_by_key(&self, parent: NodeId, key: &PathToken) -> Option<NodeId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.get(c).and_then(|n| n.key.as_ref()) == Some(key))
    }

    /// Deep-copy the subtree at `src` under `parent` with `key`.
    ///
    /// Returns the new handles, copy root first. The copy's root is never a
    /// template, nested templates stay templates.
    #[instrument(level = "trace", skip(self))]
    pub fn copy_subtree(&mut self, src: NodeId, parent: NodeId, key: PathToken) -> DomainResult<Vec<NodeId>> {
        let kind = self.node(src)?.kind;
        let new_root = self.insert(parent, key, kind)?;
        let mut created = vec![new_root];
        let mut stack = vec![(src, new_root)];
        while let Some((from, to)) = stack.pop() {
            let source = self.node(from)?.clone();
            {
                let target = self.node_mut(to)?;
                target.value = source.value.clone();
                target.formula = source.formula.clone();
                target.is_void = source.is_void;
                if from != src {
                    target.is_array_master = source.is_array_master;
                }
            }
            for &child in &source.children {
                let child_node = self.node(child)?;
                let (child_key, child_kind) = match &child_node.key {
                    Some(k) => (k.clone(), child_node.kind),
                    None => continue,
                };
                let copy = self.arena.insert(FieldNode::new(Some(child_key), child_kind, Some(to)));
                self.node_mut(to)?.children.push(copy);
                created.push(copy);
                stack.push((child, copy));
            }
        }
        Ok(created)
    }

    /// Remove the subtree rooted at `id`; returns removed handles in post-order.
    #[instrument(level = "trace", skip(self))]
    pub fn remove_subtree(&mut self, id: NodeId) -> DomainResult<Vec<NodeId>> {
        if id == self.root {
            return Err(DomainError::InvalidPath {
                path: "/".to_string(),
                reason: "the root cannot be removed".to_string(),
            });
        }
        let order: Vec<NodeId> = self.iter_postorder_from(id).map(|(i, _)| i).collect();
        if let Some(parent) = self.node(id)?.parent {
            self.node_mut(parent)?.children.retain(|&c| c != id);
        }
        for &removed in &order {
            self.arena.remove(removed);
        }
        Ok(order)
    }

    /// Change a node's key; returns its previous path.
    pub fn rekey(&mut self, id: NodeId, key: PathToken) -> DomainResult<NodePath> {
        let old_path = self.path(id);
        let parent = self.node(id)?.parent;
        if let Some(parent) = parent {
            if let Some(existing) = self.child_by_key(parent, &key) {
                if existing != id {
                    return Err(DomainError::DuplicateKey {
                        parent: self.path(parent).to_string(),
                        key: key.to_string(),
                    });
                }
            }
        }
        self.node_mut(id)?.key = Some(key);
        Ok(old_path)
    }

    pub fn path(&self, id: NodeId) -> NodePath {
        let mut tokens = Vec::new();
        let mut current = Some(id);
        while let Some(idx) = current {
            match self.get(idx) {
                Some(node) => {
                    if let Some(key) = &node.key {
                        tokens.push(key.clone());
                    }
                    current = node.parent;
                }
                None => {
                    warn!("path() reached a dangling node {:?}", idx);
                    break;
                }
            }
        }
        tokens.reverse();
        NodePath::new(tokens)
    }

    pub fn find(&self, path: &NodePath) -> Option<NodeId> {
        let mut current = self.root;
        for token in path.tokens() {
            current = self.child_by_key(current, token)?;
        }
        Some(current)
    }

    /// True for template elements and everything below them.
    pub fn in_template(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(idx) = current {
            match self.get(idx) {
                Some(node) if node.is_array_master => return true,
                Some(node) => current = node.parent,
                None => return false,
            }
        }
        false
    }

    /// Store a user value. Void clears the field.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> DomainResult<()> {
        let node = self.node_mut(id)?;
        node.is_void = value.is_void();
        node.value = value;
        Ok(())
    }

    /// Drop a user value; formula fields go back to derived mode.
    pub fn clear_override(&mut self, id: NodeId) -> DomainResult<()> {
        self.set_value(id, Value::Void)
    }

    pub fn set_formula(&mut self, id: NodeId, formula: Option<String>) -> DomainResult<()> {
        self.node_mut(id)?.formula = formula;
        Ok(())
    }

    /// Returns true when the stored formula value changed.
    pub fn set_formula_value(&mut self, id: NodeId, value: Option<Value>) -> DomainResult<bool> {
        let node = self.node_mut(id)?;
        let changed = node.formula_value != value;
        node.formula_value = value;
        Ok(changed)
    }

    pub fn authoritative_value(&self, id: NodeId) -> Option<Value> {
        self.get(id)?.authoritative_value()
    }

    #[instrument(level = "trace", skip(self))]
    pub fn iter(&self) -> TreeIterator<'_> {
        TreeIterator::new(self, self.root)
    }

    pub fn iter_from(&self, id: NodeId) -> TreeIterator<'_> {
        TreeIterator::new(self, id)
    }

    #[instrument(level = "trace", skip(self))]
    pub fn iter_postorder(&self) -> PostOrderIterator<'_> {
        PostOrderIterator::new(self, self.root)
    }

    pub fn iter_postorder_from(&self, id: NodeId) -> PostOrderIterator<'_> {
        PostOrderIterator::new(self, id)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        self.calculate_depth(self.root)
    }

    fn calculate_depth(&self, node_idx: NodeId) -> usize {
        if let Some(node) = self.get(node_idx) {
            1 + node
                .children
                .iter()
                .map(|&child| self.calculate_depth(child))
                .max()
                .unwrap_or(0)
        } else {
            0
        }
    }

    /// All data-bearing fields outside templates, in pre-order.
    pub fn fields(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(id, node)| node.kind == NodeKind::Field && !self.in_template(*id))
            .map(|(id, _)| id)
            .collect()
    }
}

pub struct TreeIterator<'a> {
    tree: &'a FieldTree,
    stack: Vec<NodeId>,
}

impl<'a> TreeIterator<'a> {
    fn new(tree: &'a FieldTree, start: NodeId) -> Self {
        let mut stack = Vec::new();
        if tree.contains(start) {
            stack.push(start);
        }
        Self { tree, stack }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (NodeId, &'a FieldNode);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(current_idx) = self.stack.pop() {
            if let Some(node) = self.tree.get(current_idx) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((current_idx, node));
            }
        }
        None
    }
}

pub struct PostOrderIterator<'a> {
    tree: &'a FieldTree,
    stack: Vec<(NodeId, bool)>,
}

impl<'a> PostOrderIterator<'a> {
    fn new(tree: &'a FieldTree, start: NodeId) -> Self {
        let mut stack = Vec::new();
        if tree.contains(start) {
            stack.push((start, false));
        }
        Self { tree, stack }
    }
}

impl<'a> Iterator for PostOrderIterator<'a> {
    type Item = (NodeId, &'a FieldNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((current_idx, visited)) = self.stack.pop() {
            if let Some(node) = self.tree.get(current_idx) {
                if !visited {
                    self.stack.push((current_idx, true));
                    for &child in node.children.iter().rev() {
                        self.stack.push((child, false));
                    }
                } else {
                    return Some((current_idx, node));
                }
            }
        }
        None
    }
}

pub trait TreeNodeConvert {
    fn to_tree_string(&self) -> Tree<String>;
}

impl TreeNodeConvert for FieldTree {
    fn to_tree_string(&self) -> Tree<String> {
        fn label(node: &FieldNode) -> String {
            let key = node
                .key
                .as_ref()
                .map(|k| match k {
                    PathToken::Index(TEMPLATE_INDEX) => "[template]".to_string(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "/".to_string());
            match node.kind {
                NodeKind::Field => {
                    let value = node
                        .authoritative_value()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    match (&node.formula, node.is_overridden()) {
                        (Some(f), true) => format!("{} = {} (override of `{}`)", key, value, f),
                        (Some(f), false) => format!("{} = {} (`{}`)", key, value, f),
                        (None, _) => format!("{} = {}", key, value),
                    }
                }
                NodeKind::Group | NodeKind::Array => key,
            }
        }

        fn build_tree(tree: &FieldTree, node_idx: NodeId, parent_tree: &mut Tree<String>) {
            if let Some(node) = tree.get(node_idx) {
                for &child_idx in &node.children {
                    if let Some(child) = tree.get(child_idx) {
                        let mut child_tree = Tree::new(label(child));
                        build_tree(tree, child_idx, &mut child_tree);
                        parent_tree.push(child_tree);
                    }
                }
            }
        }

        let mut tree = Tree::new("/".to_string());
        build_tree(self, self.root, &mut tree);
        tree
    }
}
