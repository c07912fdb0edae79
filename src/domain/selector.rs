//! Compiled path selectors with forward and reverse matching.
//!
//! A selector is a path pattern whose index tokens may be the wildcard `-1`.
//! Relative selectors (`./a.b`) resolve against the parent of the formula's
//! anchor node, absolute selectors (`/a.b` or `a.b`) against the root.

use std::fmt;

use tracing::instrument;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::path::{parse_piece, NodePath, PathToken};
use crate::domain::tree::{FieldTree, NodeId, NodeKind};

/// Index token matching any element index.
pub const WILDCARD: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternToken {
    Id(String),
    Index(i64),
    AnyIndex,
}

impl PatternToken {
    pub fn matches(&self, token: &PathToken) -> bool {
        match (self, token) {
            (PatternToken::Id(a), PathToken::Id(b)) => a == b,
            (PatternToken::Index(a), PathToken::Index(b)) => a == b,
            (PatternToken::AnyIndex, PathToken::Index(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PatternToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternToken::Id(id) => write!(f, "{}", id),
            PatternToken::Index(i) => write!(f, "[{}]", i),
            PatternToken::AnyIndex => write!(f, "[{}]", WILDCARD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    source: String,
    relative: bool,
    parts: Vec<PatternToken>,
}

impl Selector {
    /// Compile a selector string.
    pub fn compile(source: &str) -> DomainResult<Self> {
        let invalid = |reason: &str| DomainError::InvalidSelector {
            selector: source.to_string(),
            reason: reason.to_string(),
        };
        let (relative, body) = if let Some(rest) = source.strip_prefix("./") {
            (true, rest)
        } else if let Some(rest) = source.strip_prefix('/') {
            (false, rest)
        } else {
            (false, source)
        };
        if body.is_empty() {
            return Err(invalid("empty pattern"));
        }

        let mut parts = Vec::new();
        for piece in body.split('.') {
            let tokens = parse_piece(piece).ok_or_else(|| invalid(&format!("malformed piece '{}'", piece)))?;
            for token in tokens {
                parts.push(match token {
                    PathToken::Id(id) => PatternToken::Id(id),
                    PathToken::Index(WILDCARD) => PatternToken::AnyIndex,
                    PathToken::Index(i) if i >= 0 => PatternToken::Index(i),
                    PathToken::Index(_) => return Err(invalid("negative index other than -1")),
                });
            }
        }
        Ok(Self {
            source: source.to_string(),
            relative,
            parts,
        })
    }

    /// True for tokens that should be compiled as selectors inside a formula.
    pub fn looks_like_selector(token: &str) -> bool {
        token.starts_with('/') || token.starts_with("./")
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn parts(&self) -> &[PatternToken] {
        &self.parts
    }

    /// True if the last id token of the pattern equals `key`.
    pub fn ends_with_id(&self, key: &str) -> bool {
        self.parts
            .iter()
            .rev()
            .find_map(|p| match p {
                PatternToken::Id(id) => Some(id == key),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// Node the pattern is resolved against for a formula on `anchor`.
    pub fn resolution_base(&self, tree: &FieldTree, anchor: NodeId) -> NodeId {
        if self.relative {
            tree.get(anchor)
                .and_then(|n| n.parent)
                .unwrap_or_else(|| tree.root())
        } else {
            tree.root()
        }
    }

    /// Does the suffix exactly consume the pattern?
    fn matches_tokens(&self, tokens: &[PathToken]) -> bool {
        tokens.len() == self.parts.len()
            && self.parts.iter().zip(tokens).all(|(p, t)| p.matches(t))
    }

    /// All live fields below `base` matched by the pattern.
    ///
    /// Depth-first; a subtree is pruned as soon as the consumed prefix fails,
    /// template subtrees are never entered. The result is ordered shallow
    /// first, then by path.
    #[instrument(level = "trace", skip(self, tree), fields(selector = %self.source))]
    pub fn forward_match(&self, tree: &FieldTree, base: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        if !tree.contains(base) || tree.in_template(base) {
            return found;
        }
        // (node, number of pattern tokens consumed when entering it)
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        if let Some(node) = tree.get(base) {
            for &child in node.children.iter().rev() {
                stack.push((child, 0));
            }
        }
        while let Some((id, consumed)) = stack.pop() {
            let Some(node) = tree.get(id) else { continue };
            if node.is_array_master {
                continue;
            }
            let Some(key) = &node.key else { continue };
            let Some(part) = self.parts.get(consumed) else { continue };
            if !part.matches(key) {
                continue;
            }
            let consumed = consumed + 1;
            if consumed == self.parts.len() {
                if node.kind == NodeKind::Field {
                    found.push(id);
                }
                continue;
            }
            for &child in node.children.iter().rev() {
                stack.push((child, consumed));
            }
        }
        let mut keyed: Vec<(NodePath, NodeId)> = found.into_iter().map(|id| (tree.path(id), id)).collect();
        keyed.sort_by(|a, b| a.0.match_order(&b.0));
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    /// Would `candidate` be part of `forward_match(base)`?
    ///
    /// Absolute selectors compare the whole path, relative ones require
    /// `base_path` as a prefix and match the remaining suffix.
    pub fn reverse_match(&self, tree: &FieldTree, base_path: &NodePath, candidate: NodeId) -> bool {
        let Some(node) = tree.get(candidate) else {
            return false;
        };
        if node.kind != NodeKind::Field || tree.in_template(candidate) {
            return false;
        }
        let path = tree.path(candidate);
        match path.strip_prefix(base_path) {
            Some(suffix) => self.matches_tokens(suffix),
            None => false,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::Value;

    fn group_tree(entries: usize) -> FieldTree {
        let mut tree = FieldTree::new();
        let root = tree.root();
        let group = tree.insert(root, PathToken::id("group"), NodeKind::Array).unwrap();
        let template = tree.insert_template(group).unwrap();
        tree.insert(template, PathToken::id("value"), NodeKind::Field).unwrap();
        for i in 0..entries {
            let created = tree.copy_subtree(template, group, PathToken::Index(i as i64)).unwrap();
            tree.set_value(created[1], Value::Int(i as i64)).unwrap();
        }
        tree
    }

    #[test]
    fn given_selector_strings_when_compile_then_parts_and_flags() {
        let sel = Selector::compile("/group[-1].value").unwrap();
        assert!(!sel.is_relative());
        assert_eq!(
            sel.parts(),
            &[
                PatternToken::Id("group".into()),
                PatternToken::AnyIndex,
                PatternToken::Id("value".into())
            ]
        );
        assert!(Selector::compile("./bonus").unwrap().is_relative());
        assert!(!Selector::compile("str").unwrap().is_relative());
        assert!(Selector::compile("/").is_err());
        assert!(Selector::compile("/a..b").is_err());
        assert!(Selector::compile("/a[-2]").is_err());
    }

    #[test]
    fn given_three_entries_when_forward_match_wildcard_then_three_sorted() {
        let tree = group_tree(3);
        let sel = Selector::compile("/group[-1].value").unwrap();
        let matches = sel.forward_match(&tree, tree.root());
        let paths: Vec<String> = matches.iter().map(|&m| tree.path(m).to_string()).collect();
        assert_eq!(
            paths,
            vec!["group[0].value", "group[1].value", "group[2].value"]
        );
    }

    #[test]
    fn given_exact_index_when_forward_match_then_single() {
        let tree = group_tree(3);
        let sel = Selector::compile("/group[1].value").unwrap();
        let matches = sel.forward_match(&tree, tree.root());
        assert_eq!(matches.len(), 1);
        assert_eq!(tree.path(matches[0]).to_string(), "group[1].value");
    }

    #[test]
    fn given_container_pattern_when_forward_match_then_no_match() {
        let tree = group_tree(2);
        let sel = Selector::compile("/group[-1]").unwrap();
        assert!(sel.forward_match(&tree, tree.root()).is_empty());
    }

    #[test]
    fn given_template_field_when_matching_then_never_matched() {
        let tree = group_tree(0);
        let sel = Selector::compile("/group[-1].value").unwrap();
        assert!(sel.forward_match(&tree, tree.root()).is_empty());
        let template = tree.template(tree.find(&NodePath::parse("group").unwrap()).unwrap()).unwrap();
        let template_field = tree.get(template).unwrap().children[0];
        assert!(!sel.reverse_match(&tree, &NodePath::root(), template_field));
    }

    #[test]
    fn given_relative_selector_when_reverse_match_then_prefix_and_suffix() {
        let tree = group_tree(2);
        let sel = Selector::compile("./value").unwrap();
        let base = NodePath::parse("group[1]").unwrap();
        let v0 = tree.find(&NodePath::parse("group[0].value").unwrap()).unwrap();
        let v1 = tree.find(&NodePath::parse("group[1].value").unwrap()).unwrap();
        assert!(sel.reverse_match(&tree, &base, v1));
        assert!(!sel.reverse_match(&tree, &base, v0));
    }

    #[test]
    fn given_forward_and_reverse_when_compared_then_agree() {
        let tree = group_tree(3);
        let sel = Selector::compile("/group[-1].value").unwrap();
        let forward = sel.forward_match(&tree, tree.root());
        let reverse: Vec<NodeId> = tree
            .fields()
            .into_iter()
            .filter(|&f| sel.reverse_match(&tree, &NodePath::root(), f))
            .collect();
        assert_eq!(forward.len(), reverse.len());
        assert!(reverse.iter().all(|r| forward.contains(r)));
    }
}
