//! Dotted/indexed field paths, e.g. `attacks[2].bonus`

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::{DomainError, DomainResult};

/// One piece of a path: either a field id or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    Id(String),
    Index(i64),
}

impl PathToken {
    pub fn id(s: impl Into<String>) -> Self {
        PathToken::Id(s.into())
    }
}

// Ids sort lexically, indices numerically, ids before indices.
impl Ord for PathToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PathToken::Id(a), PathToken::Id(b)) => a.cmp(b),
            (PathToken::Index(a), PathToken::Index(b)) => a.cmp(b),
            (PathToken::Id(_), PathToken::Index(_)) => Ordering::Less,
            (PathToken::Index(_), PathToken::Id(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for PathToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Id(id) => write!(f, "{}", id),
            PathToken::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// `name[1][-1]`, `name`, or `[3]`
pub(crate) static PIECE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_\-]*)?((?:\[-?[0-9]+\])*)$").expect("piece regex")
});

static INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(-?[0-9]+)\]").expect("index regex"));

/// Split one dot-separated piece into tokens. Returns `None` when malformed.
pub(crate) fn parse_piece(piece: &str) -> Option<Vec<PathToken>> {
    let caps = PIECE_RE.captures(piece)?;
    let mut tokens = Vec::new();
    if let Some(id) = caps.get(1) {
        tokens.push(PathToken::id(id.as_str()));
    }
    let indices = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    for idx in INDEX_RE.captures_iter(indices) {
        tokens.push(PathToken::Index(idx[1].parse().ok()?));
    }
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

/// Absolute path of a node: the token sequence from the root (exclusive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<PathToken>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(tokens: Vec<PathToken>) -> Self {
        Self(tokens)
    }

    /// Parse `a.b[2].c`. A leading `/` is accepted and ignored.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut tokens = Vec::new();
        for piece in trimmed.split('.') {
            let parsed = parse_piece(piece).ok_or_else(|| DomainError::InvalidPath {
                path: s.to_string(),
                reason: format!("malformed piece '{}'", piece),
            })?;
            if parsed.iter().any(|t| matches!(t, PathToken::Index(i) if *i < 0)) {
                return Err(DomainError::InvalidPath {
                    path: s.to_string(),
                    reason: "negative index".to_string(),
                });
            }
            tokens.extend(parsed);
        }
        Ok(Self(tokens))
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, token: PathToken) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token);
        Self(tokens)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Tokens remaining after `prefix`, if `prefix` is a prefix of `self`.
    pub fn strip_prefix(&self, prefix: &NodePath) -> Option<&[PathToken]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Shallower first, then token order.
    pub fn match_order(&self, other: &Self) -> Ordering {
        self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for (i, token) in self.0.iter().enumerate() {
            match token {
                PathToken::Id(id) if i > 0 => write!(f, ".{}", id)?,
                other => write!(f, "{}", other)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_indexed_path_when_parse_then_tokens_split() {
        let path = NodePath::parse("attacks[2].bonus").unwrap();
        assert_eq!(
            path.tokens(),
            &[
                PathToken::id("attacks"),
                PathToken::Index(2),
                PathToken::id("bonus")
            ]
        );
        assert_eq!(path.to_string(), "attacks[2].bonus");
    }

    #[test]
    fn given_leading_slash_when_parse_then_same_path() {
        assert_eq!(
            NodePath::parse("/a.b").unwrap(),
            NodePath::parse("a.b").unwrap()
        );
        assert!(NodePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn given_malformed_path_when_parse_then_error() {
        assert!(NodePath::parse("a..b").is_err());
        assert!(NodePath::parse("a[x]").is_err());
        assert!(NodePath::parse("a[-1]").is_err());
    }

    #[test]
    fn given_indices_when_ordered_then_numeric() {
        let a = NodePath::parse("g[2]").unwrap();
        let b = NodePath::parse("g[10]").unwrap();
        assert!(a < b);
        let shallow = NodePath::parse("z").unwrap();
        assert_eq!(shallow.match_order(&a), Ordering::Less);
    }
}
