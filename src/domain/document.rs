//! Form documents: field definitions plus initial data, loaded in bulk.
//!
//! ```toml
//! [[fields]]
//! key = "str"
//! value = 14
//!
//! [[fields]]
//! key = "attacks"
//! template = [ { key = "bonus", value = 0 }, { key = "total", formula = "sum ./bonus /str" } ]
//! items = [ { bonus = 2 }, { bonus = 5 } ]
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::path::{parse_piece, NodePath, PathToken};
use crate::domain::tree::NodeKind;
use crate::domain::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormDocument {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// One node definition. A `template` makes it an array, nested `fields`
/// a group, otherwise it is a plain field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Vec<FieldDef>>,
    /// Array elements, keyed by paths relative to the element
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<BTreeMap<String, Value>>,
}

impl FieldDef {
    pub fn kind(&self) -> NodeKind {
        if self.template.is_some() {
            NodeKind::Array
        } else if !self.fields.is_empty() {
            NodeKind::Group
        } else {
            NodeKind::Field
        }
    }

    fn validate(&self, parent: &NodePath) -> DomainResult<()> {
        let invalid = |reason: String| DomainError::InvalidDocument(format!("{}: {}", parent.child(PathToken::id(&self.key)), reason));
        match parse_piece(&self.key).as_deref() {
            Some([PathToken::Id(_)]) => {}
            _ => return Err(invalid("key must be a plain identifier".into())),
        }
        let path = parent.child(PathToken::id(&self.key));
        let kind = self.kind();
        if kind != NodeKind::Field && (self.value.is_some() || self.formula.is_some()) {
            return Err(invalid("only plain fields carry a value or formula".into()));
        }
        if kind == NodeKind::Array && !self.fields.is_empty() {
            return Err(invalid("an array defines its element through `template`".into()));
        }
        if kind != NodeKind::Array && !self.items.is_empty() {
            return Err(invalid("`items` requires a `template`".into()));
        }
        for item in &self.items {
            for key in item.keys() {
                NodePath::parse(key).map_err(|e| invalid(e.to_string()))?;
            }
        }
        let children = self.template.as_deref().unwrap_or(&self.fields);
        validate_siblings(children, &path)
    }
}

fn validate_siblings(defs: &[FieldDef], parent: &NodePath) -> DomainResult<()> {
    let mut seen = HashSet::new();
    for def in defs {
        if !seen.insert(def.key.as_str()) {
            return Err(DomainError::InvalidDocument(format!(
                "duplicate key '{}' under {}",
                def.key, parent
            )));
        }
        def.validate(parent)?;
    }
    Ok(())
}

impl FormDocument {
    /// Structural checks that do not need a tree.
    pub fn validate(&self) -> DomainResult<()> {
        validate_siblings(&self.fields, &NodePath::root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(key: &str) -> FieldDef {
        FieldDef {
            key: key.into(),
            ..Default::default()
        }
    }

    #[test]
    fn given_defs_when_kind_then_derived_from_shape() {
        let mut group = field("g");
        group.fields.push(field("a"));
        let mut array = field("arr");
        array.template = Some(vec![field("x")]);
        assert_eq!(field("a").kind(), NodeKind::Field);
        assert_eq!(group.kind(), NodeKind::Group);
        assert_eq!(array.kind(), NodeKind::Array);
    }

    #[test]
    fn given_duplicate_siblings_when_validate_then_error() {
        let doc = FormDocument {
            fields: vec![field("a"), field("a")],
        };
        assert!(matches!(doc.validate(), Err(DomainError::InvalidDocument(_))));
    }

    #[test]
    fn given_group_with_value_when_validate_then_error() {
        let mut group = field("g");
        group.fields.push(field("a"));
        group.value = Some(Value::Int(1));
        let doc = FormDocument { fields: vec![group] };
        assert!(doc.validate().is_err());
    }

    #[test]
    fn given_bad_key_when_validate_then_error() {
        let doc = FormDocument {
            fields: vec![field("a.b")],
        };
        assert!(doc.validate().is_err());
        let doc = FormDocument {
            fields: vec![field("a[0]")],
        };
        assert!(doc.validate().is_err());
    }

    #[test]
    fn given_items_without_template_when_validate_then_error() {
        let mut plain = field("a");
        plain.items.push(BTreeMap::from([("x".to_string(), Value::Int(1))]));
        let doc = FormDocument { fields: vec![plain] };
        assert!(doc.validate().is_err());
    }
}
