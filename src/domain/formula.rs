//! Formula parsing and evaluation over a fixed operator set.
//!
//! An expression is whitespace separated: the operator first, then arguments.
//! Arguments starting with `/` or `./` are selectors, everything else is a
//! literal. Evaluation never fails; a result that cannot be computed is `None`.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use tracing::trace;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::registry::{CacheRefresh, InstanceId, SelectorRegistry};
use crate::domain::selector::Selector;
use crate::domain::tree::{FieldTree, NodeId};
use crate::domain::value::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Sum,
    Mul,
    Mod,
    Ref,
    Sel,
    CondSumMul,
    CountSpells,
    SizeMod,
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Operator::Sum),
            "mul" => Ok(Operator::Mul),
            "mod" => Ok(Operator::Mod),
            "ref" => Ok(Operator::Ref),
            "sel" => Ok(Operator::Sel),
            "cond_sum_mul" => Ok(Operator::CondSumMul),
            "count_spells" => Ok(Operator::CountSpells),
            "size_mod" => Ok(Operator::SizeMod),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Sum => "sum",
            Operator::Mul => "mul",
            Operator::Mod => "mod",
            Operator::Ref => "ref",
            Operator::Sel => "sel",
            Operator::CondSumMul => "cond_sum_mul",
            Operator::CountSpells => "count_spells",
            Operator::SizeMod => "size_mod",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(Value),
    Selector(InstanceId),
}

/// An argument after its selector matches have been read.
enum Resolved<'a> {
    Literal(&'a Value),
    Matches {
        selector: &'a Selector,
        values: Vec<Option<Value>>,
    },
}

impl Resolved<'_> {
    /// Exactly one value, or indeterminate.
    fn single(&self) -> Option<Value> {
        match self {
            Resolved::Literal(v) => non_void((*v).clone()),
            Resolved::Matches { values, .. } => match values.as_slice() {
                [only] => only.clone().and_then(non_void),
                _ => None,
            },
        }
    }
}

fn non_void(value: Value) -> Option<Value> {
    if value.is_void() {
        None
    } else {
        Some(value)
    }
}

fn flatten(resolved: &[Resolved<'_>]) -> Vec<Option<Value>> {
    resolved
        .iter()
        .flat_map(|r| match r {
            Resolved::Literal(v) => vec![non_void((*v).clone())],
            Resolved::Matches { values, .. } => values.iter().map(|v| v.clone().and_then(non_void)).collect(),
        })
        .collect()
}

/// Size category modifiers.
const SIZE_MODIFIERS: [(&str, i64); 9] = [
    ("fine", 8),
    ("diminutive", 4),
    ("tiny", 2),
    ("small", 1),
    ("medium", 0),
    ("large", -1),
    ("huge", -2),
    ("gargantuan", -4),
    ("colossal", -8),
];

#[derive(Debug, Clone)]
pub struct Formula {
    anchor: NodeId,
    expression: String,
    operator: Operator,
    args: Vec<Argument>,
}

impl Formula {
    /// Parse `expression` for the node `anchor`, registering its selectors.
    ///
    /// On error nothing stays registered.
    pub fn parse(
        registry: &mut SelectorRegistry,
        tree: &FieldTree,
        anchor: NodeId,
        expression: &str,
    ) -> DomainResult<Self> {
        let mut tokens = expression.split_whitespace();
        let op_token = tokens
            .next()
            .ok_or_else(|| DomainError::EmptyFormula(tree.path(anchor).to_string()))?;
        let operator = op_token
            .parse::<Operator>()
            .map_err(|_| DomainError::UnknownOperator {
                operator: op_token.to_string(),
                expression: expression.to_string(),
            })?;

        let mut args = Vec::new();
        let mut acquired: Vec<InstanceId> = Vec::new();
        for token in tokens {
            if Selector::looks_like_selector(token) {
                match registry.acquire(tree, token, anchor, anchor) {
                    Ok((id, _)) => {
                        if !acquired.contains(&id) {
                            acquired.push(id);
                        }
                        args.push(Argument::Selector(id));
                    }
                    Err(e) => {
                        for id in acquired {
                            registry.release(id, anchor);
                        }
                        return Err(e);
                    }
                }
            } else {
                args.push(Argument::Literal(Value::parse_literal(token)));
            }
        }

        Ok(Self {
            anchor,
            expression: expression.to_string(),
            operator,
            args,
        })
    }

    pub fn anchor(&self) -> NodeId {
        self.anchor
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Distinct selector instances referenced, in argument order.
    pub fn instances(&self) -> Vec<InstanceId> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Argument::Selector(id) => Some(*id),
                Argument::Literal(_) => None,
            })
            .unique()
            .collect()
    }

    /// Unregister this formula from all of its selector instances.
    ///
    /// Returns the instances that were dropped from the registry.
    pub fn release(&self, registry: &mut SelectorRegistry) -> Vec<InstanceId> {
        self.instances()
            .into_iter()
            .filter(|&id| registry.release(id, self.anchor).is_some())
            .collect()
    }

    /// Refresh every selector cache, then evaluate.
    pub fn evaluate(&self, registry: &mut SelectorRegistry, tree: &FieldTree, mode: CacheRefresh) -> Option<Value> {
        for id in self.instances() {
            registry.refresh(tree, id, mode);
        }
        self.evaluate_cached(registry, tree)
    }

    /// Evaluate against the current match caches.
    pub fn evaluate_cached(&self, registry: &SelectorRegistry, tree: &FieldTree) -> Option<Value> {
        let mut resolved = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            resolved.push(match arg {
                Argument::Literal(v) => Resolved::Literal(v),
                Argument::Selector(id) => {
                    let instance = registry.get(*id)?;
                    Resolved::Matches {
                        selector: instance.selector(),
                        values: instance
                            .ordered_matches(tree)
                            .into_iter()
                            .map(|m| tree.authoritative_value(m))
                            .collect(),
                    }
                }
            });
        }
        let result = match self.operator {
            Operator::Sum => eval_sum(&resolved),
            Operator::Mul => eval_mul(&resolved),
            Operator::Mod => eval_mod(&resolved),
            Operator::Ref => eval_ref(&resolved),
            Operator::Sel => eval_sel(&resolved),
            Operator::CondSumMul => eval_cond_sum_mul(&resolved),
            Operator::CountSpells => eval_count_spells(&resolved),
            Operator::SizeMod => eval_size_mod(&resolved),
        };
        trace!("{} => {:?}", self.expression, result);
        result
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Sum with boolean toggles: a boolean decides whether the next number counts.
fn sum_terms(terms: &[Option<Value>]) -> Option<Number> {
    let mut total = Number::Int(0);
    let mut include_next = true;
    for term in terms {
        let value = term.as_ref()?;
        if let Some(toggle) = value.as_bool() {
            include_next = toggle;
            continue;
        }
        let n = value.as_number()?;
        if include_next {
            total = total.add(n);
        }
        include_next = true;
    }
    Some(total)
}

fn eval_sum(args: &[Resolved<'_>]) -> Option<Value> {
    let truncate = matches!(args.first(), Some(Resolved::Literal(Value::Str(s))) if s.eq_ignore_ascii_case("trunc"));
    let terms = if truncate { &args[1..] } else { args };
    let total = sum_terms(&flatten(terms))?;
    Some(if truncate { total.trunc() } else { total }.into())
}

fn eval_mul(args: &[Resolved<'_>]) -> Option<Value> {
    flatten(args)
        .iter()
        .try_fold(Number::Int(1), |acc, v| Some(acc.mul(v.as_ref()?.as_number()?)))
        .map(Value::from)
}

fn eval_mod(args: &[Resolved<'_>]) -> Option<Value> {
    let [mode, divisor, terms @ ..] = args else {
        return None;
    };
    let mode = mode.single()?;
    let divisor = divisor.single()?.as_number()?;
    let total = sum_terms(&flatten(terms))?;
    let quotient = total.floor_div(divisor)?;
    let Number::Int(q) = quotient else {
        return None;
    };
    let clamped = match mode.as_str()? {
        "any" => q,
        "pos" => q.max(0),
        "neg" => q.min(0),
        _ => return None,
    };
    Some(Value::Int(clamped))
}

fn eval_ref(args: &[Resolved<'_>]) -> Option<Value> {
    match flatten(args).as_slice() {
        [only] => only.clone(),
        _ => None,
    }
}

fn eval_sel(args: &[Resolved<'_>]) -> Option<Value> {
    let [key, default, candidates @ ..] = args else {
        return None;
    };
    let key = key.single()?;
    let key = key.as_str()?;
    for candidate in candidates {
        let Resolved::Matches { selector, .. } = candidate else {
            return None;
        };
        if selector.ends_with_id(key) {
            return candidate.single();
        }
    }
    default.single()
}

fn halves(values: &[Option<Value>]) -> Option<(&[Option<Value>], &[Option<Value>])> {
    if values.len() % 2 != 0 {
        return None;
    }
    Some(values.split_at(values.len() / 2))
}

fn eval_cond_sum_mul(args: &[Resolved<'_>]) -> Option<Value> {
    let [multiplier, rest @ ..] = args else {
        return None;
    };
    let multiplier = multiplier.single()?.as_number()?;
    let flat = flatten(rest);
    let (conditions, values) = halves(&flat)?;
    let mut total = Number::Int(0);
    for (condition, value) in conditions.iter().zip(values) {
        let condition = condition.as_ref()?.as_bool()?;
        let value = value.as_ref()?.as_number()?;
        total = total.add(if condition { value } else { value.mul(multiplier) });
    }
    Some(total.into())
}

fn eval_count_spells(args: &[Resolved<'_>]) -> Option<Value> {
    let [level, status, rest @ ..] = args else {
        return None;
    };
    let level = level.single()?;
    let status = status.single()?;
    let flat = flatten(rest);
    let (levels, statuses) = halves(&flat)?;
    let mut count = 0i64;
    for (l, s) in levels.iter().zip(statuses) {
        if l.as_ref()? == &level && s.as_ref()? == &status {
            count += 1;
        }
    }
    Some(Value::Int(count))
}

fn eval_size_mod(args: &[Resolved<'_>]) -> Option<Value> {
    let [size] = args else {
        return None;
    };
    let size = size.single()?;
    let size = size.as_str()?.to_ascii_lowercase();
    SIZE_MODIFIERS
        .iter()
        .find(|(name, _)| *name == size)
        .map(|(_, modifier)| Value::Int(*modifier))
}
