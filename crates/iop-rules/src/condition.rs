//! Rule conditions and hit templates
//!
//! Conditions are written in YAML next to the rule content and compiled
//! once at catalog load. A compiled [`Condition`] is a tree of `all`,
//! `any` and `not` nodes over predicates:
//!
//! ```yaml
//! all:
//!   - fact: cluster_version
//!     path: status.desired.version
//!     op: version_lt
//!     value: "4.10"
//!   - fact: nodes
//!     path: status.ready
//!     op: eq
//!     value: false
//! ```
//!
//! On a multi-document fact a predicate holds if any document satisfies
//! it, and the names of the satisfying documents are collected so a
//! template can report them through `$matched`.

use crate::error::ConditionError;
use crate::facts::{lookup, Fact, FactBase};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Template binding that expands to the matched document names
pub const MATCHED_BINDING: &str = "$matched";

/// Predicate operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Dotted version strictly older
    VersionLt,
    /// Dotted version equal or newer
    VersionGe,
    /// String contains substring, or array contains element
    Contains,
    /// Value is one of a list
    In,
    /// String matches a regular expression
    Matches,
    /// Value present and not null
    Exists,
    /// Value absent or null
    Missing,
}

impl Op {
    /// Operator name as written in YAML
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::VersionLt => "version_lt",
            Self::VersionGe => "version_ge",
            Self::Contains => "contains",
            Self::In => "in",
            Self::Matches => "matches",
            Self::Exists => "exists",
            Self::Missing => "missing",
        }
    }

    fn takes_value(self) -> bool {
        !matches!(self, Self::Exists | Self::Missing)
    }
}

/// Condition as written in rule metadata
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConditionDef {
    /// Every child holds
    All {
        /// Children
        all: Vec<ConditionDef>,
    },
    /// At least one child holds
    Any {
        /// Children
        any: Vec<ConditionDef>,
    },
    /// Child does not hold
    Not {
        /// Child
        not: Box<ConditionDef>,
    },
    /// Leaf predicate
    Predicate(PredicateDef),
}

/// Leaf predicate as written in rule metadata
#[derive(Debug, Clone, Deserialize)]
pub struct PredicateDef {
    /// Fact id
    pub fact: String,
    /// Dot path inside the fact
    #[serde(default)]
    pub path: Option<String>,
    /// Operator
    pub op: Op,
    /// Right-hand operand
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
enum Operand {
    None,
    Value(Value),
    Set(Vec<Value>),
    Pattern(Regex),
}

/// Compiled predicate
#[derive(Debug, Clone)]
pub struct Predicate {
    fact: String,
    path: Option<String>,
    op: Op,
    operand: Operand,
}

/// Compiled condition tree
#[derive(Debug, Clone)]
pub enum Condition {
    /// Every child holds
    All(Vec<Condition>),
    /// At least one child holds
    Any(Vec<Condition>),
    /// Child does not hold
    Not(Box<Condition>),
    /// Leaf
    Predicate(Predicate),
}

/// Result of evaluating a condition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the condition holds
    pub holds: bool,
    /// Names of multi-document fact entries that satisfied a predicate
    pub matched: Vec<String>,
}

impl Outcome {
    fn from_bool(holds: bool) -> Self {
        Self {
            holds,
            matched: Vec::new(),
        }
    }
}

impl Condition {
    /// Compile a definition, validating operands and regexes
    pub fn compile(def: &ConditionDef) -> Result<Self, String> {
        match def {
            ConditionDef::All { all } => Ok(Self::All(compile_children("all", all)?)),
            ConditionDef::Any { any } => Ok(Self::Any(compile_children("any", any)?)),
            ConditionDef::Not { not } => Ok(Self::Not(Box::new(Self::compile(not)?))),
            ConditionDef::Predicate(p) => Predicate::compile(p).map(Self::Predicate),
        }
    }

    /// Fact ids referenced anywhere in the tree
    #[must_use]
    pub fn required_facts(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_facts(&mut out);
        out
    }

    fn collect_facts<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::All(children) | Self::Any(children) => {
                for child in children {
                    child.collect_facts(out);
                }
            }
            Self::Not(child) => child.collect_facts(out),
            Self::Predicate(p) => {
                out.insert(p.fact.as_str());
            }
        }
    }

    /// Evaluate against a fact base
    pub fn evaluate(&self, facts: &FactBase) -> Result<Outcome, ConditionError> {
        match self {
            Self::All(children) => {
                let mut matched = Vec::new();
                for child in children {
                    let outcome = child.evaluate(facts)?;
                    if !outcome.holds {
                        return Ok(Outcome::from_bool(false));
                    }
                    matched.extend(outcome.matched);
                }
                Ok(Outcome {
                    holds: true,
                    matched,
                })
            }
            Self::Any(children) => {
                for child in children {
                    let outcome = child.evaluate(facts)?;
                    if outcome.holds {
                        return Ok(outcome);
                    }
                }
                Ok(Outcome::from_bool(false))
            }
            Self::Not(child) => Ok(Outcome::from_bool(!child.evaluate(facts)?.holds)),
            Self::Predicate(p) => p.evaluate(facts),
        }
    }
}

fn compile_children(name: &str, defs: &[ConditionDef]) -> Result<Vec<Condition>, String> {
    if defs.is_empty() {
        return Err(format!("'{name}' needs at least one child"));
    }
    defs.iter().map(Condition::compile).collect()
}

impl Predicate {
    fn compile(def: &PredicateDef) -> Result<Self, String> {
        if def.fact.trim().is_empty() {
            return Err("predicate has an empty fact id".to_string());
        }
        let op = def.op;
        let operand = match (&def.value, op.takes_value()) {
            (Some(_), false) => return Err(format!("operator {} takes no value", op.name())),
            (None, false) => Operand::None,
            (None, true) => return Err(format!("operator {} needs a value", op.name())),
            (Some(value), true) => match op {
                Op::In => match value {
                    Value::Array(items) => Operand::Set(items.clone()),
                    _ => return Err("operator in needs a list value".to_string()),
                },
                Op::Matches => match value {
                    Value::String(pattern) => Operand::Pattern(
                        Regex::new(pattern).map_err(|e| format!("invalid regex: {e}"))?,
                    ),
                    _ => return Err("operator matches needs a string pattern".to_string()),
                },
                _ => Operand::Value(value.clone()),
            },
        };
        Ok(Self {
            fact: def.fact.clone(),
            path: def.path.clone().filter(|p| !p.is_empty()),
            op,
            operand,
        })
    }

    /// Fact id this predicate reads
    #[inline]
    #[must_use]
    pub fn fact(&self) -> &str {
        &self.fact
    }

    fn evaluate(&self, facts: &FactBase) -> Result<Outcome, ConditionError> {
        let fact = facts
            .get(&self.fact)
            .ok_or_else(|| ConditionError::MissingFact(self.fact.clone()))?;
        match fact {
            Fact::Document(doc) => self.test(self.target(doc)).map(Outcome::from_bool),
            Fact::Documents(docs) => {
                let mut matched = Vec::new();
                for doc in docs {
                    if self.test(self.target(&doc.value))? {
                        matched.push(doc.name.clone());
                    }
                }
                Ok(Outcome {
                    holds: !matched.is_empty(),
                    matched,
                })
            }
            Fact::Text(_) | Fact::Lines(_) => {
                let value = fact.to_json();
                self.test(self.target(&value)).map(Outcome::from_bool)
            }
        }
    }

    fn target<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match &self.path {
            Some(path) => lookup(value, path),
            None => Some(value),
        }
    }

    fn test(&self, target: Option<&Value>) -> Result<bool, ConditionError> {
        let target = match target {
            None | Some(Value::Null) => return Ok(self.op == Op::Missing),
            Some(v) => v,
        };
        let op = self.op;
        match (&self.operand, op) {
            (_, Op::Exists) => Ok(true),
            (_, Op::Missing) => Ok(false),
            (Operand::Value(v), Op::Eq) => Ok(loose_eq(target, v)),
            (Operand::Value(v), Op::Ne) => Ok(!loose_eq(target, v)),
            (Operand::Value(v), Op::Lt | Op::Le | Op::Gt | Op::Ge) => {
                let ord = order(op, target, v)?;
                Ok(match op {
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                    Op::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })
            }
            (Operand::Value(v), Op::VersionLt | Op::VersionGe) => {
                let left = version_text(op, target)?;
                let right = version_text(op, v)?;
                let ord = compare_versions(&left, &right);
                Ok(if op == Op::VersionLt {
                    ord == Ordering::Less
                } else {
                    ord != Ordering::Less
                })
            }
            (Operand::Value(v), Op::Contains) => match (target, v) {
                (Value::String(s), Value::String(needle)) => Ok(s.contains(needle.as_str())),
                (Value::Array(items), needle) => Ok(items.iter().any(|i| loose_eq(i, needle))),
                (Value::String(_), other) => Err(ConditionError::TypeMismatch {
                    op: op.name(),
                    expected: "string",
                    found: kind(other),
                }),
                (other, _) => Err(ConditionError::TypeMismatch {
                    op: op.name(),
                    expected: "string or array",
                    found: kind(other),
                }),
            },
            (Operand::Set(items), Op::In) => Ok(items.iter().any(|i| loose_eq(target, i))),
            (Operand::Pattern(re), Op::Matches) => match target {
                Value::String(s) => Ok(re.is_match(s)),
                other => Err(ConditionError::TypeMismatch {
                    op: op.name(),
                    expected: "string",
                    found: kind(other),
                }),
            },
            _ => Err(ConditionError::TypeMismatch {
                op: op.name(),
                expected: "a compatible operand",
                found: kind(target),
            }),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(op: Op, left: &Value, right: &Value) -> Result<Ordering, ConditionError> {
    match (left, right) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .ok_or(ConditionError::NotComparable {
                op: op.name(),
                left: "number",
                right: "number",
            }),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ConditionError::NotComparable {
            op: op.name(),
            left: kind(left),
            right: kind(right),
        }),
    }
}

fn version_text(op: Op, value: &Value) -> Result<String, ConditionError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ConditionError::TypeMismatch {
            op: op.name(),
            expected: "version string",
            found: kind(other),
        }),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum VersionPart<'a> {
    Num(u64),
    Tag(&'a str),
}

fn version_parts(version: &str) -> Vec<VersionPart<'_>> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    version
        .split(['.', '-', '+', '_'])
        .filter(|p| !p.is_empty())
        .map(|p| p.parse().map_or(VersionPart::Tag(p), VersionPart::Num))
        .collect()
}

/// Compare dotted versions component by component
///
/// Numeric components compare numerically and rank above textual tags, so
/// `4.10.0` is newer than `4.10.0-rc1`. Missing trailing components count
/// as zero.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = version_parts(a);
    let right = version_parts(b);
    for i in 0..left.len().max(right.len()) {
        let ord = match (left.get(i), right.get(i)) {
            (Some(x), Some(y)) => compare_part(x, y),
            (Some(x), None) => against_absent(x),
            (None, Some(y)) => against_absent(y).reverse(),
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_part(a: &VersionPart<'_>, b: &VersionPart<'_>) -> Ordering {
    match (a, b) {
        (VersionPart::Num(x), VersionPart::Num(y)) => x.cmp(y),
        (VersionPart::Tag(x), VersionPart::Tag(y)) => x.cmp(y),
        (VersionPart::Num(_), VersionPart::Tag(_)) => Ordering::Greater,
        (VersionPart::Tag(_), VersionPart::Num(_)) => Ordering::Less,
    }
}

fn against_absent(part: &VersionPart<'_>) -> Ordering {
    match part {
        VersionPart::Num(0) => Ordering::Equal,
        VersionPart::Num(_) => Ordering::Greater,
        VersionPart::Tag(_) => Ordering::Less,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Matched,
    Fact { fact: String, path: Option<String> },
}

/// Template producing a rule hit's `template_data`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    bindings: Vec<(String, Binding)>,
}

impl Template {
    /// Compile `key: binding` pairs
    ///
    /// A binding is `$matched`, `<fact>` or `<fact>:<dot path>`.
    pub fn compile(raw: &BTreeMap<String, String>) -> Result<Self, String> {
        let bindings = raw
            .iter()
            .map(|(key, expr)| {
                let expr = expr.trim();
                let binding = if expr == MATCHED_BINDING {
                    Binding::Matched
                } else {
                    let (fact, path) = match expr.split_once(':') {
                        Some((fact, path)) => (fact, Some(path.to_string())),
                        None => (expr, None),
                    };
                    if fact.is_empty() {
                        return Err(format!("template key '{key}' has an empty binding"));
                    }
                    Binding::Fact {
                        fact: fact.to_string(),
                        path: path.filter(|p| !p.is_empty()),
                    }
                };
                Ok((key.clone(), binding))
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self { bindings })
    }

    /// Check for a template with no bindings
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Render bindings; unavailable facts render as null
    #[must_use]
    pub fn render(&self, facts: &FactBase, outcome: &Outcome) -> Map<String, Value> {
        self.bindings
            .iter()
            .map(|(key, binding)| {
                let value = match binding {
                    Binding::Matched => Value::Array(
                        outcome.matched.iter().cloned().map(Value::String).collect(),
                    ),
                    Binding::Fact { fact, path } => facts
                        .get(fact)
                        .map_or(Value::Null, |f| f.resolve(path.as_deref())),
                };
                (key.clone(), value)
            })
            .collect()
    }
}
