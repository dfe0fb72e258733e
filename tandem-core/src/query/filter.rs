use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::item::Item;

/// Comparison applied to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "in")]
    In,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::In => "in",
        }
    }
}

/// `field <comparator> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: String,
    pub comparator: Comparator,
    pub value: Value,
}

impl Comparison {
    pub fn new(field: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            comparator,
            value: value.into(),
        }
    }

    /// Missing fields compare as `null`.
    pub fn matches(&self, item: &Item) -> bool {
        let actual = item.field(&self.field).unwrap_or(Value::Null);
        match self.comparator {
            Comparator::Eq => values_equal(&actual, &self.value),
            Comparator::Ne => !values_equal(&actual, &self.value),
            Comparator::Lt => compare_values(&actual, &self.value) == Some(Ordering::Less),
            Comparator::Le => matches!(
                compare_values(&actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparator::Gt => compare_values(&actual, &self.value) == Some(Ordering::Greater),
            Comparator::Ge => matches!(
                compare_values(&actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparator::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| values_equal(&actual, o)),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.comparator.as_str(), self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    Comparison(Comparison),
    Filter(Filter),
}

impl FilterNode {
    fn matches(&self, item: &Item) -> bool {
        match self {
            FilterNode::Comparison(comparison) => comparison.matches(item),
            FilterNode::Filter(filter) => filter.matches(item),
        }
    }
}

/// A tree of comparisons joined by AND/OR connectors.
///
/// A filter without children matches every item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub connector: Connector,
    pub children: Vec<FilterNode>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl Filter {
    /// The empty filter.
    pub fn all() -> Self {
        Self {
            connector: Connector::And,
            children: Vec::new(),
        }
    }

    /// A filter holding a single comparison.
    pub fn compare(
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            connector: Connector::And,
            children: vec![FilterNode::Comparison(Comparison::new(
                field, comparator, value,
            ))],
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Adds `child` under this node. Children sharing this node's connector,
    /// or holding a single node, are flattened into it.
    pub fn add(&mut self, child: Filter) {
        let already_present = self
            .children
            .iter()
            .any(|node| matches!(node, FilterNode::Filter(existing) if *existing == child));
        if already_present {
            return;
        }
        if child.connector == self.connector || child.len() == 1 {
            self.children.extend(child.children);
        } else {
            self.children.push(FilterNode::Filter(child));
        }
    }

    pub fn combine(&self, other: &Filter, connector: Connector) -> Filter {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut combined = Filter {
            connector,
            children: Vec::new(),
        };
        combined.add(self.clone());
        combined.add(other.clone());
        combined
    }

    pub fn and(&self, other: &Filter) -> Filter {
        self.combine(other, Connector::And)
    }

    pub fn or(&self, other: &Filter) -> Filter {
        self.combine(other, Connector::Or)
    }

    pub fn matches(&self, item: &Item) -> bool {
        match self.connector {
            Connector::And => self.children.iter().all(|c| c.matches(item)),
            Connector::Or => {
                self.children.is_empty() || self.children.iter().any(|c| c.matches(item))
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

/// Orders two JSON values of the same kind. Values of different kinds have no
/// order.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Total order used for sorting query results: null, booleans, numbers,
/// strings, then everything else.
pub(crate) fn sort_values(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare_values(left, right).unwrap_or_else(|| rank(left).cmp(&rank(right)))
}
