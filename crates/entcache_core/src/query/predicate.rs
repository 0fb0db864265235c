//! Filter predicates.

use crate::value::Value;
use std::cmp::Ordering;

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Text contains.
    Contains,
    /// Text starts with.
    StartsWith,
    /// Text ends with.
    EndsWith,
}

impl Operator {
    /// Parses an operator token (`eq`, `==`, `startswith`, ...).
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token.to_ascii_lowercase().as_str() {
            "eq" | "==" | "=" => Operator::Eq,
            "ne" | "!=" | "<>" => Operator::Ne,
            "lt" | "<" => Operator::Lt,
            "le" | "<=" => Operator::Le,
            "gt" | ">" => Operator::Gt,
            "ge" | ">=" => Operator::Ge,
            "contains" | "substringof" => Operator::Contains,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            _ => return None,
        })
    }

    /// Returns true for the text function operators.
    pub fn is_text_function(self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith
        )
    }

    /// Applies the operator to two values.
    ///
    /// Ordering comparisons involving null are false. Text functions
    /// require text on both sides and are case sensitive.
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            Operator::Eq => left.compare(right) == Some(Ordering::Equal),
            Operator::Ne => left.compare(right) != Some(Ordering::Equal),
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                if left.is_null() || right.is_null() {
                    return false;
                }
                match left.compare(right) {
                    Some(ord) => match self {
                        Operator::Lt => ord == Ordering::Less,
                        Operator::Le => ord != Ordering::Greater,
                        Operator::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    },
                    None => false,
                }
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let (Some(l), Some(r)) = (left.as_text(), right.as_text()) else {
                    return false;
                };
                match self {
                    Operator::Contains => l.contains(r),
                    Operator::StartsWith => l.starts_with(r),
                    _ => l.ends_with(r),
                }
            }
        }
    }
}

/// A boolean filter over entity properties.
///
/// Property names may be dotted paths through scalar navigations
/// (`Customer.City`).
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `property <operator> value`.
    Compare {
        /// Property path.
        property: String,
        /// Operator.
        operator: Operator,
        /// Right-hand literal.
        value: Value,
    },
    /// Both sides hold.
    And(Box<Predicate>, Box<Predicate>),
    /// Either side holds.
    Or(Box<Predicate>, Box<Predicate>),
    /// The inner predicate does not hold.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Creates a comparison.
    pub fn compare(
        property: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Predicate::Compare {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    /// `property eq value`.
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, Operator::Eq, value)
    }

    /// `property ne value`.
    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, Operator::Ne, value)
    }

    /// `property lt value`.
    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, Operator::Lt, value)
    }

    /// `property le value`.
    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, Operator::Le, value)
    }

    /// `property gt value`.
    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, Operator::Gt, value)
    }

    /// `property ge value`.
    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, Operator::Ge, value)
    }

    /// Text contains.
    pub fn contains(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Operator::Contains, value.into())
    }

    /// Text starts with.
    pub fn starts_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Operator::StartsWith, value.into())
    }

    /// Text ends with.
    pub fn ends_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Operator::EndsWith, value.into())
    }

    /// Conjunction.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Disjunction.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// Evaluates the predicate, reading property values through `lookup`.
    pub fn evaluate<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Value,
    {
        match self {
            Predicate::Compare {
                property,
                operator,
                value,
            } => operator.apply(&lookup(property), value),
            Predicate::And(a, b) => a.evaluate(lookup) && b.evaluate(lookup),
            Predicate::Or(a, b) => a.evaluate(lookup) || b.evaluate(lookup),
            Predicate::Not(inner) => !inner.evaluate(lookup),
        }
    }

    /// Every property path the predicate reads.
    pub fn properties(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out
    }

    fn collect_properties<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { property, .. } => out.push(property),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_properties(out);
                b.collect_properties(out);
            }
            Predicate::Not(inner) => inner.collect_properties(out),
        }
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}
