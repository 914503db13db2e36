use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use crate::core::types::Value;

/// Comparison operator of a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Predicate tree evaluated against one row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    Compare(Condition),       // Equality / relational comparison on one column
    And(Vec<Expression>),     // All children must hold
    Or(Vec<Expression>),      // At least one child must hold
    Constant(bool),           // Always / never
}

/// `property <op> value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub op: Operator,
    pub property: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregate {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// Aggregate applied to the matching rows of a grouped query.
/// `column == "*"` with `Count` counts rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Projection {
    pub aggregate: Aggregate,
    pub column: String,
}

impl Expression {
    fn compare(op: Operator, property: impl Into<String>, value: impl Into<Value>) -> Self {
        Expression::Compare(Condition {
            op,
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Eq, property, value)
    }

    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Ne, property, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Gt, property, value)
    }

    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Ge, property, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Lt, property, value)
    }

    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Le, property, value)
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Expression::And(children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Or(children)
    }
}

/// Condition list, implicitly AND-ed, plus an optional aggregate projection.
///
/// An empty list is the unconditioned full scan; `Filter::all()` matches
/// every row without taking that path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Expression>,
    pub projection: Option<Projection>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn with(mut self, expression: Expression) -> Self {
        self.conditions.push(expression);
        self
    }

    /// Matches every row; unlike an empty filter it is not capped.
    pub fn all() -> Self {
        Filter::new().with(Expression::Constant(true))
    }

    pub fn match_nothing() -> Self {
        Filter::new().with(Expression::Constant(false))
    }

    pub fn project(mut self, aggregate: Aggregate, column: impl Into<String>) -> Self {
        self.projection = Some(Projection {
            aggregate,
            column: column.into(),
        });
        self
    }

    pub fn is_unconditioned(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Drop repeated conditions, keeping first occurrence order.
    pub fn dedup(mut self) -> Self {
        let mut seen = HashSet::new();
        self.conditions.retain(|c| seen.insert(c.clone()));
        self
    }
}
