use std::cmp::Ordering;
use crate::core::types::Row;
use crate::query::ast::{Condition, Expression, Filter, Operator};

/// Row predicate
pub trait Predicate {
    fn test(&self, row: &Row) -> bool;
}

impl Predicate for Condition {
    /// A missing, Null or incomparable column is a non-match, never an error.
    fn test(&self, row: &Row) -> bool {
        let Some(current) = row.get(&self.property) else {
            return false;
        };
        let Some(ordering) = current.compare(&self.value) else {
            return false;
        };

        match self.op {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
        }
    }
}

impl Predicate for Expression {
    fn test(&self, row: &Row) -> bool {
        match self {
            Expression::Compare(condition) => condition.test(row),
            // Short-circuit on first false
            Expression::And(children) => children.iter().all(|c| c.test(row)),
            // Short-circuit on first true
            Expression::Or(children) => children.iter().any(|c| c.test(row)),
            Expression::Constant(result) => *result,
        }
    }
}

impl Predicate for Filter {
    /// AND over the condition list, left to right, fail-fast
    fn test(&self, row: &Row) -> bool {
        for condition in &self.conditions {
            if !condition.test(row) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Id, Value};

    fn row(a: i64, b: i64) -> Row {
        Row::new(Id::from(a * 10 + b)).with("a", a).with("b", b)
    }

    #[test]
    fn composite_and_selects_only_full_match() {
        let expr = Expression::and(vec![Expression::eq("a", 1), Expression::eq("b", 2)]);
        assert!(expr.test(&row(1, 2)));
        assert!(!expr.test(&row(1, 3)));
    }

    #[test]
    fn or_and_empty_composites() {
        let expr = Expression::or(vec![Expression::eq("b", 9), Expression::lt("a", 2)]);
        assert!(expr.test(&row(1, 3)));
        assert!(Expression::and(vec![]).test(&row(1, 1)));
        assert!(!Expression::or(vec![]).test(&row(1, 1)));
    }

    #[test]
    fn relational_operators() {
        let r = row(5, 0);
        assert!(Expression::gt("a", 4).test(&r));
        assert!(Expression::ge("a", 5).test(&r));
        assert!(!Expression::lt("a", 5).test(&r));
        assert!(Expression::le("a", 5.0).test(&r));
        assert!(Expression::ne("a", 6).test(&r));
    }

    #[test]
    fn missing_or_mistyped_column_never_matches() {
        let r = row(1, 1).with("name", "x").with("gone", Value::Null);
        assert!(!Expression::eq("missing", 1).test(&r));
        assert!(!Expression::ne("missing", 1).test(&r));
        assert!(!Expression::eq("name", 1).test(&r));
        assert!(!Expression::ne("gone", 1).test(&r));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().test(&Row::new(Id::from(1))));
        assert!(!Filter::match_nothing().test(&row(1, 1)));
    }
}
