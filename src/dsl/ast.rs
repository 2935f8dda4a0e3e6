//! AST types for the filter DSL.

use std::fmt;

/// Root filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterAst {
    /// All children must hold. Empty means true.
    And(Vec<FilterAst>),

    /// At least one child must hold. Empty means false.
    Or(Vec<FilterAst>),

    /// A single `key[op value]` pair.
    Compare(Comparison),
}

/// One key/value pair of a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub key: Pattern,
    /// `None` accepts any value.
    pub value: Option<Pattern>,
    /// Result when the object has no tag matching `key`.
    pub absent_matches: bool,
}

/// Comparison operator between a tag and a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq, // =
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "="),
            CompareOp::Ne => write!(f, "!="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Le => write!(f, "<="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Ge => write!(f, ">="),
        }
    }
}

/// Placement of `*` in a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wildcard {
    None,
    /// `abc*`
    Prefix,
    /// `*abc`
    Suffix,
    /// `*abc*`
    Contains,
    /// lone `*`
    Any,
}

/// A compiled key or value pattern, backslashes already removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub text: String,
    pub op: CompareOp,
    pub wildcard: Wildcard,
    pub numeric: bool,
}

impl Pattern {
    pub fn exact(text: &str) -> Self {
        Pattern {
            text: text.to_string(),
            op: CompareOp::Eq,
            wildcard: Wildcard::None,
            numeric: false,
        }
    }
}

impl FilterAst {
    /// Flatten nested And/Or and unwrap single-child groups.
    pub fn simplify(self) -> Self {
        match self {
            FilterAst::And(exprs) => Self::flatten(exprs, true),
            FilterAst::Or(exprs) => Self::flatten(exprs, false),
            other => other,
        }
    }

    fn flatten(exprs: Vec<FilterAst>, conjunction: bool) -> Self {
        let mut flat = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match (expr.simplify(), conjunction) {
                (FilterAst::And(inner), true) | (FilterAst::Or(inner), false)
                    if !inner.is_empty() =>
                {
                    flat.extend(inner)
                }
                (other, _) => flat.push(other),
            }
        }
        if flat.len() == 1
            && let Some(only) = flat.pop()
        {
            return only;
        }
        if conjunction {
            FilterAst::And(flat)
        } else {
            FilterAst::Or(flat)
        }
    }

    /// True when any key in the tree starts with `@`.
    pub fn uses_pseudo_keys(&self) -> bool {
        match self {
            FilterAst::And(exprs) | FilterAst::Or(exprs) => {
                exprs.iter().any(FilterAst::uses_pseudo_keys)
            }
            FilterAst::Compare(cmp) => cmp.key.text.starts_with('@'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str) -> FilterAst {
        FilterAst::Compare(Comparison {
            key: Pattern::exact(key),
            value: None,
            absent_matches: false,
        })
    }

    #[test]
    fn simplify_flattens_same_operator() {
        let ast = FilterAst::Or(vec![
            leaf("a"),
            FilterAst::Or(vec![leaf("b"), leaf("c")]),
            FilterAst::And(vec![leaf("d")]),
        ])
        .simplify();
        assert_eq!(ast, FilterAst::Or(vec![leaf("a"), leaf("b"), leaf("c"), leaf("d")]));
    }

    #[test]
    fn simplify_keeps_empty_groups() {
        assert_eq!(FilterAst::Or(vec![]).simplify(), FilterAst::Or(vec![]));
        assert_eq!(
            FilterAst::And(vec![FilterAst::Or(vec![])]).simplify(),
            FilterAst::Or(vec![])
        );
    }
}
