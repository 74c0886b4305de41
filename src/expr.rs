use std::collections::{BTreeMap, HashMap};
use std::ops::{BitAnd, BitOr, Not};

use datafusion_common::ScalarValue;

/// Three-valued logic for statistics-based pruning.
///
/// `Unknown` means the statistics cannot decide the predicate; pruning only
/// ever acts on a provable `False`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TriState {
    True,
    False,
    Unknown,
}

impl TriState {
    pub(crate) fn and(self, other: Self) -> Self {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Unknown,
        }
    }

    pub(crate) fn or(self, other: Self) -> Self {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }

    pub(crate) fn not(self) -> Self {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }
}

impl BitAnd for TriState {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(rhs)
    }
}

impl BitOr for TriState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(rhs)
    }
}

impl Not for TriState {
    type Output = Self;

    fn not(self) -> Self::Output {
        TriState::not(self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Arbitrary boolean expression handed to complex filter pushdown.
///
/// The planner normalizes this into a conjunctive [`FilterSet`]; parts that
/// cannot be expressed as a single-column filter are simply not pushed.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    True,
    False,
    Cmp {
        column: String,
        op: CmpOp,
        value: ScalarValue,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn cmp(column: impl Into<String>, op: CmpOp, value: ScalarValue) -> Self {
        Expr::Cmp {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: ScalarValue) -> Self {
        Self::cmp(column, CmpOp::Eq, value)
    }

    pub fn lt(column: impl Into<String>, value: ScalarValue) -> Self {
        Self::cmp(column, CmpOp::Lt, value)
    }

    pub fn lt_eq(column: impl Into<String>, value: ScalarValue) -> Self {
        Self::cmp(column, CmpOp::LtEq, value)
    }

    pub fn gt(column: impl Into<String>, value: ScalarValue) -> Self {
        Self::cmp(column, CmpOp::Gt, value)
    }

    pub fn gt_eq(column: impl Into<String>, value: ScalarValue) -> Self {
        Self::cmp(column, CmpOp::GtEq, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Expr::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Expr::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    pub fn and(parts: Vec<Expr>) -> Self {
        Expr::And(parts)
    }

    pub fn or(parts: Vec<Expr>) -> Self {
        Expr::Or(parts)
    }
}

/// A filter pushed down for a single output column.
///
/// This is the closed set the bounds evaluator matches on exhaustively; there
/// is deliberately no escape hatch for opaque predicates.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnFilter {
    Comparison { op: CmpOp, value: ScalarValue },
    IsNull { negated: bool },
    Conjunction(Vec<ColumnFilter>),
}

impl ColumnFilter {
    /// Merge another filter into this one, forming a conjunction.
    fn and_with(self, other: ColumnFilter) -> ColumnFilter {
        match self {
            ColumnFilter::Conjunction(mut parts) => {
                parts.push(other);
                ColumnFilter::Conjunction(parts)
            }
            first => ColumnFilter::Conjunction(vec![first, other]),
        }
    }
}

/// Filters pushed into a scan, keyed by output-column ordinal.
///
/// Column ordinals refer to the bound output schema, not to field-ids; the
/// planner translates through its field-id table where needed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterSet {
    filters: BTreeMap<usize, ColumnFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn get(&self, column: usize) -> Option<&ColumnFilter> {
        self.filters.get(&column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ColumnFilter)> {
        self.filters.iter().map(|(column, filter)| (*column, filter))
    }

    /// Push a filter for a column, conjoining with any filter already there.
    pub fn push(&mut self, column: usize, filter: ColumnFilter) {
        match self.filters.remove(&column) {
            Some(existing) => {
                self.filters.insert(column, existing.and_with(filter));
            }
            None => {
                self.filters.insert(column, filter);
            }
        }
    }

    /// Union of two filter sets, used when deriving a pushed-down planner.
    pub fn union(&self, other: &FilterSet) -> FilterSet {
        let mut result = self.clone();
        for (column, filter) in other.iter() {
            result.push(column, filter.clone());
        }
        result
    }
}

/// Normalize a set of boolean expressions into a conjunctive [`FilterSet`].
///
/// Top-level conjunctions are flattened; each conjunct is kept only when it
/// constrains exactly one known column. Anything else (disjunctions across
/// columns, unknown names, constant `TRUE`) is dropped rather than pushed,
/// which is always safe for pruning.
pub(crate) fn combine_filters(exprs: &[Expr], column_lookup: &HashMap<String, usize>) -> FilterSet {
    let mut set = FilterSet::new();
    for expr in exprs {
        collect_conjuncts(expr, column_lookup, &mut set);
    }
    set
}

fn collect_conjuncts(expr: &Expr, column_lookup: &HashMap<String, usize>, set: &mut FilterSet) {
    match expr {
        Expr::And(parts) => {
            for part in parts {
                collect_conjuncts(part, column_lookup, set);
            }
        }
        other => {
            if let Some((column, filter)) = single_column_filter(other, column_lookup) {
                set.push(column, filter);
            }
        }
    }
}

fn single_column_filter(
    expr: &Expr,
    column_lookup: &HashMap<String, usize>,
) -> Option<(usize, ColumnFilter)> {
    match expr {
        Expr::Cmp { column, op, value } => {
            let idx = *column_lookup.get(column)?;
            Some((
                idx,
                ColumnFilter::Comparison {
                    op: *op,
                    value: value.clone(),
                },
            ))
        }
        Expr::IsNull { column, negated } => {
            let idx = *column_lookup.get(column)?;
            Some((idx, ColumnFilter::IsNull { negated: *negated }))
        }
        Expr::Or(parts) => {
            // Conjunctive normalization cannot represent a real disjunction;
            // only a single-branch OR collapses into a pushable filter.
            let mut branches = parts.iter();
            let (column, filter) = single_column_filter(branches.next()?, column_lookup)?;
            if branches.next().is_some() {
                return None;
            }
            Some((column, filter))
        }
        Expr::And(_) | Expr::True | Expr::False => None,
    }
}
