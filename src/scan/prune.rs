//! Bounds evaluation against manifest statistics.
//!
//! Pruning is strictly fail-open: a file or manifest is excluded only when
//! the statistics prove no row can match. Absent or undecodable statistics
//! always evaluate to [`TriState::Unknown`], which retains the file.

use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use std::cmp::Ordering;

use crate::expr::{CmpOp, ColumnFilter, TriState};
use crate::manifest::{FieldSummary, ManifestEntry};
use crate::spec::values::decode_bound;
use crate::spec::Transform;

/// Min/max/null/nan statistics for one column, decoded into comparable
/// values. `lower`/`upper` are `None` when the writer recorded no bound.
#[derive(Clone, Debug, Default)]
pub struct BoundsStats {
    pub lower: Option<ScalarValue>,
    pub upper: Option<ScalarValue>,
    /// `None` when the writer recorded no null count; null knowledge must
    /// stay tri-valued or `IS NULL` pruning stops being fail-open.
    pub has_null: Option<bool>,
    pub has_nan: bool,
    /// Every value in the file is null; comparison predicates cannot match.
    pub all_null: bool,
}

impl BoundsStats {
    /// Statistics for one column of a manifest entry, with bounds decoded
    /// through the column's declared type.
    pub fn for_entry(entry: &ManifestEntry, field_id: i32, data_type: &DataType) -> Self {
        let lower = entry
            .lower_bounds
            .get(&field_id)
            .and_then(|blob| decode_bound(blob, data_type));
        let upper = entry
            .upper_bounds
            .get(&field_id)
            .and_then(|blob| decode_bound(blob, data_type));
        let null_count = entry.null_value_counts.get(&field_id).copied();
        let nan_count = entry.nan_value_counts.get(&field_id).copied();
        BoundsStats {
            lower,
            upper,
            has_null: null_count.map(|n| n > 0),
            has_nan: nan_count.is_some_and(|n| n > 0),
            all_null: null_count.is_some_and(|n| n > 0 && n == entry.record_count),
        }
    }

    /// Statistics from a manifest-list field summary. Bounds live in the
    /// transformed partition domain, so the caller passes the transform's
    /// result type.
    pub fn for_summary(summary: &FieldSummary, result_type: &DataType) -> Self {
        BoundsStats {
            lower: summary
                .lower_bound
                .as_deref()
                .and_then(|blob| decode_bound(blob, result_type)),
            upper: summary
                .upper_bound
                .as_deref()
                .and_then(|blob| decode_bound(blob, result_type)),
            has_null: summary.contains_null,
            has_nan: summary.contains_nan.unwrap_or(false),
            all_null: false,
        }
    }
}

/// Can any row satisfying `filter` exist given `stats`?
///
/// `transform` is identity for raw-column statistics; for partition
/// summaries it is the partition field's transform, and predicate constants
/// are translated into the transformed domain before comparing.
pub fn match_bounds(filter: &ColumnFilter, stats: &BoundsStats, transform: &Transform) -> bool {
    eval_filter(filter, stats, transform) != TriState::False
}

fn eval_filter(filter: &ColumnFilter, stats: &BoundsStats, transform: &Transform) -> TriState {
    match filter {
        ColumnFilter::Comparison { op, value } => {
            let Some((op, value)) = transform.translate_comparison(*op, value) else {
                return TriState::Unknown;
            };
            eval_cmp_bounds(op, &value, stats)
        }
        ColumnFilter::IsNull { negated } => {
            if *negated {
                // IS NOT NULL: unsatisfiable only when the column holds
                // nothing but nulls.
                if stats.all_null {
                    TriState::False
                } else {
                    TriState::Unknown
                }
            } else if stats.has_null == Some(false) {
                // Only a recorded zero null count proves no row matches.
                TriState::False
            } else {
                TriState::Unknown
            }
        }
        ColumnFilter::Conjunction(parts) => {
            let mut result = TriState::True;
            for part in parts {
                result = result.and(eval_filter(part, stats, transform));
                if result == TriState::False {
                    break;
                }
            }
            result
        }
    }
}

fn eval_cmp_bounds(op: CmpOp, value: &ScalarValue, stats: &BoundsStats) -> TriState {
    // Comparisons only ever match non-null values.
    if stats.all_null {
        return TriState::False;
    }
    // NaN is not ordered against the bounds and may even have been written
    // into them; the range test is meaningless then.
    if stats.has_nan {
        return TriState::Unknown;
    }
    let (Some(lower), Some(upper)) = (&stats.lower, &stats.upper) else {
        return TriState::Unknown;
    };
    let lower_cmp = lower.partial_cmp(value);
    let upper_cmp = upper.partial_cmp(value);

    match op {
        CmpOp::Eq => {
            if lower_cmp == Some(Ordering::Greater) || upper_cmp == Some(Ordering::Less) {
                return TriState::False;
            }
            if lower == upper && lower == value && stats.has_null == Some(false) {
                return TriState::True;
            }
            TriState::Unknown
        }
        CmpOp::NotEq => {
            if lower == upper && lower == value && stats.has_null == Some(false) {
                return TriState::False;
            }
            TriState::Unknown
        }
        CmpOp::Lt => {
            if lower_cmp == Some(Ordering::Greater) || lower_cmp == Some(Ordering::Equal) {
                return TriState::False;
            }
            if upper_cmp == Some(Ordering::Less) && stats.has_null == Some(false) {
                return TriState::True;
            }
            TriState::Unknown
        }
        CmpOp::LtEq => {
            if lower_cmp == Some(Ordering::Greater) {
                return TriState::False;
            }
            if matches!(upper_cmp, Some(Ordering::Less | Ordering::Equal))
                && stats.has_null == Some(false)
            {
                return TriState::True;
            }
            TriState::Unknown
        }
        CmpOp::Gt => {
            if upper_cmp == Some(Ordering::Less) || upper_cmp == Some(Ordering::Equal) {
                return TriState::False;
            }
            if lower_cmp == Some(Ordering::Greater) && stats.has_null == Some(false) {
                return TriState::True;
            }
            TriState::Unknown
        }
        CmpOp::GtEq => {
            if upper_cmp == Some(Ordering::Less) {
                return TriState::False;
            }
            if matches!(lower_cmp, Some(Ordering::Greater | Ordering::Equal))
                && stats.has_null == Some(false)
            {
                return TriState::True;
            }
            TriState::Unknown
        }
    }
}
