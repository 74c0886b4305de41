use std::fmt;
use std::str::FromStr;

use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use serde::{Deserialize, Deserializer};

use crate::expr::CmpOp;

/// Partition transform: a deterministic function from a column value to a
/// partition value.
///
/// Partition-field summaries are stored in the *transformed* domain, so the
/// bounds evaluator translates predicate constants through the transform
/// before comparing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Bucket(u32),
    Truncate(u32),
    Year,
    Month,
    Day,
    Hour,
    Void,
    /// A transform this crate does not know; pruning through it is disabled
    /// (fail-open), the raw name is kept for error messages.
    Unknown(String),
}

impl Transform {
    /// The type a value has after this transform, given the source column
    /// type. Field-summary bounds for the partition field are serialized in
    /// this type.
    pub fn result_type(&self, source: &DataType) -> DataType {
        match self {
            Transform::Identity | Transform::Void => source.clone(),
            Transform::Bucket(_) => DataType::Int32,
            Transform::Truncate(_) => source.clone(),
            Transform::Year | Transform::Month | Transform::Hour => DataType::Int32,
            Transform::Day => DataType::Date32,
            Transform::Unknown(_) => source.clone(),
        }
    }

    /// Whether the transform preserves the source ordering, which is what
    /// makes range predicates usable against transformed bounds.
    fn order_preserving(&self) -> bool {
        matches!(
            self,
            Transform::Identity
                | Transform::Truncate(_)
                | Transform::Year
                | Transform::Month
                | Transform::Day
                | Transform::Hour
        )
    }

    /// Apply the transform to a predicate constant.
    ///
    /// `None` means the value cannot be taken into the transformed domain
    /// (unsupported type or transform); callers must treat that as
    /// "cannot prune".
    pub fn apply(&self, value: &ScalarValue) -> Option<ScalarValue> {
        match self {
            Transform::Identity => Some(value.clone()),
            Transform::Truncate(width) => truncate_value(value, *width),
            Transform::Year => temporal_parts(value).map(|p| ScalarValue::Int32(Some(p.year - 1970))),
            Transform::Month => temporal_parts(value)
                .map(|p| ScalarValue::Int32(Some((p.year - 1970) * 12 + (p.month - 1)))),
            Transform::Day => epoch_days(value).map(|d| ScalarValue::Date32(Some(d))),
            Transform::Hour => match value {
                ScalarValue::TimestampMicrosecond(Some(us), _) => {
                    Some(ScalarValue::Int32(Some(floor_div(*us, 3_600_000_000) as i32)))
                }
                _ => None,
            },
            Transform::Bucket(_) | Transform::Void | Transform::Unknown(_) => None,
        }
    }

    /// Translate a comparison into the transformed domain.
    ///
    /// Order-preserving transforms weaken strict comparisons (`x < v` implies
    /// `t(x) <= t(v)`); non-order-preserving transforms and `!=` cannot be
    /// translated and return `None`.
    pub(crate) fn translate_comparison(
        &self,
        op: CmpOp,
        value: &ScalarValue,
    ) -> Option<(CmpOp, ScalarValue)> {
        if matches!(self, Transform::Identity) {
            return Some((op, value.clone()));
        }
        if !self.order_preserving() {
            return None;
        }
        let transformed = self.apply(value)?;
        let weakened = match op {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Lt | CmpOp::LtEq => CmpOp::LtEq,
            CmpOp::Gt | CmpOp::GtEq => CmpOp::GtEq,
            CmpOp::NotEq => return None,
        };
        Some((weakened, transformed))
    }
}

impl FromStr for Transform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_width = |prefix: &str| -> Option<u32> {
            s.strip_prefix(prefix)?
                .strip_prefix('[')?
                .strip_suffix(']')?
                .parse()
                .ok()
        };
        Ok(match s {
            "identity" => Transform::Identity,
            "year" => Transform::Year,
            "month" => Transform::Month,
            "day" => Transform::Day,
            "hour" => Transform::Hour,
            "void" => Transform::Void,
            _ if s.starts_with("bucket") => match parse_width("bucket") {
                Some(n) => Transform::Bucket(n),
                None => Transform::Unknown(s.to_string()),
            },
            _ if s.starts_with("truncate") => match parse_width("truncate") {
                Some(w) => Transform::Truncate(w),
                None => Transform::Unknown(s.to_string()),
            },
            _ => Transform::Unknown(s.to_string()),
        })
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
            Transform::Truncate(w) => write!(f, "truncate[{w}]"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
            Transform::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn truncate_value(value: &ScalarValue, width: u32) -> Option<ScalarValue> {
    let width = width as i64;
    if width <= 0 {
        return None;
    }
    match value {
        ScalarValue::Int32(Some(v)) => {
            let v = *v as i64;
            Some(ScalarValue::Int32(Some((v - v.rem_euclid(width)) as i32)))
        }
        ScalarValue::Int64(Some(v)) => Some(ScalarValue::Int64(Some(v - v.rem_euclid(width)))),
        ScalarValue::Decimal128(Some(v), p, s) => {
            let width = width as i128;
            Some(ScalarValue::Decimal128(
                Some(v - v.rem_euclid(width)),
                *p,
                *s,
            ))
        }
        ScalarValue::Utf8(Some(v)) => {
            let truncated: String = v.chars().take(width as usize).collect();
            Some(ScalarValue::Utf8(Some(truncated)))
        }
        _ => None,
    }
}

struct TemporalParts {
    year: i32,
    month: i32,
}

fn epoch_days(value: &ScalarValue) -> Option<i32> {
    match value {
        ScalarValue::Date32(Some(d)) => Some(*d),
        ScalarValue::TimestampMicrosecond(Some(us), _) => {
            Some(floor_div(*us, 86_400_000_000) as i32)
        }
        _ => None,
    }
}

fn temporal_parts(value: &ScalarValue) -> Option<TemporalParts> {
    let days = epoch_days(value)?;
    let (year, month) = civil_from_days(days);
    Some(TemporalParts { year, month })
}

/// Proleptic-Gregorian (year, month) for a day count since 1970-01-01.
fn civil_from_days(days: i32) -> (i32, i32) {
    let z = days as i64 + 719_468;
    let era = floor_div(z, 146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m as i32)
}

fn floor_div(a: i64, b: i64) -> i64 {
    let d = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) { d - 1 } else { d }
}

#[cfg(test)]
mod tests {
    use arrow_schema::TimeUnit;

    use super::*;

    #[test]
    fn parses_transform_strings() {
        assert_eq!("identity".parse::<Transform>().unwrap(), Transform::Identity);
        assert_eq!("bucket[16]".parse::<Transform>().unwrap(), Transform::Bucket(16));
        assert_eq!(
            "truncate[4]".parse::<Transform>().unwrap(),
            Transform::Truncate(4)
        );
        assert_eq!(
            "zorder".parse::<Transform>().unwrap(),
            Transform::Unknown("zorder".to_string())
        );
    }

    #[test]
    fn year_and_month_offsets_from_epoch() {
        // 2021-03-15 is 18701 days after the epoch.
        let date = ScalarValue::Date32(Some(18_701));
        assert_eq!(
            Transform::Year.apply(&date),
            Some(ScalarValue::Int32(Some(51)))
        );
        assert_eq!(
            Transform::Month.apply(&date),
            Some(ScalarValue::Int32(Some(51 * 12 + 2)))
        );
        assert_eq!(
            Transform::Day.apply(&date),
            Some(ScalarValue::Date32(Some(18_701)))
        );
    }

    #[test]
    fn pre_epoch_dates_floor_correctly() {
        // 1969-12-31
        let date = ScalarValue::Date32(Some(-1));
        assert_eq!(
            Transform::Year.apply(&date),
            Some(ScalarValue::Int32(Some(-1)))
        );
        let ts = ScalarValue::TimestampMicrosecond(Some(-1), None);
        assert_eq!(
            Transform::Day.apply(&ts),
            Some(ScalarValue::Date32(Some(-1)))
        );
        assert_eq!(
            Transform::Hour.apply(&ts),
            Some(ScalarValue::Int32(Some(-1)))
        );
    }

    #[test]
    fn truncate_ints_and_strings() {
        assert_eq!(
            Transform::Truncate(10).apply(&ScalarValue::Int64(Some(-7))),
            Some(ScalarValue::Int64(Some(-10)))
        );
        assert_eq!(
            Transform::Truncate(3).apply(&ScalarValue::Utf8(Some("iceberg".into()))),
            Some(ScalarValue::Utf8(Some("ice".into())))
        );
    }

    #[test]
    fn comparison_translation_weakens_strict_ops() {
        let v = ScalarValue::Date32(Some(18_701));
        let (op, t) = Transform::Month.translate_comparison(CmpOp::Lt, &v).unwrap();
        assert_eq!(op, CmpOp::LtEq);
        assert_eq!(t, ScalarValue::Int32(Some(51 * 12 + 2)));
        assert!(Transform::Bucket(8).translate_comparison(CmpOp::Lt, &v).is_none());
        assert!(Transform::Month.translate_comparison(CmpOp::NotEq, &v).is_none());
    }

    #[test]
    fn result_types() {
        assert_eq!(
            Transform::Bucket(4).result_type(&DataType::Utf8),
            DataType::Int32
        );
        assert_eq!(Transform::Day.result_type(&DataType::Date32), DataType::Date32);
        assert_eq!(
            Transform::Identity.result_type(&DataType::Timestamp(TimeUnit::Microsecond, None)),
            DataType::Timestamp(TimeUnit::Microsecond, None)
        );
    }
}
