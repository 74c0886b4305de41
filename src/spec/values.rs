//! Decoding of Iceberg single-value binary serialization.
//!
//! Bound values in manifests (column lower/upper bounds, partition field
//! summaries) are stored as opaque blobs; the value type comes from the
//! schema or from the partition transform's result type. Decoding is
//! deliberately `Option`-based: an undecodable blob means "no statistics",
//! never an error, so pruning stays fail-open.

use arrow_schema::{DataType, TimeUnit};
use datafusion_common::ScalarValue;

/// Decode a serialized bound into a comparable value of the given type.
pub fn decode_bound(bytes: &[u8], data_type: &DataType) -> Option<ScalarValue> {
    match data_type {
        DataType::Boolean => match bytes {
            [0] => Some(ScalarValue::Boolean(Some(false))),
            [_] => Some(ScalarValue::Boolean(Some(true))),
            _ => None,
        },
        DataType::Int32 => Some(ScalarValue::Int32(Some(le_i32(bytes)?))),
        DataType::Int64 => Some(ScalarValue::Int64(Some(le_i64(bytes)?))),
        DataType::Float32 => {
            let raw: [u8; 4] = bytes.try_into().ok()?;
            Some(ScalarValue::Float32(Some(f32::from_le_bytes(raw))))
        }
        DataType::Float64 => match bytes.len() {
            8 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                Some(ScalarValue::Float64(Some(f64::from_le_bytes(raw))))
            }
            // Floats promoted to double keep their 4-byte serialization.
            4 => {
                let raw: [u8; 4] = bytes.try_into().ok()?;
                Some(ScalarValue::Float64(Some(f32::from_le_bytes(raw) as f64)))
            }
            _ => None,
        },
        DataType::Date32 => Some(ScalarValue::Date32(Some(le_i32(bytes)?))),
        DataType::Time64(TimeUnit::Microsecond) => {
            Some(ScalarValue::Time64Microsecond(Some(le_i64(bytes)?)))
        }
        DataType::Timestamp(TimeUnit::Microsecond, tz) => Some(ScalarValue::TimestampMicrosecond(
            Some(le_i64(bytes)?),
            tz.clone(),
        )),
        DataType::Utf8 => {
            let s = std::str::from_utf8(bytes).ok()?;
            Some(ScalarValue::Utf8(Some(s.to_string())))
        }
        DataType::Binary => Some(ScalarValue::Binary(Some(bytes.to_vec()))),
        DataType::FixedSizeBinary(size) => {
            if bytes.len() == *size as usize {
                Some(ScalarValue::FixedSizeBinary(*size, Some(bytes.to_vec())))
            } else {
                None
            }
        }
        DataType::Decimal128(precision, scale) => {
            if bytes.is_empty() || bytes.len() > 16 {
                return None;
            }
            let value = i128::from_be_bytes(sign_extend_be::<16>(bytes));
            Some(ScalarValue::Decimal128(Some(value), *precision, *scale))
        }
        _ => None,
    }
}

fn le_i32(bytes: &[u8]) -> Option<i32> {
    let raw: [u8; 4] = bytes.try_into().ok()?;
    Some(i32::from_le_bytes(raw))
}

fn le_i64(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        8 => {
            let raw: [u8; 8] = bytes.try_into().ok()?;
            Some(i64::from_le_bytes(raw))
        }
        // Longs written by an int-typed writer may be 4 bytes.
        4 => Some(i64::from(le_i32(bytes)?)),
        _ => None,
    }
}

fn sign_extend_be<const N: usize>(bytes: &[u8]) -> [u8; N] {
    debug_assert!(bytes.len() <= N, "Array too large, expected <= {N}");
    let is_negative = (bytes[0] & 128u8) == 128u8;
    let mut result = if is_negative { [255u8; N] } else { [0u8; N] };
    for (d, s) in result.iter_mut().skip(N - bytes.len()).zip(bytes) {
        *d = *s;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ints_and_longs() {
        assert_eq!(
            decode_bound(&42i32.to_le_bytes(), &DataType::Int32),
            Some(ScalarValue::Int32(Some(42)))
        );
        assert_eq!(
            decode_bound(&(-7i64).to_le_bytes(), &DataType::Int64),
            Some(ScalarValue::Int64(Some(-7)))
        );
        // int-width serialization of a long column
        assert_eq!(
            decode_bound(&42i32.to_le_bytes(), &DataType::Int64),
            Some(ScalarValue::Int64(Some(42)))
        );
    }

    #[test]
    fn decodes_temporal_values() {
        assert_eq!(
            decode_bound(&18_701i32.to_le_bytes(), &DataType::Date32),
            Some(ScalarValue::Date32(Some(18_701)))
        );
        assert_eq!(
            decode_bound(
                &1_000_000i64.to_le_bytes(),
                &DataType::Timestamp(TimeUnit::Microsecond, None)
            ),
            Some(ScalarValue::TimestampMicrosecond(Some(1_000_000), None))
        );
    }

    #[test]
    fn decodes_strings_and_binary() {
        assert_eq!(
            decode_bound(b"iceberg", &DataType::Utf8),
            Some(ScalarValue::Utf8(Some("iceberg".to_string())))
        );
        assert_eq!(decode_bound(&[0xFF], &DataType::Utf8), None);
        assert_eq!(
            decode_bound(&[1, 2, 3], &DataType::Binary),
            Some(ScalarValue::Binary(Some(vec![1, 2, 3])))
        );
    }

    #[test]
    fn decodes_sign_extended_decimals() {
        // -1 stored in a single big-endian byte
        assert_eq!(
            decode_bound(&[0xFF], &DataType::Decimal128(9, 2)),
            Some(ScalarValue::Decimal128(Some(-1), 9, 2))
        );
        assert_eq!(
            decode_bound(&[0x01, 0x00], &DataType::Decimal128(9, 2)),
            Some(ScalarValue::Decimal128(Some(256), 9, 2))
        );
    }

    #[test]
    fn wrong_width_is_no_statistics() {
        assert_eq!(decode_bound(&[1, 2, 3], &DataType::Int32), None);
        assert_eq!(decode_bound(&[], &DataType::Decimal128(9, 2)), None);
    }
}
