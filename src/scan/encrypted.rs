//! Encrypted range querying against per-column bloom filters.
//!
//! In encrypted-range mode, manifests intentionally omit plaintext bounds;
//! instead each file carries encrypted bloom-filter blobs, and pruning asks
//! an external engine whether the pushed filter's value range can intersect
//! the filter. The cryptographic scheme itself is the engine's problem; this
//! module owns key loading, filter-to-range translation and per-query token
//! caching.

use datafusion_common::ScalarValue;

use crate::expr::{CmpOp, ColumnFilter, FilterSet};
use crate::io::SecretStore;
use crate::{Error, Result};

/// Name of the secret holding the range-query key material.
pub const RANGE_KEYS_SECRET: &str = "encrypted_range_keys";

/// Largest encodable domain value; the engine reserves the top value.
pub const DOMAIN_MAX: u64 = u64::MAX - 1;

/// Inclusive value range a query token is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenRange {
    pub min: u64,
    pub max: u64,
}

impl Default for TokenRange {
    fn default() -> Self {
        TokenRange {
            min: 0,
            max: DOMAIN_MAX,
        }
    }
}

/// Opaque token produced by the range engine for one query's filter range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryToken(Vec<u8>);

impl QueryToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        QueryToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The external encrypted-range engine, loaded with key material.
pub trait RangeQueryEngine: Send {
    fn create_token(&mut self, range: TokenRange) -> QueryToken;

    /// Membership test of the token's range against one encrypted bloom
    /// filter blob. `false` is definitive (no value in range is present);
    /// `true` only means "possible".
    fn query(&self, token: &QueryToken, bloom_filter: &[u8]) -> bool;
}

/// Constructs [`RangeQueryEngine`]s from key material.
pub trait RangeEngineFactory: Send + Sync {
    fn create(&self, k1: &str, k2: &str, domain_max: u64) -> Result<Box<dyn RangeQueryEngine>>;
}

/// Translate a pushed filter set into the value range a token must cover.
///
/// Only the shapes the scheme can express are translated: a conjunction of
/// range comparisons narrows the full domain, a single comparison produces a
/// half-open or point range. Anything else keeps the full domain (which
/// prunes nothing).
pub(crate) fn filter_range(filters: &FilterSet) -> TokenRange {
    let mut range = TokenRange::default();
    let Some((_, filter)) = filters.iter().next() else {
        return range;
    };
    match filter {
        ColumnFilter::Conjunction(parts) => {
            for part in parts {
                if let ColumnFilter::Comparison { op, value } = part {
                    narrow(&mut range, *op, value);
                }
            }
        }
        ColumnFilter::Comparison { op, value } => narrow(&mut range, *op, value),
        ColumnFilter::IsNull { .. } => {}
    }
    range
}

fn narrow(range: &mut TokenRange, op: CmpOp, value: &ScalarValue) {
    let Some(value) = scalar_to_u64(value) else {
        return;
    };
    match op {
        CmpOp::Eq => {
            range.min = value;
            range.max = value;
        }
        CmpOp::LtEq => range.max = value.min(DOMAIN_MAX),
        CmpOp::Lt => range.max = value.saturating_sub(1),
        CmpOp::GtEq => range.min = value,
        CmpOp::Gt => range.min = value.saturating_add(1),
        CmpOp::NotEq => {}
    }
}

fn scalar_to_u64(value: &ScalarValue) -> Option<u64> {
    match value {
        ScalarValue::Int8(Some(v)) => u64::try_from(*v).ok(),
        ScalarValue::Int16(Some(v)) => u64::try_from(*v).ok(),
        ScalarValue::Int32(Some(v)) => u64::try_from(*v).ok(),
        ScalarValue::Int64(Some(v)) => u64::try_from(*v).ok(),
        ScalarValue::UInt8(Some(v)) => Some(u64::from(*v)),
        ScalarValue::UInt16(Some(v)) => Some(u64::from(*v)),
        ScalarValue::UInt32(Some(v)) => Some(u64::from(*v)),
        ScalarValue::UInt64(Some(v)) => Some(*v),
        _ => None,
    }
}

/// Engine plus per-query token cache. Tokens are rebuilt only when the
/// active query identifier changes, never per file-match call.
pub(crate) struct RangeQueryState {
    engine: Box<dyn RangeQueryEngine>,
    token: Option<QueryToken>,
    token_query_id: Option<u64>,
}

impl RangeQueryState {
    /// Load key material and construct the engine. The secret is required;
    /// its absence is a configuration error, never a silent fallback.
    pub(crate) fn initialize(
        secrets: &dyn SecretStore,
        factory: &dyn RangeEngineFactory,
    ) -> Result<Self> {
        let secret = secrets.get(RANGE_KEYS_SECRET).ok_or_else(|| {
            Error::configuration(format!(
                "secret '{RANGE_KEYS_SECRET}' is required to use encrypted range filters"
            ))
        })?;
        let k1 = secret.get("k1").ok_or_else(|| {
            Error::configuration(format!("secret '{RANGE_KEYS_SECRET}' is missing key 'k1'"))
        })?;
        let k2 = secret.get("k2").ok_or_else(|| {
            Error::configuration(format!("secret '{RANGE_KEYS_SECRET}' is missing key 'k2'"))
        })?;
        Ok(RangeQueryState {
            engine: factory.create(k1, k2, DOMAIN_MAX)?,
            token: None,
            token_query_id: None,
        })
    }

    /// Whether a file with the given bloom-filter blob may contain a value
    /// in the range implied by `filters`, for the query identified by
    /// `query_id`.
    pub(crate) fn file_may_match(
        &mut self,
        query_id: u64,
        filters: &FilterSet,
        bloom_filter: &[u8],
    ) -> bool {
        self.refresh_token(query_id, filters);
        let token = self.token.as_ref().expect("token was just cached");
        self.engine.query(token, bloom_filter)
    }

    /// Rebuild the cached token if `query_id` differs from the one it was
    /// built for.
    pub(crate) fn refresh_token(&mut self, query_id: u64, filters: &FilterSet) {
        if self.token_query_id != Some(query_id) || self.token.is_none() {
            self.token = Some(self.engine.create_token(filter_range(filters)));
            self.token_query_id = Some(query_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn cmp(op: CmpOp, value: u64) -> ColumnFilter {
        ColumnFilter::Comparison {
            op,
            value: ScalarValue::UInt64(Some(value)),
        }
    }

    #[test]
    fn single_comparisons_open_one_side() {
        let mut filters = FilterSet::new();
        filters.push(0, cmp(CmpOp::GtEq, 100));
        assert_eq!(
            filter_range(&filters),
            TokenRange {
                min: 100,
                max: DOMAIN_MAX
            }
        );

        let mut filters = FilterSet::new();
        filters.push(0, cmp(CmpOp::Lt, 100));
        assert_eq!(filter_range(&filters), TokenRange { min: 0, max: 99 });

        let mut filters = FilterSet::new();
        filters.push(0, cmp(CmpOp::Eq, 42));
        assert_eq!(filter_range(&filters), TokenRange { min: 42, max: 42 });
    }

    #[test]
    fn conjunction_narrows_both_sides() {
        let mut filters = FilterSet::new();
        filters.push(0, cmp(CmpOp::Gt, 10));
        filters.push(0, cmp(CmpOp::LtEq, 50));
        assert_eq!(filter_range(&filters), TokenRange { min: 11, max: 50 });
    }

    #[test]
    fn empty_and_untranslatable_filters_cover_the_domain() {
        assert_eq!(filter_range(&FilterSet::new()), TokenRange::default());
        let mut filters = FilterSet::new();
        filters.push(
            0,
            ColumnFilter::Comparison {
                op: CmpOp::Eq,
                value: ScalarValue::Utf8(Some("x".into())),
            },
        );
        assert_eq!(filter_range(&filters), TokenRange::default());
    }

    struct CountingEngine {
        tokens_built: Arc<AtomicUsize>,
    }

    impl RangeQueryEngine for CountingEngine {
        fn create_token(&mut self, _range: TokenRange) -> QueryToken {
            self.tokens_built.fetch_add(1, Ordering::Relaxed);
            QueryToken::new(vec![1])
        }

        fn query(&self, _token: &QueryToken, _bloom_filter: &[u8]) -> bool {
            true
        }
    }

    #[test]
    fn tokens_are_cached_per_query_id() {
        let tokens_built = Arc::new(AtomicUsize::new(0));
        let mut state = RangeQueryState {
            engine: Box::new(CountingEngine {
                tokens_built: tokens_built.clone(),
            }),
            token: None,
            token_query_id: None,
        };
        let filters = FilterSet::new();
        state.file_may_match(1, &filters, &[0u8; 32]);
        state.file_may_match(1, &filters, &[0u8; 32]);
        assert_eq!(tokens_built.load(Ordering::Relaxed), 1);
        state.file_may_match(2, &filters, &[0u8; 32]);
        assert_eq!(tokens_built.load(Ordering::Relaxed), 2);
    }
}
