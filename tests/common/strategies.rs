use proptest::prelude::*;

/// Grid sizes from a single partition up to a wide fan-out
pub fn grid_size_strategy() -> impl Strategy<Value = u32> {
    1u32..=64
}

/// `(min, max)` key ranges with `min <= max`, including single-key ranges
pub fn key_range_strategy() -> impl Strategy<Value = (i64, i64)> {
    (-1_000_000i64..1_000_000, 0i64..100_000).prop_map(|(min, span)| (min, min + span))
}

/// Ranges hugging the ends of the i64 key space
pub fn extreme_key_range_strategy() -> impl Strategy<Value = (i64, i64)> {
    prop_oneof![
        Just((i64::MIN, i64::MAX)),
        (0i64..1_000).prop_map(|span| (i64::MIN, i64::MIN + span)),
        (0i64..1_000).prop_map(|span| (i64::MAX - span, i64::MAX)),
    ]
}
