use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for sparse, unique batch-column values
pub fn id_set_strategy() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(1i64..=500, 0..120)
}

/// Strategy for sub-batch sizes, including the degenerate size of one
pub fn sub_batch_size_strategy() -> impl Strategy<Value = u64> {
    1u64..=25
}

/// Strategy for an inclusive `[start_id, end_id]` window over the id space
pub fn range_strategy() -> impl Strategy<Value = (i64, i64)> {
    (0i64..=500, 0i64..=500).prop_map(|(a, b)| (a.min(b), a.max(b)))
}
