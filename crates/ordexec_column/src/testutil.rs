//! Utilities useful for testing.
//!
//! Note these aren't placed behind a `cfg(test)` annotation since they should
//! be usable outside of the crate.

use crate::batch::Batch;
use crate::scalar::OwnedScalarValue;

/// Collect a batch's visible rows as owned scalar values.
pub fn collect_rows(batch: &Batch) -> Vec<Vec<OwnedScalarValue>> {
    (0..batch.num_rows())
        .map(|idx| {
            batch
                .row(idx)
                .expect("row to exist")
                .owned_values()
                .expect("row values")
        })
        .collect()
}

/// Asserts that two batches are logically equal.
///
/// This takes into account selections and validity by just iterating over the
/// scalar values of visible rows.
pub fn assert_batches_logical_eq(expected: &Batch, got: &Batch) {
    let expected = collect_rows(expected);
    let got = collect_rows(got);
    assert_eq!(expected, got, "Batches differ");
}
