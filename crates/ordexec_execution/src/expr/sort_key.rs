use ordexec_column::row::RowRef;
use ordexec_column::scalar::ScalarValue;
use ordexec_error::{OrdexecError, Result};
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Compare two non-NULL scalars of the same type.
pub fn compare_scalars(left: &ScalarValue, right: &ScalarValue) -> Result<Ordering> {
    Ok(match (left, right) {
        (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
        (ScalarValue::Int32(a), ScalarValue::Int32(b)) => a.cmp(b),
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.total_cmp(b),
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a.cmp(b),
        (a, b) => {
            return Err(OrdexecError::new(format!(
                "Cannot compare values of different types: {a:?} and {b:?}"
            )))
        }
    })
}

/// Compare scalars with NULL ordered first and NULL equal to NULL.
///
/// This is the ordering the inputs are expected to be sorted with (reversed
/// wholesale when the declared direction is descending).
pub fn compare_scalars_nulls_first(left: &ScalarValue, right: &ScalarValue) -> Result<Ordering> {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ok(Ordering::Equal),
        (true, false) => Ok(Ordering::Less),
        (false, true) => Ok(Ordering::Greater),
        (false, false) => compare_scalars(left, right),
    }
}

/// True if any of the given key columns is NULL for the row.
pub fn key_has_null(row: RowRef, key_columns: &[usize]) -> Result<bool> {
    for col in key_columns {
        if row.is_null(*col)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Lexicographic comparator over paired join key columns.
///
/// Both sides declare the same number of key columns with matching types; the
/// first non-equal column decides. NULLs are expected to have been routed
/// around the comparator, reaching it is a bug upstream.
#[derive(Debug, Clone)]
pub struct SortKeyComparator {
    outer_columns: SmallVec<[usize; 2]>,
    inner_columns: SmallVec<[usize; 2]>,
}

impl SortKeyComparator {
    pub fn try_new(
        outer_columns: impl IntoIterator<Item = usize>,
        inner_columns: impl IntoIterator<Item = usize>,
    ) -> Result<Self> {
        let outer_columns: SmallVec<_> = outer_columns.into_iter().collect();
        let inner_columns: SmallVec<_> = inner_columns.into_iter().collect();

        if outer_columns.is_empty() {
            return Err(OrdexecError::invariant("Join requires at least one key column"));
        }
        if outer_columns.len() != inner_columns.len() {
            return Err(OrdexecError::invariant(format!(
                "Join key arity mismatch: {} outer columns, {} inner columns",
                outer_columns.len(),
                inner_columns.len()
            )));
        }

        Ok(SortKeyComparator {
            outer_columns,
            inner_columns,
        })
    }

    pub fn outer_columns(&self) -> &[usize] {
        &self.outer_columns
    }

    pub fn inner_columns(&self) -> &[usize] {
        &self.inner_columns
    }

    /// Compare the join keys of an outer and an inner row in the keys' natural
    /// ascending order.
    pub fn compare_rows(&self, outer: RowRef, inner: RowRef) -> Result<Ordering> {
        for (outer_col, inner_col) in self.outer_columns.iter().zip(self.inner_columns.iter()) {
            let outer_val = outer.value(*outer_col)?;
            let inner_val = inner.value(*inner_col)?;

            if outer_val.is_null() || inner_val.is_null() {
                return Err(OrdexecError::invariant(
                    "NULL join key reached the cross-side comparator",
                ));
            }

            match compare_scalars(&outer_val, &inner_val)? {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordexec_column::array::{Array, Int64Array, Utf8Array};
    use ordexec_column::batch::Batch;

    fn batch() -> Batch {
        Batch::try_new(vec![
            Array::Int64(Int64Array::from_iter([1, 2, 2])),
            Array::Utf8(Utf8Array::from_iter([Some("a"), Some("b"), None])),
        ])
        .unwrap()
    }

    #[test]
    fn lexicographic_compare() {
        let batch = batch();
        let cmp = SortKeyComparator::try_new([0, 1], [0, 1]).unwrap();

        let first = batch.row(0).unwrap();
        let second = batch.row(1).unwrap();
        assert_eq!(Ordering::Less, cmp.compare_rows(first, second).unwrap());
        assert_eq!(Ordering::Equal, cmp.compare_rows(first, first).unwrap());
        assert_eq!(Ordering::Greater, cmp.compare_rows(second, first).unwrap());
    }

    #[test]
    fn null_key_is_an_error() {
        let batch = batch();
        let cmp = SortKeyComparator::try_new([1], [1]).unwrap();

        let second = batch.row(1).unwrap();
        let third = batch.row(2).unwrap();
        cmp.compare_rows(second, third).unwrap_err();
    }

    #[test]
    fn arity_mismatch() {
        SortKeyComparator::try_new([0, 1], [0]).unwrap_err();
        SortKeyComparator::try_new([], []).unwrap_err();
    }

    #[test]
    fn detects_null_keys() {
        let batch = batch();
        assert!(!key_has_null(batch.row(0).unwrap(), &[0, 1]).unwrap());
        assert!(key_has_null(batch.row(2).unwrap(), &[0, 1]).unwrap());
    }
}
