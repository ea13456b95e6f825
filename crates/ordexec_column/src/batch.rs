use crate::array::Array;
use crate::datatype::DataType;
use crate::row::RowRef;
use crate::selection::SelectionVector;
use ordexec_error::{OrdexecError, Result};
use std::sync::Arc;

/// A batch of same-length arrays with an optional selection restricting which
/// rows are visible.
///
/// Selection is the sole mechanism for hiding rows; no physical deletion
/// occurs. Row indices exposed by the batch ("logical" indices) are always
/// post-selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Columns that make up this batch.
    cols: Vec<Arc<Array>>,

    /// Number of physical rows in this batch. Needed to allow for a batch that
    /// has no columns but a non-zero number of rows.
    num_rows: usize,

    /// Selection over physical rows, None means all rows are visible.
    selection: Option<Arc<SelectionVector>>,
}

impl Batch {
    pub fn empty() -> Self {
        Batch {
            cols: Vec::new(),
            num_rows: 0,
            selection: None,
        }
    }

    pub fn try_new(cols: Vec<Array>) -> Result<Self> {
        let len = match cols.first() {
            Some(arr) => arr.len(),
            None => return Ok(Self::empty()),
        };

        for col in &cols {
            if col.len() != len {
                return Err(OrdexecError::new(format!(
                    "Expected column length to be {len}, got {}",
                    col.len()
                )));
            }
        }

        let cols = cols.into_iter().map(Arc::new).collect();

        Ok(Batch {
            cols,
            num_rows: len,
            selection: None,
        })
    }

    /// Apply a selection over this batch's logical rows, producing a new batch
    /// sharing the same columns.
    ///
    /// Selections compose: indices in `selection` refer to this batch's
    /// currently visible rows.
    pub fn select(&self, selection: Arc<SelectionVector>) -> Batch {
        let selection = match &self.selection {
            None => selection,
            Some(existing) => Arc::new(selection.iter().map(|idx| existing.get(idx)).collect()),
        };

        Batch {
            cols: self.cols.clone(),
            num_rows: self.num_rows,
            selection: Some(selection),
        }
    }

    /// Number of visible rows.
    pub fn num_rows(&self) -> usize {
        match &self.selection {
            Some(sel) => sel.num_rows(),
            None => self.num_rows,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.cols.len()
    }

    pub fn column(&self, idx: usize) -> Option<&Arc<Array>> {
        self.cols.get(idx)
    }

    pub fn columns(&self) -> &[Arc<Array>] {
        &self.cols
    }

    pub fn selection(&self) -> Option<&SelectionVector> {
        self.selection.as_deref()
    }

    /// Translate a logical row index into a physical one.
    pub fn physical_index(&self, idx: usize) -> usize {
        match &self.selection {
            Some(sel) => sel.get(idx),
            None => idx,
        }
    }

    /// Get a row handle, None if out of bounds.
    pub fn row(&self, idx: usize) -> Option<RowRef> {
        if idx >= self.num_rows() {
            return None;
        }
        Some(RowRef::new(self, idx))
    }

    pub fn datatypes(&self) -> Vec<DataType> {
        self.cols.iter().map(|c| c.datatype()).collect()
    }

    /// Approximate heap memory usage in bytes.
    ///
    /// Columns are counted in full even when a selection hides rows; the
    /// underlying buffers stay resident either way.
    pub fn memory_size(&self) -> usize {
        self.cols.iter().map(|c| c.memory_size()).sum::<usize>()
            + self
                .selection
                .as_ref()
                .map(|s| s.memory_size())
                .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Int32Array, Utf8Array};
    use crate::scalar::ScalarValue;

    fn test_batch() -> Batch {
        Batch::try_new(vec![
            Array::Int32(Int32Array::from_iter([1, 2, 3, 4])),
            Array::Utf8(Utf8Array::from_iter(["a", "b", "c", "d"])),
        ])
        .unwrap()
    }

    #[test]
    fn mismatched_column_lengths() {
        Batch::try_new(vec![
            Array::Int32(Int32Array::from_iter([1, 2, 3])),
            Array::Utf8(Utf8Array::from_iter(["a"])),
        ])
        .unwrap_err();
    }

    #[test]
    fn selection_hides_rows() {
        let batch = test_batch().select(Arc::new(SelectionVector::with_range(1..3)));

        assert_eq!(2, batch.num_rows());
        let row = batch.row(0).unwrap();
        assert_eq!(ScalarValue::Int32(2), row.value(0).unwrap());
    }

    #[test]
    fn selections_compose() {
        let batch = test_batch()
            .select(Arc::new(SelectionVector::with_range(1..4)))
            .select(Arc::new(SelectionVector::with_range(1..3)));

        assert_eq!(2, batch.num_rows());
        assert_eq!(
            ScalarValue::Int32(3),
            batch.row(0).unwrap().value(0).unwrap()
        );
        assert_eq!(
            ScalarValue::Int32(4),
            batch.row(1).unwrap().value(0).unwrap()
        );
    }

    #[test]
    fn row_out_of_bounds() {
        let batch = test_batch();
        assert!(batch.row(4).is_none());
    }
}
