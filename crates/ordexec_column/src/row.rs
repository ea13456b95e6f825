use crate::batch::Batch;
use crate::scalar::{OwnedScalarValue, ScalarValue};
use ordexec_error::{OrdexecError, Result};

/// Handle to a single visible row in a batch.
///
/// The row index is logical; translation through the batch's selection happens
/// on access. Handles must not outlive the batch they reference.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    batch: &'a Batch,
    row: usize,
}

impl<'a> RowRef<'a> {
    pub(crate) fn new(batch: &'a Batch, row: usize) -> Self {
        RowRef { batch, row }
    }

    pub fn row_index(&self) -> usize {
        self.row
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn value(&self, col: usize) -> Result<ScalarValue<'a>> {
        let array = self
            .batch
            .column(col)
            .ok_or_else(|| OrdexecError::new(format!("Column {col} out of bounds")))?;

        array
            .scalar(self.batch.physical_index(self.row))
            .ok_or_else(|| OrdexecError::new(format!("Row {} out of bounds", self.row)))
    }

    pub fn is_null(&self, col: usize) -> Result<bool> {
        Ok(self.value(col)?.is_null())
    }

    /// Collect all column values for this row.
    pub fn values(&self) -> Result<Vec<ScalarValue<'a>>> {
        (0..self.num_columns()).map(|col| self.value(col)).collect()
    }

    pub fn owned_values(&self) -> Result<Vec<OwnedScalarValue>> {
        Ok(self.values()?.into_iter().map(|v| v.into_owned()).collect())
    }
}
