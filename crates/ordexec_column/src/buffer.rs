use crate::batch::Batch;
use crate::builder::ArrayBuilder;
use crate::datatype::DataType;
use crate::scalar::ScalarValue;
use ordexec_error::{OrdexecError, Result};

/// A reusable output batch with a fixed row capacity.
///
/// Producers append rows until the buffer reports full, then the accumulated
/// rows are taken as a batch with `finish`. The buffer is immediately reusable
/// afterwards.
#[derive(Debug)]
pub struct BatchBuffer {
    datatypes: Vec<DataType>,
    builders: Vec<ArrayBuilder>,
    capacity: usize,
    num_rows: usize,
}

impl BatchBuffer {
    pub fn new(datatypes: Vec<DataType>, capacity: usize) -> Self {
        let builders = datatypes
            .iter()
            .map(|dt| ArrayBuilder::new(*dt, capacity))
            .collect();

        BatchBuffer {
            datatypes,
            builders,
            capacity,
            num_rows: 0,
        }
    }

    pub fn datatypes(&self) -> &[DataType] {
        &self.datatypes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.num_rows
    }

    pub fn is_full(&self) -> bool {
        self.num_rows >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Append a single row.
    ///
    /// The value count must match the column count, and the buffer must not be
    /// full.
    pub fn push_row<'a>(
        &mut self,
        values: impl IntoIterator<Item = ScalarValue<'a>>,
    ) -> Result<()> {
        if self.is_full() {
            return Err(OrdexecError::invariant(format!(
                "Push to full output batch, capacity {}",
                self.capacity
            )));
        }

        let mut pushed = 0;
        for (idx, value) in values.into_iter().enumerate() {
            let builder = self.builders.get_mut(idx).ok_or_else(|| {
                OrdexecError::invariant(format!(
                    "Row has more values than the {} output columns",
                    self.datatypes.len()
                ))
            })?;
            builder.push(value)?;
            pushed += 1;
        }

        if pushed != self.builders.len() {
            return Err(OrdexecError::invariant(format!(
                "Row has {pushed} values, expected {}",
                self.builders.len()
            )));
        }

        self.num_rows += 1;
        Ok(())
    }

    /// Drop any accumulated rows.
    pub fn reset(&mut self) {
        for builder in &mut self.builders {
            let _ = builder.finish();
        }
        self.num_rows = 0;
    }

    /// Take the accumulated rows as a batch, leaving the buffer empty.
    pub fn finish(&mut self) -> Result<Batch> {
        let cols = self.builders.iter_mut().map(|b| b.finish()).collect();
        self.num_rows = 0;
        Batch::try_new(cols)
    }
}
