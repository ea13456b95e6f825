//! Executor doubles for operator tests.

use crate::execution::context::ExecutionContext;
use crate::execution::executor::Executor;
use ordexec_column::array::{Array, Int64Array};
use ordexec_column::batch::Batch;
use ordexec_column::datatype::DataType;
use ordexec_column::field::{Field, Schema};
use ordexec_column::selection::SelectionVector;
use ordexec_error::{OrdexecError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Source yielding a fixed list of batches.
///
/// Honors `set_required_rows` by splitting the front batch, so tests can
/// observe the push-down path. Received hints are recorded in a shared log
/// that stays readable after the source moves into an operator.
#[derive(Debug)]
pub struct TestBatchSource {
    schema: Schema,
    batches: VecDeque<Batch>,
    required_rows: Option<usize>,
    hints: Arc<Mutex<Vec<usize>>>,
}

impl TestBatchSource {
    pub fn new(schema: Schema, batches: impl IntoIterator<Item = Batch>) -> Self {
        TestBatchSource {
            schema,
            batches: batches.into_iter().collect(),
            required_rows: None,
            hints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Two column (key Int64, payload Int64) source, one batch per key chunk.
    pub fn keyed(chunks: &[&[(Option<i64>, i64)]]) -> Self {
        let batches: Vec<_> = chunks.iter().map(|chunk| keyed_batch(chunk)).collect();
        TestBatchSource::new(keyed_schema(), batches)
    }

    pub fn hint_log(&self) -> Arc<Mutex<Vec<usize>>> {
        self.hints.clone()
    }
}

impl Executor for TestBatchSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, _ctx: &ExecutionContext) -> Result<Option<Batch>> {
        let batch = match self.batches.pop_front() {
            Some(batch) => batch,
            None => return Ok(None),
        };

        match self.required_rows.take() {
            Some(required) if required < batch.num_rows() => {
                let head = batch.select(Arc::new(SelectionVector::with_range(0..required)));
                let rest =
                    batch.select(Arc::new(SelectionVector::with_range(required..batch.num_rows())));
                self.batches.push_front(rest);
                Ok(Some(head))
            }
            _ => Ok(Some(batch)),
        }
    }

    fn set_required_rows(&mut self, required_rows: usize, max_chunk_size: usize) {
        let required = required_rows.min(max_chunk_size);
        self.hints.lock().push(required);
        self.required_rows = Some(required);
    }
}

/// Source failing on the nth call to `next`.
#[derive(Debug)]
pub struct FailingSource {
    inner: TestBatchSource,
    fail_on_call: usize,
    calls: usize,
}

impl FailingSource {
    pub fn new(inner: TestBatchSource, fail_on_call: usize) -> Self {
        FailingSource {
            inner,
            fail_on_call,
            calls: 0,
        }
    }
}

impl Executor for FailingSource {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Batch>> {
        self.calls += 1;
        if self.calls >= self.fail_on_call {
            return Err(OrdexecError::new("Upstream failure (injected)"));
        }
        self.inner.next(ctx)
    }
}

pub fn keyed_schema() -> Schema {
    Schema::new([
        Field::new("k", DataType::Int64),
        Field::new("v", DataType::Int64),
    ])
}

/// Build a (key, payload) batch.
pub fn keyed_batch(rows: &[(Option<i64>, i64)]) -> Batch {
    Batch::try_new(vec![
        Array::Int64(Int64Array::from_iter(rows.iter().map(|(k, _)| *k))),
        Array::Int64(Int64Array::from_iter(rows.iter().map(|(_, v)| *v))),
    ])
    .expect("valid batch")
}
