use super::context::ExecutionContext;
use ordexec_column::batch::Batch;
use ordexec_column::field::Schema;
use ordexec_error::Result;
use std::fmt::Debug;

/// Pull-based batch producer.
///
/// Children of an operator implement this; the operator drives them by
/// repeatedly asking for the next batch.
pub trait Executor: Debug {
    fn schema(&self) -> &Schema;

    /// Produce the next batch, None once exhausted.
    ///
    /// An empty batch is treated the same as None by callers.
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Batch>>;

    /// Hint that the caller needs at most `required_rows` rows from the next
    /// batch. `max_chunk_size` bounds the batch size either way.
    fn set_required_rows(&mut self, _required_rows: usize, _max_chunk_size: usize) {}
}

pub type BoxedExecutor = Box<dyn Executor + Send>;
