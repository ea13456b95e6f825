use super::group_checker::GroupChecker;
use super::row_store::RowStore;
use crate::execution::context::ExecutionContext;
use crate::execution::executor::BoxedExecutor;
use crate::expr::physical::PhysicalScalarExpression;
use crate::expr::sort_key::key_has_null;
use crate::runtime::tracker::MemoryTracker;
use ordexec_column::batch::Batch;
use ordexec_column::bitmap::Bitmap;
use ordexec_column::row::RowRef;
use ordexec_column::selection::SelectionVector;
use ordexec_error::{OptionExt, Result};
use std::ops::Range;
use std::sync::Arc;
use tracing::trace;

fn range_view(batch: &Batch, range: Range<usize>) -> Batch {
    batch.select(Arc::new(SelectionVector::with_range(range)))
}

/// Inner-side cursor.
///
/// Accumulates one complete key group at a time. A group may span any number
/// of input batches: completed portions are handed to the spillable row store,
/// the portion inside the newest batch stays as a selection view.
///
/// Iteration over the group is a saved position, so a partially consumed
/// group survives suspension at output-batch boundaries.
#[derive(Debug)]
pub struct InnerCursor {
    child: BoxedExecutor,
    checker: GroupChecker,
    key_columns: Vec<usize>,
    store: RowStore,
    mem_tracker: Arc<MemoryTracker>,

    current_batch: Option<Batch>,
    current_charge: i64,

    /// Portion of the current group living outside the store.
    group_tail: Option<Batch>,

    /// Charge carried for a tail whose batch is no longer `current_batch`.
    tail_charge: i64,

    /// First batch of the group, used for key comparisons.
    group_head: Option<Batch>,

    input_exhausted: bool,
    needs_group: bool,

    /// Iterator position: (group batch index, row within batch). Store
    /// batches come first, the tail last.
    pos: (usize, usize),

    /// Local copy of the store batch the iterator is positioned in.
    iter_cache: Option<(usize, Batch)>,
}

impl InnerCursor {
    pub fn new(
        child: BoxedExecutor,
        key_columns: Vec<usize>,
        desc: bool,
        store: RowStore,
        mem_tracker: Arc<MemoryTracker>,
    ) -> Self {
        InnerCursor {
            child,
            checker: GroupChecker::new(key_columns.iter().copied(), desc),
            key_columns,
            store,
            mem_tracker,
            current_batch: None,
            current_charge: 0,
            group_tail: None,
            tail_charge: 0,
            group_head: None,
            input_exhausted: false,
            needs_group: true,
            pos: (0, 0),
            iter_cache: None,
        }
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    pub fn needs_group(&self) -> bool {
        self.needs_group
    }

    /// True when the last fetch produced no group: the inner side has no rows
    /// left to offer.
    pub fn group_is_empty(&self) -> bool {
        self.group_head.is_none()
    }

    /// Representative row for the group's key. All rows in the group share it.
    pub fn group_head_row(&self) -> Result<RowRef<'_>> {
        let head = self.group_head.as_ref().required("inner group head")?;
        head.row(0).required("inner group head row")
    }

    /// Give up on the current group; the next driver tick fetches a new one.
    pub fn abandon_group(&mut self) {
        self.needs_group = true;
    }

    /// Advance to the next complete non-null key group.
    ///
    /// On return either a group is available (`group_is_empty() == false`) or
    /// the inner side is exhausted.
    pub fn fetch_next_group(&mut self, ctx: &ExecutionContext) -> Result<()> {
        // Release the previous group.
        self.store.reset()?;
        if self.tail_charge != 0 {
            self.mem_tracker.consume(-self.tail_charge)?;
            self.tail_charge = 0;
        }
        self.group_tail = None;
        self.group_head = None;
        self.iter_cache = None;
        self.pos = (0, 0);
        self.needs_group = false;

        loop {
            if self.checker.is_exhausted() {
                if self.input_exhausted {
                    // No group; inner side is done.
                    return Ok(());
                }
                self.fetch_and_split(ctx)?;
                continue;
            }

            let mut range = self.checker.next_group().required("next run")?;

            // Null-keyed inner rows can never match; drop the whole run (all
            // rows of a run share the key).
            if self.run_has_null_key(&range)? {
                trace!(?range, "dropping null-keyed inner run");
                continue;
            }

            // Extend the group while it runs into subsequent batches.
            loop {
                if !self.checker.is_exhausted() || self.input_exhausted {
                    // Group ends inside the current batch.
                    let current = self.current_batch.as_ref().required("current batch")?;
                    self.group_tail = Some(range_view(current, range));
                    break;
                }

                // The run reaches the end of the batch; the next batch may
                // continue it.
                let prev = self.current_batch.take().required("current batch")?;
                let prev_charge = self.current_charge;
                self.current_charge = 0;

                let carry = self.fetch_and_split(ctx)?;
                if self.input_exhausted || !carry {
                    // Group completed at the previous batch's tail. Keep the
                    // batch (and its charge) alive through the tail view.
                    self.group_tail = Some(range_view(&prev, range));
                    self.tail_charge = prev_charge;
                    break;
                }

                // Carry: hand the previous batch's group rows to the store,
                // transferring the memory accounting, and continue with the
                // first run of the new batch.
                self.mem_tracker.consume(-prev_charge)?;
                self.store.add(range_view(&prev, range))?;
                range = self.checker.next_group().required("carry-over run")?;
            }

            self.group_head = match self.store.num_batches() {
                0 => self.group_tail.clone(),
                _ => Some(self.store.batch(0)?),
            };

            trace!(
                store_batches = self.store.num_batches(),
                tail_rows = self.group_tail.as_ref().map(|b| b.num_rows()).unwrap_or(0),
                "assembled inner group"
            );

            return Ok(());
        }
    }

    /// Pull the next input batch and split it into runs.
    ///
    /// Returns the checker's carry-flag. Sets `input_exhausted` on EOF
    /// without touching the current batch.
    fn fetch_and_split(&mut self, ctx: &ExecutionContext) -> Result<bool> {
        ctx.check_cancelled()?;

        let batch = match self.child.next(ctx)? {
            Some(batch) if batch.num_rows() > 0 => batch,
            _ => {
                trace!("inner input exhausted");
                self.input_exhausted = true;
                return Ok(false);
            }
        };

        if self.current_batch.take().is_some() {
            self.mem_tracker.consume(-self.current_charge)?;
            self.current_charge = 0;
        }

        let bytes = batch.memory_size() as i64;
        self.mem_tracker.consume(bytes)?;
        self.current_charge = bytes;

        let carry = self.checker.split(&batch)?;
        self.current_batch = Some(batch);
        Ok(carry)
    }

    fn run_has_null_key(&self, range: &Range<usize>) -> Result<bool> {
        let current = self.current_batch.as_ref().required("current batch")?;
        let row = current.row(range.start).required("run head row")?;
        key_has_null(row, &self.key_columns)
    }

    pub fn group_iter(&mut self) -> InnerGroupIter<'_> {
        InnerGroupIter { cursor: self }
    }

    /// Rewind the group iterator to the group's first row.
    pub fn rewind_group_iter(&mut self) {
        self.pos = (0, 0);
    }

    fn cached_store_batch(&mut self, idx: usize) -> Result<&Batch> {
        let loaded = matches!(&self.iter_cache, Some((cached, _)) if *cached == idx);
        if !loaded {
            let batch = self.store.batch(idx)?;
            self.iter_cache = Some((idx, batch));
        }
        Ok(&self.iter_cache.as_ref().expect("cache loaded above").1)
    }

    /// Release held batches and the store, returning the child executor.
    pub fn release(mut self) -> Result<BoxedExecutor> {
        self.store.reset()?;
        self.group_tail = None;
        self.group_head = None;
        self.iter_cache = None;
        if self.tail_charge != 0 {
            self.mem_tracker.consume(-self.tail_charge)?;
            self.tail_charge = 0;
        }
        if self.current_batch.take().is_some() {
            self.mem_tracker.consume(-self.current_charge)?;
            self.current_charge = 0;
        }
        Ok(self.child)
    }
}

/// Positioned view over the inner cursor's current group.
///
/// The position lives in the cursor, so dropping and recreating the iterator
/// resumes where iteration stopped.
#[derive(Debug)]
pub struct InnerGroupIter<'a> {
    cursor: &'a mut InnerCursor,
}

impl InnerGroupIter<'_> {
    /// Row at the current position, None when the group is exhausted.
    ///
    /// Does not advance.
    pub fn current_row(&mut self) -> Result<Option<RowRef<'_>>> {
        loop {
            let (batch_idx, row_idx) = self.cursor.pos;
            let store_batches = self.cursor.store.num_batches();

            if batch_idx < store_batches {
                let num_rows = self.cursor.cached_store_batch(batch_idx)?.num_rows();
                if row_idx >= num_rows {
                    self.cursor.pos = (batch_idx + 1, 0);
                    continue;
                }
                let batch = self.cursor.cached_store_batch(batch_idx)?;
                return Ok(batch.row(row_idx));
            }

            if batch_idx > store_batches {
                return Ok(None);
            }

            return Ok(match &self.cursor.group_tail {
                Some(tail) if row_idx < tail.num_rows() => tail.row(row_idx),
                _ => None,
            });
        }
    }

    pub fn advance(&mut self) {
        self.cursor.pos.1 += 1;
    }

    pub fn at_end(&mut self) -> Result<bool> {
        Ok(self.current_row()?.is_none())
    }

    /// Logically consume the rest of the group.
    pub fn seek_to_end(&mut self) {
        self.cursor.pos = (self.cursor.store.num_batches() + 1, 0);
    }
}

/// Outer-side cursor.
///
/// Outer groups are confined to a single batch: if a key continues into the
/// next batch the driver simply sees equal keys again on the next group. Rows
/// are consumed one at a time and the position survives suspension.
#[derive(Debug)]
pub struct OuterCursor {
    child: BoxedExecutor,
    checker: GroupChecker,
    key_columns: Vec<usize>,
    filter: Option<PhysicalScalarExpression>,
    mem_tracker: Arc<MemoryTracker>,

    /// Forward the driver's row requirement to the child. Enabled for outer
    /// joins without an outer filter.
    push_required_rows: bool,

    current_batch: Option<Batch>,
    current_charge: i64,

    /// Filter results for the current batch's visible rows.
    filter_mask: Option<Bitmap>,

    group_range: Option<Range<usize>>,
    group_row: usize,

    input_exhausted: bool,
}

impl OuterCursor {
    pub fn new(
        child: BoxedExecutor,
        key_columns: Vec<usize>,
        desc: bool,
        filter: Option<PhysicalScalarExpression>,
        mem_tracker: Arc<MemoryTracker>,
        push_required_rows: bool,
    ) -> Self {
        let push_required_rows = push_required_rows && filter.is_none();
        OuterCursor {
            child,
            checker: GroupChecker::new(key_columns.iter().copied(), desc),
            key_columns,
            filter,
            mem_tracker,
            push_required_rows,
            current_batch: None,
            current_charge: 0,
            filter_mask: None,
            group_range: None,
            group_row: 0,
            input_exhausted: false,
        }
    }

    /// Row at the current group position, None when the group is consumed.
    pub fn current_row(&self) -> Option<RowRef<'_>> {
        let range = self.group_range.as_ref()?;
        if self.group_row >= range.len() {
            return None;
        }
        self.current_batch.as_ref()?.row(range.start + self.group_row)
    }

    pub fn current_row_has_null_key(&self) -> Result<bool> {
        let row = self.current_row().required("current outer row")?;
        key_has_null(row, &self.key_columns)
    }

    pub fn current_row_passes_filter(&self) -> bool {
        let (Some(mask), Some(range)) = (&self.filter_mask, &self.group_range) else {
            return true;
        };
        mask.value(range.start + self.group_row)
    }

    pub fn advance_row(&mut self) {
        self.group_row += 1;
        if let Some(range) = &self.group_range {
            if self.group_row >= range.len() {
                self.group_range = None;
                self.group_row = 0;
            }
        }
    }

    /// Select the next group, pulling an input batch when needed.
    ///
    /// `required_rows` is the number of output rows the driver still needs;
    /// it is forwarded to the child when the push-down path is enabled.
    /// Returns false when the outer side is exhausted.
    pub fn fetch_next_group(
        &mut self,
        ctx: &ExecutionContext,
        required_rows: usize,
        max_chunk_size: usize,
    ) -> Result<bool> {
        loop {
            if let Some(range) = self.checker.next_group() {
                self.group_range = Some(range);
                self.group_row = 0;
                return Ok(true);
            }

            if self.input_exhausted {
                return Ok(false);
            }

            ctx.check_cancelled()?;

            if self.push_required_rows {
                self.child.set_required_rows(required_rows, max_chunk_size);
            }

            let batch = match self.child.next(ctx)? {
                Some(batch) if batch.num_rows() > 0 => batch,
                _ => {
                    trace!("outer input exhausted");
                    self.input_exhausted = true;
                    continue;
                }
            };

            if self.current_batch.take().is_some() {
                self.mem_tracker.consume(-self.current_charge)?;
                self.current_charge = 0;
            }

            let bytes = batch.memory_size() as i64;
            self.mem_tracker.consume(bytes)?;
            self.current_charge = bytes;

            self.filter_mask = match &self.filter {
                Some(filter) => Some(filter.select(&batch)?),
                None => None,
            };

            // Outer groups never span batches, the carry-flag is irrelevant
            // here.
            let _ = self.checker.split(&batch)?;
            self.current_batch = Some(batch);
        }
    }

    /// Release the held batch, returning the child executor.
    pub fn release(mut self) -> Result<BoxedExecutor> {
        self.group_range = None;
        self.filter_mask = None;
        if self.current_batch.take().is_some() {
            self.mem_tracker.consume(-self.current_charge)?;
            self.current_charge = 0;
        }
        Ok(self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::super::row_store::RowStoreOpts;
    use super::*;
    use crate::execution::operators::test_util::TestBatchSource;
    use ordexec_column::datatype::DataType;
    use ordexec_column::scalar::ScalarValue;
    use ordexec_error::OptionExt;

    fn inner_cursor(
        chunks: &[&[(Option<i64>, i64)]],
    ) -> (InnerCursor, Arc<MemoryTracker>, Arc<MemoryTracker>) {
        let mem = Arc::new(MemoryTracker::new("test.inner"));
        let disk = Arc::new(MemoryTracker::new("test.disk"));
        let store = RowStore::new(
            vec![DataType::Int64, DataType::Int64],
            mem.clone(),
            disk.clone(),
            RowStoreOpts {
                enable_spill: true,
                spill_threshold_bytes: 0,
                scratch_dir: None,
            },
        );
        let child = Box::new(TestBatchSource::keyed(chunks));
        let cursor = InnerCursor::new(child, vec![0], false, store, mem.clone());
        (cursor, mem, disk)
    }

    fn collect_group_payloads(cursor: &mut InnerCursor) -> Vec<i64> {
        let mut iter = cursor.group_iter();
        let mut got = Vec::new();
        loop {
            let Some(row) = iter.current_row().unwrap() else {
                break;
            };
            match row.value(1).unwrap() {
                ScalarValue::Int64(v) => got.push(v),
                other => panic!("unexpected payload {other:?}"),
            }
            iter.advance();
        }
        got
    }

    #[test]
    fn single_batch_groups() {
        let (mut cursor, _, _) =
            inner_cursor(&[&[(Some(1), 10), (Some(2), 20), (Some(2), 21), (Some(3), 30)]]);
        let ctx = ExecutionContext::new();

        cursor.fetch_next_group(&ctx).unwrap();
        assert!(!cursor.group_is_empty());
        assert_eq!(vec![10], collect_group_payloads(&mut cursor));

        cursor.fetch_next_group(&ctx).unwrap();
        assert_eq!(vec![20, 21], collect_group_payloads(&mut cursor));

        cursor.fetch_next_group(&ctx).unwrap();
        assert_eq!(vec![30], collect_group_payloads(&mut cursor));

        cursor.fetch_next_group(&ctx).unwrap();
        assert!(cursor.group_is_empty());
    }

    #[test]
    fn group_spans_batches() {
        // Key 2 spans three input batches.
        let (mut cursor, _, _) = inner_cursor(&[
            &[(Some(2), 1), (Some(2), 2)],
            &[(Some(2), 3), (Some(2), 4)],
            &[(Some(2), 5), (Some(3), 6)],
        ]);
        let ctx = ExecutionContext::new();

        cursor.fetch_next_group(&ctx).unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5], collect_group_payloads(&mut cursor));
        assert_eq!(2, cursor.store().num_batches());

        cursor.fetch_next_group(&ctx).unwrap();
        assert_eq!(vec![6], collect_group_payloads(&mut cursor));
        assert_eq!(0, cursor.store().num_batches());

        cursor.fetch_next_group(&ctx).unwrap();
        assert!(cursor.group_is_empty());
    }

    #[test]
    fn iterator_position_survives_reborrow() {
        let (mut cursor, _, _) = inner_cursor(&[&[(Some(7), 1), (Some(7), 2), (Some(7), 3)]]);
        let ctx = ExecutionContext::new();
        cursor.fetch_next_group(&ctx).unwrap();

        {
            let mut iter = cursor.group_iter();
            iter.current_row().unwrap().required("row").unwrap();
            iter.advance();
        }

        // New iterator continues from the saved position.
        assert_eq!(vec![2, 3], collect_group_payloads(&mut cursor));

        cursor.rewind_group_iter();
        assert_eq!(vec![1, 2, 3], collect_group_payloads(&mut cursor));
    }

    #[test]
    fn null_runs_dropped() {
        let (mut cursor, _, _) = inner_cursor(&[&[(None, 1), (None, 2), (Some(5), 3)]]);
        let ctx = ExecutionContext::new();

        cursor.fetch_next_group(&ctx).unwrap();
        assert_eq!(vec![3], collect_group_payloads(&mut cursor));
    }

    #[test]
    fn memory_released_on_release() {
        let (mut cursor, mem, _) = inner_cursor(&[
            &[(Some(2), 1), (Some(2), 2)],
            &[(Some(2), 3), (Some(4), 4)],
        ]);
        let ctx = ExecutionContext::new();

        cursor.fetch_next_group(&ctx).unwrap();
        assert!(mem.bytes() > 0);

        cursor.release().unwrap();
        assert_eq!(0, mem.bytes());
    }

    #[test]
    fn outer_groups_confined_to_batch() {
        let mem = Arc::new(MemoryTracker::new("test.outer"));
        let child = Box::new(TestBatchSource::keyed(&[
            &[(Some(1), 10), (Some(2), 20)],
            &[(Some(2), 21)],
        ]));
        let mut cursor = OuterCursor::new(child, vec![0], false, None, mem, false);
        let ctx = ExecutionContext::new();

        assert!(cursor.fetch_next_group(&ctx, 1024, 1024).unwrap());
        assert_eq!(
            ScalarValue::Int64(10),
            cursor.current_row().unwrap().value(1).unwrap()
        );
        cursor.advance_row();
        assert!(cursor.current_row().is_none());

        // Key 2 appears as two groups, one per batch.
        assert!(cursor.fetch_next_group(&ctx, 1024, 1024).unwrap());
        cursor.advance_row();
        assert!(cursor.fetch_next_group(&ctx, 1024, 1024).unwrap());
        assert_eq!(
            ScalarValue::Int64(21),
            cursor.current_row().unwrap().value(1).unwrap()
        );
        cursor.advance_row();

        assert!(!cursor.fetch_next_group(&ctx, 1024, 1024).unwrap());
    }
}
