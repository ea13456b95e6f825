//! Sort-merge join.
//!
//! Joins two children that are already sorted on their join keys. The inner
//! side is consumed one complete key group at a time (spilling oversized
//! groups to disk), the outer side row by row. A pluggable matcher encodes
//! the join variant.

pub mod cursor;
pub mod group_checker;
pub mod matcher;
pub mod row_store;

use cursor::{InnerCursor, OuterCursor};
use matcher::{JoinKind, Matcher};
use ordexec_column::buffer::BatchBuffer;
use ordexec_column::field::Schema;
use ordexec_error::{OptionExt, OrdexecError, Result};
use row_store::{RowStore, RowStoreOpts};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

use crate::execution::context::ExecutionContext;
use crate::execution::executor::BoxedExecutor;
use crate::expr::physical::PhysicalScalarExpression;
use crate::expr::sort_key::SortKeyComparator;
use crate::runtime::tracker::MemoryTracker;

#[derive(Debug, Clone)]
pub struct MergeJoinConfig {
    /// Declared sort direction of both inputs.
    pub desc: bool,

    /// Must agree with the join kind; enables the required-rows push-down to
    /// the outer child.
    pub is_outer_join: bool,

    /// When false the inner store never spills and memory exhaustion is
    /// fatal.
    pub enable_spill: bool,

    /// Upper bound on batch row counts.
    pub max_chunk_size: usize,

    /// High-water mark for the inner store, 0 disables it.
    pub spill_threshold_bytes: usize,

    /// Counter label for the inner store.
    pub inner_spill_label: String,

    /// Counter label for the outer side.
    pub outer_label: String,

    /// Where to put spill scratch directories, system temp dir when None.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for MergeJoinConfig {
    fn default() -> Self {
        MergeJoinConfig {
            desc: false,
            is_outer_join: false,
            enable_spill: true,
            max_chunk_size: 1024,
            spill_threshold_bytes: 32 * 1024 * 1024,
            inner_spill_label: "merge_join.inner_store".to_string(),
            outer_label: "merge_join.outer".to_string(),
            scratch_dir: None,
        }
    }
}

impl MergeJoinConfig {
    pub fn for_kind(kind: JoinKind) -> Self {
        MergeJoinConfig {
            is_outer_join: kind.is_outer(),
            ..Default::default()
        }
    }
}

/// Which side the merge loop advances after a key comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    /// Keys are equal, run the matcher.
    Match,
    /// The inner group lies behind the outer row, abandon it.
    Inner,
    /// The outer row lies behind the inner group (or the inner side is done),
    /// take the miss-match path.
    Outer,
}

/// Sort-merge join operator.
///
/// `open` initialises both sides, `next` fills the caller's output buffer,
/// `close` releases resources and is idempotent. An empty output from `next`
/// signals exhaustion.
#[derive(Debug)]
pub struct MergeJoinOperator {
    kind: JoinKind,
    config: MergeJoinConfig,
    outer_keys: Vec<usize>,
    inner_keys: Vec<usize>,
    outer_filter: Option<PhysicalScalarExpression>,

    matcher: Matcher,
    comparator: SortKeyComparator,

    /// Children parked here while the operator is closed.
    outer_child: Option<BoxedExecutor>,
    inner_child: Option<BoxedExecutor>,

    mem_tracker: Arc<MemoryTracker>,
    disk_tracker: Arc<MemoryTracker>,
    inner_tracker: Arc<MemoryTracker>,
    outer_tracker: Arc<MemoryTracker>,

    inner: Option<InnerCursor>,
    outer: Option<OuterCursor>,

    /// Whether the current outer row matched anything, carried across `next`
    /// calls for the miss-match decision.
    has_match: bool,

    /// Whether a residual condition evaluated to NULL for the current outer
    /// row.
    has_null: bool,

    opened: bool,
    finished: bool,
}

impl MergeJoinOperator {
    /// Build the operator. The outer child is the driving side: left for
    /// inner/left-outer/semi/anti joins, right for right-outer joins.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        kind: JoinKind,
        outer_child: BoxedExecutor,
        inner_child: BoxedExecutor,
        outer_keys: Vec<usize>,
        inner_keys: Vec<usize>,
        outer_filter: Option<PhysicalScalarExpression>,
        condition: Option<PhysicalScalarExpression>,
        config: MergeJoinConfig,
    ) -> Result<Self> {
        let comparator = SortKeyComparator::try_new(
            outer_keys.iter().copied(),
            inner_keys.iter().copied(),
        )?;
        let matcher = Matcher::new(kind, outer_child.schema(), inner_child.schema(), condition);

        let mem_tracker = Arc::new(MemoryTracker::new("merge_join"));
        let disk_tracker = Arc::new(MemoryTracker::new("merge_join.disk"));
        let inner_tracker = Arc::new(MemoryTracker::new(config.inner_spill_label.clone()));
        let outer_tracker = Arc::new(MemoryTracker::new(config.outer_label.clone()));
        inner_tracker.attach(&mem_tracker);
        outer_tracker.attach(&mem_tracker);

        Ok(MergeJoinOperator {
            kind,
            config,
            outer_keys,
            inner_keys,
            outer_filter,
            matcher,
            comparator,
            outer_child: Some(outer_child),
            inner_child: Some(inner_child),
            mem_tracker,
            disk_tracker,
            inner_tracker,
            outer_tracker,
            inner: None,
            outer: None,
            has_match: false,
            has_null: false,
            opened: false,
            finished: false,
        })
    }

    /// Output column layout.
    pub fn schema(&self) -> &Schema {
        self.matcher.schema()
    }

    /// Initialise both sides and attach the operator's counters to the
    /// session tree.
    pub fn open(&mut self, ctx: &ExecutionContext) -> Result<()> {
        if self.opened {
            return Err(OrdexecError::invariant("Merge join opened twice"));
        }

        self.validate_plan()?;

        self.mem_tracker.attach(ctx.memory_root());
        self.disk_tracker.attach(ctx.disk_root());

        let inner_child = self.inner_child.take().required("inner child")?;
        let outer_child = self.outer_child.take().required("outer child")?;

        let store = RowStore::new(
            inner_child.schema().datatypes(),
            self.inner_tracker.clone(),
            self.disk_tracker.clone(),
            RowStoreOpts {
                enable_spill: self.config.enable_spill,
                spill_threshold_bytes: self.config.spill_threshold_bytes,
                scratch_dir: self.config.scratch_dir.clone(),
            },
        );
        if self.config.enable_spill {
            // Reactive path: the session supervisor may force a spill before
            // the store's own high-water mark is reached.
            ctx.memory_root().register_spill_action(store.spill_action());
        }

        self.inner = Some(InnerCursor::new(
            inner_child,
            self.inner_keys.clone(),
            self.config.desc,
            store,
            self.inner_tracker.clone(),
        ));
        self.outer = Some(OuterCursor::new(
            outer_child,
            self.outer_keys.clone(),
            self.config.desc,
            self.outer_filter.clone(),
            self.outer_tracker.clone(),
            self.config.is_outer_join,
        ));

        self.has_match = false;
        self.has_null = false;
        self.finished = false;
        self.opened = true;

        Ok(())
    }

    /// Produce the next output rows, at most `out.capacity()`.
    ///
    /// Leaves `out` empty once the join is exhausted. After an error the
    /// operator is unusable until `close`.
    pub fn next(&mut self, ctx: &ExecutionContext, out: &mut BatchBuffer) -> Result<()> {
        if !self.opened {
            return Err(OrdexecError::invariant("next called on unopened merge join"));
        }

        out.reset();

        if out.datatypes() != self.matcher.schema().datatypes().as_slice() {
            return Err(OrdexecError::invariant(
                "Output buffer layout does not match the join schema",
            ));
        }

        if self.finished {
            return Ok(());
        }

        while !out.is_full() {
            if self.inner.as_ref().required("inner cursor")?.needs_group() {
                self.inner
                    .as_mut()
                    .required("inner cursor")?
                    .fetch_next_group(ctx)?;
            }

            if self
                .outer
                .as_ref()
                .required("outer cursor")?
                .current_row()
                .is_none()
            {
                let required_rows = out.remaining().max(1);
                let fetched = self.outer.as_mut().required("outer cursor")?.fetch_next_group(
                    ctx,
                    required_rows,
                    self.config.max_chunk_size,
                )?;
                if !fetched {
                    trace!("outer side exhausted, join finished");
                    self.finished = true;
                    return Ok(());
                }
            }

            self.join_step(out)?;
        }

        Ok(())
    }

    /// One merge tick: compare the current outer row against the inner group
    /// and advance the lagging side or run the matcher.
    fn join_step(&mut self, out: &mut BatchBuffer) -> Result<()> {
        let MergeJoinOperator {
            config,
            matcher,
            comparator,
            inner,
            outer,
            has_match,
            has_null,
            ..
        } = self;
        let inner = inner.as_mut().required("inner cursor")?;
        let outer = outer.as_mut().required("outer cursor")?;

        // Null-keyed outer rows can never match; the whole group shares the
        // key, route it to the miss-match path.
        if outer.current_row_has_null_key()? {
            while !out.is_full() {
                let Some(row) = outer.current_row() else { break };
                matcher.on_miss_match(true, row, out)?;
                outer.advance_row();
            }
            return Ok(());
        }

        let advance = if inner.group_is_empty() {
            // Inner side is past its end, remaining outer rows miss.
            Advance::Outer
        } else {
            let outer_row = outer.current_row().required("current outer row")?;
            let ord = comparator.compare_rows(outer_row, inner.group_head_row()?)?;
            match ord {
                Ordering::Equal => Advance::Match,
                Ordering::Less if !config.desc => Advance::Outer,
                Ordering::Greater if config.desc => Advance::Outer,
                _ => Advance::Inner,
            }
        };

        match advance {
            Advance::Inner => {
                inner.abandon_group();
                Ok(())
            }
            Advance::Outer => {
                while !out.is_full() {
                    let Some(row) = outer.current_row() else { break };
                    matcher.on_miss_match(false, row, out)?;
                    outer.advance_row();
                }
                Ok(())
            }
            Advance::Match => {
                while !out.is_full() {
                    let Some(row) = outer.current_row() else {
                        // Outer group consumed; the inner group stays for the
                        // next outer group, which may carry the same key.
                        break;
                    };

                    if !outer.current_row_passes_filter() {
                        matcher.on_miss_match(false, row, out)?;
                        outer.advance_row();
                        *has_match = false;
                        *has_null = false;
                        continue;
                    }

                    let res = matcher.try_match(row, &mut inner.group_iter(), out)?;
                    *has_match |= res.matched;
                    *has_null |= res.produced_null;

                    if !inner.group_iter().at_end()? {
                        // Output filled mid-group; the iterator position is
                        // preserved and the next call resumes on this row.
                        debug_assert!(out.is_full());
                        return Ok(());
                    }

                    if !*has_match {
                        if out.is_full() {
                            // Suspend before the miss-match append.
                            return Ok(());
                        }
                        matcher.on_miss_match(*has_null, row, out)?;
                    }

                    *has_match = false;
                    *has_null = false;
                    inner.rewind_group_iter();
                    outer.advance_row();
                }
                Ok(())
            }
        }
    }

    /// Release both sides, inner first. Safe after errors and idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.opened {
            return Ok(());
        }
        self.opened = false;

        let mut first_err = None;

        if let Some(inner) = self.inner.take() {
            match inner.release() {
                Ok(child) => self.inner_child = Some(child),
                Err(e) => first_err = first_err.or(Some(e)),
            }
        }
        if let Some(outer) = self.outer.take() {
            match outer.release() {
                Ok(child) => self.outer_child = Some(child),
                Err(e) => first_err = first_err.or(Some(e)),
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn validate_plan(&self) -> Result<()> {
        if self.config.is_outer_join != self.kind.is_outer() {
            return Err(OrdexecError::invariant(format!(
                "Config is_outer_join={} disagrees with join kind {:?}",
                self.config.is_outer_join, self.kind
            )));
        }
        if self.config.max_chunk_size == 0 {
            return Err(OrdexecError::invariant("max_chunk_size must be at least 1"));
        }

        let outer_schema = self.outer_child.as_ref().required("outer child")?.schema();
        let inner_schema = self.inner_child.as_ref().required("inner child")?.schema();

        for (outer_col, inner_col) in self.outer_keys.iter().zip(self.inner_keys.iter()) {
            let outer_field = outer_schema.fields.get(*outer_col).ok_or_else(|| {
                OrdexecError::invariant(format!("Outer key column {outer_col} out of bounds"))
            })?;
            let inner_field = inner_schema.fields.get(*inner_col).ok_or_else(|| {
                OrdexecError::invariant(format!("Inner key column {inner_col} out of bounds"))
            })?;

            if outer_field.datatype != inner_field.datatype {
                return Err(OrdexecError::invariant(format!(
                    "Join key type mismatch: {} is {}, {} is {}",
                    outer_field.name,
                    outer_field.datatype,
                    inner_field.name,
                    inner_field.datatype
                )));
            }
        }

        Ok(())
    }
}
