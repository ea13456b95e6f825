use super::cursor::InnerGroupIter;
use crate::expr::physical::{JoinedRow, PhysicalScalarExpression};
use ordexec_column::buffer::BatchBuffer;
use ordexec_column::field::Schema;
use ordexec_column::row::RowRef;
use ordexec_column::scalar::ScalarValue;
use ordexec_error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
    Semi,
    Anti,
    /// Anti join with NOT IN semantics: a NULL comparison anywhere suppresses
    /// the outer row.
    NullAwareAnti,
}

impl JoinKind {
    pub fn is_outer(&self) -> bool {
        matches!(self, Self::LeftOuter | Self::RightOuter)
    }
}

/// Result of offering one outer row to an inner group.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchResult {
    /// True iff the outer row produced (or, for semi/anti, found) a match.
    pub matched: bool,

    /// True iff the residual condition evaluated to NULL for some pair.
    pub produced_null: bool,
}

/// Encodes the join variant.
///
/// The driver is agnostic to the variant beyond this interface: `try_match`
/// for key-equal row pairs, `on_miss_match` for outer rows with no match.
#[derive(Debug)]
pub struct Matcher {
    kind: JoinKind,

    /// Residual non-equi condition over the joined row, left columns then
    /// right columns.
    condition: Option<PhysicalScalarExpression>,

    schema: Schema,

    /// Column count of the padded side for outer joins.
    inner_width: usize,

    /// For right outer joins the driving (outer) side is the right input, but
    /// output columns stay in left-then-right order.
    outer_is_right: bool,
}

impl Matcher {
    pub fn new(
        kind: JoinKind,
        outer_schema: &Schema,
        inner_schema: &Schema,
        condition: Option<PhysicalScalarExpression>,
    ) -> Self {
        let outer_is_right = kind == JoinKind::RightOuter;

        let schema = match kind {
            JoinKind::Inner | JoinKind::LeftOuter => outer_schema.merge(inner_schema),
            JoinKind::RightOuter => inner_schema.merge(outer_schema),
            JoinKind::Semi | JoinKind::Anti | JoinKind::NullAwareAnti => outer_schema.clone(),
        };

        Matcher {
            kind,
            condition,
            schema,
            inner_width: inner_schema.num_columns(),
            outer_is_right,
        }
    }

    /// Output column layout.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    /// Offer `outer_row` to the inner group.
    ///
    /// Advances the iterator, appending result rows until the output is full
    /// or the group is exhausted. When the output fills first, the iterator
    /// position is preserved so the next call resumes mid-group.
    pub fn try_match(
        &self,
        outer_row: RowRef,
        inner: &mut InnerGroupIter,
        out: &mut BatchBuffer,
    ) -> Result<MatchResult> {
        match self.kind {
            JoinKind::Inner | JoinKind::LeftOuter | JoinKind::RightOuter => {
                self.match_joining(outer_row, inner, out)
            }
            JoinKind::Semi => self.match_semi(outer_row, inner, out),
            JoinKind::Anti | JoinKind::NullAwareAnti => self.match_anti(outer_row, inner),
        }
    }

    fn match_joining(
        &self,
        outer_row: RowRef,
        inner: &mut InnerGroupIter,
        out: &mut BatchBuffer,
    ) -> Result<MatchResult> {
        let mut result = MatchResult::default();

        loop {
            if out.is_full() {
                return Ok(result);
            }

            let inner_row = match inner.current_row()? {
                Some(row) => row,
                None => return Ok(result),
            };

            match self.condition_holds(outer_row, inner_row)? {
                None => result.produced_null = true,
                Some(false) => (),
                Some(true) => {
                    self.push_joined(outer_row, inner_row, out)?;
                    result.matched = true;
                }
            }

            inner.advance();
        }
    }

    fn match_semi(
        &self,
        outer_row: RowRef,
        inner: &mut InnerGroupIter,
        out: &mut BatchBuffer,
    ) -> Result<MatchResult> {
        let mut result = MatchResult::default();

        loop {
            let inner_row = match inner.current_row()? {
                Some(row) => row,
                None => return Ok(result),
            };

            match self.condition_holds(outer_row, inner_row)? {
                None => {
                    result.produced_null = true;
                    inner.advance();
                }
                Some(false) => inner.advance(),
                Some(true) => {
                    // Suspend without consuming the row if the output is
                    // full; the next call lands on it again.
                    if out.is_full() {
                        return Ok(result);
                    }
                    out.push_row(outer_row.values()?)?;
                    result.matched = true;
                    inner.seek_to_end();
                    return Ok(result);
                }
            }
        }
    }

    fn match_anti(&self, outer_row: RowRef, inner: &mut InnerGroupIter) -> Result<MatchResult> {
        let mut result = MatchResult::default();

        loop {
            let inner_row = match inner.current_row()? {
                Some(row) => row,
                None => return Ok(result),
            };

            match self.condition_holds(outer_row, inner_row)? {
                None => result.produced_null = true,
                Some(false) => (),
                Some(true) => {
                    result.matched = true;
                    inner.seek_to_end();
                    return Ok(result);
                }
            }

            inner.advance();
        }
    }

    /// Append whatever the join semantics dictate for an outer row with no
    /// inner match. The caller guarantees output capacity for one row.
    pub fn on_miss_match(
        &self,
        outer_had_null: bool,
        outer_row: RowRef,
        out: &mut BatchBuffer,
    ) -> Result<()> {
        match self.kind {
            JoinKind::Inner | JoinKind::Semi => Ok(()),
            JoinKind::LeftOuter => {
                let nulls = (0..self.inner_width).map(|_| ScalarValue::Null);
                out.push_row(outer_row.values()?.into_iter().chain(nulls))
            }
            JoinKind::RightOuter => {
                let nulls = (0..self.inner_width).map(|_| ScalarValue::Null);
                out.push_row(nulls.chain(outer_row.values()?))
            }
            JoinKind::Anti => out.push_row(outer_row.values()?),
            JoinKind::NullAwareAnti => {
                if outer_had_null {
                    return Ok(());
                }
                out.push_row(outer_row.values()?)
            }
        }
    }

    fn condition_holds(&self, outer_row: RowRef, inner_row: RowRef) -> Result<Option<bool>> {
        let condition = match &self.condition {
            Some(condition) => condition,
            None => return Ok(Some(true)),
        };

        let joined = if self.outer_is_right {
            JoinedRow {
                left: inner_row,
                right: outer_row,
            }
        } else {
            JoinedRow {
                left: outer_row,
                right: inner_row,
            }
        };

        condition.eval_predicate(&joined)
    }

    fn push_joined(
        &self,
        outer_row: RowRef,
        inner_row: RowRef,
        out: &mut BatchBuffer,
    ) -> Result<()> {
        if self.outer_is_right {
            out.push_row(inner_row.values()?.into_iter().chain(outer_row.values()?))
        } else {
            out.push_row(outer_row.values()?.into_iter().chain(inner_row.values()?))
        }
    }
}
