pub mod column_expr;
pub mod comparison_expr;
pub mod conjunction_expr;
pub mod literal_expr;

use column_expr::PhysicalColumnExpr;
use comparison_expr::PhysicalComparisonExpr;
use conjunction_expr::PhysicalConjunctionExpr;
use literal_expr::PhysicalLiteralExpr;
use ordexec_column::batch::Batch;
use ordexec_column::bitmap::Bitmap;
use ordexec_column::row::RowRef;
use ordexec_column::scalar::{OwnedScalarValue, ScalarValue};
use ordexec_error::{OrdexecError, Result};
use std::fmt;

/// Values of a single logical row, addressable by column index.
pub trait RowValues {
    fn num_columns(&self) -> usize;
    fn value(&self, col: usize) -> Result<ScalarValue<'_>>;
}

impl RowValues for RowRef<'_> {
    fn num_columns(&self) -> usize {
        RowRef::num_columns(self)
    }

    fn value(&self, col: usize) -> Result<ScalarValue<'_>> {
        RowRef::value(self, col)
    }
}

/// A row formed by placing two rows side by side, left columns first.
///
/// Used to evaluate residual join conditions against a candidate row pair
/// without materialising the joined row.
#[derive(Debug, Clone, Copy)]
pub struct JoinedRow<'a> {
    pub left: RowRef<'a>,
    pub right: RowRef<'a>,
}

impl RowValues for JoinedRow<'_> {
    fn num_columns(&self) -> usize {
        self.left.num_columns() + self.right.num_columns()
    }

    fn value(&self, col: usize) -> Result<ScalarValue<'_>> {
        let left_cols = self.left.num_columns();
        if col < left_cols {
            self.left.value(col)
        } else {
            self.right.value(col - left_cols)
        }
    }
}

#[derive(Debug, Clone)]
pub enum PhysicalScalarExpression {
    Column(PhysicalColumnExpr),
    Literal(PhysicalLiteralExpr),
    Comparison(PhysicalComparisonExpr),
    Conjunction(PhysicalConjunctionExpr),
}

impl PhysicalScalarExpression {
    pub fn eval_row(&self, row: &dyn RowValues) -> Result<OwnedScalarValue> {
        match self {
            Self::Column(expr) => expr.eval_row(row),
            Self::Literal(expr) => expr.eval_row(row),
            Self::Comparison(expr) => expr.eval_row(row),
            Self::Conjunction(expr) => expr.eval_row(row),
        }
    }

    /// Evaluate as a predicate with SQL three-valued logic, None for NULL.
    pub fn eval_predicate(&self, row: &dyn RowValues) -> Result<Option<bool>> {
        match self.eval_row(row)? {
            ScalarValue::Null => Ok(None),
            ScalarValue::Boolean(b) => Ok(Some(b)),
            other => Err(OrdexecError::new(format!(
                "Expected predicate to return a boolean, got {other}"
            ))),
        }
    }

    /// Produce a mask over a batch's visible rows, one bit per row.
    ///
    /// NULL predicate results select nothing.
    pub fn select(&self, batch: &Batch) -> Result<Bitmap> {
        let mut mask = Bitmap::with_capacity(batch.num_rows());
        for idx in 0..batch.num_rows() {
            let row = batch
                .row(idx)
                .ok_or_else(|| OrdexecError::new(format!("Row {idx} out of bounds")))?;
            mask.push(self.eval_predicate(&row)?.unwrap_or(false));
        }
        Ok(mask)
    }
}

impl fmt::Display for PhysicalScalarExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(expr) => expr.fmt(f),
            Self::Literal(expr) => expr.fmt(f),
            Self::Comparison(expr) => expr.fmt(f),
            Self::Conjunction(expr) => expr.fmt(f),
        }
    }
}
