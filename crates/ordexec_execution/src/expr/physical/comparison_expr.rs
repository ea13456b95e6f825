use super::{PhysicalScalarExpression, RowValues};
use crate::expr::sort_key::compare_scalars;
use ordexec_column::scalar::{OwnedScalarValue, ScalarValue};
use ordexec_error::Result;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    fn matches(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::NotEq => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::LtEq => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::GtEq => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalComparisonExpr {
    pub op: ComparisonOp,
    pub left: Box<PhysicalScalarExpression>,
    pub right: Box<PhysicalScalarExpression>,
}

impl PhysicalComparisonExpr {
    pub fn new(
        op: ComparisonOp,
        left: PhysicalScalarExpression,
        right: PhysicalScalarExpression,
    ) -> Self {
        PhysicalComparisonExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Comparison against NULL is NULL.
    pub fn eval_row(&self, row: &dyn RowValues) -> Result<OwnedScalarValue> {
        let left = self.left.eval_row(row)?;
        let right = self.right.eval_row(row)?;

        if left.is_null() || right.is_null() {
            return Ok(ScalarValue::Null);
        }

        let ord = compare_scalars(&left, &right)?;
        Ok(ScalarValue::Boolean(self.op.matches(ord)))
    }
}

impl fmt::Display for PhysicalComparisonExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}
