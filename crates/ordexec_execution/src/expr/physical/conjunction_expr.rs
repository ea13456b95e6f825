use super::{PhysicalScalarExpression, RowValues};
use ordexec_column::scalar::{OwnedScalarValue, ScalarValue};
use ordexec_error::{OrdexecError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjunctionOp {
    And,
    Or,
}

impl fmt::Display for ConjunctionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalConjunctionExpr {
    pub op: ConjunctionOp,
    pub expressions: Vec<PhysicalScalarExpression>,
}

impl PhysicalConjunctionExpr {
    pub fn new(op: ConjunctionOp, expressions: Vec<PhysicalScalarExpression>) -> Self {
        PhysicalConjunctionExpr { op, expressions }
    }

    /// Three-valued logic: for AND, false dominates NULL; for OR, true
    /// dominates NULL.
    pub fn eval_row(&self, row: &dyn RowValues) -> Result<OwnedScalarValue> {
        let mut saw_null = false;

        for expr in &self.expressions {
            match expr.eval_row(row)? {
                ScalarValue::Null => saw_null = true,
                ScalarValue::Boolean(b) => match self.op {
                    ConjunctionOp::And if !b => return Ok(ScalarValue::Boolean(false)),
                    ConjunctionOp::Or if b => return Ok(ScalarValue::Boolean(true)),
                    _ => (),
                },
                other => {
                    return Err(OrdexecError::new(format!(
                        "Expected boolean operand in {}, got {other}",
                        self.op
                    )))
                }
            }
        }

        if saw_null {
            return Ok(ScalarValue::Null);
        }

        Ok(ScalarValue::Boolean(self.op == ConjunctionOp::And))
    }
}

impl fmt::Display for PhysicalConjunctionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, expr) in self.expressions.iter().enumerate() {
            if idx > 0 {
                write!(f, " {} ", self.op)?;
            }
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}
