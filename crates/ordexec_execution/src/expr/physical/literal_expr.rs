use super::RowValues;
use ordexec_column::scalar::OwnedScalarValue;
use ordexec_error::Result;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalLiteralExpr {
    pub literal: OwnedScalarValue,
}

impl PhysicalLiteralExpr {
    pub fn new(literal: impl Into<OwnedScalarValue>) -> Self {
        PhysicalLiteralExpr {
            literal: literal.into(),
        }
    }

    pub fn eval_row(&self, _row: &dyn RowValues) -> Result<OwnedScalarValue> {
        Ok(self.literal.clone())
    }
}

impl fmt::Display for PhysicalLiteralExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.literal)
    }
}
