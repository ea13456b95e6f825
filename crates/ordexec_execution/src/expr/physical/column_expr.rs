use super::RowValues;
use ordexec_column::scalar::OwnedScalarValue;
use ordexec_error::Result;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalColumnExpr {
    pub idx: usize,
}

impl PhysicalColumnExpr {
    pub fn new(idx: usize) -> Self {
        PhysicalColumnExpr { idx }
    }

    pub fn eval_row(&self, row: &dyn RowValues) -> Result<OwnedScalarValue> {
        Ok(row.value(self.idx)?.into_owned())
    }
}

impl fmt::Display for PhysicalColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.idx)
    }
}
