use crate::array::{Array, BooleanArray, PrimitiveArray, Utf8Array};
use crate::bitmap::Bitmap;
use crate::datatype::DataType;
use crate::scalar::ScalarValue;
use ordexec_error::{OrdexecError, Result};

/// Incrementally build an array of a fixed type.
///
/// NULLs may be pushed for any type. Pushing a non-NULL value of the wrong
/// type is an error.
#[derive(Debug)]
pub enum ArrayBuilder {
    Boolean(BooleanBuilder),
    Int32(PrimitiveBuilder<i32>),
    Int64(PrimitiveBuilder<i64>),
    Float64(PrimitiveBuilder<f64>),
    Utf8(Utf8Builder),
}

impl ArrayBuilder {
    pub fn new(datatype: DataType, capacity: usize) -> Self {
        match datatype {
            DataType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            DataType::Int32 => Self::Int32(PrimitiveBuilder::with_capacity(capacity)),
            DataType::Int64 => Self::Int64(PrimitiveBuilder::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(PrimitiveBuilder::with_capacity(capacity)),
            DataType::Utf8 => Self::Utf8(Utf8Builder::with_capacity(capacity)),
        }
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(b) => b.len(),
            Self::Int32(b) => b.len(),
            Self::Int64(b) => b.len(),
            Self::Float64(b) => b.len(),
            Self::Utf8(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, value: ScalarValue) -> Result<()> {
        match (self, value) {
            (builder, ScalarValue::Null) => builder.push_null(),
            (Self::Boolean(b), ScalarValue::Boolean(v)) => b.push(v),
            (Self::Int32(b), ScalarValue::Int32(v)) => b.push(v),
            (Self::Int64(b), ScalarValue::Int64(v)) => b.push(v),
            (Self::Float64(b), ScalarValue::Float64(v)) => b.push(v),
            (Self::Utf8(b), ScalarValue::Utf8(v)) => b.push(&v),
            (builder, value) => {
                return Err(OrdexecError::new(format!(
                    "Cannot push {} value into {} builder",
                    value.datatype().map(|d| d.to_string()).unwrap_or_default(),
                    builder.datatype()
                )))
            }
        }
        Ok(())
    }

    pub fn push_null(&mut self) {
        match self {
            Self::Boolean(b) => b.push_null(),
            Self::Int32(b) => b.push_null(),
            Self::Int64(b) => b.push_null(),
            Self::Float64(b) => b.push_null(),
            Self::Utf8(b) => b.push_null(),
        }
    }

    /// Finish the array built so far, leaving the builder empty and reusable.
    pub fn finish(&mut self) -> Array {
        match self {
            Self::Boolean(b) => Array::Boolean(b.finish()),
            Self::Int32(b) => Array::Int32(b.finish()),
            Self::Int64(b) => Array::Int64(b.finish()),
            Self::Float64(b) => Array::Float64(b.finish()),
            Self::Utf8(b) => Array::Utf8(b.finish()),
        }
    }
}

#[derive(Debug)]
pub struct PrimitiveBuilder<T> {
    validity: Bitmap,
    values: Vec<T>,
}

impl<T: Default> PrimitiveBuilder<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        PrimitiveBuilder {
            validity: Bitmap::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn push(&mut self, value: T) {
        self.validity.push(true);
        self.values.push(value);
    }

    pub fn push_null(&mut self) {
        self.validity.push(false);
        self.values.push(T::default());
    }

    pub fn finish(&mut self) -> PrimitiveArray<T> {
        let values = std::mem::take(&mut self.values);
        let validity = finish_validity(std::mem::take(&mut self.validity));
        PrimitiveArray::new(values, validity)
    }
}

#[derive(Debug)]
pub struct BooleanBuilder {
    validity: Bitmap,
    values: Bitmap,
}

impl BooleanBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        BooleanBuilder {
            validity: Bitmap::with_capacity(capacity),
            values: Bitmap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn push(&mut self, value: bool) {
        self.validity.push(true);
        self.values.push(value);
    }

    pub fn push_null(&mut self) {
        self.validity.push(false);
        self.values.push(false);
    }

    pub fn finish(&mut self) -> BooleanArray {
        let values = std::mem::take(&mut self.values);
        let validity = finish_validity(std::mem::take(&mut self.validity));
        BooleanArray::new(values, validity)
    }
}

#[derive(Debug)]
pub struct Utf8Builder {
    validity: Bitmap,
    offsets: Vec<i32>,
    data: Vec<u8>,
}

impl Utf8Builder {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut offsets = Vec::with_capacity(capacity + 1);
        offsets.push(0);
        Utf8Builder {
            validity: Bitmap::with_capacity(capacity),
            offsets,
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn push(&mut self, value: &str) {
        self.validity.push(true);
        self.data.extend_from_slice(value.as_bytes());
        self.offsets.push(self.data.len() as i32);
    }

    pub fn push_null(&mut self) {
        self.validity.push(false);
        self.offsets.push(self.data.len() as i32);
    }

    pub fn finish(&mut self) -> Utf8Array {
        let offsets = std::mem::replace(&mut self.offsets, vec![0]);
        let data = std::mem::take(&mut self.data);
        let validity = finish_validity(std::mem::take(&mut self.validity));
        Utf8Array::new(offsets, data, validity)
    }
}

/// Drop the validity bitmap entirely when no nulls were pushed.
fn finish_validity(validity: Bitmap) -> Option<Bitmap> {
    if validity.count_trues() == validity.len() {
        None
    } else {
        Some(validity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Int64Array;

    #[test]
    fn build_primitive_no_nulls() {
        let mut builder = ArrayBuilder::new(DataType::Int64, 4);
        builder.push(ScalarValue::Int64(1)).unwrap();
        builder.push(ScalarValue::Int64(2)).unwrap();

        let got = builder.finish();
        assert_eq!(Array::Int64(Int64Array::from_iter([1, 2])), got);
    }

    #[test]
    fn build_with_nulls() {
        let mut builder = ArrayBuilder::new(DataType::Int32, 4);
        builder.push(ScalarValue::Int32(1)).unwrap();
        builder.push(ScalarValue::Null).unwrap();

        let got = builder.finish();
        assert_eq!(Some(ScalarValue::Null), got.scalar(1));
        assert_eq!(Some(ScalarValue::Int32(1)), got.scalar(0));
    }

    #[test]
    fn type_mismatch_errors() {
        let mut builder = ArrayBuilder::new(DataType::Int32, 4);
        builder.push(ScalarValue::Utf8("nope".into())).unwrap_err();
    }

    #[test]
    fn builder_reusable_after_finish() {
        let mut builder = ArrayBuilder::new(DataType::Utf8, 2);
        builder.push(ScalarValue::Utf8("a".into())).unwrap();
        let first = builder.finish();
        assert_eq!(1, first.len());

        builder.push(ScalarValue::Null).unwrap();
        builder.push(ScalarValue::Utf8("b".into())).unwrap();
        let second = builder.finish();
        assert_eq!(2, second.len());
        assert_eq!(Some(ScalarValue::Null), second.scalar(0));
    }
}
