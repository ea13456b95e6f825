use crate::bitmap::Bitmap;
use crate::datatype::DataType;
use crate::scalar::ScalarValue;
use std::borrow::Cow;
use std::fmt::Debug;
use std::mem;

#[derive(Debug, PartialEq)]
pub enum Array {
    Boolean(BooleanArray),
    Int32(Int32Array),
    Int64(Int64Array),
    Float64(Float64Array),
    Utf8(Utf8Array),
}

impl Array {
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
            Self::Boolean(arr) => arr.len(),
            Self::Int32(arr) => arr.len(),
            Self::Int64(arr) => arr.len(),
            Self::Float64(arr) => arr.len(),
            Self::Utf8(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check validity at index, None if out of bounds.
    pub fn is_valid(&self, idx: usize) -> Option<bool> {
        match self {
            Self::Boolean(arr) => arr.is_valid(idx),
            Self::Int32(arr) => arr.is_valid(idx),
            Self::Int64(arr) => arr.is_valid(idx),
            Self::Float64(arr) => arr.is_valid(idx),
            Self::Utf8(arr) => arr.is_valid(idx),
        }
    }

    /// Get a scalar value at the given index.
    pub fn scalar(&self, idx: usize) -> Option<ScalarValue> {
        if !self.is_valid(idx)? {
            return Some(ScalarValue::Null);
        }

        Some(match self {
            Self::Boolean(arr) => ScalarValue::Boolean(arr.value(idx)?),
            Self::Int32(arr) => ScalarValue::Int32(*arr.value(idx)?),
            Self::Int64(arr) => ScalarValue::Int64(*arr.value(idx)?),
            Self::Float64(arr) => ScalarValue::Float64(*arr.value(idx)?),
            Self::Utf8(arr) => ScalarValue::Utf8(Cow::Borrowed(arr.value(idx)?)),
        })
    }

    /// Approximate heap memory usage in bytes.
    pub fn memory_size(&self) -> usize {
        match self {
            Self::Boolean(arr) => arr.memory_size(),
            Self::Int32(arr) => arr.memory_size(),
            Self::Int64(arr) => arr.memory_size(),
            Self::Float64(arr) => arr.memory_size(),
            Self::Utf8(arr) => arr.memory_size(),
        }
    }
}

fn validity_is_valid(validity: Option<&Bitmap>, idx: usize, len: usize) -> Option<bool> {
    if idx >= len {
        return None;
    }
    match validity {
        Some(bm) => Some(bm.value(idx)),
        None => Some(true),
    }
}

#[derive(Debug, PartialEq)]
pub struct PrimitiveArray<T> {
    /// Validity bitmap, None means all values are valid.
    validity: Option<Bitmap>,
    values: Vec<T>,
}

pub type Int32Array = PrimitiveArray<i32>;
pub type Int64Array = PrimitiveArray<i64>;
pub type Float64Array = PrimitiveArray<f64>;

impl<T> PrimitiveArray<T> {
    pub fn new(values: Vec<T>, validity: Option<Bitmap>) -> Self {
        if let Some(validity) = &validity {
            debug_assert_eq!(values.len(), validity.len());
        }
        PrimitiveArray { validity, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_valid(&self, idx: usize) -> Option<bool> {
        validity_is_valid(self.validity.as_ref(), idx, self.len())
    }

    pub fn value(&self, idx: usize) -> Option<&T> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn memory_size(&self) -> usize {
        self.values.capacity() * mem::size_of::<T>()
            + self.validity.as_ref().map(|v| v.memory_size()).unwrap_or(0)
    }
}

impl<T> FromIterator<T> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        PrimitiveArray {
            validity: None,
            values: iter.into_iter().collect(),
        }
    }
}

impl<T: Default> FromIterator<Option<T>> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let mut validity = Bitmap::new();
        let mut values = Vec::new();

        for item in iter {
            match item {
                Some(v) => {
                    validity.push(true);
                    values.push(v);
                }
                None => {
                    validity.push(false);
                    values.push(T::default());
                }
            }
        }

        PrimitiveArray {
            validity: Some(validity),
            values,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct BooleanArray {
    validity: Option<Bitmap>,
    values: Bitmap,
}

impl BooleanArray {
    pub fn new(values: Bitmap, validity: Option<Bitmap>) -> Self {
        if let Some(validity) = &validity {
            debug_assert_eq!(values.len(), validity.len());
        }
        BooleanArray { validity, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_valid(&self, idx: usize) -> Option<bool> {
        validity_is_valid(self.validity.as_ref(), idx, self.len())
    }

    pub fn value(&self, idx: usize) -> Option<bool> {
        if idx >= self.len() {
            return None;
        }
        Some(self.values.value(idx))
    }

    pub fn values(&self) -> &Bitmap {
        &self.values
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn memory_size(&self) -> usize {
        self.values.memory_size() + self.validity.as_ref().map(|v| v.memory_size()).unwrap_or(0)
    }
}

impl FromIterator<bool> for BooleanArray {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        BooleanArray {
            validity: None,
            values: Bitmap::from_bool_iter(iter),
        }
    }
}

impl FromIterator<Option<bool>> for BooleanArray {
    fn from_iter<I: IntoIterator<Item = Option<bool>>>(iter: I) -> Self {
        let mut validity = Bitmap::new();
        let mut values = Bitmap::new();

        for item in iter {
            validity.push(item.is_some());
            values.push(item.unwrap_or(false));
        }

        BooleanArray {
            validity: Some(validity),
            values,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Utf8Array {
    validity: Option<Bitmap>,
    /// Offsets into the data buffer, length is one more than the number of
    /// values.
    offsets: Vec<i32>,
    data: Vec<u8>,
}

impl Utf8Array {
    pub fn new(offsets: Vec<i32>, data: Vec<u8>, validity: Option<Bitmap>) -> Self {
        debug_assert!(!offsets.is_empty());
        if let Some(validity) = &validity {
            debug_assert_eq!(offsets.len() - 1, validity.len());
        }
        Utf8Array {
            validity,
            offsets,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self, idx: usize) -> Option<bool> {
        validity_is_valid(self.validity.as_ref(), idx, self.len())
    }

    pub fn value(&self, idx: usize) -> Option<&str> {
        if idx >= self.len() {
            return None;
        }
        let start = self.offsets[idx] as usize;
        let end = self.offsets[idx + 1] as usize;
        // Data is only ever built from str values.
        Some(std::str::from_utf8(&self.data[start..end]).expect("valid utf8"))
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn memory_size(&self) -> usize {
        self.offsets.capacity() * mem::size_of::<i32>()
            + self.data.capacity()
            + self.validity.as_ref().map(|v| v.memory_size()).unwrap_or(0)
    }
}

impl<'a> FromIterator<&'a str> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut offsets = vec![0];
        let mut data = Vec::new();

        for s in iter {
            data.extend_from_slice(s.as_bytes());
            offsets.push(data.len() as i32);
        }

        Utf8Array {
            validity: None,
            offsets,
            data,
        }
    }
}

impl<'a> FromIterator<Option<&'a str>> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = Option<&'a str>>>(iter: I) -> Self {
        let mut validity = Bitmap::new();
        let mut offsets = vec![0];
        let mut data = Vec::new();

        for item in iter {
            validity.push(item.is_some());
            if let Some(s) = item {
                data.extend_from_slice(s.as_bytes());
            }
            offsets.push(data.len() as i32);
        }

        Utf8Array {
            validity: Some(validity),
            offsets,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_scalar_access() {
        let arr = Array::Int64(Int64Array::from_iter([1, 2, 3]));

        assert_eq!(Some(ScalarValue::Int64(2)), arr.scalar(1));
        assert_eq!(None, arr.scalar(3));
    }

    #[test]
    fn primitive_with_nulls() {
        let arr = Array::Int32(Int32Array::from_iter([Some(1), None, Some(3)]));

        assert_eq!(Some(ScalarValue::Int32(1)), arr.scalar(0));
        assert_eq!(Some(ScalarValue::Null), arr.scalar(1));
        assert_eq!(Some(false), arr.is_valid(1));
    }

    #[test]
    fn utf8_values() {
        let arr = Utf8Array::from_iter(["a", "", "ccc"]);

        assert_eq!(Some("a"), arr.value(0));
        assert_eq!(Some(""), arr.value(1));
        assert_eq!(Some("ccc"), arr.value(2));
        assert_eq!(None, arr.value(3));
    }

    #[test]
    fn utf8_with_nulls() {
        let arr = Array::Utf8(Utf8Array::from_iter([Some("x"), None]));

        assert_eq!(Some(ScalarValue::from("x")), arr.scalar(0));
        assert_eq!(Some(ScalarValue::Null), arr.scalar(1));
    }
}
