//! Compact binary batch encoding.
//!
//! Used for spilling batches to scratch files. The format is internal and
//! unstable; files never outlive the process that wrote them. Selections are
//! materialised on write, so a batch read back holds exactly the logical rows
//! of the batch written.

use crate::array::{Array, BooleanArray, PrimitiveArray, Utf8Array};
use crate::batch::Batch;
use crate::bitmap::Bitmap;
use crate::datatype::DataType;
use ordexec_error::{OrdexecError, Result};
use std::io::{Read, Write};

const TAG_BOOLEAN: u8 = 0;
const TAG_INT32: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_UTF8: u8 = 4;

fn type_tag(datatype: DataType) -> u8 {
    match datatype {
        DataType::Boolean => TAG_BOOLEAN,
        DataType::Int32 => TAG_INT32,
        DataType::Int64 => TAG_INT64,
        DataType::Float64 => TAG_FLOAT64,
        DataType::Utf8 => TAG_UTF8,
    }
}

fn tag_type(tag: u8) -> Result<DataType> {
    Ok(match tag {
        TAG_BOOLEAN => DataType::Boolean,
        TAG_INT32 => DataType::Int32,
        TAG_INT64 => DataType::Int64,
        TAG_FLOAT64 => DataType::Float64,
        TAG_UTF8 => DataType::Utf8,
        other => return Err(OrdexecError::new(format!("Unknown type tag {other}"))),
    })
}

/// Write a batch's logical rows.
pub fn write_batch<W: Write>(w: &mut W, batch: &Batch) -> Result<()> {
    let num_rows = batch.num_rows();
    w.write_all(&(num_rows as u64).to_le_bytes())?;
    w.write_all(&(batch.num_columns() as u32).to_le_bytes())?;

    for col in batch.columns() {
        w.write_all(&[type_tag(col.datatype())])?;

        // Validity over logical rows.
        let validity = Bitmap::from_bool_iter(
            (0..num_rows).map(|row| col.is_valid(batch.physical_index(row)).unwrap_or(false)),
        );
        let has_validity = validity.count_trues() != num_rows;
        w.write_all(&[has_validity as u8])?;
        if has_validity {
            w.write_all(validity.raw_data())?;
        }

        match col.as_ref() {
            Array::Boolean(arr) => write_booleans(w, batch, arr, num_rows)?,
            Array::Int32(arr) => write_primitives(w, batch, arr, num_rows, |v| v.to_le_bytes())?,
            Array::Int64(arr) => write_primitives(w, batch, arr, num_rows, |v| v.to_le_bytes())?,
            Array::Float64(arr) => write_primitives(w, batch, arr, num_rows, |v| v.to_le_bytes())?,
            Array::Utf8(arr) => write_utf8(w, batch, arr, num_rows)?,
        }
    }

    Ok(())
}

fn write_booleans<W: Write>(
    w: &mut W,
    batch: &Batch,
    arr: &BooleanArray,
    num_rows: usize,
) -> Result<()> {
    let values = Bitmap::from_bool_iter(
        (0..num_rows).map(|row| arr.value(batch.physical_index(row)).unwrap_or(false)),
    );
    w.write_all(values.raw_data())?;
    Ok(())
}

fn write_primitives<W: Write, T: Copy, const N: usize>(
    w: &mut W,
    batch: &Batch,
    arr: &PrimitiveArray<T>,
    num_rows: usize,
    to_bytes: impl Fn(T) -> [u8; N],
) -> Result<()> {
    for row in 0..num_rows {
        let value = arr.values()[batch.physical_index(row)];
        w.write_all(&to_bytes(value))?;
    }
    Ok(())
}

fn write_utf8<W: Write>(w: &mut W, batch: &Batch, arr: &Utf8Array, num_rows: usize) -> Result<()> {
    for row in 0..num_rows {
        let physical = batch.physical_index(row);
        let value = match arr.is_valid(physical) {
            Some(true) => arr.value(physical).unwrap_or(""),
            _ => "",
        };
        w.write_all(&(value.len() as u32).to_le_bytes())?;
        w.write_all(value.as_bytes())?;
    }
    Ok(())
}

/// Read the next batch, None on a clean end of stream.
pub fn read_batch<R: Read>(r: &mut R, datatypes: &[DataType]) -> Result<Option<Batch>> {
    let mut header = [0; 8];
    if !try_read_exact(r, &mut header)? {
        return Ok(None);
    }
    let num_rows = u64::from_le_bytes(header) as usize;
    let num_cols = read_u32(r)? as usize;

    if num_cols != datatypes.len() {
        return Err(OrdexecError::new(format!(
            "Batch has {num_cols} columns, expected {}",
            datatypes.len()
        )));
    }

    let mut cols = Vec::with_capacity(num_cols);
    for expected in datatypes {
        let datatype = tag_type(read_u8(r)?)?;
        if datatype != *expected {
            return Err(OrdexecError::new(format!(
                "Batch column has type {datatype}, expected {expected}"
            )));
        }

        let validity = match read_u8(r)? {
            0 => None,
            _ => {
                let bytes = read_vec(r, (num_rows + 7) / 8)?;
                Some(Bitmap::from_raw(num_rows, bytes))
            }
        };

        let array = match datatype {
            DataType::Boolean => {
                let bytes = read_vec(r, (num_rows + 7) / 8)?;
                Array::Boolean(BooleanArray::new(Bitmap::from_raw(num_rows, bytes), validity))
            }
            DataType::Int32 => {
                Array::Int32(read_primitives(r, num_rows, validity, i32::from_le_bytes)?)
            }
            DataType::Int64 => {
                Array::Int64(read_primitives(r, num_rows, validity, i64::from_le_bytes)?)
            }
            DataType::Float64 => {
                Array::Float64(read_primitives(r, num_rows, validity, f64::from_le_bytes)?)
            }
            DataType::Utf8 => Array::Utf8(read_utf8(r, num_rows, validity)?),
        };

        cols.push(array);
    }

    if cols.is_empty() && num_rows > 0 {
        return Err(OrdexecError::new("Zero-column batch with rows"));
    }

    Ok(Some(Batch::try_new(cols)?))
}

fn read_primitives<R: Read, T, const N: usize>(
    r: &mut R,
    num_rows: usize,
    validity: Option<Bitmap>,
    from_bytes: impl Fn([u8; N]) -> T,
) -> Result<PrimitiveArray<T>> {
    let mut values = Vec::with_capacity(num_rows);
    let mut buf = [0; N];
    for _ in 0..num_rows {
        r.read_exact(&mut buf)?;
        values.push(from_bytes(buf));
    }
    Ok(PrimitiveArray::new(values, validity))
}

fn read_utf8<R: Read>(r: &mut R, num_rows: usize, validity: Option<Bitmap>) -> Result<Utf8Array> {
    let mut offsets = Vec::with_capacity(num_rows + 1);
    offsets.push(0);
    let mut data = Vec::new();

    for _ in 0..num_rows {
        let len = read_u32(r)? as usize;
        let bytes = read_vec(r, len)?;
        std::str::from_utf8(&bytes)
            .map_err(|_| OrdexecError::new("Invalid utf8 in encoded batch"))?;
        data.extend_from_slice(&bytes);
        offsets.push(data.len() as i32);
    }

    Ok(Utf8Array::new(offsets, data, validity))
}

/// Read exactly `buf.len()` bytes, Ok(false) if the stream ended before the
/// first byte.
fn try_read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(OrdexecError::new("Unexpected end of encoded batch stream"));
        }
        filled += n;
    }
    Ok(true)
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_vec<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Int32Array, Int64Array};
    use crate::selection::SelectionVector;
    use crate::testutil::assert_batches_logical_eq;
    use std::sync::Arc;

    fn round_trip(batch: &Batch) -> Batch {
        let datatypes = batch.datatypes();
        let mut buf = Vec::new();
        write_batch(&mut buf, batch).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let got = read_batch(&mut cursor, &datatypes).unwrap().unwrap();
        assert!(read_batch(&mut cursor, &datatypes).unwrap().is_none());
        got
    }

    #[test]
    fn round_trip_all_types() {
        let batch = Batch::try_new(vec![
            Array::Boolean(crate::array::BooleanArray::from_iter([
                Some(true),
                None,
                Some(false),
            ])),
            Array::Int32(Int32Array::from_iter([1, 2, 3])),
            Array::Int64(Int64Array::from_iter([Some(4), None, Some(6)])),
            Array::Float64(crate::array::Float64Array::from_iter([1.5, -2.5, 0.0])),
            Array::Utf8(Utf8Array::from_iter([Some("a"), None, Some("ccc")])),
        ])
        .unwrap();

        let got = round_trip(&batch);
        assert_batches_logical_eq(&batch, &got);
    }

    #[test]
    fn selection_materialised_on_write() {
        let batch = Batch::try_new(vec![Array::Int64(Int64Array::from_iter([10, 20, 30, 40]))])
            .unwrap()
            .select(Arc::new(SelectionVector::from_iter([1, 3])));

        let got = round_trip(&batch);
        assert_eq!(2, got.num_rows());
        assert_batches_logical_eq(&batch, &got);
    }

    #[test]
    fn multiple_batches_in_stream() {
        let a = Batch::try_new(vec![Array::Int32(Int32Array::from_iter([1]))]).unwrap();
        let b = Batch::try_new(vec![Array::Int32(Int32Array::from_iter([2, 3]))]).unwrap();

        let mut buf = Vec::new();
        write_batch(&mut buf, &a).unwrap();
        write_batch(&mut buf, &b).unwrap();

        let datatypes = a.datatypes();
        let mut cursor = std::io::Cursor::new(buf);
        let got_a = read_batch(&mut cursor, &datatypes).unwrap().unwrap();
        let got_b = read_batch(&mut cursor, &datatypes).unwrap().unwrap();
        assert!(read_batch(&mut cursor, &datatypes).unwrap().is_none());

        assert_batches_logical_eq(&a, &got_a);
        assert_batches_logical_eq(&b, &got_b);
    }

    #[test]
    fn type_mismatch_on_read() {
        let batch = Batch::try_new(vec![Array::Int32(Int32Array::from_iter([1]))]).unwrap();
        let mut buf = Vec::new();
        write_batch(&mut buf, &batch).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        read_batch(&mut cursor, &[DataType::Int64]).unwrap_err();
    }
}
