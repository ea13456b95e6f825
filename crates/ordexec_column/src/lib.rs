//! A small columnar data representation for ordered execution.

pub mod array;
pub mod batch;
pub mod bitmap;
pub mod buffer;
pub mod builder;
pub mod datatype;
pub mod encoding;
pub mod field;
pub mod row;
pub mod scalar;
pub mod selection;
pub mod testutil;
