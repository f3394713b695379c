//! Binary codec primitives shared by the pack reader and writer.

pub mod varint;
pub mod zlib;
