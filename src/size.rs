//! Fixed-size encoding capability for key and value types.
//!
//! The tree requires keys and values to be fixed-size and trivially
//! copyable so that leaf and index nodes can be packed into byte buffers
//! with a statically known stride (see the on-disk layouts in
//! [`crate::node::leaf`] and [`crate::node::index`]). Variable-length data is
//! a host concern: a host wanting to store larger values encodes them
//! through its own serializer and stores only a fixed-size handle here.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt::Debug;

/// A plain-old-data type with a statically known, fixed encoded width.
///
/// This is the "host serializer capability" the design calls for: anything
/// `Copy` and losslessly round-trippable through a fixed byte run can serve
/// as a key or value.
pub trait FixedSize: Copy + Debug + Send + Sync + 'static {
    /// Encoded width in bytes. Constant across all values of `Self`.
    const SIZE: usize;

    /// Encode `self` into `buf`, which is guaranteed to be `Self::SIZE` bytes.
    fn to_bytes(&self, buf: &mut [u8]);

    /// Decode a value from `buf`, which is guaranteed to be `Self::SIZE` bytes.
    fn from_bytes(buf: &[u8]) -> Self;
}

impl FixedSize for u8 {
    const SIZE: usize = 1;

    fn to_bytes(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }

    fn from_bytes(buf: &[u8]) -> Self {
        buf[0]
    }
}

impl FixedSize for i8 {
    const SIZE: usize = 1;

    fn to_bytes(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }

    fn from_bytes(buf: &[u8]) -> Self {
        buf[0] as i8
    }
}

macro_rules! impl_fixed_size_int {
    ($(($t:ty, $write:ident, $read:ident)),*) => {
        $(
            impl FixedSize for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn to_bytes(&self, buf: &mut [u8]) {
                    LittleEndian::$write(buf, *self);
                }

                fn from_bytes(buf: &[u8]) -> Self {
                    LittleEndian::$read(buf)
                }
            }
        )*
    };
}

impl_fixed_size_int!(
    (u16, write_u16, read_u16),
    (u32, write_u32, read_u32),
    (u64, write_u64, read_u64),
    (i16, write_i16, read_i16),
    (i32, write_i32, read_i32),
    (i64, write_i64, read_i64)
);

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;

    fn to_bytes(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let mut arr = [0u8; N];
        arr.copy_from_slice(buf);
        arr
    }
}
