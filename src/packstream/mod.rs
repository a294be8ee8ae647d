//! PackStream binary codec.
//!
//! PackStream is the compact, self-describing value format every Bolt message
//! is written in. Each value starts with a marker byte identifying its kind;
//! small integers, short strings, lists, maps and structures fold their size
//! into that marker, larger ones follow it with an explicit 8, 16 or 32-bit
//! length.
//!
//! # Binary Format
//!
//! - All integers are two's-complement big-endian, written in the smallest
//!   width that holds them (`300` is `C9 01 2C`).
//! - Floats are always 64-bit IEEE-754.
//! - Strings are UTF-8, lengths count bytes.
//! - Structures carry a field count in the marker and a tag byte after it. The
//!   tag is resolved through a [`StructResolver`]; a tag nobody registered is a
//!   decode failure, never a silent skip.
//!
//! # Key Components
//!
//! - [`Value`]: the closed set of representable values.
//! - [`Packer`]: appends encoded values to a byte buffer.
//! - [`Unpacker`]: forward-only reader over a byte slice.
//! - [`PackError`]: distinguishes "need more bytes" from malformed input.
mod error;
mod pack;
mod unpack;
mod value;

pub use error::PackError;
pub use pack::Packer;
pub use unpack::{StructHeader, StructResolver, Unpacker};
pub use value::{Map, Structure, Value};

pub mod marker {
    pub const NULL: u8 = 0xC0;
    pub const FLOAT_64: u8 = 0xC1;
    pub const FALSE: u8 = 0xC2;
    pub const TRUE: u8 = 0xC3;

    pub const INT_8: u8 = 0xC8;
    pub const INT_16: u8 = 0xC9;
    pub const INT_32: u8 = 0xCA;
    pub const INT_64: u8 = 0xCB;

    pub const BYTES_8: u8 = 0xCC;
    pub const BYTES_16: u8 = 0xCD;
    pub const BYTES_32: u8 = 0xCE;

    pub const TINY_STRING: u8 = 0x80;
    pub const STRING_8: u8 = 0xD0;
    pub const STRING_16: u8 = 0xD1;
    pub const STRING_32: u8 = 0xD2;

    pub const TINY_LIST: u8 = 0x90;
    pub const LIST_8: u8 = 0xD4;
    pub const LIST_16: u8 = 0xD5;
    pub const LIST_32: u8 = 0xD6;

    pub const TINY_MAP: u8 = 0xA0;
    pub const MAP_8: u8 = 0xD8;
    pub const MAP_16: u8 = 0xD9;
    pub const MAP_32: u8 = 0xDA;

    pub const TINY_STRUCT: u8 = 0xB0;

    /// Sizes below this fit in the low nibble of a tiny marker.
    pub const TINY_LIMIT: usize = 16;
    pub const TINY_INT_MIN: i64 = -16;
    pub const TINY_INT_MAX: i64 = 127;
}

/// Decodes a single value from the front of `bytes`, returning it with the
/// number of bytes consumed.
pub fn decode_value(
    bytes: &[u8],
    structs: Option<&dyn StructResolver>,
) -> Result<(Value, usize), PackError> {
    let mut unpacker = match structs {
        Some(resolver) => Unpacker::with_structs(bytes, resolver),
        None => Unpacker::new(bytes),
    };
    let value = unpacker.unpack()?;
    Ok((value, unpacker.consumed()))
}

/// Encodes a single value into a fresh buffer.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, PackError> {
    let mut packer = Packer::new();
    packer.pack(value)?;
    Ok(packer.into_inner().to_vec())
}
