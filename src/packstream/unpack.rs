use bytes::Buf;
use log::trace;

use super::{Map, PackError, Value, marker::*};

/// Nested structures deeper than this are rejected as malformed.
const MAX_DEPTH: usize = 64;

/// Header read at the start of every structure: the tag byte and the number
/// of fields that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructHeader {
    pub tag: u8,
    pub length: usize,
}

/// Turns the fields of a structure nested inside a value into a [`Value`].
///
/// The header has already been consumed when `read_struct` is called.
pub trait StructResolver {
    fn read_struct(
        &self,
        unpacker: &mut Unpacker<'_>,
        header: StructHeader,
    ) -> Result<Value, PackError>;
}

macro_rules! try_get_impl {
    ($name:ident, $ty:ty, $getter:ident) => {
        fn $name(&mut self) -> Result<$ty, PackError> {
            self.need(size_of::<$ty>())?;
            Ok(self.buf.$getter())
        }
    };
}

/// Forward-only PackStream reader over a borrowed byte slice.
pub struct Unpacker<'a> {
    buf: &'a [u8],
    total: usize,
    depth: usize,
    structs: Option<&'a dyn StructResolver>,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
            depth: 0,
            structs: None,
        }
    }

    pub fn with_structs(buf: &'a [u8], structs: &'a dyn StructResolver) -> Self {
        Self {
            structs: Some(structs),
            ..Self::new(buf)
        }
    }

    /// Bytes read so far.
    pub fn consumed(&self) -> usize {
        self.total - self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    try_get_impl!(read_u8, u8, get_u8);
    try_get_impl!(read_i8, i8, get_i8);
    try_get_impl!(read_u16, u16, get_u16);
    try_get_impl!(read_i16, i16, get_i16);
    try_get_impl!(read_u32, u32, get_u32);
    try_get_impl!(read_i32, i32, get_i32);
    try_get_impl!(read_i64, i64, get_i64);
    try_get_impl!(read_f64, f64, get_f64);

    fn need(&self, n: usize) -> Result<(), PackError> {
        if self.buf.len() < n {
            return Err(PackError::InsufficientData {
                needed: n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    fn read_slice(&mut self, n: usize) -> Result<&'a [u8], PackError> {
        self.need(n)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a structure header. Anything other than a tiny struct marker is
    /// malformed here.
    pub fn unpack_struct_header(&mut self) -> Result<StructHeader, PackError> {
        let marker = self.read_u8()?;
        if marker & 0xF0 != TINY_STRUCT {
            return Err(PackError::Malformed(format!(
                "expected structure marker, found {marker:#04x}"
            )));
        }
        let tag = self.read_u8()?;
        Ok(StructHeader {
            tag,
            length: (marker & 0x0F) as usize,
        })
    }

    pub fn unpack(&mut self) -> Result<Value, PackError> {
        let marker = self.read_u8()?;
        let high = marker & 0xF0;
        let low = (marker & 0x0F) as usize;

        let value = match marker {
            NULL => Value::Null,
            TRUE => Value::Boolean(true),
            FALSE => Value::Boolean(false),
            FLOAT_64 => Value::Float(self.read_f64()?),
            INT_8 => Value::Integer(self.read_i8()?.into()),
            INT_16 => Value::Integer(self.read_i16()?.into()),
            INT_32 => Value::Integer(self.read_i32()?.into()),
            INT_64 => Value::Integer(self.read_i64()?),
            0x00..=0x7F | 0xF0..=0xFF => Value::Integer((marker as i8).into()),
            BYTES_8 => {
                let len = self.read_u8()? as usize;
                Value::Bytes(self.read_slice(len)?.to_vec())
            }
            BYTES_16 => {
                let len = self.read_u16()? as usize;
                Value::Bytes(self.read_slice(len)?.to_vec())
            }
            BYTES_32 => {
                let len = self.read_u32()? as usize;
                Value::Bytes(self.read_slice(len)?.to_vec())
            }
            _ if high == TINY_STRING => Value::String(self.read_string(low)?),
            STRING_8 => {
                let len = self.read_u8()? as usize;
                Value::String(self.read_string(len)?)
            }
            STRING_16 => {
                let len = self.read_u16()? as usize;
                Value::String(self.read_string(len)?)
            }
            STRING_32 => {
                let len = self.read_u32()? as usize;
                Value::String(self.read_string(len)?)
            }
            _ if high == TINY_LIST => Value::List(self.read_list(low)?),
            LIST_8 => {
                let len = self.read_u8()? as usize;
                Value::List(self.read_list(len)?)
            }
            LIST_16 => {
                let len = self.read_u16()? as usize;
                Value::List(self.read_list(len)?)
            }
            LIST_32 => {
                let len = self.read_u32()? as usize;
                Value::List(self.read_list(len)?)
            }
            _ if high == TINY_MAP => Value::Map(self.read_map(low)?),
            MAP_8 => {
                let len = self.read_u8()? as usize;
                Value::Map(self.read_map(len)?)
            }
            MAP_16 => {
                let len = self.read_u16()? as usize;
                Value::Map(self.read_map(len)?)
            }
            MAP_32 => {
                let len = self.read_u32()? as usize;
                Value::Map(self.read_map(len)?)
            }
            _ if high == TINY_STRUCT => {
                let tag = self.read_u8()?;
                self.read_struct(StructHeader { tag, length: low })?
            }
            other => {
                return Err(PackError::Malformed(format!("unknown marker {other:#04x}")));
            }
        };

        Ok(value)
    }

    /// Reads a value that must be a string.
    pub fn unpack_string(&mut self) -> Result<String, PackError> {
        match self.unpack()? {
            Value::String(s) => Ok(s),
            other => Err(PackError::Malformed(format!(
                "expected String, found {}",
                other.type_name()
            ))),
        }
    }

    fn read_string(&mut self, len: usize) -> Result<String, PackError> {
        let bytes = self.read_slice(len)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    fn read_list(&mut self, len: usize) -> Result<Vec<Value>, PackError> {
        self.descend()?;
        // Every value takes at least one byte, so a declared length larger
        // than the buffer never gets a matching allocation.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.unpack()?);
        }
        self.depth -= 1;
        Ok(items)
    }

    fn read_map(&mut self, len: usize) -> Result<Map, PackError> {
        self.descend()?;
        let mut map = Map::new();
        for _ in 0..len {
            let key = match self.unpack()? {
                Value::String(key) => key,
                other => {
                    return Err(PackError::Malformed(format!(
                        "map keys must be strings, found {}",
                        other.type_name()
                    )));
                }
            };
            let value = self.unpack()?;
            map.insert(key, value);
        }
        self.depth -= 1;
        Ok(map)
    }

    fn read_struct(&mut self, header: StructHeader) -> Result<Value, PackError> {
        trace!("nested structure {:#04x} with {} fields", header.tag, header.length);
        let Some(structs) = self.structs else {
            return Err(PackError::UnexpectedStruct {
                tag: header.tag,
                length: header.length,
            });
        };
        self.descend()?;
        let value = structs.read_struct(self, header)?;
        self.depth -= 1;
        Ok(value)
    }

    fn descend(&mut self) -> Result<(), PackError> {
        if self.depth >= MAX_DEPTH {
            return Err(PackError::Malformed(format!(
                "values nested deeper than {MAX_DEPTH} levels"
            )));
        }
        self.depth += 1;
        Ok(())
    }
}
