use bytes::{BufMut, BytesMut};

use super::{Map, PackError, Value, marker::*};

/// Appends PackStream-encoded values to an in-memory buffer.
#[derive(Debug, Default)]
pub struct Packer {
    buf: BytesMut,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn pack_null(&mut self) {
        self.buf.put_u8(NULL);
    }

    pub fn pack_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { TRUE } else { FALSE });
    }

    pub fn pack_int(&mut self, value: i64) {
        if (TINY_INT_MIN..=TINY_INT_MAX).contains(&value) {
            self.buf.put_i8(value as i8);
        } else if i8::try_from(value).is_ok() {
            self.buf.put_u8(INT_8);
            self.buf.put_i8(value as i8);
        } else if i16::try_from(value).is_ok() {
            self.buf.put_u8(INT_16);
            self.buf.put_i16(value as i16);
        } else if i32::try_from(value).is_ok() {
            self.buf.put_u8(INT_32);
            self.buf.put_i32(value as i32);
        } else {
            self.buf.put_u8(INT_64);
            self.buf.put_i64(value);
        }
    }

    pub fn pack_float(&mut self, value: f64) {
        self.buf.put_u8(FLOAT_64);
        self.buf.put_f64(value);
    }

    pub fn pack_bytes(&mut self, value: &[u8]) -> Result<(), PackError> {
        self.pack_size("bytes", value.len(), None, [BYTES_8, BYTES_16, BYTES_32])?;
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn pack_string(&mut self, value: &str) -> Result<(), PackError> {
        self.pack_size(
            "string",
            value.len(),
            Some(TINY_STRING),
            [STRING_8, STRING_16, STRING_32],
        )?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn pack_list_header(&mut self, len: usize) -> Result<(), PackError> {
        self.pack_size("list", len, Some(TINY_LIST), [LIST_8, LIST_16, LIST_32])
    }

    pub fn pack_map_header(&mut self, len: usize) -> Result<(), PackError> {
        self.pack_size("map", len, Some(TINY_MAP), [MAP_8, MAP_16, MAP_32])
    }

    /// Structures only come in the tiny form, so at most 15 fields.
    pub fn pack_struct_header(&mut self, tag: u8, len: usize) -> Result<(), PackError> {
        if len >= TINY_LIMIT {
            return Err(PackError::TooLarge {
                kind: "structure",
                size: len,
            });
        }
        self.buf.put_u8(TINY_STRUCT | len as u8);
        self.buf.put_u8(tag);
        Ok(())
    }

    pub fn pack_list(&mut self, items: &[Value]) -> Result<(), PackError> {
        self.pack_list_header(items.len())?;
        for item in items {
            self.pack(item)?;
        }
        Ok(())
    }

    pub fn pack_map(&mut self, map: &Map) -> Result<(), PackError> {
        self.pack_map_header(map.len())?;
        for (key, value) in map {
            self.pack_string(key)?;
            self.pack(value)?;
        }
        Ok(())
    }

    pub fn pack(&mut self, value: &Value) -> Result<(), PackError> {
        match value {
            Value::Null => self.pack_null(),
            Value::Boolean(b) => self.pack_bool(*b),
            Value::Integer(i) => self.pack_int(*i),
            Value::Float(f) => self.pack_float(*f),
            Value::Bytes(b) => self.pack_bytes(b)?,
            Value::String(s) => self.pack_string(s)?,
            Value::List(items) => self.pack_list(items)?,
            Value::Map(map) => self.pack_map(map)?,
            Value::Struct(s) => {
                self.pack_struct_header(s.tag, s.fields.len())?;
                for field in &s.fields {
                    self.pack(field)?;
                }
            }
        }
        Ok(())
    }

    fn pack_size(
        &mut self,
        kind: &'static str,
        len: usize,
        tiny: Option<u8>,
        [m8, m16, m32]: [u8; 3],
    ) -> Result<(), PackError> {
        match tiny {
            Some(base) if len < TINY_LIMIT => self.buf.put_u8(base | len as u8),
            _ if len <= u8::MAX as usize => {
                self.buf.put_u8(m8);
                self.buf.put_u8(len as u8);
            }
            _ if len <= u16::MAX as usize => {
                self.buf.put_u8(m16);
                self.buf.put_u16(len as u16);
            }
            _ if len <= u32::MAX as usize => {
                self.buf.put_u8(m32);
                self.buf.put_u32(len as u32);
            }
            _ => return Err(PackError::TooLarge { kind, size: len }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn packed(value: impl Into<Value>) -> Vec<u8> {
        let mut packer = Packer::new();
        packer.pack(&value.into()).unwrap();
        packer.into_inner().to_vec()
    }

    #[rstest]
    #[case(0, vec![0x00])]
    #[case(127, vec![0x7F])]
    #[case(-16, vec![0xF0])]
    #[case(-17, vec![INT_8, 0xEF])]
    #[case(-128, vec![INT_8, 0x80])]
    #[case(128, vec![INT_16, 0x00, 0x80])]
    #[case(300, vec![INT_16, 0x01, 0x2C])]
    #[case(-129, vec![INT_16, 0xFF, 0x7F])]
    #[case(32768, vec![INT_32, 0x00, 0x00, 0x80, 0x00])]
    #[case(2147483648, vec![INT_64, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00])]
    fn integers_use_smallest_width(#[case] value: i64, #[case] expected: Vec<u8>) {
        assert_eq!(packed(value), expected);
    }

    #[test]
    fn float_is_always_eight_bytes() {
        assert_eq!(
            packed(1.0),
            vec![FLOAT_64, 0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[rstest]
    #[case(0, vec![0x80])]
    #[case(15, vec![0x8F])]
    #[case(16, vec![STRING_8, 16])]
    #[case(255, vec![STRING_8, 255])]
    #[case(256, vec![STRING_16, 0x01, 0x00])]
    #[case(65535, vec![STRING_16, 0xFF, 0xFF])]
    #[case(65536, vec![STRING_32, 0x00, 0x01, 0x00, 0x00])]
    fn string_headers(#[case] len: usize, #[case] header: Vec<u8>) {
        let out = packed("a".repeat(len));
        assert_eq!(&out[..header.len()], header.as_slice());
        assert_eq!(out.len(), header.len() + len);
    }

    #[test]
    fn bytes_have_no_tiny_form() {
        assert_eq!(packed(Vec::<u8>::new()), vec![BYTES_8, 0]);
        assert_eq!(packed(vec![1u8, 2]), vec![BYTES_8, 2, 1, 2]);
    }

    #[test]
    fn struct_header_limits_fields() {
        let mut packer = Packer::new();
        packer.pack_struct_header(0x70, 1).unwrap();
        assert_eq!(packer.as_slice(), &[0xB1, 0x70]);
        assert_eq!(
            packer.pack_struct_header(0x70, 16),
            Err(PackError::TooLarge {
                kind: "structure",
                size: 16
            })
        );
    }

    #[test]
    fn map_keys_are_sorted_strings() {
        let map = crate::map! { "b" => 2, "a" => 1 };
        assert_eq!(packed(map), vec![0xA2, 0x81, b'a', 0x01, 0x81, b'b', 0x02]);
    }
}
