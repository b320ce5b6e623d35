// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codeset::{CharEncoding, NegotiatedCodeSets, WideCharEncoding};
use crate::message::GiopVersion;
use crate::{AppError, AppResult};

use super::endian::{padding_for, Endian};

/// Writes an aligned primitive in the stream's byte order.
macro_rules! write_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            self.align(std::mem::size_of::<$ty>());
            match self.endian {
                Endian::Big => self.buffer.put_slice(&value.to_be_bytes()),
                Endian::Little => self.buffer.put_slice(&value.to_le_bytes()),
            }
        }
    };
}

/// Writes a run of primitives, aligned once before the first element.
macro_rules! write_primitive_array {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, values: &[$ty]) {
            if values.is_empty() {
                return;
            }
            self.align(std::mem::size_of::<$ty>());
            self.buffer.reserve(values.len() * std::mem::size_of::<$ty>());
            for value in values {
                match self.endian {
                    Endian::Big => self.buffer.put_slice(&value.to_be_bytes()),
                    Endian::Little => self.buffer.put_slice(&value.to_le_bytes()),
                }
            }
        }
    };
}

/// CDR writer. Byte order and protocol version are fixed at construction.
///
/// Alignment is computed from `base_offset + written`, so a message body
/// written after the 12 byte GIOP header passes `base_offset = 12`.
#[derive(Debug)]
pub struct CdrOutputStream {
    buffer: BytesMut,
    endian: Endian,
    version: GiopVersion,
    base_offset: usize,
    char_encoding: CharEncoding,
    wchar_encoding: WideCharEncoding,
}

impl CdrOutputStream {
    pub fn new(endian: Endian, version: GiopVersion) -> CdrOutputStream {
        CdrOutputStream::with_base_offset(endian, version, 0)
    }

    pub fn with_base_offset(
        endian: Endian,
        version: GiopVersion,
        base_offset: usize,
    ) -> CdrOutputStream {
        let defaults = NegotiatedCodeSets::default();
        CdrOutputStream {
            buffer: BytesMut::with_capacity(256),
            endian,
            version,
            base_offset,
            char_encoding: CharEncoding::for_code_set(defaults.char_set)
                .unwrap_or(CharEncoding::Latin1),
            wchar_encoding: WideCharEncoding::for_code_set(defaults.wchar_set)
                .unwrap_or(WideCharEncoding::Utf16),
        }
    }

    /// Selects the char and wchar encodings negotiated for the connection.
    pub fn set_code_sets(&mut self, code_sets: NegotiatedCodeSets) -> AppResult<()> {
        self.char_encoding = CharEncoding::for_code_set(code_sets.char_set)?;
        self.wchar_encoding = WideCharEncoding::for_code_set(code_sets.wchar_set)?;
        Ok(())
    }

    pub fn code_sets(&self) -> NegotiatedCodeSets {
        NegotiatedCodeSets {
            char_set: self.char_encoding.code_set(),
            wchar_set: self.wchar_encoding.code_set(),
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn version(&self) -> GiopVersion {
        self.version
    }

    /// offset of the next byte relative to the alignment origin
    pub fn position(&self) -> usize {
        self.base_offset + self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> BytesMut {
        self.buffer
    }

    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn align(&mut self, width: usize) {
        let padding = padding_for(self.position(), width);
        self.write_padding(padding);
    }

    pub fn write_padding(&mut self, count: usize) {
        self.buffer.put_bytes(0, count);
    }

    pub fn write_octet(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(u8::from(value));
    }

    /// raw bytes, no length prefix and no alignment
    pub fn write_opaque(&mut self, data: &[u8]) {
        self.buffer.put_slice(data);
    }

    write_primitive!(write_short, i16);
    write_primitive!(write_ushort, u16);
    write_primitive!(write_long, i32);
    write_primitive!(write_ulong, u32);
    write_primitive!(write_longlong, i64);
    write_primitive!(write_ulonglong, u64);
    write_primitive!(write_float, f32);
    write_primitive!(write_double, f64);

    write_primitive_array!(write_short_array, i16);
    write_primitive_array!(write_ushort_array, u16);
    write_primitive_array!(write_long_array, i32);
    write_primitive_array!(write_ulong_array, u32);
    write_primitive_array!(write_longlong_array, i64);
    write_primitive_array!(write_ulonglong_array, u64);
    write_primitive_array!(write_float_array, f32);
    write_primitive_array!(write_double_array, f64);

    /// `sequence<octet>`: ulong count followed by the bytes
    pub fn write_octet_sequence(&mut self, data: &[u8]) -> AppResult<()> {
        self.write_ulong(length_as_ulong(data.len())?);
        self.write_opaque(data);
        Ok(())
    }

    /// `sequence<unsigned long>`
    pub fn write_ulong_sequence(&mut self, values: &[u32]) -> AppResult<()> {
        self.write_ulong(length_as_ulong(values.len())?);
        self.write_ulong_array(values);
        Ok(())
    }

    /// A single `char`; it must encode to exactly one byte in the
    /// negotiated char set.
    pub fn write_char(&mut self, value: char) -> AppResult<()> {
        let mut tmp = [0u8; 4];
        let encoded = self.char_encoding.encode(value.encode_utf8(&mut tmp))?;
        if encoded.len() != 1 {
            return Err(AppError::DataConversion(format!(
                "char {:?} needs {} bytes in {:?}",
                value,
                encoded.len(),
                self.char_encoding
            )));
        }
        self.write_octet(encoded[0]);
        Ok(())
    }

    /// ulong length including the terminating null, the encoded bytes, null
    pub fn write_string(&mut self, value: &str) -> AppResult<()> {
        let encoded = self.char_encoding.encode(value)?;
        self.write_ulong(length_as_ulong(encoded.len() + 1)?);
        self.write_opaque(&encoded);
        self.write_octet(0);
        Ok(())
    }

    pub fn write_wchar(&mut self, value: char) -> AppResult<()> {
        let mut tmp = [0u8; 4];
        let encoded = self
            .wchar_encoding
            .encode(value.encode_utf8(&mut tmp), self.endian)?;
        if !self.version.counts_wide_chars() {
            let count = u8::try_from(encoded.len()).map_err(|_| {
                AppError::DataConversion(format!("wchar {:?} too long", value))
            })?;
            self.write_octet(count);
        }
        self.write_opaque(&encoded);
        Ok(())
    }

    /// GIOP 1.0/1.1: ulong count of two byte units plus one, the units, a
    /// wide null. GIOP 1.2: ulong octet count, the octets.
    pub fn write_wstring(&mut self, value: &str) -> AppResult<()> {
        let encoded = self.wchar_encoding.encode(value, self.endian)?;
        if self.version.counts_wide_chars() {
            self.write_ulong(length_as_ulong(encoded.len() / 2 + 1)?);
            self.write_opaque(&encoded);
            self.write_padding(2);
        } else {
            self.write_ulong(length_as_ulong(encoded.len())?);
            self.write_opaque(&encoded);
        }
        Ok(())
    }

    /// Overwrites four bytes at `index` (relative to the start of this
    /// stream's buffer) with `value` in the stream's byte order.
    pub fn patch_ulong(&mut self, index: usize, value: u32) -> AppResult<()> {
        if index + 4 > self.buffer.len() {
            return Err(AppError::Internal(format!(
                "patch at {} beyond written length {}",
                index,
                self.buffer.len()
            )));
        }
        let bytes = match self.endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        self.buffer[index..index + 4].copy_from_slice(&bytes);
        Ok(())
    }
}

fn length_as_ulong(len: usize) -> AppResult<u32> {
    u32::try_from(len).map_err(|_| AppError::InvalidValue(format!("length {} exceeds ulong", len)))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::codeset::{ISO646_ASCII, UCS2, UTF16, UTF8};

    #[rstest]
    #[case(0, 3)]
    #[case(1, 2)]
    #[case(2, 1)]
    #[case(3, 0)]
    fn test_octet_then_long_padding(#[case] start: usize, #[case] expected_padding: usize) {
        let mut out = CdrOutputStream::with_base_offset(Endian::Big, GiopVersion::V1_2, start);
        out.write_octet(0xAA);
        out.write_long(1);
        assert_eq!(out.len(), 1 + expected_padding + 4);
        assert_eq!(out.position() % 4, 0);
    }

    #[test]
    fn test_byte_order() {
        let mut be = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        be.write_ulong(0x0102_0304);
        assert_eq!(be.as_bytes(), &[1, 2, 3, 4]);
        let mut le = CdrOutputStream::new(Endian::Little, GiopVersion::V1_2);
        le.write_ulong(0x0102_0304);
        assert_eq!(le.as_bytes(), &[4, 3, 2, 1]);
    }

    #[test]
    fn test_array_aligns_once() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        out.write_octet(1);
        out.write_short_array(&[1, 2, 3]);
        // 1 octet, 1 pad, 3 shorts
        assert_eq!(out.len(), 8);
        out.write_double_array(&[1.5]);
        assert_eq!(out.len(), 16);
        out.write_long_array(&[]);
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_string_layout() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        out.write_string("Test").unwrap();
        assert_eq!(out.as_bytes(), &[0, 0, 0, 5, 84, 101, 115, 116, 0]);
    }

    #[test]
    fn test_char_must_be_single_byte() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        out.set_code_sets(NegotiatedCodeSets::new(UTF8, UTF16)).unwrap();
        out.write_char('a').unwrap();
        assert!(matches!(
            out.write_char('\u{e9}'),
            Err(AppError::DataConversion(_))
        ));
        out.set_code_sets(NegotiatedCodeSets::new(ISO646_ASCII, UCS2))
            .unwrap();
        assert!(out.write_string("\u{e9}").is_err());
    }

    #[test]
    fn test_wstring_giop_1_2() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        out.write_wstring("Test").unwrap();
        assert_eq!(out.as_bytes(), &[0, 0, 0, 8, 0, 84, 0, 101, 0, 115, 0, 116]);

        let mut out = CdrOutputStream::new(Endian::Little, GiopVersion::V1_2);
        out.write_wstring("Test").unwrap();
        assert_eq!(
            out.as_bytes(),
            &[10, 0, 0, 0, 0xFF, 0xFE, 84, 0, 101, 0, 115, 0, 116, 0]
        );
    }

    #[test]
    fn test_wstring_giop_1_1() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_1);
        out.write_wstring("Test").unwrap();
        assert_eq!(
            out.as_bytes(),
            &[0, 0, 0, 5, 0, 84, 0, 101, 0, 115, 0, 116, 0, 0]
        );

        let mut out = CdrOutputStream::new(Endian::Little, GiopVersion::V1_1);
        out.write_wstring("Test").unwrap();
        assert_eq!(
            out.as_bytes(),
            &[6, 0, 0, 0, 0xFF, 0xFE, 84, 0, 101, 0, 115, 0, 116, 0, 0, 0]
        );
    }

    #[test]
    fn test_wchar_framing_by_version() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        out.write_wchar('A').unwrap();
        assert_eq!(out.as_bytes(), &[2, 0, 65]);

        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_1);
        out.write_wchar('A').unwrap();
        assert_eq!(out.as_bytes(), &[0, 65]);
    }

    #[test]
    fn test_patch_ulong() {
        let mut out = CdrOutputStream::new(Endian::Little, GiopVersion::V1_2);
        out.write_ulong(0);
        out.patch_ulong(0, 7).unwrap();
        assert_eq!(out.as_bytes(), &[7, 0, 0, 0]);
        assert!(out.patch_ulong(2, 1).is_err());
    }
}
