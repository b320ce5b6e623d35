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

use bytes::Bytes;

use crate::codeset::{CharEncoding, NegotiatedCodeSets, WideCharEncoding};
use crate::message::GiopVersion;
use crate::{AppError, AppResult};

use super::endian::{padding_for, Endian};

/// Reads an aligned primitive; the stream must be configured first.
macro_rules! read_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> AppResult<$ty> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let endian = self.endian()?;
            self.align(WIDTH)?;
            let bytes = self.take_array::<WIDTH>()?;
            Ok(match endian {
                Endian::Big => <$ty>::from_be_bytes(bytes),
                Endian::Little => <$ty>::from_le_bytes(bytes),
            })
        }
    };
}

/// Reads `count` contiguous primitives after a single alignment.
macro_rules! read_primitive_array {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, count: usize) -> AppResult<Vec<$ty>> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let endian = self.endian()?;
            if count == 0 {
                return Ok(Vec::new());
            }
            self.align(WIDTH)?;
            let total = count.checked_mul(WIDTH).ok_or(AppError::EndOfMessage {
                offset: self.position(),
                requested: usize::MAX,
            })?;
            self.check_readable(total)?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                let bytes = self.take_array::<WIDTH>()?;
                values.push(match endian {
                    Endian::Big => <$ty>::from_be_bytes(bytes),
                    Endian::Little => <$ty>::from_le_bytes(bytes),
                });
            }
            Ok(values)
        }
    };
}

/// CDR reader over an immutable buffer.
///
/// A fresh stream only supports octet reads. `configure` sets the byte order
/// and protocol version exactly once; every byte order or version dependent
/// read before that fails with `StreamNotConfigured`. `set_max_length` caps
/// how far the stream may read, reads beyond the cap fail with
/// `EndOfMessage`.
#[derive(Debug, Clone)]
pub struct CdrInputStream {
    data: Bytes,
    cursor: usize,
    base_offset: usize,
    endian: Option<Endian>,
    version: Option<GiopVersion>,
    limit: Option<usize>,
    char_encoding: CharEncoding,
    wchar_encoding: WideCharEncoding,
}

impl CdrInputStream {
    pub fn new(data: Bytes) -> CdrInputStream {
        CdrInputStream::with_base_offset(data, 0)
    }

    /// `base_offset` is the alignment offset of `data[0]`, e.g. 12 for a
    /// message body that followed a GIOP header.
    pub fn with_base_offset(data: Bytes, base_offset: usize) -> CdrInputStream {
        CdrInputStream {
            data,
            cursor: 0,
            base_offset,
            endian: None,
            version: None,
            limit: None,
            char_encoding: CharEncoding::Latin1,
            wchar_encoding: WideCharEncoding::Utf16,
        }
    }

    pub fn configure(&mut self, endian: Endian, version: GiopVersion) -> AppResult<()> {
        if self.endian.is_some() || self.version.is_some() {
            return Err(AppError::StreamAlreadyConfigured);
        }
        self.endian = Some(endian);
        self.version = Some(version);
        Ok(())
    }

    pub fn set_code_sets(&mut self, code_sets: NegotiatedCodeSets) -> AppResult<()> {
        self.char_encoding = CharEncoding::for_code_set(code_sets.char_set)?;
        self.wchar_encoding = WideCharEncoding::for_code_set(code_sets.wchar_set)?;
        Ok(())
    }

    /// Allows at most `bytes_to_follow` further bytes to be read.
    pub fn set_max_length(&mut self, bytes_to_follow: usize) {
        self.limit = Some(self.cursor.saturating_add(bytes_to_follow));
    }

    pub fn endian(&self) -> AppResult<Endian> {
        self.endian.ok_or(AppError::StreamNotConfigured)
    }

    pub fn version(&self) -> AppResult<GiopVersion> {
        self.version.ok_or(AppError::StreamNotConfigured)
    }

    pub fn position(&self) -> usize {
        self.base_offset + self.cursor
    }

    /// bytes left before the end of the data or the max length, whichever
    /// comes first
    pub fn remaining(&self) -> usize {
        self.end() - self.cursor
    }

    fn end(&self) -> usize {
        match self.limit {
            Some(limit) => limit.min(self.data.len()),
            None => self.data.len(),
        }
    }

    fn check_readable(&self, count: usize) -> AppResult<()> {
        if count > self.remaining() {
            return Err(AppError::EndOfMessage {
                offset: self.position(),
                requested: count,
            });
        }
        Ok(())
    }

    fn take_array<const N: usize>(&mut self) -> AppResult<[u8; N]> {
        self.check_readable(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(out)
    }

    pub fn align(&mut self, width: usize) -> AppResult<()> {
        let padding = padding_for(self.position(), width);
        self.skip(padding)
    }

    pub fn skip(&mut self, count: usize) -> AppResult<()> {
        self.check_readable(count)?;
        self.cursor += count;
        Ok(())
    }

    pub fn read_octet(&mut self) -> AppResult<u8> {
        let [b] = self.take_array::<1>()?;
        Ok(b)
    }

    pub fn read_bool(&mut self) -> AppResult<bool> {
        match self.read_octet()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AppError::MalformedProtocol(format!(
                "boolean octet {:#04x}",
                other
            ))),
        }
    }

    /// `count` raw bytes, shared with the underlying buffer
    pub fn read_opaque(&mut self, count: usize) -> AppResult<Bytes> {
        self.check_readable(count)?;
        let bytes = self.data.slice(self.cursor..self.cursor + count);
        self.cursor += count;
        Ok(bytes)
    }

    /// everything up to the end of the data or the max length
    pub fn read_rest(&mut self) -> AppResult<Bytes> {
        self.read_opaque(self.remaining())
    }

    read_primitive!(read_short, i16);
    read_primitive!(read_ushort, u16);
    read_primitive!(read_long, i32);
    read_primitive!(read_ulong, u32);
    read_primitive!(read_longlong, i64);
    read_primitive!(read_ulonglong, u64);
    read_primitive!(read_float, f32);
    read_primitive!(read_double, f64);

    read_primitive_array!(read_short_array, i16);
    read_primitive_array!(read_ushort_array, u16);
    read_primitive_array!(read_long_array, i32);
    read_primitive_array!(read_ulong_array, u32);
    read_primitive_array!(read_longlong_array, i64);
    read_primitive_array!(read_ulonglong_array, u64);
    read_primitive_array!(read_float_array, f32);
    read_primitive_array!(read_double_array, f64);

    pub fn read_octet_sequence(&mut self) -> AppResult<Bytes> {
        let count = self.read_ulong()? as usize;
        self.read_opaque(count)
    }

    pub fn read_ulong_sequence(&mut self) -> AppResult<Vec<u32>> {
        let count = self.read_ulong()? as usize;
        self.read_ulong_array(count)
    }

    pub fn read_char(&mut self) -> AppResult<char> {
        let b = self.read_octet()?;
        let decoded = self.char_encoding.decode(&[b])?;
        decoded
            .chars()
            .next()
            .ok_or_else(|| AppError::DataConversion(format!("char octet {:#04x}", b)))
    }

    pub fn read_string(&mut self) -> AppResult<String> {
        let length = self.read_ulong()? as usize;
        if length == 0 {
            return Err(AppError::MalformedProtocol(
                "string length 0, terminating null missing".to_string(),
            ));
        }
        let data = self.read_opaque(length - 1)?;
        let terminator = self.read_octet()?;
        if terminator != 0 {
            return Err(AppError::MalformedProtocol(format!(
                "string terminator {:#04x}",
                terminator
            )));
        }
        self.char_encoding.decode(&data)
    }

    pub fn read_wchar(&mut self) -> AppResult<char> {
        let version = self.version()?;
        let data = if version.counts_wide_chars() {
            // no length prefix: one two byte unit, more if it was a byte
            // order mark or a leading surrogate
            let mut data = self.read_opaque(2)?.to_vec();
            if WideCharEncoding::is_bom(&data) {
                data.extend_from_slice(&self.read_opaque(2)?);
            }
            let unit = [data[data.len() - 2], data[data.len() - 1]];
            let lead = if data.starts_with(&[0xFF, 0xFE]) {
                u16::from_le_bytes(unit)
            } else {
                u16::from_be_bytes(unit)
            };
            if (0xD800..0xDC00).contains(&lead) {
                data.extend_from_slice(&self.read_opaque(2)?);
            }
            Bytes::from(data)
        } else {
            let count = self.read_octet()? as usize;
            self.read_opaque(count)?
        };
        let decoded = self.wchar_encoding.decode(&data)?;
        let mut chars = decoded.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(AppError::DataConversion(format!(
                "wchar data {:02x?} is not a single character",
                &data[..]
            ))),
        }
    }

    pub fn read_wstring(&mut self) -> AppResult<String> {
        let version = self.version()?;
        let length = self.read_ulong()? as usize;
        let data = if version.counts_wide_chars() {
            if length == 0 {
                return Ok(String::new());
            }
            let data = self.read_opaque((length - 1) * 2)?;
            let terminator = self.take_array::<2>()?;
            if terminator != [0, 0] {
                return Err(AppError::MalformedProtocol(format!(
                    "wstring terminator {:02x?}",
                    terminator
                )));
            }
            data
        } else {
            self.read_opaque(length)?
        };
        self.wchar_encoding.decode(&data)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::codeset::{ISO646_ASCII, UTF16, UTF8};
    use crate::protocol::CdrOutputStream;

    fn configured(data: &[u8], endian: Endian, version: GiopVersion) -> CdrInputStream {
        let mut stream = CdrInputStream::new(Bytes::copy_from_slice(data));
        stream.configure(endian, version).unwrap();
        stream
    }

    #[rstest]
    #[case(Endian::Big)]
    #[case(Endian::Little)]
    fn test_primitive_round_trip(#[case] endian: Endian) {
        let mut out = CdrOutputStream::new(endian, GiopVersion::V1_2);
        out.write_octet(0x7F);
        out.write_bool(true);
        out.write_short(-2);
        out.write_ushort(0xFFFE);
        out.write_long(i32::MIN);
        out.write_ulong(u32::MAX - 1);
        out.write_longlong(-1234567890123);
        out.write_ulonglong(u64::MAX);
        out.write_float(1.25);
        out.write_double(-0.1);

        let mut input = configured(out.as_bytes(), endian, GiopVersion::V1_2);
        assert_eq!(input.read_octet().unwrap(), 0x7F);
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_short().unwrap(), -2);
        assert_eq!(input.read_ushort().unwrap(), 0xFFFE);
        assert_eq!(input.read_long().unwrap(), i32::MIN);
        assert_eq!(input.read_ulong().unwrap(), u32::MAX - 1);
        assert_eq!(input.read_longlong().unwrap(), -1234567890123);
        assert_eq!(input.read_ulonglong().unwrap(), u64::MAX);
        assert_eq!(input.read_float().unwrap(), 1.25);
        assert_eq!(input.read_double().unwrap(), -0.1);
        assert_eq!(input.remaining(), 0);
    }

    #[rstest]
    #[case(Endian::Big, GiopVersion::V1_1)]
    #[case(Endian::Little, GiopVersion::V1_1)]
    #[case(Endian::Big, GiopVersion::V1_2)]
    #[case(Endian::Little, GiopVersion::V1_2)]
    fn test_text_round_trip(#[case] endian: Endian, #[case] version: GiopVersion) {
        let mut out = CdrOutputStream::new(endian, version);
        out.write_char('x').unwrap();
        out.write_string("caf\u{e9}").unwrap();
        out.write_wchar('\u{3b1}').unwrap();
        out.write_wstring("\u{3b1}\u{3b2} \u{1F600}").unwrap();
        out.write_wstring("").unwrap();

        let mut input = configured(out.as_bytes(), endian, version);
        assert_eq!(input.read_char().unwrap(), 'x');
        assert_eq!(input.read_string().unwrap(), "caf\u{e9}");
        assert_eq!(input.read_wchar().unwrap(), '\u{3b1}');
        assert_eq!(input.read_wstring().unwrap(), "\u{3b1}\u{3b2} \u{1F600}");
        assert_eq!(input.read_wstring().unwrap(), "");
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_arrays_round_trip() {
        let mut out = CdrOutputStream::with_base_offset(Endian::Little, GiopVersion::V1_2, 12);
        out.write_octet(9);
        out.write_longlong_array(&[1, -2, 3]);
        out.write_float_array(&[0.5, 2.0]);
        out.write_ulong_sequence(&[7, 8]).unwrap();

        let mut input = CdrInputStream::with_base_offset(out.freeze(), 12);
        input.configure(Endian::Little, GiopVersion::V1_2).unwrap();
        assert_eq!(input.read_octet().unwrap(), 9);
        assert_eq!(input.read_longlong_array(3).unwrap(), vec![1, -2, 3]);
        assert_eq!(input.read_float_array(2).unwrap(), vec![0.5, 2.0]);
        assert_eq!(input.read_ulong_sequence().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_unconfigured_stream() {
        let mut input = CdrInputStream::new(Bytes::from_static(&[0, 0, 0, 1]));
        assert!(matches!(
            input.read_ulong(),
            Err(AppError::StreamNotConfigured)
        ));
        assert!(matches!(
            input.read_wstring(),
            Err(AppError::StreamNotConfigured)
        ));
        // octets need no configuration
        assert_eq!(input.read_octet().unwrap(), 0);
    }

    #[test]
    fn test_configure_twice() {
        let mut input = CdrInputStream::new(Bytes::new());
        input.configure(Endian::Big, GiopVersion::V1_2).unwrap();
        assert!(matches!(
            input.configure(Endian::Big, GiopVersion::V1_2),
            Err(AppError::StreamAlreadyConfigured)
        ));
    }

    #[test]
    fn test_max_length() {
        let mut input = configured(&[0, 0, 0, 1, 0, 0, 0, 2], Endian::Big, GiopVersion::V1_2);
        input.set_max_length(4);
        assert_eq!(input.read_ulong().unwrap(), 1);
        let err = input.read_ulong().unwrap_err();
        assert!(matches!(
            err,
            AppError::EndOfMessage {
                offset: 4,
                requested: 4
            }
        ));
    }

    #[test]
    fn test_read_past_data() {
        let mut input = configured(&[1, 0], Endian::Big, GiopVersion::V1_2);
        assert_eq!(input.read_octet().unwrap(), 1);
        // the padding alone already runs past the data
        assert!(matches!(
            input.read_long(),
            Err(AppError::EndOfMessage { .. })
        ));
        let mut input = configured(&[0, 0, 0, 200], Endian::Big, GiopVersion::V1_2);
        assert!(matches!(
            input.read_octet_sequence(),
            Err(AppError::EndOfMessage { .. })
        ));
    }

    #[test]
    fn test_bad_boolean() {
        let mut input = CdrInputStream::new(Bytes::from_static(&[2]));
        assert!(matches!(
            input.read_bool(),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[test]
    fn test_missing_terminator() {
        let mut input = configured(&[0, 0, 0, 2, b'a', b'b'], Endian::Big, GiopVersion::V1_2);
        assert!(matches!(
            input.read_string(),
            Err(AppError::MalformedProtocol(_))
        ));
        let mut input = configured(&[0, 0, 0, 0], Endian::Big, GiopVersion::V1_2);
        assert!(input.read_string().is_err());
    }

    #[test]
    fn test_utf16_with_bom_in_big_endian_stream() {
        let data = [0, 0, 0, 10, 0xFF, 0xFE, 84, 0, 101, 0, 115, 0, 116, 0];
        let mut input = configured(&data, Endian::Big, GiopVersion::V1_2);
        assert_eq!(input.read_wstring().unwrap(), "Test");
        let data = [6, 0, 0, 0, 0xFE, 0xFF, 0, 84, 0, 101, 0, 115, 0, 116, 0, 0];
        let mut input = configured(&data, Endian::Little, GiopVersion::V1_1);
        assert_eq!(input.read_wstring().unwrap(), "Test");
    }

    #[test]
    fn test_code_sets_apply_to_reads() {
        let mut out = CdrOutputStream::new(Endian::Big, GiopVersion::V1_2);
        out.set_code_sets(NegotiatedCodeSets::new(UTF8, UTF16)).unwrap();
        out.write_string("\u{20ac}").unwrap();

        let mut input = configured(out.as_bytes(), Endian::Big, GiopVersion::V1_2);
        input
            .set_code_sets(NegotiatedCodeSets::new(ISO646_ASCII, UTF16))
            .unwrap();
        assert!(matches!(
            input.read_string(),
            Err(AppError::DataConversion(_))
        ));
    }
}
