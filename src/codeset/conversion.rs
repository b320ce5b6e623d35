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

//! Byte renderings of the code sets this crate can read and write.

use crate::protocol::Endian;
use crate::{AppError, AppResult};

use super::{ISO646_ASCII, ISO8859_1, UCS2, UTF16, UTF8};

const BOM_BIG_ENDIAN: [u8; 2] = [0xFE, 0xFF];
const BOM_LITTLE_ENDIAN: [u8; 2] = [0xFF, 0xFE];

/// Encoding for `char` and `string` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharEncoding {
    Latin1,
    Ascii,
    Utf8,
}

impl CharEncoding {
    pub fn for_code_set(code_set: u32) -> AppResult<CharEncoding> {
        match code_set {
            ISO8859_1 => Ok(CharEncoding::Latin1),
            ISO646_ASCII => Ok(CharEncoding::Ascii),
            UTF8 => Ok(CharEncoding::Utf8),
            other => Err(AppError::IncompatibleCodeSet(format!(
                "no char encoding for code set {:#010x}",
                other
            ))),
        }
    }

    pub fn code_set(&self) -> u32 {
        match self {
            CharEncoding::Latin1 => ISO8859_1,
            CharEncoding::Ascii => ISO646_ASCII,
            CharEncoding::Utf8 => UTF8,
        }
    }

    pub fn encode(&self, text: &str) -> AppResult<Vec<u8>> {
        match self {
            CharEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            CharEncoding::Latin1 => self.encode_single_byte(text, 0xFF),
            CharEncoding::Ascii => self.encode_single_byte(text, 0x7F),
        }
    }

    fn encode_single_byte(&self, text: &str, max: u32) -> AppResult<Vec<u8>> {
        text.chars()
            .map(|c| {
                let code = c as u32;
                if code <= max {
                    Ok(code as u8)
                } else {
                    Err(AppError::DataConversion(format!(
                        "character {:?} not representable in {:?}",
                        c, self
                    )))
                }
            })
            .collect()
    }

    pub fn decode(&self, bytes: &[u8]) -> AppResult<String> {
        match self {
            CharEncoding::Latin1 => Ok(bytes.iter().map(|b| *b as char).collect()),
            CharEncoding::Ascii => {
                if let Some(b) = bytes.iter().find(|b| **b > 0x7F) {
                    return Err(AppError::DataConversion(format!(
                        "byte {:#04x} is not ascii",
                        b
                    )));
                }
                Ok(bytes.iter().map(|b| *b as char).collect())
            }
            CharEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| AppError::DataConversion(format!("invalid utf-8: {}", e))),
        }
    }
}

/// Encoding for `wchar` and `wstring` data.
///
/// Big endian streams are written without a byte order mark, little endian
/// streams with one. On decode a leading mark decides the byte order,
/// without one the data is big endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideCharEncoding {
    Utf16,
    /// fixed two byte characters, no surrogate pairs
    Ucs2,
}

impl WideCharEncoding {
    pub fn for_code_set(code_set: u32) -> AppResult<WideCharEncoding> {
        match code_set {
            UTF16 => Ok(WideCharEncoding::Utf16),
            UCS2 => Ok(WideCharEncoding::Ucs2),
            other => Err(AppError::IncompatibleCodeSet(format!(
                "no wchar encoding for code set {:#010x}",
                other
            ))),
        }
    }

    pub fn code_set(&self) -> u32 {
        match self {
            WideCharEncoding::Utf16 => UTF16,
            WideCharEncoding::Ucs2 => UCS2,
        }
    }

    pub fn encode(&self, text: &str, endian: Endian) -> AppResult<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len() * 2 + 2);
        if endian == Endian::Little {
            out.extend_from_slice(&BOM_LITTLE_ENDIAN);
        }
        for c in text.chars() {
            let mut units = [0u16; 2];
            let encoded = c.encode_utf16(&mut units);
            if encoded.len() > 1 && *self == WideCharEncoding::Ucs2 {
                return Err(AppError::DataConversion(format!(
                    "character {:?} outside the basic multilingual plane",
                    c
                )));
            }
            for unit in encoded.iter() {
                match endian {
                    Endian::Big => out.extend_from_slice(&unit.to_be_bytes()),
                    Endian::Little => out.extend_from_slice(&unit.to_le_bytes()),
                }
            }
        }
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8]) -> AppResult<String> {
        let (endian, body) = match bytes {
            [0xFE, 0xFF, rest @ ..] => (Endian::Big, rest),
            [0xFF, 0xFE, rest @ ..] => (Endian::Little, rest),
            _ => (Endian::Big, bytes),
        };
        if body.len() % 2 != 0 {
            return Err(AppError::DataConversion(format!(
                "odd byte count {} for {:?}",
                body.len(),
                self
            )));
        }
        let units = body.chunks_exact(2).map(|pair| match endian {
            Endian::Big => u16::from_be_bytes([pair[0], pair[1]]),
            Endian::Little => u16::from_le_bytes([pair[0], pair[1]]),
        });
        let mut text = String::with_capacity(body.len() / 2);
        for decoded in char::decode_utf16(units) {
            match decoded {
                Ok(c) => {
                    if *self == WideCharEncoding::Ucs2 && c.len_utf16() > 1 {
                        return Err(AppError::DataConversion(
                            "surrogate pair in ucs-2 data".to_string(),
                        ));
                    }
                    text.push(c)
                }
                Err(e) => {
                    return Err(AppError::DataConversion(format!(
                        "unpaired surrogate {:#06x}",
                        e.unpaired_surrogate()
                    )))
                }
            }
        }
        Ok(text)
    }

    /// true if `bytes` is exactly a byte order mark
    pub(crate) fn is_bom(bytes: &[u8]) -> bool {
        bytes == BOM_BIG_ENDIAN || bytes == BOM_LITTLE_ENDIAN
    }
}
