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

//! Object key text forms. A locator carries the key as text; non ascii
//! bytes travel as `%XX` escapes of their utf-8 encoding.

use bytes::Bytes;

use crate::{AppError, AppResult};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn push_escaped(out: &mut String, byte: u8) {
    out.push('%');
    out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
    out.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
}

/// Escapes every non ascii byte of `id`. Ascii text, `%` included, is left
/// alone, so escaping is idempotent.
pub fn escape_non_ascii(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                push_escaped(&mut out, byte);
            }
        }
    }
    out
}

/// Reverses `escape_non_ascii`: only escapes of non ascii bytes are decoded.
pub fn unescape_non_ascii(escaped: &str) -> AppResult<String> {
    let input = escaped.as_bytes();
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(high), Some(low)) = (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                let byte = (high << 4) | low;
                if byte >= 0x80 {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(input[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| {
        AppError::InvalidReference(format!("escaped key {:?} is not utf-8", escaped))
    })
}

/// Raw key bytes for an escaped key text; every `%XX` is decoded.
pub fn key_bytes_for_id(id: &str) -> AppResult<Bytes> {
    let input = id.as_bytes();
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let byte = input[i];
        if byte >= 0x80 {
            return Err(AppError::InvalidReference(format!(
                "unescaped non ascii character in key {:?}",
                id
            )));
        }
        if byte == b'%' {
            let digits = input.get(i + 1..i + 3).ok_or_else(|| {
                AppError::InvalidReference(format!("truncated escape in key {:?}", id))
            })?;
            match (hex_value(digits[0]), hex_value(digits[1])) {
                (Some(high), Some(low)) => out.push((high << 4) | low),
                _ => {
                    return Err(AppError::InvalidReference(format!(
                        "bad escape in key {:?}",
                        id
                    )))
                }
            }
            i += 3;
        } else {
            out.push(byte);
            i += 1;
        }
    }
    Ok(Bytes::from(out))
}

/// Printable form of raw key bytes; `key_bytes_for_id` turns it back into
/// the same bytes.
pub fn object_key_to_string(key: &[u8]) -> String {
    let mut out = String::with_capacity(key.len());
    for &byte in key {
        if (0x20..0x7F).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            push_escaped(&mut out, byte);
        }
    }
    out
}
