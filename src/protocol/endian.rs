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

/// Byte order of a CDR stream, selected by bit 0 of the GIOP flags octet
/// (or of the leading octet of an encapsulation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

pub const FLAG_LITTLE_ENDIAN: u8 = 0x01;

impl Endian {
    pub const fn from_flags(flags: u8) -> Endian {
        if flags & FLAG_LITTLE_ENDIAN != 0 {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    /// the flag bit to put in a header or encapsulation for this byte order
    pub const fn flag_bit(self) -> u8 {
        match self {
            Endian::Big => 0,
            Endian::Little => FLAG_LITTLE_ENDIAN,
        }
    }

    pub const fn native() -> Endian {
        if cfg!(target_endian = "little") {
            Endian::Little
        } else {
            Endian::Big
        }
    }
}

/// Padding needed before a value of `width` bytes at `position`.
/// `width` is 1, 2, 4 or 8.
#[inline]
pub(crate) const fn padding_for(position: usize, width: usize) -> usize {
    let mask = width - 1;
    (width - (position & mask)) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(Endian::from_flags(0x00), Endian::Big);
        assert_eq!(Endian::from_flags(0x01), Endian::Little);
        // fragment bit does not influence the byte order
        assert_eq!(Endian::from_flags(0x02), Endian::Big);
        assert_eq!(Endian::from_flags(0x03), Endian::Little);
        assert_eq!(Endian::Little.flag_bit(), 1);
        assert_eq!(Endian::Big.flag_bit(), 0);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding_for(0, 4), 0);
        assert_eq!(padding_for(1, 4), 3);
        assert_eq!(padding_for(2, 4), 2);
        assert_eq!(padding_for(3, 4), 1);
        assert_eq!(padding_for(5, 8), 3);
        assert_eq!(padding_for(13, 2), 1);
        assert_eq!(padding_for(7, 1), 0);
    }
}
