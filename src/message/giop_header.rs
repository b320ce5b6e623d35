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

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::protocol::{Endian, FLAG_LITTLE_ENDIAN};
use crate::{AppError, AppResult};

pub const GIOP_MAGIC: [u8; 4] = *b"GIOP";
pub const GIOP_HEADER_SIZE: usize = 12;
/// more fragments follow this message (GIOP 1.1 and later)
pub const FLAG_FRAGMENT: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GiopVersion {
    pub major: u8,
    pub minor: u8,
}

impl GiopVersion {
    pub const V1_0: GiopVersion = GiopVersion::new(1, 0);
    pub const V1_1: GiopVersion = GiopVersion::new(1, 1);
    pub const V1_2: GiopVersion = GiopVersion::new(1, 2);

    pub const fn new(major: u8, minor: u8) -> GiopVersion {
        GiopVersion { major, minor }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1 && self.minor <= 2
    }

    /// GIOP 1.0 and 1.1 frame wide strings by character count with a
    /// trailing wide null, later versions by octet count.
    pub fn counts_wide_chars(&self) -> bool {
        self.major == 1 && self.minor <= 1
    }

    pub fn supports_fragments(&self) -> bool {
        *self >= GiopVersion::V1_1
    }

    /// fragments carry the request id of the message they belong to
    pub fn fragments_carry_request_id(&self) -> bool {
        *self >= GiopVersion::V1_2
    }
}

impl Display for GiopVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for GiopVersion {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || AppError::BadParam(format!("version string {:?}, expected MAJOR.MINOR", s));
        let (major, minor) = s.split_once('.').ok_or_else(bad)?;
        let major = major.parse::<u8>().map_err(|_| bad())?;
        let minor = minor.parse::<u8>().map_err(|_| bad())?;
        Ok(GiopVersion::new(major, minor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GiopMessageType {
    Request = 0,
    Reply = 1,
    CancelRequest = 2,
    LocateRequest = 3,
    LocateReply = 4,
    CloseConnection = 5,
    MessageError = 6,
    Fragment = 7,
}

impl TryFrom<u8> for GiopMessageType {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GiopMessageType::Request),
            1 => Ok(GiopMessageType::Reply),
            2 => Ok(GiopMessageType::CancelRequest),
            3 => Ok(GiopMessageType::LocateRequest),
            4 => Ok(GiopMessageType::LocateReply),
            5 => Ok(GiopMessageType::CloseConnection),
            6 => Ok(GiopMessageType::MessageError),
            7 => Ok(GiopMessageType::Fragment),
            other => Err(AppError::MalformedProtocol(format!(
                "unknown giop message type {}",
                other
            ))),
        }
    }
}

/// The fixed 12 byte GIOP message header.
///
/// `content_length` never includes the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GiopHeader {
    pub version: GiopVersion,
    pub flags: u8,
    pub message_type: GiopMessageType,
    pub content_length: u32,
}

impl GiopHeader {
    pub fn new(
        version: GiopVersion,
        endian: Endian,
        message_type: GiopMessageType,
        content_length: u32,
    ) -> GiopHeader {
        GiopHeader {
            version,
            flags: endian.flag_bit(),
            message_type,
            content_length,
        }
    }

    pub fn endian(&self) -> Endian {
        Endian::from_flags(self.flags)
    }

    /// true if more fragments of this message follow
    pub fn is_fragmented(&self) -> bool {
        self.version.supports_fragments() && self.flags & FLAG_FRAGMENT != 0
    }

    pub fn set_fragmented(&mut self, more_fragments: bool) {
        if more_fragments {
            self.flags |= FLAG_FRAGMENT;
        } else {
            self.flags &= !FLAG_FRAGMENT;
        }
    }

    /// Parses a header from the first 12 bytes of `buffer`.
    ///
    /// Returns `Incomplete` while fewer than 12 bytes are available.
    pub fn read_from(buffer: &[u8]) -> AppResult<GiopHeader> {
        if buffer.len() < GIOP_HEADER_SIZE {
            return Err(AppError::Incomplete);
        }
        if buffer[0..4] != GIOP_MAGIC {
            return Err(AppError::MalformedProtocol(format!(
                "bad giop magic {:02x?}",
                &buffer[0..4]
            )));
        }
        let version = GiopVersion::new(buffer[4], buffer[5]);
        if !version.is_supported() {
            return Err(AppError::MalformedProtocol(format!(
                "unsupported giop version {}",
                version
            )));
        }
        let flags = buffer[6];
        if version == GiopVersion::V1_0 && flags & !FLAG_LITTLE_ENDIAN != 0 {
            return Err(AppError::MalformedProtocol(format!(
                "giop 1.0 byte order octet {:#04x}",
                flags
            )));
        }
        let message_type = GiopMessageType::try_from(buffer[7])?;
        if message_type == GiopMessageType::Fragment && !version.supports_fragments() {
            return Err(AppError::MalformedProtocol(
                "fragment message in giop 1.0".to_string(),
            ));
        }
        let length_bytes = [buffer[8], buffer[9], buffer[10], buffer[11]];
        let content_length = match Endian::from_flags(flags) {
            Endian::Big => u32::from_be_bytes(length_bytes),
            Endian::Little => u32::from_le_bytes(length_bytes),
        };
        Ok(GiopHeader {
            version,
            flags,
            message_type,
            content_length,
        })
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        out.put_slice(&self.to_bytes());
    }

    pub fn to_bytes(&self) -> [u8; GIOP_HEADER_SIZE] {
        let length = match self.endian() {
            Endian::Big => self.content_length.to_be_bytes(),
            Endian::Little => self.content_length.to_le_bytes(),
        };
        [
            GIOP_MAGIC[0],
            GIOP_MAGIC[1],
            GIOP_MAGIC[2],
            GIOP_MAGIC[3],
            self.version.major,
            self.version.minor,
            self.flags,
            self.message_type as u8,
            length[0],
            length[1],
            length[2],
            length[3],
        ]
    }

    /// total size of the message on the wire
    pub fn message_size(&self) -> usize {
        GIOP_HEADER_SIZE + self.content_length as usize
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Endian::Big)]
    #[case(Endian::Little)]
    fn test_header_write_read(#[case] endian: Endian) {
        let mut header = GiopHeader::new(GiopVersion::V1_2, endian, GiopMessageType::Request, 300);
        header.set_fragmented(true);
        let mut buffer = BytesMut::new();
        header.write_to(&mut buffer);
        assert_eq!(buffer.len(), GIOP_HEADER_SIZE);
        assert_eq!(&buffer[0..4], b"GIOP");
        let read = GiopHeader::read_from(&buffer).unwrap();
        assert_eq!(read, header);
        assert!(read.is_fragmented());
        assert_eq!(read.endian(), endian);
        assert_eq!(read.message_size(), 312);
    }

    #[test]
    fn test_content_length_follows_flags() {
        let header = GiopHeader::new(GiopVersion::V1_1, Endian::Little, GiopMessageType::Reply, 1);
        assert_eq!(&header.to_bytes()[8..], &[1, 0, 0, 0]);
        let header = GiopHeader::new(GiopVersion::V1_1, Endian::Big, GiopMessageType::Reply, 1);
        assert_eq!(&header.to_bytes()[8..], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        assert!(matches!(
            GiopHeader::read_from(b"GIOP\x01\x02"),
            Err(AppError::Incomplete)
        ));
    }

    #[rstest]
    #[case::bad_magic(*b"GIOX\x01\x02\x00\x00\x00\x00\x00\x00")]
    #[case::bad_version(*b"GIOP\x02\x00\x00\x00\x00\x00\x00\x00")]
    #[case::bad_type(*b"GIOP\x01\x02\x00\x09\x00\x00\x00\x00")]
    #[case::fragment_in_1_0(*b"GIOP\x01\x00\x00\x07\x00\x00\x00\x00")]
    fn test_malformed_header(#[case] bytes: [u8; 12]) {
        assert!(matches!(
            GiopHeader::read_from(&bytes),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[test]
    fn test_fragment_bit_ignored_for_1_0() {
        let mut header =
            GiopHeader::new(GiopVersion::V1_0, Endian::Big, GiopMessageType::Request, 0);
        header.flags |= FLAG_FRAGMENT;
        assert!(!header.is_fragmented());
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("1.1".parse::<GiopVersion>().unwrap(), GiopVersion::V1_1);
        assert_eq!(GiopVersion::V1_2.to_string(), "1.2");
        assert!(matches!(
            "1".parse::<GiopVersion>(),
            Err(AppError::BadParam(_))
        ));
        assert!("x.2".parse::<GiopVersion>().is_err());
        assert!(GiopVersion::V1_1.counts_wide_chars());
        assert!(!GiopVersion::V1_2.counts_wide_chars());
    }
}
