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

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{GiopHeader, GIOP_HEADER_SIZE};
use crate::{AppError, AppResult};

/// One GIOP message (or fragment) as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiopFrame {
    pub header: GiopHeader,
    pub body: Bytes,
}

impl GiopFrame {
    /// Validates the buffered header and checks a complete message is
    /// buffered. Returns `Incomplete` until it is.
    pub fn check(buffer: &mut BytesMut, max_message_size: usize) -> AppResult<GiopHeader> {
        let header = GiopHeader::read_from(buffer)?;
        let frame_size = header.message_size();
        if frame_size > max_message_size {
            return Err(AppError::MalformedProtocol(format!(
                "giop message of length {} is too large",
                frame_size
            )));
        }
        if buffer.len() < frame_size {
            buffer.reserve(frame_size - buffer.len());
            return Err(AppError::Incomplete);
        }
        Ok(header)
    }

    pub fn parse(buffer: &mut BytesMut, max_message_size: usize) -> AppResult<Option<GiopFrame>> {
        match GiopFrame::check(buffer, max_message_size) {
            Ok(header) => {
                let mut message = buffer.split_to(header.message_size());
                let body = message.split_off(GIOP_HEADER_SIZE).freeze();
                Ok(Some(GiopFrame { header, body }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// header and body back as one wire message
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(GIOP_HEADER_SIZE + self.body.len());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.body);
        out.freeze()
    }
}

/// Frames a byte stream into GIOP messages; outbound items are complete,
/// already encoded messages.
#[derive(Debug, Clone, Copy)]
pub struct GiopCodec {
    max_message_size: usize,
}

impl GiopCodec {
    pub fn new(max_message_size: usize) -> GiopCodec {
        GiopCodec { max_message_size }
    }
}

impl Decoder for GiopCodec {
    type Item = GiopFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        GiopFrame::parse(src, self.max_message_size)
    }
}

impl Encoder<Bytes> for GiopCodec {
    type Error = AppError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = GiopHeader::read_from(&item).map_err(|e| match e {
            AppError::Incomplete => {
                AppError::InvalidValue(format!("{} bytes is no giop message", item.len()))
            }
            other => other,
        })?;
        if header.message_size() != item.len() {
            return Err(AppError::InvalidValue(format!(
                "giop header announces {} bytes, message has {}",
                header.message_size(),
                item.len()
            )));
        }
        if item.len() > self.max_message_size {
            return Err(AppError::MalformedProtocol(format!(
                "giop message of length {} is too large",
                item.len()
            )));
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{GiopMessageType, GiopVersion};
    use crate::protocol::Endian;

    fn message(body: &[u8]) -> Bytes {
        let header = GiopHeader::new(
            GiopVersion::V1_2,
            Endian::Little,
            GiopMessageType::Request,
            body.len() as u32,
        );
        let mut out = BytesMut::new();
        header.write_to(&mut out);
        out.extend_from_slice(body);
        out.freeze()
    }

    #[test]
    fn test_parse_waits_for_full_message() {
        let whole = message(&[1, 2, 3, 4, 5]);
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&whole[..8]);
        assert!(GiopFrame::parse(&mut buffer, 1024).unwrap().is_none());
        buffer.extend_from_slice(&whole[8..14]);
        assert!(GiopFrame::parse(&mut buffer, 1024).unwrap().is_none());
        buffer.extend_from_slice(&whole[14..]);
        // a second message already started
        buffer.extend_from_slice(&whole[..3]);
        let frame = GiopFrame::parse(&mut buffer, 1024).unwrap().unwrap();
        assert_eq!(&frame.body[..], &[1, 2, 3, 4, 5]);
        assert_eq!(frame.to_bytes(), whole);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_too_large() {
        let mut buffer = BytesMut::from(&message(&[0; 64])[..]);
        assert!(matches!(
            GiopFrame::parse(&mut buffer, 32),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut buffer = BytesMut::from(&b"POIG\x01\x02\x00\x00\x00\x00\x00\x00"[..]);
        assert!(GiopFrame::parse(&mut buffer, 1024).is_err());
    }

    #[test]
    fn test_codec() {
        let mut codec = GiopCodec::new(1024);
        let mut wire = BytesMut::new();
        let sent = message(b"abc");
        codec.encode(sent.clone(), &mut wire).unwrap();
        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.to_bytes(), sent);
        assert!(codec.decode(&mut wire).unwrap().is_none());

        let truncated = sent.slice(..sent.len() - 1);
        assert!(matches!(
            codec.encode(truncated, &mut wire),
            Err(AppError::InvalidValue(_))
        ));
    }
}
