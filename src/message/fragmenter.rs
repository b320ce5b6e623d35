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
use tracing::debug;

use crate::{AppError, AppResult};

use super::giop_header::{GiopHeader, GiopMessageType, GIOP_HEADER_SIZE};

/// Splits one complete GIOP message into a fragment sequence whose bodies
/// hold at most `max_body` bytes. A message that already fits is returned
/// unchanged.
///
/// Chunk sizes keep every continuation at the same position modulo 8 in the
/// fragment and in the reassembled message, so primitives never straddle a
/// fragment boundary with different padding on each side.
pub fn split_into_fragments(message: &[u8], max_body: usize) -> AppResult<Vec<Bytes>> {
    let header = GiopHeader::read_from(message)?;
    let body = message
        .get(GIOP_HEADER_SIZE..header.message_size())
        .ok_or(AppError::EndOfMessage {
            offset: message.len(),
            requested: header.message_size() - message.len().min(header.message_size()),
        })?;
    if body.len() <= max_body {
        return Ok(vec![Bytes::copy_from_slice(&message[..header.message_size()])]);
    }
    if !header.version.supports_fragments() {
        return Err(AppError::MalformedProtocol(format!(
            "{} byte body does not fit and giop {} cannot fragment",
            body.len(),
            header.version
        )));
    }
    if header.message_type == GiopMessageType::Fragment || header.is_fragmented() {
        return Err(AppError::InvalidValue(
            "message is already a fragment".to_string(),
        ));
    }

    // in 1.2 every fragment after the first repeats the request id
    let (first_len, chunk_len, fragment_prefix) = if header.version.fragments_carry_request_id() {
        if max_body < 12 {
            return Err(AppError::InvalidValue(format!(
                "fragment body size {} below 12",
                max_body
            )));
        }
        let chunk = (max_body - 4) / 8 * 8;
        (chunk + 4, chunk, &body[..4])
    } else {
        if max_body < 8 {
            return Err(AppError::InvalidValue(format!(
                "fragment body size {} below 8",
                max_body
            )));
        }
        let chunk = max_body / 8 * 8;
        (chunk, chunk, &body[..0])
    };

    let mut fragments = Vec::with_capacity(body.len() / chunk_len + 2);
    let mut first_header = header;
    first_header.set_fragmented(true);
    fragments.push(build(first_header, &[], &body[..first_len]));

    let mut rest = &body[first_len..];
    while !rest.is_empty() {
        let take = chunk_len.min(rest.len());
        let (chunk, remainder) = rest.split_at(take);
        let mut fragment_header = GiopHeader {
            message_type: GiopMessageType::Fragment,
            ..header
        };
        fragment_header.set_fragmented(!remainder.is_empty());
        fragments.push(build(fragment_header, fragment_prefix, chunk));
        rest = remainder;
    }
    debug!(
        "split {:?} of {} body bytes into {} fragments",
        header.message_type,
        body.len(),
        fragments.len()
    );
    Ok(fragments)
}

fn build(mut header: GiopHeader, prefix: &[u8], chunk: &[u8]) -> Bytes {
    header.content_length = (prefix.len() + chunk.len()) as u32;
    let mut out = BytesMut::with_capacity(header.message_size());
    header.write_to(&mut out);
    out.put_slice(prefix);
    out.put_slice(chunk);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::message::{FragmentAssembler, GiopVersion};
    use crate::protocol::Endian;

    fn message(version: GiopVersion, endian: Endian, body_len: usize) -> Vec<u8> {
        let header = GiopHeader::new(version, endian, GiopMessageType::Request, body_len as u32);
        let mut out = header.to_bytes().to_vec();
        out.extend((0..body_len).map(|i| (i % 251) as u8));
        out
    }

    fn reassemble(fragments: &[Bytes]) -> Bytes {
        let assembler = FragmentAssembler::new();
        let mut result = None;
        for fragment in fragments {
            let header = GiopHeader::read_from(fragment).unwrap();
            result = assembler
                .accept(&header, fragment.slice(GIOP_HEADER_SIZE..))
                .unwrap();
        }
        result.unwrap().message
    }

    #[rstest]
    #[case(GiopVersion::V1_1, Endian::Big, 100, 16)]
    #[case(GiopVersion::V1_1, Endian::Little, 17, 8)]
    #[case(GiopVersion::V1_2, Endian::Big, 100, 20)]
    #[case(GiopVersion::V1_2, Endian::Little, 1000, 64)]
    fn test_split_then_reassemble(
        #[case] version: GiopVersion,
        #[case] endian: Endian,
        #[case] body_len: usize,
        #[case] max_body: usize,
    ) {
        let original = message(version, endian, body_len);
        let fragments = split_into_fragments(&original, max_body).unwrap();
        assert!(fragments.len() > 1);
        for (i, fragment) in fragments.iter().enumerate() {
            let header = GiopHeader::read_from(fragment).unwrap();
            assert!(header.content_length as usize <= max_body);
            assert_eq!(header.is_fragmented(), i + 1 < fragments.len());
            if i + 1 < fragments.len() {
                assert_eq!(fragment.len() % 8, if version == GiopVersion::V1_2 { 0 } else { 4 });
            }
        }
        assert_eq!(&reassemble(&fragments)[..], &original[..]);
    }

    #[test]
    fn test_small_message_unchanged() {
        let original = message(GiopVersion::V1_0, Endian::Big, 10);
        let fragments = split_into_fragments(&original, 10).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(&fragments[0][..], &original[..]);
    }

    #[test]
    fn test_giop_1_0_too_large() {
        let original = message(GiopVersion::V1_0, Endian::Big, 100);
        assert!(matches!(
            split_into_fragments(&original, 16),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[test]
    fn test_tiny_fragment_size() {
        let original = message(GiopVersion::V1_2, Endian::Big, 100);
        assert!(matches!(
            split_into_fragments(&original, 8),
            Err(AppError::InvalidValue(_))
        ));
    }
}
