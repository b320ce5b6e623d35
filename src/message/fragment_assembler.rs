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

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::protocol::CdrInputStream;
use crate::{AppError, AppResult};

use super::giop_header::{GiopHeader, GiopMessageType, GIOP_HEADER_SIZE};

/// Identifies one fragmented message on a connection.
///
/// GIOP 1.1 fragments carry no request id, so only one fragmented message
/// can be in flight and all of them share one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKey {
    Giop11,
    RequestId(u32),
}

impl Display for FragmentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentKey::Giop11 => write!(f, "giop 1.1 message"),
            FragmentKey::RequestId(id) => write!(f, "request {}", id),
        }
    }
}

/// A message rebuilt from its fragments: the corrected header and the full
/// wire bytes, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub header: GiopHeader,
    pub message: Bytes,
}

impl AssembledMessage {
    pub fn body(&self) -> Bytes {
        self.message.slice(GIOP_HEADER_SIZE..)
    }
}

#[derive(Debug)]
struct FragmentedMessageDescriptor {
    header: GiopHeader,
    target: BytesMut,
}

/// Reassembles the fragmented messages received on one connection.
///
/// Every operation runs under one lock over the key table.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    in_flight: Mutex<HashMap<FragmentKey, FragmentedMessageDescriptor>>,
}

impl FragmentAssembler {
    pub fn new() -> FragmentAssembler {
        FragmentAssembler::default()
    }

    pub fn is_last_fragment(header: &GiopHeader) -> bool {
        !header.is_fragmented()
    }

    /// number of messages still waiting for fragments
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Begins a message whose header announces more fragments. `body` holds
    /// at least `header.content_length` bytes following the header.
    pub fn start_fragment(&self, header: &GiopHeader, body: Bytes) -> AppResult<FragmentKey> {
        let mut source = open_body(header, body)?;
        let key = if header.version.fragments_carry_request_id() {
            // request and reply bodies start with the request id
            let request_id = peek_request_id(&source)?;
            FragmentKey::RequestId(request_id)
        } else {
            FragmentKey::Giop11
        };
        let content = source.read_opaque(header.content_length as usize)?;

        let mut target = BytesMut::with_capacity(GIOP_HEADER_SIZE + content.len() * 2);
        // placeholder, rewritten when the last fragment arrives
        header.write_to(&mut target);
        target.put_slice(&content);

        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(&key) {
            return Err(AppError::MalformedProtocol(format!(
                "{} is already being reassembled",
                key
            )));
        }
        in_flight.insert(
            key,
            FragmentedMessageDescriptor {
                header: *header,
                target,
            },
        );
        debug!("start fragmented {:?} for {}", header.message_type, key);
        Ok(key)
    }

    /// Appends a `Fragment` message that announces more fragments.
    pub fn add_fragment(&self, header: &GiopHeader, body: Bytes) -> AppResult<()> {
        let (key, content) = fragment_payload(header, body)?;
        let mut in_flight = self.in_flight.lock();
        let descriptor = in_flight
            .get_mut(&key)
            .ok_or_else(|| AppError::UnknownFragment(key.to_string()))?;
        descriptor.target.put_slice(&content);
        trace!(
            "fragment for {} appended, {} bytes so far",
            key,
            descriptor.target.len()
        );
        Ok(())
    }

    /// Appends the last fragment and returns the complete message with its
    /// header's fragment bit cleared and length corrected.
    pub fn finish_fragment(&self, header: &GiopHeader, body: Bytes) -> AppResult<AssembledMessage> {
        let (key, content) = fragment_payload(header, body)?;
        let mut descriptor = self
            .in_flight
            .lock()
            .remove(&key)
            .ok_or_else(|| AppError::UnknownFragment(key.to_string()))?;
        descriptor.target.put_slice(&content);

        let content_length = u32::try_from(descriptor.target.len() - GIOP_HEADER_SIZE)
            .map_err(|_| {
                AppError::MalformedProtocol(format!("reassembled {} exceeds 4 GiB", key))
            })?;
        let mut full_header = descriptor.header;
        full_header.set_fragmented(false);
        full_header.content_length = content_length;
        descriptor.target[..GIOP_HEADER_SIZE].copy_from_slice(&full_header.to_bytes());
        debug!(
            "reassembled {:?} for {}, {} body bytes",
            full_header.message_type, key, content_length
        );
        Ok(AssembledMessage {
            header: full_header,
            message: descriptor.target.freeze(),
        })
    }

    /// Routes one received message. Returns the message once it is complete,
    /// `None` while fragments are still missing.
    pub fn accept(&self, header: &GiopHeader, body: Bytes) -> AppResult<Option<AssembledMessage>> {
        match (header.message_type, header.is_fragmented()) {
            (GiopMessageType::Fragment, true) => {
                self.add_fragment(header, body)?;
                Ok(None)
            }
            (GiopMessageType::Fragment, false) => self.finish_fragment(header, body).map(Some),
            (_, true) => {
                self.start_fragment(header, body)?;
                Ok(None)
            }
            (_, false) => {
                let content_length = header.content_length as usize;
                if body.len() < content_length {
                    return Err(AppError::EndOfMessage {
                        offset: body.len(),
                        requested: content_length - body.len(),
                    });
                }
                let body = body.slice(..content_length);
                let mut message = BytesMut::with_capacity(GIOP_HEADER_SIZE + body.len());
                header.write_to(&mut message);
                message.put_slice(&body);
                Ok(Some(AssembledMessage {
                    header: *header,
                    message: message.freeze(),
                }))
            }
        }
    }
}

fn open_body(header: &GiopHeader, body: Bytes) -> AppResult<CdrInputStream> {
    if !header.version.supports_fragments() {
        return Err(AppError::MalformedProtocol(format!(
            "fragmentation is not allowed in giop {}",
            header.version
        )));
    }
    let mut source = CdrInputStream::with_base_offset(body, GIOP_HEADER_SIZE);
    source.configure(header.endian(), header.version)?;
    source.set_max_length(header.content_length as usize);
    Ok(source)
}

fn peek_request_id(source: &CdrInputStream) -> AppResult<u32> {
    source.clone().read_ulong()
}

/// Key and payload of a `Fragment` message. In GIOP 1.2 the payload follows
/// the four byte fragment header holding the request id.
fn fragment_payload(header: &GiopHeader, body: Bytes) -> AppResult<(FragmentKey, Bytes)> {
    if header.message_type != GiopMessageType::Fragment {
        return Err(AppError::MalformedProtocol(format!(
            "{:?} message where a fragment was expected",
            header.message_type
        )));
    }
    let mut source = open_body(header, body)?;
    let key = if header.version.fragments_carry_request_id() {
        FragmentKey::RequestId(source.read_ulong()?)
    } else {
        FragmentKey::Giop11
    };
    let content = source.read_rest()?;
    Ok((key, content))
}
