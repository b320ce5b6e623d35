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

use crate::protocol::{CdrInputStream, CdrOutputStream, Endian};
use crate::{AppError, AppResult};

use super::giop_header::{GiopHeader, GiopMessageType, GiopVersion, GIOP_HEADER_SIZE};

/// GIOP 1.2 target address discriminator for a plain object key
const KEY_ADDR: i16 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateRequest {
    pub request_id: u32,
    pub object_key: Bytes,
}

impl LocateRequest {
    pub fn new(request_id: u32, object_key: Bytes) -> LocateRequest {
        LocateRequest {
            request_id,
            object_key,
        }
    }

    /// The complete message, header included.
    pub fn to_message(&self, version: GiopVersion, endian: Endian) -> AppResult<Bytes> {
        let mut body = CdrOutputStream::with_base_offset(endian, version, GIOP_HEADER_SIZE);
        body.write_ulong(self.request_id);
        if version.fragments_carry_request_id() {
            body.write_short(KEY_ADDR);
        }
        body.write_octet_sequence(&self.object_key)?;
        let header = GiopHeader::new(
            version,
            endian,
            GiopMessageType::LocateRequest,
            body.len() as u32,
        );
        let mut message = BytesMut::with_capacity(header.message_size());
        header.write_to(&mut message);
        message.extend_from_slice(body.as_bytes());
        Ok(message.freeze())
    }

    pub fn read_from(header: &GiopHeader, body: Bytes) -> AppResult<LocateRequest> {
        let mut input = open(header, GiopMessageType::LocateRequest, body)?;
        let request_id = input.read_ulong()?;
        if header.version.fragments_carry_request_id() {
            let discriminator = input.read_short()?;
            if discriminator != KEY_ADDR {
                return Err(AppError::MalformedProtocol(format!(
                    "unsupported target address kind {}",
                    discriminator
                )));
            }
        }
        let object_key = input.read_octet_sequence()?;
        Ok(LocateRequest {
            request_id,
            object_key,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStatus {
    UnknownObject,
    ObjectHere,
    ObjectForward,
    ObjectForwardPerm,
    LocSystemException,
    LocNeedsAddressingMode,
}

impl TryFrom<u32> for LocateStatus {
    type Error = AppError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LocateStatus::UnknownObject),
            1 => Ok(LocateStatus::ObjectHere),
            2 => Ok(LocateStatus::ObjectForward),
            3 => Ok(LocateStatus::ObjectForwardPerm),
            4 => Ok(LocateStatus::LocSystemException),
            5 => Ok(LocateStatus::LocNeedsAddressingMode),
            other => Err(AppError::MalformedProtocol(format!(
                "unknown locate status {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateReply {
    pub request_id: u32,
    pub status: LocateStatus,
    /// forward reference or exception, left encoded
    pub payload: Bytes,
}

impl LocateReply {
    pub fn to_message(&self, version: GiopVersion, endian: Endian) -> AppResult<Bytes> {
        let mut body = CdrOutputStream::with_base_offset(endian, version, GIOP_HEADER_SIZE);
        body.write_ulong(self.request_id);
        body.write_ulong(self.status as u32);
        body.write_opaque(&self.payload);
        let header =
            GiopHeader::new(version, endian, GiopMessageType::LocateReply, body.len() as u32);
        let mut message = BytesMut::with_capacity(header.message_size());
        header.write_to(&mut message);
        message.extend_from_slice(body.as_bytes());
        Ok(message.freeze())
    }

    pub fn read_from(header: &GiopHeader, body: Bytes) -> AppResult<LocateReply> {
        let mut input = open(header, GiopMessageType::LocateReply, body)?;
        let request_id = input.read_ulong()?;
        let status = LocateStatus::try_from(input.read_ulong()?)?;
        let payload = input.read_rest()?;
        Ok(LocateReply {
            request_id,
            status,
            payload,
        })
    }
}

fn open(header: &GiopHeader, expected: GiopMessageType, body: Bytes) -> AppResult<CdrInputStream> {
    if header.message_type != expected {
        return Err(AppError::MalformedProtocol(format!(
            "expected {:?}, got {:?}",
            expected, header.message_type
        )));
    }
    let mut input = CdrInputStream::with_base_offset(body, GIOP_HEADER_SIZE);
    input.configure(header.endian(), header.version)?;
    input.set_max_length(header.content_length as usize);
    Ok(input)
}
