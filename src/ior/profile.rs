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

use bytes::Bytes;

use crate::message::GiopVersion;
use crate::protocol::{encode_encapsulation, CdrInputStream, CdrOutputStream, Endian};
use crate::{AppError, AppResult};

use super::object_key::object_key_to_string;

pub const TAG_INTERNET_IOP: u32 = 0;
pub const TAG_CODE_SETS: u32 = 1;
pub const TAG_SSL_SEC_TRANS: u32 = 20;

/// security association option bits carried by the ssl component
pub mod association_options {
    pub const NO_PROTECTION: u16 = 0x0001;
    pub const INTEGRITY: u16 = 0x0002;
    pub const CONFIDENTIALITY: u16 = 0x0004;
    pub const DETECT_REPLAY: u16 = 0x0008;
    pub const DETECT_MISORDERING: u16 = 0x0010;
    pub const ESTABLISH_TRUST_IN_TARGET: u16 = 0x0020;
    pub const ESTABLISH_TRUST_IN_CLIENT: u16 = 0x0040;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Iiop,
    IiopSsl,
}

impl Scheme {
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Iiop => "iiop",
            Scheme::IiopSsl => "iiop-ssl",
        }
    }
}

/// Identity of a pooled connection: connections are shared between calls to
/// the same scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Display for ConnectionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.prefix(), self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedComponent {
    pub tag: u32,
    /// encapsulated component data
    pub data: Bytes,
}

impl TaggedComponent {
    pub fn new(tag: u32, data: Bytes) -> TaggedComponent {
        TaggedComponent { tag, data }
    }

    pub fn write_list(out: &mut CdrOutputStream, components: &[TaggedComponent]) -> AppResult<()> {
        out.write_ulong(components.len() as u32);
        for component in components {
            out.write_ulong(component.tag);
            out.write_octet_sequence(&component.data)?;
        }
        Ok(())
    }

    pub fn read_list(input: &mut CdrInputStream) -> AppResult<Vec<TaggedComponent>> {
        let count = input.read_ulong()? as usize;
        let mut components = Vec::with_capacity(count.min(input.remaining() / 8));
        for _ in 0..count {
            let tag = input.read_ulong()?;
            let data = input.read_octet_sequence()?;
            components.push(TaggedComponent::new(tag, data));
        }
        Ok(components)
    }
}

/// `TAG_SSL_SEC_TRANS` component: the secured port lives here, the profile
/// port of a secured target is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslComponentData {
    pub target_supports: u16,
    pub target_requires: u16,
    pub port: u16,
}

impl SslComponentData {
    /// what a secured locator advertises
    pub fn for_port(port: u16) -> SslComponentData {
        SslComponentData {
            target_supports: association_options::ESTABLISH_TRUST_IN_CLIENT,
            target_requires: association_options::ESTABLISH_TRUST_IN_TARGET,
            port,
        }
    }

    pub fn to_component(&self, endian: Endian) -> AppResult<TaggedComponent> {
        let data = encode_encapsulation(endian, |out| {
            out.write_ushort(self.target_supports);
            out.write_ushort(self.target_requires);
            out.write_ushort(self.port);
            Ok(())
        })?;
        Ok(TaggedComponent::new(TAG_SSL_SEC_TRANS, data))
    }

    pub fn from_component(component: &TaggedComponent) -> AppResult<SslComponentData> {
        if component.tag != TAG_SSL_SEC_TRANS {
            return Err(AppError::Internal(format!(
                "component tag {} is not an ssl component",
                component.tag
            )));
        }
        let mut input = CdrInputStream::open_encapsulation(component.data.clone())?;
        Ok(SslComponentData {
            target_supports: input.read_ushort()?,
            target_requires: input.read_ushort()?,
            port: input.read_ushort()?,
        })
    }
}

/// A resolved, connectable IIOP target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressProfile {
    pub scheme: Scheme,
    pub version: GiopVersion,
    pub host: String,
    /// primary port, 0 for secured targets
    pub port: u16,
    pub object_key: Bytes,
    pub components: Vec<TaggedComponent>,
}

impl AddressProfile {
    pub fn add_component(&mut self, component: TaggedComponent) {
        self.components.push(component);
    }

    pub fn find_component(&self, tag: u32) -> Option<&TaggedComponent> {
        self.components.iter().find(|c| c.tag == tag)
    }

    pub fn ssl_component(&self) -> AppResult<Option<SslComponentData>> {
        self.find_component(TAG_SSL_SEC_TRANS)
            .map(SslComponentData::from_component)
            .transpose()
    }

    /// port to connect to: the ssl component's for secured targets
    pub fn effective_port(&self) -> AppResult<u16> {
        match self.scheme {
            Scheme::Iiop => Ok(self.port),
            Scheme::IiopSsl => self
                .ssl_component()?
                .map(|ssl| ssl.port)
                .ok_or_else(|| {
                    AppError::InvalidReference(format!(
                        "secured profile for {} without ssl component",
                        self.host
                    ))
                }),
        }
    }

    pub fn connection_key(&self) -> AppResult<ConnectionKey> {
        Ok(ConnectionKey {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.effective_port()?,
        })
    }

    /// channel form of the target, e.g. `iiop1.2://host:2809/`
    pub fn channel_uri(&self) -> AppResult<String> {
        Ok(format!(
            "{}{}://{}:{}/",
            self.scheme.prefix(),
            self.version,
            self.host,
            self.effective_port()?
        ))
    }

    pub fn object_uri(&self) -> String {
        object_key_to_string(&self.object_key)
    }

    /// Encapsulated IIOP profile body. Components are only part of the body
    /// from IIOP 1.1 on.
    pub fn write_profile_body(&self, endian: Endian) -> AppResult<Bytes> {
        encode_encapsulation(endian, |out| {
            out.write_octet(self.version.major);
            out.write_octet(self.version.minor);
            out.write_string(&self.host)?;
            out.write_ushort(self.port);
            out.write_octet_sequence(&self.object_key)?;
            if self.version.minor >= 1 {
                TaggedComponent::write_list(out, &self.components)?;
            }
            Ok(())
        })
    }

    pub fn read_profile_body(data: Bytes) -> AppResult<AddressProfile> {
        let mut input = CdrInputStream::open_encapsulation(data)?;
        let version = GiopVersion::new(input.read_octet()?, input.read_octet()?);
        if version.major != 1 {
            return Err(AppError::InvalidReference(format!(
                "iiop profile version {}",
                version
            )));
        }
        let host = input.read_string()?;
        let port = input.read_ushort()?;
        let object_key = input.read_octet_sequence()?;
        let components = if version.minor >= 1 {
            TaggedComponent::read_list(&mut input)?
        } else {
            Vec::new()
        };
        let scheme = if components.iter().any(|c| c.tag == TAG_SSL_SEC_TRANS) {
            Scheme::IiopSsl
        } else {
            Scheme::Iiop
        };
        Ok(AddressProfile {
            scheme,
            version,
            host,
            port,
            object_key,
            components,
        })
    }

    /// `TAG_INTERNET_IOP` tagged profile, as it appears in an IOR
    pub fn to_tagged_profile(&self, endian: Endian) -> AppResult<TaggedComponent> {
        Ok(TaggedComponent::new(
            TAG_INTERNET_IOP,
            self.write_profile_body(endian)?,
        ))
    }
}
