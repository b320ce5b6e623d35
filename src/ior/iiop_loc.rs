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
use tracing::{debug, trace};

use crate::codeset::CodeSetService;
use crate::message::GiopVersion;
use crate::protocol::Endian;
use crate::service::TransportConfig;
use crate::{AppError, AppResult};

use super::corbaloc;
use super::object_key::{escape_non_ascii, key_bytes_for_id};
use super::profile::{AddressProfile, Scheme, SslComponentData, TaggedComponent};

/// port used when a locator names none
pub const DEFAULT_PORT: u16 = 2809;

const CORBALOC_PREFIX: &str = "corbaloc:";

/// Turns textual locators into connectable address profiles.
///
/// `iiop[M.m]://host[:port]/key` and `iiop-ssl[M.m]://host[:port]/key`
/// resolve to one profile; `corbaloc:` locators may name several addresses.
/// Every produced profile carries the resolver's additional components.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    default_version: GiopVersion,
    additional_components: Vec<TaggedComponent>,
}

impl Default for AddressResolver {
    fn default() -> Self {
        AddressResolver::new(GiopVersion::V1_2)
    }
}

impl AddressResolver {
    pub fn new(default_version: GiopVersion) -> AddressResolver {
        AddressResolver {
            default_version,
            additional_components: Vec::new(),
        }
    }

    /// A resolver whose profiles advertise this process's code sets.
    pub fn from_config(
        config: &TransportConfig,
        code_sets: &CodeSetService,
    ) -> AppResult<AddressResolver> {
        let mut resolver = AddressResolver::new(config.default_giop_version()?);
        resolver.add_component(code_sets.create_default_codeset_component()?);
        Ok(resolver)
    }

    pub fn add_component(&mut self, component: TaggedComponent) {
        self.additional_components.push(component);
    }

    pub fn default_version(&self) -> GiopVersion {
        self.default_version
    }

    /// Resolves either locator form.
    pub fn resolve_all(&self, locator: &str) -> AppResult<Vec<AddressProfile>> {
        if locator.starts_with(CORBALOC_PREFIX) {
            self.resolve_corbaloc(locator)
        } else {
            Ok(vec![self.resolve(locator)?])
        }
    }

    pub fn resolve_corbaloc(&self, locator: &str) -> AppResult<Vec<AddressProfile>> {
        let mut profiles = corbaloc::parse(locator)?;
        for profile in profiles.iter_mut() {
            for component in &self.additional_components {
                profile.add_component(component.clone());
            }
        }
        debug!("resolved {} into {} profiles", locator, profiles.len());
        Ok(profiles)
    }

    /// Resolves an `iiop://` or `iiop-ssl://` locator.
    pub fn resolve(&self, locator: &str) -> AppResult<AddressProfile> {
        let (scheme_text, rest) = locator
            .split_once("://")
            .filter(|(scheme, _)| is_uri_scheme(scheme))
            .ok_or_else(|| {
                AppError::InvalidReference(format!("unparseable locator {:?}", locator))
            })?;

        let (scheme, prefix_len) = if scheme_text.starts_with("iiop-ssl") {
            (Scheme::IiopSsl, "iiop-ssl".len())
        } else if scheme_text.starts_with("iiop") && !scheme_text.starts_with("iiop-") {
            (Scheme::Iiop, "iiop".len())
        } else {
            return Err(AppError::Internal(format!(
                "no address resolver for scheme {:?}",
                scheme_text
            )));
        };
        let version = match &scheme_text[prefix_len..] {
            "" => self.default_version,
            version_text => version_text.parse::<GiopVersion>()?,
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, Some(path)),
            None => (rest, None),
        };
        // user info is allowed by uri syntax but means nothing here
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        let (host, port) = split_host_port(authority)?;
        if host.is_empty() {
            return Err(AppError::InvalidReference(format!(
                "locator {:?} without host",
                locator
            )));
        }
        let port = match port {
            Some(port_text) => port_text.parse::<u16>().map_err(|_| {
                AppError::InvalidReference(format!("bad port {:?} in {:?}", port_text, locator))
            })?,
            None => DEFAULT_PORT,
        };
        let object_key = match path {
            Some(path) => key_bytes_for_id(&escape_non_ascii(path))?,
            None => Bytes::new(),
        };
        trace!(
            "locator {} -> scheme {:?}, version {}, host {}, port {}",
            locator,
            scheme,
            version,
            host,
            port
        );

        let mut profile = build_profile(scheme, version, host, port, object_key)?;
        for component in &self.additional_components {
            profile.add_component(component.clone());
        }
        debug!("resolved {} to {}", locator, profile.channel_uri()?);
        Ok(profile)
    }
}

pub(super) fn build_profile(
    scheme: Scheme,
    version: GiopVersion,
    host: &str,
    port: u16,
    object_key: Bytes,
) -> AppResult<AddressProfile> {
    let mut profile = AddressProfile {
        scheme,
        version,
        host: host.to_string(),
        port,
        object_key,
        components: Vec::new(),
    };
    if scheme == Scheme::IiopSsl {
        profile.port = 0;
        profile.add_component(SslComponentData::for_port(port).to_component(Endian::native())?);
    }
    Ok(profile)
}

/// Splits `host[:port]`; bracketed ipv6 hosts keep their colons.
pub(super) fn split_host_port(authority: &str) -> AppResult<(&str, Option<&str>)> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
            AppError::InvalidReference(format!("unterminated ipv6 host {:?}", authority))
        })?;
        return match rest {
            "" => Ok((host, None)),
            _ => match rest.strip_prefix(':') {
                Some(port) => Ok((host, Some(port))),
                None => Err(AppError::InvalidReference(format!(
                    "garbage after ipv6 host {:?}",
                    authority
                ))),
            },
        };
    }
    Ok(match authority.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    })
}

fn is_uri_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
