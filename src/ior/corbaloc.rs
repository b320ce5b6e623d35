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

//! `corbaloc:` locators:
//!
//! ```text
//! corbaloc:[iiop:|iiop-ssl:|:][M.m@]host[:port][,...]/key
//! ```
//!
//! Unlike the `iiop://` form, a corbaloc address defaults to GIOP 1.0.

use crate::message::GiopVersion;
use crate::{AppError, AppResult};

use super::iiop_loc::{build_profile, split_host_port, DEFAULT_PORT};
use super::object_key::{escape_non_ascii, key_bytes_for_id};
use super::profile::{AddressProfile, Scheme};

const PREFIX: &str = "corbaloc:";

/// One profile per listed address, all sharing the same object key.
pub fn parse(locator: &str) -> AppResult<Vec<AddressProfile>> {
    let body = locator
        .strip_prefix(PREFIX)
        .ok_or_else(|| AppError::BadParam(format!("{:?} is not a corbaloc", locator)))?;
    let (addresses, key) = match body.split_once('/') {
        Some((addresses, key)) => (addresses, Some(key)),
        None => (body, None),
    };
    let Some(key) = key else {
        return Err(AppError::BadParam(format!(
            "corbaloc {:?} without object key",
            locator
        )));
    };
    let object_key = key_bytes_for_id(&escape_non_ascii(key))?;

    addresses
        .split(',')
        .map(|address| {
            let (scheme, version, host, port) = parse_address(address)?;
            build_profile(scheme, version, host, port, object_key.clone())
        })
        .collect()
}

fn parse_address(address: &str) -> AppResult<(Scheme, GiopVersion, &str, u16)> {
    let (scheme, specific) = if let Some(rest) = address.strip_prefix("iiop-ssl:") {
        (Scheme::IiopSsl, rest)
    } else if let Some(rest) = address.strip_prefix("iiop:") {
        (Scheme::Iiop, rest)
    } else if let Some(rest) = address.strip_prefix(':') {
        (Scheme::Iiop, rest)
    } else {
        return Err(AppError::BadParam(format!(
            "unsupported corbaloc address {:?}",
            address
        )));
    };

    let (version, host_port) = match specific.split_once('@') {
        Some((version, host_port)) => (version.parse::<GiopVersion>()?, host_port),
        None => (GiopVersion::V1_0, specific),
    };
    let (host, port) = split_host_port(host_port)?;
    let port = match port {
        Some(port_text) => port_text.parse::<u16>().map_err(|_| {
            AppError::BadParam(format!("bad port {:?} in {:?}", port_text, address))
        })?,
        None => DEFAULT_PORT,
    };
    let host = match host.trim() {
        "" => "localhost",
        host => host,
    };
    Ok((scheme, version, host, port))
}
