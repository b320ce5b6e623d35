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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codeset::{CodeSetService, ISO8859_1, UTF16};
use crate::message::GiopVersion;

use super::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    /// protocol version used by locators without an explicit version suffix
    pub default_giop_version: String,
    /// largest message accepted from the wire, header included
    pub max_message_size: usize,
    /// body size above which outbound messages are split into fragments
    pub fragment_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            default_giop_version: "1.2".to_string(),
            max_message_size: 16 * 1024 * 1024,
            fragment_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CodeSetConfig {
    pub native_char_set: u32,
    pub native_wchar_set: u32,
}

impl Default for CodeSetConfig {
    fn default() -> Self {
        CodeSetConfig {
            native_char_set: ISO8859_1,
            native_wchar_set: UTF16,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    /// delay before the first idle sweep
    pub sweep_initial_delay_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout_ms: 5_000,
            sweep_initial_delay_ms: 10_000,
            sweep_interval_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn sweep_initial_delay(&self) -> Duration {
        Duration::from_millis(self.sweep_initial_delay_ms)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub general: GeneralConfig,
    pub code_set: CodeSetConfig,
    pub connection: ConnectionConfig,
}

impl TransportConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<TransportConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let transport_config: TransportConfig = config.try_deserialize()?;
        transport_config.validate()?;
        Ok(transport_config)
    }

    /// Rejects values the transport cannot run with, so they fail at load
    /// time rather than at first resolve or inside the sweep task.
    pub fn validate(&self) -> AppResult<()> {
        self.default_giop_version()?;
        if !CodeSetService::is_char_set_supported(self.code_set.native_char_set) {
            return Err(AppError::BadParam(format!(
                "unsupported native char set {:#010x}",
                self.code_set.native_char_set
            )));
        }
        if !CodeSetService::is_wchar_set_supported(self.code_set.native_wchar_set) {
            return Err(AppError::BadParam(format!(
                "unsupported native wchar set {:#010x}",
                self.code_set.native_wchar_set
            )));
        }
        let non_zero = [
            ("general.max_message_size", self.general.max_message_size as u64),
            ("general.fragment_size", self.general.fragment_size as u64),
            ("connection.connect_timeout_ms", self.connection.connect_timeout_ms),
            ("connection.sweep_interval_ms", self.connection.sweep_interval_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::InvalidValue(format!("{} must be greater than 0", name)));
        }
        Ok(())
    }

    pub fn default_giop_version(&self) -> AppResult<GiopVersion> {
        self.general.default_giop_version.parse()
    }
}
