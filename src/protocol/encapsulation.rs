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

//! CDR encapsulations: an octet sequence whose first octet carries the byte
//! order of the rest. Alignment restarts at that first octet, and the
//! contents always follow GIOP 1.2 rules.

use bytes::Bytes;

use crate::message::GiopVersion;
use crate::{AppError, AppResult};

use super::{CdrInputStream, CdrOutputStream, Endian};

impl CdrOutputStream {
    /// A stream for encapsulation contents, the flags octet already written.
    pub fn new_encapsulation(endian: Endian) -> CdrOutputStream {
        let mut stream = CdrOutputStream::new(endian, GiopVersion::V1_2);
        stream.write_octet(endian.flag_bit());
        stream
    }

    pub fn write_encapsulation(&mut self, encapsulation: &CdrOutputStream) -> AppResult<()> {
        self.write_octet_sequence(encapsulation.as_bytes())
    }
}

impl CdrInputStream {
    /// Opens encapsulation contents, `data` starts with the flags octet.
    pub fn open_encapsulation(data: Bytes) -> AppResult<CdrInputStream> {
        if data.is_empty() {
            return Err(AppError::MalformedProtocol(
                "empty encapsulation".to_string(),
            ));
        }
        let length = data.len();
        let mut stream = CdrInputStream::new(data);
        let flags = stream.read_octet()?;
        stream.configure(Endian::from_flags(flags), GiopVersion::V1_2)?;
        stream.set_max_length(length - 1);
        Ok(stream)
    }

    pub fn read_encapsulation(&mut self) -> AppResult<CdrInputStream> {
        let data = self.read_octet_sequence()?;
        CdrInputStream::open_encapsulation(data)
    }
}

/// Runs `write` against a fresh encapsulation and returns the raw bytes,
/// ready to be embedded as a `sequence<octet>`.
pub fn encode_encapsulation<F>(endian: Endian, write: F) -> AppResult<Bytes>
where
    F: FnOnce(&mut CdrOutputStream) -> AppResult<()>,
{
    let mut stream = CdrOutputStream::new_encapsulation(endian);
    write(&mut stream)?;
    Ok(stream.freeze())
}
