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

//! Code set negotiation
//!
//! Picks the char and wchar encodings for a connection from the code set
//! component a server advertises, and builds the component and the service
//! context this side sends.

pub use conversion::{CharEncoding, WideCharEncoding};
pub use service::{CodeSetComponentData, CodeSetService, CODE_SET_SERVICE_ID};

mod conversion;
mod service;

/// ISO 8859-1
pub const ISO8859_1: u32 = 0x0001_0001;
/// UTF-8
pub const UTF8: u32 = 0x0501_0001;
/// ISO 646 single byte, ascii compatible
pub const ISO646_ASCII: u32 = 0x0001_0020;
/// UTF-16
pub const UTF16: u32 = 0x0001_0109;
/// ISO 646 multi byte, fixed two byte characters
pub const UCS2: u32 = 0x0001_0100;

/// char sets this crate reads and writes, in advertisement order
pub const SUPPORTED_CHAR_SETS: [u32; 3] = [ISO8859_1, UTF8, ISO646_ASCII];
pub const SUPPORTED_WCHAR_SETS: [u32; 2] = [UTF16, UCS2];

/// The char set and wchar set in effect for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NegotiatedCodeSets {
    pub char_set: u32,
    pub wchar_set: u32,
}

impl NegotiatedCodeSets {
    pub const fn new(char_set: u32, wchar_set: u32) -> NegotiatedCodeSets {
        NegotiatedCodeSets {
            char_set,
            wchar_set,
        }
    }
}

impl Default for NegotiatedCodeSets {
    fn default() -> Self {
        NegotiatedCodeSets::new(ISO8859_1, UTF16)
    }
}
