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

use crate::protocol::{CdrInputStream, CdrOutputStream};
use crate::AppResult;

/// One entry of the service context list carried by requests and replies.
/// `context_data` is an encapsulation owned by whoever defines the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub context_id: u32,
    pub context_data: Bytes,
}

impl ServiceContext {
    pub fn new(context_id: u32, context_data: Bytes) -> ServiceContext {
        ServiceContext {
            context_id,
            context_data,
        }
    }

    pub fn write_list(out: &mut CdrOutputStream, contexts: &[ServiceContext]) -> AppResult<()> {
        out.write_ulong(contexts.len() as u32);
        for context in contexts {
            out.write_ulong(context.context_id);
            out.write_octet_sequence(&context.context_data)?;
        }
        Ok(())
    }

    pub fn read_list(input: &mut CdrInputStream) -> AppResult<Vec<ServiceContext>> {
        let count = input.read_ulong()? as usize;
        // each entry needs at least 8 bytes, do not trust the count blindly
        let mut contexts = Vec::with_capacity(count.min(input.remaining() / 8));
        for _ in 0..count {
            let context_id = input.read_ulong()?;
            let context_data = input.read_octet_sequence()?;
            contexts.push(ServiceContext::new(context_id, context_data));
        }
        Ok(contexts)
    }
}
