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

/// Per connection request id counter.
///
/// Ids are never reused on a connection: once the id space is used up the
/// generator refuses to hand out more and the connection has to be retired.
/// On a bidirectional connection both ends issue ids, the originator the
/// even and the acceptor the odd ones.
#[derive(Debug, Clone)]
pub struct RequestIdGenerator {
    next: Option<u32>,
    step: u32,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        RequestIdGenerator::sequential()
    }
}

impl RequestIdGenerator {
    pub fn sequential() -> RequestIdGenerator {
        RequestIdGenerator {
            next: Some(0),
            step: 1,
        }
    }

    pub fn bidirectional(originator: bool) -> RequestIdGenerator {
        RequestIdGenerator {
            next: Some(if originator { 0 } else { 1 }),
            step: 2,
        }
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u32, step: u32) -> RequestIdGenerator {
        RequestIdGenerator {
            next: Some(next),
            step,
        }
    }

    /// `None` once the id space is exhausted.
    pub fn generate(&mut self) -> Option<u32> {
        let id = self.next?;
        self.next = id.checked_add(self.step);
        Some(id)
    }

    pub fn can_generate_next(&self) -> bool {
        self.next.is_some()
    }
}
