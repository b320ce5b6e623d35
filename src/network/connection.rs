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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::codeset::NegotiatedCodeSets;
use crate::ior::ConnectionKey;
use crate::message::{split_into_fragments, AssembledMessage, FragmentAssembler};
use crate::{AppError, AppResult};

use super::request_id::RequestIdGenerator;
use super::transport::ClientTransport;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// A pooled client connection.
///
/// The transport sits behind an async lock: only the call currently
/// holding the connection uses it, the pool merely checks liveness and
/// closes it. Request ids and the fragment table live with the connection
/// since both are scoped to one byte stream.
#[derive(Debug)]
pub struct ClientConnection<T> {
    id: u64,
    key: ConnectionKey,
    code_sets: NegotiatedCodeSets,
    fragment_size: usize,
    transport: tokio::sync::Mutex<T>,
    request_ids: Mutex<RequestIdGenerator>,
    assembler: FragmentAssembler,
    accessed: AtomicBool,
}

impl<T: ClientTransport> ClientConnection<T> {
    pub fn new(
        key: ConnectionKey,
        transport: T,
        request_ids: RequestIdGenerator,
        code_sets: NegotiatedCodeSets,
        fragment_size: usize,
    ) -> ClientConnection<T> {
        ClientConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            key,
            code_sets,
            fragment_size,
            transport: tokio::sync::Mutex::new(transport),
            request_ids: Mutex::new(request_ids),
            assembler: FragmentAssembler::new(),
            accessed: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// sets every message on this connection is encoded with
    pub fn code_sets(&self) -> NegotiatedCodeSets {
        self.code_sets
    }

    pub async fn open(&self) -> AppResult<()> {
        self.transport.lock().await.open().await
    }

    pub async fn close(&self) {
        self.transport.lock().await.close().await
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    pub fn generate_request_id(&self) -> AppResult<u32> {
        self.request_ids
            .lock()
            .generate()
            .ok_or(AppError::RequestIdsExhausted(self.id))
    }

    pub fn can_generate_next(&self) -> bool {
        self.request_ids.lock().can_generate_next()
    }

    /// Sends one complete message, fragmented when its body exceeds the
    /// configured fragment size.
    pub async fn send_message(&self, message: Bytes) -> AppResult<()> {
        let fragments = split_into_fragments(&message, self.fragment_size)?;
        let mut transport = self.transport.lock().await;
        for fragment in fragments {
            transport.send(fragment).await?;
        }
        Ok(())
    }

    /// Next complete message, fragments reassembled. `None` once the peer
    /// closed the connection.
    pub async fn receive_message(&self) -> AppResult<Option<AssembledMessage>> {
        let mut transport = self.transport.lock().await;
        loop {
            let Some(frame) = transport.receive().await? else {
                return Ok(None);
            };
            trace!(
                "connection {} received {:?} of {} bytes",
                self.id,
                frame.header.message_type,
                frame.body.len()
            );
            if let Some(message) = self.assembler.accept(&frame.header, frame.body)? {
                return Ok(Some(message));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn request_ids_for_test(&self) -> parking_lot::MutexGuard<'_, RequestIdGenerator> {
        self.request_ids.lock()
    }

    pub(crate) fn mark_accessed(&self) {
        self.accessed.store(true, Ordering::Release);
    }

    /// Clears the accessed flag, returning its previous value.
    pub(crate) fn take_accessed(&self) -> bool {
        self.accessed.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_accessed(&self) -> bool {
        self.accessed.load(Ordering::Acquire)
    }
}
