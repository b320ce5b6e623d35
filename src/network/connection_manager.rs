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

//! Client side connection pooling.
//!
//! Every outbound call borrows a connected transport for its target and
//! gives it back when done. Returned connections wait in a per target FIFO
//! idle list; a background sweep closes at most one idle connection per
//! target each interval, and only one that no call used since the previous
//! sweep.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::codeset::CodeSetService;
use crate::ior::{AddressProfile, ConnectionKey};
use crate::service::{ConnectionConfig, Shutdown};
use crate::{AppError, AppResult};

use super::connection::ClientConnection;
use super::request_id::RequestIdGenerator;
use super::transport::TransportFactory;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    pub fn next() -> CallId {
        CallId(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

type Connection<F> = Arc<ClientConnection<<F as TransportFactory>::Transport>>;

struct PoolState<C> {
    idle: HashMap<ConnectionKey, VecDeque<C>>,
    allocated: HashMap<CallId, C>,
}

impl<C> Default for PoolState<C> {
    fn default() -> Self {
        PoolState {
            idle: HashMap::new(),
            allocated: HashMap::new(),
        }
    }
}

pub struct ConnectionManager<F: TransportFactory> {
    factory: F,
    config: ConnectionConfig,
    code_sets: Arc<CodeSetService>,
    fragment_size: usize,
    bidirectional: bool,
    state: Mutex<PoolState<Connection<F>>>,
    stopped: AtomicBool,
    notify_shutdown: broadcast::Sender<()>,
}

impl<F: TransportFactory> ConnectionManager<F> {
    pub fn new(
        factory: F,
        config: ConnectionConfig,
        code_sets: Arc<CodeSetService>,
        fragment_size: usize,
    ) -> ConnectionManager<F> {
        let (notify_shutdown, _) = broadcast::channel(1);
        ConnectionManager {
            factory,
            config,
            code_sets,
            fragment_size,
            bidirectional: false,
            state: Mutex::new(PoolState::default()),
            stopped: AtomicBool::new(false),
            notify_shutdown,
        }
    }

    /// New connections split request ids with the peer, this side taking
    /// the even ones.
    pub fn with_bidirectional(mut self, bidirectional: bool) -> ConnectionManager<F> {
        self.bidirectional = bidirectional;
        self
    }

    /// Hands out a connected transport for `target` and binds it to `call`
    /// until `release_connection_for`.
    pub async fn allocate_connection_for(
        &self,
        call: CallId,
        target: &AddressProfile,
    ) -> AppResult<Connection<F>> {
        let key = self.factory.endpoint_key(target).ok_or_else(|| {
            AppError::Internal(format!(
                "allocation for {} which is not a wire target",
                target.host
            ))
        })?;
        if self.state.lock().allocated.contains_key(&call) {
            return Err(AppError::Internal(format!(
                "{} already holds a connection",
                call
            )));
        }

        let connection = loop {
            let candidate = self
                .state
                .lock()
                .idle
                .get_mut(&key)
                .and_then(|idle| idle.pop_front());
            let Some(connection) = candidate else {
                break self.connect(&key, target).await?;
            };
            if connection.is_connected().await {
                debug!("{} reuses connection {} to {}", call, connection.id(), key);
                break connection;
            }
            debug!("discard stale connection {} to {}", connection.id(), key);
            connection.close().await;
        };
        connection.mark_accessed();
        let bound = match self.state.lock().allocated.entry(call) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(connection.clone());
                true
            }
        };
        if !bound {
            connection.close().await;
            return Err(AppError::Internal(format!(
                "{} already holds a connection",
                call
            )));
        }
        Ok(connection)
    }

    async fn connect(
        &self,
        key: &ConnectionKey,
        target: &AddressProfile,
    ) -> AppResult<Connection<F>> {
        let code_set_component = CodeSetService::find_code_set_component(target)?;
        let code_sets = self.code_sets.negotiate(code_set_component.as_ref())?;
        let request_ids = if self.bidirectional {
            RequestIdGenerator::bidirectional(true)
        } else {
            RequestIdGenerator::sequential()
        };
        let transport = self.factory.create_transport(key)?;
        let connection = Arc::new(ClientConnection::new(
            key.clone(),
            transport,
            request_ids,
            code_sets,
            self.fragment_size,
        ));
        connection.open().await?;
        info!("opened connection {} to {}", connection.id(), key);
        Ok(connection)
    }

    /// Takes back the connection of `call`. It returns to the idle pool if
    /// it is still connected and can issue further request ids, otherwise
    /// it is closed.
    pub async fn release_connection_for(&self, call: CallId) -> AppResult<()> {
        let connection = self.state.lock().allocated.remove(&call).ok_or_else(|| {
            AppError::Internal(format!("{} released without a connection", call))
        })?;
        let reusable = connection.is_connected().await
            && connection.can_generate_next()
            && !self.stopped.load(Ordering::Acquire);
        if reusable {
            trace!("connection {} back to the idle pool", connection.id());
            connection.mark_accessed();
            self.state
                .lock()
                .idle
                .entry(connection.key().clone())
                .or_default()
                .push_back(connection);
        } else {
            debug!("retire connection {} to {}", connection.id(), connection.key());
            connection.close().await;
        }
        Ok(())
    }

    /// Next request id on the connection held by `call`.
    pub fn generate_request_id(&self, call: CallId) -> AppResult<u32> {
        let state = self.state.lock();
        let connection = state.allocated.get(&call).ok_or_else(|| {
            AppError::Internal(format!("{} holds no connection", call))
        })?;
        connection.generate_request_id()
    }

    /// One eviction sweep: per target, closes the first idle connection not
    /// accessed since the previous sweep, then clears the accessed flag of
    /// the remaining ones. Returns the number of closed connections.
    pub async fn evict_idle(&self) -> usize {
        let evicted: Vec<Connection<F>> = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            for idle in state.idle.values_mut() {
                if let Some(position) = idle.iter().position(|c| !c.is_accessed()) {
                    if let Some(connection) = idle.remove(position) {
                        evicted.push(connection);
                    }
                }
                for connection in idle.iter() {
                    connection.take_accessed();
                }
            }
            state.idle.retain(|_, idle| !idle.is_empty());
            evicted
        };
        for connection in &evicted {
            debug!("evict idle connection {} to {}", connection.id(), connection.key());
            connection.close().await;
        }
        evicted.len()
    }

    /// Starts the eviction sweep; runs until `stop`.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        tokio::spawn(async move {
            manager.eviction_task(shutdown).await;
            debug!("connection eviction task finished");
        });
    }

    async fn eviction_task(&self, mut shutdown: Shutdown) {
        let first_sweep = Instant::now() + self.config.sweep_initial_delay();
        let mut interval = tokio::time::interval_at(first_sweep, self.config.sweep_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.evict_idle().await;
                    if evicted > 0 {
                        trace!("eviction sweep closed {} connections", evicted);
                    }
                }
                _ = shutdown.recv() => {
                    trace!("eviction task receiving shutdown signal");
                }
            }
            if shutdown.is_shutdown() {
                break;
            }
        }
    }

    /// Stops the sweep and closes every idle connection. Connections still
    /// held by calls are closed when released.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if self.notify_shutdown.send(()).is_err() {
            trace!("eviction task not running");
        }
        let idle: Vec<Connection<F>> = {
            let mut state = self.state.lock();
            state.idle.drain().flat_map(|(_, idle)| idle).collect()
        };
        for connection in &idle {
            connection.close().await;
        }
        let held = self.state.lock().allocated.len();
        if held > 0 {
            error!("connection manager stopped with {} connections still allocated", held);
        }
        info!("connection manager stopped, closed {} idle connections", idle.len());
    }

    pub fn idle_count(&self, key: &ConnectionKey) -> usize {
        self.state.lock().idle.get(key).map_or(0, |idle| idle.len())
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().allocated.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::codeset::{CodeSetComponentData, UTF8};
    use crate::ior::{AddressResolver, Scheme};
    use crate::network::{ClientTransport, GiopFrame};
    use crate::protocol::Endian;

    #[derive(Debug, Default)]
    struct Probe {
        opened: AtomicUsize,
        closed: AtomicUsize,
        /// set to make every transport report itself dead
        broken: AtomicBool,
    }

    #[derive(Debug)]
    struct MockTransport {
        probe: Arc<Probe>,
        open: bool,
    }

    impl ClientTransport for MockTransport {
        async fn open(&mut self) -> AppResult<()> {
            // lets a concurrent allocation run between lookup and bind
            tokio::task::yield_now().await;
            self.probe.opened.fetch_add(1, Ordering::SeqCst);
            self.open = true;
            Ok(())
        }

        async fn close(&mut self) {
            if self.open {
                self.probe.closed.fetch_add(1, Ordering::SeqCst);
                self.open = false;
            }
        }

        fn is_connected(&self) -> bool {
            self.open && !self.probe.broken.load(Ordering::SeqCst)
        }

        async fn send(&mut self, _message: Bytes) -> AppResult<()> {
            Ok(())
        }

        async fn receive(&mut self) -> AppResult<Option<GiopFrame>> {
            Ok(None)
        }
    }

    #[derive(Debug, Default)]
    struct MockFactory {
        probe: Arc<Probe>,
    }

    impl TransportFactory for MockFactory {
        type Transport = MockTransport;

        fn endpoint_key(&self, target: &AddressProfile) -> Option<ConnectionKey> {
            match target.scheme {
                Scheme::Iiop => target.connection_key().ok(),
                Scheme::IiopSsl => None,
            }
        }

        fn create_transport(&self, _key: &ConnectionKey) -> AppResult<MockTransport> {
            Ok(MockTransport {
                probe: self.probe.clone(),
                open: false,
            })
        }
    }

    fn manager() -> (Arc<ConnectionManager<MockFactory>>, Arc<Probe>) {
        let factory = MockFactory::default();
        let probe = factory.probe.clone();
        let manager = ConnectionManager::new(
            factory,
            ConnectionConfig::default(),
            Arc::new(CodeSetService::default()),
            64 * 1024,
        );
        (Arc::new(manager), probe)
    }

    fn target(port: u16) -> AddressProfile {
        AddressResolver::default()
            .resolve(&format!("iiop://localhost:{}/test", port))
            .unwrap()
    }

    #[tokio::test]
    async fn test_allocate_release_allocate_reuses() {
        let (manager, probe) = manager();
        let target = target(1);
        let call = CallId::next();
        let first = manager.allocate_connection_for(call, &target).await.unwrap();
        assert!(first.is_connected().await);
        assert_eq!(manager.allocated_count(), 1);
        manager.release_connection_for(call).await.unwrap();
        assert_eq!(manager.idle_count(first.key()), 1);

        let call = CallId::next();
        let second = manager.allocate_connection_for(call, &target).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(probe.opened.load(Ordering::SeqCst), 1);
        manager.release_connection_for(call).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_distinct_connections() {
        let (manager, probe) = manager();
        let target = target(1);
        let (a, b) = (CallId::next(), CallId::next());
        let first = manager.allocate_connection_for(a, &target).await.unwrap();
        let second = manager.allocate_connection_for(b, &target).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(probe.opened.load(Ordering::SeqCst), 2);
        manager.release_connection_for(a).await.unwrap();
        manager.release_connection_for(b).await.unwrap();
        assert_eq!(manager.idle_count(first.key()), 2);
    }

    #[tokio::test]
    async fn test_same_call_allocated_twice_concurrently() {
        let (manager, probe) = manager();
        let target = target(1);
        let call = CallId::next();
        let (first, second) = tokio::join!(
            manager.allocate_connection_for(call, &target),
            manager.allocate_connection_for(call, &target)
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(AppError::Internal(_))));
        assert_eq!(manager.allocated_count(), 1);
        assert_eq!(probe.opened.load(Ordering::SeqCst), 2);
        // the losing connection is closed, not leaked
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        manager.release_connection_for(call).await.unwrap();
        assert_eq!(manager.idle_count(first.unwrap().key()), 1);
    }

    #[tokio::test]
    async fn test_different_targets_do_not_share() {
        let (manager, _) = manager();
        let call = CallId::next();
        let first = manager.allocate_connection_for(call, &target(1)).await.unwrap();
        manager.release_connection_for(call).await.unwrap();
        let call = CallId::next();
        let second = manager.allocate_connection_for(call, &target(2)).await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_stale_connection_discarded() {
        let (manager, probe) = manager();
        let target = target(1);
        let call = CallId::next();
        let first = manager.allocate_connection_for(call, &target).await.unwrap();
        manager.release_connection_for(call).await.unwrap();

        probe.broken.store(true, Ordering::SeqCst);
        let call = CallId::next();
        // the replacement is broken as well, but it was freshly opened
        let second = manager.allocate_connection_for(call, &target).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);

        // dead connections are not pooled again
        manager.release_connection_for(call).await.unwrap();
        assert_eq!(manager.idle_count(second.key()), 0);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_connection_not_reused() {
        let (manager, probe) = manager();
        let call = CallId::next();
        let connection = manager.allocate_connection_for(call, &target(1)).await.unwrap();
        *connection.request_ids_for_test() = RequestIdGenerator::starting_at(u32::MAX, 1);
        assert_eq!(manager.generate_request_id(call).unwrap(), u32::MAX);
        assert!(matches!(
            manager.generate_request_id(call),
            Err(AppError::RequestIdsExhausted(_))
        ));
        manager.release_connection_for(call).await.unwrap();
        assert_eq!(manager.idle_count(connection.key()), 0);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_ids_increase_per_connection() {
        let (manager, _) = manager();
        let call = CallId::next();
        manager.allocate_connection_for(call, &target(1)).await.unwrap();
        assert_eq!(manager.generate_request_id(call).unwrap(), 0);
        assert_eq!(manager.generate_request_id(call).unwrap(), 1);
        manager.release_connection_for(call).await.unwrap();

        let call = CallId::next();
        manager.allocate_connection_for(call, &target(1)).await.unwrap();
        assert_eq!(manager.generate_request_id(call).unwrap(), 2);
        manager.release_connection_for(call).await.unwrap();
    }

    #[tokio::test]
    async fn test_bidirectional_ids_are_even() {
        let (manager, _) = manager();
        let manager = Arc::into_inner(manager).unwrap().with_bidirectional(true);
        let call = CallId::next();
        manager.allocate_connection_for(call, &target(1)).await.unwrap();
        assert_eq!(manager.generate_request_id(call).unwrap(), 0);
        assert_eq!(manager.generate_request_id(call).unwrap(), 2);
        manager.release_connection_for(call).await.unwrap();
    }

    #[tokio::test]
    async fn test_contract_violations() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.release_connection_for(CallId::next()).await,
            Err(AppError::Internal(_))
        ));
        assert!(matches!(
            manager.generate_request_id(CallId::next()),
            Err(AppError::Internal(_))
        ));
        let secured = AddressResolver::default()
            .resolve("iiop-ssl://localhost:1/test")
            .unwrap();
        assert!(matches!(
            manager.allocate_connection_for(CallId::next(), &secured).await,
            Err(AppError::Internal(_))
        ));

        let call = CallId::next();
        manager.allocate_connection_for(call, &target(1)).await.unwrap();
        assert!(matches!(
            manager.allocate_connection_for(call, &target(1)).await,
            Err(AppError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_incompatible_code_sets_fail_allocation() {
        let (manager, probe) = manager();
        let mut target = target(1);
        let component = CodeSetComponentData {
            native_char_set: 0x0001_0002,
            char_conversion_sets: vec![],
            native_wchar_set: 0x0001_0109,
            wchar_conversion_sets: vec![],
        };
        target.add_component(component.to_component(Endian::Big).unwrap());
        let err = manager
            .allocate_connection_for(CallId::next(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IncompatibleCodeSet(_)));
        assert_eq!(probe.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_negotiated_code_sets_on_connection() {
        let (manager, _) = manager();
        let mut target = target(1);
        let component = CodeSetComponentData {
            native_char_set: UTF8,
            char_conversion_sets: vec![],
            native_wchar_set: 0x0001_0109,
            wchar_conversion_sets: vec![],
        };
        target.add_component(component.to_component(Endian::Big).unwrap());
        let call = CallId::next();
        let connection = manager.allocate_connection_for(call, &target).await.unwrap();
        assert_eq!(connection.code_sets().char_set, UTF8);
        manager.release_connection_for(call).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_gives_second_chance() {
        let (manager, probe) = manager();
        let target = target(1);
        let call = CallId::next();
        let connection = manager.allocate_connection_for(call, &target).await.unwrap();
        manager.release_connection_for(call).await.unwrap();

        // used since the last sweep: survives, flag cleared
        assert_eq!(manager.evict_idle().await, 0);
        assert_eq!(manager.idle_count(connection.key()), 1);
        // untouched for a whole cycle: closed
        assert_eq!(manager.evict_idle().await, 1);
        assert_eq!(manager.idle_count(connection.key()), 0);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_closes_one_per_target() {
        let (manager, _) = manager();
        let target = target(1);
        let calls: Vec<CallId> = (0..3).map(|_| CallId::next()).collect();
        for call in &calls {
            manager.allocate_connection_for(*call, &target).await.unwrap();
        }
        for call in &calls {
            manager.release_connection_for(*call).await.unwrap();
        }
        let key = target.connection_key().unwrap();
        manager.evict_idle().await;
        assert_eq!(manager.idle_count(&key), 3);
        assert_eq!(manager.evict_idle().await, 1);
        assert_eq!(manager.idle_count(&key), 2);
        assert_eq!(manager.evict_idle().await, 1);
        assert_eq!(manager.idle_count(&key), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_timer() {
        let (manager, probe) = manager();
        manager.start();
        let target = target(1);
        let call = CallId::next();
        let connection = manager.allocate_connection_for(call, &target).await.unwrap();
        manager.release_connection_for(call).await.unwrap();

        // first sweep after 10 s only clears the accessed flag
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(manager.idle_count(connection.key()), 1);
        assert!(!connection.is_accessed());
        // next sweep 5 s later closes it
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.idle_count(connection.key()), 0);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_idle_and_later_releases() {
        let (manager, probe) = manager();
        manager.start();
        let target = target(1);
        let (a, b) = (CallId::next(), CallId::next());
        manager.allocate_connection_for(a, &target).await.unwrap();
        manager.allocate_connection_for(b, &target).await.unwrap();
        manager.release_connection_for(a).await.unwrap();

        manager.stop().await;
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        manager.release_connection_for(b).await.unwrap();
        assert_eq!(probe.closed.load(Ordering::SeqCst), 2);
        assert_eq!(manager.allocated_count(), 0);
    }
}
