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

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::ior::{AddressProfile, ConnectionKey, Scheme};
use crate::service::TransportConfig;
use crate::{AppError, AppResult};

use super::frame::{GiopCodec, GiopFrame};

/// A client side byte stream to one target, carrying whole GIOP messages.
pub trait ClientTransport: Send + 'static {
    /// Connects. Opening an open transport does nothing.
    fn open(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Liveness as far as the transport knows; a transport that saw an I/O
    /// failure reports itself disconnected.
    fn is_connected(&self) -> bool;

    fn send(&mut self, message: Bytes) -> impl Future<Output = AppResult<()>> + Send;

    /// Next frame, `None` once the peer closed the stream cleanly.
    fn receive(&mut self) -> impl Future<Output = AppResult<Option<GiopFrame>>> + Send;
}

/// Creates transports for the targets it can serve.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: ClientTransport;

    /// Pool identity of `target`, `None` if this factory cannot reach it.
    fn endpoint_key(&self, target: &AddressProfile) -> Option<ConnectionKey>;

    /// A new, not yet opened transport.
    fn create_transport(&self, key: &ConnectionKey) -> AppResult<Self::Transport>;
}

#[derive(Debug)]
pub struct TcpTransport {
    key: ConnectionKey,
    connect_timeout: Duration,
    max_message_size: usize,
    framed: Option<Framed<TcpStream, GiopCodec>>,
}

impl TcpTransport {
    pub fn new(
        key: ConnectionKey,
        connect_timeout: Duration,
        max_message_size: usize,
    ) -> TcpTransport {
        TcpTransport {
            key,
            connect_timeout,
            max_message_size,
            framed: None,
        }
    }

    fn framed(&mut self) -> AppResult<&mut Framed<TcpStream, GiopCodec>> {
        let key = &self.key;
        self.framed
            .as_mut()
            .ok_or_else(|| AppError::TransportFailure(format!("transport to {} is not open", key)))
    }
}

impl ClientTransport for TcpTransport {
    async fn open(&mut self) -> AppResult<()> {
        if self.framed.is_some() {
            return Ok(());
        }
        let connect = TcpStream::connect((self.key.host.as_str(), self.key.port));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                AppError::TransportFailure(format!(
                    "connect to {} timed out after {:?}",
                    self.key, self.connect_timeout
                ))
            })?
            .map_err(|e| AppError::TransportFailure(format!("connect to {}: {}", self.key, e)))?;
        stream.set_nodelay(true)?;
        debug!(
            "tcp transport to {} connected from {:?}",
            self.key,
            stream.local_addr().ok()
        );
        self.framed = Some(Framed::new(stream, GiopCodec::new(self.max_message_size)));
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            if let Err(e) = framed.get_mut().shutdown().await {
                trace!("shutdown of transport to {}: {}", self.key, e);
            }
            debug!("tcp transport to {} closed", self.key);
        }
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn send(&mut self, message: Bytes) -> AppResult<()> {
        let result = self.framed()?.send(message).await;
        if let Err(e) = &result {
            warn!("send to {} failed: {}", self.key, e);
            self.framed = None;
        }
        result
    }

    async fn receive(&mut self) -> AppResult<Option<GiopFrame>> {
        let next = self.framed()?.next().await;
        match next {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => {
                warn!("receive from {} failed: {}", self.key, e);
                self.framed = None;
                Err(e)
            }
            None => {
                debug!("peer {} closed the connection", self.key);
                self.framed = None;
                Ok(None)
            }
        }
    }
}

/// Plain IIOP over TCP. Secured targets need a TLS capable factory.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    connect_timeout: Duration,
    max_message_size: usize,
}

impl TcpTransportFactory {
    pub fn new(connect_timeout: Duration, max_message_size: usize) -> TcpTransportFactory {
        TcpTransportFactory {
            connect_timeout,
            max_message_size,
        }
    }

    pub fn from_config(config: &TransportConfig) -> TcpTransportFactory {
        TcpTransportFactory::new(
            config.connection.connect_timeout(),
            config.general.max_message_size,
        )
    }
}

impl TransportFactory for TcpTransportFactory {
    type Transport = TcpTransport;

    fn endpoint_key(&self, target: &AddressProfile) -> Option<ConnectionKey> {
        match target.scheme {
            Scheme::Iiop => target.connection_key().ok(),
            Scheme::IiopSsl => None,
        }
    }

    fn create_transport(&self, key: &ConnectionKey) -> AppResult<TcpTransport> {
        Ok(TcpTransport::new(
            key.clone(),
            self.connect_timeout,
            self.max_message_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::ior::AddressResolver;
    use crate::message::{GiopHeader, GiopMessageType, GiopVersion};
    use crate::protocol::Endian;

    fn message(body: &[u8]) -> Bytes {
        let mut out = GiopHeader::new(
            GiopVersion::V1_2,
            Endian::Big,
            GiopMessageType::Request,
            body.len() as u32,
        )
        .to_bytes()
        .to_vec();
        out.extend_from_slice(body);
        Bytes::from(out)
    }

    #[tokio::test]
    async fn test_echo_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 15];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let factory = TcpTransportFactory::new(Duration::from_secs(5), 1024);
        let target = AddressResolver::default()
            .resolve(&format!("iiop://127.0.0.1:{}/k", port))
            .unwrap();
        let key = factory.endpoint_key(&target).unwrap();
        let mut transport = factory.create_transport(&key).unwrap();
        assert!(!transport.is_connected());
        transport.open().await.unwrap();
        assert!(transport.is_connected());

        let sent = message(b"abc");
        transport.send(sent.clone()).await.unwrap();
        let frame = transport.receive().await.unwrap().unwrap();
        assert_eq!(frame.to_bytes(), sent);
        // the echo side hung up
        assert!(transport.receive().await.unwrap().is_none());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let key = ConnectionKey {
            scheme: Scheme::Iiop,
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut transport = TcpTransport::new(key, Duration::from_secs(5), 1024);
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, AppError::TransportFailure(_)));
    }

    #[test]
    fn test_secured_targets_unsupported() {
        let factory = TcpTransportFactory::new(Duration::from_secs(1), 1024);
        let target = AddressResolver::default()
            .resolve("iiop-ssl://h:1/k")
            .unwrap();
        assert!(factory.endpoint_key(&target).is_none());
    }

    #[tokio::test]
    async fn test_send_when_closed() {
        let key = ConnectionKey {
            scheme: Scheme::Iiop,
            host: "127.0.0.1".to_string(),
            port: 1,
        };
        let mut transport = TcpTransport::new(key, Duration::from_secs(1), 1024);
        assert!(transport.send(message(b"x")).await.is_err());
    }
}
