//! Network Module Implementation
//!
//! Client side IIOP networking on top of tokio.
//!
//! # Components
//!
//! - `GiopFrame` / `GiopCodec`: split a byte stream into GIOP messages
//! - `ClientTransport` / `TransportFactory`: the transport abstraction, with
//!   `TcpTransport` as the plain IIOP implementation
//! - `ClientConnection`: one pooled transport with its request id counter
//!   and fragment table
//! - `ConnectionManager`: allocates connections to calls, pools them when
//!   released and sweeps idle ones

pub use connection::ClientConnection;
pub use connection_manager::{CallId, ConnectionManager};
pub use frame::{GiopCodec, GiopFrame};
pub use request_id::RequestIdGenerator;
pub use transport::{ClientTransport, TcpTransport, TcpTransportFactory, TransportFactory};

mod connection;
mod connection_manager;
mod frame;
mod request_id;
mod transport;
