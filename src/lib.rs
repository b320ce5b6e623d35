pub mod codeset;
pub mod ior;
pub mod message;
pub mod network;
pub mod protocol;
pub mod service;

pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, ErrorKind, Shutdown, TransportConfig,
};
