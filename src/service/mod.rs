pub use app_error::{AppError, AppResult, ErrorKind};
pub use config::{CodeSetConfig, ConnectionConfig, GeneralConfig, TransportConfig};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod shutdown;
mod tracing_config;
