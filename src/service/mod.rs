pub use app_error::{AppError, AppResult, ConnectionErrorKind};
pub use config::{AppConfig, ClientConfig, DecodeMode, EchoServerConfig};
pub use server::EchoServer;
pub use stop_signal::StopSignal;
pub use tracing_config::{setup_local_tracing, setup_tracing, verbosity_level, LogGuard};

mod app_error;
mod config;
mod server;
mod stop_signal;
mod tracing_config;
