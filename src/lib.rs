pub mod buffer;
pub mod client;
pub mod codec;
pub mod network;
pub mod service;

pub use buffer::ByteBuffer;
pub use client::{ClientHandle, ClientListener, ClientStatus, MiniTcpClient};
pub use codec::{DataType, Frame, FrameDecoder, FrameType, PackageCodec};
pub use network::Inbound;
pub use service::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, ClientConfig,
    ConnectionErrorKind, DecodeMode, EchoServer, EchoServerConfig, StopSignal,
};
