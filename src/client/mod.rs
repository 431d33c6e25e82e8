//! Client Controller
//!
//! Lifecycle of a reconnecting TCP client built on the frame codec.
//!
//! # States
//!
//! ```text
//! Wait ──connect──> Connected
//!   │                  │ lost (auto-reconnect)
//!   └─fail──> Reconnecting <──┘
//!                 │  connect
//!                 v
//!            Reconnected ──lost──> Reconnecting ...
//! any ──stop_connect / lost without auto-reconnect──> Stop
//! ```
//!
//! With auto-reconnect on, a heartbeat task sends a short frame every heartbeat interval
//! while bytes keep arriving, and cancels the session once nothing has arrived for longer
//! than the reconnect timeout.

pub use controller::{ClientHandle, ClientStatus, MiniTcpClient};
pub use heartbeat::{heartbeat_check, HeartbeatAction};
pub use listener::ClientListener;

mod controller;
mod heartbeat;
mod listener;
