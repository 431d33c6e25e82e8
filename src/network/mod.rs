//! Network Module Implementation
//!
//! Owns the socket side of a client: one `ConnectionSession` per connect attempt.
//!
//! # Architecture
//!
//! The session is built on tokio's readiness API. It waits for write readiness right after
//! the connect completes, then for read readiness, with every wait bounded by the configured
//! poll timeout so the owner can re-check its running flag.
//!
//! # Components
//!
//! - `ConnectionSession`: connect, readiness loop, bounded reads and decoding
//! - `Inbound`: what a read produces, raw bytes or decoded frames
//! - `write_nonblocking`: synchronous best-effort socket write

pub use session::{
    write_nonblocking, ConnectionSession, Inbound, SessionEvent, SessionState,
};

mod session;
