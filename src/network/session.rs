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

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::Interest;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time;
use tracing::{debug, trace, warn};

use crate::codec::{Frame, FrameDecoder};
use crate::service::{ClientConfig, DecodeMode};
use crate::{AppError, AppResult, ConnectionErrorKind};

/// One inbound message, shaped by the configured [`DecodeMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Raw(Bytes),
    Frame(Frame),
}

impl Inbound {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Inbound::Frame(frame) if frame.is_heartbeat())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    /// connected at the TCP level, waiting for the first write readiness
    WritableWait,
    Connected,
    Closed,
}

#[derive(Debug)]
pub enum SessionEvent {
    /// the poll timeout elapsed without readiness
    Idle,
    /// first write readiness after connect; the session now reads
    Writable,
    Received(Vec<Inbound>),
    /// the peer closed the stream
    Closed,
}

/// A single connection attempt and the socket it produced.
///
/// A session starts in `Connecting` and gets its socket from [`ConnectionSession::connect`].
/// It is then driven by [`ConnectionSession::poll_event`], which waits for the readiness the
/// current state is interested in, for at most the configured poll timeout. A decoder is
/// created with the session and dropped with it, so no partial frame outlives a connection.
#[derive(Debug)]
pub struct ConnectionSession {
    address: String,
    stream: Option<Arc<TcpStream>>,
    peer: Option<SocketAddr>,
    state: SessionState,
    decoder: Option<FrameDecoder>,
    read_buffer_size: usize,
    connect_timeout: Duration,
    poll_timeout: Duration,
}

impl ConnectionSession {
    pub fn new(config: &ClientConfig) -> ConnectionSession {
        let decoder = match config.decode_mode {
            DecodeMode::Frame => Some(FrameDecoder::new()),
            DecodeMode::Raw => None,
        };
        ConnectionSession {
            address: config.address(),
            stream: None,
            peer: None,
            state: SessionState::Connecting,
            decoder,
            read_buffer_size: config.receive_buffer_size,
            connect_timeout: config.connect_timeout(),
            poll_timeout: config.poll_timeout(),
        }
    }

    /// Resolves the address and connects to the first result: `Connecting` to `WritableWait`.
    ///
    /// Returns the socket handle to share with writers. A failed attempt closes the session.
    pub async fn connect(&mut self) -> AppResult<Arc<TcpStream>> {
        if self.state != SessionState::Connecting {
            return Err(AppError::IllegalStateError(
                format!("connect in state {:?}", self.state).into(),
            ));
        }
        match self.open_stream().await {
            Ok((stream, peer)) => {
                debug!("session connected to {}, waiting for writable", peer);
                let stream = Arc::new(stream);
                self.stream = Some(stream.clone());
                self.peer = Some(peer);
                self.state = SessionState::WritableWait;
                Ok(stream)
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn open_stream(&self) -> AppResult<(TcpStream, SocketAddr)> {
        debug!("session connecting to {}", self.address);
        let peer = lookup_host(&self.address)
            .await
            .map_err(AppError::connection)?
            .next()
            .ok_or_else(|| {
                AppError::connection_with(
                    ConnectionErrorKind::NoPendingConnection,
                    "host resolved to no address",
                )
            })?;

        let socket = if peer.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(AppError::connection)?;
        if let Err(e) = socket.set_recv_buffer_size(self.read_buffer_size as u32) {
            warn!("failed to set receive buffer size: {}", e);
        }

        match time::timeout(self.connect_timeout, socket.connect(peer)).await {
            Ok(Ok(stream)) => Ok((stream, peer)),
            Ok(Err(e)) => Err(AppError::connection(e)),
            Err(_) => Err(AppError::connection_with(
                ConnectionErrorKind::NoPendingConnection,
                "connect timed out",
            )),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Remote address, once connected.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Socket handle shared with writers, once connected.
    pub fn stream(&self) -> Option<Arc<TcpStream>> {
        self.stream.clone()
    }

    /// Waits for the next readiness event of the current state and handles it.
    ///
    /// Any I/O error closes the session and is returned classified.
    pub async fn poll_event(&mut self) -> AppResult<SessionEvent> {
        let interest = match self.state {
            SessionState::Connecting => {
                return Err(AppError::connection_with(
                    ConnectionErrorKind::NotYetConnected,
                    "poll before the session connected",
                ))
            }
            SessionState::WritableWait => Interest::WRITABLE,
            SessionState::Connected => Interest::READABLE,
            SessionState::Closed => return Ok(SessionEvent::Closed),
        };
        let stream = match self.stream.as_ref() {
            Some(stream) => stream.clone(),
            None => return Ok(SessionEvent::Closed),
        };

        let ready = match time::timeout(self.poll_timeout, stream.ready(interest)).await {
            Err(_) => return Ok(SessionEvent::Idle),
            Ok(Err(e)) => return Err(self.fail(e)),
            Ok(Ok(ready)) => ready,
        };

        if interest == Interest::WRITABLE {
            if ready.is_writable() {
                self.state = SessionState::Connected;
                trace!("session to {:?} writable, switching to reads", self.peer);
                return Ok(SessionEvent::Writable);
            }
            return Ok(SessionEvent::Idle);
        }

        if !ready.is_readable() && !ready.is_read_closed() {
            return Ok(SessionEvent::Idle);
        }
        let mut buf = vec![0u8; self.read_buffer_size];
        match stream.try_read(&mut buf) {
            Ok(0) => {
                debug!("session to {:?} closed by peer", self.peer);
                self.state = SessionState::Closed;
                Ok(SessionEvent::Closed)
            }
            Ok(n) => {
                buf.truncate(n);
                trace!("session read {} bytes from {:?}", n, self.peer);
                Ok(SessionEvent::Received(self.decode(buf)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(SessionEvent::Idle),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn decode(&mut self, chunk: Vec<u8>) -> Vec<Inbound> {
        match self.decoder.as_mut() {
            Some(decoder) => decoder
                .decode(&chunk)
                .into_iter()
                .map(Inbound::Frame)
                .collect(),
            None => vec![Inbound::Raw(Bytes::from(chunk))],
        }
    }

    fn fail(&mut self, e: io::Error) -> AppError {
        self.state = SessionState::Closed;
        AppError::connection(e)
    }
}

/// Writes `bytes` without blocking; fails if the socket cannot take all of them right now.
pub fn write_nonblocking(stream: &TcpStream, bytes: &[u8]) -> AppResult<usize> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.try_write(&bytes[written..]) {
            Ok(0) => {
                return Err(AppError::connection_with(
                    ConnectionErrorKind::ChannelClosed,
                    "socket accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(AppError::IoError(io::Error::new(
                    ErrorKind::WouldBlock,
                    format!("socket busy after {} of {} bytes", written, bytes.len()),
                )))
            }
            Err(e) => return Err(AppError::connection(e)),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::codec::DataType;

    async fn listener_config(mode: DecodeMode) -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig::new("127.0.0.1", port)
            .with_decode_mode(mode)
            .with_poll_timeout(200);
        (listener, config)
    }

    async fn next_non_idle(session: &mut ConnectionSession) -> AppResult<SessionEvent> {
        loop {
            match session.poll_event().await? {
                SessionEvent::Idle => continue,
                event => return Ok(event),
            }
        }
    }

    #[tokio::test]
    async fn test_session_state_machine_and_frames() -> AppResult<()> {
        let (listener, config) = listener_config(DecodeMode::Frame).await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let frame = Frame::new(DataType::Text, "from server");
            let bytes = frame.encode().unwrap().readable_bytes_array();
            // half packet, then the rest glued to a heartbeat
            socket.write_all(&bytes[..7]).await.unwrap();
            socket.flush().await.unwrap();
            time::sleep(Duration::from_millis(50)).await;
            let mut rest = bytes[7..].to_vec();
            rest.extend(Frame::heartbeat().encode().unwrap().readable_bytes_array());
            socket.write_all(&rest).await.unwrap();

            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut session = ConnectionSession::new(&config);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.stream().is_none());
        assert!(session.poll_event().await.is_err());

        let stream = session.connect().await?;
        assert_eq!(session.state(), SessionState::WritableWait);
        assert_eq!(session.peer(), Some(stream.peer_addr()?));
        assert!(session.connect().await.is_err());
        assert!(matches!(next_non_idle(&mut session).await?, SessionEvent::Writable));
        assert_eq!(session.state(), SessionState::Connected);

        let mut frames = Vec::new();
        while frames.len() < 2 {
            if let SessionEvent::Received(messages) = next_non_idle(&mut session).await? {
                frames.extend(messages);
            }
        }
        assert_eq!(
            frames,
            vec![
                Inbound::Frame(Frame::new(DataType::Text, "from server")),
                Inbound::Frame(Frame::heartbeat())
            ]
        );
        assert!(frames[1].is_heartbeat());

        let heart = Frame::heartbeat().to_bytes()?;
        assert_eq!(write_nonblocking(&stream, &heart)?, 6);
        assert_eq!(server.await.unwrap(), [121, 0, 0, 0, 6, 2]);

        assert!(matches!(next_non_idle(&mut session).await?, SessionEvent::Closed));
        assert_eq!(session.state(), SessionState::Closed);
        Ok(())
    }

    #[tokio::test]
    async fn test_raw_mode_passes_bytes_through() -> AppResult<()> {
        let (listener, config) = listener_config(DecodeMode::Raw).await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"raw bytes").await.unwrap();
        });

        let mut session = ConnectionSession::new(&config);
        session.connect().await?;
        assert!(matches!(next_non_idle(&mut session).await?, SessionEvent::Writable));
        let mut received = Vec::new();
        loop {
            match next_non_idle(&mut session).await? {
                SessionEvent::Received(messages) => {
                    for message in messages {
                        match message {
                            Inbound::Raw(bytes) => received.extend_from_slice(&bytes),
                            other => panic!("unexpected {other:?}"),
                        }
                    }
                }
                SessionEvent::Closed => break,
                _ => {}
            }
        }
        assert_eq!(received, b"raw bytes");
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_refused_is_classified() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig::new("127.0.0.1", port);
        let mut session = ConnectionSession::new(&config);
        match session.connect().await {
            Err(AppError::Connection { kind, .. }) => {
                assert_eq!(kind, ConnectionErrorKind::ConnectRefused)
            }
            other => panic!("expected refused connection, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Closed);
    }
}
