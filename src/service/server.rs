use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, trace};

use super::config::EchoServerConfig;
use super::StopSignal;
use crate::codec::{Frame, PackageCodec};
use crate::{AppError, AppResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// handler for each connection
struct ConnectionHandler {
    connection_id: u64,
    reader: FramedRead<OwnedReadHalf, PackageCodec>,
    writer: BufWriter<OwnedWriteHalf>,
    stop: StopSignal,
    _shutdown_complete_tx: mpsc::Sender<()>,
}

impl ConnectionHandler {
    /// Echoes every decoded frame back; heartbeats are answered with a fresh heartbeat.
    async fn handle_connection(&mut self) -> AppResult<()> {
        loop {
            // None once the client closes the connection gracefully
            let maybe_frame = tokio::select! {
                res = self.reader.next() => res,
                _ = self.stop.stopped() => {
                    debug!("connection {} exit read loop after recv shutdown signal", self.connection_id);
                    return Ok(());
                }
            };
            let frame = match maybe_frame {
                Some(frame) => frame?,
                None => break,
            };

            let reply = if frame.is_heartbeat() {
                trace!("connection {} heartbeat", self.connection_id);
                Frame::heartbeat()
            } else {
                debug!("connection {} echo {}", self.connection_id, frame);
                frame
            };
            let encoded = reply.encode()?;
            self.writer
                .write_all(encoded.readable_slice())
                .await
                .map_err(AppError::connection)?;
            self.writer.flush().await.map_err(AppError::connection)?;
        }
        debug!("connection {} closed by client", self.connection_id);
        Ok(())
    }
}

/// Frame echo server, the peer the `minitcp client` command talks to.
#[derive(Debug)]
pub struct EchoServer {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl EchoServer {
    pub async fn bind(
        config: &EchoServerConfig,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> AppResult<Self> {
        let listener = TcpListener::bind(&config.bind).await.map_err(|err| {
            error!("failed to bind echo server to {}: {}", config.bind, err);
            AppError::IllegalStateError(
                format!("failed to bind to {}: {}", config.bind, err).into(),
            )
        })?;
        info!("echo server listening on {}", listener.local_addr()?);
        Ok(EchoServer {
            listener,
            limit_connections: Arc::new(Semaphore::new(config.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until accepting fails for good, one task per connection.
    pub async fn run(&self) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(e.to_string().into()))?;

            let socket = self.accept().await?;
            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            debug!(
                "accept connection {} from {:?}",
                connection_id,
                socket.peer_addr().ok()
            );
            let (reader, writer) = socket.into_split();

            let mut handler = ConnectionHandler {
                connection_id,
                reader: FramedRead::new(reader, PackageCodec::new()),
                writer: BufWriter::new(writer),
                stop: StopSignal::subscribe(&self.notify_shutdown),
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("connection {} error: {}", handler.connection_id, err);
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::connection(err));
                    }
                    error!("accept failed, retrying in {}s: {}", backoff, err);
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::codec::{DataType, FrameDecoder};

    #[tokio::test]
    async fn test_echo_and_heartbeat_reply() -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, _shutdown_complete_rx) = mpsc::channel(1);
        let config = EchoServerConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let server = EchoServer::bind(&config, notify_shutdown.clone(), shutdown_complete_tx).await?;
        let addr = server.local_addr()?;
        tokio::spawn(async move { server.run().await });

        let mut socket = TcpStream::connect(addr).await?;
        let frame = Frame::new(DataType::Json, r#"{"hello":"echo"}"#);
        let mut outbound = frame.encode()?.readable_bytes_array();
        outbound.extend(Frame::heartbeat().encode()?.readable_bytes_array());
        socket.write_all(&outbound).await?;

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut buf = [0u8; 64];
        while frames.len() < 2 {
            let n = socket.read(&mut buf).await?;
            assert!(n > 0, "server closed early");
            frames.extend(decoder.decode(&buf[..n]));
        }
        assert_eq!(frames, vec![frame, Frame::heartbeat()]);

        notify_shutdown.send(()).unwrap();
        Ok(())
    }
}
