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

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::{self, Runtime};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use super::heartbeat::heartbeat_task;
use super::ClientListener;
use crate::codec::Frame;
use crate::network::{write_nonblocking, ConnectionSession, SessionEvent};
use crate::service::{ClientConfig, StopSignal};
use crate::{AppError, AppResult, ConnectionErrorKind};

/// How long dropping a non-daemon client waits for its worker to finish.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// started, first connect in progress
    Wait,
    Connected,
    /// connection lost or never made, retrying
    Reconnecting,
    Reconnected,
    Stop,
}

impl ClientStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ClientStatus::Connected | ClientStatus::Reconnected)
    }
}

/// State touched by both the I/O worker and the heartbeat task.
struct SharedState {
    status: ClientStatus,
    last_received: Instant,
    stream: Option<Arc<TcpStream>>,
    /// fires to cancel the live session
    cancel: Option<oneshot::Sender<()>>,
    heartbeat: Option<AbortHandle>,
}

pub(super) struct ClientShared {
    config: ClientConfig,
    listener: Arc<dyn ClientListener>,
    running: AtomicBool,
    auto_reconnect: AtomicBool,
    started: AtomicBool,
    stop_notified: AtomicBool,
    state: Mutex<SharedState>,
    status_tx: watch::Sender<ClientStatus>,
    notify_shutdown: broadcast::Sender<()>,
}

impl ClientShared {
    fn new(config: ClientConfig, listener: Arc<dyn ClientListener>) -> Self {
        let (status_tx, _) = watch::channel(ClientStatus::Wait);
        let (notify_shutdown, _) = broadcast::channel(1);
        ClientShared {
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            config,
            listener,
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stop_notified: AtomicBool::new(false),
            state: Mutex::new(SharedState {
                status: ClientStatus::Wait,
                last_received: Instant::now(),
                stream: None,
                cancel: None,
                heartbeat: None,
            }),
            status_tx,
            notify_shutdown,
        }
    }

    pub(super) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    fn status(&self) -> ClientStatus {
        self.state.lock().status
    }

    fn set_status_locked(&self, state: &mut SharedState, status: ClientStatus) {
        if state.status == ClientStatus::Stop {
            return;
        }
        trace!("client status {:?} -> {:?}", state.status, status);
        state.status = status;
        self.status_tx.send_replace(status);
    }

    fn set_status(&self, status: ClientStatus) {
        let mut state = self.state.lock();
        self.set_status_locked(&mut state, status);
    }

    /// Status and time since bytes last arrived, read together.
    pub(super) fn liveness(&self) -> (ClientStatus, Duration) {
        let state = self.state.lock();
        (state.status, state.last_received.elapsed())
    }

    fn touch(&self) {
        self.state.lock().last_received = Instant::now();
    }

    /// Publishes a freshly connected session. Returns false if the client stopped meanwhile.
    fn establish(
        &self,
        stream: Arc<TcpStream>,
        cancel: oneshot::Sender<()>,
        status: ClientStatus,
    ) -> bool {
        let mut state = self.state.lock();
        if state.status == ClientStatus::Stop || !self.is_running() {
            return false;
        }
        state.stream = Some(stream);
        state.cancel = Some(cancel);
        state.last_received = Instant::now();
        self.set_status_locked(&mut state, status);
        true
    }

    fn clear_session(&self) {
        let mut state = self.state.lock();
        state.stream = None;
        state.cancel = None;
    }

    /// Ends the live session so the worker runs its reconnect path.
    pub(super) fn cancel_session(&self) {
        let cancel = self.state.lock().cancel.take();
        if let Some(cancel) = cancel {
            let _ = cancel.send(());
        }
    }

    pub(super) fn set_heartbeat(&self, handle: AbortHandle) {
        self.state.lock().heartbeat = Some(handle);
    }

    pub(super) fn report_error(&self, error: &AppError) {
        warn!("client error: {}", error);
        self.listener.on_error(error.category(), error);
    }

    fn write(&self, bytes: &[u8]) -> AppResult<usize> {
        let result = {
            let state = self.state.lock();
            match state.stream.as_ref() {
                Some(stream) => write_nonblocking(stream, bytes),
                None => Err(AppError::connection_with(
                    ConnectionErrorKind::NotYetConnected,
                    "write before the connection is established",
                )),
            }
        };
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    /// Writes a heartbeat on the live socket, if any. A broken socket ends the session.
    pub(super) fn send_heartbeat(&self, heart: &[u8]) {
        let result = {
            let state = self.state.lock();
            state
                .stream
                .as_ref()
                .map(|stream| write_nonblocking(stream, heart))
        };
        match result {
            Some(Ok(_)) => trace!("heartbeat sent"),
            Some(Err(e @ AppError::Connection { .. })) => {
                self.report_error(&e);
                self.cancel_session();
            }
            Some(Err(e)) => warn!("heartbeat skipped: {}", e),
            None => {}
        }
    }

    fn stop(&self) {
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        let heartbeat = {
            let mut state = self.state.lock();
            self.set_status_locked(&mut state, ClientStatus::Stop);
            state.stream = None;
            state.cancel = None;
            state.heartbeat.take()
        };
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        // no receivers only means no task is running
        let _ = self.notify_shutdown.send(());
        info!("client to {} stopping", self.config.address());
    }

    /// Final transition to `Stop`; `on_stop` fires on the first call only.
    fn finish_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let heartbeat = {
            let mut state = self.state.lock();
            self.set_status_locked(&mut state, ClientStatus::Stop);
            state.stream = None;
            state.cancel = None;
            state.heartbeat.take()
        };
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        if !self.stop_notified.swap(true, Ordering::SeqCst) {
            info!("client to {} stopped", self.config.address());
            self.listener.on_stop();
        }
    }
}

/// Cheap cloneable handle to a running client, passed to every listener callback.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<ClientShared>,
}

impl ClientHandle {
    /// Writes raw bytes straight to the socket.
    ///
    /// Fails with a not-yet-connected error before the connection is established, and with
    /// `WouldBlock` if the socket cannot take the whole buffer right now. Failures are also
    /// reported to `on_error`.
    pub fn write(&self, bytes: &[u8]) -> AppResult<usize> {
        self.shared.write(bytes)
    }

    pub fn write_frame(&self, frame: &Frame) -> AppResult<usize> {
        let encoded = frame.encode()?;
        self.shared.write(encoded.readable_slice())
    }

    pub fn status(&self) -> ClientStatus {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn config(&self) -> &ClientConfig {
        self.shared.config()
    }

    /// Receiver that observes every status transition, starting from the current one.
    pub fn status_changes(&self) -> watch::Receiver<ClientStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Disables auto-reconnect and stops the client, whatever state it is in.
    pub fn stop_connect(&self) {
        self.shared.stop();
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("address", &self.shared.config.address())
            .field("status", &self.shared.status())
            .finish()
    }
}

/// A reconnecting, heartbeat-monitored TCP client.
///
/// The client owns a small tokio runtime that is built by `start_connect` and shut down when
/// the client is dropped. One task runs the connect and readiness loop, a second one the
/// heartbeat check when auto-reconnect is on. Events reach the [`ClientListener`].
///
/// Dropping a non-daemon client waits a bounded time for the worker to finish; a daemon
/// client leaves its threads to wind down in the background.
pub struct MiniTcpClient {
    shared: Arc<ClientShared>,
    runtime: Option<Runtime>,
    worker: Option<JoinHandle<()>>,
}

impl MiniTcpClient {
    pub fn new(config: ClientConfig, listener: Arc<dyn ClientListener>) -> AppResult<Self> {
        config.validate()?;
        Ok(MiniTcpClient {
            shared: Arc::new(ClientShared::new(config, listener)),
            runtime: None,
            worker: None,
        })
    }

    /// Starts connecting in the background. A client starts once; a second call fails.
    pub fn start_connect(&mut self) -> AppResult<()> {
        if self.shared.status() == ClientStatus::Stop {
            return Err(AppError::IllegalStateError("client already stopped".into()));
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::IllegalStateError("client already started".into()));
        }
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("minitcp-client")
            .enable_all()
            .build()?;

        self.shared.running.store(true, Ordering::SeqCst);
        // subscribe before spawning so a stop issued right away is not missed
        let worker_stop = StopSignal::subscribe(&self.shared.notify_shutdown);
        let worker = runtime.spawn(run_worker(self.shared.clone(), worker_stop));

        if self.shared.auto_reconnect() {
            let heartbeat_stop = StopSignal::subscribe(&self.shared.notify_shutdown);
            let heartbeat = runtime.spawn(heartbeat_task(self.shared.clone(), heartbeat_stop));
            self.shared.set_heartbeat(heartbeat.abort_handle());
        }
        info!(
            "client started, connecting to {}",
            self.shared.config.address()
        );

        self.worker = Some(worker);
        self.runtime = Some(runtime);
        Ok(())
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn write(&self, bytes: &[u8]) -> AppResult<usize> {
        self.shared.write(bytes)
    }

    pub fn stop_connect(&self) {
        self.shared.stop();
    }

    /// Blocks until the worker has exited, or `timeout` passes. Returns whether it exited.
    ///
    /// Must not be called from inside an async context.
    pub fn wait_stopped(&mut self, timeout: Option<Duration>) -> bool {
        let (runtime, worker) = match (self.runtime.as_ref(), self.worker.as_mut()) {
            (Some(runtime), Some(worker)) => (runtime, worker),
            _ => return self.shared.status() == ClientStatus::Stop,
        };
        if worker.is_finished() {
            return true;
        }
        runtime.block_on(async {
            match timeout {
                Some(timeout) => time::timeout(timeout, worker).await.is_ok(),
                None => {
                    let _ = worker.await;
                    true
                }
            }
        })
    }
}

impl Drop for MiniTcpClient {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(runtime) = self.runtime.take() {
            let in_async_context = runtime::Handle::try_current().is_ok();
            if self.shared.config.daemon || in_async_context {
                runtime.shutdown_background();
            } else {
                if let Some(worker) = self.worker.take() {
                    runtime.block_on(async move {
                        let _ = time::timeout(WORKER_JOIN_TIMEOUT, worker).await;
                    });
                }
                runtime.shutdown_timeout(WORKER_JOIN_TIMEOUT);
            }
        }
        // the worker may have been cut short before reporting
        if self.shared.started.load(Ordering::SeqCst) {
            self.shared.finish_stop();
        }
        debug!("client dropped");
    }
}

/// The I/O worker: one session per iteration until stopped or, without auto-reconnect,
/// until the first session ends.
async fn run_worker(shared: Arc<ClientShared>, mut stop: StopSignal) {
    let handle = ClientHandle {
        shared: shared.clone(),
    };
    let mut reconnecting = false;
    while shared.is_running() && !stop.poll_stopped() {
        let mut established = false;
        let result = run_session(&handle, &mut stop, reconnecting, &mut established).await;
        shared.clear_session();

        if !shared.is_running() {
            break;
        }
        if let Err(e) = &result {
            shared.report_error(e);
        }
        if !shared.auto_reconnect() {
            break;
        }

        shared.set_status(ClientStatus::Reconnecting);
        if established {
            shared.listener.on_offline(&handle);
        }
        reconnecting = true;
        info!(
            "client reconnecting to {} in {:?}",
            shared.config.address(),
            shared.config.reconnect_delay()
        );
        tokio::select! {
            _ = time::sleep(shared.config.reconnect_delay()) => {}
            _ = stop.stopped() => break,
        }
    }
    shared.finish_stop();
}

/// Connects once and pumps session events until the session ends.
///
/// `Ok` means the session ended without an error worth reporting: the peer closed the
/// stream or the client is stopping.
async fn run_session(
    handle: &ClientHandle,
    stop: &mut StopSignal,
    reconnecting: bool,
    established: &mut bool,
) -> AppResult<()> {
    let shared = &handle.shared;
    let listener = shared.listener.clone();

    let mut session = ConnectionSession::new(&shared.config);
    let stream = tokio::select! {
        res = session.connect() => res?,
        _ = stop.stopped() => return Ok(()),
    };
    let peer = shared.config.address();

    let (cancel_tx, mut cancel_rx) = oneshot::channel();
    let status = if reconnecting {
        ClientStatus::Reconnected
    } else {
        ClientStatus::Connected
    };
    if !shared.establish(stream, cancel_tx, status) {
        return Ok(());
    }
    *established = true;
    info!("client connected to {} ({:?})", peer, status);
    if reconnecting {
        listener.on_reconnected(handle);
    } else {
        listener.on_connected(handle);
    }

    loop {
        if !shared.is_running() || stop.poll_stopped() {
            return Ok(());
        }
        let event = tokio::select! {
            res = session.poll_event() => res?,
            res = &mut cancel_rx => {
                return match res {
                    Ok(()) => Err(AppError::connection_with(
                        ConnectionErrorKind::CancelledRegistration,
                        "no data received within the reconnect timeout",
                    )),
                    // sender dropped by stop
                    Err(_) => Ok(()),
                };
            }
            _ = stop.stopped() => return Ok(()),
        };

        match event {
            SessionEvent::Idle => {}
            SessionEvent::Writable => listener.on_writable(handle),
            SessionEvent::Received(messages) => {
                shared.touch();
                for message in messages {
                    if message.is_heartbeat() {
                        trace!("heartbeat received from {}", peer);
                        continue;
                    }
                    listener.on_readable(handle, message);
                }
            }
            SessionEvent::Closed => {
                debug!("session to {} closed by peer", peer);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Inbound;

    struct NoopListener;

    impl ClientListener for NoopListener {
        fn on_readable(&self, _client: &ClientHandle, _message: Inbound) {}
        fn on_error(&self, _message: &str, _cause: &AppError) {}
    }

    #[test]
    fn test_write_before_connect_is_rejected() {
        let client = MiniTcpClient::new(
            ClientConfig::new("127.0.0.1", 1),
            Arc::new(NoopListener),
        )
        .unwrap();
        match client.write(b"too early") {
            Err(AppError::Connection { kind, .. }) => {
                assert_eq!(kind, ConnectionErrorKind::NotYetConnected)
            }
            other => panic!("expected not-yet-connected, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ClientConfig::new("127.0.0.1", 1).with_receive_buffer_size(0);
        assert!(MiniTcpClient::new(config, Arc::new(NoopListener)).is_err());
    }

    #[test]
    fn test_stop_before_start_forces_stop() {
        let mut client = MiniTcpClient::new(
            ClientConfig::new("127.0.0.1", 1),
            Arc::new(NoopListener),
        )
        .unwrap();
        assert_eq!(client.status(), ClientStatus::Wait);
        client.stop_connect();
        assert_eq!(client.status(), ClientStatus::Stop);
        assert!(client.start_connect().is_err());
    }

    #[test]
    fn test_status_is_connected() {
        assert!(ClientStatus::Connected.is_connected());
        assert!(ClientStatus::Reconnected.is_connected());
        assert!(!ClientStatus::Reconnecting.is_connected());
        assert!(!ClientStatus::Stop.is_connected());
    }
}
