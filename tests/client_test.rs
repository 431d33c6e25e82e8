use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use minitcp::codec::{DataType, Frame};
use minitcp::{
    AppError, ClientConfig, ClientHandle, ClientListener, ClientStatus, ConnectionErrorKind,
    EchoServer, EchoServerConfig, Inbound, MiniTcpClient,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::runtime::{self, Runtime};
use tokio::sync::{broadcast, mpsc as tokio_mpsc};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Connected,
    Reconnected,
    Offline,
    Writable,
    Readable(Inbound),
    Error(Option<ConnectionErrorKind>),
    Stop,
}

struct RecordingListener {
    events: Mutex<Sender<Event>>,
}

impl RecordingListener {
    fn new() -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(RecordingListener {
                events: Mutex::new(tx),
            }),
            rx,
        )
    }

    fn record(&self, event: Event) {
        let _ = self.events.lock().unwrap().send(event);
    }
}

impl ClientListener for RecordingListener {
    fn on_connected(&self, _client: &ClientHandle) {
        self.record(Event::Connected);
    }

    fn on_reconnected(&self, _client: &ClientHandle) {
        self.record(Event::Reconnected);
    }

    fn on_offline(&self, _client: &ClientHandle) {
        self.record(Event::Offline);
    }

    fn on_readable(&self, _client: &ClientHandle, message: Inbound) {
        self.record(Event::Readable(message));
    }

    fn on_writable(&self, _client: &ClientHandle) {
        self.record(Event::Writable);
    }

    fn on_error(&self, _message: &str, cause: &AppError) {
        let kind = match cause {
            AppError::Connection { kind, .. } => Some(*kind),
            _ => None,
        };
        self.record(Event::Error(kind));
    }

    fn on_stop(&self) {
        self.record(Event::Stop);
    }
}

/// Waits for the first event matching `pred`, returning it with everything seen before.
fn wait_for(rx: &Receiver<Event>, pred: impl Fn(&Event) -> bool) -> (Event, Vec<Event>) {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(event) if pred(&event) => return (event, seen),
            Ok(event) => seen.push(event),
            Err(e) => panic!("no matching event ({e}), seen so far: {seen:?}"),
        }
    }
}

fn server_runtime() -> Runtime {
    runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap()
}

fn start_echo_server(rt: &Runtime) -> (SocketAddr, broadcast::Sender<()>) {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, _) = tokio_mpsc::channel(1);
    let config = EchoServerConfig {
        bind: "127.0.0.1:0".to_string(),
        ..Default::default()
    };
    let server = rt
        .block_on(EchoServer::bind(
            &config,
            notify_shutdown.clone(),
            shutdown_complete_tx,
        ))
        .unwrap();
    let addr = server.local_addr().unwrap();
    rt.spawn(async move { server.run().await });
    (addr, notify_shutdown)
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(addr.ip().to_string(), addr.port())
        .with_poll_timeout(100)
        .with_reconnect_delay(100)
}

#[test]
fn test_echo_round_trip_and_stop() {
    let rt = server_runtime();
    let (addr, _notify_shutdown) = start_echo_server(&rt);
    let (listener, rx) = RecordingListener::new();

    let mut client = MiniTcpClient::new(client_config(addr), listener).unwrap();
    client.start_connect().unwrap();

    wait_for(&rx, |e| *e == Event::Connected);
    assert_eq!(client.status(), ClientStatus::Connected);
    wait_for(&rx, |e| *e == Event::Writable);

    let frame = Frame::new(DataType::Json, r#"{"op":"echo","seq":1}"#);
    client.handle().write_frame(&frame).unwrap();
    let (event, _) = wait_for(&rx, |e| matches!(e, Event::Readable(_)));
    assert_eq!(event, Event::Readable(Inbound::Frame(frame)));

    client.stop_connect();
    assert!(client.wait_stopped(Some(WAIT)));
    assert_eq!(client.status(), ClientStatus::Stop);
    assert!(client.write(b"late").is_err());
    drop(client);

    let stops = rx.try_iter().filter(|e| *e == Event::Stop).count();
    assert_eq!(stops, 1);
}

#[test]
fn test_heartbeats_are_not_delivered() {
    let rt = server_runtime();
    let tcp = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = tcp.local_addr().unwrap();
    let text = Frame::new(DataType::Text, "after the beats");
    let mut outbound = Vec::new();
    for _ in 0..3 {
        outbound.extend(Frame::heartbeat().encode().unwrap().readable_bytes_array());
    }
    outbound.extend(text.encode().unwrap().readable_bytes_array());
    rt.spawn(async move {
        let (mut socket, _) = tcp.accept().await.unwrap();
        socket.write_all(&outbound).await.unwrap();
        // hold the connection open until the runtime goes away
        tokio::time::sleep(WAIT * 2).await;
    });

    let (listener, rx) = RecordingListener::new();
    let mut client = MiniTcpClient::new(client_config(addr), listener).unwrap();
    client.start_connect().unwrap();

    let (event, _) = wait_for(&rx, |e| matches!(e, Event::Readable(_)));
    assert_eq!(event, Event::Readable(Inbound::Frame(text)));
    client.stop_connect();
    assert!(client.wait_stopped(Some(WAIT)));
}

#[test]
fn test_peer_close_without_reconnect_stops_once() {
    let rt = server_runtime();
    let tcp = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = tcp.local_addr().unwrap();
    rt.spawn(async move {
        let (socket, _) = tcp.accept().await.unwrap();
        drop(socket);
    });

    let (listener, rx) = RecordingListener::new();
    let mut client = MiniTcpClient::new(client_config(addr), listener).unwrap();
    let mut status = client.handle().status_changes();
    assert_eq!(*status.borrow(), ClientStatus::Wait);
    client.start_connect().unwrap();

    let stopped = rt.block_on(async {
        tokio::time::timeout(WAIT, status.wait_for(|s| *s == ClientStatus::Stop))
            .await
            .is_ok()
    });
    assert!(stopped);

    let (_, before) = wait_for(&rx, |e| *e == Event::Stop);
    assert_eq!(before.first(), Some(&Event::Connected));
    assert!(!before.contains(&Event::Offline));
    assert!(client.wait_stopped(Some(WAIT)));
    assert_eq!(client.status(), ClientStatus::Stop);
    drop(client);
    assert!(rx.try_iter().all(|e| e != Event::Stop));
}

#[test]
fn test_refused_connect_reports_error_then_stops() {
    let rt = server_runtime();
    let addr = {
        let tcp = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        tcp.local_addr().unwrap()
    };

    let (listener, rx) = RecordingListener::new();
    let mut client = MiniTcpClient::new(client_config(addr), listener).unwrap();
    client.start_connect().unwrap();

    let (_, before) = wait_for(&rx, |e| *e == Event::Stop);
    assert!(before.contains(&Event::Error(Some(ConnectionErrorKind::ConnectRefused))));
    assert!(!before.contains(&Event::Connected));
    assert!(client.wait_stopped(Some(WAIT)));
}

#[test]
fn test_silent_peer_triggers_reconnect() {
    let rt = server_runtime();
    let tcp = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = tcp.local_addr().unwrap();
    rt.spawn(async move {
        // accept and keep every socket, never write a byte
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = tcp.accept().await {
            sockets.push(socket);
        }
    });

    let config = client_config(addr)
        .with_auto_reconnect(true)
        .with_heartbeat_interval(1)
        .with_reconnect_timeout(1_500);
    let (listener, rx) = RecordingListener::new();
    let mut client = MiniTcpClient::new(config, listener).unwrap();
    client.start_connect().unwrap();

    let mut status = client.handle().status_changes();
    wait_for(&rx, |e| *e == Event::Connected);
    // the watch keeps only the latest status, Reconnecting may already have passed
    let left_connected = rt.block_on(async {
        tokio::time::timeout(
            WAIT,
            status.wait_for(|s| {
                matches!(s, ClientStatus::Reconnecting | ClientStatus::Reconnected)
            }),
        )
        .await
        .is_ok()
    });
    assert!(left_connected);
    let (_, before) = wait_for(&rx, |e| *e == Event::Reconnected);
    assert!(before.contains(&Event::Offline));
    assert!(before.contains(&Event::Error(Some(ConnectionErrorKind::CancelledRegistration))));
    assert_eq!(client.status(), ClientStatus::Reconnected);

    client.stop_connect();
    assert!(client.wait_stopped(Some(WAIT)));
    assert_eq!(client.status(), ClientStatus::Stop);
}

#[test]
fn test_start_twice_is_rejected() {
    let rt = server_runtime();
    let (addr, _notify_shutdown) = start_echo_server(&rt);
    let (listener, _rx) = RecordingListener::new();
    let mut client = MiniTcpClient::new(client_config(addr), listener).unwrap();
    client.start_connect().unwrap();
    assert!(matches!(
        client.start_connect(),
        Err(AppError::IllegalStateError(_))
    ));
}
