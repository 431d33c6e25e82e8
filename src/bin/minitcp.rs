use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use minitcp::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, ClientHandle,
    ClientListener, ClientStatus, DataType, EchoServer, Frame, Inbound, MiniTcpClient,
};
use tokio::runtime;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// also write hourly rolling log files into this directory
    #[arg(long)]
    pub log_dir: Option<String>,
    #[command(subcommand)]
    pub command: Command,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// connect to a server, send a message once connected and print what comes back
    Client {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// text payload sent after every (re)connect
        #[arg(short, long)]
        message: Option<String>,
    },
    /// answer every frame with the same frame, and heartbeats with a heartbeat
    EchoServer {
        /// address to listen on, e.g. 127.0.0.1:12002
        #[arg(long)]
        bind: Option<String>,
    },
    PrintConfig,
}

struct ConsoleListener {
    message: Option<String>,
}

impl ConsoleListener {
    fn greet(&self, client: &ClientHandle) {
        if let Some(message) = &self.message {
            if let Err(e) = client.write_frame(&Frame::new(DataType::Text, message.clone())) {
                warn!("send message failed: {}", e);
            }
        }
    }
}

impl ClientListener for ConsoleListener {
    fn on_connected(&self, client: &ClientHandle) {
        info!("connected to {}", client.config().address());
    }

    fn on_reconnected(&self, client: &ClientHandle) {
        info!("reconnected to {}", client.config().address());
    }

    fn on_offline(&self, client: &ClientHandle) {
        warn!("connection to {} lost", client.config().address());
    }

    fn on_writable(&self, client: &ClientHandle) {
        self.greet(client);
    }

    fn on_readable(&self, _client: &ClientHandle, message: Inbound) {
        let now = Local::now().format("%H:%M:%S%.3f");
        match message {
            Inbound::Frame(frame) => {
                println!("[{}] {}: {}", now, frame, String::from_utf8_lossy(frame.payload()))
            }
            Inbound::Raw(bytes) => println!("[{}] {} bytes: {:?}", now, bytes.len(), bytes),
        }
    }

    fn on_error(&self, message: &str, cause: &AppError) {
        error!("{}: {}", message, cause);
    }

    fn on_stop(&self) {
        info!("client stopped");
    }
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    let level = minitcp::service::verbosity_level(commandline.verbose);
    let _log_guard = match commandline.log_dir.as_deref() {
        Some(log_dir) => Some(setup_tracing(log_dir, level)),
        None => {
            setup_local_tracing(level)?;
            None
        }
    };

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./conf");
            path.push("minitcp.toml");
            path
        },
        PathBuf::from,
    );
    let mut app_config = AppConfig::set_up_config(config_path)?;

    match commandline.command {
        Command::Client {
            host,
            port,
            message,
        } => {
            if let Some(host) = host {
                app_config.client.host = host;
            }
            if let Some(port) = port {
                app_config.client.port = port;
            }
            run_client(app_config, message)
        }
        Command::EchoServer { bind } => {
            if let Some(bind) = bind {
                app_config.echo_server.bind = bind;
            }
            run_echo_server(app_config)
        }
        Command::PrintConfig => {
            println!("{:#?}", app_config);
            Ok(())
        }
    }
}

fn run_client(app_config: AppConfig, message: Option<String>) -> AppResult<()> {
    let listener = Arc::new(ConsoleListener { message });
    let mut client = MiniTcpClient::new(app_config.client, listener)?;
    let mut status = client.handle().status_changes();
    client.start_connect()?;

    // the client runs on its own runtime; this one only waits for ctrl-c or the client stopping
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("ctrl-c received, stopping client"),
            _ = status.wait_for(|status| *status == ClientStatus::Stop) => {}
        }
    });

    client.stop_connect();
    if !client.wait_stopped(Some(Duration::from_secs(5))) {
        warn!("client worker did not exit in time");
    }
    Ok(())
}

fn run_echo_server(app_config: AppConfig) -> AppResult<()> {
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);
        let server = EchoServer::bind(
            &app_config.echo_server,
            notify_shutdown.clone(),
            shutdown_complete_tx,
        )
        .await?;

        tokio::select! {
            res = server.run() => {
                if let Err(err) = res {
                    error!("echo server stopped: {}", err);
                }
            }
            _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down echo server"),
        }

        // connection handlers hold a clone of the completion sender; recv returns None once
        // all of them have exited
        let _ = notify_shutdown.send(());
        drop(notify_shutdown);
        drop(server);
        let _ = shutdown_complete_rx.recv().await;
        info!("echo server shut down");
        Ok(())
    })
}
