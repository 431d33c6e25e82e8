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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// What `on_readable` receives.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// each socket read is delivered as-is
    Raw,
    /// socket reads go through the frame decoder, one callback per frame
    #[default]
    Frame,
}

/// Settings of one client. Fixed once the client has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// bytes requested per socket read, also passed to the socket as its receive buffer hint
    pub receive_buffer_size: usize,
    pub auto_reconnect: bool,
    /// seconds between heartbeat checks
    pub heartbeat_interval: u64,
    /// milliseconds without inbound bytes before the connection counts as stale
    pub reconnect_timeout: u64,
    /// stop without waiting for the worker threads
    pub daemon: bool,
    pub decode_mode: DecodeMode,
    /// milliseconds to wait between two connect attempts while reconnecting
    pub reconnect_delay: u64,
    /// milliseconds a single connect attempt may take
    pub connect_timeout: u64,
    /// upper bound in milliseconds of one readiness wait
    pub poll_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 12002,
            receive_buffer_size: 1024,
            auto_reconnect: false,
            heartbeat_interval: 30,
            reconnect_timeout: 90_000,
            daemon: false,
            decode_mode: DecodeMode::Frame,
            reconnect_delay: 1_000,
            connect_timeout: 10_000,
            poll_timeout: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_heartbeat_interval(mut self, seconds: u64) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    pub fn with_reconnect_timeout(mut self, millis: u64) -> Self {
        self.reconnect_timeout = millis;
        self
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn with_reconnect_delay(mut self, millis: u64) -> Self {
        self.reconnect_delay = millis;
        self
    }

    pub fn with_poll_timeout(mut self, millis: u64) -> Self {
        self.poll_timeout = millis;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.host.is_empty() {
            return Err(AppError::InvalidValue("host must not be empty".to_string()));
        }
        if self.receive_buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "receive_buffer_size must be positive".to_string(),
            ));
        }
        if self.auto_reconnect && self.heartbeat_interval == 0 {
            return Err(AppError::InvalidValue(
                "heartbeat_interval must be positive when auto_reconnect is on".to_string(),
            ));
        }
        if self.poll_timeout == 0 || self.connect_timeout == 0 {
            return Err(AppError::InvalidValue(
                "poll_timeout and connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoServerConfig {
    pub bind: String,
    pub max_connection: usize,
}

impl Default for EchoServerConfig {
    fn default() -> Self {
        EchoServerConfig {
            bind: "127.0.0.1:12002".to_string(),
            max_connection: 1024,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub echo_server: EchoServerConfig,
}

impl AppConfig {
    /// Loads the file at `path`, then applies `MINITCP__SECTION__KEY` environment overrides.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("MINITCP").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.client.validate()?;
        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(!config.auto_reconnect);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.reconnect_timeout(), Duration::from_millis(90_000));
        assert!(!config.daemon);
        assert_eq!(config.decode_mode, DecodeMode::Frame);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() -> AppResult<()> {
        let mut file = Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            r#"
[client]
host = "10.0.0.8"
port = 9000
auto_reconnect = true
heartbeat_interval = 5
reconnect_timeout = 30000
decode_mode = "raw"

[echo_server]
bind = "0.0.0.0:9000"
"#
        )?;

        let config = AppConfig::set_up_config(file.path())?;
        assert_eq!(config.client.address(), "10.0.0.8:9000");
        assert!(config.client.auto_reconnect);
        assert_eq!(config.client.heartbeat_interval, 5);
        assert_eq!(config.client.reconnect_timeout, 30_000);
        assert_eq!(config.client.decode_mode, DecodeMode::Raw);
        assert_eq!(config.client.receive_buffer_size, 1024);
        assert_eq!(config.echo_server.bind, "0.0.0.0:9000");
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat_with_reconnect() {
        let config = ClientConfig::new("localhost", 1)
            .with_auto_reconnect(true)
            .with_heartbeat_interval(0);
        assert!(matches!(config.validate(), Err(AppError::InvalidValue(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AppConfig::set_up_config("/definitely/not/here/minitcp.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }
}
