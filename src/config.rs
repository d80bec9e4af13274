use std::fs::read_to_string;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// This channel's own identity, announced to peers during the init
    /// handshake. Usually `external-ip:listen-port`.
    ///
    pub host_port: String,
    ///
    /// Address the server socket binds to; may differ from `host_port` when
    /// running behind NAT.
    ///
    #[serde(default = "Server::listen")]
    pub listen: SocketAddr,
    #[serde(default = "Server::req_timeout_default_ms")]
    pub req_timeout_default_ms: u64,
    #[serde(default = "Server::server_timeout_default_ms")]
    pub server_timeout_default_ms: u64,
    #[serde(default = "Server::timeout_check_interval_ms")]
    pub timeout_check_interval_ms: u64,
    #[serde(default = "Server::timeout_fuzz_ms")]
    pub timeout_fuzz_ms: u64,
}

impl Server {
    fn listen() -> SocketAddr {
        "0.0.0.0:4040".parse().unwrap()
    }

    fn req_timeout_default_ms() -> u64 {
        5000
    }

    fn server_timeout_default_ms() -> u64 {
        5000
    }

    fn timeout_check_interval_ms() -> u64 {
        1000
    }

    fn timeout_fuzz_ms() -> u64 {
        100
    }

    pub fn req_timeout_default(&self) -> Duration {
        Duration::from_millis(self.req_timeout_default_ms)
    }

    pub fn server_timeout_default(&self) -> Duration {
        Duration::from_millis(self.server_timeout_default_ms)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    pub fn timeout_fuzz(&self) -> Duration {
        Duration::from_millis(self.timeout_fuzz_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Api {
    #[serde(default = "Api::listen")]
    pub listen: SocketAddr,
}

impl Api {
    fn listen() -> SocketAddr {
        "127.0.0.1:3000".parse().unwrap()
    }
}

impl Default for Api {
    fn default() -> Self {
        Self { listen: Self::listen() }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub api: Option<Api>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: tchannel-server --config /etc/tchannel-server/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Loads the command line parameters and, from the file path they name,
    /// the TOML configuration.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(&Cli::parse().config)?)?)
    }
}
