// src/cli.rs
use crate::config::{BackendScheme, Config};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "least-conn-balancer")]
#[command(about = "Least-connections HTTP load balancer", long_about = None)]
pub struct Cli {
    /// YAML or JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Load balancer port
    #[arg(long)]
    pub port: Option<u16>,

    /// Request timeout time in seconds
    #[arg(long = "timeout-sec")]
    pub timeout_sec: Option<u64>,

    /// Whether backends support HTTPS
    #[arg(long)]
    pub https: bool,

    /// Include tracing info into responses
    #[arg(long)]
    pub trace: bool,

    /// Backend address (host:port); repeat to build the pool in order
    #[arg(long = "backend", value_name = "HOST:PORT")]
    pub backends: Vec<String>,
}

impl Cli {
    /// Overlay explicitly given flags onto `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout_sec {
            config.timeout_secs = timeout;
        }
        if self.https {
            config.scheme = BackendScheme::Https;
        }
        if self.trace {
            config.trace = true;
        }
        if !self.backends.is_empty() {
            config.backends = self.backends.clone();
        }
    }
}
