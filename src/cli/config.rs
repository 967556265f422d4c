use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cli::sort::SortKey;

/// Settings the dashboard reads on every refresh and the input handlers
/// mutate.
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardConfig {
    pub sample_limit: u32,
    pub refresh: Duration,
    pub sort_key: SortKey,
    pub display_subs: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            sample_limit: 1024,
            refresh: Duration::from_secs(1),
            sort_key: SortKey::Cid,
            display_subs: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca: Option<PathBuf>,
    pub skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("please specify the monitoring endpoint host")]
    MissingHost,
    #[error("please specify the monitoring port")]
    MissingPort,
    #[error("--cert and --key must be given together")]
    UnpairedClientCert,
    #[error("refresh delay must be at least one second")]
    ZeroDelay,
}

/// Everything `main` needs once the command line has been validated.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub uri: String,
    pub tls: Option<TlsOptions>,
    pub dashboard: DashboardConfig,
    pub stale_after: u32,
    pub timeout: Duration,
    pub log_file: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "nats-top", disable_version_flag = true)]
#[command(about = "top-like dashboard for NATS server connections")]
pub struct Args {
    /// NATS server host
    #[arg(short = 's', long = "server", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP monitoring port
    #[arg(short = 'm', long = "port", default_value_t = 8222)]
    pub port: u16,

    /// HTTPS monitoring port; takes precedence over --port when set
    #[arg(long = "https-port")]
    pub https_port: Option<u16>,

    /// Maximum number of connections to poll
    #[arg(short = 'n', long = "conns", default_value_t = 1024)]
    pub conns: u32,

    /// Refresh interval in seconds
    #[arg(short = 'd', long = "delay", default_value_t = 1)]
    pub delay: u64,

    /// Sort connections by: cid, subs, pending, msgs_to, msgs_from, bytes_to, bytes_from
    #[arg(long = "sort", default_value = "cid", value_parser = parse_sort_key)]
    pub sort: SortKey,

    /// Client certificate (PEM) for a TLS monitoring endpoint
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Root CA certificate (PEM)
    #[arg(long = "cacert")]
    pub ca_cert: Option<PathBuf>,

    /// Skip verifying the server certificate
    #[arg(short = 'k', long = "skip-verify")]
    pub skip_verify: bool,

    /// Mark data as stale after this many failed polls in a row (0 never does)
    #[arg(long = "stale-after", default_value_t = 3)]
    pub stale_after: u32,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    /// Write logs to this file (filtered by RUST_LOG)
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Show version and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,
}

fn parse_sort_key(s: &str) -> Result<SortKey, String> {
    s.parse::<SortKey>().map_err(|e| e.to_string())
}

impl Args {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.delay == 0 {
            return Err(ConfigError::ZeroDelay);
        }
        if self.cert.is_some() != self.key.is_some() {
            return Err(ConfigError::UnpairedClientCert);
        }

        let (uri, tls) = match self.https_port {
            Some(port) if port != 0 => (
                format!("https://{}:{}", self.host, port),
                Some(TlsOptions {
                    cert: self.cert,
                    key: self.key,
                    ca: self.ca_cert,
                    skip_verify: self.skip_verify,
                }),
            ),
            _ if self.port == 0 => return Err(ConfigError::MissingPort),
            _ => (format!("http://{}:{}", self.host, self.port), None),
        };

        Ok(Settings {
            uri,
            tls,
            dashboard: DashboardConfig {
                sample_limit: self.conns,
                refresh: Duration::from_secs(self.delay),
                sort_key: self.sort,
                display_subs: false,
            },
            stale_after: self.stale_after,
            timeout: Duration::from_secs(self.timeout.max(1)),
            log_file: self.log_file,
        })
    }
}
