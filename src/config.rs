use crate::logger::LoggerConfig;
use crate::policy::RotationPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Well-known location of the server's active log file.
pub const DEFAULT_LOG_FILE: &str = "/var/log/controlserver.log";

const MEGABYTE: u64 = 1024 * 1024;

/// Command-line configuration for the control server.
#[derive(Parser, Debug, Clone)]
#[command(name = "logtail", version, about = "Operational control server")]
pub struct Config {
    /// Set log level (info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Port for the control server
    #[arg(long, default_value_t = 8888)]
    pub control_server_port: u16,

    /// Active log file served by the /api/logs endpoints
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Rotate the log once it grows past this many megabytes
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_size_mb: u64,

    /// Number of rotated backups to keep (0 keeps all)
    #[arg(long, default_value_t = 5)]
    pub max_backups: usize,

    /// Days to keep rotated backups (0 keeps them forever)
    #[arg(long, default_value_t = 30)]
    pub max_age_days: u32,

    /// Gzip rotated backups
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub compress: bool,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_size_bytes: self.max_size_mb.saturating_mul(MEGABYTE),
            max_backups: self.max_backups,
            max_age_days: self.max_age_days,
            compress_backups: self.compress,
        }
    }

    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            level: self.log_level.clone(),
            file: self.log_file.clone(),
            policy: self.rotation_policy(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
