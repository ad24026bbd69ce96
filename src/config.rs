//! Server configuration via CLI args and environment variables.

use clap::Parser;
use std::path::PathBuf;

/// In-memory IP reputation tracker with snapshot persistence.
#[derive(Parser, Debug, Clone)]
#[command(name = "kawana", version, about)]
pub struct Config {
    /// TCP command listener port.
    #[arg(long, default_value_t = 9291, env = "KAWANA_PORT")]
    pub port: u16,

    /// Data directory holding the snapshot file.
    #[arg(long, default_value = "/var/lib/kawana", env = "KAWANA_DATADIR")]
    pub data_dir: PathBuf,

    /// Snapshot interval in seconds. 0 disables periodic persistence.
    #[arg(long = "persist", default_value_t = 300, env = "KAWANA_PERSIST")]
    pub persist_interval: u64,

    /// Remote backup interval in seconds. 0 disables backups.
    #[arg(long = "backup", default_value_t = 0, env = "KAWANA_BACKUP")]
    pub backup_interval: u64,

    /// S3 bucket receiving snapshot backups. Required when backups are
    /// enabled.
    #[arg(long, default_value = "", env = "KAWANA_S3BUCKET")]
    pub s3_bucket: String,

    /// Worker threads for the runtime.
    #[arg(long, default_value_t = 1, env = "KAWANA_PROCS")]
    pub procs: usize,

    /// Prometheus metrics HTTP port.
    #[arg(long, default_value_t = 9292, env = "KAWANA_METRICS_PORT")]
    pub metrics_port: u16,

    /// Log level filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info", env = "KAWANA_LOG_LEVEL")]
    pub log_level: String,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = Config::parse_from(["kawana"]);
        assert_eq!(config.port, 9291);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/kawana"));
        assert_eq!(config.persist_interval, 300);
        assert_eq!(config.backup_interval, 0);
        assert_eq!(config.s3_bucket, "");
        assert_eq!(config.procs, 1);
        assert_eq!(config.metrics_port, 9292);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "kawana",
            "--port",
            "1234",
            "--persist",
            "0",
            "--data-dir",
            "/tmp/kdb",
        ]);
        assert_eq!(config.port, 1234);
        assert_eq!(config.persist_interval, 0);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/kdb"));
    }
}
