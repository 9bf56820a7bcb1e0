//! Layered configuration for the collector binary: built-in defaults,
//! overridable by environment variables, overridable in turn by CLI flags
//! (§4.10), mirroring the teacher's `clap` derive + `env` attribute pattern.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Command-line / environment configuration for `theia-collector`.
#[derive(Parser, Debug, Clone)]
#[command(name = "theia-collector")]
#[command(about = "Ingests, stores, and serves log events over a framed transport")]
pub struct Args {
    /// Address the collector's transport server binds to.
    #[arg(long, env = "THEIA_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port the collector's transport server binds to.
    #[arg(long, env = "THEIA_PORT", default_value_t = 9595)]
    pub port: u16,

    /// Root directory for the naive, time-partitioned file store. Ignored
    /// when `--database-url` selects the relational backend.
    #[arg(long, env = "THEIA_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Background flush interval, in milliseconds. `0` flushes every write
    /// synchronously.
    #[arg(long, env = "THEIA_FLUSH_INTERVAL_MS", default_value_t = 1000)]
    pub flush_interval_ms: u64,

    /// Postgres connection URL. When set, selects the relational store
    /// instead of the naive file store.
    #[arg(long, env = "THEIA_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Verbosity of the default `tracing_subscriber::EnvFilter`, used only
    /// when `RUST_LOG` is unset.
    #[arg(long, env = "THEIA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_interval_ms)
    }

    /// The `tracing_subscriber::EnvFilter` directive to fall back on when
    /// `RUST_LOG` is not set: `info`/`debug`/... for this crate's family,
    /// `warn` for dependencies (§4.11).
    pub fn default_filter_directive(&self) -> String {
        format!(
            "theia_collector={level},theia_store={level},theia_transport={level},theia_model={level},warn",
            level = self.log_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_with_no_args() {
        let args = Args::parse_from(["theia-collector"]);
        assert_eq!(args.port, 9595);
        assert_eq!(args.flush_interval_ms, 1000);
        assert!(args.database_url.is_none());
    }

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::parse_from([
            "theia-collector",
            "--port",
            "7000",
            "--data-dir",
            "/tmp/theia",
            "--flush-interval-ms",
            "0",
        ]);
        assert_eq!(args.port, 7000);
        assert_eq!(args.data_dir, PathBuf::from("/tmp/theia"));
        assert_eq!(args.flush_interval(), std::time::Duration::ZERO);
    }

    #[test]
    fn database_url_selects_relational_backend() {
        let args = Args::parse_from(["theia-collector", "--database-url", "postgres://x"]);
        assert_eq!(args.database_url.as_deref(), Some("postgres://x"));
    }
}
