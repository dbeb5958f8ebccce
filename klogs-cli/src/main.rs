//! klogs - live pod log streaming over WebSocket
//!
//! ```bash
//! klogs --address 0.0.0.0:8000 --max-sessions 50
//! RUST_LOG=klogs_core=debug klogs --log-json
//! ```

use anyhow::Result;
use clap::Parser;
use klogs_core::MuxConfig;
use klogs_http::{start_server, ServerConfig};
use klogs_kube::KubeProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "klogs")]
#[command(version, about = "Stream Kubernetes pod logs to WebSocket subscribers", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    address: String,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, default_value_t = 100)]
    max_sessions: usize,

    /// Tailers running at once per session
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..))]
    max_tailers: u64,

    /// Log lines buffered per session between tailers and the subscriber
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u64).range(1..))]
    buffer: u64,

    /// Milliseconds a closing session waits for its tailers before aborting them
    #[arg(long, default_value_t = 5000)]
    drain_grace_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        let max_sessions = (self.max_sessions > 0).then_some(self.max_sessions);
        ServerConfig::new(self.address.clone())
            .with_max_sessions(max_sessions)
            .with_mux(MuxConfig {
                buffer_capacity: self.buffer as usize,
                max_tailers: self.max_tailers as usize,
            })
            .with_drain_grace(Duration::from_millis(self.drain_grace_ms))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let provider = KubeProvider::try_default().await?;
    info!("Connected to Kubernetes");

    start_server(cli.server_config(), Arc::new(provider)).await
}

/// Log filter from `RUST_LOG`, `info` when unset
fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["klogs"]);
        let config = cli.server_config();
        assert_eq!(config.address, "0.0.0.0:8000");
        assert_eq!(config.session_manager.max_sessions, Some(100));
        assert_eq!(config.session_manager.session.mux.max_tailers, 64);
        assert_eq!(config.session_manager.session.mux.buffer_capacity, 256);
        assert_eq!(
            config.session_manager.session.drain_grace,
            Duration::from_secs(5)
        );
        assert!(!cli.log_json);
    }

    #[test]
    fn zero_max_sessions_means_unlimited() {
        let cli = Cli::parse_from(["klogs", "--max-sessions", "0", "--drain-grace-ms", "250"]);
        let config = cli.server_config();
        assert_eq!(config.session_manager.max_sessions, None);
        assert_eq!(
            config.session_manager.session.drain_grace,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn zero_sized_pools_are_rejected() {
        assert!(Cli::try_parse_from(["klogs", "--max-tailers", "0"]).is_err());
        assert!(Cli::try_parse_from(["klogs", "--buffer", "0"]).is_err());
    }
}
