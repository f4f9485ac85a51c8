//! Shroud CLI
//!
//! Runs one end of an encrypted point-to-point tunnel.

mod config;

use clap::Parser;
use shroud_core::Endpoint;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;

/// Shroud - encrypted point-to-point tunnel
///
/// Role A accepts cleartext TCP connections and relays them, encrypted, to
/// the peer; role B accepts the encrypted connections and relays them, in
/// cleartext, to the destination. Both ends must share the same secret.
#[derive(Parser, Debug)]
#[command(name = "shroud")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to accept connections on [default: 127.0.0.1:2000]
    #[arg(short, long, alias = "listenAddr")]
    listen_addr: Option<String>,

    /// Address to relay connections to [default: 127.0.0.1:2001]
    #[arg(short, long, alias = "remoteAddr")]
    remote_addr: Option<String>,

    /// Endpoint role: A (encrypts outbound) or B (decrypts inbound) [default: A]
    #[arg(long)]
    role: Option<String>,

    /// Shared secret, identical on both ends
    #[arg(short, long)]
    secret: Option<String>,

    /// Transport between the two ends: tcp or arq [default: tcp]
    #[arg(short, long)]
    transport: Option<String>,

    /// Configuration file path [default: <config dir>/shroud/config.toml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the merged configuration (without the secret) to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn merge_into(self, mut config: Config) -> Config {
        if let Some(listen_addr) = self.listen_addr {
            config.tunnel.listen_addr = listen_addr;
        }
        if let Some(remote_addr) = self.remote_addr {
            config.tunnel.remote_addr = remote_addr;
        }
        if let Some(role) = self.role {
            config.tunnel.role = role;
        }
        if let Some(secret) = self.secret {
            config.tunnel.secret = secret;
        }
        if let Some(transport) = self.transport {
            config.tunnel.transport = transport;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        config
    }
}

/// `RUST_LOG` when set, otherwise the configured level.
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = Config::load_or_default(cli.config.as_deref())?;
    let write_config = cli.write_config.clone();
    let config = cli.merge_into(file_config);

    if let Some(path) = write_config {
        config.save(&path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.logging.level))
        .init();

    let tunnel = config.to_tunnel_config()?;
    let endpoint = Endpoint::bind(tunnel).await?;

    tokio::select! {
        result = endpoint.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted, shutting down");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = Config::default();
        file.tunnel.role = "B".to_string();
        file.tunnel.secret = "from-file".to_string();
        file.tunnel.remote_addr = "10.0.0.1:80".to_string();

        let cli = Cli::parse_from([
            "shroud",
            "--role",
            "A",
            "--secret",
            "from-flag",
            "--transport",
            "arq",
            "-v",
        ]);
        let merged = cli.merge_into(file);

        assert_eq!(merged.tunnel.role, "A");
        assert_eq!(merged.tunnel.secret, "from-flag");
        assert_eq!(merged.tunnel.transport, "arq");
        assert_eq!(merged.tunnel.remote_addr, "10.0.0.1:80");
        assert_eq!(merged.logging.level, "debug");
    }

    #[test]
    fn test_legacy_flag_names() {
        let cli = Cli::parse_from([
            "shroud",
            "--listenAddr",
            "0.0.0.0:7000",
            "--remoteAddr",
            "192.0.2.1:7001",
        ]);
        let merged = cli.merge_into(Config::default());
        assert_eq!(merged.tunnel.listen_addr, "0.0.0.0:7000");
        assert_eq!(merged.tunnel.remote_addr, "192.0.2.1:7001");
    }

    #[test]
    fn test_log_filter_falls_back_to_level() {
        use tracing_subscriber::filter::LevelFilter;

        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(log_filter("WARN").max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let cli = Cli::parse_from(["shroud", "--role", "B"]);
        let merged = cli.merge_into(Config::default());
        assert!(merged.to_tunnel_config().is_err());
    }
}
