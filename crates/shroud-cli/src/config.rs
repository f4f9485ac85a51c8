//! Configuration file for the shroud CLI.
//!
//! Every setting can come from a TOML file; command-line flags override the
//! file. The merged result is validated and turned into the immutable
//! [`TunnelConfig`] the endpoint runs with.

use serde::{Deserialize, Serialize};
use shroud_core::config::{DEFAULT_LISTEN_ADDR, DEFAULT_REMOTE_ADDR};
use shroud_core::{Role, TunnelConfig};
use shroud_transport::{ArqConfig, TransportKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shroud configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Tunnel endpoint configuration
    pub tunnel: TunnelSection,
    /// ARQ transport tuning
    pub arq: ArqSection,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// `[tunnel]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunnelSection {
    /// Address to accept connections on
    pub listen_addr: String,
    /// Address to relay connections to
    pub remote_addr: String,
    /// Endpoint role, `A` or `B`
    pub role: String,
    /// Shared secret
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret: String,
    /// Transport between the endpoints, `tcp` or `arq`
    pub transport: String,
}

/// `[arq]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArqSection {
    /// Largest datagram, header included
    pub mtu: usize,
    /// Segments in flight
    pub send_window: u16,
    /// Segments buffered for the reader
    pub recv_window: u16,
    /// Session timer resolution in milliseconds
    pub interval_ms: u64,
    /// Lower retransmission timeout bound in milliseconds
    pub min_rto_ms: u64,
    /// Upper retransmission timeout bound in milliseconds
    pub max_rto_ms: u64,
    /// Retransmission timeout before the first RTT sample, in milliseconds
    pub initial_rto_ms: u64,
    /// Later acks that trigger fast retransmit, 0 disables
    pub fast_resend: u32,
    /// Transmissions of one segment before the peer is considered gone
    pub dead_link: u32,
    /// Zero-window ask interval in milliseconds
    pub window_ask_interval_ms: u64,
    /// Seconds a finished conversation is remembered
    pub close_grace_secs: u64,
    /// Bytes buffered between a session and its stream
    pub stream_buffer: usize,
    /// Sessions waiting to be accepted
    pub accept_backlog: usize,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            remote_addr: DEFAULT_REMOTE_ADDR.to_string(),
            role: Role::default().to_string(),
            secret: String::new(),
            transport: TransportKind::default().to_string(),
        }
    }
}

impl Default for ArqSection {
    fn default() -> Self {
        Self::from(&ArqConfig::default())
    }
}

impl From<&ArqConfig> for ArqSection {
    fn from(arq: &ArqConfig) -> Self {
        Self {
            mtu: arq.mtu,
            send_window: arq.send_window,
            recv_window: arq.recv_window,
            interval_ms: arq.interval.as_millis() as u64,
            min_rto_ms: arq.min_rto.as_millis() as u64,
            max_rto_ms: arq.max_rto.as_millis() as u64,
            initial_rto_ms: arq.initial_rto.as_millis() as u64,
            fast_resend: arq.fast_resend,
            dead_link: arq.dead_link,
            window_ask_interval_ms: arq.window_ask_interval.as_millis() as u64,
            close_grace_secs: arq.close_grace.as_secs(),
            stream_buffer: arq.stream_buffer,
            accept_backlog: arq.accept_backlog,
        }
    }
}

impl ArqSection {
    /// Convert to transport tuning.
    #[must_use]
    pub fn to_arq_config(&self) -> ArqConfig {
        ArqConfig {
            mtu: self.mtu,
            send_window: self.send_window,
            recv_window: self.recv_window,
            interval: Duration::from_millis(self.interval_ms),
            min_rto: Duration::from_millis(self.min_rto_ms),
            max_rto: Duration::from_millis(self.max_rto_ms),
            initial_rto: Duration::from_millis(self.initial_rto_ms),
            fast_resend: self.fast_resend,
            dead_link: self.dead_link,
            window_ask_interval: Duration::from_millis(self.window_ask_interval_ms),
            close_grace: Duration::from_secs(self.close_grace_secs),
            stream_buffer: self.stream_buffer,
            accept_backlog: self.accept_backlog,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// The secret is never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut redacted = self.clone();
        redacted.tunnel.secret.clear();
        let contents = toml::to_string_pretty(&redacted)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("shroud/config.toml")
    }

    /// Load the given file, or the default file if it exists, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded, or the
    /// default file exists but cannot be parsed.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path)
                .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display())),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_host_port(&self.tunnel.listen_addr, "Listen address")?;
        validate_host_port(&self.tunnel.remote_addr, "Remote address")?;

        self.role()?;
        self.transport()?;

        if self.tunnel.secret.is_empty() {
            anyhow::bail!("a shared secret is required (--secret or [tunnel] secret)");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        self.arq.to_arq_config().validate()?;
        Ok(())
    }

    /// Parsed endpoint role
    ///
    /// # Errors
    ///
    /// Returns an error if the role is not `A` or `B`.
    pub fn role(&self) -> anyhow::Result<Role> {
        Ok(self.tunnel.role.parse()?)
    }

    /// Parsed tunnel transport
    ///
    /// # Errors
    ///
    /// Returns an error if the transport name is unknown.
    pub fn transport(&self) -> anyhow::Result<TransportKind> {
        Ok(self.tunnel.transport.parse()?)
    }

    /// Build the immutable endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the key cannot be derived.
    pub fn to_tunnel_config(&self) -> anyhow::Result<TunnelConfig> {
        self.validate()?;
        let config = TunnelConfig::new(
            &self.tunnel.listen_addr,
            &self.tunnel.remote_addr,
            self.role()?,
            &self.tunnel.secret,
        )?
        .with_transport(self.transport()?)
        .with_arq(self.arq.to_arq_config());
        Ok(config)
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
    };

    port.parse::<u16>()
        .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port}"))?;

    if host.is_empty() {
        anyhow::bail!("{name} '{addr}' has empty hostname");
    }

    if host.contains('/') || host.contains('\\') {
        anyhow::bail!("{name} '{addr}' contains invalid characters");
    }

    Ok(())
}
