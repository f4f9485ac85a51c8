//! Tunnel endpoint: accept loop and per-connection setup.
//!
//! ```text
//!  client ──tcp──▶ [Role A] ══cipher over tcp/arq══▶ [Role B] ──tcp──▶ destination
//! ```
//!
//! Every accepted connection is handled on its own task. Setup failures and
//! relay errors stay inside that task; only losing the listener itself ends
//! [`Endpoint::run`].

use crate::config::{Role, TunnelConfig};
use crate::error::{Error, Result};
use crate::relay::{RelayOutcome, relay};
use shroud_crypto::CipherStream;
use shroud_transport::{Connection, Listener, Transport, TransportError, TransportFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A bound tunnel endpoint.
pub struct Endpoint {
    config: Arc<TunnelConfig>,
    listener: Box<dyn Listener>,
    dialer: Arc<dyn Transport>,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Start listening according to `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Listen`] if the listen address cannot be bound.
    pub async fn bind(config: TunnelConfig) -> Result<Self> {
        let role = config.role();
        let listen_kind = role.listen_kind(config.transport());
        let dial_kind = role.dial_kind(config.transport());

        let listener = TransportFactory::create(listen_kind, config.arq())
            .listen(config.listen_addr())
            .await
            .map_err(|source| Error::Listen {
                addr: config.listen_addr().to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let dialer = TransportFactory::create(dial_kind, config.arq());

        tracing::info!(
            role = %role,
            listen = %local_addr,
            listen_transport = %listen_kind,
            remote = config.remote_addr(),
            dial_transport = %dial_kind,
            "tunnel endpoint listening"
        );

        Ok(Self {
            config: Arc::new(config),
            listener,
            dialer,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The configuration this endpoint runs with.
    #[must_use]
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Accept and relay connections until the listener is closed.
    ///
    /// Failed accepts are logged and retried; each accepted connection is
    /// relayed on its own task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] if the listener stops for good.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let (inbound, from) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(TransportError::Closed) => return Err(Error::ListenerClosed),
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            tracing::debug!(%from, "accepted connection");
            let config = Arc::clone(&self.config);
            let dialer = Arc::clone(&self.dialer);

            tokio::spawn(async move {
                match handle(&config, dialer.as_ref(), inbound).await {
                    Ok(outcome) => tracing::debug!(
                        %from,
                        first_finished = %outcome.first_finished,
                        bytes_in = outcome.a_to_b,
                        bytes_out = outcome.b_to_a,
                        error = ?outcome.error,
                        "relay finished"
                    ),
                    Err(e) => tracing::warn!(%from, error = %e, "connection setup failed"),
                }
            });
        }
    }
}

/// Open the outbound leg for `inbound`, apply the cipher on the tunnel side
/// and relay until either side ends.
///
/// Any leg already opened is dropped, and thereby closed, on failure.
async fn handle(
    config: &TunnelConfig,
    dialer: &dyn Transport,
    inbound: Connection,
) -> Result<RelayOutcome> {
    let key = Arc::clone(config.key());

    match config.role() {
        Role::A => {
            let outbound = dial(config, dialer).await?;
            let outbound = CipherStream::new(key, outbound).await?;
            Ok(relay(inbound, outbound).await)
        }
        Role::B => {
            let inbound = CipherStream::new(key, inbound).await?;
            let outbound = dial(config, dialer).await?;
            Ok(relay(inbound, outbound).await)
        }
    }
}

async fn dial(config: &TunnelConfig, dialer: &dyn Transport) -> Result<Connection> {
    dialer
        .dial(config.remote_addr())
        .await
        .map_err(|source| Error::Dial {
            addr: config.remote_addr().to_string(),
            source,
        })
}
