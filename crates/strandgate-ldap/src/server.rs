//! Strandgate server bootstrap
//!
//! Binds the plaintext and TLS endpoints, plus the optional metrics endpoint,
//! and serves them until shutdown. Failing to bind or to load the
//! certificate is fatal.

use std::net::SocketAddr;
use std::sync::Arc;
use strandgate_core::{config::StrandgateConfig, Error, Result};
use strandgate_decision::{DecisionService, HttpDecisionClient};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::listener::LdapListener;
use crate::metrics::{serve_metrics, MetricsRecorder};
use crate::session::ListenerKind;
use crate::tls::TlsAcceptor;

/// LDAP server with a plaintext and a TLS endpoint
pub struct LdapServer {
    config: StrandgateConfig,
    decisions: Option<Arc<dyn DecisionService>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LdapServer {
    pub fn new(config: StrandgateConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            decisions: None,
            shutdown_tx,
        }
    }

    /// Use `decisions` instead of the HTTP client built from configuration
    pub fn with_decision_service(mut self, decisions: Arc<dyn DecisionService>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    /// Sending on the handle stops every endpoint and ends every connection
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind every configured endpoint without serving yet
    pub async fn bind(self) -> Result<BoundServer> {
        let decisions: Arc<dyn DecisionService> = match self.decisions {
            Some(decisions) => decisions,
            None => Arc::new(HttpDecisionClient::new(&self.config.decision)?),
        };
        info!(url = %self.config.decision.base_url, "decision service configured");

        let ldap = LdapListener::bind(
            ListenerKind::Plain,
            &self.config.ldap.bind_address,
            None,
            Arc::clone(&decisions),
            self.shutdown_tx.clone(),
        )
        .await?;

        let ldaps = if self.config.ldaps.enabled {
            self.config.ldaps.validate()?;
            let acceptor = TlsAcceptor::from_config(&self.config.ldaps)?;
            Some(
                LdapListener::bind(
                    ListenerKind::Tls,
                    &self.config.ldaps.bind_address,
                    Some(acceptor),
                    Arc::clone(&decisions),
                    self.shutdown_tx.clone(),
                )
                .await?,
            )
        } else {
            info!("LDAPS listener disabled");
            None
        };

        let metrics = if self.config.metrics.enabled {
            let recorder = Arc::new(MetricsRecorder::install()?);
            let listener = TcpListener::bind(&self.config.metrics.bind_address)
                .await
                .map_err(|e| {
                    Error::InvalidConfig(format!(
                        "Failed to bind metrics endpoint on {}: {}",
                        self.config.metrics.bind_address, e
                    ))
                })?;
            Some((listener, recorder))
        } else {
            None
        };

        Ok(BoundServer {
            ldap,
            ldaps,
            metrics,
            shutdown_tx: self.shutdown_tx,
        })
    }

    /// Bind and serve until shutdown
    pub async fn run(self) -> Result<()> {
        self.bind().await?.run().await
    }
}

/// A server whose endpoints are bound
pub struct BoundServer {
    ldap: LdapListener,
    ldaps: Option<LdapListener>,
    metrics: Option<(TcpListener, Arc<MetricsRecorder>)>,
    shutdown_tx: broadcast::Sender<()>,
}

impl BoundServer {
    pub fn ldap_addr(&self) -> Result<SocketAddr> {
        self.ldap.local_addr()
    }

    pub fn ldaps_addr(&self) -> Option<Result<SocketAddr>> {
        self.ldaps.as_ref().map(LdapListener::local_addr)
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve every endpoint until shutdown
    pub async fn run(self) -> Result<()> {
        info!(version = strandgate_core::VERSION, "Strandgate starting");

        let Self {
            ldap,
            ldaps,
            metrics,
            shutdown_tx,
        } = self;

        if let Some((listener, recorder)) = metrics {
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = serve_metrics(listener, recorder, shutdown_rx).await {
                    tracing::error!(error = %e, "metrics endpoint failed");
                }
            });
        }

        let ldaps = async move {
            match ldaps {
                Some(listener) => listener.run().await,
                None => Ok(()),
            }
        };
        tokio::try_join!(ldap.run(), ldaps)?;

        info!("Strandgate stopped");
        Ok(())
    }
}
