//! Accept loop for one LDAP endpoint.
//!
//! Each listener owns its own session registry and spawns one task per
//! accepted connection.

use std::net::SocketAddr;
use std::sync::Arc;
use strandgate_core::{Error, Result};
use strandgate_decision::DecisionService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::LdapConnection;
use crate::handler::LdapHandler;
use crate::metrics;
use crate::session::{ConnectionId, ListenerKind, SessionRegistry};
use crate::stream::ClientStream;
use crate::tls::TlsAcceptor;

/// A bound LDAP or LDAPS endpoint
pub struct LdapListener {
    kind: ListenerKind,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    handler: Arc<LdapHandler>,
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at bind time so a shutdown sent before `run` is not lost
    shutdown_rx: broadcast::Receiver<()>,
}

impl LdapListener {
    /// Bind the endpoint. A TLS listener requires an acceptor.
    pub async fn bind(
        kind: ListenerKind,
        address: &str,
        tls: Option<TlsAcceptor>,
        decisions: Arc<dyn DecisionService>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self> {
        if kind == ListenerKind::Tls && tls.is_none() {
            return Err(Error::InvalidArgument(
                "TLS listener requires a certificate".into(),
            ));
        }

        let listener = TcpListener::bind(address).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind {} listener on {}: {}", kind, address, e),
            ))
        })?;

        let registry = Arc::new(SessionRegistry::new(kind));
        Ok(Self {
            kind,
            listener,
            tls,
            handler: Arc::new(LdapHandler::new(registry, decisions)),
            shutdown_rx: shutdown_tx.subscribe(),
            shutdown_tx,
        })
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(self.handler.registry())
    }

    /// Accept connections until shutdown
    #[instrument(skip(self), fields(listener = %self.kind))]
    pub async fn run(self) -> Result<()> {
        info!(address = %self.local_addr()?, "{} listener started", self.kind);

        let Self {
            kind,
            listener,
            tls,
            handler,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            debug!(peer = %peer, "accepted connection");
                            metrics::record_connection(kind);
                            spawn_connection(
                                socket,
                                peer,
                                tls.clone(),
                                Arc::clone(&handler),
                                shutdown_tx.subscribe(),
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn spawn_connection(
    socket: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    handler: Arc<LdapHandler>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let stream = match tls {
            Some(acceptor) => match acceptor.accept(socket).await {
                Ok(stream) => ClientStream::tls(stream),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            },
            None => ClientStream::plain(socket),
        };

        let id = match (stream.local_addr(), stream.peer_addr()) {
            (Ok(local), Ok(remote)) => ConnectionId::from_addrs(local, remote),
            (Err(e), _) | (_, Err(e)) => {
                warn!(peer = %peer, error = %e, "connection lost before identification");
                return;
            }
        };

        let connection = LdapConnection::new(handler, shutdown_rx);
        if let Err(e) = connection.handle(stream, id).await {
            debug!(peer = %peer, error = %e, "connection ended with error");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use strandgate_decision::{
        BindDecision, BindDecisionRequest, DecisionResult, SearchDecision, SearchDecisionRequest,
    };
    use futures::{SinkExt, StreamExt};
    use ldap3_proto::proto::{LdapBindCred, LdapBindRequest, LdapMsg, LdapOp, LdapResultCode};
    use ldap3_proto::LdapCodec;
    use tokio::time::timeout;
    use tokio_util::codec::Framed;

    struct DenyAll;

    #[async_trait]
    impl DecisionService for DenyAll {
        async fn bind(&self, _: &BindDecisionRequest) -> DecisionResult<BindDecision> {
            Ok(BindDecision::default())
        }

        async fn search(&self, _: &SearchDecisionRequest) -> DecisionResult<SearchDecision> {
            Ok(SearchDecision::default())
        }
    }

    #[tokio::test]
    async fn test_tls_listener_requires_acceptor() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let result = LdapListener::bind(
            ListenerKind::Tls,
            "127.0.0.1:0",
            None,
            Arc::new(DenyAll),
            shutdown_tx,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_bind_address_in_use() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let first = LdapListener::bind(
            ListenerKind::Plain,
            "127.0.0.1:0",
            None,
            Arc::new(DenyAll),
            shutdown_tx.clone(),
        )
        .await
        .unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let second =
            LdapListener::bind(ListenerKind::Plain, &addr, None, Arc::new(DenyAll), shutdown_tx)
                .await;
        assert!(matches!(second, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_session() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let listener = LdapListener::bind(
            ListenerKind::Plain,
            "127.0.0.1:0",
            None,
            Arc::new(DenyAll),
            shutdown_tx.clone(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = listener.registry();
        let task = tokio::spawn(listener.run());

        let mut client = Framed::new(TcpStream::connect(addr).await.unwrap(), LdapCodec::default());
        client
            .send(LdapMsg {
                msgid: 1,
                op: LdapOp::BindRequest(LdapBindRequest {
                    dn: "cn=ned".to_string(),
                    cred: LdapBindCred::Simple("pw".to_string()),
                }),
                ctrl: vec![],
            })
            .await
            .unwrap();
        let response = client.next().await.unwrap().unwrap();
        assert!(matches!(
            response.op,
            LdapOp::BindResponse(ref r) if r.res.code == LdapResultCode::InvalidCredentials
        ));
        assert_eq!(registry.len(), 1);

        drop(client);
        timeout(Duration::from_secs(2), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_listener_shutdown() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let listener = LdapListener::bind(
            ListenerKind::Plain,
            "127.0.0.1:0",
            None,
            Arc::new(DenyAll),
            shutdown_tx.clone(),
        )
        .await
        .unwrap();
        let task = tokio::spawn(listener.run());
        shutdown_tx.send(()).unwrap();

        let result = timeout(Duration::from_secs(1), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
