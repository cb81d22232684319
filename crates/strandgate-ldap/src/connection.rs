//! Per-connection LDAP message loop.
//!
//! Reads LDAP messages until the client unbinds, disconnects, sends
//! something undecodable, or the server shuts down. Whatever ends the loop,
//! the session is closed exactly once afterwards.

use futures::{SinkExt, StreamExt};
use ldap3_proto::proto::LdapMsg;
use ldap3_proto::LdapCodec;
use std::sync::Arc;
use strandgate_core::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::handler::LdapHandler;
use crate::session::ConnectionId;

/// How the message loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Unbind,
    Disconnected,
    Shutdown,
}

/// Serves one client connection
pub struct LdapConnection {
    handler: Arc<LdapHandler>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl LdapConnection {
    pub fn new(handler: Arc<LdapHandler>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            handler,
            shutdown_rx,
        }
    }

    /// Serve the connection identified by `id` until it ends, then close its
    /// session and transport.
    pub async fn handle<S>(mut self, stream: S, id: ConnectionId) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, LdapCodec::default());
        let outcome = self.serve(&mut framed, &id).await;

        match &outcome {
            Ok(exit) => debug!(connection = %id, ?exit, "message loop ended"),
            Err(e) => debug!(connection = %id, error = %e, "message loop failed"),
        }

        let mut stream = framed.into_inner();
        self.handler.close(&id, &mut stream).await;

        outcome.map(|_| ())
    }

    async fn serve<S>(
        &mut self,
        framed: &mut Framed<S, LdapCodec>,
        id: &ConnectionId,
    ) -> Result<LoopExit>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                next = framed.next() => {
                    let msg = match next {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!(connection = %id, error = %e, "LDAP decode error");
                            return Err(e.into());
                        }
                        None => return Ok(LoopExit::Disconnected),
                    };

                    let LdapMsg { msgid, op, .. } = msg;
                    debug!(connection = %id, msgid, "received request");

                    let Some(responses) = self.handler.handle_ldap_message(id, op).await else {
                        return Ok(LoopExit::Unbind);
                    };

                    for op in responses {
                        framed
                            .feed(LdapMsg {
                                msgid,
                                op,
                                ctrl: vec![],
                            })
                            .await?;
                    }
                    framed.flush().await?;
                }
                _ = self.shutdown_rx.recv() => {
                    return Ok(LoopExit::Shutdown);
                }
            }
        }
    }
}
