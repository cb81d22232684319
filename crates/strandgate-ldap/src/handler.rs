//! LDAP operation handling.
//!
//! Translates bind and search requests into decision service calls and the
//! decision service's answers back into LDAP results. The registry lock is
//! only taken to read or write session state; the decision call itself runs
//! with no lock held.

use ldap3_proto::proto::{
    LdapBindCred, LdapBindRequest, LdapBindResponse, LdapExtendedResponse, LdapOp,
    LdapPartialAttribute, LdapResult, LdapResultCode, LdapSearchRequest, LdapSearchResultEntry,
};
use std::sync::Arc;
use strandgate_decision::{
    BindDecision, BindDecisionRequest, DecisionService, Entity, SearchDecision,
    SearchDecisionRequest,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::session::{ConnectionId, Session, SessionRegistry};

/// Handles the LDAP operations of every connection on one listener
pub struct LdapHandler {
    registry: Arc<SessionRegistry>,
    decisions: Arc<dyn DecisionService>,
}

impl LdapHandler {
    pub fn new(registry: Arc<SessionRegistry>, decisions: Arc<dyn DecisionService>) -> Self {
        Self {
            registry,
            decisions,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Simple bind. A negative decision is `invalidCredentials`; a failed
    /// decision call is `operationsError` and leaves the session untouched.
    pub async fn bind(
        &self,
        conn: &ConnectionId,
        bind_dn: &str,
        password: &str,
    ) -> (LdapResultCode, String) {
        let kind = self.registry.kind();
        let session = self.registry.resolve(conn);
        debug!(session = session.number, bind_dn, "bind requested");

        let request = BindDecisionRequest {
            connection_number: session.number,
            strand: session.strand,
            bind_dn: bind_dn.to_string(),
            bind_password: password.to_string(),
            bound_dn: session.bound_dn,
        };

        let BindDecision { result, strand } = match self.decisions.bind(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(session = session.number, error = %e, "bind decision failed");
                metrics::record_decision_error(kind, "bind");
                metrics::record_bind(kind, "error");
                return (LdapResultCode::OperationsError, String::new());
            }
        };

        self.registry.update(conn, |s| {
            s.strand = strand;
            if result {
                s.bound_dn = bind_dn.to_string();
            }
        });

        if result {
            info!(session = session.number, bind_dn, "bind allowed");
            metrics::record_bind(kind, "success");
            (LdapResultCode::Success, String::new())
        } else {
            info!(session = session.number, bind_dn, "bind denied");
            metrics::record_bind(kind, "denied");
            (LdapResultCode::InvalidCredentials, String::new())
        }
    }

    /// Search under `base_dn` as the session's bound DN.
    ///
    /// Filter and scope are not forwarded: the decision service answers per
    /// base DN. Entities with no attributes still produce an entry.
    pub async fn search(
        &self,
        conn: &ConnectionId,
        base_dn: &str,
    ) -> Result<Vec<LdapSearchResultEntry>, (LdapResultCode, String)> {
        let kind = self.registry.kind();
        let session = self.registry.resolve(conn);
        debug!(session = session.number, base_dn, bound_dn = %session.bound_dn, "search requested");

        let request = SearchDecisionRequest {
            connection_number: session.number,
            strand: session.strand,
            bound_dn: session.bound_dn,
            base_dn: base_dn.to_string(),
        };

        let SearchDecision {
            result,
            strand,
            entities,
        } = match self.decisions.search(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(session = session.number, error = %e, "search decision failed");
                metrics::record_decision_error(kind, "search");
                metrics::record_search(kind, "error");
                return Err((LdapResultCode::OperationsError, String::new()));
            }
        };

        self.registry.update(conn, |s| s.strand = strand);

        if result {
            debug!(session = session.number, entries = entities.len(), "search allowed");
            metrics::record_search(kind, "success");
            Ok(entities.into_iter().map(entity_to_entry).collect())
        } else {
            info!(session = session.number, base_dn, "search denied");
            metrics::record_search(kind, "denied");
            Err((LdapResultCode::Other, "Search failed".to_string()))
        }
    }

    /// Delete is accepted and ignored
    pub fn delete(&self, conn: &ConnectionId, delete_dn: &str) -> (LdapResultCode, String) {
        debug!(connection = %conn, delete_dn, "delete ignored");
        (LdapResultCode::Success, String::new())
    }

    /// End the session for `conn` and close its transport.
    ///
    /// Works whether or not the connection ever sent a request. Returns the
    /// final session state; its strand ends with `close`.
    pub async fn close<S>(&self, conn: &ConnectionId, transport: &mut S) -> Session
    where
        S: AsyncWrite + Unpin,
    {
        let session = self.registry.close(conn);
        info!(
            listener = %session.listener,
            session = session.number,
            bound_dn = %session.bound_dn,
            opened_at = %session.opened_at.to_rfc3339(),
            "{}",
            session.strand
        );

        if let Err(e) = transport.shutdown().await {
            debug!(session = session.number, error = %e, "transport already closed");
        }
        session
    }

    /// Handle one LDAP request.
    ///
    /// Returns the response operations in order, or `None` when the client
    /// unbound and the connection should end.
    pub async fn handle_ldap_message(
        &self,
        conn: &ConnectionId,
        ldap_op: LdapOp,
    ) -> Option<Vec<LdapOp>> {
        Some(match ldap_op {
            LdapOp::BindRequest(request) => {
                let (code, message) = self.do_bind(conn, &request).await;
                vec![LdapOp::BindResponse(LdapBindResponse {
                    res: make_result(code, message),
                    saslcreds: None,
                })]
            }
            LdapOp::SearchRequest(request) => self.do_search(conn, &request).await,
            LdapOp::UnbindRequest => {
                // No need to notify on unbind (per rfc4511)
                return None;
            }
            LdapOp::DelRequest(dn) => {
                let (code, message) = self.delete(conn, &dn);
                vec![LdapOp::DelResponse(make_result(code, message))]
            }
            LdapOp::AbandonRequest(msgid) => {
                // Abandon has no response (rfc4511 4.11)
                debug!(connection = %conn, msgid, "abandon ignored");
                vec![]
            }
            LdapOp::ModifyRequest(_) => vec![LdapOp::ModifyResponse(make_result(
                LdapResultCode::UnwillingToPerform,
                "Modify is not supported".to_string(),
            ))],
            LdapOp::AddRequest(_) => vec![LdapOp::AddResponse(make_result(
                LdapResultCode::UnwillingToPerform,
                "Add is not supported".to_string(),
            ))],
            op => {
                debug!(connection = %conn, ?op, "unsupported operation");
                vec![make_extended_response(
                    LdapResultCode::UnwillingToPerform,
                    "Unsupported operation".to_string(),
                )]
            }
        })
    }

    async fn do_bind(
        &self,
        conn: &ConnectionId,
        request: &LdapBindRequest,
    ) -> (LdapResultCode, String) {
        match &request.cred {
            LdapBindCred::Simple(password) => self.bind(conn, &request.dn, password).await,
            #[allow(unreachable_patterns)]
            _ => (
                LdapResultCode::AuthMethodNotSupported,
                "Only simple bind is supported".to_string(),
            ),
        }
    }

    async fn do_search(&self, conn: &ConnectionId, request: &LdapSearchRequest) -> Vec<LdapOp> {
        debug!(
            base = %request.base,
            scope = ?request.scope,
            filter = ?request.filter,
            "search request"
        );

        match self.search(conn, &request.base).await {
            Ok(entries) => {
                let mut results: Vec<LdapOp> = entries
                    .into_iter()
                    .map(LdapOp::SearchResultEntry)
                    .collect();
                results.push(make_search_done(LdapResultCode::Success, String::new()));
                results
            }
            Err((code, message)) => vec![make_search_done(code, message)],
        }
    }
}

fn entity_to_entry(entity: Entity) -> LdapSearchResultEntry {
    LdapSearchResultEntry {
        dn: entity.dn,
        attributes: entity
            .attributes
            .into_iter()
            .map(|(atype, vals)| LdapPartialAttribute {
                atype,
                vals: vals.into_iter().map(String::into_bytes).collect(),
            })
            .collect(),
    }
}

fn make_result(code: LdapResultCode, message: String) -> LdapResult {
    LdapResult {
        code,
        matcheddn: "".to_string(),
        message,
        referral: vec![],
    }
}

fn make_search_done(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::SearchResultDone(make_result(code, message))
}

fn make_extended_response(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::ExtendedResponse(LdapExtendedResponse {
        res: make_result(code, message),
        name: None,
        value: None,
    })
}
