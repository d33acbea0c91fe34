//! Pingora ProxyHttp implementation for the affinity proxy.
//!
//! Runs the Router in `request_filter`, answers the audit endpoint and
//! rejections locally, forwards everything else to the decided backend,
//! and records one audit entry per request in `logging`.

use std::net::SocketAddr as InetSocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use pingora_core::prelude::*;
use pingora_core::protocols::l4::socket::SocketAddr;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};

use crate::audit::{AuditEntry, AuditLog, AuditSink};
use crate::store::{BackendTarget, ClientId};

use super::{ForwardDecision, ProxyError, RouteDecision, Router};

/// Body message sent when the backend cannot be reached.
pub const PROXY_FAILED_MESSAGE: &str = "Proxy request failed";

/// Body message sent when the audit file cannot be read.
pub const AUDIT_READ_FAILED_MESSAGE: &str = "Failed to read request log";

/// Per-request context for the gateway proxy.
#[derive(Debug, Default)]
pub struct GatewayCtx {
    /// Remote IP of the downstream connection.
    pub client: ClientId,
    /// Inbound path and query as received, before any rewrite.
    pub request_url: String,
    /// Set when the request is forwarded.
    pub decision: Option<ForwardDecision>,
    /// Message recorded with the audit entry.
    pub status_message: Option<String>,
    /// Status of a response answered locally, kept in case writing it fails.
    pub local_status: Option<u16>,
    /// Requests to the audit endpoint are not themselves audited.
    pub skip_audit: bool,
    /// Set by `fail_to_proxy`.
    pub proxy_failed: bool,
}

/// Gateway proxy that routes HTTP requests by client affinity.
pub struct GatewayProxy {
    router: Arc<Router>,
    audit_log: Arc<AuditLog>,
    audit: AuditSink,
}

impl GatewayProxy {
    /// Creates a new GatewayProxy.
    ///
    /// `audit_log` serves the audit endpoint; `audit` receives new entries.
    pub fn new(router: Arc<Router>, audit_log: Arc<AuditLog>, audit: AuditSink) -> Self {
        Self {
            router,
            audit_log,
            audit,
        }
    }

    /// Answers the audit endpoint with the whole log as a JSON array.
    async fn serve_audit_log(&self, session: &mut Session) -> Result<()> {
        match self.audit_log.read_all().await {
            Ok(entries) => {
                let body = serde_json::to_vec(&entries).map_err(|e| {
                    Error::because(ErrorType::InternalError, "encode audit log", e)
                })?;
                write_json(session, 200, body).await
            }
            Err(e) => {
                tracing::error!(
                    path = %self.audit_log.path().display(),
                    error = %e,
                    "failed to read audit log"
                );
                write_json(session, 500, message_body(AUDIT_READ_FAILED_MESSAGE)).await
            }
        }
    }
}

#[async_trait]
impl ProxyHttp for GatewayProxy {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        ctx.client = client_id(session.client_addr());
        ctx.request_url = request_url(&session.req_header().uri);
        let path = session.req_header().uri.path().to_string();

        match self.router.route(&ctx.client, &path) {
            RouteDecision::AuditLog => {
                ctx.skip_audit = true;
                self.serve_audit_log(session).await?;
                Ok(true)
            }
            RouteDecision::Reject(rejection) => {
                tracing::debug!(client = %ctx.client, path = %path, "no valid selector and no active target");
                ctx.status_message = Some(rejection.message.to_string());
                ctx.local_status = Some(rejection.status);
                write_json(session, rejection.status, message_body(rejection.message)).await?;
                Ok(true)
            }
            RouteDecision::Forward(decision) => {
                if decision.binding_changed {
                    let previous = decision.previous.as_ref().map(|p| p.url()).unwrap_or("-");
                    tracing::info!(
                        client = %ctx.client,
                        selector = decision.selector.as_deref().unwrap_or("-"),
                        backend = %decision.target,
                        previous = previous,
                        bound_clients = self.router.affinity().len(),
                        "client switched target"
                    );
                } else {
                    tracing::debug!(
                        client = %ctx.client,
                        backend = %decision.target,
                        "proxying to active target"
                    );
                }
                ctx.status_message = Some(decision.status_message());
                ctx.decision = Some(decision);
                Ok(false)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let decision = ctx.decision.as_ref().ok_or_else(|| {
            Error::because(ErrorType::InternalError, "upstream peer", ProxyError::NoDecision)
        })?;
        let target = &decision.target;

        let addr = resolve_target(target).await.map_err(|e| {
            Error::because(ErrorType::ConnectError, format!("resolve {}", target), e)
        })?;

        let peer = HttpPeer::new(addr, target.requires_tls(), target.sni());
        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let Some(decision) = ctx.decision.as_ref() else {
            return Ok(());
        };

        let uri = rewrite_uri(&decision.path, upstream_request.uri.query())
            .map_err(|e| Error::because(ErrorType::InternalError, "rewrite upstream uri", e))?;
        upstream_request.set_uri(uri);
        upstream_request.insert_header("Host", decision.target.authority())?;
        Ok(())
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        _ctx: &mut Self::CTX,
        mut e: Box<Error>,
    ) -> Box<Error> {
        // One attempt per inbound request.
        e.set_retry(false);
        e
    }

    fn error_while_proxy(
        &self,
        peer: &HttpPeer,
        _session: &mut Session,
        e: Box<Error>,
        _ctx: &mut Self::CTX,
        _client_reused: bool,
    ) -> Box<Error> {
        let mut e = e.more_context(format!("Peer: {}", peer));
        // Never resend, even when a pooled upstream connection went stale.
        e.set_retry(false);
        e
    }

    async fn fail_to_proxy(&self, session: &mut Session, e: &Error, ctx: &mut Self::CTX) -> u16 {
        let Some(decision) = ctx.decision.as_ref() else {
            // A local answer failed to write; nothing was proxied.
            tracing::debug!(
                client = %ctx.client,
                url = %ctx.request_url,
                error = %e,
                "failed to send local response"
            );
            return session
                .response_written()
                .map(|r| r.status.as_u16())
                .unwrap_or(0);
        };

        let target = decision.target.url().to_string();
        tracing::error!(
            client = %ctx.client,
            url = %ctx.request_url,
            backend = %target,
            error = %e,
            "proxy error"
        );
        ctx.proxy_failed = true;

        if session.response_written().is_none() {
            if let Err(write_err) =
                write_json(session, 500, message_body(PROXY_FAILED_MESSAGE)).await
            {
                tracing::debug!(error = %write_err, "failed to send proxy error response");
            }
        }
        500
    }

    async fn logging(&self, session: &mut Session, _e: Option<&Error>, ctx: &mut Self::CTX) {
        let method = session.req_header().method.as_str().to_string();
        let written = session.response_written().map(|r| r.status.as_u16());
        let backend = ctx.decision.as_ref().map(|d| d.target.url()).unwrap_or("-");

        tracing::info!(
            method = %method,
            path = %ctx.request_url,
            status = written.unwrap_or(0),
            backend = backend,
            "request completed"
        );

        if let Some(entry) = audit_entry(ctx, method, written) {
            self.audit.record(entry);
        }
    }
}

/// Builds the audit entry for a finished request, if it should be audited.
///
/// A proxy failure is always recorded as 500, whatever was written.
pub fn audit_entry(ctx: &GatewayCtx, method: String, written: Option<u16>) -> Option<AuditEntry> {
    if ctx.skip_audit {
        return None;
    }
    let (status, message) = if ctx.proxy_failed {
        (500, PROXY_FAILED_MESSAGE.to_string())
    } else {
        (
            written.or(ctx.local_status).unwrap_or(0),
            ctx.status_message.clone().unwrap_or_default(),
        )
    };
    Some(AuditEntry::now(
        method,
        ctx.request_url.clone(),
        ctx.client.clone(),
        status,
        message,
    ))
}

/// Derives the client identity from the downstream address.
///
/// IPv4-mapped IPv6 addresses are folded to plain IPv4 so a client is
/// identified the same way on dual-stack listeners.
pub fn client_id(addr: Option<&SocketAddr>) -> ClientId {
    match addr {
        Some(addr) => match addr.as_inet() {
            Some(inet) => inet.ip().to_canonical().to_string(),
            None => addr.to_string(),
        },
        None => "unknown".to_string(),
    }
}

/// Returns the request's path and query exactly as received.
pub fn request_url(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Builds the upstream URI from the decided path and the original query.
pub fn rewrite_uri(path: &str, query: Option<&str>) -> std::result::Result<Uri, http::uri::InvalidUri> {
    match query {
        Some(query) => format!("{}?{}", path, query).parse(),
        None => path.parse(),
    }
}

/// Encodes `{"message": "..."}`.
pub fn message_body(message: &str) -> Vec<u8> {
    serde_json::json!({ "message": message }).to_string().into_bytes()
}

/// Resolves a target to the first socket address of its host.
pub async fn resolve_target(target: &BackendTarget) -> std::result::Result<InetSocketAddr, ProxyError> {
    let host = target.socket_host();
    let mut addrs = tokio::net::lookup_host(&host)
        .await
        .map_err(|source| ProxyError::Resolve {
            host: host.clone(),
            source,
        })?;
    addrs.next().ok_or(ProxyError::NoAddress { host: host.clone() })
}

/// Writes a complete JSON response and ends the downstream response.
async fn write_json(session: &mut Session, status: u16, body: Vec<u8>) -> Result<()> {
    let mut header = ResponseHeader::build(status, Some(2))?;
    header.insert_header("Content-Type", "application/json")?;
    header.insert_header("Content-Length", body.len().to_string())?;
    session.write_response_header(Box::new(header), false).await?;
    session.write_response_body(Some(Bytes::from(body)), true).await
}
