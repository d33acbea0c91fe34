//! HTTP request routing and forwarding.
//!
//! Provides the affinity routing decision for incoming requests and the
//! Pingora gateway that executes it against the selected backend.

mod gateway;
mod router;

pub use gateway::GatewayProxy;
pub use router::{ForwardDecision, RouteDecision, Router};

/// Errors raised on the forwarding path before Pingora takes over.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no forward decision for request")]
    NoDecision,

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no address found for {host}")]
    NoAddress { host: String },
}
