//! Target selection for incoming HTTP requests.
//!
//! A request picks its backend in one of two ways: a leading selector
//! segment that names a registered target (which also rebinds the client),
//! or the client's existing binding. Everything else is rejected.

use std::sync::Arc;

use crate::store::{AffinityTable, BackendTarget, TargetRegistry};

/// Message returned when a request has neither a selector nor a binding.
pub const NO_TARGET_MESSAGE: &str = "No valid port found and no active proxy target set.";

/// Where and how to forward a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardDecision {
    /// Backend the request goes to.
    pub target: Arc<BackendTarget>,
    /// Path to send upstream, without query string.
    pub path: String,
    /// Set when this request created or replaced the client's binding.
    pub binding_changed: bool,
    /// Selector key consumed from the path, if any.
    pub selector: Option<String>,
    /// Target the client was bound to before this request rebound it.
    pub previous: Option<Arc<BackendTarget>>,
}

impl ForwardDecision {
    /// Status message recorded in the audit log for a forwarded request.
    pub fn status_message(&self) -> String {
        if self.binding_changed {
            format!("Proxying to {}", self.target)
        } else {
            format!("Proxying to active target: {}", self.target)
        }
    }
}

/// A request the router refuses to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub message: &'static str,
}

/// Outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// The request is for the audit log endpoint and is answered locally.
    AuditLog,
    Forward(ForwardDecision),
    Reject(Rejection),
}

/// Routes incoming requests using the target registry and the affinity table.
///
/// Thread-safe: the registry is immutable and the affinity table
/// synchronizes internally.
pub struct Router {
    registry: Arc<TargetRegistry>,
    affinity: Arc<AffinityTable>,
    audit_endpoint: String,
}

impl Router {
    /// Creates a new Router.
    ///
    /// `audit_endpoint` is the reserved path that serves the audit log.
    pub fn new(
        registry: Arc<TargetRegistry>,
        affinity: Arc<AffinityTable>,
        audit_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            affinity,
            audit_endpoint: audit_endpoint.into(),
        }
    }

    /// Decides what to do with a request from `client` for `path`.
    ///
    /// `path` must not include the query string. A selector that is well
    /// formed but not registered is not an error: the request falls back
    /// to the client's binding like any other path.
    pub fn route(&self, client: &str, path: &str) -> RouteDecision {
        if path == self.audit_endpoint {
            return RouteDecision::AuditLog;
        }

        let segments = path_segments(path);

        if let Some((key, target)) = self.selector_target(&segments) {
            let target = Arc::clone(target);
            let previous = self.affinity.bind(client, Arc::clone(&target));
            return RouteDecision::Forward(ForwardDecision {
                target,
                path: join_segments(&segments[1..]),
                binding_changed: true,
                selector: Some(key.to_string()),
                previous,
            });
        }

        match self.affinity.lookup(client) {
            Some(target) => RouteDecision::Forward(ForwardDecision {
                target,
                path: path.to_string(),
                binding_changed: false,
                selector: None,
                previous: None,
            }),
            None => RouteDecision::Reject(Rejection {
                status: 404,
                message: NO_TARGET_MESSAGE,
            }),
        }
    }

    /// Returns the registered target named by the first segment, if any.
    fn selector_target<'a>(&self, segments: &[&'a str]) -> Option<(&'a str, &Arc<BackendTarget>)> {
        let candidate = *segments.first()?;
        if !self.registry.format().matches(candidate) {
            return None;
        }
        self.registry.get(candidate).map(|target| (candidate, target))
    }

    pub fn affinity(&self) -> &Arc<AffinityTable> {
        &self.affinity
    }
}

/// Splits a path on `/`, dropping empty segments.
///
/// `/8080/special`, `8080/special` and `//8080//special` all yield
/// `["8080", "special"]`.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins segments back into an absolute path; no segments gives `/`.
fn join_segments(segments: &[&str]) -> String {
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyFormat;

    const CLIENT: &str = "192.168.1.10";

    fn make_router() -> Router {
        let registry = TargetRegistry::new(
            KeyFormat::new(4),
            [
                ("8080", "http://127.0.0.1:8080"),
                ("5000", "http://127.0.0.1:5000"),
            ],
        )
        .unwrap();
        Router::new(Arc::new(registry), Arc::new(AffinityTable::new()), "/logs")
    }

    fn expect_forward(decision: RouteDecision) -> ForwardDecision {
        match decision {
            RouteDecision::Forward(d) => d,
            other => panic!("expected forward, got {:?}", other),
        }
    }

    fn expect_reject(decision: RouteDecision) -> Rejection {
        match decision {
            RouteDecision::Reject(r) => r,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    // ========== Path segments ==========

    #[test]
    fn test_path_segments_normalize() {
        assert_eq!(path_segments("/8080/special"), vec!["8080", "special"]);
        assert_eq!(path_segments("8080/special"), vec!["8080", "special"]);
        assert_eq!(path_segments("//8080//special"), vec!["8080", "special"]);
        assert!(path_segments("/").is_empty());
        assert!(path_segments("").is_empty());
    }

    #[test]
    fn test_join_segments() {
        assert_eq!(join_segments(&[]), "/");
        assert_eq!(join_segments(&["a", "b"]), "/a/b");
    }

    // ========== Selector handling ==========

    #[test]
    fn test_selector_binds_and_strips() {
        let router = make_router();

        let decision = expect_forward(router.route(CLIENT, "/8080/special"));
        assert_eq!(decision.target.url(), "http://127.0.0.1:8080");
        assert_eq!(decision.path, "/special");
        assert!(decision.binding_changed);
        assert_eq!(decision.selector.as_deref(), Some("8080"));

        let bound = router.affinity().lookup(CLIENT).unwrap();
        assert_eq!(bound.url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_selector_alone_forwards_root() {
        let router = make_router();
        let decision = expect_forward(router.route(CLIENT, "/5000"));
        assert_eq!(decision.path, "/");
        assert_eq!(decision.target.port(), 5000);
    }

    #[test]
    fn test_selector_with_doubled_slashes() {
        let router = make_router();
        let decision = expect_forward(router.route(CLIENT, "//8080//a//b"));
        assert_eq!(decision.path, "/a/b");
    }

    #[test]
    fn test_binding_persists_without_selector() {
        let router = make_router();
        router.route(CLIENT, "/8080/special");

        let decision = expect_forward(router.route(CLIENT, "/other"));
        assert_eq!(decision.target.url(), "http://127.0.0.1:8080");
        assert_eq!(decision.path, "/other");
        assert!(!decision.binding_changed);
        assert!(decision.selector.is_none());
        assert!(decision.previous.is_none());
    }

    #[test]
    fn test_sticky_path_is_not_normalized() {
        let router = make_router();
        router.route(CLIENT, "/8080");

        let decision = expect_forward(router.route(CLIENT, "//x//y/"));
        assert_eq!(decision.path, "//x//y/");
    }

    #[test]
    fn test_rebind_overwrites() {
        let router = make_router();
        router.route(CLIENT, "/8080");

        let decision = expect_forward(router.route(CLIENT, "/5000/y"));
        assert_eq!(decision.target.url(), "http://127.0.0.1:5000");
        assert_eq!(decision.path, "/y");
        assert!(decision.binding_changed);
        assert_eq!(decision.previous.unwrap().port(), 8080);
        assert_eq!(router.affinity().lookup(CLIENT).unwrap().port(), 5000);
    }

    // ========== Fallthrough and rejection ==========

    #[test]
    fn test_no_binding_no_selector_rejected() {
        let router = make_router();
        let rejection = expect_reject(router.route(CLIENT, "/special"));
        assert_eq!(rejection.status, 404);
        assert_eq!(
            rejection.message,
            "No valid port found and no active proxy target set."
        );
        assert_eq!(router.affinity().len(), 0);
    }

    #[test]
    fn test_unregistered_selector_falls_through_to_rejection() {
        let router = make_router();
        let rejection = expect_reject(router.route(CLIENT, "/9999/x"));
        assert_eq!(rejection.status, 404);
        assert_eq!(router.affinity().len(), 0);
    }

    #[test]
    fn test_unregistered_selector_uses_binding_and_keeps_path() {
        let router = make_router();
        router.route(CLIENT, "/8080");

        let decision = expect_forward(router.route(CLIENT, "/9999/x"));
        assert_eq!(decision.target.port(), 8080);
        assert_eq!(decision.path, "/9999/x");
        assert!(!decision.binding_changed);
    }

    #[test]
    fn test_wrong_width_numeric_is_not_selector() {
        let router = make_router();
        expect_reject(router.route(CLIENT, "/999/x"));
        expect_reject(router.route(CLIENT, "/80800/x"));
    }

    #[test]
    fn test_selector_must_be_first_segment() {
        let router = make_router();
        expect_reject(router.route(CLIENT, "/api/8080"));
    }

    #[test]
    fn test_clients_do_not_share_bindings() {
        let router = make_router();
        router.route("10.0.0.1", "/8080");

        expect_reject(router.route("10.0.0.2", "/special"));
        expect_forward(router.route("10.0.0.1", "/special"));
    }

    // ========== Audit endpoint ==========

    #[test]
    fn test_audit_endpoint_short_circuits() {
        let router = make_router();
        assert_eq!(router.route(CLIENT, "/logs"), RouteDecision::AuditLog);
        assert_eq!(router.affinity().len(), 0);
    }

    #[test]
    fn test_audit_endpoint_ignores_binding() {
        let router = make_router();
        router.route(CLIENT, "/8080");
        assert_eq!(router.route(CLIENT, "/logs"), RouteDecision::AuditLog);
    }

    #[test]
    fn test_audit_endpoint_exact_match_only() {
        let router = make_router();
        expect_reject(router.route(CLIENT, "/logs/"));
        expect_reject(router.route(CLIENT, "/logs/extra"));
    }

    // ========== Status messages ==========

    #[test]
    fn test_status_messages() {
        let router = make_router();
        let selected = expect_forward(router.route(CLIENT, "/8080"));
        assert_eq!(selected.status_message(), "Proxying to http://127.0.0.1:8080");

        let sticky = expect_forward(router.route(CLIENT, "/"));
        assert_eq!(
            sticky.status_message(),
            "Proxying to active target: http://127.0.0.1:8080"
        );
    }

    // ========== Concurrency ==========

    #[test]
    fn test_router_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Router>();
    }

    #[test]
    fn test_concurrent_routing() {
        use std::thread;

        let router = Arc::new(make_router());
        let mut handles = vec![];
        for i in 0..10 {
            let router = Arc::clone(&router);
            handles.push(thread::spawn(move || {
                let client = format!("10.0.0.{}", i);
                let selector = if i % 2 == 0 { "/8080/a" } else { "/5000/a" };
                for _ in 0..100 {
                    expect_forward(router.route(&client, selector));
                    expect_forward(router.route(&client, "/b"));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(router.affinity().len(), 10);
    }
}
