//! Static mapping from selector keys to backend targets.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Uri;

/// Fixed-width numeric format that selector keys must follow.
///
/// A path segment is a selector candidate only when it is exactly
/// `digits` ASCII digits long. `0042` is a valid 4-digit key; `42`
/// and `00042` are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFormat {
    digits: usize,
}

impl KeyFormat {
    /// Creates a key format of the given digit width.
    pub fn new(digits: usize) -> Self {
        Self { digits }
    }

    /// Returns the configured digit width.
    pub fn digits(&self) -> usize {
        self.digits
    }

    /// Checks whether a path segment is a well-formed key.
    pub fn matches(&self, segment: &str) -> bool {
        segment.len() == self.digits && segment.bytes().all(|b| b.is_ascii_digit())
    }
}

/// URL scheme of a backend target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScheme {
    Http,
    Https,
}

/// A backend base URL, parsed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    url: String,
    scheme: TargetScheme,
    authority: String,
    host: String,
    port: u16,
}

impl BackendTarget {
    /// Parses a base URL such as `http://127.0.0.1:8080`.
    ///
    /// The URL must be absolute, use `http` or `https`, and carry no path
    /// beyond `/`. A missing port defaults to 80 or 443.
    pub fn parse(url: &str) -> Result<Self, String> {
        let uri: Uri = url
            .parse()
            .map_err(|e| format!("invalid target url '{}': {}", url, e))?;

        let scheme = match uri.scheme_str() {
            Some("http") => TargetScheme::Http,
            Some("https") => TargetScheme::Https,
            Some(other) => {
                return Err(format!("unsupported scheme '{}' in target url '{}'", other, url))
            }
            None => return Err(format!("target url '{}' has no scheme", url)),
        };

        let authority = uri
            .authority()
            .ok_or_else(|| format!("target url '{}' has no host", url))?;
        let host = authority.host();
        if host.is_empty() {
            return Err(format!("target url '{}' has no host", url));
        }

        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(format!("target url '{}' must not carry a path", url));
        }

        let port = authority.port_u16().unwrap_or(match scheme {
            TargetScheme::Http => 80,
            TargetScheme::Https => 443,
        });

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            scheme,
            authority: authority.as_str().to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Returns the base URL as configured, without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `host[:port]` as written in the URL, for the `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns a `host:port` string suitable for address resolution.
    pub fn socket_host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the host name without IPv6 brackets, used as TLS SNI.
    pub fn sni(&self) -> String {
        self.host.trim_start_matches('[').trim_end_matches(']').to_string()
    }

    pub fn requires_tls(&self) -> bool {
        self.scheme == TargetScheme::Https
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Immutable table of selector key to backend target.
///
/// Built once at startup and shared read-only between request handlers,
/// so no locking is involved.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    format: KeyFormat,
    targets: HashMap<String, Arc<BackendTarget>>,
}

impl TargetRegistry {
    /// Builds a registry, rejecting keys that do not match `format`
    /// and URLs that fail to parse.
    pub fn new<I, K, U>(format: KeyFormat, entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (K, U)>,
        K: Into<String>,
        U: AsRef<str>,
    {
        let mut targets = HashMap::new();
        for (key, url) in entries {
            let key = key.into();
            if !format.matches(&key) {
                return Err(format!(
                    "target key '{}' is not a {}-digit number",
                    key,
                    format.digits()
                ));
            }
            let target = BackendTarget::parse(url.as_ref())?;
            targets.insert(key, Arc::new(target));
        }
        Ok(Self { format, targets })
    }

    /// Returns the key format this registry was validated against.
    pub fn format(&self) -> KeyFormat {
        self.format
    }

    /// Exact-match lookup of a key.
    pub fn get(&self, key: &str) -> Option<&Arc<BackendTarget>> {
        self.targets.get(key)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `(key, target)` pairs sorted by key.
    pub fn entries(&self) -> Vec<(&str, &BackendTarget)> {
        let mut entries: Vec<(&str, &BackendTarget)> = self
            .targets
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_ref()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}
