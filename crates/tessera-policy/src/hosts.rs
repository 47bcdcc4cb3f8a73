//! Network host allowlist patterns.
//!
//! Supported forms: `*`, `example.com`, `*.example.com`, and any of these with
//! a `scheme://` prefix and/or a `:port` suffix. Without an explicit port the
//! URL must use the default port of its scheme.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostMatch {
    Any,
    Exact(String),
    /// Stored with the leading dot, e.g. `.example.com`.
    Subdomain(String),
}

/// A parsed allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    scheme: Option<String>,
    host: HostMatch,
    port: Option<u16>,
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

impl HostPattern {
    /// Parse a pattern. Returns `None` for malformed patterns.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return None;
        }
        if raw == "*" {
            return Some(Self {
                scheme: None,
                host: HostMatch::Any,
                port: None,
            });
        }

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => (Some(scheme.to_string()), rest),
            Some(_) => return None,
            None => (None, raw.as_str()),
        };
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().ok()?)),
            None => (authority, None),
        };
        if host.is_empty() {
            return None;
        }

        let host = if let Some(suffix) = host.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return None;
            }
            HostMatch::Subdomain(format!(".{}", suffix))
        } else if host == "*" {
            HostMatch::Any
        } else if host.contains('*') {
            return None;
        } else {
            HostMatch::Exact(host.to_string())
        };

        Some(Self { scheme, host, port })
    }

    /// Check a parsed URL against this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        if let Some(scheme) = &self.scheme {
            if url.scheme() != scheme {
                return false;
            }
        }

        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let host_ok = match &self.host {
            HostMatch::Any => true,
            HostMatch::Exact(expected) => host == *expected,
            HostMatch::Subdomain(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        };
        if !host_ok {
            return false;
        }

        if self.host == HostMatch::Any && self.port.is_none() {
            return true;
        }
        let scheme = self.scheme.as_deref().unwrap_or_else(|| url.scheme());
        let expected_port = self.port.or_else(|| default_port(scheme));
        url.port_or_known_default() == expected_port
    }
}

/// Parse a requested host or URL; bare hosts are treated as `https`.
pub fn parse_target(target: &str) -> Option<Url> {
    let target = target.trim();
    if target.contains("://") {
        Url::parse(target).ok()
    } else {
        Url::parse(&format!("https://{}", target)).ok()
    }
}

/// True if `target` (URL or bare host) matches any pattern.
pub fn is_host_allowed(patterns: &[String], target: &str) -> bool {
    let Some(url) = parse_target(target) else {
        return false;
    };
    patterns
        .iter()
        .filter_map(|p| HostPattern::parse(p))
        .any(|pattern| pattern.matches(&url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(pattern: &str, target: &str) -> bool {
        is_host_allowed(&[pattern.to_string()], target)
    }

    #[test]
    fn test_exact_host() {
        assert!(allowed("cdn.example.com", "https://cdn.example.com/a.js"));
        assert!(allowed("cdn.example.com", "http://cdn.example.com/a.js"));
        assert!(!allowed("cdn.example.com", "https://evil.example.com/a.js"));
    }

    #[test]
    fn test_wildcard_subdomains_only() {
        assert!(allowed("*.example.com", "https://a.example.com"));
        assert!(allowed("*.example.com", "https://a.b.example.com"));
        assert!(!allowed("*.example.com", "https://example.com"));
        assert!(!allowed("*.example.com", "https://badexample.com"));
    }

    #[test]
    fn test_default_port_inference() {
        assert!(allowed("https://cdn.example.com", "https://cdn.example.com:443/x"));
        assert!(!allowed("https://cdn.example.com", "https://cdn.example.com:8443/x"));
        assert!(!allowed("https://cdn.example.com", "http://cdn.example.com/x"));
        assert!(!allowed("cdn.example.com", "http://cdn.example.com:8080/x"));
    }

    #[test]
    fn test_explicit_port_must_match() {
        assert!(allowed("https://cdn.example.com:8443", "https://cdn.example.com:8443/x"));
        assert!(!allowed("https://cdn.example.com:8443", "https://cdn.example.com/x"));
    }

    #[test]
    fn test_bare_target_and_any() {
        assert!(allowed("cdn.example.com", "cdn.example.com"));
        assert!(allowed("*", "https://anything.test:9999"));
        assert!(!is_host_allowed(&[], "https://cdn.example.com"));
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        assert!(HostPattern::parse("").is_none());
        assert!(HostPattern::parse("a.*.com").is_none());
        assert!(HostPattern::parse("host:notaport").is_none());
        assert!(HostPattern::parse("://host").is_none());
    }
}
