//! Resolution and host admission for imports found inside fetched code.

use std::sync::Arc;

use tessera_core::ModuleManifest;
use tessera_policy::is_host_allowed;
use tessera_resolver::{ImportResolver, ManifestResolver};
use tracing::warn;

/// Whether `url` may be fetched under `allowed_hosts`. Only http(s) targets
/// are subject to the list; `None` allows every host.
pub fn host_permitted(allowed_hosts: Option<&[String]>, url: &str) -> bool {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return true;
    }
    match allowed_hosts {
        None => true,
        Some(patterns) => is_host_allowed(patterns, url),
    }
}

/// Resolves bare imports through a plan's manifest and admits only
/// targets on the allowed hosts.
pub struct ManifestImports {
    resolver: Arc<ManifestResolver>,
    manifest: ModuleManifest,
    allowed_hosts: Option<Vec<String>>,
}

impl ManifestImports {
    pub fn new(resolver: Arc<ManifestResolver>, manifest: ModuleManifest, allowed_hosts: Option<Vec<String>>) -> Self {
        Self {
            resolver,
            manifest,
            allowed_hosts,
        }
    }
}

impl ImportResolver for ManifestImports {
    fn resolve(&self, specifier: &str) -> Option<String> {
        self.resolver.resolve_quiet(specifier, &self.manifest)
    }

    fn admit(&self, url: &str) -> bool {
        let allowed = host_permitted(self.allowed_hosts.as_deref(), url);
        if !allowed {
            warn!("Refusing to fetch {}: host is not allowed", url);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ManifestEntry;
    use tessera_resolver::FetchConfig;

    #[test]
    fn test_host_permitted() {
        let allowed = vec!["cdn.test".to_string()];
        let allowed = Some(allowed.as_slice());
        assert!(host_permitted(allowed, "https://cdn.test/a.js"));
        assert!(!host_permitted(allowed, "https://evil.test/a.js"));
        assert!(host_permitted(allowed, "data:text/javascript,export default 1"));
        assert!(host_permitted(None, "https://evil.test/a.js"));
        assert!(!host_permitted(Some(&[][..]), "http://cdn.test/a.js"));
    }

    #[test]
    fn test_manifest_imports_resolve_and_admit() {
        let mut manifest = ModuleManifest::new();
        manifest.insert("lib".to_string(), ManifestEntry::new("https://evil.test/lib.js"));
        let imports = ManifestImports::new(
            Arc::new(ManifestResolver::new(&FetchConfig::default(), true)),
            manifest,
            Some(vec!["cdn.test".to_string()]),
        );

        let url = imports.resolve("lib").unwrap();
        assert_eq!(url, "https://evil.test/lib.js");
        assert!(!imports.admit(&url));
        assert!(imports.admit("https://cdn.test/ok.js"));
    }
}
