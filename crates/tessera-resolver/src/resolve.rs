//! Specifier → URL resolution through the module manifest.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use tessera_core::specifier::classify;
use tessera_core::{Diagnostic, DiagnosticCode, Diagnostics, ManifestEntry, ModuleManifest, SpecifierKind};
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchConfig;

/// Why a specifier is being resolved; used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveUsage {
    Import,
    Component,
    SourceImport,
    Preflight,
}

impl fmt::Display for ResolveUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolveUsage::Import => "import",
            ResolveUsage::Component => "component",
            ResolveUsage::SourceImport => "source import",
            ResolveUsage::Preflight => "preflight",
        })
    }
}

/// Checks a manifest entry's resolved URL; returns a reason when unusable.
fn validate_entry(entry: &ManifestEntry) -> Result<(), String> {
    let resolved = entry.resolved_url.trim();
    if resolved.is_empty() {
        return Err("resolvedUrl is empty".to_string());
    }
    match classify(resolved) {
        SpecifierKind::Url => Url::parse(resolved).map(|_| ()).map_err(|e| e.to_string()),
        SpecifierKind::Bare => Err(format!("resolvedUrl '{}' is not a URL, path or data URI", resolved)),
        _ => Ok(()),
    }
}

/// Resolves specifiers against a manifest, with a CDN fallback for bare
/// specifiers when the manifest is not enforced.
pub struct ManifestResolver {
    enforce_manifest: bool,
    fallback_cdn_base: Option<String>,
    cache: Mutex<LruCache<String, String>>,
}

impl ManifestResolver {
    pub fn new(config: &FetchConfig, enforce_manifest: bool) -> Self {
        let capacity = NonZeroUsize::new(config.resolution_cache_max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            enforce_manifest,
            fallback_cdn_base: config
                .fallback_cdn_base
                .as_ref()
                .map(|base| base.trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn enforces_manifest(&self) -> bool {
        self.enforce_manifest
    }

    /// Resolve `specifier`, emitting a diagnostic when it cannot be.
    ///
    /// Direct forms (URL, relative path, data/blob URI) pass through. Bare
    /// specifiers need a valid manifest entry when the manifest is enforced.
    pub fn resolve_specifier(
        &self,
        specifier: &str,
        manifest: &ModuleManifest,
        usage: ResolveUsage,
        diagnostics: &mut Diagnostics,
    ) -> Option<String> {
        let specifier = specifier.trim();
        if classify(specifier).is_direct() {
            return Some(specifier.to_string());
        }

        if let Some(entry) = manifest.get(specifier) {
            return match validate_entry(entry) {
                Ok(()) => Some(entry.resolved_url.trim().to_string()),
                Err(reason) => {
                    warn!("Invalid manifest entry for {} '{}': {}", usage, specifier, reason);
                    diagnostics.push(Diagnostic::warning(
                        DiagnosticCode::ManifestInvalid,
                        format!("Manifest entry for {} '{}' is invalid: {}", usage, specifier, reason),
                    ));
                    None
                }
            };
        }

        if self.enforce_manifest {
            warn!("No manifest entry for {} '{}'", usage, specifier);
            diagnostics.push(Diagnostic::warning(
                DiagnosticCode::ManifestMissing,
                format!("No manifest entry for {} '{}'", usage, specifier),
            ));
            return None;
        }

        match self.fallback(specifier) {
            Some(url) => Some(url),
            None => {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::ManifestMissing,
                    format!("Cannot resolve {} '{}': no manifest entry and no fallback CDN", usage, specifier),
                ));
                None
            }
        }
    }

    /// Resolve without diagnostics, for imports found inside fetched code.
    pub fn resolve_quiet(&self, specifier: &str, manifest: &ModuleManifest) -> Option<String> {
        let mut sink = Diagnostics::new();
        self.resolve_specifier(specifier, manifest, ResolveUsage::SourceImport, &mut sink)
    }

    /// Fallback CDN URL for a bare specifier, cached.
    pub fn fallback(&self, specifier: &str) -> Option<String> {
        let base = self.fallback_cdn_base.as_ref()?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(specifier) {
            debug!("Resolution cache hit for '{}'", specifier);
            return Some(hit.clone());
        }
        let url = format!("{}/{}", base, specifier.trim_start_matches('/'));
        cache.put(specifier.to_string(), url.clone());
        Some(url)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ModuleManifest {
        let mut manifest = ModuleManifest::new();
        manifest.insert("widgets/card".to_string(), ManifestEntry::new("https://cdn.test/card.js"));
        manifest.insert("widgets/broken".to_string(), ManifestEntry::new("not a url"));
        manifest
    }

    #[test]
    fn test_missing_bare_specifier_with_enforcement() {
        let resolver = ManifestResolver::new(&FetchConfig::default(), true);
        let mut diagnostics = Diagnostics::new();

        let resolved = resolver.resolve_specifier("widgets/chart", &manifest(), ResolveUsage::Component, &mut diagnostics);

        assert!(resolved.is_none());
        assert!(diagnostics.contains(DiagnosticCode::ManifestMissing));
    }

    #[test]
    fn test_direct_forms_bypass_manifest() {
        let resolver = ManifestResolver::new(&FetchConfig::default(), true);
        let mut diagnostics = Diagnostics::new();
        for specifier in ["https://x.test/a.js", "./local.js", "/abs.js", "data:text/javascript,1"] {
            assert_eq!(
                resolver
                    .resolve_specifier(specifier, &ModuleManifest::new(), ResolveUsage::Import, &mut diagnostics)
                    .as_deref(),
                Some(specifier)
            );
        }
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_manifest_hit_and_invalid_entry() {
        let resolver = ManifestResolver::new(&FetchConfig::default(), true);
        let mut diagnostics = Diagnostics::new();

        let hit = resolver.resolve_specifier("widgets/card", &manifest(), ResolveUsage::Import, &mut diagnostics);
        assert_eq!(hit.as_deref(), Some("https://cdn.test/card.js"));

        let bad = resolver.resolve_specifier("widgets/broken", &manifest(), ResolveUsage::Import, &mut diagnostics);
        assert!(bad.is_none());
        assert!(diagnostics.contains(DiagnosticCode::ManifestInvalid));
    }

    #[test]
    fn test_fallback_cdn_when_not_enforced() {
        let config = FetchConfig {
            fallback_cdn_base: Some("https://esm.test/".to_string()),
            resolution_cache_max_entries: 1,
            ..FetchConfig::default()
        };
        let resolver = ManifestResolver::new(&config, false);

        assert_eq!(
            resolver.resolve_quiet("lodash", &ModuleManifest::new()).as_deref(),
            Some("https://esm.test/lodash")
        );
        resolver.resolve_quiet("react", &ModuleManifest::new());
        assert_eq!(resolver.cached_entries(), 1);
    }

    #[test]
    fn test_no_fallback_configured() {
        let config = FetchConfig {
            fallback_cdn_base: None,
            ..FetchConfig::default()
        };
        let resolver = ManifestResolver::new(&config, false);
        let mut diagnostics = Diagnostics::new();
        assert!(resolver
            .resolve_specifier("lodash", &ModuleManifest::new(), ResolveUsage::Import, &mut diagnostics)
            .is_none());
        assert!(diagnostics.contains(DiagnosticCode::ManifestMissing));
    }
}
