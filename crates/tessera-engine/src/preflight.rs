//! Best-effort dependency preflight.
//!
//! Declared imports and the static imports of inline source are resolved and,
//! when a fetcher is available, fetched once to check they are reachable and
//! look like modules. Nothing is cached.

use tessera_core::specifier::{classify, scan_imports};
use tessera_core::{Plan, Result, SpecifierKind};
use tessera_resolver::{classify_content, ContentKind, HedgedFetcher};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::imports::host_permitted;

/// A dependency that failed its probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightFailure {
    pub specifier: String,
    pub reason: String,
}

/// Specifiers to probe, in declaration order without duplicates.
pub fn preflight_specifiers(plan: &Plan) -> Vec<String> {
    let mut specifiers: Vec<String> = Vec::new();
    let source_imports = plan
        .source
        .iter()
        .flat_map(|source| scan_imports(&source.code))
        .filter(|import| !import.dynamic)
        .map(|import| import.specifier);
    for specifier in plan.imports.iter().cloned().chain(source_imports) {
        let specifier = specifier.trim().to_string();
        if !specifier.is_empty() && !specifiers.contains(&specifier) {
            specifiers.push(specifier);
        }
    }
    specifiers
}

/// Probe every specifier; `resolve` maps a specifier to its URL. URLs
/// outside `allowed_hosts` fail without being fetched.
pub async fn probe_dependencies(
    specifiers: &[String],
    mut resolve: impl FnMut(&str) -> Option<String> + Send,
    allowed_hosts: Option<&[String]>,
    fetcher: Option<&HedgedFetcher>,
    cancel: &CancellationToken,
) -> Result<Vec<PreflightFailure>> {
    let mut failures = Vec::new();
    for specifier in specifiers {
        let Some(url) = resolve(specifier) else {
            failures.push(PreflightFailure {
                specifier: specifier.clone(),
                reason: "cannot be resolved".to_string(),
            });
            continue;
        };
        if !host_permitted(allowed_hosts, &url) {
            failures.push(PreflightFailure {
                specifier: specifier.clone(),
                reason: format!("{} is not on an allowed host", url),
            });
            continue;
        }

        let Some(fetcher) = fetcher else {
            continue;
        };
        if !matches!(classify(&url), SpecifierKind::Url | SpecifierKind::Data) {
            continue;
        }

        match fetcher.fetch_with_fallback(&url, cancel).await {
            Ok(fetched) => {
                let kind = classify_content(fetched.content_type.as_deref(), &fetched.final_url);
                debug!("Preflight reached {} as {:?}", url, kind);
                if kind == ContentKind::Binary {
                    failures.push(PreflightFailure {
                        specifier: specifier.clone(),
                        reason: format!("{} serves binary content", fetched.final_url),
                    });
                }
            }
            Err(err) if err.is_cancelled() => return Err(err.into()),
            Err(err) => failures.push(PreflightFailure {
                specifier: specifier.clone(),
                reason: err.to_string(),
            }),
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_core::{Node, SourceModule};
    use tessera_resolver::{FetchConfig, StaticFetcher};

    #[test]
    fn test_specifiers_are_collected_once() {
        let mut plan = Plan::new("p", Node::text("x"));
        plan.imports = vec!["lib/a".to_string(), "lib/b".to_string()];
        plan.source = Some(SourceModule {
            language: Default::default(),
            code: "import a from 'lib/a'; import c from 'lib/c'; const d = import('lib/d');".to_string(),
            export_name: None,
            runtime: Default::default(),
        });
        assert_eq!(preflight_specifiers(&plan), vec!["lib/a", "lib/b", "lib/c"]);
    }

    #[tokio::test]
    async fn test_unresolvable_and_unreachable() {
        let fetcher = HedgedFetcher::new(
            Arc::new(StaticFetcher::new().with_module("https://cdn.test/a.js", "text/javascript", "export default 1")),
            FetchConfig {
                max_retries: 0,
                ..FetchConfig::default()
            },
        );
        let specifiers = vec!["lib/a".to_string(), "lib/b".to_string(), "lib/missing".to_string()];
        let resolve = |specifier: &str| match specifier {
            "lib/a" => Some("https://cdn.test/a.js".to_string()),
            "lib/b" => Some("https://cdn.test/b.js".to_string()),
            _ => None,
        };

        let failures = probe_dependencies(&specifiers, resolve, None, Some(&fetcher), &CancellationToken::new())
            .await
            .unwrap();

        let failed: Vec<&str> = failures.iter().map(|f| f.specifier.as_str()).collect();
        assert_eq!(failed, vec!["lib/b", "lib/missing"]);
    }

    #[tokio::test]
    async fn test_disallowed_host_is_not_fetched() {
        let backend = Arc::new(
            StaticFetcher::new().with_module("https://evil.test/x.js", "text/javascript", "export default 1"),
        );
        let fetcher = HedgedFetcher::new(backend.clone(), FetchConfig::default());
        let specifiers = vec!["https://evil.test/x.js".to_string()];
        let allowed = vec!["cdn.test".to_string()];

        let failures = probe_dependencies(
            &specifiers,
            |specifier: &str| Some(specifier.to_string()),
            Some(allowed.as_slice()),
            Some(&fetcher),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.contains("not on an allowed host"));
        assert_eq!(backend.calls("https://evil.test/x.js"), 0);
    }
}
