//! Turning fetched payloads into self-contained, importable modules.
//!
//! Non-script payloads become small proxy modules whose default export is the
//! payload value. Script imports are resolved, materialized recursively and
//! replaced with `data:` URIs so the result loads without network access.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::BoxFuture;
use lru::LruCache;
use serde_json::Value;
use tessera_core::specifier::{classify, rewrite_imports, scan_imports};
use tessera_core::SpecifierKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FetchError, MaterializeError};
use crate::fetch::{FetchedModule, HedgedFetcher};
use crate::integrity::verify_integrity;

/// Resolves imports found inside fetched code and decides which targets
/// may be fetched.
pub trait ImportResolver: Send + Sync {
    /// URL for a bare specifier.
    fn resolve(&self, specifier: &str) -> Option<String>;

    /// Whether `url` may be fetched. A refused target fails the load.
    fn admit(&self, _url: &str) -> bool {
        true
    }
}

impl<F> ImportResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, specifier: &str) -> Option<String> {
        self(specifier)
    }
}

/// Payload classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Script,
    Stylesheet,
    Json,
    Binary,
    Text,
}

fn classify_extension(url: &str) -> Option<ContentKind> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let (_, ext) = path.rsplit_once('.')?;
    let kind = match ext.to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" => ContentKind::Script,
        "css" => ContentKind::Stylesheet,
        "json" | "map" => ContentKind::Json,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "ico" | "woff" | "woff2" | "ttf" | "otf"
        | "wasm" | "mp3" | "mp4" | "webm" | "pdf" | "zip" => ContentKind::Binary,
        "txt" | "md" | "svg" | "html" | "xml" | "csv" => ContentKind::Text,
        _ => return None,
    };
    Some(kind)
}

/// Classify a payload from its content type and URL extension.
///
/// A specific content type wins; generic or missing types defer to the extension.
pub fn classify_content(content_type: Option<&str>, url: &str) -> ContentKind {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let by_mime = match mime.as_str() {
        m if m.contains("javascript") || m.contains("ecmascript") || m.contains("typescript") || m == "text/jsx" => {
            Some(ContentKind::Script)
        }
        "text/css" => Some(ContentKind::Stylesheet),
        m if m == "application/json" || m == "text/json" || m.ends_with("+json") => Some(ContentKind::Json),
        "image/svg+xml" => Some(ContentKind::Text),
        m if m.starts_with("image/")
            || m.starts_with("audio/")
            || m.starts_with("video/")
            || m.starts_with("font/")
            || m == "application/wasm"
            || m == "application/pdf"
            || m == "application/zip" =>
        {
            Some(ContentKind::Binary)
        }
        _ => None,
    };

    by_mime
        .or_else(|| classify_extension(url))
        .unwrap_or(if mime == "application/octet-stream" {
            ContentKind::Binary
        } else {
            ContentKind::Text
        })
}

/// Encode module code as a `data:text/javascript;base64,` URI.
pub fn to_data_uri(code: &str) -> String {
    format!("data:text/javascript;base64,{}", STANDARD.encode(code))
}

fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// A module ready to be evaluated.
#[derive(Debug, Clone)]
pub struct MaterializedModule {
    /// URL the module was requested by.
    pub url: String,
    pub final_url: String,
    pub kind: ContentKind,
    /// Runnable module source.
    pub code: String,
    /// Every URL inlined into `code`, transitively.
    pub dependencies: Vec<String>,
    raw: Vec<u8>,
}

impl MaterializedModule {
    pub fn data_uri(&self) -> String {
        to_data_uri(&self.code)
    }

    /// The payload as fetched, before wrapping or rewriting.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Fetches, wraps and caches modules by original URL.
pub struct Materializer {
    fetcher: Arc<HedgedFetcher>,
    cache: Mutex<LruCache<String, Arc<MaterializedModule>>>,
    max_depth: usize,
}

impl Materializer {
    pub fn new(fetcher: Arc<HedgedFetcher>) -> Self {
        let config = fetcher.config();
        let capacity = NonZeroUsize::new(config.cache_max_entries).unwrap_or(NonZeroUsize::MIN);
        let max_depth = config.max_rewrite_depth;
        Self {
            fetcher,
            cache: Mutex::new(LruCache::new(capacity)),
            max_depth,
        }
    }

    pub fn fetcher(&self) -> &HedgedFetcher {
        &self.fetcher
    }

    pub fn cached(&self, url: &str) -> Option<Arc<MaterializedModule>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(url).cloned()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn store(&self, url: &str, module: Arc<MaterializedModule>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.put(url.to_string(), module);
    }

    /// Fetch, verify (when `integrity` is given) and materialize `url`.
    pub async fn load(
        &self,
        url: &str,
        integrity: Option<&str>,
        resolve: &dyn ImportResolver,
        cancel: &CancellationToken,
    ) -> Result<Arc<MaterializedModule>, MaterializeError> {
        self.load_inner(url.to_string(), integrity.map(str::to_string), resolve, cancel, 0, Vec::new())
            .await
    }

    /// Wrap an already fetched payload.
    pub async fn materialize(
        &self,
        fetched: FetchedModule,
        url: &str,
        resolve: &dyn ImportResolver,
        cancel: &CancellationToken,
    ) -> Result<MaterializedModule, MaterializeError> {
        let chain = vec![url.to_string()];
        self.materialize_inner(fetched, url, resolve, cancel, 0, &chain).await
    }

    /// Inline every resolvable import of `code` as a `data:` URI.
    pub async fn rewrite_source(
        &self,
        code: &str,
        resolve: &dyn ImportResolver,
        cancel: &CancellationToken,
    ) -> Result<String, MaterializeError> {
        let (code, _) = self
            .rewrite_inner(code.to_string(), None, resolve, cancel, 0, Vec::new())
            .await?;
        Ok(code)
    }

    fn load_inner<'a>(
        &'a self,
        url: String,
        integrity: Option<String>,
        resolve: &'a dyn ImportResolver,
        cancel: &'a CancellationToken,
        depth: usize,
        mut chain: Vec<String>,
    ) -> BoxFuture<'a, Result<Arc<MaterializedModule>, MaterializeError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled.into());
            }
            if !resolve.admit(&url) {
                return Err(MaterializeError::Blocked { url });
            }
            let verify = |bytes: &[u8]| -> Result<(), MaterializeError> {
                match &integrity {
                    Some(metadata) => verify_integrity(bytes, metadata).map_err(|source| {
                        MaterializeError::Integrity {
                            url: url.clone(),
                            source,
                        }
                    }),
                    None => Ok(()),
                }
            };

            if let Some(hit) = self.cached(&url) {
                debug!("Module cache hit for {}", url);
                if let Some(blocked) = hit.dependencies.iter().find(|dep| !resolve.admit(dep)) {
                    return Err(MaterializeError::Blocked { url: blocked.clone() });
                }
                verify(hit.raw())?;
                return Ok(hit);
            }

            let fetched = self.fetcher.fetch_with_fallback(&url, cancel).await?;
            verify(&fetched.bytes)?;
            if integrity.is_some() {
                info!("Verified integrity of {}", url);
            }

            chain.push(url.clone());
            let module = Arc::new(
                self.materialize_inner(fetched, &url, resolve, cancel, depth, &chain)
                    .await?,
            );
            self.store(&url, Arc::clone(&module));
            Ok(module)
        })
    }

    async fn materialize_inner(
        &self,
        fetched: FetchedModule,
        url: &str,
        resolve: &dyn ImportResolver,
        cancel: &CancellationToken,
        depth: usize,
        chain: &[String],
    ) -> Result<MaterializedModule, MaterializeError> {
        let kind = classify_content(fetched.content_type.as_deref(), &fetched.final_url);
        let text = fetched.text();
        let mut dependencies = Vec::new();
        let code = match kind {
            ContentKind::Script => {
                let (code, deps) = self
                    .rewrite_inner(text, Some(fetched.final_url.clone()), resolve, cancel, depth, chain.to_vec())
                    .await?;
                dependencies = deps;
                code
            }
            ContentKind::Stylesheet => format!(
                "const css = {};\nexport default css;\nexport {{ css }};\n",
                js_string(&text)
            ),
            ContentKind::Json => match serde_json::from_slice::<Value>(&fetched.bytes) {
                Ok(value) => format!("export default {};\n", value),
                Err(_) => format!("export default {};\n", js_string(&text)),
            },
            ContentKind::Binary => {
                let mime = fetched
                    .content_type
                    .as_deref()
                    .and_then(|ct| ct.split(';').next())
                    .unwrap_or("application/octet-stream");
                let data = format!("data:{};base64,{}", mime.trim(), STANDARD.encode(&fetched.bytes));
                format!("export default {};\n", js_string(&data))
            }
            ContentKind::Text => format!("export default {};\n", js_string(&text)),
        };
        debug!("Materialized {} as {:?}", url, kind);

        Ok(MaterializedModule {
            url: url.to_string(),
            final_url: fetched.final_url,
            kind,
            code,
            dependencies,
            raw: fetched.bytes,
        })
    }

    fn rewrite_inner<'a>(
        &'a self,
        code: String,
        base: Option<String>,
        resolve: &'a dyn ImportResolver,
        cancel: &'a CancellationToken,
        depth: usize,
        chain: Vec<String>,
    ) -> BoxFuture<'a, Result<(String, Vec<String>), MaterializeError>> {
        Box::pin(async move {
            let imports = scan_imports(&code);
            if imports.is_empty() {
                return Ok((code, Vec::new()));
            }
            let mut dependencies: Vec<String> = Vec::new();

            let base_url = base.as_deref().and_then(|b| Url::parse(b).ok());
            let mut replacements: HashMap<usize, String> = HashMap::new();
            for import in &imports {
                let specifier = import.specifier.as_str();
                let target = match classify(specifier) {
                    SpecifierKind::Data | SpecifierKind::Blob => None,
                    SpecifierKind::Url => Some(specifier.to_string()),
                    SpecifierKind::Relative => base_url
                        .as_ref()
                        .and_then(|b| b.join(specifier).ok())
                        .map(String::from),
                    SpecifierKind::Bare => resolve.resolve(specifier),
                };
                let Some(target) = target else {
                    debug!("Leaving import '{}' as written", specifier);
                    continue;
                };
                if !resolve.admit(&target) {
                    warn!("Import '{}' resolves to blocked target {}", specifier, target);
                    return Err(MaterializeError::Blocked { url: target });
                }

                if chain.contains(&target) {
                    warn!("Import cycle through {}; leaving it as a URL", target);
                    replacements.insert(import.range.start, target);
                    continue;
                }
                if depth + 1 > self.max_depth {
                    warn!("Import depth limit {} reached at {}", self.max_depth, target);
                    replacements.insert(import.range.start, target);
                    continue;
                }

                let module = self
                    .load_inner(target.clone(), None, resolve, cancel, depth + 1, chain.clone())
                    .await?;
                replacements.insert(import.range.start, module.data_uri());
                dependencies.push(target);
                dependencies.extend(module.dependencies.iter().cloned());
            }
            dependencies.sort();
            dependencies.dedup();

            let code = rewrite_imports(&code, &imports, |import| replacements.remove(&import.range.start));
            Ok((code, dependencies))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::fetch::StaticFetcher;
    use crate::integrity::{integrity_for, DigestAlgorithm};

    fn materializer(fetcher: StaticFetcher) -> (Arc<StaticFetcher>, Materializer) {
        let backend = Arc::new(fetcher);
        let config = FetchConfig {
            backoff_unit_ms: 1,
            max_retries: 0,
            ..FetchConfig::default()
        };
        let hedged = Arc::new(HedgedFetcher::new(backend.clone(), config));
        (backend, Materializer::new(hedged))
    }

    fn no_bare(_: &str) -> Option<String> {
        None
    }

    fn decode(uri: &str) -> String {
        let encoded = uri.trim_start_matches("data:text/javascript;base64,");
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_classify_content() {
        assert_eq!(classify_content(Some("text/javascript; charset=utf-8"), "https://x/a"), ContentKind::Script);
        assert_eq!(classify_content(Some("text/plain"), "https://x/a.mjs"), ContentKind::Script);
        assert_eq!(classify_content(None, "https://x/style.css?v=1"), ContentKind::Stylesheet);
        assert_eq!(classify_content(Some("application/manifest+json"), "https://x/m"), ContentKind::Json);
        assert_eq!(classify_content(Some("image/png"), "https://x/logo.js"), ContentKind::Binary);
        assert_eq!(classify_content(Some("application/octet-stream"), "https://x/blob"), ContentKind::Binary);
        assert_eq!(classify_content(Some("text/plain"), "https://x/readme"), ContentKind::Text);
    }

    #[tokio::test]
    async fn test_script_imports_are_inlined_and_cached() {
        let (backend, materializer) = materializer(
            StaticFetcher::new()
                .with_module(
                    "https://cdn.test/pkg/index.js",
                    "text/javascript",
                    "import helper from './helper.js';\nexport default helper + 1;",
                )
                .with_module("https://cdn.test/pkg/helper.js", "text/javascript", "export default 41;"),
        );
        let cancel = CancellationToken::new();

        let module = materializer
            .load("https://cdn.test/pkg/index.js", None, &no_bare, &cancel)
            .await
            .unwrap();

        assert!(module.code.contains("data:text/javascript;base64,"));
        assert!(!module.code.contains("./helper.js"));
        assert_eq!(materializer.cached_entries(), 2);

        materializer
            .load("https://cdn.test/pkg/index.js", None, &no_bare, &cancel)
            .await
            .unwrap();
        assert_eq!(backend.calls("https://cdn.test/pkg/index.js"), 1);
    }

    #[tokio::test]
    async fn test_bare_imports_use_resolver() {
        let (_, materializer) = materializer(
            StaticFetcher::new()
                .with_module("https://cdn.test/app.js", "text/javascript", "import x from 'lib';\nexport default x;")
                .with_module("https://cdn.test/lib.js", "text/javascript", "export default 'lib';"),
        );
        let resolve = |spec: &str| (spec == "lib").then(|| "https://cdn.test/lib.js".to_string());

        let module = materializer
            .load("https://cdn.test/app.js", None, &resolve, &CancellationToken::new())
            .await
            .unwrap();

        let uri = module.code.split('\'').nth(1).unwrap();
        assert_eq!(decode(uri), "export default 'lib';");
    }

    #[tokio::test]
    async fn test_non_script_proxies() {
        let (_, materializer) = materializer(
            StaticFetcher::new()
                .with_module("https://cdn.test/data.json", "application/json", r#"{"a":1}"#)
                .with_module("https://cdn.test/site.css", "text/css", "body { color: red; }")
                .with_module("https://cdn.test/logo.png", "image/png", vec![0u8, 1, 2]),
        );
        let cancel = CancellationToken::new();

        let json = materializer.load("https://cdn.test/data.json", None, &no_bare, &cancel).await.unwrap();
        assert_eq!(json.code, "export default {\"a\":1};\n");

        let css = materializer.load("https://cdn.test/site.css", None, &no_bare, &cancel).await.unwrap();
        assert!(css.code.contains("\"body { color: red; }\""));
        assert!(css.code.contains("export { css }"));

        let png = materializer.load("https://cdn.test/logo.png", None, &no_bare, &cancel).await.unwrap();
        assert!(png.code.contains("data:image/png;base64,AAEC"));
    }

    #[tokio::test]
    async fn test_integrity_is_checked() {
        let body = "export default 1;";
        let (_, materializer) = materializer(
            StaticFetcher::new().with_module("https://cdn.test/a.js", "text/javascript", body),
        );
        let cancel = CancellationToken::new();

        let wrong = integrity_for(DigestAlgorithm::Sha256, b"tampered");
        let err = materializer
            .load("https://cdn.test/a.js", Some(&wrong), &no_bare, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::Integrity { .. }));
        assert_eq!(materializer.cached_entries(), 0);

        let right = integrity_for(DigestAlgorithm::Sha256, body.as_bytes());
        assert!(materializer
            .load("https://cdn.test/a.js", Some(&right), &no_bare, &cancel)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_import_cycle_terminates() {
        let (_, materializer) = materializer(
            StaticFetcher::new()
                .with_module("https://cdn.test/a.js", "text/javascript", "import b from './b.js';\nexport default 'a';")
                .with_module("https://cdn.test/b.js", "text/javascript", "import a from './a.js';\nexport default 'b';"),
        );

        let module = materializer
            .load("https://cdn.test/a.js", None, &no_bare, &CancellationToken::new())
            .await
            .unwrap();
        let inner = decode(module.code.split('\'').nth(1).unwrap());
        assert!(inner.contains("https://cdn.test/a.js"));
    }

    #[tokio::test]
    async fn test_rewrite_inline_source() {
        let (_, materializer) = materializer(
            StaticFetcher::new().with_module("https://cdn.test/lib.js", "text/javascript", "export const n = 2;"),
        );
        let code = "import { n } from 'https://cdn.test/lib.js';\nexport default function (input) { return input.x * n; }";

        let rewritten = materializer
            .rewrite_source(code, &no_bare, &CancellationToken::new())
            .await
            .unwrap();
        assert!(rewritten.starts_with("import { n } from 'data:text/javascript;base64,"));
    }

    /// Admits only URLs under one origin.
    struct OnlyHost(&'static str);

    impl ImportResolver for OnlyHost {
        fn resolve(&self, _specifier: &str) -> Option<String> {
            None
        }

        fn admit(&self, url: &str) -> bool {
            url.starts_with(self.0)
        }
    }

    #[tokio::test]
    async fn test_refused_nested_import_fails_the_load() {
        let (backend, materializer) = materializer(
            StaticFetcher::new()
                .with_module("https://cdn.test/card.js", "text/javascript", "import x from 'https://evil.test/x.js';\nexport default x;")
                .with_module("https://evil.test/x.js", "text/javascript", "export default 'fetched from evil.test';"),
        );
        let cancel = CancellationToken::new();

        let err = materializer
            .load("https://cdn.test/card.js", None, &OnlyHost("https://cdn.test/"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::Blocked { ref url } if url == "https://evil.test/x.js"));
        assert_eq!(backend.calls("https://evil.test/x.js"), 0);

        let inline = "import x from 'https://evil.test/x.js';\nexport default x;";
        let err = materializer
            .rewrite_source(inline, &OnlyHost("https://cdn.test/"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_cached_module_is_rechecked_against_its_dependencies() {
        let (_, materializer) = materializer(
            StaticFetcher::new()
                .with_module("https://cdn.test/card.js", "text/javascript", "import x from 'https://evil.test/x.js';\nexport default x;")
                .with_module("https://evil.test/x.js", "text/javascript", "export default 1;"),
        );
        let cancel = CancellationToken::new();

        let open = materializer
            .load("https://cdn.test/card.js", None, &no_bare, &cancel)
            .await
            .unwrap();
        assert_eq!(open.dependencies, vec!["https://evil.test/x.js".to_string()]);

        let err = materializer
            .load("https://cdn.test/card.js", None, &OnlyHost("https://cdn.test/"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::Blocked { .. }));
    }
}
