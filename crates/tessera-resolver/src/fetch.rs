//! Module fetching with mirror fallback, retries and hedged attempts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::{FuturesUnordered, StreamExt};
use tessera_core::specifier::classify;
use tessera_core::SpecifierKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::LinearBackoff;
use crate::config::FetchConfig;
use crate::error::FetchError;

/// Raw payload of a fetched module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedModule {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL the payload was actually served from, after mirrors and redirects.
    pub final_url: String,
}

impl FetchedModule {
    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Transport used to fetch a single URL.
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError>;
}

impl FetchError {
    /// Client errors other than 408/429 will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => !(400..500).contains(status) || *status == 408 || *status == 429,
            FetchError::InvalidUrl(_) | FetchError::InvalidDataUri(_) | FetchError::Client(_) | FetchError::Cancelled => false,
            _ => true,
        }
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]));
            if let (Some(hi), Some(lo)) = hex {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Decode a `data:` URI locally.
pub fn decode_data_uri(uri: &str) -> Result<FetchedModule, FetchError> {
    let trimmed = uri.trim();
    if !trimmed.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return Err(FetchError::InvalidDataUri("missing data: scheme".to_string()));
    }
    let (meta, payload) = trimmed[5..]
        .split_once(',')
        .ok_or_else(|| FetchError::InvalidDataUri("missing ',' separator".to_string()))?;

    let base64_at = meta
        .len()
        .checked_sub(7)
        .filter(|&at| meta.get(at..).is_some_and(|tail| tail.eq_ignore_ascii_case(";base64")));
    let (media_type, base64) = match base64_at {
        Some(at) => (&meta[..at], true),
        None => (meta, false),
    };
    let content_type = if media_type.is_empty() {
        "text/plain;charset=US-ASCII".to_string()
    } else {
        media_type.to_string()
    };

    let bytes = if base64 {
        let cleaned: Vec<u8> = percent_decode(payload)
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        STANDARD
            .decode(cleaned)
            .map_err(|e| FetchError::InvalidDataUri(e.to_string()))?
    } else {
        percent_decode(payload)
    };

    Ok(FetchedModule {
        bytes,
        content_type: Some(content_type),
        final_url: trimmed.to_string(),
    })
}

/// Fetches over HTTP with reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ModuleFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError> {
        if classify(url) == SpecifierKind::Data {
            return decode_data_uri(url);
        }
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().to_string();
        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(FetchedModule {
            bytes: bytes.to_vec(),
            content_type,
            final_url,
        })
    }
}

struct StaticModule {
    body: Vec<u8>,
    content_type: String,
    failures: u32,
    delay: Duration,
}

/// In-memory fetcher serving fixed payloads. Unknown URLs answer 404.
#[derive(Default)]
pub struct StaticFetcher {
    modules: HashMap<String, StaticModule>,
    calls: Mutex<HashMap<String, u32>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_flaky_module(url, content_type, body, 0)
    }

    /// Serve `body` only after the first `failures` requests fail.
    pub fn with_flaky_module(
        mut self,
        url: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
        failures: u32,
    ) -> Self {
        self.modules.insert(
            url.to_string(),
            StaticModule {
                body: body.into(),
                content_type: content_type.to_string(),
                failures,
                delay: Duration::ZERO,
            },
        );
        self
    }

    /// Delay every response for `url`.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        if let Some(module) = self.modules.get_mut(url) {
            module.delay = delay;
        }
        self
    }

    /// Number of requests seen for `url`.
    pub fn calls(&self, url: &str) -> u32 {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModuleFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let Some(module) = self.modules.get(url) else {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        };
        if !module.delay.is_zero() {
            tokio::time::sleep(module.delay).await;
        }
        if call <= module.failures {
            return Err(FetchError::Transport {
                url: url.to_string(),
                message: format!("simulated failure {}", call),
            });
        }
        Ok(FetchedModule {
            bytes: module.body.clone(),
            content_type: Some(module.content_type.clone()),
            final_url: url.to_string(),
        })
    }
}

/// Retry one candidate with linear backoff.
async fn attempt_candidate(
    fetcher: Arc<dyn ModuleFetcher>,
    url: String,
    start_delay: Duration,
    max_retries: u32,
    unit: Duration,
    timeout: Duration,
) -> Result<FetchedModule, FetchError> {
    if !start_delay.is_zero() {
        tokio::time::sleep(start_delay).await;
    }

    let mut backoff = LinearBackoff::new(unit, unit * max_retries.max(1));
    loop {
        debug!("Fetching {} (attempt {})", url, backoff.attempt + 1);
        let result = match tokio::time::timeout(timeout, fetcher.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { url: url.clone() }),
        };

        match result {
            Ok(module) => return Ok(module),
            Err(err) if !err.is_retryable() || backoff.exceeded_max_attempts(max_retries) => return Err(err),
            Err(err) => {
                let delay = backoff.next_delay();
                warn!("Fetch of {} failed ({}), retrying in {:?}", url, err, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Fetches a URL from its origin and configured mirrors, first success wins.
pub struct HedgedFetcher {
    fetcher: Arc<dyn ModuleFetcher>,
    config: FetchConfig,
}

impl HedgedFetcher {
    pub fn new(fetcher: Arc<dyn ModuleFetcher>, config: FetchConfig) -> Self {
        Self { fetcher, config }
    }

    /// Hedged fetcher over reqwest.
    pub fn http(config: FetchConfig) -> Result<Self, FetchError> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Ok(Self::new(fetcher, config))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The original URL followed by one derived URL per mirror, deduplicated.
    pub fn candidates(&self, url: &str) -> Vec<String> {
        let mut candidates = vec![url.to_string()];
        let Ok(parsed) = Url::parse(url) else {
            return candidates;
        };
        for mirror in &self.config.mirrors {
            let mut derived = format!("{}{}", mirror.trim_end_matches('/'), parsed.path());
            if let Some(query) = parsed.query() {
                derived.push('?');
                derived.push_str(query);
            }
            if !candidates.contains(&derived) {
                candidates.push(derived);
            }
        }
        candidates
    }

    /// Fetch `url`, racing staggered mirror attempts.
    ///
    /// Losing attempts are dropped as soon as one succeeds, which cancels
    /// their in-flight requests.
    pub async fn fetch_with_fallback(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedModule, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if classify(url) == SpecifierKind::Data {
            return decode_data_uri(url);
        }

        let candidates = self.candidates(url);
        let total = candidates.len();
        let mut pending: FuturesUnordered<_> = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| {
                let fetcher = Arc::clone(&self.fetcher);
                let delay = self.config.hedge_delay(index);
                let max_retries = self.config.max_retries;
                let unit = self.config.backoff_unit();
                let timeout = self.config.request_timeout();
                async move {
                    let result =
                        attempt_candidate(fetcher, candidate.clone(), delay, max_retries, unit, timeout).await;
                    (candidate, result)
                }
            })
            .collect();

        let mut last_error = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Fetch of {} cancelled", url);
                    return Err(FetchError::Cancelled);
                }
                next = pending.next() => match next {
                    Some((candidate, Ok(module))) => {
                        if candidate != url {
                            info!("Fetched {} from mirror {}", url, candidate);
                        }
                        return Ok(module);
                    }
                    Some((candidate, Err(err))) => {
                        warn!("Candidate {} for {} exhausted: {}", candidate, url, err);
                        last_error = Some(err);
                    }
                    None => break,
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: total,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mirrors: &[&str], max_retries: u32) -> FetchConfig {
        FetchConfig {
            mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
            max_retries,
            backoff_unit_ms: 1,
            hedge_delay_multiplier: 2,
            request_timeout_ms: 1_000,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_candidates_are_deduplicated() {
        let fetcher = HedgedFetcher::new(
            Arc::new(StaticFetcher::new()),
            config(&["https://m1.test/", "https://m1.test", "https://m2.test"], 0),
        );
        assert_eq!(
            fetcher.candidates("https://cdn.test/pkg/a.js?x=1"),
            vec![
                "https://cdn.test/pkg/a.js?x=1",
                "https://m1.test/pkg/a.js?x=1",
                "https://m2.test/pkg/a.js?x=1",
            ]
        );
    }

    #[tokio::test]
    async fn test_mirror_wins_when_origin_fails() {
        let backend = Arc::new(StaticFetcher::new().with_module(
            "https://mirror.test/lib.js",
            "text/javascript",
            "export default 1;",
        ));
        let fetcher = HedgedFetcher::new(backend.clone(), config(&["https://mirror.test"], 1));

        let module = fetcher
            .fetch_with_fallback("https://cdn.test/lib.js", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(module.final_url, "https://mirror.test/lib.js");
        // 404 is not retried.
        assert_eq!(backend.calls("https://cdn.test/lib.js"), 1);
    }

    #[tokio::test]
    async fn test_flaky_origin_recovers_with_retries() {
        let backend = Arc::new(StaticFetcher::new().with_flaky_module(
            "https://cdn.test/a.js",
            "text/javascript",
            "export default 2;",
            2,
        ));
        let fetcher = HedgedFetcher::new(backend.clone(), config(&[], 2));

        let module = fetcher
            .fetch_with_fallback("https://cdn.test/a.js", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(module.text(), "export default 2;");
        assert_eq!(backend.calls("https://cdn.test/a.js"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_all_candidates_fail() {
        let backend = Arc::new(StaticFetcher::new().with_flaky_module(
            "https://cdn.test/a.js",
            "text/javascript",
            "x",
            100,
        ));
        let fetcher = HedgedFetcher::new(backend.clone(), config(&[], 2));

        let err = fetcher
            .fetch_with_fallback("https://cdn.test/a.js", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 1, .. }));
        assert_eq!(backend.calls("https://cdn.test/a.js"), 3);
    }

    #[tokio::test]
    async fn test_cancelled_fetch() {
        let backend = Arc::new(
            StaticFetcher::new()
                .with_module("https://cdn.test/slow.js", "text/javascript", "x")
                .with_delay("https://cdn.test/slow.js", Duration::from_secs(30)),
        );
        let fetcher = HedgedFetcher::new(backend, config(&[], 0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = fetcher
            .fetch_with_fallback("https://cdn.test/slow.js", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_decode_data_uris() {
        let encoded = decode_data_uri("data:text/javascript;base64,ZXhwb3J0IGRlZmF1bHQgNDI7").unwrap();
        assert_eq!(encoded.text(), "export default 42;");
        assert_eq!(encoded.content_type.as_deref(), Some("text/javascript"));

        let plain = decode_data_uri("data:,Hello%2C%20World").unwrap();
        assert_eq!(plain.text(), "Hello, World");
        assert_eq!(plain.content_type.as_deref(), Some("text/plain;charset=US-ASCII"));

        assert!(decode_data_uri("data:text/plain").is_err());
        assert!(decode_data_uri("https://x.test").is_err());
    }

    #[test]
    fn test_decode_data_uri_with_multibyte_media_type() {
        let short = decode_data_uri("data:éééé,x").unwrap();
        assert_eq!(short.content_type.as_deref(), Some("éééé"));
        assert_eq!(short.text(), "x");

        let split = decode_data_uri("data:text/é;base64,eA==").unwrap();
        assert_eq!(split.content_type.as_deref(), Some("text/é"));
        assert_eq!(split.text(), "x");
    }

    #[test]
    fn test_http_fetcher_reports_client_build_errors() {
        let config = FetchConfig {
            user_agent: "tessera\nagent".to_string(),
            ..FetchConfig::default()
        };
        let err = HttpFetcher::new(&config).err().unwrap();
        assert!(matches!(err, FetchError::Client(_)));
        assert!(!err.is_retryable());

        assert!(HttpFetcher::new(&FetchConfig::default()).is_ok());
    }
}
