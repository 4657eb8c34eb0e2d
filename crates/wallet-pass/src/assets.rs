use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, warn};

use crate::wallet_config::AppleWalletConfig;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FETCH_RETRIES: u32 = 1;
const CACHE_BUST_PARAM: &str = "v";

/// Why an image could not be fetched. Always degraded to "absent" by callers.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} fetching {url}")]
    Status { status: u16, url: String },
}

impl FetchError {
    /// Connect and timeout failures are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Http(err) if err.is_connect() || err.is_timeout())
    }
}

/// Source of pass images. A missing or unreachable image is `None`, never an error.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>>;
}

#[derive(Clone, Copy, Debug)]
pub struct ImageFetchOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for ImageFetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            retries: DEFAULT_FETCH_RETRIES,
        }
    }
}

/// Fetches images over HTTP(S) with a per-request timeout and a cache-busting query.
#[derive(Clone)]
pub struct HttpImageSource {
    http: reqwest::Client,
    options: ImageFetchOptions,
}

impl HttpImageSource {
    pub fn new(options: ImageFetchOptions) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(options.timeout).build()?;
        Ok(Self { http, options })
    }

    pub fn with_client(http: reqwest::Client, options: ImageFetchOptions) -> Self {
        Self { http, options }
    }

    pub async fn try_fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let target = cache_busted(url, unix_millis())?;
        let mut attempt = 0;
        loop {
            match self.fetch_once(&target).await {
                Err(err) if err.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    debug!(url, attempt, error = %err, "retrying image fetch");
                }
                outcome => return outcome,
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        match self.try_fetch(url).await {
            Ok(bytes) => {
                debug!(url, bytes = bytes.len(), "fetched image");
                Some(bytes)
            }
            Err(err) => {
                warn!(url, error = %err, "image fetch failed; continuing without it");
                None
            }
        }
    }
}

/// Appends `v=<unix-millis>` to defeat CDN caching of updated artwork.
pub fn cache_busted(url: &str, millis: u128) -> Result<Url, FetchError> {
    let mut parsed = Url::parse(url.trim()).map_err(|err| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }
    parsed
        .query_pairs_mut()
        .append_pair(CACHE_BUST_PARAM, &millis.to_string());
    Ok(parsed)
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// Raw bytes of the three configurable pass images.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassImages {
    pub icon: Option<Vec<u8>>,
    pub logo: Option<Vec<u8>>,
    pub strip: Option<Vec<u8>>,
}

/// Fetches icon, logo and strip concurrently and waits for all three.
pub async fn fetch_pass_images(source: &dyn ImageSource, config: &AppleWalletConfig) -> PassImages {
    let (icon, logo, strip) = tokio::join!(
        fetch_optional(source, config.icon_uri.as_deref()),
        fetch_optional(source, config.logo_uri.as_deref()),
        fetch_optional(source, config.strip_image_uri.as_deref()),
    );
    if strip.is_none() && config.strip_image_uri.is_some() {
        warn!("strip image configured but unavailable; pass will have no strip or thumbnail");
    }
    PassImages { icon, logo, strip }
}

async fn fetch_optional(source: &dyn ImageSource, uri: Option<&str>) -> Option<Vec<u8>> {
    match uri {
        Some(uri) => source.fetch(uri).await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::panic;

    fn start_server() -> Option<MockServer> {
        panic::catch_unwind(MockServer::start).ok()
    }

    fn source() -> HttpImageSource {
        HttpImageSource::new(ImageFetchOptions {
            timeout: Duration::from_secs(2),
            retries: 1,
        })
        .unwrap()
    }

    #[test]
    fn cache_buster_respects_existing_query() {
        let plain = cache_busted("https://cdn.example.com/icon.png", 42).unwrap();
        assert_eq!(plain.as_str(), "https://cdn.example.com/icon.png?v=42");
        let query = cache_busted("https://cdn.example.com/icon.png?w=58", 42).unwrap();
        assert_eq!(query.as_str(), "https://cdn.example.com/icon.png?w=58&v=42");
    }

    #[test]
    fn malformed_urls_are_rejected() {
        assert!(matches!(
            cache_busted("not a url", 1),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            cache_busted("file:///etc/passwd", 1),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn fetches_image_bytes() {
        let Some(server) = start_server() else {
            eprintln!("skipping: unable to bind mock server in this environment");
            return;
        };
        let mock = server.mock(|when, then| {
            when.method(GET).path("/icon.png").query_param_exists("v");
            then.status(200).body(b"\x89PNG");
        });

        let bytes = source().fetch(&server.url("/icon.png")).await;
        assert_eq!(bytes, Some(b"\x89PNG".to_vec()));
        mock.assert();
    }

    #[tokio::test]
    async fn non_success_status_is_absent() {
        let Some(server) = start_server() else {
            eprintln!("skipping: unable to bind mock server in this environment");
            return;
        };
        server.mock(|when, then| {
            when.method(GET).path("/missing.png");
            then.status(404);
        });

        let err = source().try_fetch(&server.url("/missing.png")).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!err.is_transient());
        assert!(source().fetch(&server.url("/missing.png")).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_absent() {
        let err = source()
            .try_fetch("http://127.0.0.1:1/strip.png")
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(source().fetch("http://127.0.0.1:1/strip.png").await.is_none());
    }

    #[tokio::test]
    async fn only_configured_images_are_fetched() {
        let Some(server) = start_server() else {
            eprintln!("skipping: unable to bind mock server in this environment");
            return;
        };
        let logo = server.mock(|when, then| {
            when.method(GET).path("/logo.png");
            then.status(200).body("logo");
        });
        let config: AppleWalletConfig = serde_json::from_value(serde_json::json!({
            "logoUri": server.url("/logo.png"),
            "stripImageUri": "http://127.0.0.1:1/strip.png"
        }))
        .unwrap();

        let images = fetch_pass_images(&source(), &config).await;
        assert_eq!(images.logo.as_deref(), Some(&b"logo"[..]));
        assert!(images.icon.is_none());
        assert!(images.strip.is_none());
        logo.assert();
    }
}
