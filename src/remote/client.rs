use super::types::{
    AddWatchlistRequest, MarketSnapshot, NewsPage, NewsResponse, TickerMatch, ViewRequest,
    ViewResponse, WatchlistEntry,
};
use super::FeedService;
use crate::feed::NewsQuery;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_DETAIL_LEN: usize = 200;
/// Upper bound on a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Errors from the remote service layer.
///
/// [`RemoteError::is_transient`] separates failures that the next poll or user action
/// will naturally retry from ones that will not go away on their own.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx response. `detail` is the server's human-readable reason, if it gave one.
    #[error("HTTP error: status {status}")]
    Status { status: u16, detail: Option<String> },
    /// Body was not the JSON shape we expected
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else {
            RemoteError::Network(err)
        }
    }
}

impl RemoteError {
    /// Timeouts, transport failures, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout | RemoteError::Network(_) => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Decode(_)
            | RemoteError::ResponseTooLarge(_)
            | RemoteError::InvalidUrl(_) => false,
        }
    }

    /// Reason to show the user: the server's own wording when available.
    pub fn detail(&self) -> String {
        match self {
            RemoteError::Status {
                detail: Some(detail),
                ..
            } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Timeout and retry policy for [`HttpFeedService`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    /// Retries for idempotent reads. Mutations are sent once.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// [`FeedService`] over the dashboard's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpFeedService {
    client: reqwest::Client,
    base: Url,
    settings: ClientSettings,
}

impl HttpFeedService {
    pub fn new(base: Url, settings: ClientSettings) -> Result<Self, RemoteError> {
        // Keep a few warm connections: the feed and ticker poll the same host every tick
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("marketfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            settings,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Validated base URLs are always http(s) and can carry a path
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET with retry on transient failures (exponential backoff).
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let mut retry_count = 0;
        loop {
            match self.send(self.client.get(url.clone())).await {
                Ok(body) => return decode(&body),
                Err(e) if e.is_transient() && retry_count < self.settings.max_retries => {
                    let delay = backoff_delay(self.settings.retry_base_delay, retry_count);
                    tracing::warn!(
                        url = %url.path(),
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a JSON body once. Mutations are never retried here.
    async fn send_json<B: Serialize>(
        &self,
        request: RequestBuilder,
        body: &B,
    ) -> Result<Vec<u8>, RemoteError> {
        let payload = serde_json::to_vec(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.send(
            request
                .header(CONTENT_TYPE, "application/json")
                .body(payload),
        )
        .await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        let body = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;

        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl FeedService for HttpFeedService {
    async fn list_news(&self, query: &NewsQuery) -> Result<NewsPage, RemoteError> {
        let mut url = self.endpoint(&["news"]);
        url.query_pairs_mut()
            .extend_pairs(query.to_params().iter().map(|(k, v)| (*k, v.as_str())));

        let response: NewsResponse = self.get_json(url).await?;
        Ok(response.into())
    }

    async fn market_snapshot(&self) -> Result<MarketSnapshot, RemoteError> {
        self.get_json(self.endpoint(&["market"])).await
    }

    async fn list_watchlist(&self, identity: &str) -> Result<Vec<WatchlistEntry>, RemoteError> {
        self.get_json(self.endpoint(&["watchlist", identity])).await
    }

    async fn add_watchlist(
        &self,
        identity: &str,
        entry: &WatchlistEntry,
    ) -> Result<(), RemoteError> {
        let body = AddWatchlistRequest {
            email: identity,
            symbol: &entry.symbol,
            name: &entry.display_name,
        };
        self.send_json(self.client.post(self.endpoint(&["watchlist"])), &body)
            .await?;
        Ok(())
    }

    async fn remove_watchlist(&self, identity: &str, symbol: &str) -> Result<(), RemoteError> {
        self.send(
            self.client
                .delete(self.endpoint(&["watchlist", identity, symbol])),
        )
        .await?;
        Ok(())
    }

    async fn search_tickers(&self, query: &str) -> Result<Vec<TickerMatch>, RemoteError> {
        let mut url = self.endpoint(&["search-stocks"]);
        url.query_pairs_mut().append_pair("q", query);
        self.get_json(url).await
    }

    async fn record_view(&self, link: &str) -> Result<Option<u64>, RemoteError> {
        let body = self
            .send_json(
                self.client.post(self.endpoint(&["news", "view"])),
                &ViewRequest { link },
            )
            .await?;
        // The count is informational; an unexpected body does not fail the view
        Ok(serde_json::from_slice::<ViewResponse>(&body)
            .ok()
            .and_then(|r| r.views))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Extract the human-readable reason from an error body.
///
/// The service reports errors as `{"detail": "..."}`; validation errors put a structure
/// there instead, which is rendered as JSON. Short plain-text bodies are used as-is.
fn error_detail(body: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: serde_json::Value,
    }

    if let Ok(ErrorBody { detail }) = serde_json::from_slice::<ErrorBody>(body) {
        return match detail {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        };
    }

    let text = std::str::from_utf8(body).ok()?.trim();
    if text.is_empty() || text.len() > MAX_DETAIL_LEN || text.starts_with('<') {
        return None;
    }
    Some(text.to_string())
}

/// `base * 2^retry`, saturating and capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
        .min(MAX_RETRY_DELAY)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, RemoteError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{compose, AuthContext, FeedMode, FeedQuery, FilterState};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> HttpFeedService {
        let settings = ClientSettings {
            request_timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(10),
        };
        HttpFeedService::new(Url::parse(&server.uri()).unwrap(), settings).unwrap()
    }

    fn query(filter: &FilterState) -> NewsQuery {
        match compose(filter, &AuthContext::anonymous(), 1, 24) {
            FeedQuery::Fetch(q) => q,
            FeedQuery::Empty => panic!("expected fetch"),
        }
    }

    #[tokio::test]
    async fn test_list_news_sends_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .and(query_param("page", "1"))
            .and(query_param("limit", "24"))
            .and(query_param("filter_type", "trending"))
            .and(query_param_is_missing("categories"))
            .and(query_param_is_missing("stocks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[{"link":"a1","headline":"A"},{"link":"a2"}],"total":50,"page":1,"pages":3}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let filter = FilterState::default().with_mode(FeedMode::Trending);
        let page = service(&server).list_news(&query(&filter)).await.unwrap();

        assert_eq!(page.pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].headline, "A");
    }

    #[tokio::test]
    async fn test_server_error_retried_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/market"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/market"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"indices":{"SENSEX":{"price":73000.0,"change":1.0,"percent_change":0.1,"history":[]}},"commodities":{}}"#,
            ))
            .mount(&server)
            .await;

        let snapshot = service(&server).market_snapshot().await.unwrap();
        assert!(snapshot.indices.contains_key("SENSEX"));
    }

    #[tokio::test]
    async fn test_server_error_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/market"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3) // Initial request + 2 retries
            .mount(&server)
            .await;

        let err = service(&server).market_snapshot().await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 500, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_backoff_delay_saturates_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 32), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(Duration::ZERO, 40), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_many_retries_give_up_with_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/market"))
            .respond_with(ResponseTemplate::new(503))
            .expect(41)
            .mount(&server)
            .await;

        let settings = ClientSettings {
            request_timeout: Duration::from_secs(2),
            max_retries: 40,
            retry_base_delay: Duration::ZERO,
        };
        let svc = HttpFeedService::new(Url::parse(&server.uri()).unwrap(), settings).unwrap();
        let err = svc.market_snapshot().await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_client_error_not_retried_and_detail_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watchlist/ghost@example.com"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"detail":"User not found"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = service(&server)
            .list_watchlist("ghost@example.com")
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.detail(), "User not found");
    }

    #[tokio::test]
    async fn test_add_watchlist_posts_body_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/watchlist"))
            .and(body_json(serde_json::json!({
                "email": "a@b.c",
                "symbol": "TCS",
                "name": "Tata Consultancy Services"
            })))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let entry = WatchlistEntry::new("TCS", "Tata Consultancy Services");
        let err = service(&server)
            .add_watchlist("a@b.c", &entry)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_remove_watchlist_encodes_segments() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/watchlist/a@b.c/M%26M"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string(r#"{"detail":"Item not found in watchlist"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = service(&server)
            .remove_watchlist("a@b.c", "M&M")
            .await
            .unwrap_err();
        assert_eq!(err.detail(), "Item not found in watchlist");
    }

    #[tokio::test]
    async fn test_record_view_returns_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/news/view"))
            .and(body_json(serde_json::json!({"link": "https://n.example/a"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"views":17}"#))
            .mount(&server)
            .await;

        let views = service(&server)
            .record_view("https://n.example/a")
            .await
            .unwrap();
        assert_eq!(views, Some(17));
    }

    #[tokio::test]
    async fn test_search_tickers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search-stocks"))
            .and(query_param("q", "tata"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"symbol":"TCS","name":"Tata Consultancy Services","aliases":["tcs"]}]"#,
            ))
            .mount(&server)
            .await;

        let matches = service(&server).search_tickers("tata").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].symbol, "TCS");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let settings = ClientSettings {
            request_timeout: Duration::from_millis(100),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(1),
        };
        let svc = HttpFeedService::new(Url::parse(&server.uri()).unwrap(), settings).unwrap();
        let err = svc.market_snapshot().await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = service(&server).market_snapshot().await.unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_detail_variants() {
        assert_eq!(
            error_detail(br#"{"detail":"Already in watchlist"}"#).as_deref(),
            Some("Already in watchlist")
        );
        assert_eq!(
            error_detail(br#"{"detail":[{"loc":["q"]}]}"#).as_deref(),
            Some(r#"[{"loc":["q"]}]"#)
        );
        assert_eq!(error_detail(b"Bad Gateway").as_deref(), Some("Bad Gateway"));
        assert_eq!(error_detail(b"<html></html>"), None);
        assert_eq!(error_detail(b""), None);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let svc = HttpFeedService::new(
            Url::parse("https://api.example.com/v1/").unwrap(),
            ClientSettings::default(),
        )
        .unwrap();
        assert_eq!(
            svc.endpoint(&["watchlist", "a@b.c"]).as_str(),
            "https://api.example.com/v1/watchlist/a@b.c"
        );
    }
}
