use std::env;
use std::pin::Pin;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::Stream;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUESTS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS};
use crate::sse::decode_tokens;
use crate::types::{
    ChatMessage, HistoryRequest, ImagePayload, RenameRequest, RenameResponse, StudyRequest,
    StudyResponse,
};

/// Base URL used when neither an argument nor `OCEANBOT_BASE_URL` provides one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const STREAM_ENDPOINT: &str = "api/stream";
const STUDY_ENDPOINT: &str = "api/study";
const RENAME_ENDPOINT: &str = "api/rename";
const IMAGE_ENDPOINT: &str = "img";

/// A boxed stream of decoded response tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The backend operations the chat controller depends on.
///
/// [`OceanBot`] implements this over HTTP; tests substitute scripted backends.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Submit the conversation history and open the token stream of the reply.
    async fn stream_chat(&self, history: &[ChatMessage]) -> Result<TokenStream>;

    /// Ask a study-mode question and receive the whole answer at once.
    async fn study(&self, request: &StudyRequest) -> Result<StudyResponse>;

    /// Fetch the image announced by a sentinel, as an inline `data:` reference.
    async fn fetch_image(&self) -> Result<String>;

    /// Ask the backend to summarise the first exchange into a title.
    async fn rename(&self, request: &RenameRequest) -> Result<RenameResponse>;
}

/// HTTP client for the OceanBot backend.
#[derive(Debug, Clone)]
pub struct OceanBot {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl OceanBot {
    /// Create a new OceanBot client.
    ///
    /// The base URL can be provided directly or read from the OCEANBOT_BASE_URL
    /// environment variable, falling back to [`DEFAULT_BASE_URL`].
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Self::with_options(base_url, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(base_url: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let base_url = match base_url {
            Some(url) => url,
            None => env::var("OCEANBOT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        };
        let base_url = parse_base_url(&base_url)?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        // Only the connect phase is bounded client-wide; a streamed reply may legitimately
        // run longer than `timeout`, so whole-request timeouts are set per request.
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .default_headers(default_headers())
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a server-relative path such as a `plot_url` against the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Send a request and turn non-success statuses into [`Error::Api`].
    async fn execute(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = request.send().await.map_err(|e| self.request_error(e));
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(err);
            }
        };
        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(endpoint, response).await);
        }
        Ok(response)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(endpoint: &str, response: Response) -> Error {
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body
        };
        Error::api(status.as_u16(), Some(format!("/{endpoint}")), message)
    }

    async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(endpoint)?;
        let request = self.client.post(url).timeout(self.timeout).json(body);
        let response = self.execute(endpoint, request).await?;
        response.json::<T>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response from /{endpoint}: {e}"),
                Some(Box::new(e)),
            )
        })
    }
}

#[async_trait::async_trait]
impl Backend for OceanBot {
    async fn stream_chat(&self, history: &[ChatMessage]) -> Result<TokenStream> {
        let url = self.endpoint(STREAM_ENDPOINT)?;
        let body = HistoryRequest::from_messages(history);
        let request = self.client.post(url.clone()).timeout(self.timeout).json(&body);
        self.execute(STREAM_ENDPOINT, request).await?;

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let response = self.execute(STREAM_ENDPOINT, request).await?;
        Ok(Box::pin(decode_tokens(Box::pin(response.bytes_stream()))))
    }

    async fn study(&self, request: &StudyRequest) -> Result<StudyResponse> {
        self.post_json(STUDY_ENDPOINT, request).await
    }

    async fn fetch_image(&self) -> Result<String> {
        let url = self.endpoint(IMAGE_ENDPOINT)?;
        let request = self.client.get(url).timeout(self.timeout);
        let response = self.execute(IMAGE_ENDPOINT, request).await?;
        let body = response.bytes().await.map_err(|e| {
            Error::streaming(
                format!("Failed to read image body: {e}"),
                Some(Box::new(e)),
            )
        })?;
        image_reference(&body)
    }

    async fn rename(&self, request: &RenameRequest) -> Result<RenameResponse> {
        self.post_json(RENAME_ENDPOINT, request).await
    }
}

/// Create and return default headers for API requests.
fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut base_url = base_url.trim().to_string();
    if !base_url.ends_with('/') {
        base_url.push('/');
    }
    let url = Url::parse(&base_url)?;
    if url.cannot_be_a_base() {
        return Err(Error::validation(
            format!("{base_url} cannot be used as a base URL"),
            Some("base_url".to_string()),
        ));
    }
    Ok(url)
}

/// Turn the body of the image endpoint into an inline `data:` reference.
///
/// Accepts a JSON object `{"image": "<base64>"}`, a bare base64 (or `data:`)
/// text body, or raw image bytes.
pub fn image_reference(body: &[u8]) -> Result<String> {
    let payload = if let Ok(json) = serde_json::from_slice::<ImagePayload>(body) {
        json.image
    } else if let Ok(text) = std::str::from_utf8(body) {
        text.trim().trim_matches('"').to_string()
    } else {
        return Ok(data_reference(sniff_mime(body), &STANDARD.encode(body)));
    };

    let payload = payload.trim();
    if payload.is_empty() {
        return Err(Error::validation(
            "image endpoint returned an empty body",
            Some("image".to_string()),
        ));
    }
    if payload.starts_with("data:") {
        return Ok(payload.to_string());
    }
    match STANDARD.decode(payload) {
        Ok(decoded) => Ok(data_reference(sniff_mime(&decoded), payload)),
        Err(e) => Err(Error::encoding(
            format!("image payload is not valid base64: {e}"),
            Some(Box::new(e)),
        )),
    }
}

fn data_reference(mime: &str, base64: &str) -> String {
    format!("data:{mime};base64,{base64}")
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.starts_with(b"<svg") || bytes.starts_with(b"<?xml") {
        "image/svg+xml"
    } else {
        "image/png"
    }
}
