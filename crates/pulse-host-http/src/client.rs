use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::HttpError;

/// Configuration for the HTTP capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  /// Total time allowed for one request, in milliseconds.
  pub request_timeout_ms: u64,
  /// Time allowed to establish a connection, in milliseconds.
  pub connect_timeout_ms: u64,
  pub user_agent: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      request_timeout_ms: 30_000,
      connect_timeout_ms: 10_000,
      user_agent: format!("pulse/{}", env!("CARGO_PKG_VERSION")),
    }
  }
}

/// What a request hands back to the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
  /// The response body. Non-2xx statuses are errors.
  #[default]
  Body,
  /// The numeric status code, whatever it is.
  StatusOnly,
}

/// HTTP client exposed to widget scripts.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
  client: Client,
}

impl HttpClient {
  /// Create a new client with the given configuration.
  pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
    let client = Client::builder()
      .timeout(Duration::from_millis(config.request_timeout_ms))
      .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| HttpError::Connection {
        message: format!("failed to build http client: {}", e),
      })?;

    Ok(Self { client })
  }

  /// Perform a GET request.
  pub async fn get(
    &self,
    url: &str,
    header: Option<(&str, &str)>,
    mode: ResponseMode,
  ) -> Result<String, HttpError> {
    let url = validate_url(url)?;
    let request = with_header(self.client.get(url), header);
    send(request, mode).await
  }

  /// Perform a HEAD request and return the status code.
  pub async fn head(&self, url: &str, header: Option<(&str, &str)>) -> Result<String, HttpError> {
    let url = validate_url(url)?;
    let request = with_header(self.client.head(url), header);
    send(request, ResponseMode::StatusOnly).await
  }

  /// Perform a POST request with a JSON body.
  pub async fn post(
    &self,
    url: &str,
    body: &str,
    header: Option<(&str, &str)>,
    mode: ResponseMode,
  ) -> Result<String, HttpError> {
    let url = validate_url(url)?;
    let request = self
      .client
      .post(url)
      .header(CONTENT_TYPE, "application/json")
      .body(body.to_string());
    send(with_header(request, header), mode).await
  }
}

fn validate_url(raw: &str) -> Result<Url, HttpError> {
  let url = Url::parse(raw).map_err(|e| HttpError::InvalidUrl {
    url: raw.to_string(),
    message: e.to_string(),
  })?;

  match url.scheme() {
    "http" | "https" => Ok(url),
    scheme => Err(HttpError::InvalidUrl {
      url: raw.to_string(),
      message: format!("unsupported scheme '{}'", scheme),
    }),
  }
}

fn with_header(request: RequestBuilder, header: Option<(&str, &str)>) -> RequestBuilder {
  match header {
    Some((name, value)) => request.header(name, value),
    None => request,
  }
}

async fn send(request: RequestBuilder, mode: ResponseMode) -> Result<String, HttpError> {
  let response = request.send().await?;
  let status = response.status();
  debug!(status = status.as_u16(), url = %response.url(), "http response");

  if mode == ResponseMode::StatusOnly {
    return Ok(status.as_u16().to_string());
  }

  let body = response.text().await?;
  if status.is_success() {
    Ok(body)
  } else if status.is_server_error() {
    Err(HttpError::Remote {
      status: status.as_u16(),
      body,
    })
  } else {
    Err(HttpError::Request {
      status: status.as_u16(),
      body,
    })
  }
}
