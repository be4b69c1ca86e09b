//! HTTP transport behind the fetch seam.
//!
//! The orchestrator talks to the network through the [`Fetch`] trait so tests
//! can substitute scripted responses. The contract: a transport-level failure
//! (DNS, refused connection, timeout) is an `Err`; any HTTP response, whatever
//! its status, is an `Ok`.

use color_eyre::{eyre::eyre, Result};
use reqwest::{header, Client, Method};
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::store::same_origin;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A request about to go over the wire.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub body: Option<String>,
}

impl FetchRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      body: None,
    }
  }

  pub fn with_body(method: &str, url: Url, body: String) -> Self {
    Self {
      method: method.to_string(),
      url,
      body: Some(body),
    }
  }
}

/// What came back: status, headers and the full body.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

/// Network access seam.
pub trait Fetch {
  fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<FetchedResponse>> + Send;
}

impl<F: Fetch + Send + Sync> Fetch for std::sync::Arc<F> {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse> {
    (**self).fetch(request).await
  }
}

/// Real HTTP client. The bearer token, when configured, is attached only to
/// requests going to the app origin; it must never leak to third-party hosts.
pub struct HttpFetcher {
  client: Client,
  origin: Url,
  token: Option<String>,
}

impl HttpFetcher {
  pub fn new(origin: Url, token: Option<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin,
      token,
    })
  }

  /// Assemble the outgoing request: method, optional JSON body, and the
  /// bearer token when (and only when) the URL is on the app origin.
  fn build_request(&self, request: &FetchRequest) -> Result<reqwest::Request> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());

    if let Some(ref token) = self.token {
      if same_origin(&self.origin, &request.url) {
        builder = builder.bearer_auth(token);
      }
    }

    if let Some(ref body) = request.body {
      builder = builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.clone());
    }

    builder
      .build()
      .map_err(|e| eyre!("Failed to build request for {}: {}", request.url, e))
  }
}

impl Fetch for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse> {
    let outgoing = self.build_request(request)?;

    let response = self
      .client
      .execute(outgoing)
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
      .to_vec();

    Ok(FetchedResponse {
      status,
      headers,
      body,
    })
  }
}
