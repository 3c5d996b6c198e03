// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./prom_test.rs"]
mod prom_test;

use crate::pipeline::config::WriterConfig;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use prost::Message;
use pushgw_protobuf::protos::prometheus::WriteRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
pub const REMOTE_WRITE_VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";
pub const PUSHGW_USER_AGENT: &str = "n9e";

#[derive(thiserror::Error, Debug)]
pub enum PromRemoteWriteError {
  #[error("no url configured")]
  NoUrl,
  #[error("invalid header {0}")]
  InvalidHeader(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("request error: {0}")]
  Request(#[from] reqwest::Error),
  #[error("response error: {0}: {1}")]
  Response(StatusCode, String),
  #[error("timed out waiting for response headers")]
  Timeout,
  #[error("snappy error: {0}")]
  Snappy(#[from] snap::Error),
}

impl PromRemoteWriteError {
  #[must_use]
  pub fn is_client_error(&self) -> bool {
    matches!(self, Self::Response(status, _) if status.is_client_error())
  }
}

pub type Result<T> = std::result::Result<T, PromRemoteWriteError>;

/// A thin client wrapper used for mocking in tests
#[allow(clippy::ref_option_ref)] // Spurious
#[mockall::automock]
#[async_trait]
pub trait PromRemoteWriteClient: Send + Sync {
  async fn send_write_request<'a>(
    &self,
    compressed_write_request: Bytes,
    extra_headers: Option<&'a HeaderMap>,
  ) -> Result<()>;
}

//
// ReqwestPromRemoteWriteClient
//

/// Posts to each configured URL in order and stops at the first success.
pub struct ReqwestPromRemoteWriteClient {
  inner: reqwest::Client,
  urls: Vec<String>,
  basic_auth: Option<(String, String)>,
  request_headers: Vec<(HeaderName, HeaderValue)>,
  response_header_timeout: Option<Duration>,
  connection_limit: Option<Arc<Semaphore>>,
}

impl ReqwestPromRemoteWriteClient {
  pub fn new(config: &WriterConfig) -> Result<Self> {
    let urls: Vec<String> = config.urls().map(ToString::to_string).collect();
    if urls.is_empty() {
      return Err(PromRemoteWriteError::NoUrl);
    }

    let request_headers = config
      .header_pairs()
      .map(|(name, value)| -> Result<(HeaderName, HeaderValue)> {
        Ok((
          HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| PromRemoteWriteError::InvalidHeader(name.to_string()))?,
          HeaderValue::from_str(value)
            .map_err(|_| PromRemoteWriteError::InvalidHeader(name.to_string()))?,
        ))
      })
      .collect::<Result<_>>()?;

    Ok(Self {
      inner: make_http_client(config)?,
      urls,
      basic_auth: (!config.basic_auth_user.is_empty()).then(|| {
        (
          config.basic_auth_user.clone(),
          config.basic_auth_pass.clone(),
        )
      }),
      request_headers,
      response_header_timeout: config.response_header_timeout,
      connection_limit: (config.max_conns_per_host > 0)
        .then(|| Arc::new(Semaphore::new(config.max_conns_per_host))),
    })
  }

  async fn send_to(
    &self,
    url: &str,
    compressed_write_request: Bytes,
    extra_headers: Option<&HeaderMap>,
  ) -> Result<()> {
    let _permit = match &self.connection_limit {
      Some(limit) => limit.acquire().await.ok(),
      None => None,
    };

    let mut request = self
      .inner
      .post(url)
      .header(CONTENT_ENCODING, "snappy")
      .header(CONTENT_TYPE, CONTENT_TYPE_PROTOBUF)
      .header(USER_AGENT, PUSHGW_USER_AGENT)
      .header(REMOTE_WRITE_VERSION_HEADER, REMOTE_WRITE_VERSION);
    if let Some(extra_headers) = extra_headers {
      request = request.headers(extra_headers.clone());
    }
    if let Some((user, pass)) = &self.basic_auth {
      request = request.basic_auth(user, Some(pass));
    }
    // A configured Host header is also what hyper puts on the wire as the request host.
    for (name, value) in &self.request_headers {
      request = request.header(name.clone(), value.clone());
    }

    let send = request.body(compressed_write_request).send();
    let response = match self.response_header_timeout {
      Some(timeout) => tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| PromRemoteWriteError::Timeout)??,
      None => send.await?,
    };

    let status = response.status();
    if status.is_success() {
      return Ok(());
    }
    let body = response
      .text()
      .await
      .unwrap_or_else(|_| "unreadable body".to_string());
    Err(PromRemoteWriteError::Response(status, body))
  }
}

#[async_trait]
impl PromRemoteWriteClient for ReqwestPromRemoteWriteClient {
  async fn send_write_request<'a>(
    &self,
    compressed_write_request: Bytes,
    extra_headers: Option<&'a HeaderMap>,
  ) -> Result<()> {
    let mut last_error = PromRemoteWriteError::NoUrl;
    for url in &self.urls {
      match self
        .send_to(url, compressed_write_request.clone(), extra_headers)
        .await
      {
        Ok(()) => return Ok(()),
        Err(e) => {
          log::debug!("remote write to {url} failed: {e}");
          last_error = e;
        },
      }
    }
    Err(last_error)
  }
}

/// One pooled client per backend. The connect timeout covers both the TCP dial and the TLS
/// handshake.
pub fn make_http_client(config: &WriterConfig) -> Result<reqwest::Client> {
  let mut builder = reqwest::Client::builder()
    .timeout(config.timeout)
    .connect_timeout(config.dial_timeout + config.tls_handshake_timeout)
    .tcp_keepalive(config.keep_alive)
    .pool_idle_timeout(config.idle_conn_timeout)
    .pool_max_idle_per_host(config.max_idle_conns_per_host.min(config.max_idle_conns));

  if let Some(tls) = &config.tls {
    if let Some(ca_file) = &tls.ca_file {
      builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&std::fs::read(
        ca_file,
      )?)?);
    }
    if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
      let cert = std::fs::read(cert_file)?;
      let key = std::fs::read(key_file)?;
      builder = builder.identity(reqwest::Identity::from_pem(&[cert, key].concat())?);
    }
    builder = builder.danger_accept_invalid_certs(tls.insecure_skip_verify);
  }

  Ok(builder.build()?)
}

pub fn compress_write_request(write_request: &WriteRequest) -> Result<Vec<u8>> {
  let proto_encoded = write_request.encode_to_vec();
  let proto_compressed = snap::raw::Encoder::new().compress_vec(&proto_encoded)?;
  log::trace!(
    "compressed WriteRequest {} bytes to {} bytes",
    proto_encoded.len(),
    proto_compressed.len()
  );
  Ok(proto_compressed)
}
