// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./center_test.rs"]
mod center_test;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum CenterError {
  #[error("no center urls configured")]
  NoCenters,
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("no center accepted the request")]
  AllCentersFailed,
}

pub type Result<T> = std::result::Result<T, CenterError>;

//
// CenterClient
//

/// Talks to the center deployments an edge gateway reports to. Every request goes to the
/// configured centers in order until one answers with a 2xx.
pub struct CenterClient {
  client: reqwest::Client,
  urls: Vec<String>,
  basic_auth: Option<(String, String)>,
}

impl CenterClient {
  pub fn new(
    urls: &[String],
    basic_auth_user: &str,
    basic_auth_pass: &str,
    timeout: Duration,
  ) -> Result<Self> {
    if urls.is_empty() {
      return Err(CenterError::NoCenters);
    }

    Ok(Self {
      client: reqwest::Client::builder().timeout(timeout).build()?,
      urls: urls
        .iter()
        .map(|url| url.trim_end_matches('/').to_string())
        .collect(),
      basic_auth: (!basic_auth_user.is_empty())
        .then(|| (basic_auth_user.to_string(), basic_auth_pass.to_string())),
    })
  }

  /// POST `body` to `path` on the first center that accepts it and return that center's reply.
  pub async fn post(&self, path: &str, headers: HeaderMap, body: Bytes) -> Result<(StatusCode, Bytes)> {
    for center in &self.urls {
      let url = format!("{center}{path}");
      match self.post_one(&url, headers.clone(), body.clone()).await {
        Ok((status, reply)) if status.is_success() => return Ok((status, reply)),
        Ok((status, reply)) => log::warn!(
          "center {url} rejected request: {status}: {}",
          String::from_utf8_lossy(&reply)
        ),
        Err(e) => log::warn!("failed to post to center {url}: {e}"),
      }
    }
    Err(CenterError::AllCentersFailed)
  }

  async fn post_one(&self, url: &str, headers: HeaderMap, body: Bytes) -> Result<(StatusCode, Bytes)> {
    let mut request = self.client.post(url).headers(headers).body(body);
    if let Some((user, pass)) = &self.basic_auth {
      request = request.basic_auth(user, Some(pass));
    }
    let response = request.send().await?;
    let status = response.status();
    Ok((status, response.bytes().await?))
  }
}
