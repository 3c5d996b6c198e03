// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./decode_test.rs"]
mod decode_test;

use base64ct::{Base64, Encoding};
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_ENCODING};
use prost::Message;
use pushgw_protobuf::protos::prometheus::WriteRequest;
use std::collections::BTreeMap;
use std::io::Read;

// Applies to both the body on the wire and the body after decompression.
pub const MAX_ALLOWED_REQUEST_SIZE: usize = 20_000_000;

//
// DecodeError
//

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("protobuf decode error: {0}")]
  Protobuf(#[from] prost::DecodeError),
  #[error("snappy decode error: {0}")]
  Snappy(#[from] snap::Error),
  #[error("json decode error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("unsupported content encoding: {0}")]
  UnsupportedEncoding(String),
  #[error("decoded body exceeds {} bytes", MAX_ALLOWED_REQUEST_SIZE)]
  TooLarge,
}

pub type Result<T> = std::result::Result<T, DecodeError>;

fn content_encoding(headers: &HeaderMap) -> Option<String> {
  let value = headers.get(CONTENT_ENCODING)?.to_str().ok()?.trim();
  if value.is_empty() || value.eq_ignore_ascii_case("identity") {
    None
  } else {
    Some(value.to_ascii_lowercase())
  }
}

fn read_limited(reader: impl Read) -> Result<Bytes> {
  let mut decoded = Vec::new();
  reader
    .take(u64::try_from(MAX_ALLOWED_REQUEST_SIZE + 1).unwrap_or(u64::MAX))
    .read_to_end(&mut decoded)?;
  if decoded.len() > MAX_ALLOWED_REQUEST_SIZE {
    return Err(DecodeError::TooLarge);
  }
  Ok(decoded.into())
}

fn snappy_decompress(body: &[u8]) -> Result<Vec<u8>> {
  if snap::raw::decompress_len(body)? > MAX_ALLOWED_REQUEST_SIZE {
    return Err(DecodeError::TooLarge);
  }
  Ok(snap::raw::Decoder::new().decompress_vec(body)?)
}

/// Undo the request's `Content-Encoding`.
pub fn decode_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes> {
  match content_encoding(headers).as_deref() {
    None => Ok(body),
    Some("gzip" | "x-gzip") => read_limited(GzDecoder::new(body.as_ref())),
    Some("deflate") => read_limited(ZlibDecoder::new(body.as_ref())),
    Some("snappy") => Ok(snappy_decompress(&body)?.into()),
    Some(other) => Err(DecodeError::UnsupportedEncoding(other.to_string())),
  }
}

/// Remote write bodies are always block snappy, whether or not the client says so.
pub fn decode_write_request(headers: &HeaderMap, body: &[u8]) -> Result<WriteRequest> {
  match content_encoding(headers).as_deref() {
    None | Some("snappy") => {},
    Some(other) => return Err(DecodeError::UnsupportedEncoding(other.to_string())),
  }
  let decompressed = snappy_decompress(body)?;
  Ok(WriteRequest::decode(decompressed.as_slice())?)
}

/// Check `Authorization: Basic` against the configured users. An empty user map lets everything
/// through.
#[must_use]
pub fn check_basic_auth(headers: &HeaderMap, users: &BTreeMap<String, String>) -> bool {
  if users.is_empty() {
    return true;
  }

  let Some(encoded) = headers
    .get(AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Basic "))
  else {
    return false;
  };
  let Ok(decoded) = Base64::decode_vec(encoded.trim()) else {
    return false;
  };
  let Ok(decoded) = String::from_utf8(decoded) else {
    return false;
  };
  decoded
    .split_once(':')
    .is_some_and(|(user, pass)| users.get(user).is_some_and(|expected| expected == pass))
}
