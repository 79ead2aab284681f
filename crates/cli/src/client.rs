//! HTTP client for a running node.

use anyhow::{Context, Result, bail};
use futures::{Stream, StreamExt};
use rebuildd::{http::RunResponse, status::RebuildStatus};
use serde::de::DeserializeOwned;

pub struct ApiClient {
  base: String,
  http: reqwest::Client,
}

impl ApiClient {
  pub fn new(base: impl Into<String>) -> Self {
    let base: String = base.into();
    Self {
      base: base.trim_end_matches('/').to_string(),
      http: reqwest::Client::new(),
    }
  }

  pub fn base(&self) -> &str {
    &self.base
  }

  pub async fn projections(&self) -> Result<Vec<String>> {
    let response = self
      .http
      .get(self.url("/rebuild/projections"))
      .send()
      .await
      .with_context(|| format!("Failed to reach node at {}", self.base))?;
    decode(response).await
  }

  pub async fn run(&self, projections: &[String]) -> Result<RunResponse> {
    let response = self
      .http
      .post(self.url("/rebuild/run"))
      .json(projections)
      .send()
      .await
      .with_context(|| format!("Failed to reach node at {}", self.base))?;
    decode(response).await
  }

  pub async fn status(&self) -> Result<RebuildStatus> {
    let response = self
      .http
      .get(self.url("/rebuild/status"))
      .send()
      .await
      .with_context(|| format!("Failed to reach node at {}", self.base))?;
    decode(response).await
  }

  /// Follow the node's status feed.
  pub async fn watch(&self) -> Result<impl Stream<Item = Result<RebuildStatus>> + use<>> {
    let response = self
      .http
      .get(self.url("/rebuild/status"))
      .header(reqwest::header::ACCEPT, "text/event-stream")
      .send()
      .await
      .with_context(|| format!("Failed to reach node at {}", self.base))?;
    if !response.status().is_success() {
      bail!("Node returned {}", response.status());
    }

    let mut parser = SseParser::default();
    let stream = response.bytes_stream().flat_map(move |chunk| {
      let items: Vec<Result<RebuildStatus>> = match chunk {
        Ok(bytes) => parser
          .feed(&bytes)
          .into_iter()
          .map(|data| serde_json::from_str(&data).context("Invalid status event"))
          .collect(),
        Err(e) => vec![Err(anyhow::Error::new(e).context("Status stream interrupted"))],
      };
      futures::stream::iter(items)
    });
    Ok(stream)
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base, path)
  }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
  let status = response.status();
  if status.is_success() {
    return response.json().await.context("Invalid response body");
  }

  let body: serde_json::Value = response.json().await.unwrap_or_default();
  let message = body["error"]["message"].as_str().unwrap_or("no details");
  bail!("Node returned {}: {}", status, message)
}

/// Incremental parser for `text/event-stream` bodies. Yields the data of each
/// complete event.
///
/// Input is buffered as raw bytes and only decoded once an event is complete,
/// so a character split across chunks survives.
#[derive(Debug, Default)]
struct SseParser {
  buffer: Vec<u8>,
}

impl SseParser {
  fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
    self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

    let mut events = Vec::new();
    while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
      let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
      let block = String::from_utf8_lossy(&block);
      let data: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
      if !data.is_empty() {
        events.push(data.join("\n"));
      }
    }
    events
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sse_parser_handles_split_chunks() {
    let mut parser = SseParser::default();
    assert!(parser.feed(b"event: status\ndata: {\"state\":").is_empty());
    let events = parser.feed(b"\"Unknown\"}\n\n: keep-alive\n\nevent: status\r\ndata: {}\r\n\r\n");
    assert_eq!(events, vec![r#"{"state":"Unknown"}"#.to_string(), "{}".to_string()]);
  }

  #[test]
  fn test_sse_parser_keeps_characters_split_across_chunks() {
    let body = "event: status\ndata: {\"state\":\"Running\",\"projection\":\"Météo\"}\n\n".as_bytes();
    let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;

    let mut parser = SseParser::default();
    assert!(parser.feed(&body[..split]).is_empty());
    let events = parser.feed(&body[split..]);

    assert_eq!(events.len(), 1);
    let status: RebuildStatus = serde_json::from_str(&events[0]).unwrap();
    assert_eq!(status, RebuildStatus::running("Météo"));
  }

  #[test]
  fn test_base_url_is_normalized() {
    let client = ApiClient::new("http://127.0.0.1:5080/");
    assert_eq!(client.url("/rebuild/status"), "http://127.0.0.1:5080/rebuild/status");
  }
}
