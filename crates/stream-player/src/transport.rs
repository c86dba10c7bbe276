//! HTTP transport for streaming playback.
//!
//! Opens a single GET per decode session, optionally offset with a `Range`
//! header, and exposes the body as a buffered reader.

use std::io::{self, BufReader, Read};

use anyhow::{Context, Result, anyhow};

use crate::config::HttpConfig;

/// An opened response body plus the length information needed for seeking.
pub struct HttpBody {
    pub reader: Box<dyn Read + Send>,
    pub status: u16,
    /// Total resource length in bytes (not the remaining length of a range).
    pub content_length: Option<u64>,
}

/// Issue a GET for `url`, starting at byte `offset`.
///
/// Only `200` and `206` are accepted. A `200` answer to a range request means
/// the server ignored the range; the body is then skipped forward to `offset`.
pub fn open_stream(url: &str, offset: u64, config: &HttpConfig) -> Result<HttpBody> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_connect(Some(config.connect_timeout()))
        .timeout_recv_response(Some(config.request_timeout()))
        .http_status_as_error(false)
        .build()
        .into();

    let mut request = agent.get(url).header("User-Agent", config.user_agent.as_str());
    if let Some(range) = range_header(offset) {
        request = request.header("Range", range.as_str());
    }

    let resp = request
        .call()
        .with_context(|| format!("http request failed for {url}"))?;

    let status = resp.status().as_u16();
    check_status(status, offset).with_context(|| format!("unexpected response for {url}"))?;

    let content_range = resp
        .headers()
        .get("Content-Range")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let total = resolve_total_length(status, offset, content_length, content_range.as_deref());

    tracing::debug!(
        url = %url,
        status,
        offset,
        content_length = ?total,
        "http stream opened"
    );

    let body = resp.into_body().into_reader();
    let mut reader: Box<dyn Read + Send> =
        Box::new(BufReader::with_capacity(config.read_buffer_bytes.max(1), body));

    if status == 200 && offset > 0 {
        tracing::warn!(url = %url, offset, "server ignored range request; skipping forward");
        let skipped = io::copy(&mut (&mut reader).take(offset), &mut io::sink())
            .context("skip to range offset")?;
        if skipped < offset {
            return Err(anyhow!("stream ended at byte {skipped} before offset {offset}"));
        }
    }

    Ok(HttpBody {
        reader,
        status,
        content_length: total,
    })
}

/// `Range` header value for a non-zero starting offset.
pub(crate) fn range_header(offset: u64) -> Option<String> {
    (offset > 0).then(|| format!("bytes={offset}-"))
}

fn check_status(status: u16, offset: u64) -> Result<()> {
    match status {
        200 | 206 => Ok(()),
        other if offset > 0 => Err(anyhow!("HTTP {other} for range starting at byte {offset}")),
        other => Err(anyhow!("HTTP {other}")),
    }
}

/// Work out the full resource length from the response headers.
///
/// For `206`, the `/total` suffix of `Content-Range` wins; without it the
/// remaining length is shifted by the requested offset.
fn resolve_total_length(
    status: u16,
    offset: u64,
    content_length: Option<u64>,
    content_range: Option<&str>,
) -> Option<u64> {
    match status {
        206 => content_range
            .and_then(parse_content_range_total)
            .or_else(|| content_length.map(|len| len.saturating_add(offset))),
        _ => content_length,
    }
}

/// Extract the total length from a Content-Range header.
fn parse_content_range_total(header: &str) -> Option<u64> {
    // Format: "bytes start-end/total"
    let (_, total) = header.split_once('/')?;
    total.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_only_for_positive_offsets() {
        assert_eq!(range_header(0), None);
        assert_eq!(range_header(1_800_000), Some("bytes=1800000-".to_string()));
    }

    #[test]
    fn check_status_accepts_ok_and_partial() {
        assert!(check_status(200, 0).is_ok());
        assert!(check_status(206, 10).is_ok());
        assert!(check_status(200, 10).is_ok());
    }

    #[test]
    fn check_status_rejects_everything_else() {
        let err = check_status(404, 0).unwrap_err();
        assert!(err.to_string().contains("404"));
        let err = check_status(416, 99).unwrap_err();
        assert!(err.to_string().contains("416"));
        assert!(err.to_string().contains("99"));
        assert!(check_status(204, 0).is_err());
    }

    #[test]
    fn total_length_prefers_content_range_total() {
        let total = resolve_total_length(206, 100, Some(900), Some("bytes 100-999/1000"));
        assert_eq!(total, Some(1000));
    }

    #[test]
    fn total_length_shifts_partial_content_length_without_range_total() {
        let total = resolve_total_length(206, 100, Some(900), Some("bytes 100-999/*"));
        assert_eq!(total, Some(1000));
        let total = resolve_total_length(206, 100, Some(900), None);
        assert_eq!(total, Some(1000));
    }

    #[test]
    fn total_length_for_full_response_is_content_length() {
        assert_eq!(resolve_total_length(200, 0, Some(3_600_000), None), Some(3_600_000));
        assert_eq!(resolve_total_length(200, 0, None, None), None);
    }

    #[test]
    fn parse_content_range_total_reads_total() {
        assert_eq!(parse_content_range_total("bytes 0-99/12345"), Some(12345));
    }

    #[test]
    fn parse_content_range_total_rejects_invalid() {
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("bytes 0-99"), None);
    }
}
