//! Redaction and filtering of backend output before it reaches the diagnostic log.

// std
use std::sync::LazyLock;
// crates.io
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Longest line forwarded to the log, in characters.
pub const MAX_LINE_CHARS: usize = 2_000;

const REDACTED: &str = "[REDACTED]";
const BENIGN_NOISE: &[&str] = &[
	"context canceled",
	"connection reset by peer",
	"broken pipe",
	"use of closed network connection",
	"http2: server connection lost",
];

static TOKEN_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
	Regex::new(r"(?i)(ya29\.|1//|bearer\s+)[0-9a-z._~+/\-]+=*").ok()
});

/// Scrubs access/refresh/bearer token shapes from `line` and caps its length.
pub fn redact(line: &str) -> String {
	let scrubbed = match TOKEN_PATTERN.as_ref() {
		Some(pattern) => pattern.replace_all(line, format!("${{1}}{REDACTED}")).into_owned(),
		None => return REDACTED.to_owned(),
	};

	cap(scrubbed)
}

/// Known transient errors that are expected during normal backend operation.
pub fn is_benign(line: &str) -> bool {
	let lower = line.to_ascii_lowercase();

	BENIGN_NOISE.iter().any(|noise| lower.contains(noise))
}

fn cap(line: String) -> String {
	match line.char_indices().nth(MAX_LINE_CHARS) {
		Some((cut, _)) => format!("{}... [truncated]", &line[..cut]),
		None => line,
	}
}

/// Forwards every line of `reader` to `tracing` after redaction and noise filtering.
pub(crate) async fn pump<R>(reader: R, stream: &'static str)
where
	R: AsyncRead + Unpin,
{
	let mut lines = BufReader::new(reader).lines();

	loop {
		match lines.next_line().await {
			Ok(Some(line)) if line.trim().is_empty() || is_benign(&line) => {},
			Ok(Some(line)) => tracing::debug!(stream, "backend: {}", redact(&line)),
			Ok(None) => break,
			Err(e) => {
				tracing::debug!(stream, error = %e, "backend output closed");

				break;
			},
		}
	}
}
