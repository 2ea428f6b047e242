//! SSE subscriber (spec §4.7.1) — a bounded-retry loop around an async byte
//! stream decoder, mirroring the "SSE reconnection + fallback" design note
//! in spec §9: no shared mutable "retries remaining" outside the
//! subscriber's own closure, and a dedicated error the caller catches once
//! to pivot to polling.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Connection attempt budget: initial connect plus reconnection attempts,
/// for a total of at most this many successful-or-failed connection
/// attempts (spec §4.7.1). Each failed connect, and each mid-stream
/// disconnect, consumes one attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct SseOptions {
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl Default for SseOptions {
    fn default() -> Self {
        SseOptions {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }
}

#[derive(Debug, Error)]
#[error("SSE connection attempts exhausted after {attempts} attempt(s)")]
pub struct SseExhaustedError {
    pub attempts: u32,
}

/// A single decoded frame's event payload, handed to the matching callback.
#[derive(Debug, Clone)]
pub enum SseEvent {
    StatusUpdate { status: String },
    Progress { percent: u8 },
    Completed { content_hash: String },
    Failed { reason: String },
}

#[derive(Default, Clone)]
pub struct SseHandlers {
    pub on_status_update: Option<Arc<dyn Fn(String) + Send + Sync>>,
    pub on_progress: Option<Arc<dyn Fn(u8) + Send + Sync>>,
    pub on_completed: Option<Arc<dyn Fn(String) + Send + Sync>>,
    pub on_failed: Option<Arc<dyn Fn(String) + Send + Sync>>,
    /// Invoked if the retry budget is exhausted *after* an initial
    /// connection succeeded (a later mid-stream exhaustion). The initial
    /// exhaustion case is instead surfaced as `Err(SseExhaustedError)` from
    /// [`subscribe`] itself.
    pub on_exhausted: Option<Arc<dyn Fn(SseExhaustedError) + Send + Sync>>,
}

impl SseHandlers {
    fn dispatch(&self, event: SseEvent) {
        match event {
            SseEvent::StatusUpdate { status } => {
                if let Some(cb) = &self.on_status_update {
                    cb(status);
                }
            }
            SseEvent::Progress { percent } => {
                if let Some(cb) = &self.on_progress {
                    cb(percent);
                }
            }
            SseEvent::Completed { content_hash } => {
                if let Some(cb) = &self.on_completed {
                    cb(content_hash);
                }
            }
            SseEvent::Failed { reason } => {
                if let Some(cb) = &self.on_failed {
                    cb(reason);
                }
            }
        }
    }
}

/// Disposer returned by [`subscribe`]; cleanly aborts the connection.
pub struct SseSubscription {
    token: CancellationToken,
}

impl SseSubscription {
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }
}

fn jittered_backoff(base: Duration, exponent: u32) -> Duration {
    let doubled = base.as_secs_f64() * 2f64.powi(exponent as i32);
    let capped = doubled.min(MAX_BACKOFF.as_secs_f64());
    let jitter = rand::rng().random_range(0.9..=1.1);
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

type ByteStream = std::pin::Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
enum ConnectError {
    #[error("connect timed out")]
    Timeout,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

async fn connect_once(client: &reqwest::Client, url: &url::Url) -> Result<ByteStream, ConnectError> {
    let response = tokio::time::timeout(
        CONNECT_TIMEOUT,
        client.get(url.clone()).header("accept", "text/event-stream").send(),
    )
    .await
    .map_err(|_| ConnectError::Timeout)??
    .error_for_status()?;
    Ok(Box::pin(response.bytes_stream()))
}

/// Subscribes to `stream_url`. Blocks until the first connection attempt
/// succeeds (retrying per `opts`) or the attempt budget is exhausted, in
/// which case it returns `Err(SseExhaustedError)` so the caller can fall
/// back to polling. On success, a background task keeps reading frames and
/// transparently reconnects (within the remaining budget) on mid-stream
/// disconnects; see `handlers.on_exhausted` for that later-exhaustion path.
pub async fn subscribe(
    client: reqwest::Client,
    stream_url: url::Url,
    handlers: SseHandlers,
    opts: SseOptions,
    token: CancellationToken,
) -> Result<SseSubscription, SseExhaustedError> {
    let attempts_used = Arc::new(AtomicU32::new(0));

    let initial_stream = loop {
        let attempt = attempts_used.fetch_add(1, Ordering::SeqCst) + 1;
        match connect_once(&client, &stream_url).await {
            Ok(stream) => break stream,
            Err(_) if attempt < opts.max_attempts => {
                let delay = jittered_backoff(opts.retry_base, attempt - 1);
                tokio::select! {
                    _ = token.cancelled() => return Err(SseExhaustedError { attempts: attempt }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(_) => return Err(SseExhaustedError { attempts: attempt }),
        }
    };

    let task_token = token.clone();
    tokio::spawn(run_stream(
        initial_stream,
        client,
        stream_url,
        handlers,
        task_token,
        attempts_used,
        opts,
    ));

    Ok(SseSubscription { token })
}

async fn run_stream(
    mut stream: ByteStream,
    client: reqwest::Client,
    url: url::Url,
    handlers: SseHandlers,
    token: CancellationToken,
    attempts_used: Arc<AtomicU32>,
    opts: SseOptions,
) {
    let mut buffer = String::new();
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            chunk = stream.next() => chunk,
        };

        match next {
            Some(Ok(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    if let Some(event) = parse_frame(&frame) {
                        handlers.dispatch(event);
                    }
                }
            }
            Some(Err(_)) | None => {
                let attempt = attempts_used.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt >= opts.max_attempts {
                    if let Some(cb) = &handlers.on_exhausted {
                        cb(SseExhaustedError { attempts: attempt });
                    }
                    return;
                }
                let delay = jittered_backoff(opts.retry_base, attempt - 1);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                match connect_once(&client, &url).await {
                    Ok(new_stream) => {
                        stream = new_stream;
                        buffer.clear();
                    }
                    Err(_) => continue,
                }
            }
        }
    }
}

/// Parses one `event: <type>\ndata: <json>\n\n` frame (blank lines and
/// unrecognized lines, e.g. SSE `id:`/`retry:`, are ignored). Unknown event
/// types are logged and ignored per spec §4.7.1.
fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event_name: Option<&str> = None;
    let mut data: Option<&str> = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim());
        }
    }
    let event_name = event_name?;
    let data = data?;
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    match event_name {
        "status_update" => Some(SseEvent::StatusUpdate {
            status: value.get("status")?.as_str()?.to_string(),
        }),
        "progress" => Some(SseEvent::Progress {
            percent: value.get("percent")?.as_u64()? as u8,
        }),
        "completed" => Some(SseEvent::Completed {
            content_hash: value.get("content_hash")?.as_str()?.to_string(),
        }),
        "failed" => Some(SseEvent::Failed {
            reason: value.get("reason")?.as_str()?.to_string(),
        }),
        other => {
            tracing::debug!(event = other, "ignoring unknown SSE event type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_update_frame() {
        let frame = "event: status_update\ndata: {\"status\":\"processing\"}";
        let event = parse_frame(frame).unwrap();
        assert!(matches!(event, SseEvent::StatusUpdate { status } if status == "processing"));
    }

    #[test]
    fn ignores_unknown_event_types() {
        let frame = "event: mystery\ndata: {}";
        assert!(parse_frame(frame).is_none());
    }

    #[test]
    fn backoff_is_capped_at_30s() {
        let delay = jittered_backoff(Duration::from_millis(500), 20);
        assert!(delay.as_secs_f64() <= MAX_BACKOFF.as_secs_f64() * 1.1 + 0.001);
    }
}
