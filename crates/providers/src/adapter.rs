//! Provider stream adapter: wraps a single `LlmProvider::chat_stream` call
//! with retry-before-first-byte, cooperative cancellation, and tool-call id
//! remapping.
//!
//! `LlmRouter` (see [`crate::router`]) falls back across *models* on
//! failure; this module is about making one model's stream trustworthy: if
//! the provider blows up (dropped connection, 5xx, auth hiccup) before it
//! has yielded a single content event, retry transparently with backoff.
//! Once any content has reached the caller, a failure is surfaced as
//! `StreamEvent::Error` instead — a partially-delivered turn must never be
//! silently replayed from the start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sa_domain::error::Error;
use sa_domain::stream::{BoxStream, StreamEvent};

use crate::traits::{ChatRequest, LlmProvider};

/// Retry policy for the pre-first-byte window of a streamed call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retry attempts after the first failed call. `0` disables
    /// retries entirely.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Emit a `StreamEvent::Retry` event for each retry. Off by default —
    /// most callers only care about the eventual stream, not the attempts.
    pub emit_retry_event: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
            emit_retry_event: false,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Cheap deterministic "random" fraction in `[0, 1)`, seeded off the attempt
/// number. Not cryptographic — just enough to spread retries apart.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}

/// Whether an error justifies a pre-first-byte retry.
fn is_retriable(err: &Error) -> bool {
    matches!(
        err,
        Error::Timeout(_) | Error::Http(_) | Error::RateLimited { .. }
    ) || matches!(err, Error::Provider { message, .. } if message.contains("HTTP 5"))
}

/// Opens a provider stream with retry-before-first-byte and tool-call id
/// remapping. `is_cancelled` is polled between retry attempts and once per
/// yielded event so a caller's cancellation token (whatever shape it takes
/// upstream) can abort a stream that hasn't started yet or cut one off
/// mid-flight without needing `sa-providers` to depend on the caller's crate.
pub async fn adapt_stream(
    provider: Arc<dyn LlmProvider>,
    req: ChatRequest,
    config: &RetryConfig,
    is_cancelled: impl Fn() -> bool + Send + Sync + 'static,
) -> sa_domain::error::Result<BoxStream<'static, sa_domain::error::Result<StreamEvent>>> {
    let mut attempt = 0;
    let raw = loop {
        if is_cancelled() {
            return Err(Error::Interrupted("cancelled before stream start".into()));
        }
        match provider.chat_stream(&req).await {
            Ok(stream) => break stream,
            Err(e) if attempt < config.max_retries && is_retriable(&e) => {
                tracing::warn!(
                    provider = provider.provider_id(),
                    attempt,
                    error = %e,
                    "stream failed before first byte, retrying"
                );
                tokio::time::sleep(config.delay_for_attempt(attempt)).await;
                attempt += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    };

    Ok(Box::pin(remap_and_guard(raw, is_cancelled)))
}

/// Wraps the raw event stream: once the first event has been yielded, a
/// later error is surfaced as `StreamEvent::Error` rather than retried;
/// cancellation cuts the stream off at the next event boundary; provider
/// tool-call ids are remapped to a turn-local, collision-free namespace.
fn remap_and_guard(
    mut raw: BoxStream<'static, sa_domain::error::Result<StreamEvent>>,
    is_cancelled: impl Fn() -> bool + Send + Sync + 'static,
) -> impl futures_core::Stream<Item = sa_domain::error::Result<StreamEvent>> {
    async_stream::stream! {
        use futures_util::StreamExt;

        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut next_id: u64 = 0;

        while let Some(event) = raw.next().await {
            if is_cancelled() {
                yield Ok(StreamEvent::Done {
                    message: None,
                    stop_reason: sa_domain::stream::StopReason::Interrupted,
                    usage: None,
                });
                return;
            }

            match event {
                Ok(StreamEvent::ToolcallStart { id, name }) => {
                    let local = remapped_id(&mut id_map, &mut next_id, &id);
                    yield Ok(StreamEvent::ToolcallStart { id: local, name });
                }
                Ok(StreamEvent::ToolcallDelta { id, arguments_delta }) => {
                    let local = remapped_id(&mut id_map, &mut next_id, &id);
                    yield Ok(StreamEvent::ToolcallDelta { id: local, arguments_delta });
                }
                Ok(StreamEvent::ToolcallEnd { mut tool_call }) => {
                    tool_call.call_id = remapped_id(&mut id_map, &mut next_id, &tool_call.call_id);
                    yield Ok(StreamEvent::ToolcallEnd { tool_call });
                }
                Ok(other) => yield Ok(other),
                Err(e) => {
                    yield Ok(StreamEvent::Error {
                        message: e.to_string(),
                        retryable: false,
                    });
                    return;
                }
            }
        }
    }
}

/// Looks up (or assigns) the turn-local id for a provider-issued tool-call
/// id. Providers that reuse small integer-ish ids (or none at all) across
/// unrelated calls would otherwise collide once ids cross the adapter
/// boundary into a session that tracks pending tool calls by id.
fn remapped_id(id_map: &mut HashMap<String, String>, next_id: &mut u64, provider_id: &str) -> String {
    id_map
        .entry(provider_id.to_string())
        .or_insert_with(|| {
            let local = format!("tc_{next_id}");
            *next_id += 1;
            local
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_backoff() {
        let c = RetryConfig::default();
        assert!(c.delay_for_attempt(1) > c.delay_for_attempt(0));
        assert!(c.delay_for_attempt(2) > c.delay_for_attempt(1));
    }

    #[test]
    fn delay_capped_at_max() {
        let c = RetryConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            backoff_factor: 10.0,
            ..Default::default()
        };
        assert!(c.delay_for_attempt(10) <= Duration::from_millis(37_500));
    }

    #[test]
    fn remapped_id_is_stable_per_provider_id() {
        let mut map = HashMap::new();
        let mut next = 0;
        let a = remapped_id(&mut map, &mut next, "call_0");
        let b = remapped_id(&mut map, &mut next, "call_0");
        let c = remapped_id(&mut map, &mut next, "call_1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn non_provider_errors_are_not_retriable() {
        assert!(!is_retriable(&Error::Config("bad config".into())));
        assert!(is_retriable(&Error::Timeout("slow".into())));
    }
}
