//! Exponential-backoff poller (spec §4.7.2).
//!
//! `poll_with_backoff` invokes `fn` up to `max_attempts` times; a `None`
//! result means "not ready yet" and schedules another attempt after a
//! jittered, capped exponential delay, while `Some(value)` returns
//! immediately with no trailing sleep. `fn` errors propagate without
//! retry — callers decide what to do with them.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for PollOptions {
    /// Defaults from the status-polling scenario: 1s initial delay, 30s cap,
    /// 20 attempts (~10 min worst case), jitter = 0.2.
    fn default() -> Self {
        PollOptions {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("invalid poll options: {0}")]
    InvalidOptions(&'static str),
    #[error("exceeded max poll attempts ({attempts})")]
    MaxAttempts { attempts: u32 },
    #[error("polling aborted")]
    Aborted,
    #[error("poll function failed")]
    Inner(E),
}

fn validate_options<E>(opts: &PollOptions) -> Result<(), PollError<E>> {
    if opts.initial_delay.is_zero() {
        return Err(PollError::InvalidOptions("initial_delay must be > 0"));
    }
    if opts.max_delay.is_zero() {
        return Err(PollError::InvalidOptions("max_delay must be > 0"));
    }
    if opts.max_attempts == 0 {
        return Err(PollError::InvalidOptions("max_attempts must be > 0"));
    }
    if !(0.0..=1.0).contains(&opts.jitter) {
        return Err(PollError::InvalidOptions("jitter must be within [0, 1]"));
    }
    Ok(())
}

/// `min(initial * 2^exponent, cap)`, scaled by a jitter factor drawn
/// uniformly from `[1 - jitter, 1 + jitter]` and clamped to `>= 0` (P5, P6).
fn backoff_delay(initial: Duration, cap: Duration, exponent: u32, jitter: f64) -> Duration {
    let base = initial.as_secs_f64() * 2f64.powi(exponent as i32);
    let capped = base.min(cap.as_secs_f64());
    let factor = if jitter <= 0.0 {
        1.0
    } else {
        rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
    };
    Duration::from_secs_f64((capped * factor).max(0.0))
}

/// Polls `f` up to `opts.max_attempts` times, sleeping a jittered
/// exponential backoff between `None` results. `token` is checked before
/// each attempt and inside each sleep (aborts reject with [`PollError::Aborted`]).
pub async fn poll_with_backoff<T, E, F, Fut>(
    mut f: F,
    opts: PollOptions,
    token: &CancellationToken,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    validate_options(&opts)?;

    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            return Err(PollError::Aborted);
        }
        if attempt >= opts.max_attempts {
            return Err(PollError::MaxAttempts { attempts: attempt });
        }

        let outcome = f().await.map_err(PollError::Inner)?;
        attempt += 1;
        if let Some(value) = outcome {
            return Ok(value);
        }
        if attempt >= opts.max_attempts {
            return Err(PollError::MaxAttempts { attempts: attempt });
        }

        let delay = backoff_delay(opts.initial_delay, opts.max_delay, attempt - 1, opts.jitter);
        tokio::select! {
            _ = token.cancelled() => return Err(PollError::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Convenience wrapper: polls `get_status` until it returns a status whose
/// `status` field is one of `terminal`, using [`poll_with_backoff`].
pub async fn poll_order_status<E, F, Fut>(
    mut get_status: F,
    terminal: &[&str],
    opts: PollOptions,
    token: &CancellationToken,
) -> Result<crate::codec::messages::OrderStatus, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<crate::codec::messages::OrderStatus, E>>,
{
    poll_with_backoff(
        move || {
            let fut = get_status();
            async move {
                let status = fut.await?;
                if terminal.contains(&status.status.as_str()) {
                    Ok(Some(status))
                } else {
                    Ok(None)
                }
            }
        },
        opts,
        token,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_immediately_on_first_success_with_no_sleep() {
        let token = CancellationToken::new();
        let result = poll_with_backoff::<_, std::convert::Infallible, _, _>(
            || async { Ok(Some(42)) },
            PollOptions::default(),
            &token,
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn propagates_fn_errors_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let calls_clone = calls.clone();
        let result: Result<Option<i32>, PollError<&'static str>> = poll_with_backoff(
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            PollOptions::default(),
            &token,
        )
        .await
        .map(Some);
        assert!(matches!(result, Err(PollError::Inner("boom"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_with_max_attempts_error() {
        let token = CancellationToken::new();
        let opts = PollOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            max_attempts: 3,
        };
        let result: Result<i32, PollError<std::convert::Infallible>> =
            poll_with_backoff(|| async { Ok(None) }, opts, &token).await;
        assert!(matches!(result, Err(PollError::MaxAttempts { attempts: 3 })));
    }

    #[test]
    fn rejects_invalid_options_before_calling_fn() {
        let bad = PollOptions {
            initial_delay: Duration::ZERO,
            ..PollOptions::default()
        };
        let err = validate_options::<std::convert::Infallible>(&bad).unwrap_err();
        assert!(matches!(err, PollError::InvalidOptions(_)));
    }

    #[test]
    fn backoff_series_matches_scenario_s6() {
        let initial = Duration::from_millis(1000);
        let cap = Duration::from_millis(30_000);
        let expected_ms = [1000.0, 2000.0, 4000.0, 8000.0, 16000.0, 30000.0];
        for (exponent, expected) in expected_ms.iter().enumerate() {
            let delay = backoff_delay(initial, cap, exponent as u32, 0.0);
            assert_eq!(delay.as_secs_f64() * 1000.0, *expected);
        }
    }
}
