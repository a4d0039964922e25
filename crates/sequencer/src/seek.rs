use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::media::MediaSource;

/// How a bounded seek ended. None of these is an error: the caller captures
/// whatever frame the source shows unless the work was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekOutcome {
    Completed,
    TimedOut,
    Failed(String),
    Cancelled,
}

impl SeekOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SeekOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            retries: 5,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Clamps `time` into the seekable range of a clip of `duration` seconds.
pub fn clamp_seek_time(time: f64, duration: f64, margin: f64) -> f64 {
    if !time.is_finite() {
        return 0.0;
    }
    time.min(duration - margin).max(0.0)
}

/// Seeks once, giving up after `timeout`.
pub async fn seek_with_timeout<M: MediaSource>(
    media: &mut M,
    time: f64,
    timeout: Duration,
    cancel: &CancellationToken,
) -> SeekOutcome {
    if cancel.is_cancelled() {
        return SeekOutcome::Cancelled;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => SeekOutcome::Cancelled,
        result = tokio::time::timeout(timeout, media.seek(time)) => match result {
            Ok(Ok(())) => SeekOutcome::Completed,
            Ok(Err(err)) => {
                warn!(time, error = %err, "seek failed");
                SeekOutcome::Failed(err.to_string())
            }
            Err(_) => SeekOutcome::TimedOut,
        },
    }
}

/// Seeks with up to `policy.retries` further attempts after a timeout,
/// sleeping `policy.backoff` between attempts. Failures are not retried.
pub async fn seek_with_retry<M: MediaSource>(
    media: &mut M,
    time: f64,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> SeekOutcome {
    let mut attempt = 0;
    loop {
        let outcome = seek_with_timeout(media, time, policy.timeout, cancel).await;
        if outcome != SeekOutcome::TimedOut {
            return outcome;
        }
        if attempt >= policy.retries {
            warn!(time, attempts = attempt + 1, "seek kept timing out; using current frame");
            return SeekOutcome::TimedOut;
        }
        attempt += 1;
        debug!(time, attempt, "seek timed out; retrying");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SeekOutcome::Cancelled,
            _ = tokio::time::sleep(policy.backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::FakeVideo;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stalled_seek_times_out() {
        let mut video = FakeVideo::new(5.0);
        video.stall_first = 1;
        let cancel = CancellationToken::new();
        let outcome =
            seek_with_timeout(&mut video, 1.0, Duration::from_millis(1000), &cancel).await;
        assert_eq!(outcome, SeekOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_timeouts() {
        let mut video = FakeVideo::new(5.0);
        video.stall_first = 2;
        let cancel = CancellationToken::new();
        let outcome = seek_with_retry(&mut video, 2.0, RetryPolicy::default(), &cancel).await;
        assert_eq!(outcome, SeekOutcome::Completed);
        assert_eq!(video.seek_count(), 3);
        assert_eq!(video.position, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let mut video = FakeVideo::new(5.0);
        video.stall_first = usize::MAX;
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            retries: 2,
            ..RetryPolicy::default()
        };
        let outcome = seek_with_retry(&mut video, 2.0, policy, &cancel).await;
        assert_eq!(outcome, SeekOutcome::TimedOut);
        assert_eq!(video.seek_count(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_skips_seek() {
        let mut video = FakeVideo::new(5.0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = seek_with_retry(&mut video, 2.0, RetryPolicy::default(), &cancel).await;
        assert!(outcome.is_cancelled());
        assert_eq!(video.seek_count(), 0);
    }

    #[test]
    fn clamps_into_seekable_range() {
        assert_eq!(clamp_seek_time(-1.0, 5.0, 0.001), 0.0);
        assert_eq!(clamp_seek_time(9.0, 5.0, 0.001), 5.0 - 0.001);
        assert_eq!(clamp_seek_time(2.5, 5.0, 0.001), 2.5);
        assert_eq!(clamp_seek_time(f64::NAN, 5.0, 0.001), 0.0);
    }
}
