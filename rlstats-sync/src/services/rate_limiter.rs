//! Dual-window rate limiter for the external analysis API
//!
//! Every outbound call is queued here and dispatched by a single drain task.
//! A request is admitted only when both the per-second and the per-hour
//! window have capacity. Each window is a token bucket refilled continuously
//! by elapsed time, backed by a log of recent dispatches so the ceiling also
//! holds over any sliding window.
//!
//! A wrapped operation that fails with a 429 is not reported to its caller;
//! it goes back to the head of the queue after a fixed backoff.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;

const HOUR: Duration = Duration::from_secs(3600);
const SECOND: Duration = Duration::from_secs(1);
const MIN_WAIT: Duration = Duration::from_millis(1);
const SLOW_WAIT_LOG: Duration = Duration::from_millis(500);

/// Failures produced by the limiter itself rather than the wrapped operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("Rate limiter shut down before the request completed")]
    Shutdown,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Lets the limiter recognise a remote rate-limit rejection in an operation's error
pub trait RateLimitAware {
    fn is_rate_limited(&self) -> bool;
}

/// One refill window (short burst or long quota)
#[derive(Debug)]
struct RateWindow {
    limit: u32,
    span: Duration,
    tokens: f64,
    last_refill: Instant,
    dispatched: VecDeque<Instant>,
}

impl RateWindow {
    fn new(limit: u32, span: Duration, now: Instant) -> Self {
        Self {
            limit,
            span,
            tokens: f64::from(limit),
            last_refill: now,
            dispatched: VecDeque::new(),
        }
    }

    fn refill_rate(&self) -> f64 {
        f64::from(self.limit) / self.span.as_secs_f64()
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate()).min(f64::from(self.limit));
        self.last_refill = now;

        while let Some(oldest) = self.dispatched.front() {
            if now.saturating_duration_since(*oldest) >= self.span {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }

    fn admits(&self) -> bool {
        self.tokens >= 1.0 && self.dispatched.len() < self.limit as usize
    }

    /// Time until this window can admit one more request
    fn wait_hint(&self, now: Instant) -> Duration {
        let mut wait = Duration::ZERO;

        if self.tokens < 1.0 {
            wait = Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate());
        }

        if self.dispatched.len() >= self.limit as usize {
            if let Some(oldest) = self.dispatched.front() {
                wait = wait.max((*oldest + self.span).saturating_duration_since(now));
            }
        }

        wait
    }

    fn consume(&mut self, now: Instant) {
        self.tokens -= 1.0;
        self.dispatched.push_back(now);
    }
}

/// Result of running a queued job once
enum Attempt {
    /// The caller's future has been resolved or rejected
    Settled,
    /// Remote answered 429; the job must run again
    RateLimited,
}

/// Runs the wrapped operation once; the flag marks the last permitted attempt
type Job = Box<dyn FnMut(bool) -> BoxFuture<'static, Attempt> + Send>;

struct QueuedRequest {
    key: String,
    job: Job,
    queued_at: Instant,
    retries: u32,
}

#[derive(Debug, Default, Clone)]
struct WaitStats {
    processed: u64,
    requeued: u64,
    total_wait: Duration,
    max_wait: Duration,
}

impl WaitStats {
    fn record(&mut self, wait: Duration) {
        self.processed += 1;
        self.total_wait += wait;
        self.max_wait = self.max_wait.max(wait);
    }

    fn average_wait(&self) -> Duration {
        if self.processed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total_wait.as_nanos() / u128::from(self.processed)) as u64)
        }
    }
}

struct LimiterState {
    per_second: RateWindow,
    per_hour: RateWindow,
    queue: VecDeque<QueuedRequest>,
    /// Single-flight guard for the drain task
    draining: bool,
    /// Requests sleeping through a 429 backoff
    in_backoff: usize,
    lifetime: WaitStats,
    since_report: WaitStats,
}

impl LimiterState {
    fn refill(&mut self, now: Instant) {
        self.per_second.refill(now);
        self.per_hour.refill(now);
    }

    fn admits(&self) -> bool {
        self.per_second.admits() && self.per_hour.admits()
    }

    fn wait_hint(&self, now: Instant) -> Duration {
        self.per_second
            .wait_hint(now)
            .max(self.per_hour.wait_hint(now))
            .max(MIN_WAIT)
    }

    fn consume(&mut self, now: Instant) {
        self.per_second.consume(now);
        self.per_hour.consume(now);
    }
}

/// Point-in-time view of the limiter, for logs and the health endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct LimiterStats {
    pub queue_depth: usize,
    pub in_backoff: usize,
    pub processed: u64,
    pub requeued: u64,
    pub average_wait_ms: u64,
    pub max_wait_ms: u64,
    pub tokens_per_second: f64,
    pub tokens_per_hour: f64,
}

/// Shared admission controller for the external API
///
/// Construct once and hand an `Arc` to every client. The drain task starts
/// on demand and exits when the queue empties.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    shutdown: CancellationToken,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let now = Instant::now();
        let state = LimiterState {
            per_second: RateWindow::new(config.per_second.max(1), SECOND, now),
            per_hour: RateWindow::new(config.per_hour.max(1), HOUR, now),
            queue: VecDeque::new(),
            draining: false,
            in_backoff: 0,
            lifetime: WaitStats::default(),
            since_report: WaitStats::default(),
        };

        Arc::new(Self {
            config,
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
        })
    }

    /// Queue `operation` and wait for its result
    ///
    /// `key` identifies the request in logs (an external replay id, or
    /// `"upload"` for submissions). The operation may run more than once if
    /// the remote side answers 429.
    pub async fn execute_with_rate_limit<T, E, F, Fut>(
        self: &Arc<Self>,
        key: impl Into<String>,
        operation: F,
    ) -> Result<T, E>
    where
        T: Send + 'static,
        E: RateLimitAware + From<LimiterError> + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(LimiterError::Shutdown.into());
        }

        let (tx, rx) = oneshot::channel::<Result<T, E>>();
        let reply = Arc::new(std::sync::Mutex::new(Some(tx)));
        let operation = Arc::new(operation);
        let timeout = self.config.request_timeout();

        let job: Job = Box::new(move |final_attempt: bool| {
            let operation = Arc::clone(&operation);
            let reply = Arc::clone(&reply);
            async move {
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, operation()).await {
                        Ok(result) => result,
                        Err(_) => Err(E::from(LimiterError::Timeout(limit))),
                    },
                    None => operation().await,
                };

                if let Err(e) = &result {
                    if e.is_rate_limited() && !final_attempt {
                        return Attempt::RateLimited;
                    }
                }

                let sender = reply.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(sender) = sender {
                    // Receiver gone means the caller stopped waiting
                    let _ = sender.send(result);
                }
                Attempt::Settled
            }
            .boxed()
        });

        let request = QueuedRequest {
            key: key.into(),
            job,
            queued_at: Instant::now(),
            retries: 0,
        };
        self.enqueue(request, false).await;

        // Sender dropped without a value: the job was discarded at shutdown
        rx.await.unwrap_or(Err(LimiterError::Shutdown.into()))
    }

    async fn enqueue(self: &Arc<Self>, request: QueuedRequest, at_head: bool) {
        let start_drain = {
            let mut state = self.state.lock().await;
            if at_head {
                state.queue.push_front(request);
            } else {
                state.queue.push_back(request);
            }

            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    /// Drain loop; at most one runs at a time (guarded by `draining`)
    ///
    /// Boxed because a 429 retry re-enters `enqueue`, which spawns this again.
    fn drain(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            loop {
                if self.shutdown.is_cancelled() {
                    self.abandon_queue().await;
                    return;
                }

                let next = {
                    let mut state = self.state.lock().await;
                    let now = Instant::now();
                    state.refill(now);

                    if state.queue.is_empty() {
                        state.draining = false;
                        return;
                    }

                    if state.admits() {
                        state.queue.pop_front().map(|request| {
                            state.consume(now);
                            let waited = now.saturating_duration_since(request.queued_at);
                            state.lifetime.record(waited);
                            state.since_report.record(waited);
                            (request, waited)
                        })
                    } else {
                        let wait = state.wait_hint(now);
                        debug!(
                            wait_ms = wait.as_millis() as u64,
                            queue_depth = state.queue.len(),
                            tokens_per_second = state.per_second.tokens,
                            tokens_per_hour = state.per_hour.tokens,
                            "Rate limiting: waiting for next token"
                        );
                        drop(state);
                        self.pause(wait).await;
                        continue;
                    }
                };

                let Some((mut request, waited)) = next else {
                    continue;
                };

                if waited > SLOW_WAIT_LOG {
                    debug!(key = %request.key, wait_ms = waited.as_millis() as u64, "Request waited in queue");
                }

                let final_attempt = self
                    .config
                    .max_rate_limit_retries
                    .is_some_and(|max| request.retries >= max);

                match (request.job)(final_attempt).await {
                    Attempt::Settled => {}
                    Attempt::RateLimited => {
                        warn!(
                            key = %request.key,
                            retries = request.retries + 1,
                            backoff_ms = self.config.retry_backoff_ms,
                            "Rate limit exceeded, re-queuing request at head"
                        );
                        self.schedule_retry(request).await;
                    }
                }

                self.pause(self.config.dispatch_spacing()).await;
            }
        }
        .boxed()
    }

    /// Sleep, waking early on shutdown
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    async fn schedule_retry(self: &Arc<Self>, mut request: QueuedRequest) {
        request.retries += 1;
        {
            let mut state = self.state.lock().await;
            state.in_backoff += 1;
            state.lifetime.requeued += 1;
            state.since_report.requeued += 1;
        }

        let limiter = Arc::clone(self);
        let backoff = self.config.retry_backoff();
        tokio::spawn(async move {
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(backoff) => false,
                _ = limiter.shutdown.cancelled() => true,
            };

            limiter.state.lock().await.in_backoff -= 1;

            if cancelled {
                // Dropping the job drops the caller's sender
                debug!(key = %request.key, "Discarding backed-off request at shutdown");
                return;
            }

            request.queued_at = Instant::now();
            limiter.enqueue(request, true).await;
        });
    }

    async fn abandon_queue(&self) {
        let mut state = self.state.lock().await;
        let abandoned = state.queue.len();
        state.queue.clear();
        state.draining = false;
        if abandoned > 0 {
            warn!(abandoned, "Rate limiter shut down with queued requests");
        }
    }

    /// Stop dispatching; queued and backed-off callers receive `LimiterError::Shutdown`
    ///
    /// An operation already in flight is allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn stats(&self) -> LimiterStats {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        LimiterStats {
            queue_depth: state.queue.len(),
            in_backoff: state.in_backoff,
            processed: state.lifetime.processed,
            requeued: state.lifetime.requeued,
            average_wait_ms: state.lifetime.average_wait().as_millis() as u64,
            max_wait_ms: state.lifetime.max_wait.as_millis() as u64,
            tokens_per_second: state.per_second.tokens,
            tokens_per_hour: state.per_hour.tokens,
        }
    }

    /// Periodically log throughput and queue wait, then reset the interval counters
    pub fn spawn_stats_reporter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = limiter.shutdown.cancelled() => return,
                }

                let mut state = limiter.state.lock().await;
                let window = std::mem::take(&mut state.since_report);
                if window.processed > 0 || window.requeued > 0 {
                    info!(
                        processed = window.processed,
                        requeued = window.requeued,
                        queue_depth = state.queue.len(),
                        avg_wait_ms = window.average_wait().as_millis() as u64,
                        max_wait_ms = window.max_wait.as_millis() as u64,
                        "Rate limiter stats"
                    );
                }
            }
        })
    }
}
