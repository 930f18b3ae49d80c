//! Retrying call executor.
//!
//! Wraps a single-attempt call capability and re-issues it on retryable
//! failures with exponential backoff, per-attempt deadlines, and a total
//! time budget. Attempts are strictly sequential; waiting is a scheduled
//! continuation on the shared [`Scheduler`], never a blocked thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::clock::{Clock, Scheduler, SystemClock, TokioScheduler};

use super::classify::{classify, into_api_error};
use super::error::{ApiError, BoxError};
use super::settings::RetrySettings;
use super::status::{Code, StatusCode};

/// Per-call context: the attempt-scoped deadline plus cooperative
/// cancellation. Cloning shares the cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive an attempt-scoped context carrying `timeout` as its deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: self.cancel.clone(),
        }
    }

    /// Deadline for this attempt, if one was set. The underlying call
    /// honors it on a best-effort basis.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Request cancellation: the in-flight attempt is asked to stop, any
    /// armed backoff wait is abandoned, and no further attempt starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// A single-attempt call capability.
///
/// Implementations return exactly one outcome per invocation and respect the
/// deadline in the supplied context on a best-effort basis. The executor does
/// not know or care how the attempt is transported.
pub trait UnaryCall: Send + Sync {
    type Request: Clone + Send + 'static;
    type Response: Send + 'static;

    fn attempt(
        &self,
        request: Self::Request,
        ctx: CallContext,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Response, BoxError>> + Send + '_>>;
}

/// Resilient call executor over a [`UnaryCall`].
///
/// Construct once per call surface; many calls may run concurrently against
/// one instance, sharing its clock and scheduler.
pub struct RetryingCall<U> {
    inner: U,
    settings: RetrySettings,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
}

impl<U: UnaryCall> RetryingCall<U> {
    /// Executor on the system clock and tokio timers.
    pub fn new(inner: U, settings: RetrySettings) -> Self {
        Self::with_runtime(
            inner,
            settings,
            Arc::new(SystemClock),
            Arc::new(TokioScheduler),
        )
    }

    /// Executor with an explicit clock and scheduler (fakes in tests).
    pub fn with_runtime(
        inner: U,
        settings: RetrySettings,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner,
            settings,
            clock,
            scheduler,
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Asynchronous resilient call: resolves exactly once, with the response
    /// or with the terminal [`ApiError`].
    pub async fn future_call(
        &self,
        request: U::Request,
        ctx: CallContext,
    ) -> Result<U::Response, ApiError> {
        let start = self.clock.now();
        let mut attempt: u32 = 1;
        let mut attempt_timeout = self.settings.initial_attempt_timeout();
        let mut retry_delay = self.settings.initial_retry_delay();

        loop {
            if ctx.is_cancelled() {
                return Err(cancelled_error());
            }

            let attempt_ctx = ctx.with_timeout(attempt_timeout);
            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(cancelled_error()),
                outcome = self.inner.attempt(request.clone(), attempt_ctx) => outcome,
            };

            let failure = match outcome {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            let status = classify(&failure);
            if !self.settings.is_retryable(status.code) {
                tracing::debug!(
                    code = status.code.as_str(),
                    attempt,
                    "terminal failure, code not retryable"
                );
                return Err(into_api_error(failure));
            }

            let elapsed = self.clock.now().saturating_duration_since(start);
            if elapsed >= self.settings.total_timeout() {
                tracing::warn!(
                    code = status.code.as_str(),
                    attempt,
                    elapsed = ?elapsed,
                    "total timeout exhausted, surfacing last failure"
                );
                return Err(into_api_error(failure));
            }
            let max_attempts = self.settings.max_attempts();
            if max_attempts > 0 && attempt >= max_attempts {
                tracing::warn!(
                    code = status.code.as_str(),
                    attempt,
                    "attempt budget exhausted, surfacing last failure"
                );
                return Err(into_api_error(failure));
            }

            let delay = retry_delay.min(self.settings.max_retry_delay());
            tracing::debug!(
                code = status.code.as_str(),
                attempt,
                delay = ?delay,
                "retrying after backoff"
            );
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(cancelled_error()),
                _ = self.scheduler.sleep(delay) => {}
            }

            retry_delay = grow_capped(
                retry_delay,
                self.settings.retry_delay_multiplier(),
                self.settings.max_retry_delay(),
            );
            attempt_timeout = grow_capped(
                attempt_timeout,
                self.settings.attempt_timeout_multiplier(),
                self.settings.max_attempt_timeout(),
            );
            attempt += 1;
        }
    }

    /// Synchronous resilient call; identical to [`Self::future_call`] modulo
    /// synchrony. Must not be invoked from inside an async runtime.
    pub fn call(&self, request: U::Request, ctx: CallContext) -> Result<U::Response, ApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| {
                ApiError::new(
                    StatusCode::of(Code::Internal),
                    format!("failed to start runtime for blocking call: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        runtime.block_on(self.future_call(request, ctx))
    }
}

/// Multiplicative growth clamped to `cap`. A product too large for a
/// `Duration` saturates at the cap instead of overflowing.
fn grow_capped(value: Duration, multiplier: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(value.as_secs_f64() * multiplier)
        .unwrap_or(cap)
        .min(cap)
}

fn cancelled_error() -> ApiError {
    ApiError::new(
        StatusCode::of(Code::Cancelled),
        "call cancelled".to_string(),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FakeClock, RecordingScheduler};
    use crate::retry::classify::HttpError;
    use std::collections::VecDeque;
    use std::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scriptable single-attempt call: pops one outcome per invocation and
    /// records the attempt-scoped timeouts it was handed.
    struct ScriptedCall {
        outcomes: Mutex<VecDeque<Result<i32, BoxError>>>,
        attempts: AtomicUsize,
        timeouts: Mutex<Vec<Option<Duration>>>,
    }

    impl ScriptedCall {
        fn new(outcomes: Vec<Result<i32, BoxError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: AtomicUsize::new(0),
                timeouts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn timeouts(&self) -> Vec<Option<Duration>> {
            self.timeouts.lock().unwrap().clone()
        }
    }

    impl UnaryCall for ScriptedCall {
        type Request = i32;
        type Response = i32;

        fn attempt(
            &self,
            _request: i32,
            ctx: CallContext,
        ) -> Pin<Box<dyn Future<Output = Result<i32, BoxError>> + Send + '_>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.timeouts.lock().unwrap().push(ctx.timeout());
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Box::new(HttpError::new(503, "script exhausted"))));
            Box::pin(std::future::ready(outcome))
        }
    }

    fn unavailable() -> BoxError {
        Box::new(HttpError::new(503, "server unavailable"))
    }

    /// 2ms delays and timeouts, 10ms total budget, UNAVAILABLE retryable.
    fn fast_settings() -> RetrySettings {
        RetrySettings::builder()
            .initial_retry_delay(Duration::from_millis(2))
            .retry_delay_multiplier(1.0)
            .max_retry_delay(Duration::from_millis(2))
            .initial_attempt_timeout(Duration::from_millis(2))
            .attempt_timeout_multiplier(1.0)
            .max_attempt_timeout(Duration::from_millis(2))
            .total_timeout(Duration::from_millis(10))
            .max_attempts(0)
            .retryable_codes([Code::Unavailable])
            .build()
            .unwrap()
    }

    fn executor(call: ScriptedCall, settings: RetrySettings) -> RetryingCall<ScriptedCall> {
        let clock = FakeClock::new();
        let scheduler = RecordingScheduler::new(clock.clone());
        RetryingCall::with_runtime(call, settings, Arc::new(clock), Arc::new(scheduler))
    }

    #[tokio::test]
    async fn retries_through_unavailable_to_success() {
        let call = ScriptedCall::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(2),
        ]);
        let executor = executor(call, fast_settings());

        let result = executor.future_call(1, CallContext::new()).await.unwrap();
        assert_eq!(result, 2);
        assert_eq!(executor.inner.attempts(), 4);
    }

    #[tokio::test]
    async fn non_retryable_code_fails_on_first_attempt_with_original_cause() {
        let call = ScriptedCall::new(vec![Err(Box::new(HttpError::with_reason(
            400,
            "FAILED_PRECONDITION",
            "Failed precondition.",
        )))]);
        let executor = executor(call, fast_settings());

        let err = executor
            .future_call(1, CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(executor.inner.attempts(), 1);
        assert!(matches!(err, ApiError::FailedPrecondition(_)));
        assert_eq!(err.transport_status(), Some(400));
        let http = err
            .source()
            .and_then(|s| s.downcast_ref::<HttpError>())
            .expect("cause must be the original transport failure");
        assert_eq!(http.status(), 400);
        assert_eq!(http.reason(), Some("FAILED_PRECONDITION"));
    }

    #[tokio::test]
    async fn max_attempts_bounds_the_attempt_count() {
        let call = ScriptedCall::new(vec![Err(unavailable()), Err(unavailable()), Ok(2)]);
        let settings = RetrySettings::builder()
            .initial_retry_delay(Duration::from_millis(2))
            .retry_delay_multiplier(1.0)
            .max_retry_delay(Duration::from_millis(2))
            .initial_attempt_timeout(Duration::from_millis(2))
            .attempt_timeout_multiplier(1.0)
            .max_attempt_timeout(Duration::from_millis(2))
            .total_timeout(Duration::from_millis(10))
            .max_attempts(2)
            .retryable_codes([Code::Unavailable])
            .build()
            .unwrap();
        let executor = executor(call, settings);

        let err = executor
            .future_call(1, CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(executor.inner.attempts(), 2);
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[tokio::test]
    async fn total_timeout_surfaces_last_real_failure() {
        // 5ms backoff against a 10ms budget: attempts at t=0, 5, 10; the
        // third failure sees elapsed == total_timeout and becomes terminal.
        let call = ScriptedCall::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(2),
        ]);
        let settings = RetrySettings::builder()
            .initial_retry_delay(Duration::from_millis(5))
            .retry_delay_multiplier(1.0)
            .max_retry_delay(Duration::from_millis(5))
            .initial_attempt_timeout(Duration::from_millis(2))
            .attempt_timeout_multiplier(1.0)
            .max_attempt_timeout(Duration::from_millis(2))
            .total_timeout(Duration::from_millis(10))
            .max_attempts(0)
            .retryable_codes([Code::Unavailable])
            .build()
            .unwrap();

        let clock = FakeClock::new();
        let scheduler = Arc::new(RecordingScheduler::new(clock.clone()));
        let executor = RetryingCall::with_runtime(
            call,
            settings,
            Arc::new(clock),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        );

        let err = executor
            .future_call(1, CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(executor.inner.attempts(), 3);
        // The terminal error wraps the last observed failure, not a
        // synthetic timeout.
        assert!(matches!(err, ApiError::Unavailable(_)));
        assert!(err
            .source()
            .and_then(|s| s.downcast_ref::<HttpError>())
            .is_some());
        assert_eq!(
            scheduler.delays(),
            vec![Duration::from_millis(5), Duration::from_millis(5)]
        );
    }

    #[tokio::test]
    async fn zero_total_timeout_makes_first_retryable_failure_terminal() {
        let call = ScriptedCall::new(vec![Err(unavailable()), Ok(2)]);
        let settings = RetrySettings::builder()
            .total_timeout(Duration::ZERO)
            .retryable_codes([Code::Unavailable])
            .build()
            .unwrap();
        let executor = executor(call, settings);

        let err = executor
            .future_call(1, CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(executor.inner.attempts(), 1);
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_retryable_set_never_retries() {
        let call = ScriptedCall::new(vec![Err(unavailable()), Ok(2)]);
        let settings = RetrySettings::builder().build().unwrap();
        let executor = executor(call, settings);

        let err = executor
            .future_call(1, CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(executor.inner.attempts(), 1);
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unknown_in_retryable_set_retries_opaque_failures() {
        let opaque =
            || -> BoxError { Box::new(std::io::Error::new(std::io::ErrorKind::Other, "foobar")) };
        let call = ScriptedCall::new(vec![Err(opaque()), Err(opaque()), Ok(2)]);
        let settings = RetrySettings::builder()
            .initial_retry_delay(Duration::from_millis(2))
            .max_retry_delay(Duration::from_millis(2))
            .total_timeout(Duration::from_millis(10))
            .retryable_codes([Code::Unknown])
            .build()
            .unwrap();
        let executor = executor(call, settings);

        let result = executor.future_call(1, CallContext::new()).await.unwrap();
        assert_eq!(result, 2);
        assert_eq!(executor.inner.attempts(), 3);
    }

    #[tokio::test]
    async fn backoff_and_attempt_timeout_grow_and_cap_independently() {
        let call = ScriptedCall::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(2),
        ]);
        let settings = RetrySettings::builder()
            .initial_retry_delay(Duration::from_millis(2))
            .retry_delay_multiplier(2.0)
            .max_retry_delay(Duration::from_millis(5))
            .initial_attempt_timeout(Duration::from_millis(2))
            .attempt_timeout_multiplier(2.0)
            .max_attempt_timeout(Duration::from_millis(6))
            .total_timeout(Duration::from_secs(1))
            .max_attempts(0)
            .retryable_codes([Code::Unavailable])
            .build()
            .unwrap();

        let clock = FakeClock::new();
        let scheduler = Arc::new(RecordingScheduler::new(clock.clone()));
        let executor = RetryingCall::with_runtime(
            call,
            settings,
            Arc::new(clock),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        );

        let result = executor.future_call(1, CallContext::new()).await.unwrap();
        assert_eq!(result, 2);
        // Delay grows 2, 4, then caps at 5.
        assert_eq!(
            scheduler.delays(),
            vec![
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(5),
                Duration::from_millis(5),
            ]
        );
        // Attempt timeout grows 2, 4, then caps at 6 independently.
        assert_eq!(
            executor.inner.timeouts(),
            vec![
                Some(Duration::from_millis(2)),
                Some(Duration::from_millis(4)),
                Some(Duration::from_millis(6)),
                Some(Duration::from_millis(6)),
                Some(Duration::from_millis(6)),
            ]
        );
    }

    #[tokio::test]
    async fn extreme_multiplier_saturates_at_the_caps() {
        // A multiplier this large overflows a Duration on the second growth
        // step; the stored delay and timeout must clamp to their caps
        // instead of panicking mid-call.
        let call = ScriptedCall::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(2),
        ]);
        let settings = RetrySettings::builder()
            .initial_retry_delay(Duration::from_secs(1))
            .retry_delay_multiplier(1e20)
            .max_retry_delay(Duration::from_secs(1))
            .initial_attempt_timeout(Duration::from_secs(1))
            .attempt_timeout_multiplier(1e20)
            .max_attempt_timeout(Duration::from_secs(1))
            .total_timeout(Duration::from_secs(100))
            .max_attempts(0)
            .retryable_codes([Code::Unavailable])
            .build()
            .unwrap();

        let clock = FakeClock::new();
        let scheduler = Arc::new(RecordingScheduler::new(clock.clone()));
        let executor = RetryingCall::with_runtime(
            call,
            settings,
            Arc::new(clock),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        );

        let result = executor.future_call(1, CallContext::new()).await.unwrap();
        assert_eq!(result, 2);
        assert_eq!(scheduler.delays(), vec![Duration::from_secs(1); 3]);
        assert_eq!(
            executor.inner.timeouts(),
            vec![Some(Duration::from_secs(1)); 4]
        );
    }

    #[tokio::test]
    async fn cancelled_context_prevents_any_attempt() {
        let call = ScriptedCall::new(vec![Ok(2)]);
        let executor = executor(call, fast_settings());

        let ctx = CallContext::new();
        ctx.cancel();
        let err = executor.future_call(1, ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::Cancelled(_)));
        assert_eq!(executor.inner.attempts(), 0);
    }

    /// Call that cancels its own context while failing, simulating a caller
    /// cancelling during an in-flight attempt.
    struct CancelDuringAttempt;

    impl UnaryCall for CancelDuringAttempt {
        type Request = i32;
        type Response = i32;

        fn attempt(
            &self,
            _request: i32,
            ctx: CallContext,
        ) -> Pin<Box<dyn Future<Output = Result<i32, BoxError>> + Send + '_>> {
            ctx.cancel();
            Box::pin(std::future::ready::<Result<i32, BoxError>>(Err(
                unavailable(),
            )))
        }
    }

    #[tokio::test]
    async fn cancellation_wins_the_race_against_the_backoff_timer() {
        let clock = FakeClock::new();
        let scheduler = RecordingScheduler::new(clock.clone());
        let executor = RetryingCall::with_runtime(
            CancelDuringAttempt,
            fast_settings(),
            Arc::new(clock),
            Arc::new(scheduler),
        );

        let err = executor
            .future_call(1, CallContext::new())
            .await
            .unwrap_err();
        // The recording scheduler's sleep completes instantly, but the
        // biased race still resolves toward cancellation: no second attempt.
        assert!(matches!(err, ApiError::Cancelled(_)));
    }

    #[test]
    fn sync_call_matches_async_behaviour() {
        let call = ScriptedCall::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(2),
        ]);
        let executor = executor(call, fast_settings());

        let result = executor.call(1, CallContext::new()).unwrap();
        assert_eq!(result, 2);
        assert_eq!(executor.inner.attempts(), 4);
    }

    #[test]
    fn sync_call_surfaces_terminal_error() {
        let call = ScriptedCall::new(vec![Err(Box::new(HttpError::with_reason(
            400,
            "FAILED_PRECONDITION",
            "Failed precondition.",
        )))]);
        let executor = executor(call, fast_settings());

        let err = executor.call(1, CallContext::new()).unwrap_err();
        assert!(matches!(err, ApiError::FailedPrecondition(_)));
        assert_eq!(executor.inner.attempts(), 1);
    }
}
