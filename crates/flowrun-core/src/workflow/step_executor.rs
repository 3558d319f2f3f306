//! Single-step execution: attempts, timeout, retry backoff, cancellation.
//!
//! `StepExecutor::execute` drives one step to a terminal `StepResult`. Each
//! attempt races the agent invocation against the attempt deadline and the
//! run's cancellation token. When the executor stops waiting, it cancels the
//! attempt's child token, gives the agent a short grace period to observe it,
//! then drops the invocation future. Nothing is left running in the
//! background after `execute` returns.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowrun_types::error::StepErrorKind;
use flowrun_types::event::RunEventKind;
use flowrun_types::run::{AttemptRecord, StepFailure, StepResult, StepStatus};
use flowrun_types::workflow::{OutputMap, StepSpec};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::agent::{AgentError, AgentRequest, BoxAgent};
use crate::event::EventBroadcaster;

use super::retry::RetryPolicy;

/// How long an agent gets to wind down after its attempt is cancelled.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Run-scoped values every step of a run shares.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub run_input: Arc<serde_json::Value>,
    /// Cancelled when the run is cancelled.
    pub cancel: CancellationToken,
}

/// Executes single steps and publishes their step-level events.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    events: EventBroadcaster,
    cancel_grace: Duration,
}

impl StepExecutor {
    pub fn new(events: EventBroadcaster) -> Self {
        Self {
            events,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Drive `step` to a terminal result.
    ///
    /// `bound_input` is the full output mapping of the `input_from` step, or
    /// `None` for a root step. Publishes `StepStarted` once, `StepRetrying`
    /// per intermediate failure, then exactly one of `StepCompleted` or
    /// `StepFailed`.
    pub async fn execute(
        &self,
        ctx: &StepContext,
        step: &StepSpec,
        bound_input: Option<OutputMap>,
        agent: BoxAgent,
        policy: &RetryPolicy,
    ) -> StepResult {
        let started_at = Utc::now();
        self.events.publish(
            ctx.run_id,
            RunEventKind::StepStarted {
                step_id: step.id.clone(),
                agent: step.agent.clone(),
            },
        );

        let mut attempt_log = Vec::new();
        let mut attempt = 0u32;
        let outcome = loop {
            attempt += 1;
            let attempt_started = Utc::now();
            let span = info_span!(
                "step_attempt",
                run_id = %ctx.run_id,
                step_id = %step.id,
                agent = %step.agent,
                attempt,
            );
            let result = self
                .run_attempt(ctx, step, &bound_input, &agent, policy, attempt)
                .instrument(span)
                .await;
            attempt_log.push(AttemptRecord {
                attempt,
                started_at: attempt_started,
                ended_at: Utc::now(),
                error: result.as_ref().err().cloned(),
            });

            let failure = match result {
                Ok(outputs) => break Ok(outputs),
                Err(failure) => failure,
            };
            if !policy.should_retry(failure.kind, attempt) || ctx.cancel.is_cancelled() {
                break Err(failure);
            }

            let delay = policy.backoff_for(attempt);
            tracing::debug!(
                run_id = %ctx.run_id,
                step_id = %step.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "step attempt failed; retrying"
            );
            self.events.publish(
                ctx.run_id,
                RunEventKind::StepRetrying {
                    step_id: step.id.clone(),
                    attempt,
                    error: failure.to_string(),
                    delay_ms: delay.as_millis() as u64,
                },
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => {
                    break Err(StepFailure::new(
                        StepErrorKind::Cancelled,
                        "run cancelled while waiting to retry",
                    ));
                }
            }
        };

        let ended_at = Utc::now();
        match outcome {
            Ok(outputs) => {
                warn_missing_outputs(ctx.run_id, step, &outputs);
                self.events.publish(
                    ctx.run_id,
                    RunEventKind::StepCompleted {
                        step_id: step.id.clone(),
                        attempts: attempt,
                        outputs: outputs.clone(),
                    },
                );
                StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Completed,
                    outputs,
                    error: None,
                    attempts: attempt,
                    attempt_log,
                    started_at: Some(started_at),
                    ended_at: Some(ended_at),
                    skip_reason: None,
                }
            }
            Err(failure) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    step_id = %step.id,
                    attempts = attempt,
                    error = %failure,
                    "step failed"
                );
                self.events.publish(
                    ctx.run_id,
                    RunEventKind::StepFailed {
                        step_id: step.id.clone(),
                        attempts: attempt,
                        kind: failure.kind,
                        error: failure.message.clone(),
                    },
                );
                StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Failed,
                    outputs: OutputMap::new(),
                    error: Some(failure),
                    attempts: attempt,
                    attempt_log,
                    started_at: Some(started_at),
                    ended_at: Some(ended_at),
                    skip_reason: None,
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        ctx: &StepContext,
        step: &StepSpec,
        bound_input: &Option<OutputMap>,
        agent: &BoxAgent,
        policy: &RetryPolicy,
        attempt: u32,
    ) -> Result<OutputMap, StepFailure> {
        let request = AgentRequest {
            run_id: ctx.run_id,
            step_id: step.id.clone(),
            attempt,
            config: step.config.clone(),
            input: bound_input.clone(),
            run_input: ctx.run_input.as_ref().clone(),
        };
        let token = ctx.cancel.child_token();
        let invocation = AssertUnwindSafe(agent.invoke(request, token.clone())).catch_unwind();
        tokio::pin!(invocation);

        tokio::select! {
            biased;
            result = &mut invocation => match result {
                Ok(Ok(outputs)) => Ok(outputs),
                Ok(Err(AgentError::Cancelled)) => Err(StepFailure::new(
                    StepErrorKind::Cancelled,
                    "agent reported cancellation",
                )),
                Ok(Err(e)) => Err(StepFailure::new(StepErrorKind::AgentInvocation, e.to_string())),
                Err(_) => Err(StepFailure::new(StepErrorKind::AgentInvocation, "agent panicked")),
            },
            _ = ctx.cancel.cancelled() => {
                // The child token is already cancelled through its parent.
                let _ = tokio::time::timeout(self.cancel_grace, &mut invocation).await;
                Err(StepFailure::new(StepErrorKind::Cancelled, "run cancelled"))
            }
            _ = tokio::time::sleep(policy.attempt_timeout) => {
                token.cancel();
                let _ = tokio::time::timeout(self.cancel_grace, &mut invocation).await;
                Err(StepFailure::new(
                    StepErrorKind::Timeout,
                    format!(
                        "attempt {attempt} exceeded {}ms",
                        policy.attempt_timeout.as_millis()
                    ),
                ))
            }
        }
    }
}

fn warn_missing_outputs(run_id: Uuid, step: &StepSpec, outputs: &OutputMap) {
    let missing: Vec<&str> = step
        .outputs
        .iter()
        .filter(|name| !outputs.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        tracing::warn!(
            run_id = %run_id,
            step_id = %step.id,
            missing = ?missing,
            "step completed without some declared outputs"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use flowrun_types::config::EngineConfig;
    use flowrun_types::workflow::{ConfigMap, RetryConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Fails the first `failures` attempts, then returns `{attempt: n}`.
    struct FailThenSucceed {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl Agent for FailThenSucceed {
        async fn invoke(
            &self,
            request: AgentRequest,
            _cancel: CancellationToken,
        ) -> Result<OutputMap, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(AgentError::Failed(format!("transient failure {call}")));
            }
            let mut out = OutputMap::new();
            out.insert("attempt".to_string(), json!(request.attempt));
            Ok(out)
        }
    }

    /// Waits for cancellation, records that it saw it.
    struct Sleeper {
        saw_cancel: Arc<AtomicBool>,
    }

    impl Agent for Sleeper {
        async fn invoke(
            &self,
            _request: AgentRequest,
            cancel: CancellationToken,
        ) -> Result<OutputMap, AgentError> {
            cancel.cancelled().await;
            self.saw_cancel.store(true, Ordering::SeqCst);
            Err(AgentError::Cancelled)
        }
    }

    /// Ignores its token and would take an hour. Flags when its future is dropped.
    struct Stubborn {
        finished: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl Agent for Stubborn {
        async fn invoke(
            &self,
            _request: AgentRequest,
            _cancel: CancellationToken,
        ) -> Result<OutputMap, AgentError> {
            let _guard = DropFlag(Arc::clone(&self.dropped));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(OutputMap::new())
        }
    }

    struct Panics;

    impl Agent for Panics {
        async fn invoke(
            &self,
            _request: AgentRequest,
            _cancel: CancellationToken,
        ) -> Result<OutputMap, AgentError> {
            panic!("agent bug");
        }
    }

    fn step(retry: Option<RetryConfig>, timeout_secs: Option<u64>) -> StepSpec {
        StepSpec {
            id: "work".to_string(),
            agent: "worker".to_string(),
            config: ConfigMap::new(),
            input_from: None,
            outputs: vec!["attempt".to_string()],
            timeout_secs,
            retry,
        }
    }

    fn context() -> StepContext {
        StepContext {
            run_id: Uuid::now_v7(),
            run_input: Arc::new(serde_json::Value::Null),
            cancel: CancellationToken::new(),
        }
    }

    fn kinds(events: &EventBroadcaster, run_id: Uuid) -> Vec<&'static str> {
        events
            .history(run_id)
            .iter()
            .map(|e| e.kind.kind_name())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_final_attempt_without_step_failed() {
        let events = EventBroadcaster::default();
        let executor = StepExecutor::new(events.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let agent = BoxAgent::new(FailThenSucceed {
            failures: 2,
            calls: Arc::clone(&calls),
        });
        let spec = step(None, None);
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());
        let ctx = context();

        let result = executor.execute(&ctx, &spec, None, agent, &policy).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.outputs["attempt"], 3);
        assert_eq!(result.attempt_log.len(), 3);
        assert!(result.attempt_log[0].error.is_some());
        assert!(result.attempt_log[2].error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            kinds(&events, ctx.run_id),
            vec!["step_started", "step_retrying", "step_retrying", "step_completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_then_fails() {
        let events = EventBroadcaster::default();
        let executor = StepExecutor::new(events.clone());
        let agent = BoxAgent::new(FailThenSucceed {
            failures: 10,
            calls: Arc::new(AtomicU32::new(0)),
        });
        let spec = step(
            Some(RetryConfig {
                max_attempts: Some(2),
                ..Default::default()
            }),
            None,
        );
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());
        let ctx = context();

        let result = executor.execute(&ctx, &spec, None, agent, &policy).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 2);
        let error = result.error.unwrap();
        assert_eq!(error.kind, StepErrorKind::AgentInvocation);
        assert!(error.message.contains("transient failure 2"));
        assert_eq!(
            kinds(&events, ctx.run_id),
            vec!["step_started", "step_retrying", "step_failed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_signals_the_agent_and_counts_as_attempt() {
        let events = EventBroadcaster::default();
        let executor = StepExecutor::new(events.clone());
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let agent = BoxAgent::new(Sleeper {
            saw_cancel: Arc::clone(&saw_cancel),
        });
        let spec = step(
            Some(RetryConfig {
                max_attempts: Some(1),
                ..Default::default()
            }),
            Some(1),
        );
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());

        let result = executor.execute(&context(), &spec, None, agent, &policy).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().kind, StepErrorKind::Timeout);
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn run_cancellation_stops_in_flight_attempt() {
        let executor = StepExecutor::new(EventBroadcaster::default());
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let agent = BoxAgent::new(Sleeper {
            saw_cancel: Arc::clone(&saw_cancel),
        });
        let spec = step(None, None);
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());
        let ctx = context();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let result = executor.execute(&ctx, &spec, None, agent, &policy).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().kind, StepErrorKind::Cancelled);
        assert_eq!(result.attempts, 1, "cancellation is never retried");
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn uncooperative_agent_is_dropped_after_grace() {
        let executor = StepExecutor::new(EventBroadcaster::default())
            .with_cancel_grace(Duration::from_millis(50));
        let finished = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let agent = BoxAgent::new(Stubborn {
            finished: Arc::clone(&finished),
            dropped: Arc::clone(&dropped),
        });
        let spec = step(
            Some(RetryConfig {
                max_attempts: Some(1),
                ..Default::default()
            }),
            Some(1),
        );
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());

        let started = tokio::time::Instant::now();
        let result = executor.execute(&context(), &spec, None, agent, &policy).await;

        assert_eq!(result.error.unwrap().kind, StepErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(dropped.load(Ordering::SeqCst), "invocation future was dropped");

        // Nothing keeps driving the invocation once execute has returned.
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn run_cancel_drops_uncooperative_agent_after_grace() {
        let executor = StepExecutor::new(EventBroadcaster::default())
            .with_cancel_grace(Duration::from_millis(50));
        let dropped = Arc::new(AtomicBool::new(false));
        let agent = BoxAgent::new(Stubborn {
            finished: Arc::new(AtomicBool::new(false)),
            dropped: Arc::clone(&dropped),
        });
        let spec = step(None, None);
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());
        let ctx = context();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let started = tokio::time::Instant::now();
        let result = executor.execute(&ctx, &spec, None, agent, &policy).await;

        assert_eq!(result.error.unwrap().kind, StepErrorKind::Cancelled);
        assert_eq!(result.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let events = EventBroadcaster::default();
        let executor = StepExecutor::new(events.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let agent = BoxAgent::new(FailThenSucceed {
            failures: 10,
            calls: Arc::clone(&calls),
        });
        let spec = step(
            Some(RetryConfig {
                max_attempts: Some(3),
                initial_backoff_ms: Some(4_000),
                ..Default::default()
            }),
            None,
        );
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());
        let ctx = context();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let result = executor.execute(&ctx, &spec, None, agent, &policy).await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, StepErrorKind::Cancelled);
        assert_eq!(error.message, "run cancelled while waiting to retry");
        assert_eq!(result.attempts, 1);
        assert_eq!(result.attempt_log.len(), 1);

        // The remaining attempts never happen.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            kinds(&events, ctx.run_id),
            vec!["step_started", "step_retrying", "step_failed"]
        );
    }

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_runs_in_its_own_span() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let executor = StepExecutor::new(EventBroadcaster::default());
        let agent = BoxAgent::new(FailThenSucceed {
            failures: 1,
            calls: Arc::new(AtomicU32::new(0)),
        });
        let spec = step(None, None);
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());
        let ctx = context();
        let result = executor.execute(&ctx, &spec, None, agent, &policy).await;
        assert_eq!(result.status, StepStatus::Completed);

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let closed: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("step_attempt{") && line.contains("close"))
            .collect();
        assert_eq!(closed.len(), 2, "one closed span per attempt:\n{output}");
        assert!(closed[0].contains(&format!("run_id={}", ctx.run_id)));
        assert!(closed[0].contains("step_id=work"));
        assert!(closed[0].contains("agent=worker"));
        assert!(closed[1].contains("attempt=2"));
    }

    #[tokio::test]
    async fn panicking_agent_is_an_invocation_failure() {
        let executor = StepExecutor::new(EventBroadcaster::default());
        let spec = step(
            Some(RetryConfig {
                max_attempts: Some(1),
                ..Default::default()
            }),
            None,
        );
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());

        let result = executor
            .execute(&context(), &spec, None, BoxAgent::new(Panics), &policy)
            .await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, StepErrorKind::AgentInvocation);
        assert_eq!(error.message, "agent panicked");
    }

    #[tokio::test]
    async fn bound_input_is_passed_separately_from_config() {
        struct Capture;
        impl Agent for Capture {
            async fn invoke(
                &self,
                request: AgentRequest,
                _cancel: CancellationToken,
            ) -> Result<OutputMap, AgentError> {
                let mut out = OutputMap::new();
                out.insert("config".to_string(), json!(request.config));
                out.insert("input".to_string(), json!(request.input));
                Ok(out)
            }
        }

        let executor = StepExecutor::new(EventBroadcaster::default());
        let mut spec = step(None, None);
        spec.config.insert("content_id".to_string(), json!("from-config"));
        let mut bound = OutputMap::new();
        bound.insert("content_id".to_string(), json!("abc"));
        let policy = RetryPolicy::resolve(Some(&spec), &EngineConfig::default());

        let result = executor
            .execute(&context(), &spec, Some(bound), BoxAgent::new(Capture), &policy)
            .await;

        assert_eq!(result.outputs["config"]["content_id"], "from-config");
        assert_eq!(result.outputs["input"]["content_id"], "abc");
    }
}
