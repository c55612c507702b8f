//! 调用可靠性层：超时、取消、指数退避重试
//!
//! 每次尝试施加超时；内容策略 / 取消 / 非法请求直接失败，不重试；
//! 其余错误最多重试 max_retries 次（总尝试 max_retries + 1），每次等待前发 retry 事件；
//! 成功时发 completion 事件（带调用方身份与用量），本层不做累计统计。

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::ReliabilitySection;
use crate::core::{CancelScope, Caller, EventBus, LlmError, PipelineEvent};
use crate::llm::{LlmClient, Message, ResponseShape};

/// 重试与超时参数
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 单次尝试超时
    pub timeout: Duration,
    /// 最大重试次数（不含首次尝试）
    pub max_retries: u32,
    pub base_delay: Duration,
    /// 退避上限（含抖动）
    pub max_delay: Duration,
    /// 抖动比例：在基础延迟上随机追加 [0, ratio * base]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.25,
        }
    }
}

impl From<&ReliabilitySection> for RetryConfig {
    fn from(s: &ReliabilitySection) -> Self {
        Self {
            timeout: Duration::from_secs(s.timeout_secs),
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter_ratio: s.jitter_ratio,
        }
    }
}

impl RetryConfig {
    /// 第 retry 次重试（从 1 开始）前的等待时间：base * 2^(retry-1) + 抖动，封顶 max_delay
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp = base_ms * 2f64.powi(retry.saturating_sub(1).min(30) as i32);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let jitter = if ratio > 0.0 && exp > 0.0 {
            rand::thread_rng().gen_range(0.0..=exp * ratio)
        } else {
            0.0
        };
        let capped = (exp + jitter).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// 带重试的 LLM 客户端：所有 Planner / Worker / Solver / LLM 工具调用都经过这里
#[derive(Clone)]
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
    events: EventBus,
    cancel: CancelScope,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig, events: EventBus) -> Self {
        Self {
            inner,
            config,
            events,
            cancel: CancelScope::new(),
        }
    }

    /// 与外部共享取消作用域（Pipeline 每次 process 会 reset）
    pub fn with_cancel_scope(mut self, scope: CancelScope) -> Self {
        self.cancel = scope;
        self
    }

    pub fn cancel_scope(&self) -> &CancelScope {
        &self.cancel
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 中止当前正在进行的调用
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// 使用作用域内当前令牌发起调用
    pub async fn complete(
        &self,
        messages: &[Message],
        shape: Option<&ResponseShape>,
        caller: Caller,
    ) -> Result<String, LlmError> {
        let token = self.cancel.token();
        self.complete_with_token(messages, shape, caller, &token).await
    }

    pub async fn complete_with_token(
        &self,
        messages: &[Message],
        shape: Option<&ResponseShape>,
        caller: Caller,
        token: &CancellationToken,
    ) -> Result<String, LlmError> {
        let started = Instant::now();
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(self.fail(LlmError::Cancelled, "cancelled", &caller));
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(LlmError::Cancelled),
                res = tokio::time::timeout(self.config.timeout, self.inner.complete(messages, shape)) => {
                    match res {
                        Ok(r) => r,
                        Err(_) => Err(LlmError::Timeout { timeout_ms }),
                    }
                }
            };

            let err = match outcome {
                Ok(response) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    tracing::debug!(caller = %caller, attempts = attempt, duration_ms, "llm call completed");
                    self.events.emit(PipelineEvent::Completion {
                        caller,
                        attempts: attempt,
                        duration_ms,
                        usage: response.usage,
                    });
                    return Ok(response.content);
                }
                Err(e) => e,
            };

            match err {
                LlmError::Cancelled => {
                    return Err(self.fail(LlmError::Cancelled, "cancelled", &caller));
                }
                e if !e.is_retryable() => {
                    let context = e.kind();
                    return Err(self.fail(e, context, &caller));
                }
                e if attempt > self.config.max_retries => {
                    let exhausted = LlmError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    };
                    return Err(self.fail(exhausted, "max_retries_exceeded", &caller));
                }
                e => {
                    let delay = self.config.backoff_delay(attempt);
                    tracing::warn!(
                        caller = %caller,
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "llm call failed, retrying"
                    );
                    self.events.emit(PipelineEvent::Retry {
                        caller: caller.clone(),
                        attempt,
                        max_retries: self.config.max_retries,
                        backoff_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return Err(self.fail(LlmError::Cancelled, "cancelled", &caller));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn fail(&self, err: LlmError, context: &str, caller: &Caller) -> LlmError {
        tracing::error!(caller = %caller, context, error = %err, "llm call failed");
        self.events.emit(PipelineEvent::error(
            err.to_string(),
            context,
            Some(caller.to_string()),
        ));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            timeout: Duration::from_millis(200),
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_ratio: 0.5,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let cfg = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_ratio: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(cfg.backoff_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_jitter_within_bounds() {
        let cfg = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.5,
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let d = cfg.backoff_delay(2).as_millis();
            assert!((200..=300).contains(&d), "delay {d} out of range");
        }
    }

    #[tokio::test]
    async fn test_success_emits_completion_with_caller() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::with_responses(["ok"]));
        let client = RetryingLlmClient::new(mock, fast_config(3), bus);

        let out = client
            .complete(&[Message::user("hi")], None, Caller::Planner)
            .await
            .unwrap();
        assert_eq!(out, "ok");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            PipelineEvent::Completion { caller, attempts, usage, .. } => {
                assert_eq!(*caller, Caller::Planner);
                assert_eq!(*attempts, 1);
                assert!(usage.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new());
        mock.push_errs(LlmError::Provider("502".into()), 2);
        mock.push_ok("recovered");
        let client = RetryingLlmClient::new(mock.clone(), fast_config(3), bus);

        let out = client
            .complete(&[Message::user("hi")], None, Caller::Solver)
            .await
            .unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(mock.calls(), 3);

        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["retry", "retry", "completion"]);
    }

    #[tokio::test]
    async fn test_max_retries_bounds_attempts() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new());
        mock.push_errs(LlmError::Provider("down".into()), 10);
        let client = RetryingLlmClient::new(mock.clone(), fast_config(3), bus);

        let err = client
            .complete(&[Message::user("hi")], None, Caller::Solver)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(mock.calls(), 4);

        let events = drain(&mut rx);
        let retries = events.iter().filter(|e| e.kind() == "retry").count();
        assert_eq!(retries, 3);
        match events.last() {
            Some(PipelineEvent::Error { context, .. }) => assert_eq!(context, "max_retries_exceeded"),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_content_policy_never_retried() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(LlmError::ContentPolicy("flagged".into()));
        mock.push_ok("should not be reached");
        let client = RetryingLlmClient::new(mock.clone(), fast_config(3), bus);

        let err = client
            .complete(&[Message::user("bad")], None, Caller::Planner)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ContentPolicy(_)));
        assert_eq!(mock.calls(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PipelineEvent::Error { context, .. } if context == "content_policy"));
    }

    #[tokio::test]
    async fn test_timeout_is_retried_and_reported() {
        let bus = EventBus::new(32);
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(100)));
        let cfg = RetryConfig {
            timeout: Duration::from_millis(10),
            ..fast_config(1)
        };
        let client = RetryingLlmClient::new(mock.clone(), cfg, bus);

        let err = client
            .complete(&[Message::user("slow")], None, Caller::Worker)
            .await
            .unwrap_err();
        match err {
            LlmError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, LlmError::Timeout { timeout_ms: 10 }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_abort_surfaces_cancelled_without_retry() {
        let bus = EventBus::new(32);
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(5)));
        let cfg = RetryConfig {
            timeout: Duration::from_secs(10),
            ..fast_config(3)
        };
        let client = RetryingLlmClient::new(mock.clone(), cfg, bus);
        client.cancel_scope().reset();

        let aborter = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.abort();
        });

        let err = client
            .complete(&[Message::user("long")], None, Caller::Solver)
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_emits_single_error_and_no_later_retry() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(5)));
        let cfg = RetryConfig {
            timeout: Duration::from_secs(10),
            ..fast_config(3)
        };
        let client = RetryingLlmClient::new(mock, cfg, bus);

        let aborter = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.abort();
        });
        let err = client
            .complete(&[Message::user("long")], None, Caller::Planner)
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Cancelled);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PipelineEvent::Error { context, .. } if context == "cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retrying() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new());
        mock.push_errs(LlmError::Provider("503".into()), 10);
        let cfg = RetryConfig {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.0,
        };
        let client = RetryingLlmClient::new(mock.clone(), cfg, bus);

        let aborter = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            aborter.abort();
        });
        let started = Instant::now();
        let err = client
            .complete(&[Message::user("hi")], None, Caller::Solver)
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(mock.calls(), 1);

        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["retry", "error"]);
    }

    #[tokio::test]
    async fn test_abort_when_idle_does_not_poison_next_call() {
        let bus = EventBus::new(32);
        let mock = Arc::new(MockLlmClient::with_responses(["ok"]));
        let client = RetryingLlmClient::new(mock.clone(), fast_config(3), bus);

        client.abort();
        let out = client
            .complete(&[Message::user("hi")], None, Caller::Planner)
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_calls_after_abort_run_normally() {
        let bus = EventBus::new(32);
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(200)));
        let cfg = RetryConfig {
            timeout: Duration::from_secs(5),
            ..fast_config(3)
        };
        let client = RetryingLlmClient::new(mock.clone(), cfg, bus);

        let aborter = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.abort();
        });
        let first = client
            .complete(&[Message::user("first")], None, Caller::Planner)
            .await;
        assert_eq!(first, Err(LlmError::Cancelled));

        let second = client
            .complete(&[Message::user("second")], None, Caller::Solver)
            .await
            .unwrap();
        assert_eq!(second, "Echo from Mock: second");
        assert_eq!(mock.calls(), 2);
    }
}
