//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按脚本队列依次返回预设结果（文本或错误）；队列耗尽后回显最后一条 User 消息。
//! 同时记录每次请求，便于测试断言 prompt 内容与调用次数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::LlmError;
use crate::llm::{EmbeddingProvider, LlmClient, LlmResponse, Message, ResponseShape, Role, TokenUsage};

/// Mock 客户端：脚本化回复 + 回显兜底
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定文本
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in responses {
            mock.push_ok(r);
        }
        mock
    }

    /// 每次调用前先等待（用于超时 / 取消测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, response: impl Into<String>) {
        self.lock_script().push_back(Ok(response.into()));
    }

    pub fn push_err(&self, err: LlmError) {
        self.lock_script().push_back(Err(err));
    }

    /// 连续压入 n 个相同错误
    pub fn push_errs(&self, err: LlmError, n: usize) {
        let mut script = self.lock_script();
        for _ in 0..n {
            script.push_back(Err(err.clone()));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 所有已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _shape: Option<&ResponseShape>,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.lock_script().pop_front();
        let content = match scripted {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                format!("Echo from Mock: {}", last_user)
            }
        };

        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let usage = TokenUsage::new((prompt_chars / 4) as u64, (content.chars().count() / 4) as u64);
        Ok(LlmResponse {
            content,
            usage: Some(usage),
        })
    }
}

/// 确定性的字符三元组哈希嵌入（测试用，无需网络）
#[async_trait]
impl EmbeddingProvider for MockLlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        const DIMS: usize = 64;
        let mut v = vec![0.0f32; DIMS];
        let lower: Vec<char> = text.to_lowercase().chars().collect();
        for w in lower.windows(3) {
            let h = w.iter().fold(7u32, |acc, c| acc.wrapping_mul(31).wrapping_add(*c as u32));
            v[(h as usize) % DIMS] += 1.0;
        }
        Ok(v)
    }
}
