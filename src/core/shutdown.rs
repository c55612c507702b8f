//! 取消作用域与信号处理
//!
//! 每次 LLM 调用开始时取走作用域内的当前令牌；`cancel()` 取消该令牌后立即换上新令牌，
//! 因此只中止正在进行的调用（以 LlmError::Cancelled 形式在调用点浮现），之后的调用不受影响。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// 当前任务的取消令牌持有者（可跨线程 clone）
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    current: Arc<Mutex<CancellationToken>>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 换上新的令牌并返回；之前的令牌不受影响
    pub fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard = token.clone();
        token
    }

    /// 当前令牌（未 reset 过时为初始令牌）
    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 取消当前正在进行的调用，并为后续调用换上新令牌
    pub fn cancel(&self) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

/// 安装 Ctrl+C 处理：第一次中止当前调用，第二次直接退出进程
pub fn cancel_on_ctrl_c(scope: CancelScope) {
    tokio::spawn(async move {
        let mut presses = 0u32;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            if presses == 1 {
                tracing::info!("Received Ctrl+C, cancelling in-flight request...");
                scope.cancel();
            } else {
                tracing::warn!("Received second Ctrl+C, exiting");
                std::process::exit(130);
            }
        }
    });
}
