//! 연결 재시도 정책

use std::time::Duration;

pub const DEFAULT_RETRY_LIMIT: u32 = 100;
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(3);

/// 고정 대기 시간을 갖는 제한 재시도
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub count: u32,
    pub limit: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(DEFAULT_RETRY_LIMIT, DEFAULT_RETRY_WAIT)
    }
}

impl RetryPolicy {
    pub fn new(limit: u32, wait: Duration) -> Self {
        RetryPolicy {
            count: 0,
            limit,
            wait,
        }
    }

    pub fn retryable(&self) -> bool {
        self.count < self.limit
    }

    pub fn count_up(&mut self) {
        self.count += 1;
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
