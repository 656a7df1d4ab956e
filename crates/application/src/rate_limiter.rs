//! 告警限流器
//!
//! 每个身份一个令牌桶：容量取订阅偏好的 maxAlertsPerMinute，
//! 按 容量/60 的速率连续补充。限流以身份为单位评估——多标签页
//! 不会放大配额。桶空时事件直接丢弃而非排队：推送是尽力而为，
//! 事实记录以事件系统为准。

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use domain::IdentityId;

/// 单个身份的令牌桶
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: u32,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity as f64,
            capacity,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, window: Duration) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let rate = self.capacity as f64 / window.as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// 订阅偏好更新后容量可能变化，令牌数随之收缩
    fn resize(&mut self, capacity: u32) {
        if self.capacity != capacity {
            self.capacity = capacity;
            self.tokens = self.tokens.min(capacity as f64);
        }
    }
}

/// 告警限流器
pub struct AlertRateLimiter {
    /// 补充窗口，生产环境固定为一分钟
    window: Duration,
    buckets: RwLock<HashMap<IdentityId, TokenBucket>>,
}

impl AlertRateLimiter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// 自定义补充窗口（测试用短窗口）
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// 尝试为一次投递消耗一个令牌。
    /// 调用方保证抑制与过滤发生在此之前：被过滤的事件不消耗配额。
    pub fn try_consume(&self, identity_id: IdentityId, capacity: u32) -> bool {
        let mut buckets = match self.buckets.write() {
            Ok(buckets) => buckets,
            // 锁中毒时放行而不是丢事件，限流是保护机制不是正确性约束
            Err(_) => return true,
        };

        let bucket = buckets
            .entry(identity_id)
            .or_insert_with(|| TokenBucket::new(capacity));
        bucket.resize(capacity);
        bucket.refill(self.window);
        bucket.last_used = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 当前剩余令牌数（向下取整）
    pub fn remaining(&self, identity_id: IdentityId) -> Option<u32> {
        let mut buckets = self.buckets.write().ok()?;
        let window = self.window;
        buckets.get_mut(&identity_id).map(|bucket| {
            bucket.refill(window);
            bucket.tokens as u32
        })
    }

    /// 重置身份的配额（取消订阅时调用）
    pub fn reset(&self, identity_id: IdentityId) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.remove(&identity_id);
        }
    }

    /// 清理长期未使用的令牌桶（防止内存泄漏）
    pub fn cleanup_expired(&self) {
        if let Ok(mut buckets) = self.buckets.write() {
            let now = Instant::now();
            let window = self.window;
            buckets.retain(|_, bucket| now.duration_since(bucket.last_used) < window * 2);
        }
    }
}

impl Default for AlertRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
