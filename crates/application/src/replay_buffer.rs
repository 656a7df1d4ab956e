//! 回放缓冲
//!
//! 每个身份一个有界环形缓冲，保存最近投递/未投递的已定序事件，
//! 供断线重连恢复。按条数和时限双重限制，先到为准；最旧的条目
//! 被静默淘汰——重连客户端若超出回放窗口，收到的是缺口标记和
//! 可回放的最低序列号，而不是陈旧数据。
//!
//! `drain` 是一次性的：返回并消费当前未投递窗口，重复调用同一
//! 窗口可能返回更少的条目或缺口标记。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::Clock;
use domain::{IdentityId, SequencedEvent, Timestamp};

/// 单条回放记录
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub event: SequencedEvent,
    pub recorded_at: Timestamp,
    /// 缺席表示尚未投递到任何连接
    pub delivered_at: Option<Timestamp>,
}

/// 一次 drain 的结果
#[derive(Debug, Clone, Default)]
pub struct DrainOutcome {
    /// 有未投递条目被淘汰时，可回放的最低序列号
    pub gap_lowest_available: Option<u64>,
    /// 按序列号升序排列的待回放事件
    pub events: Vec<SequencedEvent>,
}

#[derive(Debug, Default)]
struct IdentityBuffer {
    entries: VecDeque<ReplayEntry>,
    /// 未投递条目被淘汰后置位，下一次 drain 报告缺口
    evicted_undelivered: bool,
}

pub struct ReplayBuffer {
    max_entries: usize,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    buffers: RwLock<HashMap<IdentityId, IdentityBuffer>>,
}

impl ReplayBuffer {
    pub fn new(max_entries: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_entries,
            max_age,
            clock,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// 记录一个已通过评估管线的事件
    pub async fn record(&self, identity_id: IdentityId, event: &SequencedEvent, delivered: bool) {
        let now = self.clock.now();
        let mut buffers = self.buffers.write().await;
        let buffer = buffers.entry(identity_id).or_default();

        buffer.entries.push_back(ReplayEntry {
            event: event.clone(),
            recorded_at: now,
            delivered_at: delivered.then_some(now),
        });

        Self::evict(buffer, self.max_entries, self.max_age, now);
    }

    /// 排出未投递窗口。返回 `since_sequence` 之后的未投递事件并
    /// 标记为已投递；若窗口内有未投递条目已被淘汰，附带缺口标记。
    pub async fn drain(&self, identity_id: IdentityId, since_sequence: u64) -> DrainOutcome {
        let now = self.clock.now();
        let mut buffers = self.buffers.write().await;
        let Some(buffer) = buffers.get_mut(&identity_id) else {
            return DrainOutcome::default();
        };

        Self::evict(buffer, self.max_entries, self.max_age, now);

        let gap_lowest_available = buffer.evicted_undelivered.then(|| {
            buffer
                .entries
                .front()
                .map(|entry| entry.event.sequence)
                .unwrap_or(since_sequence + 1)
        });
        buffer.evicted_undelivered = false;

        let mut events = Vec::new();
        for entry in buffer.entries.iter_mut() {
            if entry.delivered_at.is_none() && entry.event.sequence > since_sequence {
                entry.delivered_at = Some(now);
                events.push(entry.event.clone());
            }
        }

        if !events.is_empty() || gap_lowest_available.is_some() {
            debug!(
                identity_id = %identity_id,
                replayed = events.len(),
                gap = gap_lowest_available.is_some(),
                "回放窗口已排出"
            );
        }
        DrainOutcome {
            gap_lowest_available,
            events,
        }
    }

    /// 回放中途连接断开时调用：已 drain 的条目可能没有真正到达
    /// 客户端，置位缺口标志让下一次 drain 报告缺口，客户端据此
    /// 走 REST 补拉。
    pub async fn note_interrupted(&self, identity_id: IdentityId) {
        self.buffers
            .write()
            .await
            .entry(identity_id)
            .or_default()
            .evicted_undelivered = true;
    }

    /// 丢弃身份的整个缓冲（订阅被清除时调用）
    pub async fn forget(&self, identity_id: IdentityId) {
        self.buffers.write().await.remove(&identity_id);
    }

    /// 淘汰所有身份的过期条目（维护任务调用）
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let mut buffers = self.buffers.write().await;
        for buffer in buffers.values_mut() {
            Self::evict(buffer, self.max_entries, self.max_age, now);
        }
        buffers.retain(|_, buffer| !buffer.entries.is_empty() || buffer.evicted_undelivered);
    }

    fn evict(buffer: &mut IdentityBuffer, max_entries: usize, max_age: Duration, now: Timestamp) {
        while buffer.entries.len() > max_entries
            || buffer
                .entries
                .front()
                .is_some_and(|entry| now - entry.recorded_at > max_age)
        {
            let Some(evicted) = buffer.entries.pop_front() else {
                break;
            };
            if evicted.delivered_at.is_none() {
                buffer.evicted_undelivered = true;
            }
        }
    }
}
