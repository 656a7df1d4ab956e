//! 告警分发器
//!
//! 分发入口。同一门店的事件摄入经每门店互斥锁串行化：定序、
//! 候选解析、过滤评估、限流与扇出在同一串行段内完成，保证
//! 门店内事件按到达顺序推送、序列号与投递顺序一致。
//!
//! 不同门店的摄入互不阻塞。
//!
//! 投递语义是至多一次：序列号只在串行段内分配一次，每个
//! (身份, 序列号) 组合恰好被评估一次。连接挂接（attach）同样
//! 在门店摄入锁内完成，回放事件因此严格先于挂接后的实时投递。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::rate_limiter::AlertRateLimiter;
use crate::replay_buffer::ReplayBuffer;
use crate::sequencer::StoreSequencer;
use crate::subscription_store::SubscriptionStore;
use domain::{
    AlertEvent, ConnectionId, ConnectionInfo, ConnectionRegistry, DeliveryError, IdentityId,
    SequencedEvent, ServerMessage, StoreId,
};

/// 分发器的协作组件
pub struct DispatcherDependencies {
    pub subscriptions: Arc<SubscriptionStore>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub rate_limiter: Arc<AlertRateLimiter>,
    pub replay: Arc<ReplayBuffer>,
    pub sequencer: Arc<StoreSequencer>,
    pub clock: Arc<dyn Clock>,
}

pub struct AlertDispatcher {
    deps: DispatcherDependencies,
    /// 每门店一把摄入锁
    intake: RwLock<HashMap<StoreId, Arc<Mutex<()>>>>,
}

impl AlertDispatcher {
    pub fn new(deps: DispatcherDependencies) -> Self {
        Self {
            deps,
            intake: RwLock::new(HashMap::new()),
        }
    }

    /// 摄入一个事件并扇出到所有匹配的订阅者。
    ///
    /// 评估管线按固定顺序执行：授权与过滤（accepts）、限流、
    /// 扇出、回放记录。被过滤或抑制的事件不消耗限流配额；
    /// 被限流丢弃的事件也不进入回放缓冲，否则重连回放会
    /// 绕过配额。
    pub async fn publish(
        &self,
        store_id: StoreId,
        event: AlertEvent,
    ) -> Result<SequencedEvent, ApplicationError> {
        let intake = self.intake_lock(store_id).await;
        let _guard = intake.lock().await;

        let sequenced = SequencedEvent {
            store_id,
            sequence: self.deps.sequencer.next(store_id),
            occurred_at: self.deps.clock.now(),
            event,
        };

        let candidates = self.deps.subscriptions.candidates_for(store_id).await;
        let mut matched = 0usize;
        let mut delivered_identities = 0usize;

        for subscription in candidates {
            if !subscription.accepts(store_id, &sequenced.event) {
                continue;
            }
            matched += 1;

            let identity_id = subscription.identity_id;
            if sequenced.event.is_rate_limited()
                && !self
                    .deps
                    .rate_limiter
                    .try_consume(identity_id, subscription.preferences.max_alerts_per_minute)
            {
                debug!(
                    identity_id = %identity_id,
                    sequence = sequenced.sequence,
                    "配额耗尽，告警被丢弃"
                );
                continue;
            }

            let delivered = self.fan_out(identity_id, &sequenced).await;
            if delivered {
                delivered_identities += 1;
            }
            self.deps
                .replay
                .record(identity_id, &sequenced, delivered)
                .await;
        }

        info!(
            store_id = %store_id,
            sequence = sequenced.sequence,
            kind = sequenced.event.kind(),
            matched,
            delivered = delivered_identities,
            "事件已分发"
        );
        Ok(sequenced)
    }

    /// 向身份的全部活跃连接写入同一消息（多标签页扇出）。
    /// 任一连接写入成功即视为已投递；队列满的连接被注册表
    /// 标记为降级，由心跳恢复。
    async fn fan_out(&self, identity_id: IdentityId, sequenced: &SequencedEvent) -> bool {
        let message = ServerMessage::from_event(sequenced);
        let mut delivered = false;
        for connection_id in self.deps.registry.connections_for(identity_id).await {
            match self
                .deps
                .registry
                .send(connection_id, message.clone())
                .await
            {
                Ok(()) => delivered = true,
                Err(DeliveryError::QueueFull(id)) => {
                    warn!(connection_id = %id, "写队列已满，连接降级");
                }
                Err(err) => {
                    debug!(error = %err, "投递被跳过");
                }
            }
        }
        delivered
    }

    /// 把一个（重）建立的连接挂接到分发管线。
    ///
    /// 挂接在门店摄入锁内完成：先把缺口标记（如有）与未投递
    /// 窗口按序列号升序直接写入连接发送端，再注册到注册表。
    /// 同门店的 publish 在锁上排队，因此回放事件严格先于任何
    /// 实时事件到达。回放不经过限流。
    ///
    /// 调用方必须在调用前启动发送端的消费任务，否则回放量超过
    /// 队列容量时写入会在持锁状态下阻塞。
    pub async fn attach(
        &self,
        info: ConnectionInfo,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(ConnectionId, usize), ApplicationError> {
        let identity_id = info.identity_id;
        let connection_id = info.connection_id;
        let intake = self.intake_lock(info.store_id).await;
        let _guard = intake.lock().await;

        self.deps.subscriptions.note_connected(identity_id).await;

        let outcome = self.deps.replay.drain(identity_id, 0).await;
        let gap = outcome.gap_lowest_available.is_some();
        if let Some(lowest_available_sequence) = outcome.gap_lowest_available {
            if sender
                .send(ServerMessage::ReplayGap {
                    lowest_available_sequence,
                })
                .await
                .is_err()
            {
                self.deps.replay.note_interrupted(identity_id).await;
                return Err(DeliveryError::ConnectionClosed(connection_id).into());
            }
        }

        let mut replayed = 0usize;
        for event in &outcome.events {
            if sender.send(ServerMessage::from_event(event)).await.is_err() {
                // 回放中断：投递情况不可知，留下缺口让客户端补拉
                self.deps.replay.note_interrupted(identity_id).await;
                return Err(DeliveryError::ConnectionClosed(connection_id).into());
            }
            replayed += 1;
        }

        let connection_id = self.deps.registry.register(info, sender).await;

        if replayed > 0 || gap {
            info!(
                identity_id = %identity_id,
                connection_id = %connection_id,
                replayed,
                gap,
                "重连回放完成"
            );
        }
        Ok((connection_id, replayed))
    }

    /// 身份退订后的清理：配额与回放缓冲一并丢弃
    pub async fn forget_identity(&self, identity_id: IdentityId) {
        self.deps.rate_limiter.reset(identity_id);
        self.deps.replay.forget(identity_id).await;
    }

    async fn intake_lock(&self, store_id: StoreId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.intake.read().await.get(&store_id) {
            return lock.clone();
        }
        self.intake
            .write()
            .await
            .entry(store_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
