//! 门店序列号分配器
//!
//! 每个门店维护独立的单调递增序列号，用于回放排序和投递去重。
//! 分发器保证同一门店的事件按到达顺序串行处理，序列号在该
//! 串行段内分配，因此门店内严格单调、无空洞。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use domain::StoreId;

#[derive(Default)]
pub struct StoreSequencer {
    counters: RwLock<HashMap<StoreId, Arc<AtomicU64>>>,
}

impl StoreSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为门店分配下一个序列号，从 1 开始
    pub fn next(&self, store_id: StoreId) -> u64 {
        let counter = self.counter_for(store_id);
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 门店当前已分配到的序列号
    pub fn current(&self, store_id: StoreId) -> u64 {
        self.counter_for(store_id).load(Ordering::SeqCst)
    }

    fn counter_for(&self, store_id: StoreId) -> Arc<AtomicU64> {
        if let Ok(counters) = self.counters.read() {
            if let Some(counter) = counters.get(&store_id) {
                return counter.clone();
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters
            .entry(store_id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }
}
