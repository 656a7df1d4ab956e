//! 应用层实现。
//!
//! 告警分发核心：订阅存储、限流、回放缓冲、定序与扇出分发，
//! 以及权限变更的反应处理。对外部适配器（连接注册表、授权服务）
//! 只依赖领域层的抽象接口。

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod permission_reactor;
pub mod rate_limiter;
pub mod replay_buffer;
pub mod sequencer;
pub mod subscription_store;

pub use clock::{Clock, SystemClock};
pub use dispatcher::{AlertDispatcher, DispatcherDependencies};
pub use error::ApplicationError;
pub use permission_reactor::{PermissionChangeReactor, PermissionUpdate};
pub use rate_limiter::AlertRateLimiter;
pub use replay_buffer::{DrainOutcome, ReplayBuffer, ReplayEntry};
pub use sequencer::StoreSequencer;
pub use subscription_store::SubscriptionStore;
