//! 告警分发系统核心领域模型
//!
//! 包含身份、连接、订阅、告警事件等核心实体，以及相关的业务规则。

pub mod entities;
pub mod errors;
pub mod permissions;
pub mod services;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use services::*;
pub use value_objects::*;
