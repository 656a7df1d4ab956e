//! 基础设施层实现。
//!
//! 提供连接注册表与授权服务的内存适配器，实现领域层定义的接口。

pub mod auth;
pub mod registry;

pub use auth::InMemoryAuthorizationService;
pub use registry::InMemoryConnectionRegistry;
