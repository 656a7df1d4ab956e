//! Web API 层。
//!
//! 提供 Axum 路由：JWT 握手的 WebSocket 升级端点、面向分析
//! 管线的内部事件注入端点，以及授权系统的权限快照推送端点。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
