pub mod authorization_service;
pub mod stream_service;

pub use authorization_service::*;
pub use stream_service::*;
