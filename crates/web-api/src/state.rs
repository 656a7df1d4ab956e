use std::sync::Arc;

use application::{AlertDispatcher, PermissionChangeReactor, SubscriptionStore};
use config::StreamConfig;
use domain::ConnectionRegistry;
use infrastructure::InMemoryAuthorizationService;

use crate::auth::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<SubscriptionStore>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub reactor: Arc<PermissionChangeReactor>,
    /// 权限快照目录，由 /internal/permissions 推送更新
    pub authorization: Arc<InMemoryAuthorizationService>,
    pub jwt_service: Arc<JwtService>,
    pub stream: StreamConfig,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriptions: Arc<SubscriptionStore>,
        registry: Arc<dyn ConnectionRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        reactor: Arc<PermissionChangeReactor>,
        authorization: Arc<InMemoryAuthorizationService>,
        jwt_service: Arc<JwtService>,
        stream: StreamConfig,
    ) -> Self {
        Self {
            subscriptions,
            registry,
            dispatcher,
            reactor,
            authorization,
            jwt_service,
            stream,
        }
    }
}
