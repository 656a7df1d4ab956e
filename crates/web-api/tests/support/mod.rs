use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use application::{
    AlertDispatcher, AlertRateLimiter, Clock, DispatcherDependencies, PermissionChangeReactor,
    ReplayBuffer, StoreSequencer, SubscriptionStore, SystemClock,
};
use config::AppConfig;
use domain::{ConnectionRegistry, IdentityId, PermissionSnapshot};
use infrastructure::{InMemoryAuthorizationService, InMemoryConnectionRegistry};
use web_api::{router, AppState, JwtService};

pub struct TestServer {
    pub addr: SocketAddr,
    pub jwt_service: Arc<JwtService>,
    pub authorization: Arc<InMemoryAuthorizationService>,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str, tab_id: &str) -> String {
        format!("ws://{}/ws?token={}&tab_id={}", self.addr, token, tab_id)
    }

    /// 存入身份的权限快照（模拟授权系统的初始下发）
    pub async fn grant(&self, identity_id: IdentityId, version: u64, permissions: &[&str]) {
        let permissions: HashSet<String> = permissions.iter().map(|p| p.to_string()).collect();
        self.authorization
            .load_snapshot(
                identity_id,
                PermissionSnapshot::new(version, permissions, HashSet::new()),
            )
            .await;
    }
}

pub async fn spawn_server() -> TestServer {
    let config = AppConfig::from_env_with_defaults();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let subscriptions = Arc::new(SubscriptionStore::new(clock.clone()));
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let authorization = Arc::new(InMemoryAuthorizationService::new());
    let dispatcher = Arc::new(AlertDispatcher::new(DispatcherDependencies {
        subscriptions: subscriptions.clone(),
        registry: registry.clone(),
        rate_limiter: Arc::new(AlertRateLimiter::new()),
        replay: Arc::new(ReplayBuffer::new(
            config.replay.max_entries,
            Duration::from_secs(config.replay.max_age_secs),
            clock.clone(),
        )),
        sequencer: Arc::new(StoreSequencer::new()),
        clock,
    }));
    let reactor = Arc::new(PermissionChangeReactor::new(
        subscriptions.clone(),
        registry.clone(),
    ));
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        subscriptions,
        registry as Arc<dyn ConnectionRegistry>,
        dispatcher,
        reactor,
        authorization.clone(),
        jwt_service.clone(),
        config.stream.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.ok();
    });

    TestServer {
        addr,
        jwt_service,
        authorization,
    }
}
