//! 主应用程序入口
//!
//! 启动告警分发服务：装配订阅存储、限流、回放、分发器与
//! 权限变更反应器，挂上 Axum Web API 与后台维护任务。

use std::{env, sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;

use application::{
    AlertDispatcher, AlertRateLimiter, Clock, DispatcherDependencies, PermissionChangeReactor,
    ReplayBuffer, StoreSequencer, SubscriptionStore, SystemClock,
};
use config::AppConfig;
use domain::ConnectionRegistry;
use infrastructure::{InMemoryAuthorizationService, InMemoryConnectionRegistry};
use web_api::{router, AppState, JwtService};

/// 后台维护周期
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 读取配置：生产环境要求显式提供关键变量并通过校验
    let config = if env::var("APP_ENV").as_deref() == Ok("production") {
        let config = AppConfig::from_env();
        config.validate()?;
        config
    } else {
        AppConfig::from_env_with_defaults()
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let subscriptions = Arc::new(SubscriptionStore::new(clock.clone()));
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let rate_limiter = Arc::new(AlertRateLimiter::new());
    let replay = Arc::new(ReplayBuffer::new(
        config.replay.max_entries,
        Duration::from_secs(config.replay.max_age_secs),
        clock.clone(),
    ));

    let dispatcher = Arc::new(AlertDispatcher::new(DispatcherDependencies {
        subscriptions: subscriptions.clone(),
        registry: registry.clone(),
        rate_limiter: rate_limiter.clone(),
        replay: replay.clone(),
        sequencer: Arc::new(StoreSequencer::new()),
        clock,
    }));
    let reactor = Arc::new(PermissionChangeReactor::new(
        subscriptions.clone(),
        registry.clone(),
    ));
    let authorization = Arc::new(InMemoryAuthorizationService::new());
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    // 后台维护：清理空闲连接、过期订阅与陈旧限流桶
    tokio::spawn(maintenance_loop(
        registry.clone(),
        subscriptions.clone(),
        rate_limiter,
        replay,
        Duration::from_secs(config.stream.idle_timeout_secs),
        Duration::from_secs(config.stream.subscription_grace_secs),
    ));

    let state = AppState::new(
        subscriptions,
        registry as Arc<dyn ConnectionRegistry>,
        dispatcher,
        reactor,
        authorization,
        jwt_service,
        config.stream.clone(),
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("告警分发服务启动在 http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn maintenance_loop(
    registry: Arc<InMemoryConnectionRegistry>,
    subscriptions: Arc<SubscriptionStore>,
    rate_limiter: Arc<AlertRateLimiter>,
    replay: Arc<ReplayBuffer>,
    idle_timeout: Duration,
    subscription_grace: Duration,
) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        interval.tick().await;

        let closed = registry.cleanup_idle(idle_timeout).await;
        let purged = subscriptions.purge_expired(subscription_grace).await;
        rate_limiter.cleanup_expired();
        replay.sweep().await;

        if closed > 0 || purged > 0 {
            tracing::info!(closed, purged, "维护任务完成");
        }
    }
}
