use std::process;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use voltgate::{
    application::{
        audit::AuditRecorder,
        auth::{AuthGate, LoginThrottle},
        error::AppError,
        repos::{AuditRepo, PowerUnitsRepo, UsersRepo},
        sessions::KvSessionStore,
        units::PowerUnitService,
    },
    cache::{
        CacheConfig, DisconnectedStore, GuardedStore, LayeredCache, RedisStore,
        RevalidationQueue, ValueStore,
    },
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{ApiRateLimiter, HttpState, build_router},
        telemetry,
    },
    resilience::{BreakerConfig, BreakerRegistry, RetryExecutor, RetryPolicy},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Some(config::Command::Serve(_)) | None => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let database_url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url must be configured"))?;
    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
    )
    .await
    .map_err(|err| InfraError::database(err.to_string()))?;
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
        failure_threshold: settings.breaker.failure_threshold.get(),
        recovery_timeout: settings.breaker.recovery_timeout,
        ignored: Vec::new(),
    }));
    let retry = Arc::new(RetryExecutor::new());
    let retry_policy = RetryPolicy {
        max_attempts: settings.retry.max_attempts.get(),
        base_delay: settings.retry.base_delay,
        max_delay: settings.retry.max_delay,
        backoff_multiplier: settings.retry.backoff_multiplier,
        jitter: settings.retry.jitter,
        ..RetryPolicy::default()
    };

    let store: Arc<dyn ValueStore> = match RedisStore::connect(&settings.store).await {
        Ok(store) => Arc::new(store),
        Err(error) => {
            warn!(
                target = "voltgate::main",
                error = %error,
                "key-value store unreachable at startup; running degraded"
            );
            Arc::new(DisconnectedStore)
        }
    };
    let guarded = Arc::new(GuardedStore::new(
        store,
        breakers.breaker("cache-store"),
        retry.clone(),
        retry_policy,
        settings.store.namespace.clone(),
    ));

    let cache_config = CacheConfig {
        memory_limit: settings.cache.memory_limit.get() as usize,
        default_ttl: settings.cache.default_ttl,
        revalidation_queue_depth: settings.cache.revalidation_queue_depth.get() as usize,
    };
    let revalidation = RevalidationQueue::spawn(cache_config.revalidation_queue_depth);
    let cache = Arc::new(LayeredCache::new(&cache_config, guarded.clone(), revalidation));

    let recorder = AuditRecorder::new(repositories.clone() as Arc<dyn AuditRepo>);
    let sessions = Arc::new(KvSessionStore::new(guarded.clone(), settings.sessions.ttl));
    let throttle = LoginThrottle::new(
        guarded.clone(),
        settings.sessions.login_max_attempts.get(),
        settings.sessions.login_window,
    );
    let gate = Arc::new(AuthGate::new(
        sessions,
        repositories.clone() as Arc<dyn UsersRepo>,
        recorder.clone(),
        Some(throttle),
    ));
    let units = Arc::new(PowerUnitService::new(
        repositories.clone() as Arc<dyn PowerUnitsRepo>,
        cache.clone(),
        recorder.clone(),
    ));

    match units.warm_cache().await {
        Ok(warmed) => info!(target = "voltgate::main", warmed, "startup cache warm complete"),
        Err(error) => warn!(
            target = "voltgate::main",
            error = %error,
            "startup cache warm failed; continuing cold"
        ),
    }

    let state = HttpState {
        gate,
        units,
        cache,
        breakers,
        retry,
        audit: repositories.clone() as Arc<dyn AuditRepo>,
        recorder,
        rate_limiter: ApiRateLimiter::new(
            settings.rate_limit.window,
            settings.rate_limit.max_requests.get(),
        ),
    };
    let router = build_router(state);

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::Io)?;
    info!(
        target = "voltgate::main",
        addr = %settings.server.addr,
        "voltgate listening"
    );

    let shutdown = Arc::new(Notify::new());
    let grace = settings.server.graceful_shutdown;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!(target = "voltgate::main", "shutdown signal received");
            shutdown.notify_waiters();
            tokio::time::sleep(grace).await;
            warn!(
                target = "voltgate::main",
                grace_secs = grace.as_secs(),
                "graceful shutdown window elapsed, exiting"
            );
            process::exit(0);
        });
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "voltgate::main", "voltgate stopped");
    Ok(())
}
