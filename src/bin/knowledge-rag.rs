//! Knowledge RAG server binary
//!
//! Loads configuration, wires the retrieval and answer pipeline together and
//! serves the HTTP API until Ctrl+C or SIGTERM.

use knowledge_rag::{
    ai::AiServiceManager,
    answer::AnswerService,
    api::{build_router, AppState},
    config::loader::load_config_or_default,
    conversation::{ConversationStore, InMemoryConversationStore},
    middleware::{AuthMiddleware, RateLimiter},
    observability::{init_observability, HealthChecker, MetricsCollector},
    rag::{MokaCacheBackend, QueryVectorizer, RagQueryService, SearchCache},
    shutdown::ShutdownCoordinator,
    vector_store::build_vector_store,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config_or_default(&config_path)?;
    config.validate()?;

    init_observability(&config.logging.level, &config.logging.format);
    info!("Starting knowledge-rag server");
    info!("Configuration loaded and validated from {}", config_path);

    let metrics = Arc::new(MetricsCollector::new());
    let shutdown = Arc::new(ShutdownCoordinator::new());

    // AI providers
    let ai = Arc::new(AiServiceManager::from_config(&config)?.with_metrics(metrics.clone()));
    info!(providers = ?ai.provider_ids(), "AI service manager initialized");

    // Retrieval
    let store = build_vector_store(&config.vector_store)?;
    if let Err(e) = store.health_check().await {
        warn!(store = store.name(), error = %e, "Vector store not reachable at startup");
    }

    let cache_ttl = Duration::from_secs(config.cache.ttl_secs);
    let cache = if config.cache.enabled {
        SearchCache::new(
            Arc::new(MokaCacheBackend::new(config.cache.max_entries, cache_ttl)),
            cache_ttl,
        )
    } else {
        SearchCache::disabled()
    };
    let cache = Arc::new(cache.with_metrics(metrics.clone()));

    let rag = Arc::new(
        RagQueryService::new(
            QueryVectorizer::new(ai.clone(), config.search.max_query_chars),
            store.clone(),
            cache.clone(),
            config.search.clone(),
        )
        .with_metrics(metrics.clone()),
    );

    // Conversations and answers
    let conversations: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let answers = Arc::new(AnswerService::new(
        rag.clone(),
        ai.clone(),
        conversations.clone(),
        config.answer.clone(),
    ));

    // Request guards
    let auth = Arc::new(AuthMiddleware::new(&config.auth));
    if !auth.is_enabled() {
        warn!("Authentication is disabled; callers are identified by the x-owner-id header");
    }
    let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let rate_limiter_task = rate_limiter.clone().spawn_cleanup_task(shutdown.subscribe());

    // Background provider recovery probes
    let monitor_task = config.resilience.health_monitor_enabled.then(|| {
        ai.clone().spawn_health_monitor(
            Duration::from_secs(config.resilience.health_check_interval_secs),
            shutdown.subscribe(),
        )
    });

    let health_checker = Arc::new(HealthChecker::new(store, ai.clone(), cache));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState {
        config: Arc::new(config),
        rag,
        answers,
        ai,
        conversations,
        health_checker,
        metrics,
        auth,
        rate_limiter,
    };
    let app = build_router(state);

    // Translate OS signals into the shutdown broadcast
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move { signal_shutdown.wait_for_signal().await });

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.wait().await })
        .await?;

    shutdown.shutdown();
    let _ = rate_limiter_task.await;
    if let Some(task) = monitor_task {
        let _ = task.await;
    }

    info!("Server shutdown complete");
    Ok(())
}
