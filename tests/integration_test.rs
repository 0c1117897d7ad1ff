//! End-to-end tests for the retrieval and answer pipeline
//!
//! Everything runs in process: AI providers are scripted, the vector store and
//! the conversation store are the in-memory implementations.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use knowledge_rag::{
    ai::{
        AiProvider, AiServiceManager, ChatMessage, ChunkStream, CircuitBreaker, CircuitBreakerConfig, CircuitState,
        GenerationOptions, GenerationRequest, ModelInfo, ProviderResult, RetryPolicy,
    },
    answer::{AnswerOptions, AnswerQualityValidator, AnswerService, PromptTemplate},
    api::{build_router, AppState},
    config::{AuthSettings, Config, RateLimitSettings, TokenBinding},
    conversation::{ConversationStore, InMemoryConversationStore, Role},
    error::{ProviderError, RagError},
    middleware::{AuthMiddleware, RateLimiter},
    observability::{HealthChecker, MetricsCollector},
    rag::{MokaCacheBackend, QueryVectorizer, RagQueryService, SearchCache, SearchHit, SearchOptions, SourceMetadata},
    vector_store::{InMemoryVectorStore, StoreFilter, VectorStore},
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const REFUND_TEXT: &str = "Our refund policy allows customers to return any item within 30 days of purchase \
                           for a full refund, provided the original receipt is presented.";

/// Provider with a fixed embedding and a fixed answer
struct MockProvider {
    id: String,
    embedding: Vec<f32>,
    answer: String,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl MockProvider {
    fn new(id: &str, answer: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            embedding: vec![1.0, 0.0],
            answer: answer.to_string(),
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        })
    }

    fn failing(id: &str) -> Arc<Self> {
        let provider = Self::new(id, "");
        provider.failing.store(true, Ordering::SeqCst);
        provider
    }

    fn check(&self) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ProviderError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
        self.check()?;
        Ok(self.embedding.clone())
    }

    async fn generate(&self, _request: &GenerationRequest) -> ProviderResult<String> {
        self.check()?;
        Ok(self.answer.clone())
    }

    async fn generate_stream(&self, _request: &GenerationRequest) -> ProviderResult<ChunkStream> {
        self.check()?;
        let chunks: Vec<ProviderResult<String>> = self
            .answer
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> ProviderResult<()> {
        self.check()
    }
}

/// Store that returns every fragment twice, the copy with a lower score
struct DuplicatingStore {
    inner: InMemoryVectorStore,
}

#[async_trait]
impl VectorStore for DuplicatingStore {
    async fn query(&self, embedding: &[f32], filter: &StoreFilter, limit: usize) -> knowledge_rag::Result<Vec<SearchHit>> {
        let hits = self.inner.query(embedding, filter, limit).await?;
        let mut doubled = Vec::with_capacity(hits.len() * 2);
        for hit in hits {
            let mut copy = hit.clone();
            copy.score *= 0.9;
            doubled.push(hit);
            doubled.push(copy);
        }
        Ok(doubled)
    }

    async fn health_check(&self) -> knowledge_rag::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "duplicating"
    }
}

fn fragment(id: &str, owner: &str, content: &str) -> SearchHit {
    SearchHit {
        fragment_id: id.to_string(),
        document_id: format!("doc-{}", id),
        content: content.to_string(),
        score: 0.0,
        metadata: SourceMetadata {
            document_name: format!("{}.pdf", id),
            position: 0,
            owner_id: owner.to_string(),
            mime_type: Some("application/pdf".to_string()),
            file_size: Some(4096),
            document_created_at: None,
        },
    }
}

struct Pipeline {
    config: Config,
    ai: Arc<AiServiceManager>,
    store: Arc<InMemoryVectorStore>,
    cache: Arc<SearchCache>,
    rag: Arc<RagQueryService>,
    answers: Arc<AnswerService>,
    conversations: Arc<InMemoryConversationStore>,
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(1),
        jitter: false,
        ..RetryPolicy::default()
    }
}

fn pipeline(providers: Vec<Arc<MockProvider>>, breaker: CircuitBreakerConfig) -> Pipeline {
    let config = Config::default_config();
    let mut manager = AiServiceManager::new(quick_retry(), breaker);
    for (priority, provider) in providers.into_iter().enumerate() {
        manager = manager.with_provider(provider, priority as u32);
    }
    let ai = Arc::new(manager);

    let store = Arc::new(InMemoryVectorStore::new());
    let cache = Arc::new(SearchCache::new(
        Arc::new(MokaCacheBackend::new(1000, Duration::from_secs(60))),
        Duration::from_secs(60),
    ));
    let rag = Arc::new(RagQueryService::new(
        QueryVectorizer::new(ai.clone(), config.search.max_query_chars),
        store.clone(),
        cache.clone(),
        config.search.clone(),
    ));
    let conversations = Arc::new(InMemoryConversationStore::new());
    let answers = Arc::new(AnswerService::new(
        rag.clone(),
        ai.clone(),
        conversations.clone(),
        config.answer.clone(),
    ));

    Pipeline {
        config,
        ai,
        store,
        cache,
        rag,
        answers,
        conversations,
    }
}

fn default_pipeline(answer: &str) -> Pipeline {
    pipeline(vec![MockProvider::new("primary", answer)], CircuitBreakerConfig::default())
}

#[tokio::test]
async fn test_empty_store_answers_without_context() {
    let p = default_pipeline("I could not find anything about that in your documents.");

    let result = p
        .answers
        .answer("alice", "What is the refund policy?", None, &AnswerOptions::default())
        .await
        .unwrap();

    assert_eq!(result.template, PromptTemplate::NoContext);
    assert!(result.citations.is_empty());
    assert_eq!(result.context_fragments, 0);
    assert!(!result.degraded);
}

#[tokio::test]
async fn test_ranked_results_are_unique_and_ordered() {
    let p = default_pipeline("unused");
    let inner = InMemoryVectorStore::new();
    let texts = [
        ("a", vec![1.0, 0.0]),
        ("b", vec![0.9, 0.2]),
        ("c", vec![0.8, 0.5]),
        ("d", vec![0.95, 0.1]),
    ];
    for (id, embedding) in texts {
        inner
            .upsert(embedding, fragment(id, "alice", &format!("Refund policy section {} {}", id, REFUND_TEXT)))
            .unwrap();
    }

    let rag = RagQueryService::new(
        QueryVectorizer::new(p.ai.clone(), 1000),
        Arc::new(DuplicatingStore { inner }),
        Arc::new(SearchCache::disabled()),
        p.config.search.clone(),
    );

    let options = SearchOptions {
        score_threshold: Some(0.0),
        ..Default::default()
    };
    let response = rag.search("alice", "refund policy", &options).await.unwrap();
    let results = response.results;
    assert!(!results.is_empty());

    let mut ids: Vec<_> = results.iter().map(|r| r.hit.fragment_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), results.len(), "duplicate fragment ids in ranked set");

    for pair in results.windows(2) {
        assert!(pair[0].adjusted_score >= pair[1].adjusted_score);
        assert_eq!(pair[0].rank + 1, pair[1].rank);
    }
}

#[tokio::test]
async fn test_repeated_search_hits_store_once() {
    let p = default_pipeline("unused");
    p.store
        .upsert(vec![1.0, 0.0], fragment("refund", "alice", REFUND_TEXT))
        .unwrap();

    let options = SearchOptions::default();
    let first = p.rag.search("alice", "refund policy", &options).await.unwrap();
    let second = p.rag.search("alice", "refund policy", &options).await.unwrap();

    assert_eq!(p.store.query_count(), 1);
    assert!(!first.stats.cached);
    assert!(second.stats.cached);
    assert_eq!(first.results, second.results);

    let stats = p.cache.stats().await;
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn test_breaker_opens_and_admits_one_trial() {
    let breaker = CircuitBreaker::new(
        "flaky",
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
            half_open_max_calls: 1,
        },
    );

    for _ in 0..3 {
        breaker.try_acquire().unwrap().failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(matches!(breaker.try_acquire(), Err(RagError::CircuitOpen { .. })));

    tokio::time::sleep(Duration::from_millis(80)).await;

    let trial = breaker.try_acquire().unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.try_acquire().is_err(), "only one half-open trial may be in flight");

    trial.success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_open_circuit_skips_provider() {
    let provider = MockProvider::failing("flaky");
    let p = pipeline(
        vec![provider.clone()],
        CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
    );

    for _ in 0..2 {
        assert!(matches!(p.ai.embed("x").await, Err(RagError::AiService { .. })));
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    let err = p.ai.embed("x").await.unwrap_err();
    assert!(err.is_degradation());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2, "open circuit must not contact the provider");
}

#[tokio::test]
async fn test_retry_recovers_after_two_failures() {
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
        ..RetryPolicy::default()
    };
    let calls = AtomicU32::new(0);

    let outcome = policy
        .run(|_| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Network("connection reset".to_string()))
            } else {
                Ok("embedded")
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.value, "embedded");
    assert_eq!(outcome.failed_attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_refund_policy_answer_cites_its_source() {
    let p = default_pipeline("Items can be returned within 30 days of purchase for a full refund [1].");
    p.store
        .upsert(vec![1.0, 0.0], fragment("refund", "alice", REFUND_TEXT))
        .unwrap();
    p.store
        .upsert(vec![1.0, 0.0], fragment("other-owner", "bob", REFUND_TEXT))
        .unwrap();

    let result = p
        .answers
        .answer("alice", "What is the refund policy?", None, &AnswerOptions::default())
        .await
        .unwrap();

    assert_eq!(result.template, PromptTemplate::WithContext);
    assert_eq!(result.context_fragments, 1);
    assert!(result.answer.contains("[1]"));
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].fragment_id, "refund");
    assert_eq!(result.provider.as_deref(), Some("primary"));
    assert!(result.quality.is_valid);
}

#[tokio::test]
async fn test_all_circuits_open_reports_every_provider() {
    let p = pipeline(
        vec![MockProvider::failing("openai"), MockProvider::failing("ollama")],
        CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        },
    );
    let messages = vec![ChatMessage::user("hello")];
    let options = GenerationOptions::default();

    // First call trips both breakers
    assert!(matches!(
        p.ai.generate(messages.clone(), &options).await,
        Err(RagError::AiService { ref provider, .. }) if provider == "ollama"
    ));
    assert!(!p.ai.any_available());

    match p.ai.generate(messages, &options).await {
        Err(RagError::ServiceDegradation { attempted }) => {
            assert_eq!(attempted, vec!["openai".to_string(), "ollama".to_string()]);
        }
        other => panic!("expected ServiceDegradation, got {:?}", other.map(|i| i.value)),
    }
}

#[tokio::test]
async fn test_recent_turns_returns_newest_oldest_first() {
    let p = default_pipeline("unused");
    let conversation = p.conversations.create_conversation("alice", None).await.unwrap();

    for (role, text) in [(Role::User, "first"), (Role::Assistant, "second"), (Role::User, "third")] {
        p.conversations
            .append_turn("alice", &conversation.id, role, text.to_string(), None)
            .await
            .unwrap();
    }

    let recent = p.conversations.recent_turns("alice", &conversation.id, 2).await.unwrap();
    let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["second", "third"]);

    let foreign = p.conversations.recent_turns("bob", &conversation.id, 2).await;
    assert!(matches!(foreign, Err(RagError::NotFound { .. })));
}

#[tokio::test]
async fn test_improve_scores_the_revised_answer() {
    let improved = "Customers may return items within 30 days of purchase under the refund policy [1].";
    let p = default_pipeline(improved);
    p.store
        .upsert(vec![1.0, 0.0], fragment("refund", "alice", REFUND_TEXT))
        .unwrap();

    let original = "Not sure.";
    let question = "What is the refund policy?";
    let original_quality = AnswerQualityValidator::default().validate(original, question, 1);

    let result = p
        .answers
        .improve("alice", original, question, "Please mention the return window", None)
        .await
        .unwrap();

    assert_eq!(result.template, PromptTemplate::Improvement);
    assert_eq!(result.answer, improved);
    assert!(result.quality.score > original_quality.score);
    assert!(result.quality.issues.is_empty());
    assert_eq!(result.citations.len(), 1);
}

#[tokio::test]
async fn test_conversation_history_reaches_answers() {
    let p = default_pipeline("Returns are accepted for 30 days [1].");
    p.store
        .upsert(vec![1.0, 0.0], fragment("refund", "alice", REFUND_TEXT))
        .unwrap();
    let conversation = p.conversations.create_conversation("alice", Some("Refunds".into())).await.unwrap();

    let first = p
        .answers
        .answer("alice", "What is the refund policy?", Some(&conversation.id), &AnswerOptions::default())
        .await
        .unwrap();
    assert_eq!(first.template, PromptTemplate::WithContext);
    p.answers
        .record_exchange("alice", &conversation.id, "What is the refund policy?", &first)
        .await
        .unwrap();

    let second = p
        .answers
        .answer("alice", "And for gift cards?", Some(&conversation.id), &AnswerOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        second.template,
        PromptTemplate::ConversationWithContext | PromptTemplate::ConversationNoContext
    ));

    let summary = p.conversations.get_conversation("alice", &conversation.id).await.unwrap();
    assert_eq!(summary.message_count, 2);
}

// HTTP surface

const ALICE_TOKEN: &str = "token-alice";

fn app(p: &Pipeline, max_requests: usize) -> Router {
    let mut config = p.config.clone();
    config.auth = AuthSettings {
        enabled: true,
        tokens: vec![TokenBinding {
            token: Secret::new(ALICE_TOKEN.to_string()),
            owner_id: "alice".to_string(),
        }],
        admin_owners: Vec::new(),
        signing_secret: None,
    };
    config.rate_limit = RateLimitSettings {
        enabled: true,
        max_requests,
        window_secs: 60,
    };

    let conversations: Arc<dyn ConversationStore> = p.conversations.clone();
    let store: Arc<dyn VectorStore> = p.store.clone();
    let state = AppState {
        auth: Arc::new(AuthMiddleware::new(&config.auth)),
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        health_checker: Arc::new(HealthChecker::new(store, p.ai.clone(), p.cache.clone())),
        metrics: Arc::new(MetricsCollector::new()),
        config: Arc::new(config),
        rag: p.rag.clone(),
        answers: p.answers.clone(),
        ai: p.ai.clone(),
        conversations,
    };
    build_router(state)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", ALICE_TOKEN))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_requires_authentication() {
    let p = default_pipeline("unused");
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/search")
        .header("content-type", "application/json")
        .header("x-request-id", "req-123")
        .body(Body::from(json!({"question": "refund"}).to_string()))
        .unwrap();

    let response = app(&p, 100).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
    assert_eq!(body["error"]["correlation_id"], "req-123");
}

#[tokio::test]
async fn test_http_answer_records_conversation() {
    let p = default_pipeline("Items can be returned within 30 days of purchase [1].");
    p.store
        .upsert(vec![1.0, 0.0], fragment("refund", "alice", REFUND_TEXT))
        .unwrap();
    let app = app(&p, 100);

    let created = app
        .clone()
        .oneshot(post("/api/v1/conversations", json!({"title": "Refunds"})))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let conversation_id = body_json(created).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post(
            "/api/v1/answer",
            json!({"question": "What is the refund policy?", "conversation_id": conversation_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["citations"].as_array().unwrap().len(), 1);
    assert_eq!(body["degraded"], false);

    let turns = p.conversations.list_turns("alice", &conversation_id, 1, 20).await.unwrap();
    assert_eq!(turns.total, 2);
    assert_eq!(turns.items[0].role, Role::User);
    assert_eq!(turns.items[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_http_validation_and_not_found() {
    let p = default_pipeline("unused");
    let app = app(&p, 100);

    let response = app
        .clone()
        .oneshot(post("/api/v1/search", json!({"question": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");

    let foreign = p.conversations.create_conversation("bob", None).await.unwrap();
    let request = Request::builder()
        .uri(format!("/api/v1/conversations/{}", foreign.id))
        .header("authorization", format!("Bearer {}", ALICE_TOKEN))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_http_rate_limit() {
    let p = default_pipeline("unused");
    let app = app(&p, 2);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post("/api/v1/search", json!({"question": "refund policy"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(post("/api/v1/search", json!({"question": "refund policy"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(body_json(response).await["error"]["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_http_degradation_is_service_unavailable() {
    let p = pipeline(
        vec![MockProvider::failing("openai"), MockProvider::failing("ollama")],
        CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        },
    );
    let app = app(&p, 100);

    // Trip both breakers through the embedding path
    let _ = p.ai.embed("warm up").await;

    let response = app
        .oneshot(post("/api/v1/search", json!({"question": "refund policy"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(body["error"]["details"]["attempted_providers"], json!(["openai", "ollama"]));
}

#[tokio::test]
async fn test_http_public_endpoints() {
    let p = default_pipeline("unused");
    let app = app(&p, 100);

    let live = app
        .clone()
        .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body_json(health).await["status"], "healthy");

    let metrics = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(metrics.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("knowledge_rag_requests_total"));
    assert!(text.contains("provider_circuit_state"));
}

#[tokio::test]
async fn test_http_cache_invalidation_is_owner_scoped() {
    let p = default_pipeline("unused");
    let app = app(&p, 100);

    let own = app
        .clone()
        .oneshot(post("/api/v1/cache/invalidate", json!({"owner_id": "alice"})))
        .await
        .unwrap();
    assert_eq!(own.status(), StatusCode::OK);

    let foreign = app
        .oneshot(post("/api/v1/cache/invalidate", json!({"owner_id": "bob"})))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(foreign).await["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_http_page_far_beyond_the_end_is_empty() {
    let p = default_pipeline("unused");
    p.conversations.create_conversation("alice", None).await.unwrap();

    let request = Request::builder()
        .uri(format!("/api/v1/conversations?page={}", usize::MAX))
        .header("authorization", format!("Bearer {}", ALICE_TOKEN))
        .body(Body::empty())
        .unwrap();
    let response = app(&p, 100).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert!(body["items"].as_array().unwrap().is_empty());
}
