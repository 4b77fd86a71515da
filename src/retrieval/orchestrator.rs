//! Retrieval orchestrator
//!
//! [`MemoryRetriever::retrieve`] is the engine's only entry point. A
//! malformed request is the one condition reported as an `Err`; rate
//! limiting, embedding failures, provider timeouts and provider failures all
//! come back as a well-formed (possibly empty) [`RetrievalResponse`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::{timeout, timeout_at, Instant as TokioInstant};
use tracing::Instrument;
use uuid::Uuid;

use crate::budget::Tokenizer;
use crate::cache::{CacheLayer, InMemoryCache, RateLimitDecision, RateLimiter};
use crate::config::RetrievalConfig;
use crate::embedding::{content_hash, CachedEmbedder, Embedder};
use crate::error::{ProviderError, Result, ValidationError};
use crate::search::{
    fuse, order_fused, relevance, KeywordSearchProvider, MemoryRepository,
    SemanticSearchProvider, SqliteKeywordProvider, SqliteMemoryRepository,
    SqliteSemanticProvider, RRF_K,
};
use crate::storage::{AuditRecord, AuditSink, Storage, TracingAuditSink};
use crate::types::{
    Degradation, MemoryType, Modality, OwnerScope, RankedHit, RetrievalRequest,
    RetrievalResponse, ScoredMemory,
};

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub scope: OwnerScope,
    /// Query text, truncated to the configured maximum
    pub query: String,
    pub limit: usize,
    pub min_relevance: f64,
    pub type_filter: Option<Vec<MemoryType>>,
}

/// Check a request against `config` without touching any backend
pub fn validate_request(
    request: &RetrievalRequest,
    config: &RetrievalConfig,
) -> std::result::Result<ValidatedRequest, ValidationError> {
    let scope = OwnerScope::new(request.owner_id.clone())?;

    let query: String = request
        .query_text
        .chars()
        .take(config.max_query_chars)
        .collect();
    if query.trim().is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let limit = request.result_limit.unwrap_or(config.default_limit);
    if limit == 0 || limit > config.max_limit {
        return Err(ValidationError::LimitOutOfRange {
            got: limit,
            max: config.max_limit,
        });
    }

    let min_relevance = request
        .min_relevance
        .unwrap_or(config.default_min_relevance);
    if !(0.0..=1.0).contains(&min_relevance) {
        return Err(ValidationError::RelevanceOutOfRange(min_relevance.to_string()));
    }

    if matches!(request.type_filter, Some(ref types) if types.is_empty()) {
        return Err(ValidationError::EmptyTypeFilter);
    }

    Ok(ValidatedRequest {
        scope,
        query,
        limit,
        min_relevance,
        type_filter: request.type_filter.clone(),
    })
}

/// What one provider call produced
struct ProviderOutcome {
    hits: std::result::Result<Vec<RankedHit>, ProviderError>,
    elapsed_ms: u64,
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Hybrid memory retrieval over keyword and semantic providers
pub struct MemoryRetriever {
    config: RetrievalConfig,
    keyword: Arc<dyn KeywordSearchProvider>,
    semantic: Arc<dyn SemanticSearchProvider>,
    repository: Arc<dyn MemoryRepository>,
    embedder: Option<Arc<dyn Embedder>>,
    rate_limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
    tokenizer: Tokenizer,
}

/// Builder for [`MemoryRetriever`]
pub struct MemoryRetrieverBuilder {
    config: RetrievalConfig,
    keyword: Arc<dyn KeywordSearchProvider>,
    semantic: Arc<dyn SemanticSearchProvider>,
    repository: Arc<dyn MemoryRepository>,
    cache: Arc<dyn CacheLayer>,
    embedder: Option<Arc<dyn Embedder>>,
    audit: Arc<dyn AuditSink>,
    tokenizer: Option<Tokenizer>,
}

impl MemoryRetrieverBuilder {
    pub fn config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared cache for query embeddings and rate-limit counters
    pub fn cache(mut self, cache: Arc<dyn CacheLayer>) -> Self {
        self.cache = cache;
        self
    }

    /// Embedding client; wrapped in the embedding cache at build time
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn build(self) -> Result<MemoryRetriever> {
        self.config.validate()?;

        let tokenizer = match self.tokenizer {
            Some(t) => t,
            None => Tokenizer::cl100k()?,
        };

        let embedder = self.embedder.map(|inner| {
            Arc::new(CachedEmbedder::new(
                inner,
                self.cache.clone(),
                self.config.embedding_cache_ttl(),
            )) as Arc<dyn Embedder>
        });

        let rate_limiter = RateLimiter::new(
            self.cache,
            self.config.rate_limit_per_window,
            self.config.rate_limit_window(),
        );

        Ok(MemoryRetriever {
            config: self.config,
            keyword: self.keyword,
            semantic: self.semantic,
            repository: self.repository,
            embedder,
            rate_limiter,
            audit: self.audit,
            tokenizer,
        })
    }
}

impl MemoryRetriever {
    /// Start building a retriever from its three storage collaborators
    pub fn builder(
        keyword: Arc<dyn KeywordSearchProvider>,
        semantic: Arc<dyn SemanticSearchProvider>,
        repository: Arc<dyn MemoryRepository>,
    ) -> MemoryRetrieverBuilder {
        MemoryRetrieverBuilder {
            config: RetrievalConfig::default(),
            keyword,
            semantic,
            repository,
            cache: Arc::new(InMemoryCache::default()),
            embedder: None,
            audit: Arc::new(TracingAuditSink),
            tokenizer: None,
        }
    }

    /// Builder wired to the SQLite providers over `storage`
    pub fn sqlite(storage: Storage, config: RetrievalConfig) -> MemoryRetrieverBuilder {
        let semantic = SqliteSemanticProvider::new(storage.clone(), config.semantic_min_similarity);
        Self::builder(
            Arc::new(SqliteKeywordProvider::new(storage.clone())),
            Arc::new(semantic),
            Arc::new(SqliteMemoryRepository::new(storage)),
        )
        .config(config)
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve the most relevant memory items for a request
    pub async fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> std::result::Result<RetrievalResponse, ValidationError> {
        let started = Instant::now();
        let request = validate_request(&request, &self.config)?;
        let correlation_id = Uuid::new_v4();

        let span = tracing::info_span!(
            "retrieve",
            %correlation_id,
            owner = %request.scope,
            limit = request.limit
        );
        Ok(self
            .retrieve_validated(correlation_id, request, started)
            .instrument(span)
            .await)
    }

    async fn retrieve_validated(
        &self,
        correlation_id: Uuid,
        request: ValidatedRequest,
        started: Instant,
    ) -> RetrievalResponse {
        let deadline = TokioInstant::now() + self.config.deadline();
        let query_hash = content_hash(&request.query);

        match self.rate_limiter.check(&request.scope).await {
            Ok(RateLimitDecision::Limited { retry_after_ms, .. }) => {
                tracing::warn!(retry_after_ms, "retrieval rate limited");
                let mut response = RetrievalResponse::rate_limited(correlation_id);
                response.timings.total_ms = elapsed_ms(started);
                self.record_audit(&request.scope, &query_hash, &response).await;
                return response;
            }
            Ok(RateLimitDecision::Allowed { .. }) => {}
            Err(e) => tracing::warn!(error = %e, "rate limiter unavailable, allowing request"),
        }

        let mut response = RetrievalResponse::empty(correlation_id);

        let embedding_started = Instant::now();
        let embedding = self.resolve_embedding(&request.query, deadline).await;
        response.timings.embedding_ms = elapsed_ms(embedding_started);
        let embedding = match embedding {
            Ok(v) => Some(v),
            Err(reason) => {
                tracing::info!(reason = %reason, "no query embedding, keyword-only retrieval");
                response
                    .degradations
                    .push(Degradation::EmbeddingUnavailable { reason });
                None
            }
        };

        let candidate_limit = request
            .limit
            .saturating_mul(self.config.candidate_multiplier);
        let (keyword, semantic) = self
            .fan_out(&request, embedding.as_deref(), candidate_limit, deadline)
            .await;

        response.timings.keyword_ms = keyword.elapsed_ms;
        response.timings.semantic_ms = semantic.as_ref().map_or(0, |s| s.elapsed_ms);

        let mut active_lists = 0;
        let keyword_hits = self.settle(keyword.hits, candidate_limit, &mut response, &mut active_lists);
        let semantic_hits = match semantic {
            Some(outcome) => self.settle(outcome.hits, candidate_limit, &mut response, &mut active_lists),
            None => Vec::new(),
        };

        if active_lists == 0 {
            tracing::error!("all search providers failed, returning empty result");
            return self
                .fail_closed(response, &request, &query_hash, started)
                .await;
        }

        let candidates = fuse(&keyword_hits, &semantic_hits);
        let ids: Vec<_> = candidates.iter().map(|c| c.id).collect();

        // Providers may have used the whole deadline; hydration gets the grace period on top
        let hydrate_deadline = deadline + self.config.grace();
        let items = match timeout_at(
            hydrate_deadline,
            self.repository.get_items(&request.scope, &ids),
        )
        .await
        {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "hydration failed");
                return self
                    .fail_closed(response, &request, &query_hash, started)
                    .await;
            }
            Err(_) => {
                tracing::error!("hydration timed out");
                return self
                    .fail_closed(response, &request, &query_hash, started)
                    .await;
            }
        };

        let now = Utc::now();
        let items: Vec<_> = items
            .into_iter()
            .filter(|item| {
                if !request.scope.owns(item) {
                    tracing::error!(id = item.id, "dropping item outside owner scope");
                    return false;
                }
                item.is_retrievable(now)
            })
            .collect();

        let scored: Vec<ScoredMemory> = order_fused(&candidates, items, RRF_K)
            .into_iter()
            .map(|fused| ScoredMemory {
                relevance: relevance(fused.fused_score, active_lists, RRF_K),
                score: fused.fused_score,
                keyword_rank: fused.keyword_rank,
                semantic_rank: fused.semantic_rank,
                item: fused.item,
            })
            .filter(|m| m.relevance >= request.min_relevance)
            .filter(|m| {
                request
                    .type_filter
                    .as_ref()
                    .map_or(true, |types| types.contains(&m.item.memory_type))
            })
            .take(request.limit)
            .collect();

        response.total_before_truncation = scored.len();
        let (items, truncated) = self
            .tokenizer
            .enforce_budget(scored, self.config.token_budget);
        response.items = items;
        response.truncated = truncated;
        response.timings.total_ms = elapsed_ms(started);

        tracing::debug!(
            results = response.items.len(),
            truncated,
            keyword_ms = response.timings.keyword_ms,
            semantic_ms = response.timings.semantic_ms,
            total_ms = response.timings.total_ms,
            "retrieval complete"
        );

        self.record_audit(&request.scope, &query_hash, &response).await;
        response
    }

    /// Query embedding via the cache and embedding client, bounded by the
    /// embedding timeout and the overall deadline
    async fn resolve_embedding(
        &self,
        query: &str,
        deadline: TokioInstant,
    ) -> std::result::Result<Vec<f32>, String> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| "no embedding client configured".to_string())?;

        let embed_deadline = (TokioInstant::now() + self.config.embedding_timeout()).min(deadline);
        match timeout_at(embed_deadline, embedder.embed(query)).await {
            Ok(Ok(v)) if !v.is_empty() => Ok(v),
            Ok(Ok(_)) => Err("embedding client returned an empty vector".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("embedding client timed out".to_string()),
        }
    }

    /// Run both providers concurrently; neither can hold the other past the deadline
    async fn fan_out(
        &self,
        request: &ValidatedRequest,
        embedding: Option<&[f32]>,
        limit: usize,
        deadline: TokioInstant,
    ) -> (ProviderOutcome, Option<ProviderOutcome>) {
        let keyword = async {
            let started = Instant::now();
            let hits = match timeout_at(
                deadline,
                self.keyword.search(
                    &request.scope,
                    &request.query,
                    request.type_filter.as_deref(),
                    limit,
                ),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    modality: Modality::Keyword,
                    elapsed_ms: elapsed_ms(started),
                }),
            };
            ProviderOutcome {
                hits,
                elapsed_ms: elapsed_ms(started),
            }
        };

        let semantic = async {
            let embedding = embedding?;
            let started = Instant::now();
            let hits = match timeout_at(
                deadline,
                self.semantic.search(
                    &request.scope,
                    embedding,
                    request.type_filter.as_deref(),
                    limit,
                ),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    modality: Modality::Semantic,
                    elapsed_ms: elapsed_ms(started),
                }),
            };
            Some(ProviderOutcome {
                hits,
                elapsed_ms: elapsed_ms(started),
            })
        };

        tokio::join!(keyword, semantic)
    }

    /// Turn a provider result into a hit list, recording any degradation
    fn settle(
        &self,
        hits: std::result::Result<Vec<RankedHit>, ProviderError>,
        limit: usize,
        response: &mut RetrievalResponse,
        active_lists: &mut usize,
    ) -> Vec<RankedHit> {
        match hits {
            Ok(mut hits) => {
                *active_lists += 1;
                hits.truncate(limit);
                hits
            }
            Err(ProviderError::Timeout {
                modality,
                elapsed_ms,
            }) => {
                tracing::warn!(%modality, elapsed_ms, "search provider timed out");
                response
                    .degradations
                    .push(Degradation::ProviderTimeout { modality });
                Vec::new()
            }
            Err(ProviderError::Failure { modality, message }) => {
                tracing::warn!(%modality, error = %message, "search provider failed");
                response
                    .degradations
                    .push(Degradation::ProviderFailure { modality, message });
                Vec::new()
            }
        }
    }

    async fn fail_closed(
        &self,
        mut response: RetrievalResponse,
        request: &ValidatedRequest,
        query_hash: &str,
        started: Instant,
    ) -> RetrievalResponse {
        response.items.clear();
        response.error = true;
        response.degradations.push(Degradation::TotalFailure);
        response.timings.total_ms = elapsed_ms(started);
        self.record_audit(&request.scope, query_hash, &response).await;
        response
    }

    async fn record_audit(&self, scope: &OwnerScope, query_hash: &str, response: &RetrievalResponse) {
        let record = AuditRecord {
            correlation_id: response.correlation_id,
            owner_id: scope.as_str().to_string(),
            query_hash: query_hash.to_string(),
            result_count: response.items.len(),
            truncated: response.truncated,
            latency_keyword_ms: response.timings.keyword_ms,
            latency_semantic_ms: response.timings.semantic_ms,
            latency_total_ms: response.timings.total_ms,
            timestamp: Utc::now(),
        };
        match timeout(self.config.grace(), self.audit.record(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to write audit record"),
            Err(_) => tracing::warn!(
                grace_ms = self.config.grace_ms,
                "audit write timed out, record dropped"
            ),
        }
    }
}
