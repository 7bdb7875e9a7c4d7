//! Query engine.
//!
//! Embeds a question with the ingestion provider, runs a nearest-neighbor
//! search over the project index and converts cosine distances into
//! relevance scores:
//!
//! ```text
//! distance  d = 1 - cos(q, c)          in [0, 2]
//! relevance r = clamp(1 - d / 2, 0, 1)
//! ```
//!
//! Hits are also aggregated per source into a `sources_summary`.

use std::collections::HashMap;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{CoreError, CoreResult};
use crate::index::{check_space, VectorIndex};
use crate::models::{QueryHit, QueryResult, SourceSummary};

/// Map a cosine distance to a relevance score in `[0, 1]`.
///
/// ```rust
/// use project_context::query::relevance_from_distance;
///
/// assert_eq!(relevance_from_distance(0.0), 1.0);
/// assert_eq!(relevance_from_distance(1.0), 0.5);
/// assert_eq!(relevance_from_distance(2.0), 0.0);
/// ```
pub fn relevance_from_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Search `index` for chunks closest to `question`.
///
/// `top_k` of 0 is treated as 1; at most the live chunk count is requested.
pub async fn search(
    index: &dyn VectorIndex,
    provider: &dyn EmbeddingProvider,
    project: &str,
    question: &str,
    top_k: usize,
) -> CoreResult<QueryResult> {
    let question_text = question.trim();
    if question_text.is_empty() {
        return Err(CoreError::InvalidQuery("question is empty".to_string()));
    }

    let total = index.count().await.map_err(CoreError::from_anyhow)?;
    if total == 0 {
        return Err(CoreError::EmptyIndex(project.to_string()));
    }

    let indexed = index.space().await.map_err(CoreError::from_anyhow)?;
    check_space(indexed.as_ref(), &provider.space()).map_err(CoreError::from_anyhow)?;

    let k = top_k.max(1).min(total);
    let query_vec = embed_query(provider, question_text)
        .await
        .map_err(|e| CoreError::EmbeddingUnavailable(format!("{:#}", e)))?;
    let neighbors = index
        .nearest(&query_vec, k)
        .await
        .map_err(CoreError::from_anyhow)?;

    let results: Vec<QueryHit> = neighbors
        .into_iter()
        .enumerate()
        .map(|(i, n)| QueryHit {
            rank: i + 1,
            chunk_id: n.chunk_id,
            content: n.text,
            source_type: n.source_type,
            source_id: n.source_id,
            source_url: n.source_url,
            source_title: n.source_title,
            chunk_index: n.chunk_index,
            total_chunks: n.total_chunks,
            relevance_score: relevance_from_distance(n.distance),
            distance: n.distance,
        })
        .collect();
    tracing::debug!(project, hits = results.len(), k, "query complete");

    let sources_summary = summarize_sources(&results);
    Ok(QueryResult {
        success: true,
        project: project.to_string(),
        query: question.to_string(),
        total_chunks_searched: total,
        results,
        sources_summary,
        error: None,
        error_kind: None,
        suggestion: None,
    })
}

/// Aggregate hits per source, most relevant source first.
pub fn summarize_sources(hits: &[QueryHit]) -> Vec<SourceSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut by_source: HashMap<String, SourceSummary> = HashMap::new();
    for hit in hits {
        let entry = by_source.entry(hit.source_id.clone()).or_insert_with(|| {
            order.push(hit.source_id.clone());
            SourceSummary {
                source_id: hit.source_id.clone(),
                source_type: hit.source_type,
                source_title: hit.source_title.clone(),
                source_url: hit.source_url.clone(),
                hit_count: 0,
                max_relevance: 0.0,
            }
        });
        entry.hit_count += 1;
        entry.max_relevance = entry.max_relevance.max(hit.relevance_score);
    }

    let mut summary: Vec<SourceSummary> = order
        .into_iter()
        .filter_map(|id| by_source.remove(&id))
        .collect();
    summary.sort_by(|a, b| {
        b.max_relevance
            .partial_cmp(&a.max_relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.hit_count.cmp(&a.hit_count))
    });
    summary
}
