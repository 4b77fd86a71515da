//! Reciprocal Rank Fusion
//!
//! `score(d) = Σ 1 / (k + rank_i(d))` over the lists that contain `d`; a list
//! that does not contain `d` contributes nothing. Only ranks are used, so the
//! keyword and semantic backends never need comparable raw scores.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::types::{FusedResult, MemoryId, MemoryItem, RankedCandidate, RankedHit};

/// RRF smoothing constant
pub const RRF_K: usize = 60;

/// Merge two ranked lists into one candidate per distinct id.
///
/// If a list repeats an id, its best rank is kept. Output is ordered by id.
pub fn fuse(keyword: &[RankedHit], semantic: &[RankedHit]) -> Vec<RankedCandidate> {
    let mut merged: BTreeMap<MemoryId, RankedCandidate> = BTreeMap::new();

    for hit in keyword {
        let entry = merged.entry(hit.id).or_insert(RankedCandidate {
            id: hit.id,
            keyword_rank: None,
            semantic_rank: None,
        });
        entry.keyword_rank = Some(entry.keyword_rank.map_or(hit.rank, |r| r.min(hit.rank)));
    }

    for hit in semantic {
        let entry = merged.entry(hit.id).or_insert(RankedCandidate {
            id: hit.id,
            keyword_rank: None,
            semantic_rank: None,
        });
        entry.semantic_rank = Some(entry.semantic_rank.map_or(hit.rank, |r| r.min(hit.rank)));
    }

    merged.into_values().collect()
}

/// Fused score of one candidate
pub fn rrf_score(candidate: &RankedCandidate, k: usize) -> f64 {
    let contribution = |rank: Option<usize>| rank.map_or(0.0, |r| 1.0 / (k + r) as f64);
    contribution(candidate.keyword_rank) + contribution(candidate.semantic_rank)
}

/// Candidates with their scores, best first, ties by id
pub fn rank_candidates(candidates: &[RankedCandidate], k: usize) -> Vec<(RankedCandidate, f64)> {
    let mut scored: Vec<(RankedCandidate, f64)> = candidates
        .iter()
        .map(|c| (*c, rrf_score(c, k)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    scored
}

/// Join candidates with hydrated items and order the result.
///
/// Candidates without a matching item are dropped. Order is fused score
/// descending, then importance descending, then `created_at` descending,
/// then id ascending, so identical inputs always give identical output.
pub fn order_fused(
    candidates: &[RankedCandidate],
    items: Vec<MemoryItem>,
    k: usize,
) -> Vec<FusedResult> {
    let by_id: HashMap<MemoryId, &RankedCandidate> =
        candidates.iter().map(|c| (c.id, c)).collect();

    let mut fused: Vec<FusedResult> = items
        .into_iter()
        .filter_map(|item| {
            let candidate = by_id.get(&item.id)?;
            Some(FusedResult {
                fused_score: rrf_score(candidate, k),
                keyword_rank: candidate.keyword_rank,
                semantic_rank: candidate.semantic_rank,
                item,
            })
        })
        .collect();

    fused.sort_by(compare_fused);
    fused.dedup_by_key(|r| r.item.id);
    fused
}

fn compare_fused(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.item.importance.total_cmp(&a.item.importance))
        .then_with(|| b.item.created_at.cmp(&a.item.created_at))
        .then_with(|| a.item.id.cmp(&b.item.id))
}

/// Normalise a fused score into [0, 1].
///
/// The ceiling is what an item ranked first in every list that was
/// successfully consulted would score, so a top hit from keyword-only
/// retrieval is as relevant as a top hit from both lists.
pub fn relevance(score: f64, active_lists: usize, k: usize) -> f64 {
    if active_lists == 0 {
        return 0.0;
    }
    let ceiling = active_lists as f64 / (k + 1) as f64;
    (score / ceiling).clamp(0.0, 1.0)
}
