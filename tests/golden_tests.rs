//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that critical functions produce
//! expected outputs. Any change in behavior will cause these tests to fail,
//! signaling a potential breaking change.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

// ============================================================================
// RECIPROCAL RANK FUSION GOLDEN TESTS
// ============================================================================

mod rrf_golden {
    use super::*;
    use memoria::search::{fuse, rank_candidates};
    use memoria::types::{MemoryId, RankedHit};

    #[derive(Debug, Deserialize)]
    struct Expected {
        id: MemoryId,
        score: f64,
    }

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        keyword: Vec<MemoryId>,
        semantic: Vec<MemoryId>,
        expected: Vec<Expected>,
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        k: usize,
        test_cases: Vec<TestCase>,
    }

    #[test]
    fn test_rrf_fusion_golden() {
        let fixture_path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/rrf_fusion.json");
        let content =
            fs::read_to_string(fixture_path).expect("Failed to read rrf_fusion.json fixture");
        let fixture: Fixture =
            serde_json::from_str(&content).expect("Failed to parse fixture JSON");

        for case in fixture.test_cases {
            let candidates = fuse(
                &RankedHit::from_ordered(case.keyword.clone()),
                &RankedHit::from_ordered(case.semantic.clone()),
            );
            let ranked = rank_candidates(&candidates, fixture.k);

            let got_ids: Vec<MemoryId> = ranked.iter().map(|(c, _)| c.id).collect();
            let expected_ids: Vec<MemoryId> = case.expected.iter().map(|e| e.id).collect();
            assert_eq!(got_ids, expected_ids, "Case '{}': wrong order", case.name);

            for ((candidate, score), expected) in ranked.iter().zip(&case.expected) {
                assert!(
                    (score - expected.score).abs() < 1e-12,
                    "Case '{}': id {} expected score {}, got {}",
                    case.name,
                    candidate.id,
                    expected.score,
                    score
                );
            }
        }
    }
}

// ============================================================================
// FTS5 MATCH QUERY GOLDEN TESTS
// ============================================================================

mod match_query_golden {
    use super::*;
    use memoria::search::build_match_query;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        input: String,
        expected: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        test_cases: Vec<TestCase>,
    }

    #[test]
    fn test_fts_match_query_golden() {
        let fixture_path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/fts_match_query.json"
        );
        let content =
            fs::read_to_string(fixture_path).expect("Failed to read fts_match_query.json fixture");
        let fixture: Fixture =
            serde_json::from_str(&content).expect("Failed to parse fixture JSON");

        for case in fixture.test_cases {
            let result = build_match_query(&case.input);
            assert_eq!(
                result, case.expected,
                "Case '{}': input={:?}",
                case.name, case.input
            );
        }
    }
}
