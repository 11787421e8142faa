//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check set-cache merge semantics on both engines, and
//! freshness, against a simple model.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use crate::cache::{
    ExpirationPolicy, IllustSetQuery, LazyIllust, Metadata, RankingMode, StatsRecorder,
};
use crate::config::CacheTtlConfig;
use crate::error::CacheError;
use crate::models::{Illust, User};
use crate::repo::LocalRepo;
use crate::storage::{CacheEngine, DocumentEngine, RelationalEngine};

// == Helpers ==
#[derive(Debug, Clone, Copy)]
enum Engine {
    Document,
    Relational,
}

const ENGINES: [Engine; 2] = [Engine::Document, Engine::Relational];

async fn repo(engine: Engine) -> LocalRepo {
    let stats = Arc::new(StatsRecorder::new());
    let engine: Arc<dyn CacheEngine> = match engine {
        Engine::Document => Arc::new(DocumentEngine::temporary(0, stats.clone()).unwrap()),
        Engine::Relational => Arc::new(
            RelationalEngine::connect("sqlite::memory:")
                .await
                .unwrap(),
        ),
    };
    LocalRepo::new(engine, CacheTtlConfig::default(), stats)
}

fn stubs(ids: &[i64]) -> Vec<LazyIllust> {
    ids.iter().copied().map(LazyIllust::stub).collect()
}

// == Strategies ==
/// Small id space so batches overlap often
fn batch_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..40, 0..12)
}

fn query_strategy() -> impl Strategy<Value = IllustSetQuery> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|word| IllustSetQuery::search(word)),
        (1i64..1000).prop_map(IllustSetQuery::user_bookmarks),
        prop::sample::select(RankingMode::ALL.to_vec()).prop_map(IllustSetQuery::ranking),
        Just(IllustSetQuery::RecommendedIllusts),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Appends behave like an ordered set union, and the returned flag says
    // whether the batch overlapped what was stored before it.
    #[test]
    fn prop_append_is_ordered_union(
        query in query_strategy(),
        batches in prop::collection::vec(batch_strategy(), 1..6),
    ) {
        for engine in ENGINES {
            tokio_test::block_on(async {
                let repo = repo(engine).await;
                let mut model: Vec<i64> = Vec::new();

                for batch in &batches {
                    let present: HashSet<i64> = model.iter().copied().collect();
                    let expected_exists = batch.iter().any(|id| present.contains(id));

                    let exists = repo
                        .append_set(&query, &stubs(batch), &Metadata::now())
                        .await
                        .unwrap();
                    prop_assert_eq!(exists, expected_exists, "{:?}", engine);

                    for id in batch {
                        if !model.contains(id) {
                            model.push(*id);
                        }
                    }
                }

                let set = repo.set(&query, 0).await.unwrap();
                prop_assert_eq!(set.ids(), model, "{:?}", engine);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }

    // Replace discards whatever was there and never reports overlap.
    #[test]
    fn prop_replace_keeps_only_latest(first in batch_strategy(), second in batch_strategy()) {
        for engine in ENGINES {
            tokio_test::block_on(async {
                let repo = repo(engine).await;
                let query = IllustSetQuery::ranking(RankingMode::Day);

                repo.update_set(&query, &stubs(&first), &Metadata::now()).await.unwrap();
                let exists = repo
                    .put_set(&query, &stubs(&second), &Metadata::now(), false)
                    .await
                    .unwrap();
                prop_assert!(!exists, "{:?}", engine);

                let mut seen = HashSet::new();
                let expected: Vec<i64> =
                    second.iter().copied().filter(|id| seen.insert(*id)).collect();
                let set = repo.set(&query, 0).await.unwrap();
                prop_assert_eq!(set.ids(), expected, "{:?}", engine);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }

    // Offset reads are suffixes of the full read.
    #[test]
    fn prop_offset_is_suffix(batch in batch_strategy(), offset in 0usize..15) {
        for engine in ENGINES {
            tokio_test::block_on(async {
                let repo = repo(engine).await;
                let query = IllustSetQuery::search("offset");
                repo.update_set(&query, &stubs(&batch), &Metadata::now()).await.unwrap();

                let full = repo.set(&query, 0).await.unwrap().ids();
                let tail = repo.set(&query, offset).await.unwrap().ids();
                let expected: Vec<i64> = full.iter().skip(offset).copied().collect();
                prop_assert_eq!(tail, expected, "{:?}", engine);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }

    // Loaded members back-fill the detail cache; stubs are counted as broken.
    #[test]
    fn prop_backfill_and_broken_counts(
        members in prop::collection::hash_map(1i64..200, any::<bool>(), 0..20),
    ) {
        let content: Vec<LazyIllust> = members
            .iter()
            .map(|(id, loaded)| {
                if *loaded {
                    LazyIllust::loaded(Illust::new(*id, "t", User::new(1, "u", "u")))
                } else {
                    LazyIllust::stub(*id)
                }
            })
            .collect();
        let stub_count = members.values().filter(|loaded| !**loaded).count();

        for engine in ENGINES {
            tokio_test::block_on(async {
                let repo = repo(engine).await;
                let query = IllustSetQuery::related(1);

                repo.update_set(&query, &content, &Metadata::now()).await.unwrap();
                let set = repo.set(&query, 0).await.unwrap();

                prop_assert_eq!(set.broken(), stub_count, "{:?}", engine);
                prop_assert_eq!(repo.stats().snapshot().broken, stub_count as u64);
                for (id, loaded) in &members {
                    let detail = repo.illust_detail(*id).await;
                    prop_assert_eq!(detail.is_ok(), *loaded, "{:?} id {}", engine, id);
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }

    // A record is expired exactly when its age reaches the TTL.
    #[test]
    fn prop_freshness_boundary(ttl in 0u64..100_000, age in 0i64..200_000) {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let metadata = Metadata::new(now - Duration::seconds(age));
        let result = ExpirationPolicy::new(ttl).check_at(&metadata, now);

        if age >= ttl as i64 {
            prop_assert!(matches!(result, Err(CacheError::Expired(m)) if m == metadata));
        } else {
            prop_assert!(result.is_ok());
        }
    }
}
