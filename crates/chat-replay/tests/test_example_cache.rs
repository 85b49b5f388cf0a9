mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chat_replay::{
    BuildReport, CacheConfig, CacheStore, ChatError, ExampleCache, ExampleInput, History,
    JsonDirStore, MemoryStore, ProducerFn, ProducerResult, ReplayMode, ResponseProducer,
    SlotStatus, example_input,
};
use common::{counting, double, echo_system_prompt_plus_message, stream};
use rstest::rstest;
use tokio::sync::Notify;

fn cache_for(producer: ResponseProducer, examples: Vec<ExampleInput>) -> ExampleCache {
    ExampleCache::new(
        examples,
        Arc::new(producer),
        CacheConfig::default(),
        Arc::new(MemoryStore::default()),
    )
    .unwrap()
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn caches_final_replies_by_position() {
    let cache = cache_for(double(), vec!["hello".into(), "hi".into()]);
    cache.build().await.unwrap();

    assert_eq!(cache.load(0).unwrap(), ProducerResult::Final("hello hello".into()));
    assert_eq!(cache.load(1).unwrap(), ProducerResult::Final("hi hi".into()));
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn caches_the_full_stream() {
    let cache = cache_for(stream(), vec!["hello".into(), "hi".into()]);
    cache.build().await.unwrap();

    assert_eq!(
        cache.replay(0, ReplayMode::Full).unwrap(),
        vec!["h", "he", "hel", "hell", "hello"]
    );
    assert_eq!(cache.replay(0, ReplayMode::Terminal).unwrap(), vec!["hello"]);
    assert_eq!(cache.load(1).unwrap().terminal(), "hi");
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn caches_examples_with_extras() {
    let cache = cache_for(
        echo_system_prompt_plus_message(),
        vec![
            example_input!["hello", "robot", 100],
            example_input!["hi", "robot", 2],
        ],
    );
    cache.build().await.unwrap();

    assert_eq!(cache.load(0).unwrap().terminal(), "robot hello");
    assert_eq!(
        cache.load(1).unwrap(),
        ProducerResult::Stream(vec!["r".into(), "ro".into()])
    );
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn cached_output_matches_a_direct_call() {
    let producer = echo_system_prompt_plus_message();
    let examples = vec![
        example_input!["hello", "robot", 7],
        example_input!["hi", "system", 3.0],
    ];
    let cache = cache_for(producer.clone(), examples.clone());
    cache.build().await.unwrap();

    for (index, example) in examples.iter().enumerate() {
        let direct = producer
            .produce(&example.message, &History::new(), &example.extras)
            .await
            .unwrap();
        assert_eq!(cache.load(index).unwrap(), direct);
    }
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn out_of_range_regardless_of_state() {
    let cache = cache_for(double(), vec!["hello".into()]);
    assert_eq!(
        cache.load(1).unwrap_err(),
        ChatError::IndexOutOfRange { index: 1, len: 1 }
    );

    cache.build().await.unwrap();
    assert_eq!(
        cache.load(5).unwrap_err(),
        ChatError::IndexOutOfRange { index: 5, len: 1 }
    );
    assert!(cache.status(5).is_none());
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn load_before_build_is_not_built() {
    let cache = cache_for(double(), vec!["hello".into()]);
    assert_eq!(cache.status(0), Some(SlotStatus::Empty));
    assert_eq!(cache.load(0).unwrap_err(), ChatError::CacheNotBuilt { index: 0 });
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn duplicate_inputs_are_cached_independently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache_for(counting(calls.clone()), vec!["same".into(), "same".into()]);
    let report = cache.build().await.unwrap();

    assert_eq!(report.ready, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.load(0).unwrap(), cache.load(1).unwrap());
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn failed_slot_repeats_its_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache_for(counting(calls.clone()), vec!["ok".into(), "boom".into()]);
    let report = cache.build().await.unwrap();

    assert_eq!(
        report,
        BuildReport {
            ready: 1,
            failed: 1,
            restored: 0
        }
    );
    assert_eq!(cache.status(1), Some(SlotStatus::Failed));

    let first = cache.load(1).unwrap_err();
    let second = cache.load(1).unwrap_err();
    assert!(matches!(first, ChatError::ProducerFailure { .. }));
    assert_eq!(first, second);

    // Building again leaves Ready and Failed slots alone.
    cache.build().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.status(1), Some(SlotStatus::Failed));
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn rebuild_reinvokes_failed_slots() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut cache = cache_for(counting(calls.clone()), vec!["ok".into(), "boom".into()]);
    cache.build().await.unwrap();

    let report = cache.rebuild().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.restored, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn reconfigure_resets_every_slot() {
    let mut cache = cache_for(double(), vec!["hello".into(), "hi".into()]);
    cache.build().await.unwrap();

    let changed = cache
        .reconfigure(vec!["hello".into(), "hi".into()], Arc::new(stream()))
        .await
        .unwrap();
    assert!(changed);
    assert_eq!(cache.status(0), Some(SlotStatus::Empty));
    assert_eq!(cache.status(1), Some(SlotStatus::Empty));
    assert_eq!(cache.load(0).unwrap_err(), ChatError::CacheNotBuilt { index: 0 });

    cache.build().await.unwrap();
    assert!(cache.load(0).unwrap().is_stream());
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn reconfigure_with_same_configuration_keeps_slots() {
    let mut cache = cache_for(double(), vec!["hello".into()]);
    cache.build().await.unwrap();

    let producer = cache.producer().clone();
    let changed = cache
        .reconfigure(vec!["hello".into()], producer)
        .await
        .unwrap();
    assert!(!changed);
    assert_eq!(cache.status(0), Some(SlotStatus::Ready));
}

fn suffixing(suffix: &'static str) -> ResponseProducer {
    ResponseProducer::builder()
        .function(ProducerFn::final_sync(move |req| {
            Ok(format!("{}{suffix}", req.message))
        }))
        .build()
        .unwrap()
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn replacing_the_function_under_the_same_name_resets() {
    common::tracing();
    let mut cache = cache_for(suffixing("-old"), vec!["hello".into()]);
    cache.build().await.unwrap();
    let before = cache.fingerprint().to_string();

    let replacement = Arc::new(suffixing("-new"));
    let changed = cache
        .reconfigure(vec!["hello".into()], replacement.clone())
        .await
        .unwrap();
    assert!(changed);
    assert_eq!(cache.fingerprint(), before);
    assert_eq!(cache.status(0), Some(SlotStatus::Empty));

    // The persisted document of the old function is gone, so nothing is restored.
    let report = cache.build().await.unwrap();
    assert_eq!(report.restored, 0);
    let direct = replacement
        .produce("hello", &History::new(), &[])
        .await
        .unwrap();
    assert_eq!(cache.load(0).unwrap(), direct);
    assert_eq!(direct, ProducerResult::Final("hello-new".into()));
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn load_during_build_is_not_built() {
    common::tracing();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let producer = {
        let started = started.clone();
        let release = release.clone();
        ResponseProducer::builder()
            .name("gated")
            .function(ProducerFn::final_fn(move |req| {
                let started = started.clone();
                let release = release.clone();
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(req.message)
                }
            }))
            .build()
            .unwrap()
    };
    let cache = cache_for(producer, vec!["hello".into()]);

    let (report, (status, loaded)) = tokio::join!(cache.build(), async {
        started.notified().await;
        let observed = (cache.status(0), cache.load(0));
        release.notify_one();
        observed
    });

    assert_eq!(status, Some(SlotStatus::Building));
    assert_eq!(loaded.unwrap_err(), ChatError::CacheNotBuilt { index: 0 });
    assert_eq!(report.unwrap().ready, 1);
    assert_eq!(cache.load(0).unwrap().terminal(), "hello");
}

#[rstest]
#[case::corrupt("{ not json".to_string())]
#[case::other_fingerprint(serde_json::json!({
    "fingerprint": "0000",
    "created_at": "2024-01-01T00:00:00Z",
    "entries": [{
        "index": 0,
        "inputs": { "message": "hello", "extras": [] },
        "output": { "kind": "final", "value": "STALE" }
    }]
})
.to_string())]
#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn unusable_documents_are_rebuilt(#[case] document: String) {
    common::tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonDirStore::new(dir.path()));
    let calls = Arc::new(AtomicUsize::new(0));
    let new_cache = || {
        ExampleCache::new(
            vec!["hello".into()],
            Arc::new(counting(calls.clone())),
            CacheConfig::default(),
            store.clone(),
        )
        .unwrap()
    };

    let first = new_cache();
    first.build().await.unwrap();
    let path = store.path_for(first.fingerprint());
    std::fs::write(&path, document).unwrap();

    let second = new_cache();
    let report = second.build().await.unwrap();
    assert_eq!(report.restored, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(0).unwrap(), ProducerResult::Final("HELLO".into()));

    // The rebuilt document replaced the unusable one.
    let third = new_cache();
    assert_eq!(third.build().await.unwrap().restored, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn concurrent_lazy_loads_persist_every_example() {
    common::tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonDirStore::new(dir.path()));
    let calls = Arc::new(AtomicUsize::new(0));
    let examples: Vec<ExampleInput> = (0..6).map(|i| ExampleInput::new(format!("m{i}"))).collect();
    let cache = ExampleCache::new(
        examples.clone(),
        Arc::new(counting(calls.clone())),
        CacheConfig::default(),
        store.clone(),
    )
    .unwrap();

    let results = futures::future::join_all((0..6).map(|index| cache.load_or_build(index))).await;
    assert!(results.iter().all(Result::is_ok));

    let document = store.load(cache.fingerprint()).await.unwrap().unwrap();
    assert_eq!(document.entries.len(), 6);
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn examples_are_validated_against_the_schema() {
    let result = ExampleCache::new(
        vec![example_input!["hello", "robot"]],
        Arc::new(echo_system_prompt_plus_message()),
        CacheConfig::default(),
        Arc::new(MemoryStore::default()),
    );
    match result {
        Err(ChatError::SchemaMismatch { reason }) => assert!(reason.starts_with("example 0")),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected a schema mismatch"),
    }
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn build_respects_the_concurrency_limit() {
    common::tracing();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let producer = {
        let active = active.clone();
        let peak = peak.clone();
        ResponseProducer::builder()
            .name("slow")
            .function(ProducerFn::final_fn(move |req| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(req.message)
                }
            }))
            .build()
            .unwrap()
    };

    let examples = (0..8).map(|i| ExampleInput::new(i.to_string())).collect();
    let cache = ExampleCache::new(
        examples,
        Arc::new(producer),
        CacheConfig::builder().concurrency_limit(2).build(),
        Arc::new(MemoryStore::default()),
    )
    .unwrap();
    let report = cache.build().await.unwrap();

    assert_eq!(report.ready, 8);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(cache.load(7).unwrap().terminal(), "7");
}

#[cfg_attr(miri, ignore)]
#[tokio::test]
async fn lazy_load_builds_once_under_contention() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache_for(counting(calls.clone()), vec!["hello".into(), "hi".into()]);

    let (a, b) = tokio::join!(cache.load_or_build(0), cache.load_or_build(0));
    assert_eq!(a.unwrap(), ProducerResult::Final("HELLO".into()));
    assert_eq!(b.unwrap(), ProducerResult::Final("HELLO".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.status(1), Some(SlotStatus::Empty));
}
