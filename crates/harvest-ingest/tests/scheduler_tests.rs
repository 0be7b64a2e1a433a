//! Batch scheduler: concurrency cap, failure isolation, retry, timeout and
//! cancellation

mod helpers;

use harvest_common::types::{Batch, RunStats, WorkUnit};
use harvest_ingest::config::{CancelMode, PipelineConfig};
use harvest_ingest::framework::{partition, BatchScheduler, Harvester, IngestionPipeline};
use harvest_ingest::{MemoryRecordStore, PersistStrategy, RetryPolicy, SchedulerConfig};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn batches(units: usize, batch_size: i64) -> Vec<Batch> {
    let units = (0..units).map(|n| WorkUnit::new(format!("u{n}"))).collect();
    partition(units, batch_size).unwrap()
}

fn config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        batch_size: 1,
        max_concurrent,
        batch_timeout_secs: None,
        ..Default::default()
    }
}

async fn run(
    config: SchedulerConfig,
    persist: PersistStrategy,
    batches: Vec<Batch>,
    harvester: Arc<ScriptedHarvester>,
    cancel: CancellationToken,
) -> (RunStats, Arc<MemoryRecordStore>) {
    let (store, registry) = memory_backends();
    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        registry,
        &PipelineConfig::default(),
    ));
    let harvester: Arc<dyn Harvester> = harvester;
    let stats = BatchScheduler::new(config, persist)
        .run(batches, harvester, pipeline, cancel)
        .await
        .unwrap();
    (stats, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_cap() {
    let harvester = Arc::new(ScriptedHarvester::new("ria").with_delay(Duration::from_millis(20)));

    let (stats, store) = run(
        config(3),
        PersistStrategy::Immediate,
        batches(40, 2),
        harvester.clone(),
        CancellationToken::new(),
    )
    .await;

    assert!(harvester.peak() <= 3, "peak {}", harvester.peak());
    assert!(stats.peak_concurrency <= 3);
    assert!(stats.peak_concurrency >= 1);
    assert_eq!(stats.batches_succeeded, 20);
    assert_eq!(stats.items_saved, 40);
    assert_eq!(store.len(), 40);
}

#[tokio::test]
async fn test_single_worker_dispatches_in_partition_order() {
    let harvester = Arc::new(ScriptedHarvester::new("tass"));
    run(
        config(1),
        PersistStrategy::Immediate,
        batches(7, 1),
        harvester.clone(),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(harvester.dispatched(), (0..7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_failures_and_panics_are_isolated_to_their_batch() {
    let harvester = Arc::new(
        ScriptedHarvester::new("kommersant")
            .with_step(1, Step::Fail("HTTP 503".into()))
            .with_step(3, Step::Panic),
    );

    let (stats, store) = run(
        config(2),
        PersistStrategy::Immediate,
        batches(6, 1),
        harvester,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(stats.batches_succeeded, 4);
    assert_eq!(stats.batches_failed, 2);
    assert_eq!(stats.batches_dispatched(), 6);
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn test_all_batches_failing_is_reported() {
    let harvester = Arc::new(
        ScriptedHarvester::new("rbc")
            .with_step(0, Step::Fail("captcha".into()))
            .with_step(1, Step::Fail("captcha".into())),
    );
    let (stats, _) = run(
        config(2),
        PersistStrategy::Immediate,
        batches(2, 1),
        harvester,
        CancellationToken::new(),
    )
    .await;
    assert!(stats.all_batches_failed());
}

#[tokio::test]
async fn test_hung_batch_times_out_and_others_complete() {
    let harvester = Arc::new(ScriptedHarvester::new("interfax").with_step(1, Step::Hang));
    let config = SchedulerConfig {
        batch_timeout_secs: Some(1),
        ..config(2)
    };

    let (stats, _) = run(
        config,
        PersistStrategy::Immediate,
        batches(4, 1),
        harvester,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(stats.batches_succeeded, 3);
    assert_eq!(stats.batches_failed, 1);
}

#[tokio::test]
async fn test_failed_batch_is_retried_under_policy() {
    let harvester = Arc::new(ScriptedHarvester::new("vedomosti").with_step(0, Step::FailTimes(2)));
    let config = SchedulerConfig {
        retry: RetryPolicy::attempts(3, Duration::from_millis(5)),
        ..config(1)
    };

    let (stats, store) = run(
        config,
        PersistStrategy::Immediate,
        batches(1, 1),
        harvester.clone(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(harvester.attempts(0), 3);
    assert_eq!(stats.batches_succeeded, 1);
    assert_eq!(stats.batches_failed, 0);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_no_retry_by_default() {
    let harvester = Arc::new(ScriptedHarvester::new("vedomosti").with_step(0, Step::FailTimes(1)));
    let (stats, _) = run(
        config(1),
        PersistStrategy::Immediate,
        batches(1, 1),
        harvester.clone(),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(harvester.attempts(0), 1);
    assert_eq!(stats.batches_failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_cancel_stops_dispatch_and_lets_running_batches_finish() {
    let cancel = CancellationToken::new();
    let harvester = Arc::new(
        ScriptedHarvester::new("lenta")
            .with_delay(Duration::from_millis(50))
            .with_step(1, Step::Cancel(cancel.clone())),
    );

    let (stats, store) = run(
        config(2),
        PersistStrategy::Immediate,
        batches(10, 1),
        harvester.clone(),
        cancel,
    )
    .await;

    let dispatched = harvester.dispatched().len() as u64;
    assert!(dispatched < 10);
    assert_eq!(stats.batches_succeeded, dispatched);
    assert_eq!(stats.batches_failed, 0);
    assert_eq!(stats.batches_skipped, 10 - dispatched);
    assert_eq!(store.len() as u64, dispatched);
}

#[tokio::test]
async fn test_hard_cancel_aborts_running_batches() {
    let cancel = CancellationToken::new();
    let harvester = Arc::new(ScriptedHarvester::new("fontanka").with_step(0, Step::Hang));
    let config = SchedulerConfig {
        cancel_mode: CancelMode::Hard,
        ..config(1)
    };

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (stats, _) = run(config, PersistStrategy::Immediate, batches(3, 1), harvester, cancel).await;

    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.batches_succeeded, 0);
    assert_eq!(stats.batches_skipped, 2);
}

#[tokio::test]
async fn test_batched_persistence_flushes_partial_chunks() {
    let harvester = Arc::new(ScriptedHarvester::new("meduza").with_records_per_unit(7));

    let (stats, store) = run(
        config(2),
        PersistStrategy::Batched { size: 5 },
        batches(4, 2),
        harvester,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(stats.records_emitted, 28);
    assert_eq!(stats.items_saved, 28);
    assert_eq!(store.len(), 28);
}

#[tokio::test]
async fn test_invalid_config_is_an_error() {
    let (store, registry) = memory_backends();
    let pipeline = Arc::new(IngestionPipeline::new(store, registry, &PipelineConfig::default()));
    let harvester: Arc<dyn Harvester> = Arc::new(ScriptedHarvester::new("x"));

    let err = BatchScheduler::new(config(0), PersistStrategy::Immediate)
        .run(batches(1, 1), harvester, pipeline, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_empty_work_list_is_a_no_op() {
    let harvester = Arc::new(ScriptedHarvester::new("empty"));
    let (stats, _) = run(
        config(3),
        PersistStrategy::Immediate,
        Vec::new(),
        harvester,
        CancellationToken::new(),
    )
    .await;
    assert_eq!(stats, RunStats::default());
}
