//! External process harvester driven through `sh`
#![cfg(unix)]

mod helpers;

use harvest_common::types::{Batch, WorkUnit};
use harvest_ingest::config::{PipelineConfig, SourceConfig};
use harvest_ingest::framework::{
    BatchScheduler, Harvester, HarvesterFailure, IngestionPipeline, RecordSink,
};
use harvest_ingest::process::ProcessHarvester;
use harvest_ingest::{MemoryRecordStore, PersistStrategy, SchedulerConfig};
use helpers::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const EMIT_UNITS: &str = r#"
for u in $(echo "$HARVEST_UNITS" | tr ',' ' '); do
  printf '{"kind":"news","source":"%s","url":"https://cntd.example/%s","text":"t","header":"h","published_at":1,"parsed_at":2}\n' "$HARVEST_SOURCE" "$u"
done
"#;

fn shell(script: &str, extra: &[&str]) -> ProcessHarvester {
    let mut source = SourceConfig::new("cntd", "sh");
    source.args = vec!["-c".to_string(), script.to_string(), "harvest".to_string()];
    source.args.extend(extra.iter().map(|s| s.to_string()));
    ProcessHarvester::new(source)
}

fn batch(ids: &[&str]) -> Batch {
    Batch {
        index: 4,
        units: ids.iter().map(|id| WorkUnit::new(*id)).collect(),
        pages: None,
    }
}

fn sink() -> (RecordSink, Arc<IngestionPipeline>, Arc<MemoryRecordStore>) {
    let (store, registry) = memory_backends();
    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        registry,
        &PipelineConfig::default(),
    ));
    (
        RecordSink::new(pipeline.clone(), PersistStrategy::Immediate),
        pipeline,
        store,
    )
}

#[tokio::test]
async fn test_records_from_stdout_reach_the_store() {
    let harvester = shell(EMIT_UNITS, &[]);
    let (sink, pipeline, store) = sink();

    let outcome = harvester
        .harvest(&batch(&["101", "102", "103"]), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.emitted, 3);
    assert_eq!(store.len(), 3);
    assert_eq!(pipeline.snapshot().items_saved, 3);
}

#[tokio::test]
async fn test_placeholders_reach_arguments() {
    // $1 is the rendered {units} argument
    let script = r#"
for u in $(echo "$1" | tr ',' ' '); do
  printf '{"kind":"news","source":"cntd","url":"https://cntd.example/arg/%s","text":"t","title":"h","published_at":1,"parsed_at":2}\n' "$u"
done
"#;
    let harvester = shell(script, &["{units}"]);
    let (sink, _, store) = sink();

    harvester
        .harvest(&batch(&["7", "8"]), &sink, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_undecodable_lines_are_counted_invalid() {
    let script = r#"
echo 'not json at all'
echo ''
printf '{"kind":"news","source":"cntd","url":"https://cntd.example/ok","text":"t","title":"h","published_at":1,"parsed_at":2}\n'
"#;
    let harvester = shell(script, &[]);
    let (sink, pipeline, store) = sink();

    let outcome = harvester
        .harvest(&batch(&["1"]), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.emitted, 2);
    assert_eq!(store.len(), 1);
    let stats = pipeline.snapshot();
    assert_eq!((stats.items_saved, stats.items_invalid), (1, 1));
}

#[tokio::test]
async fn test_nonzero_exit_fails_with_stderr_tail() {
    let harvester = shell("echo 'blocked by captcha' >&2; exit 3", &[]);
    let (sink, _, _) = sink();

    let failure = harvester
        .harvest(&batch(&["1"]), &sink, CancellationToken::new())
        .await
        .unwrap_err();

    match failure {
        HarvesterFailure::Failed(reason) => {
            assert!(reason.contains("exit status 3"), "{reason}");
            assert!(reason.contains("blocked by captcha"), "{reason}");
        },
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_is_written_to_stdin() {
    let script = r#"
read payload
case "$payload" in
  *'"index":4'*) printf '{"kind":"news","source":"cntd","url":"https://cntd.example/stdin","text":"t","title":"h","published_at":1,"parsed_at":2}\n' ;;
  *) exit 1 ;;
esac
"#;
    let harvester = shell(script, &[]);
    let (sink, _, store) = sink();

    harvester
        .harvest(&batch(&["1"]), &sink, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_abort_kills_the_process() {
    let harvester = shell("sleep 30", &[]);
    let (sink, _, _) = sink();
    let abort = CancellationToken::new();

    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let failure = tokio::time::timeout(
        Duration::from_secs(10),
        harvester.harvest(&batch(&["1"]), &sink, abort),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert_eq!(failure, HarvesterFailure::Aborted { emitted: 0 });
}

#[tokio::test]
async fn test_missing_program_fails_the_batch() {
    let harvester = ProcessHarvester::new(SourceConfig::new("cntd", "/nonexistent/scraper"));
    let (sink, _, _) = sink();

    let failure = harvester
        .harvest(&batch(&["1"]), &sink, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(failure, HarvesterFailure::Failed(reason) if reason.contains("failed to spawn")));
}

/// Running means present and not a zombie
fn process_is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .and_then(|(_, rest)| rest.chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_batch_timeout_kills_the_process() {
    // $1 is the pid file; exec keeps the pid for sleep
    let script = r#"
printf '{"kind":"news","source":"cntd","url":"https://cntd.example/early","text":"t","title":"h","published_at":1,"parsed_at":2}\n'
echo $$ > "$1"
exec sleep 30
"#;
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("harvester.pid");
    let harvester: Arc<dyn Harvester> =
        Arc::new(shell(script, &[pid_file.to_str().unwrap()]));
    let (_, pipeline, store) = sink();
    let config = SchedulerConfig {
        batch_size: 1,
        max_concurrent: 1,
        batch_timeout_secs: Some(1),
        ..Default::default()
    };

    let started = Instant::now();
    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        BatchScheduler::new(config, PersistStrategy::Immediate).run(
            vec![batch(&["1"])],
            harvester,
            pipeline,
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!((stats.batches_failed, stats.batches_succeeded), (1, 0));
    assert_eq!(stats.records_emitted, 1);
    assert_eq!(store.len(), 1);

    let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while process_is_running(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_is_running(pid), "harvester process {pid} survived the timeout");
}
