mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{body, targets, unavailable, ScriptedFetcher, StubProbeClient};
use pretty_assertions::assert_eq;
use relay_core::{ParserKind, QuorumRule, SourceDescriptor};
use relay_engine::{
    HarvestStatus, Persister, Pipeline, PipelineError, ProbeSchedule, RetryConfig, RunConfig,
};
use tempfile::TempDir;

fn config(dir: &Path, sources: &[&str], target_count: usize, quorum: QuorumRule) -> RunConfig {
    let mut config = RunConfig::default();
    config.sources = sources
        .iter()
        .map(|id| SourceDescriptor::new(*id, format!("http://{id}.test/list"), ParserKind::Lines))
        .collect();
    config.fetch.retry = RetryConfig {
        max_attempts: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
    };
    config.validation.workers = 4;
    config.validation.queue_capacity = 8;
    config.validation.schedule = ProbeSchedule::Sequential { delay_ms: 0 };
    config.validation.targets = targets(target_count);
    config.validation.quorum = quorum;
    config.output.live_path = dir.join("live.txt");
    config.output.dead_path = Some(dir.join("dead.txt"));
    config
}

#[tokio::test]
async fn overlapping_sources_produce_one_verdict_per_address() {
    common::init_logging();
    let temp = TempDir::new().unwrap();
    let list = "1.2.3.4:8080\n1.2.3.4:8080\n5.6.7.8:3128\n";
    let fetcher = ScriptedFetcher::new()
        .script("http://alpha.test/list", vec![Ok(body(list))])
        .script("http://beta.test/list", vec![Ok(body(list))]);
    let probe = Arc::new(StubProbeClient::live_set(&["1.2.3.4:8080"]));

    let config = config(temp.path(), &["alpha", "beta"], 2, QuorumRule::Any);
    let pipeline = Pipeline::new(config, Arc::new(fetcher), probe.clone()).unwrap();
    let run = pipeline.run().await.unwrap();

    assert_eq!(run.admitted, 2);
    assert_eq!(run.results.len(), 2);
    assert_eq!(probe.calls(), 4);
    assert_eq!(run.results.live_addresses(), vec!["1.2.3.4:8080"]);
    assert_eq!(run.results.dead_addresses(), vec!["5.6.7.8:3128"]);
    let harvested: Vec<&str> = run.harvest.iter().map(|h| h.source_id.as_str()).collect();
    assert_eq!(harvested, vec!["alpha", "beta"]);

    let summary = Persister::from_config(&pipeline.config().output)
        .persist(&run.results, &run.harvest)
        .unwrap();
    assert_eq!(summary.live, 1);
    assert_eq!(
        fs::read_to_string(temp.path().join("live.txt")).unwrap(),
        "1.2.3.4:8080\n"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("dead.txt")).unwrap(),
        "5.6.7.8:3128\n"
    );
}

#[tokio::test]
async fn every_admitted_candidate_lands_in_exactly_one_partition() {
    let temp = TempDir::new().unwrap();
    let lists: Vec<String> = (0..3)
        .map(|s| {
            (0..40)
                .map(|i| format!("10.0.{}.{}:{}\n", (i + s * 10) % 50, i % 7, 8000 + i % 3))
                .collect()
        })
        .collect();
    let fetcher = ScriptedFetcher::new()
        .script("http://s0.test/list", vec![Ok(body(&lists[0]))])
        .script("http://s1.test/list", vec![Ok(body(&lists[1]))])
        .script("http://s2.test/list", vec![Ok(body(&lists[2]))]);
    // Live when the last octet is even.
    let probe = StubProbeClient::new(|candidate, _| {
        let octet: u8 = candidate
            .split(':')
            .next()
            .and_then(|host| host.rsplit('.').next())
            .and_then(|o| o.parse().ok())
            .unwrap_or(1);
        if octet % 2 == 0 {
            Ok(common::ok_response())
        } else {
            Err(relay_engine::ProbeError::Timeout)
        }
    });

    let config = config(temp.path(), &["s0", "s1", "s2"], 3, QuorumRule::Majority);
    let run = Pipeline::new(config, Arc::new(fetcher), Arc::new(probe))
        .unwrap()
        .run()
        .await
        .unwrap();

    let admitted: usize = run.harvest.iter().map(|h| h.admitted).sum();
    assert_eq!(admitted, run.admitted);
    let live = run.results.live_addresses();
    let dead = run.results.dead_addresses();
    assert_eq!(live.len() + dead.len(), run.admitted);
    assert!(live.iter().all(|address| !dead.contains(address)));
    for verdict in run.results.iter() {
        assert_eq!(verdict.outcomes().len(), 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn probe_concurrency_is_bounded_by_workers() {
    let temp = TempDir::new().unwrap();
    let list: String = (1..=100).map(|i| format!("10.1.0.{i}:3128\n")).collect();
    let fetcher = ScriptedFetcher::new().script("http://bulk.test/list", vec![Ok(body(&list))]);
    let probe = Arc::new(StubProbeClient::live_set(&[]).with_delay(Duration::from_millis(2)));

    let mut config = config(temp.path(), &["bulk"], 1, QuorumRule::Any);
    config.validation.workers = 5;
    config.validation.queue_capacity = 5;
    let run = Pipeline::new(config, Arc::new(fetcher), probe.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(run.results.len(), 100);
    assert_eq!(probe.calls(), 100);
    assert!(probe.max_in_flight() <= 5, "peak {}", probe.max_in_flight());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_schedule_is_bounded_by_workers() {
    let temp = TempDir::new().unwrap();
    let list: String = (1..=100).map(|i| format!("10.3.0.{i}:3128\n")).collect();
    let fetcher = ScriptedFetcher::new().script("http://bulk.test/list", vec![Ok(body(&list))]);
    let probe = Arc::new(StubProbeClient::live_set(&[]).with_delay(Duration::from_millis(5)));

    let mut config = config(temp.path(), &["bulk"], 3, QuorumRule::Any);
    config.validation.workers = 5;
    config.validation.queue_capacity = 5;
    config.validation.schedule = ProbeSchedule::Concurrent;
    let run = Pipeline::new(config, Arc::new(fetcher), probe.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(run.results.len(), 100);
    assert_eq!(probe.calls(), 300);
    assert!(probe.max_in_flight() <= 5, "peak {}", probe.max_in_flight());
}

#[tokio::test]
async fn one_failed_source_is_not_fatal() {
    let temp = TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new()
        .script("http://up.test/list", vec![Ok(body("1.2.3.4:8080\n"))])
        .script("http://down.test/list", vec![Err(unavailable())]);

    let config = config(temp.path(), &["up", "down"], 1, QuorumRule::Any);
    let run = Pipeline::new(
        config,
        Arc::new(fetcher),
        Arc::new(StubProbeClient::live_set(&["1.2.3.4:8080"])),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(run.results.live_addresses(), vec!["1.2.3.4:8080"]);
    assert_eq!(run.harvest[0].status, HarvestStatus::Harvested);
    assert!(matches!(run.harvest[1].status, HarvestStatus::Abandoned(_)));
    assert_eq!(run.harvest[1].attempts, 2);
}

#[tokio::test]
async fn all_sources_failing_is_reported() {
    let temp = TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new()
        .script("http://a.test/list", vec![Err(unavailable())])
        .script("http://b.test/list", vec![Ok(body("# nothing today\n"))]);

    let config = config(temp.path(), &["a", "b"], 1, QuorumRule::Any);
    let err = Pipeline::new(
        config,
        Arc::new(fetcher),
        Arc::new(StubProbeClient::live_set(&[])),
    )
    .unwrap()
    .run()
    .await
    .unwrap_err();

    match err {
        PipelineError::AllSourcesFailed { harvest } => assert_eq!(harvest.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancellation_still_yields_complete_result_set() {
    let temp = TempDir::new().unwrap();
    let list: String = (1..=20).map(|i| format!("10.2.0.{i}:80\n")).collect();
    let fetcher = ScriptedFetcher::new().script("http://slow.test/list", vec![Ok(body(&list))]);
    let probe = StubProbeClient::live_set(&[]).with_delay(Duration::from_secs(30));

    let mut config = config(temp.path(), &["slow"], 2, QuorumRule::Any);
    config.validation.workers = 2;
    config.validation.queue_capacity = 50;
    let pipeline = Pipeline::new(config, Arc::new(fetcher), Arc::new(probe)).unwrap();

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let run = tokio::time::timeout(Duration::from_secs(10), pipeline.run())
        .await
        .expect("cancelled run should finish promptly")
        .unwrap();

    assert_eq!(run.results.len(), run.admitted);
    assert_eq!(run.results.live().count(), 0);
}

#[tokio::test]
async fn cancelling_before_harvest_reports_cancellation() {
    let temp = TempDir::new().unwrap();
    let fetcher =
        ScriptedFetcher::new().script("http://early.test/list", vec![Ok(body("1.2.3.4:8080\n"))]);
    let config = config(temp.path(), &["early"], 1, QuorumRule::Any);
    let pipeline = Pipeline::new(
        config,
        Arc::new(fetcher),
        Arc::new(StubProbeClient::live_set(&[])),
    )
    .unwrap();
    pipeline.cancellation_token().cancel();

    match pipeline.run().await.unwrap_err() {
        PipelineError::Cancelled { harvest } => {
            assert_eq!(harvest.len(), 1);
            assert_eq!(harvest[0].status, HarvestStatus::Cancelled);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn invalid_config_is_rejected_before_running() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path(), &["a"], 2, QuorumRule::AtLeast(3));
    let result = Pipeline::new(
        config,
        Arc::new(ScriptedFetcher::new()),
        Arc::new(StubProbeClient::live_set(&[])),
    );
    assert!(result.is_err());
}
