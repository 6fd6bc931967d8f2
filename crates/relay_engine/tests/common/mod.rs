#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::{CanonicalAddress, Candidate, ProbeTarget};
use relay_engine::{
    FailureKind, FetchError, FetchOutput, PoolSettings, ProbeClient, ProbeError, ProbeResponse,
    SourceFetcher, WorkerPool,
};

pub fn init_logging() {
    engine_logging::initialize_for_tests();
}

pub fn body(text: &str) -> FetchOutput {
    FetchOutput {
        bytes: text.as_bytes().to_vec(),
        content_type: Some("text/plain; charset=utf-8".to_string()),
        final_url: "http://stub.test/".to_string(),
    }
}

pub fn unavailable() -> FetchError {
    FetchError::new(FailureKind::HttpStatus(503), "503 Service Unavailable")
}

/// Plays back a script of results per URI; the last entry repeats forever.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<FetchOutput, FetchError>>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(
        self,
        uri: &str,
        responses: Vec<Result<FetchOutput, FetchError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(uri.to_string(), responses.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, uri: &str, _timeout: Duration) -> Result<FetchOutput, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(uri) else {
            return Err(FetchError::new(FailureKind::Network, "unknown uri"));
        };
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(FetchError::new(FailureKind::Network, "empty script")))
        }
    }
}

type ProbeRule = dyn Fn(&str, &str) -> Result<ProbeResponse, ProbeError> + Send + Sync;

/// Answers probes from a rule over `(candidate, target_id)` and records how
/// many probes were in flight at once.
pub struct StubProbeClient {
    rule: Box<ProbeRule>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl StubProbeClient {
    pub fn new(
        rule: impl Fn(&str, &str) -> Result<ProbeResponse, ProbeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rule: Box::new(rule),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every target succeeds for addresses in `live`; everything else is refused.
    pub fn live_set(live: &[&str]) -> Self {
        let live: HashSet<String> = live.iter().map(|s| s.to_string()).collect();
        Self::new(move |candidate, _target| {
            if live.contains(candidate) {
                Ok(ok_response())
            } else {
                Err(ProbeError::Connection("connection refused".into()))
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProbeClient for StubProbeClient {
    async fn probe(
        &self,
        candidate: &CanonicalAddress,
        target: &ProbeTarget,
        _timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.rule)(&candidate.to_string(), &target.id)
    }
}

pub fn ok_response() -> ProbeResponse {
    ProbeResponse {
        status: 200,
        body_non_empty: true,
    }
}

pub fn targets(count: usize) -> Vec<ProbeTarget> {
    (0..count)
        .map(|i| ProbeTarget::new(format!("t{i}"), format!("http://target{i}.test/ip")))
        .collect()
}

/// Pool that just records the addresses it receives.
pub fn recording_pool() -> (WorkerPool<Candidate>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let pool = WorkerPool::spawn("record", PoolSettings::new(2, 16), move |c: Candidate| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(c.address.to_string());
        }
    });
    (pool, seen)
}
