use engine_logging::{engine_error, engine_info};
use relay_core::{ResultSet, Verdict};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owns the result set while verdicts stream in from the validation workers.
///
/// The collector is the only writer, so inserts need no lock. It returns the
/// frozen set once every sender has been dropped, which the pipeline only
/// allows after the validation pool has fully drained.
pub struct Collector {
    rx: mpsc::UnboundedReceiver<Verdict>,
    results: ResultSet,
}

impl Collector {
    pub fn channel() -> (mpsc::UnboundedSender<Verdict>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx,
                results: ResultSet::new(),
            },
        )
    }

    pub fn spawn(self) -> JoinHandle<ResultSet> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> ResultSet {
        while let Some(verdict) = self.rx.recv().await {
            let address = verdict.address().to_string();
            let live = verdict.is_live();
            let successes = verdict.successes();
            let probes = verdict.outcomes().len();
            match self.results.insert(verdict) {
                Ok(()) if live => {
                    engine_info!("LIVE {address} ({successes}/{probes})");
                }
                Ok(()) => {}
                Err(err) => engine_error!("Dropping verdict: {err}"),
            }
        }
        self.results
    }
}
