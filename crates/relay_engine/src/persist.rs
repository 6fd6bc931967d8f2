use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_error, engine_info};
use relay_core::ResultSet;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::OutputConfig;
use crate::report::{build_report, write_report};
use crate::HarvestReport;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("invalid output path {0:?}")]
    InvalidPath(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Writer for the directory containing `path`, plus the file name to use.
    pub fn for_path(path: &Path) -> Result<(Self, String), PersistError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PersistError::InvalidPath(path.to_path_buf()))?
            .to_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((Self::new(dir), filename))
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Durable destination for a list of addresses. Writing replaces whatever
/// the sink held before.
pub trait ResultSink: Send + Sync {
    fn persist(&self, addresses: &[String]) -> Result<(), PersistError>;

    fn describe(&self) -> String;
}

/// One address per line, newline-terminated.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultSink for FileSink {
    fn persist(&self, addresses: &[String]) -> Result<(), PersistError> {
        let (writer, filename) = AtomicFileWriter::for_path(&self.path)?;
        let mut content = String::with_capacity(addresses.len() * 22);
        for address in addresses {
            content.push_str(address);
            content.push('\n');
        }
        writer.write(&filename, &content)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub error: PersistError,
}

/// Every output that could not be written. The result set itself is
/// untouched and still owned by the caller.
#[derive(Debug, Error)]
pub struct PersistFailed {
    pub failures: Vec<SinkFailure>,
}

impl fmt::Display for PersistFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write {} output(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.sink, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistSummary {
    pub live: usize,
    pub dead: Option<usize>,
    pub report: Option<PathBuf>,
}

/// Writes the live set, and optionally the dead set and a JSON report.
pub struct Persister {
    live: Box<dyn ResultSink>,
    dead: Option<Box<dyn ResultSink>>,
    report_path: Option<PathBuf>,
}

impl Persister {
    pub fn new(live: Box<dyn ResultSink>, dead: Option<Box<dyn ResultSink>>) -> Self {
        Self {
            live,
            dead,
            report_path: None,
        }
    }

    pub fn from_config(output: &OutputConfig) -> Self {
        let live: Box<dyn ResultSink> = Box::new(FileSink::new(&output.live_path));
        let dead = output
            .dead_path
            .as_ref()
            .map(|path| Box::new(FileSink::new(path)) as Box<dyn ResultSink>);
        Self {
            live,
            dead,
            report_path: output.report_path.clone(),
        }
    }

    pub fn with_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Attempts every configured output even when an earlier one fails.
    pub fn persist(
        &self,
        results: &ResultSet,
        harvest: &[HarvestReport],
    ) -> Result<PersistSummary, PersistFailed> {
        let mut failures = Vec::new();

        let live = results.live_addresses();
        record(self.live.as_ref(), &live, &mut failures);

        let dead = self.dead.as_ref().map(|sink| {
            let dead = results.dead_addresses();
            record(sink.as_ref(), &dead, &mut failures);
            dead.len()
        });

        let report = self.report_path.as_ref().and_then(|path| {
            let report = build_report(results, harvest);
            match write_report(path, &report) {
                Ok(written) => {
                    engine_info!("Wrote run report to {}", written.display());
                    Some(written)
                }
                Err(error) => {
                    engine_error!("Failed to write report {}: {}", path.display(), error);
                    failures.push(SinkFailure {
                        sink: path.display().to_string(),
                        error,
                    });
                    None
                }
            }
        });

        if failures.is_empty() {
            Ok(PersistSummary {
                live: live.len(),
                dead,
                report,
            })
        } else {
            Err(PersistFailed { failures })
        }
    }
}

fn record(sink: &dyn ResultSink, addresses: &[String], failures: &mut Vec<SinkFailure>) {
    match sink.persist(addresses) {
        Ok(()) => engine_info!("Wrote {} address(es) to {}", addresses.len(), sink.describe()),
        Err(error) => {
            engine_error!("Failed to write {}: {}", sink.describe(), error);
            failures.push(SinkFailure {
                sink: sink.describe(),
                error,
            });
        }
    }
}
