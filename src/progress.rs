//! Scan progress reporting.
//!
//! `triage scan` reports which phase it is in and how far along it is.
//! Progress goes to **stderr** so stdout stays parseable for `--json`.

use std::io::Write;

/// A single progress event for a scan.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanProgressEvent {
    /// Listing open PRs and issues (total unknown).
    Fetching { repo: String },
    /// Fetching diff stats, CI, reviews and files for PR n of total.
    Enriching { repo: String, n: u64, total: u64 },
    /// Embedding changed items; n of total done.
    Embedding { repo: String, n: u64, total: u64 },
}

impl ScanProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            ScanProgressEvent::Fetching { .. } => "fetching",
            ScanProgressEvent::Enriching { .. } => "enriching",
            ScanProgressEvent::Embedding { .. } => "embedding",
        }
    }
}

pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress: "scan owner/name  embedding  120 / 1,500 items".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Fetching { repo } => format!("scan {}  fetching...\n", repo),
            ScanProgressEvent::Enriching { repo, n, total }
            | ScanProgressEvent::Embedding { repo, n, total } => format!(
                "scan {}  {}  {} / {} items\n",
                repo,
                event.phase(),
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Fetching { repo } => serde_json::json!({
                "event": "progress",
                "repo": repo,
                "phase": event.phase(),
            }),
            ScanProgressEvent::Enriching { repo, n, total }
            | ScanProgressEvent::Embedding { repo, n, total } => serde_json::json!({
                "event": "progress",
                "repo": repo,
                "phase": event.phase(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
