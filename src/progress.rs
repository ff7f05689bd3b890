//! Pipeline stage reporting.
//!
//! Reports which stage a run is in (watching, classifying, retrying, matching,
//! refining) so operators see progress while a model call is pending.
//! Stage lines go to **stderr**; stdout carries only the final report.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// One stage transition of the resolver.
#[derive(Clone, Debug, PartialEq)]
pub enum StageEvent {
    /// Waiting for a new file in `dir`.
    Watching { dir: PathBuf },
    /// A file was found and is being sent for classification.
    Classifying { path: Option<PathBuf> },
    /// Attempt `attempt` failed transiently; retrying after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Comparing the answer against the picklist.
    Matching,
    /// More than one candidate; asking the model to choose.
    Refining { candidates: usize },
}

/// Receives stage events from the resolver.
pub trait StageReporter: Send + Sync {
    fn report(&self, event: StageEvent);
}

/// Human-readable stage lines on stderr: "classifying  /drop/img.png".
pub struct StderrProgress;

impl StageReporter for StderrProgress {
    fn report(&self, event: StageEvent) {
        let line = match &event {
            StageEvent::Watching { dir } => format!("watching  {}\n", dir.display()),
            StageEvent::Classifying { path: Some(path) } => {
                format!("classifying  {}\n", path.display())
            }
            StageEvent::Classifying { path: None } => "classifying\n".to_string(),
            StageEvent::Retrying { attempt, delay } => format!(
                "retrying  attempt {} failed, next in {:.1}s\n",
                attempt,
                delay.as_secs_f64()
            ),
            StageEvent::Matching => "matching  against picklist\n".to_string(),
            StageEvent::Refining { candidates } => {
                format!("refining  {} candidates\n", candidates)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable stages: one JSON object per line on stderr.
pub struct JsonProgress;

impl StageReporter for JsonProgress {
    fn report(&self, event: StageEvent) {
        let obj = match &event {
            StageEvent::Watching { dir } => serde_json::json!({
                "event": "stage",
                "stage": "watching",
                "dir": dir.display().to_string()
            }),
            StageEvent::Classifying { path } => serde_json::json!({
                "event": "stage",
                "stage": "classifying",
                "path": path.as_ref().map(|p| p.display().to_string())
            }),
            StageEvent::Retrying { attempt, delay } => serde_json::json!({
                "event": "stage",
                "stage": "retrying",
                "attempt": attempt,
                "delay_ms": delay.as_millis() as u64
            }),
            StageEvent::Matching => serde_json::json!({
                "event": "stage",
                "stage": "matching"
            }),
            StageEvent::Refining { candidates } => serde_json::json!({
                "event": "stage",
                "stage": "refining",
                "candidates": candidates
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when stage output is disabled.
pub struct NoProgress;

impl StageReporter for NoProgress {
    fn report(&self, _event: StageEvent) {}
}

/// Stage output mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human stages when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn StageReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
