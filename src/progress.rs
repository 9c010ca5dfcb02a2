//! Ingest and answer progress reporting.
//!
//! Reports observable progress during `mdrag ingest` and while an answer run
//! is in flight, so users see what is happening during long embedding calls
//! and agent runs. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// Labels shown while an answer run is in flight, rotated on a fixed interval.
pub const WORKING_STEPS: [&str; 6] = [
    "Searching documents...",
    "Analyzing information...",
    "Synthesizing data...",
    "Formulating response...",
    "Reviewing information...",
    "Finalizing answer...",
];

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Documents are being read from `dir`. Total unknown.
    Loading { dir: String },
    /// `documents` files loaded and being split.
    Chunking { documents: u64 },
    /// `n` of `total` chunks embedded and stored.
    Embedding { n: u64, total: u64 },
    /// An answer run is still working.
    Working { step: String, elapsed_secs: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = human_line(&event);
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Loading { dir } => format!("ingest  loading {}...\n", dir),
        ProgressEvent::Chunking { documents } => {
            format!("ingest  chunking  {} documents\n", format_number(*documents))
        }
        ProgressEvent::Embedding { n, total } => format!(
            "ingest  embedding  {} / {} chunks\n",
            format_number(*n),
            format_number(*total)
        ),
        ProgressEvent::Working { step, elapsed_secs } => {
            format!("Working: {} (elapsed: {} seconds)\n", step, elapsed_secs)
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Loading { dir } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "dir": dir
            }),
            ProgressEvent::Chunking { documents } => serde_json::json!({
                "event": "progress",
                "phase": "chunking",
                "documents": documents
            }),
            ProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            ProgressEvent::Working { step, elapsed_secs } => serde_json::json!({
                "event": "progress",
                "phase": "working",
                "step": step,
                "elapsed_secs": elapsed_secs
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// The working-step label for a run that has been going for `elapsed_secs`.
pub fn working_step(elapsed_secs: u64, interval_secs: u64) -> &'static str {
    let idx = (elapsed_secs / interval_secs.max(1)) as usize % WORKING_STEPS.len();
    WORKING_STEPS[idx]
}

fn format_number(n: u64) -> String {
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

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn working_step_rotates_every_interval() {
        assert_eq!(working_step(0, 10), "Searching documents...");
        assert_eq!(working_step(9, 10), "Searching documents...");
        assert_eq!(working_step(10, 10), "Analyzing information...");
        assert_eq!(working_step(55, 10), "Finalizing answer...");
        assert_eq!(working_step(60, 10), "Searching documents...");
    }

    #[test]
    fn human_lines() {
        assert_eq!(
            human_line(&ProgressEvent::Embedding { n: 64, total: 1200 }),
            "ingest  embedding  64 / 1,200 chunks\n"
        );
        assert_eq!(
            human_line(&ProgressEvent::Working {
                step: "Synthesizing data...".into(),
                elapsed_secs: 21
            }),
            "Working: Synthesizing data... (elapsed: 21 seconds)\n"
        );
    }
}
