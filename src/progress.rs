//! Ingestion progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts. The
//! CLI picks a reporter from `--progress human|json|off`; without the flag,
//! human output is shown only when stderr is a TTY.

use std::io::Write;

/// A single progress event emitted by the ingestion pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestEvent {
    /// Walking a source directory; file count not known yet.
    Discovering { dir: String },
    /// `n` of `total` files finished (stored, skipped or failed).
    Ingesting { n: u64, total: u64, source: String },
    /// Run complete.
    Finished { files: u64, chunks: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly lines: `ingest  12 / 1,034 files  books/sales.pdf`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Discovering { dir } => format!("ingest {}  discovering...\n", dir),
            IngestEvent::Ingesting { n, total, source } => format!(
                "ingest  {} / {} files  {}\n",
                format_number(*n),
                format_number(*total),
                source
            ),
            IngestEvent::Finished { files, chunks } => format!(
                "ingest  done: {} files, {} chunks\n",
                format_number(*files),
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IngestEvent) -> serde_json::Value {
        match event {
            IngestEvent::Discovering { dir } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "dir": dir
            }),
            IngestEvent::Ingesting { n, total, source } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "n": n,
                "total": total,
                "source": source
            }),
            IngestEvent::Finished { files, chunks } => serde_json::json!({
                "event": "done",
                "files": files,
                "chunks": chunks
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
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
    fn json_event_shape() {
        let v = JsonProgress::to_json(&IngestEvent::Ingesting {
            n: 2,
            total: 5,
            source: "texts/a.txt".into(),
        });
        assert_eq!(v["phase"], "ingesting");
        assert_eq!(v["n"], 2);
        assert_eq!(v["source"], "texts/a.txt");
    }
}
