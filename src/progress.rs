//! Sync progress reporting.
//!
//! `relay sync` reports each document as it settles so a long pass over a
//! slow index shows where it is. Progress goes to **stderr**; stdout
//! carries only the final summary.

use std::io::Write;

#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// The external store is being listed.
    Listing { store: String },
    /// Document `n` of `total` settled, indexed or failed.
    Document {
        store: String,
        name: String,
        n: u64,
        total: u64,
        indexed: bool,
    },
}

pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// One line per event, e.g. `box:123 [3/40] indexed Handbook.pdf`.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", human_line(&event));
        let _ = err.flush();
    }
}

fn human_line(event: &SyncProgressEvent) -> String {
    match event {
        SyncProgressEvent::Listing { store } => format!("{} listing", store),
        SyncProgressEvent::Document {
            store,
            name,
            n,
            total,
            indexed,
        } => {
            let verb = if *indexed { "indexed" } else { "failed " };
            format!("{} [{}/{}] {} {}", store, n, total, verb, name)
        }
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Listing { store } => serde_json::json!({
                "event": "listing",
                "store": store,
            }),
            SyncProgressEvent::Document {
                store,
                name,
                n,
                total,
                indexed,
            } => serde_json::json!({
                "event": "document",
                "store": store,
                "document": name,
                "n": n,
                "total": total,
                "outcome": if *indexed { "indexed" } else { "failed" },
            }),
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
