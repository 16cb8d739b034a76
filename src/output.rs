use std::io::{self, Write};

use serde::Serialize;

use crate::domain::AuthorityRecord;
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Verbose,
    Quiet,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedValue {
    pub input: String,
    pub normalized: String,
    pub accession_key: String,
    pub numeric: Option<u64>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_record(record: &AuthorityRecord) -> io::Result<()> {
        Self::print_json(record)
    }

    pub fn print_normalized(value: &NormalizedValue) -> io::Result<()> {
        Self::print_json(value)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}

pub fn progress_sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Verbose => &LogProgress,
        OutputMode::Quiet => &JsonOutput,
    }
}
