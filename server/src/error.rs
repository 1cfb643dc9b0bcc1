//! Failures of one engine run, as reported back to the session

use gn_packet::DemuxError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The engine binary could not be started at all.
    #[error("Failed to start engine {binary:?}: {source}")]
    ProcessSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Lost the process while collecting its output.
    #[error("Failed to collect engine output: {0}")]
    Capture(#[source] std::io::Error),
    #[error("Engine exited with {}\n{stderr}", exit_label(.code))]
    ComputeFailed { code: Option<i32>, stderr: String },
    /// Exit was clean but the payload was not in the output.
    #[error(transparent)]
    Demux(#[from] DemuxError),
    #[error("Could not encode parameter values: {0}")]
    Encode(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}
