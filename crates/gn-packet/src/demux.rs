//! Pulls the structured payload out of an engine's captured output.
//!
//! The engine does not control its own logging: add-ons, the startup banner
//! and our worker script all write to stdout. The payload is contiguous once
//! it starts, so everything before it is treated as noise.

use crate::packet::{PacketHeader, MESH_MAGIC};
use regex::bytes::Regex;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Upper bound on how much stdout is searched for a schema document.
pub const SCHEMA_SCAN_LIMIT: usize = 8 * 1024 * 1024;

const SAMPLE_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemuxError {
    #[error("Could not extract mesh binary from engine output ({len} bytes, starting {sample:?})")]
    MagicNotFound { len: usize, sample: String },
    #[error("Could not extract JSON schema from engine output ({len} bytes, starting {sample:?})")]
    SchemaNotFound { len: usize, sample: String },
}

/// What the engine is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeMode {
    Schema,
    Mesh,
}

impl ComputeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeMode::Schema => "schema",
            ComputeMode::Mesh => "mesh",
        }
    }
}

impl fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "schema" => Ok(ComputeMode::Schema),
            "mesh" => Ok(ComputeMode::Mesh),
            _ => Err(format!("Unknown mode: {}. Use: schema or mesh", s)),
        }
    }
}

/// Everything one engine run wrote, plus how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl RawCapture {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Extracted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Demuxed {
    Schema(String),
    Mesh(Vec<u8>),
}

fn sample(buf: &[u8]) -> String {
    String::from_utf8_lossy(&buf[..buf.len().min(SAMPLE_LEN)]).into_owned()
}

/// Offset of the first little-endian mesh magic, at any alignment.
pub fn find_magic(buf: &[u8]) -> Option<usize> {
    let needle = MESH_MAGIC.to_le_bytes();
    buf.windows(needle.len()).position(|w| w == needle)
}

/// The mesh packet from the magic to the end of `buf`.
pub fn extract_mesh(buf: &[u8]) -> Result<&[u8], DemuxError> {
    match find_magic(buf) {
        Some(offset) => Ok(&buf[offset..]),
        None => Err(DemuxError::MagicNotFound {
            len: buf.len(),
            sample: sample(buf),
        }),
    }
}

fn schema_start() -> &'static Regex {
    static SCHEMA_START: OnceLock<Regex> = OnceLock::new();
    SCHEMA_START.get_or_init(|| Regex::new(r#"\{"type":\s*"schema""#).expect("constant pattern"))
}

/// Brace-matches every candidate start in one forward pass and returns the
/// earliest-starting candidate that closes.
///
/// Each open candidate remembers the depth it opened at and closes when the
/// depth falls back to it. A raw line break inside a string cannot occur in
/// the engine's JSON, so it abandons every open candidate.
fn first_complete_object(
    text: &[u8],
    starts: impl Iterator<Item = usize>,
) -> Option<Range<usize>> {
    let mut starts = starts.peekable();
    let first = *starts.peek()?;

    // (start offset, depth before its opening brace)
    let mut open: Vec<(usize, usize)> = Vec::new();
    let mut best: Option<Range<usize>> = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.iter().enumerate().skip(first) {
        if starts.peek() == Some(&i) {
            starts.next();
            if open.is_empty() {
                depth = 0;
                in_string = false;
                escaped = false;
                open.push((i, depth));
            } else if !in_string {
                open.push((i, depth));
            }
        }
        if open.is_empty() {
            continue;
        }

        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                b'\n' => {
                    if best.is_some() {
                        return best;
                    }
                    open.clear();
                    in_string = false;
                }
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if let Some(&(start, opened_at)) = open.last() {
                    if opened_at == depth {
                        open.pop();
                        if best.as_ref().map_or(true, |r| start < r.start) {
                            best = Some(start..i + 1);
                        }
                        if open.is_empty() {
                            return best;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    best
}

/// The first complete `{"type": "schema", ...}` object in `buf`.
///
/// Only the first [`SCHEMA_SCAN_LIMIT`] bytes are searched, in linear time.
pub fn extract_schema(buf: &[u8]) -> Result<String, DemuxError> {
    let scanned = &buf[..buf.len().min(SCHEMA_SCAN_LIMIT)];
    let starts = schema_start().find_iter(scanned).map(|m| m.start());

    if let Some(range) = first_complete_object(scanned, starts) {
        return Ok(String::from_utf8_lossy(&scanned[range]).into_owned());
    }

    Err(DemuxError::SchemaNotFound {
        len: buf.len(),
        sample: sample(buf),
    })
}

/// Demultiplexes a finished run's stdout. Callers check the exit code first.
pub fn demux(mode: ComputeMode, capture: RawCapture) -> Result<Demuxed, DemuxError> {
    match mode {
        ComputeMode::Schema => {
            let schema = extract_schema(&capture.stdout)?;
            debug!("Schema extracted, {} chars", schema.len());
            Ok(Demuxed::Schema(schema))
        }
        ComputeMode::Mesh => {
            let mut stdout = capture.stdout;
            let offset = find_magic(&stdout).ok_or_else(|| DemuxError::MagicNotFound {
                len: stdout.len(),
                sample: sample(&stdout),
            })?;
            stdout.drain(..offset);

            match PacketHeader::parse(&stdout) {
                Ok(header) => debug!(
                    "Found MESH magic at offset {}: {} vertices, {} indices, {} bytes",
                    offset,
                    header.vertex_count,
                    header.index_count,
                    stdout.len()
                ),
                Err(e) => debug!("Found MESH magic at offset {} but header is unusable: {}", offset, e),
            }
            Ok(Demuxed::Mesh(stdout))
        }
    }
}
