//! gn-packet: wire formats for live Geometry Nodes streaming
//!
//! This crate provides:
//! - The binary mesh packet (`MESH` magic, version 1) and its decoder
//! - The parameter schema document and parameter snapshots
//! - The JSON envelopes exchanged over the session channel
//! - Extraction of schema/mesh payloads from noisy engine output
//! - Client-side geometry updates with buffer reuse and one-time camera framing
//! - Client-side parameter edits, checked against the schema and throttled
//!
//! Nothing here performs network or process I/O; the server crate drives it.

pub mod demux;
pub mod packet;
pub mod params;
pub mod protocol;
pub mod schema;
pub mod stl;
pub mod viewer;

pub use demux::{
    demux, extract_mesh, extract_schema, find_magic, ComputeMode, DemuxError, Demuxed, RawCapture,
};
pub use packet::{
    MeshPacket, MeshPacketView, PacketError, PacketHeader, HEADER_LEN, MESH_MAGIC, MESH_VERSION,
};
pub use params::{ParameterMap, ParameterSnapshot, ParameterValue};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use schema::{ParameterDescriptor, ParameterIssue, ParameterKind, SchemaDescription};
pub use viewer::{
    Bounds, CameraFrame, MeshUpdater, UpdateReport, ViewerEvent, ViewerSession, SEND_THROTTLE,
};

use anyhow::{Context, Result};

/// Summary of a captured engine run, as printed by `gn-capture`.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureReport {
    Mesh {
        noise_bytes: usize,
        packet: MeshPacket,
        bounds: Option<Bounds>,
    },
    Schema {
        noise_bytes: usize,
        schema: SchemaDescription,
    },
}

/// Demultiplex and decode a raw stdout dump of the engine.
pub fn inspect_capture(stdout: &[u8], mode: ComputeMode) -> Result<CaptureReport> {
    match mode {
        ComputeMode::Mesh => {
            let payload = extract_mesh(stdout)?;
            let packet = MeshPacket::decode(payload).context("Mesh payload did not decode")?;
            let bounds = Bounds::from_positions(&packet.positions);
            Ok(CaptureReport::Mesh {
                noise_bytes: stdout.len() - payload.len(),
                packet,
                bounds,
            })
        }
        ComputeMode::Schema => {
            let text = extract_schema(stdout)?;
            let noise_bytes = find_subslice(stdout, text.as_bytes()).unwrap_or(0);
            let schema = SchemaDescription::parse(&text).context("Schema did not parse")?;
            Ok(CaptureReport::Schema { noise_bytes, schema })
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
