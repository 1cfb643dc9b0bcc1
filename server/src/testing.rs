//! In-process engine double for session and router tests

use crate::error::PipelineError;
use crate::invoker::{Compute, ComputeRequest};
use gn_packet::{ComputeMode, MeshPacket, ParameterSnapshot, ParameterValue, RawCapture};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SCHEMA_JSON: &str = r#"{"type": "schema", "object": "Tower", "modifier": "GeometryNodes", "params": [{"identifier": "Socket_2", "name": "Floors", "type": "int", "min": 1, "max": 40}]}"#;

/// Answers like the real engine, log noise included, after a fixed delay.
///
/// Mesh runs return a triangle whose first x coordinate is the snapshot's `a`
/// value. Flags in the snapshot select a failure: `fail` exits with code 1,
/// `missing` fails to start, `silent` exits cleanly without a payload.
#[derive(Debug, Clone, Default)]
pub struct FakeCompute {
    delay: Duration,
    requests: Arc<Mutex<Vec<ComputeRequest>>>,
}

impl FakeCompute {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ComputeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn mesh_snapshots(&self) -> Vec<ParameterSnapshot> {
        self.requests()
            .into_iter()
            .filter_map(|r| r.snapshot)
            .collect()
    }
}

pub fn marker_mesh(a: f32) -> MeshPacket {
    MeshPacket::new(
        vec![a, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        vec![0, 1, 2],
    )
}

/// Reads back the `a` value a mesh was built with.
pub fn marker(bytes: &[u8]) -> f32 {
    MeshPacket::decode(bytes).unwrap().positions[0]
}

impl Compute for FakeCompute {
    async fn invoke(&self, request: ComputeRequest) -> Result<RawCapture, PipelineError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::time::sleep(self.delay).await;

        let mut stdout = b"Blender 4.2.0 (hash 000000000000)\nRead blend: \"GN_test.blend\"\n".to_vec();
        match request.mode {
            ComputeMode::Schema => stdout.extend_from_slice(SCHEMA_JSON.as_bytes()),
            ComputeMode::Mesh => {
                let snapshot = request.snapshot.unwrap_or_default();
                let flag = |name: &str| snapshot.get(name) == Some(&ParameterValue::Bool(true));
                if flag("missing") {
                    return Err(PipelineError::ProcessSpawn {
                        binary: PathBuf::from("/opt/blender/blender"),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    });
                }
                if flag("silent") {
                    return Ok(RawCapture {
                        stdout,
                        stderr: Vec::new(),
                        exit_code: Some(0),
                    });
                }
                if flag("fail") {
                    return Ok(RawCapture {
                        stdout,
                        stderr: b"boom".to_vec(),
                        exit_code: Some(1),
                    });
                }
                let a = snapshot.get("a").and_then(ParameterValue::as_f64).unwrap_or(0.0);
                stdout.extend_from_slice(&marker_mesh(a as f32).to_binary());
            }
        }
        stdout.extend_from_slice(b"\nBlender quit\n");

        Ok(RawCapture {
            stdout,
            stderr: Vec::new(),
            exit_code: Some(0),
        })
    }
}
