//! Engine invocation: one process per request, output captured to completion

use crate::error::PipelineError;
use gn_packet::{demux, ComputeMode, Demuxed, ParameterSnapshot, RawCapture};
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Where the engine, the scene and the evaluation script live.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub asset: PathBuf,
    pub script: PathBuf,
    /// Object carrying the Geometry Nodes modifier; the script picks one when unset.
    pub target_object: Option<String>,
}

impl EngineConfig {
    /// Command line for one run. Everything after `--` is read by the script.
    pub fn args(&self, request: &ComputeRequest) -> Result<Vec<OsString>, PipelineError> {
        let mut args: Vec<OsString> = vec![
            "--background".into(),
            "--factory-startup".into(),
            "--log-level".into(),
            "0".into(),
            self.asset.clone().into(),
            "--python".into(),
            self.script.clone().into(),
            "--".into(),
            format!("--mode={}", request.mode).into(),
        ];
        if let Some(object) = &self.target_object {
            args.push(format!("--object={}", object).into());
        }
        if let Some(snapshot) = &request.snapshot {
            args.push(format!("--values={}", snapshot.to_json()?).into());
        }
        Ok(args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeRequest {
    pub mode: ComputeMode,
    /// Present for mesh requests only.
    pub snapshot: Option<ParameterSnapshot>,
}

impl ComputeRequest {
    pub fn schema() -> Self {
        Self {
            mode: ComputeMode::Schema,
            snapshot: None,
        }
    }

    pub fn mesh(snapshot: ParameterSnapshot) -> Self {
        Self {
            mode: ComputeMode::Mesh,
            snapshot: Some(snapshot),
        }
    }
}

/// Runs the engine once and hands back everything it wrote.
///
/// Only a failure to start is an error here; exit status is left to the caller.
pub trait Compute: Send + Sync + 'static {
    fn invoke(
        &self,
        request: ComputeRequest,
    ) -> impl Future<Output = Result<RawCapture, PipelineError>> + Send;
}

/// Spawns a fresh engine process per request. No pooling, no timeout.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    config: EngineConfig,
}

impl ProcessInvoker {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Compute for ProcessInvoker {
    async fn invoke(&self, request: ComputeRequest) -> Result<RawCapture, PipelineError> {
        let args = self.config.args(&request)?;
        info!("Spawning {:?} with mode={}", self.config.binary, request.mode);

        let child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::ProcessSpawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        let output = child.wait_with_output().await.map_err(PipelineError::Capture)?;
        let capture = RawCapture {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        };

        info!(
            "Engine finished ({}): {} bytes stdout, {} bytes stderr",
            output.status,
            capture.stdout.len(),
            capture.stderr.len()
        );
        for line in String::from_utf8_lossy(&capture.stderr).lines() {
            if !line.trim().is_empty() {
                debug!(target: "engine", "{}", line);
            }
        }

        Ok(capture)
    }
}

/// Invoke, check the exit status, then demultiplex.
pub async fn run_pipeline<C: Compute>(
    compute: &C,
    request: ComputeRequest,
) -> Result<Demuxed, PipelineError> {
    let mode = request.mode;
    let capture = compute.invoke(request).await?;

    if !capture.success() {
        let stderr = capture.stderr_text();
        error!("Engine exited with {:?}\n{}", capture.exit_code, stderr);
        return Err(PipelineError::ComputeFailed {
            code: capture.exit_code,
            stderr,
        });
    }

    demux(mode, capture).map_err(|e| {
        error!("{}", e);
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gn_packet::ParameterMap;
    use pretty_assertions::assert_eq;

    fn config(binary: PathBuf) -> EngineConfig {
        EngineConfig {
            binary,
            asset: PathBuf::from("scenes/tower.blend"),
            script: PathBuf::from("blender/gn_worker.py"),
            target_object: None,
        }
    }

    fn snapshot(json: &str) -> ParameterSnapshot {
        let values: ParameterMap = serde_json::from_str(json).unwrap();
        ParameterSnapshot::from(values)
    }

    #[test]
    fn test_schema_args() {
        let args = config(PathBuf::from("blender")).args(&ComputeRequest::schema()).unwrap();
        let expected: Vec<OsString> = [
            "--background",
            "--factory-startup",
            "--log-level",
            "0",
            "scenes/tower.blend",
            "--python",
            "blender/gn_worker.py",
            "--",
            "--mode=schema",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn test_mesh_args_carry_object_and_values() {
        let mut config = config(PathBuf::from("blender"));
        config.target_object = Some("Tower".into());

        let args = config
            .args(&ComputeRequest::mesh(snapshot(r#"{"Socket_3": 4, "Socket_2": 0.5}"#)))
            .unwrap();
        let tail: Vec<_> = args[8..].iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            tail,
            vec![
                "--mode=mesh".to_string(),
                "--object=Tower".to_string(),
                r#"--values={"Socket_2":0.5,"Socket_3":4}"#.to_string(),
            ]
        );

        let empty = config.args(&ComputeRequest::mesh(ParameterSnapshot::new())).unwrap();
        assert_eq!(empty.last().unwrap(), "--values={}");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let invoker = ProcessInvoker::new(config(PathBuf::from("/nonexistent/gn-engine")));
        let err = invoker.invoke(ComputeRequest::schema()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ProcessSpawn { .. }));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Writes an executable shell script standing in for the engine.
        fn fake_engine(body: &str) -> (TempDir, PathBuf) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engine.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            (dir, path)
        }

        #[tokio::test]
        async fn test_capture_and_exit_code() {
            let (_dir, path) = fake_engine("echo out; echo err >&2; exit 3");
            let capture = ProcessInvoker::new(config(path))
                .invoke(ComputeRequest::schema())
                .await
                .unwrap();
            assert_eq!(capture.stdout, b"out\n");
            assert_eq!(capture.stderr, b"err\n");
            assert_eq!(capture.exit_code, Some(3));
            assert!(!capture.success());
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_compute_failed() {
            let (_dir, path) = fake_engine(r#"printf '%s\n' "$@" >&2; exit 1"#);
            let invoker = ProcessInvoker::new(config(path));
            let err = run_pipeline(&invoker, ComputeRequest::mesh(snapshot(r#"{"a": 1}"#)))
                .await
                .unwrap_err();
            match err {
                PipelineError::ComputeFailed { code, stderr } => {
                    assert_eq!(code, Some(1));
                    assert!(stderr.contains("--mode=mesh"));
                    assert!(stderr.contains(r#"--values={"a":1}"#));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_schema_extracted_from_noisy_stdout() {
            let (_dir, path) = fake_engine(
                r#"echo 'Blender 4.2.0'; printf '{"type": "schema", "params": []}'; echo; echo 'Blender quit'"#,
            );
            let result = run_pipeline(&ProcessInvoker::new(config(path)), ComputeRequest::schema())
                .await
                .unwrap();
            assert_eq!(result, Demuxed::Schema(r#"{"type": "schema", "params": []}"#.into()));
        }

        #[tokio::test]
        async fn test_mesh_extracted_from_noisy_stdout() {
            // empty mesh: magic, version 1, zero counts
            let (_dir, path) = fake_engine(
                r#"echo 'Read blend'; printf 'HSEM\001\000\000\000\000\000\000\000\000\000\000\000'"#,
            );
            let result = run_pipeline(
                &ProcessInvoker::new(config(path)),
                ComputeRequest::mesh(ParameterSnapshot::new()),
            )
            .await
            .unwrap();
            let Demuxed::Mesh(bytes) = result else {
                panic!("Expected mesh");
            };
            assert_eq!(bytes.len(), 16);
            assert_eq!(gn_packet::MeshPacket::decode(&bytes).unwrap().vertex_count(), 0);
        }

        #[tokio::test]
        async fn test_clean_exit_without_payload_is_demux_miss() {
            let (_dir, path) = fake_engine("echo 'Error: nothing to evaluate'");
            let err = run_pipeline(
                &ProcessInvoker::new(config(path)),
                ComputeRequest::mesh(ParameterSnapshot::new()),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, PipelineError::Demux(_)));
        }
    }
}
