//! Command line and environment configuration

use crate::invoker::EngineConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "gn-server")]
#[command(about = "Stream Geometry Nodes rebuilds to browser clients over WebSocket")]
#[command(version)]
pub struct Cli {
    /// Listening port
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Engine executable
    #[arg(long, env = "BLENDER_BIN", default_value = "blender")]
    pub engine_bin: PathBuf,

    /// Scene file opened by every run
    #[arg(long, env = "BLEND_FILE", default_value = "GN_test.blend")]
    pub asset: PathBuf,

    /// Evaluation script passed to the engine
    #[arg(long, env = "BLENDER_SCRIPT", default_value = "blender/gn_worker.py")]
    pub script: PathBuf,

    /// Object carrying the Geometry Nodes modifier (empty: let the script pick)
    #[arg(long, env = "TARGET_OBJECT", default_value = "")]
    pub target_object: String,

    /// Serve the viewer from this directory
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Quiet period before the first build of a burst, in milliseconds
    #[arg(long, env = "DEBOUNCE_MS", default_value = "25")]
    pub debounce_ms: u64,

    /// Rebuild live sessions when the scene or script changes on disk
    #[arg(long, env = "WATCH_ASSET")]
    pub watch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub debounce: Duration,
    pub watch: bool,
}

impl Cli {
    pub fn into_parts(self) -> (EngineConfig, ServerConfig) {
        let target_object = Some(self.target_object.trim().to_string()).filter(|s| !s.is_empty());
        let engine = EngineConfig {
            binary: self.engine_bin,
            asset: self.asset,
            script: self.script,
            target_object,
        };
        let server = ServerConfig {
            port: self.port,
            static_dir: self.static_dir,
            debounce: Duration::from_millis(self.debounce_ms),
            watch: self.watch,
        };
        (engine, server)
    }
}
