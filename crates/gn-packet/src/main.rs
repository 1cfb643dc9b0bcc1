//! gn-capture: inspect a captured engine run offline

use anyhow::{Context, Result};
use clap::Parser;
use gn_packet::{inspect_capture, stl, CaptureReport, ComputeMode};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gn-capture")]
#[command(about = "Extract and summarize the payload of a captured Geometry Nodes engine run")]
#[command(version)]
struct Args {
    /// Raw stdout dump of the engine (or a bare mesh packet)
    #[arg(short, long)]
    input: PathBuf,

    /// Payload to look for (schema, mesh)
    #[arg(long, default_value = "mesh")]
    mode: ComputeMode,

    /// Check that every index addresses an existing vertex
    #[arg(long)]
    validate: bool,

    /// Write the mesh as binary STL
    #[arg(long)]
    stl: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let stdout = fs::read(&args.input)
        .with_context(|| format!("Failed to read capture: {:?}", args.input))?;

    match inspect_capture(&stdout, args.mode)? {
        CaptureReport::Mesh {
            noise_bytes,
            packet,
            bounds,
        } => {
            println!("skipped {} bytes of log output", noise_bytes);
            println!(
                "mesh: {} vertices, {} indices ({} triangles)",
                packet.vertex_count(),
                packet.index_count(),
                packet.triangle_count()
            );
            if let Some(b) = bounds {
                println!(
                    "bounds: min ({:.4}, {:.4}, {:.4}) max ({:.4}, {:.4}, {:.4}) radius {:.4}",
                    b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z, b.radius
                );
            }
            if args.validate {
                packet.validate().context("Mesh failed validation")?;
                println!("indices: ok");
            }
            if let Some(path) = &args.stl {
                stl::write_stl_file(&packet, path)
                    .with_context(|| format!("Failed to write STL: {:?}", path))?;
                eprintln!("Wrote STL: {:?}", path);
            }
        }
        CaptureReport::Schema {
            noise_bytes,
            schema,
        } => {
            println!("skipped {} bytes of log output", noise_bytes);
            if let (Some(object), Some(modifier)) = (&schema.object, &schema.modifier) {
                println!("object {:?}, modifier {:?}", object, modifier);
            }
            for param in &schema.params {
                let (lo, hi) = param.control_range();
                println!(
                    "  {:<24} {:<12} {:?} [{}, {}]",
                    param.key(),
                    param.label(),
                    param.kind,
                    lo,
                    hi
                );
            }
        }
    }

    Ok(())
}
