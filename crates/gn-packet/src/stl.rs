//! Binary STL export of a decoded mesh packet

use crate::packet::MeshPacket;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

const HEADER: &str = "gn-stream STL export";

fn vertex(mesh: &MeshPacket, index: u32) -> Vector3<f32> {
    let i = index as usize * 3;
    Vector3::new(mesh.positions[i], mesh.positions[i + 1], mesh.positions[i + 2])
}

/// Writes `mesh` as binary STL and returns the triangle count.
///
/// Face normals come from the winding (right-hand rule), not from the
/// packet's vertex normals.
pub fn write_stl<W: Write>(mesh: &MeshPacket, writer: W) -> io::Result<u32> {
    mesh.validate()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut writer = BufWriter::new(writer);

    let header = format!("{:<80}", HEADER);
    writer.write_all(&header.as_bytes()[..80])?;

    let num_triangles = mesh.triangle_count() as u32;
    writer.write_all(&num_triangles.to_le_bytes())?;

    for tri in mesh.indices.chunks_exact(3) {
        let v0 = vertex(mesh, tri[0]);
        let v1 = vertex(mesh, tri[1]);
        let v2 = vertex(mesh, tri[2]);

        let normal = (v1 - v0)
            .cross(&(v2 - v0))
            .try_normalize(1e-10)
            .unwrap_or_else(Vector3::z);

        for v in [normal, v0, v1, v2] {
            for coord in v.iter() {
                writer.write_all(&coord.to_le_bytes())?;
            }
        }

        // Attribute byte count (unused)
        writer.write_all(&0u16.to_le_bytes())?;
    }

    writer.flush()?;
    Ok(num_triangles)
}

pub fn write_stl_file(mesh: &MeshPacket, path: &Path) -> io::Result<u32> {
    let num_triangles = write_stl(mesh, File::create(path)?)?;
    info!("Exported STL: {} triangles to {:?}", num_triangles, path);
    Ok(num_triangles)
}
