//! Binary mesh packet
//!
//! Little-endian throughout, a fixed 16-byte header then the payload:
//!
//! | offset            | field        | type            |
//! |-------------------|--------------|-----------------|
//! | 0                 | magic `MESH` | u32             |
//! | 4                 | version      | u32             |
//! | 8                 | vertex count | u32             |
//! | 12                | index count  | u32             |
//! | 16                | positions    | V x 3 f32       |
//! | 16 + 12V          | normals      | V x 3 f32       |
//! | 16 + 24V          | indices      | I u32           |
//!
//! The engine authors this format; the server and the viewer only read it.
//! [`MeshPacket::to_binary`] exists for tests and tooling.

use thiserror::Error;

/// `MESH` read as a little-endian u32.
pub const MESH_MAGIC: u32 = 0x4D45_5348;
pub const MESH_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("malformed packet: {len} bytes is shorter than the 16-byte header")]
    TooShort { len: usize },
    #[error("malformed packet: bad magic 0x{found:08X}")]
    BadMagic { found: u32 },
    #[error("malformed packet: unsupported version {version}")]
    UnsupportedVersion { version: u32 },
    #[error("malformed packet: payload needs {needed} bytes but only {available} are present")]
    Truncated { needed: usize, available: usize },
    #[error("invalid mesh: {array} holds {len} values, expected {expected}")]
    LengthMismatch {
        array: &'static str,
        len: usize,
        expected: usize,
    },
    #[error("invalid mesh: index {index} at position {position} is out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        position: usize,
        index: u32,
        vertex_count: u32,
    },
}

fn le_u32(chunk: &[u8]) -> u32 {
    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
}

fn le_f32(chunk: &[u8]) -> f32 {
    f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
}

/// Validated packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub vertex_count: u32,
    pub index_count: u32,
}

impl PacketHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketError::TooShort { len: bytes.len() });
        }
        let magic = le_u32(&bytes[0..4]);
        if magic != MESH_MAGIC {
            return Err(PacketError::BadMagic { found: magic });
        }
        let version = le_u32(&bytes[4..8]);
        if version != MESH_VERSION {
            return Err(PacketError::UnsupportedVersion { version });
        }
        Ok(Self {
            vertex_count: le_u32(&bytes[8..12]),
            index_count: le_u32(&bytes[12..16]),
        })
    }

    /// Total packet length implied by the counts, `None` if it overflows `usize`.
    pub fn packet_len(&self) -> Option<usize> {
        let float_bytes = (self.vertex_count as usize).checked_mul(12)?;
        let index_bytes = (self.index_count as usize).checked_mul(4)?;
        HEADER_LEN
            .checked_add(float_bytes)?
            .checked_add(float_bytes)?
            .checked_add(index_bytes)
    }
}

/// Borrowed view over a packet's three payload regions.
///
/// Parsing copies nothing; the accessors decode values lazily so a consumer
/// can write them straight into buffers it already owns.
#[derive(Debug, Clone, Copy)]
pub struct MeshPacketView<'a> {
    pub header: PacketHeader,
    positions: &'a [u8],
    normals: &'a [u8],
    indices: &'a [u8],
}

impl<'a> MeshPacketView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::parse(bytes)?;
        let needed = header.packet_len().unwrap_or(usize::MAX);
        if bytes.len() < needed {
            return Err(PacketError::Truncated {
                needed,
                available: bytes.len(),
            });
        }

        let float_bytes = header.vertex_count as usize * 12;
        let normals_at = HEADER_LEN + float_bytes;
        let indices_at = normals_at + float_bytes;

        // Anything past the index region is ignored.
        Ok(Self {
            header,
            positions: &bytes[HEADER_LEN..normals_at],
            normals: &bytes[normals_at..indices_at],
            indices: &bytes[indices_at..needed],
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.header.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.header.index_count
    }

    pub fn positions(&self) -> impl ExactSizeIterator<Item = f32> + 'a {
        self.positions.chunks_exact(4).map(le_f32)
    }

    pub fn normals(&self) -> impl ExactSizeIterator<Item = f32> + 'a {
        self.normals.chunks_exact(4).map(le_f32)
    }

    pub fn indices(&self) -> impl ExactSizeIterator<Item = u32> + 'a {
        self.indices.chunks_exact(4).map(le_u32)
    }

    pub fn to_packet(&self) -> MeshPacket {
        MeshPacket {
            positions: self.positions().collect(),
            normals: self.normals().collect(),
            indices: self.indices().collect(),
        }
    }
}

/// Owned mesh: flat xyz positions and normals plus triangle indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPacket {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshPacket {
    pub fn new(positions: Vec<f32>, normals: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            normals,
            indices,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        Ok(MeshPacketView::parse(bytes)?.to_packet())
    }

    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Structural checks that plain decoding does not enforce.
    pub fn validate(&self) -> Result<(), PacketError> {
        let vertex_count = self.vertex_count();
        let expected = vertex_count as usize * 3;
        if self.positions.len() != expected {
            return Err(PacketError::LengthMismatch {
                array: "positions",
                len: self.positions.len(),
                expected,
            });
        }
        if self.normals.len() != expected {
            return Err(PacketError::LengthMismatch {
                array: "normals",
                len: self.normals.len(),
                expected,
            });
        }
        if let Some((position, &index)) = self
            .indices
            .iter()
            .enumerate()
            .find(|&(_, &i)| i >= vertex_count)
        {
            return Err(PacketError::IndexOutOfRange {
                position,
                index,
                vertex_count,
            });
        }
        Ok(())
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let num_vertices = self.vertex_count();
        let num_indices = self.index_count();

        let mut data = Vec::with_capacity(
            HEADER_LEN + (self.positions.len() + self.normals.len() + self.indices.len()) * 4,
        );
        data.extend_from_slice(&MESH_MAGIC.to_le_bytes());
        data.extend_from_slice(&MESH_VERSION.to_le_bytes());
        data.extend_from_slice(&num_vertices.to_le_bytes());
        data.extend_from_slice(&num_indices.to_le_bytes());

        for &p in &self.positions {
            data.extend_from_slice(&p.to_le_bytes());
        }
        for &n in &self.normals {
            data.extend_from_slice(&n.to_le_bytes());
        }
        for &i in &self.indices {
            data.extend_from_slice(&i.to_le_bytes());
        }

        data
    }
}
