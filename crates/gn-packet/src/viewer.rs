//! Client-side mesh state
//!
//! Mirrors what the browser viewer does with each frame: decode the packet
//! into geometry buffers that are reused while the topology holds, refresh the
//! bounds, and frame the camera on the first mesh only. Parameter edits are
//! checked against the schema and leave as at most one `set` per window.

use crate::packet::{MeshPacketView, PacketError};
use crate::params::{ParameterMap, ParameterSnapshot, ParameterValue};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::schema::{ParameterIssue, SchemaDescription};
use nalgebra::{Point3, Vector3};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Camera distance from the bounding-sphere center, in radii, along (1, 1, 1).
pub const FRAME_DISTANCE: f32 = 2.5;

/// Minimum spacing between two `set` messages from one viewer.
pub const SEND_THROTTLE: Duration = Duration::from_millis(40);

/// A GPU-style vertex attribute. `version` moves on every write so a renderer
/// knows to re-upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute<T> {
    pub data: Vec<T>,
    pub item_size: usize,
    pub version: u64,
}

/// Writes `values` into `slot`, in place when the element count matches.
/// Returns `true` when a new buffer had to be allocated.
fn upload<T>(
    slot: &mut Option<Attribute<T>>,
    item_size: usize,
    values: impl ExactSizeIterator<Item = T>,
) -> bool {
    if let Some(attr) = slot.as_mut() {
        if attr.data.len() == values.len() {
            for (dst, v) in attr.data.iter_mut().zip(values) {
                *dst = v;
            }
            attr.version += 1;
            return false;
        }
    }

    let version = slot.as_ref().map_or(0, |a| a.version + 1);
    *slot = Some(Attribute {
        data: values.collect(),
        item_size,
        version,
    });
    true
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryBuffers {
    pub positions: Option<Attribute<f32>>,
    pub normals: Option<Attribute<f32>>,
    pub indices: Option<Attribute<u32>>,
}

/// Axis-aligned box plus the enclosing sphere centered on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
    pub center: Point3<f32>,
    pub radius: f32,
}

impl Bounds {
    /// `None` for an empty position buffer.
    pub fn from_positions(positions: &[f32]) -> Option<Self> {
        let mut points = positions
            .chunks_exact(3)
            .map(|p| Point3::new(p[0], p[1], p[2]));

        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| {
            (min.inf(&p), max.sup(&p))
        });
        let center = nalgebra::center(&min, &max);

        let radius_sq = positions
            .chunks_exact(3)
            .map(|p| (Point3::new(p[0], p[1], p[2]) - center).norm_squared())
            .fold(0.0f32, f32::max);

        Some(Self {
            min,
            max,
            center,
            radius: radius_sq.sqrt(),
        })
    }
}

/// Where to put the orbit target and the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrame {
    pub target: Point3<f32>,
    pub position: Point3<f32>,
}

impl CameraFrame {
    pub fn around(bounds: &Bounds) -> Self {
        let offset = Vector3::repeat(1.0) * (bounds.radius * FRAME_DISTANCE);
        Self {
            target: bounds.center,
            position: bounds.center + offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    pub vertex_count: u32,
    pub index_count: u32,
    /// positions, normals, indices
    pub reallocated: [bool; 3],
    pub bounds: Option<Bounds>,
    /// Set on the first successful update of the session only.
    pub camera: Option<CameraFrame>,
}

#[derive(Debug, Default)]
pub struct MeshUpdater {
    geometry: GeometryBuffers,
    bounds: Option<Bounds>,
    framed: bool,
}

impl MeshUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry(&self) -> &GeometryBuffers {
        &self.geometry
    }

    pub fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }

    pub fn is_framed(&self) -> bool {
        self.framed
    }

    /// Applies one binary frame. A packet that fails to decode changes nothing.
    pub fn apply(&mut self, bytes: &[u8]) -> Result<UpdateReport, PacketError> {
        let view = MeshPacketView::parse(bytes)?;

        let reallocated = [
            upload(&mut self.geometry.positions, 3, view.positions()),
            upload(&mut self.geometry.normals, 3, view.normals()),
            upload(&mut self.geometry.indices, 1, view.indices()),
        ];

        self.bounds = self
            .geometry
            .positions
            .as_ref()
            .and_then(|attr| Bounds::from_positions(&attr.data));

        let camera = match (&self.bounds, self.framed) {
            (Some(bounds), false) => {
                self.framed = true;
                let frame = CameraFrame::around(bounds);
                debug!("Auto-framing camera: center {:?}, radius {}", bounds.center, bounds.radius);
                Some(frame)
            }
            _ => None,
        };

        Ok(UpdateReport {
            vertex_count: view.vertex_count(),
            index_count: view.index_count(),
            reallocated,
            bounds: self.bounds,
            camera,
        })
    }
}

/// What a server frame meant to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// Schema arrived; `reply` asks for a first build with the current values.
    SchemaLoaded { reply: ClientMessage },
    MeshUpdated(UpdateReport),
    ServerError(String),
}

/// One viewer connection: schema, mesh buffers, edited values and a status line.
#[derive(Debug)]
pub struct ViewerSession {
    pub schema: Option<SchemaDescription>,
    pub mesh: MeshUpdater,
    pub status: String,
    /// Values the user changed; everything else stays at the schema default.
    values: ParameterMap,
    /// When the pending `set` may leave. `None` when nothing is pending.
    send_at: Option<Instant>,
}

impl Default for ViewerSession {
    fn default() -> Self {
        Self {
            schema: None,
            mesh: MeshUpdater::new(),
            status: "Connecting...".to_string(),
            values: ParameterMap::new(),
            send_at: None,
        }
    }
}

impl ViewerSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// First message to send once the channel is open.
    pub fn on_open(&mut self) -> ClientMessage {
        self.status = "Connected. Loading schema...".to_string();
        ClientMessage::Schema
    }

    pub fn on_text(&mut self, text: &str) -> Result<ViewerEvent, ProtocolError> {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Schema(schema)) => {
                self.status = "Schema loaded. Building mesh...".to_string();
                let edited = ParameterSnapshot::from(self.values.clone());
                for issue in schema.check_snapshot(&edited) {
                    warn!("Dropping edited value: {}", issue);
                    self.values.remove(issue.identifier());
                }
                self.schema = Some(schema);
                Ok(ViewerEvent::SchemaLoaded {
                    reply: ClientMessage::Set {
                        values: self.values.clone(),
                    },
                })
            }
            Ok(ServerMessage::Error { message }) => {
                warn!("Error from server: {}", message);
                self.status = format!("Error: {}", message);
                Ok(ViewerEvent::ServerError(message))
            }
            Err(e) => {
                self.status = format!("Parse error: {}", e);
                Err(e)
            }
        }
    }

    /// Records one control change and returns when the resulting `set` is due.
    ///
    /// The first edit after a send opens a window of [`SEND_THROTTLE`]; later
    /// edits inside it only update the values that window will carry.
    pub fn edit(
        &mut self,
        identifier: &str,
        value: ParameterValue,
        now: Instant,
    ) -> Result<Instant, ParameterIssue> {
        let descriptor = self
            .schema
            .as_ref()
            .and_then(|schema| schema.get(identifier))
            .ok_or_else(|| ParameterIssue::Unknown(identifier.to_string()))?;
        descriptor.check(&value)?;

        self.values.insert(identifier.to_string(), value);
        Ok(*self.send_at.get_or_insert(now + SEND_THROTTLE))
    }

    pub fn next_send(&self) -> Option<Instant> {
        self.send_at
    }

    /// The pending `set`, once its window has elapsed.
    pub fn poll_send(&mut self, now: Instant) -> Option<ClientMessage> {
        match self.send_at {
            Some(due) if due <= now => {
                self.send_at = None;
                Some(ClientMessage::Set {
                    values: self.values.clone(),
                })
            }
            _ => None,
        }
    }

    /// What the controls show: schema defaults overlaid with edits.
    pub fn current_values(&self) -> ParameterSnapshot {
        match &self.schema {
            Some(schema) => schema.defaults().merged(&self.values),
            None => ParameterSnapshot::from(self.values.clone()),
        }
    }

    pub fn on_binary(&mut self, bytes: &[u8]) -> Result<ViewerEvent, PacketError> {
        match self.mesh.apply(bytes) {
            Ok(report) => {
                self.status = format!(
                    "Mesh: {} verts, {} indices",
                    report.vertex_count, report.index_count
                );
                Ok(ViewerEvent::MeshUpdated(report))
            }
            Err(e) => {
                self.status = format!("Mesh parse error: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MeshPacket;
    use pretty_assertions::assert_eq;

    fn cube_corners(scale: f32) -> MeshPacket {
        let mut positions = Vec::new();
        for &x in &[-1.0, 1.0] {
            for &y in &[-1.0, 1.0] {
                for &z in &[-1.0, 1.0] {
                    positions.extend_from_slice(&[x * scale, y * scale, z * scale]);
                }
            }
        }
        let normals = positions.iter().map(|p| p.signum()).collect();
        MeshPacket::new(positions, normals, vec![0, 1, 3, 0, 3, 2])
    }

    #[test]
    fn test_same_counts_overwrite_in_place() {
        let mut updater = MeshUpdater::new();
        let first = updater.apply(&cube_corners(1.0).to_binary()).unwrap();
        assert_eq!(first.reallocated, [true, true, true]);

        let ptr = updater.geometry().positions.as_ref().unwrap().data.as_ptr();
        let second = updater.apply(&cube_corners(2.0).to_binary()).unwrap();
        assert_eq!(second.reallocated, [false, false, false]);

        let positions = updater.geometry().positions.as_ref().unwrap();
        assert_eq!(positions.data.as_ptr(), ptr);
        assert_eq!(positions.version, 1);
        assert_eq!(positions.data[0], -2.0);
    }

    #[test]
    fn test_topology_change_reallocates() {
        let mut updater = MeshUpdater::new();
        updater.apply(&cube_corners(1.0).to_binary()).unwrap();

        let mut mesh = cube_corners(1.0);
        mesh.indices.extend_from_slice(&[4, 5, 7]);
        let report = updater.apply(&mesh.to_binary()).unwrap();

        assert_eq!(report.reallocated, [false, false, true]);
        let indices = updater.geometry().indices.as_ref().unwrap();
        assert_eq!(indices.data.len(), 9);
        assert_eq!(indices.item_size, 1);
        assert_eq!(indices.version, 1);
    }

    #[test]
    fn test_bounds_and_first_frame_only() {
        let mut updater = MeshUpdater::new();
        let report = updater.apply(&cube_corners(1.0).to_binary()).unwrap();

        let bounds = report.bounds.unwrap();
        assert_eq!(bounds.min, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(bounds.max, Point3::new(1.0, 1.0, 1.0));
        assert_eq!(bounds.center, Point3::origin());
        assert!((bounds.radius - 3.0f32.sqrt()).abs() < 1e-6);

        let camera = report.camera.unwrap();
        assert_eq!(camera.target, Point3::origin());
        let expected = 3.0f32.sqrt() * FRAME_DISTANCE;
        assert!((camera.position.x - expected).abs() < 1e-5);
        assert!((camera.position.z - expected).abs() < 1e-5);

        let again = updater.apply(&cube_corners(4.0).to_binary()).unwrap();
        assert!(again.camera.is_none());
        assert!((again.bounds.unwrap().radius - 4.0 * 3.0f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_failed_decode_leaves_state_untouched() {
        let mut updater = MeshUpdater::new();
        assert!(updater.apply(b"HSEM").is_err());
        assert!(!updater.is_framed());
        assert!(updater.geometry().positions.is_none());

        updater.apply(&cube_corners(1.0).to_binary()).unwrap();
        let before = updater.geometry().clone();
        let mut bad = cube_corners(3.0).to_binary();
        bad[4] = 9;
        assert!(matches!(
            updater.apply(&bad),
            Err(PacketError::UnsupportedVersion { version: 9 })
        ));
        assert_eq!(updater.geometry(), &before);
    }

    #[test]
    fn test_empty_mesh_does_not_frame() {
        let mut updater = MeshUpdater::new();
        let report = updater.apply(&MeshPacket::default().to_binary()).unwrap();
        assert!(report.bounds.is_none());
        assert!(report.camera.is_none());
        assert!(!updater.is_framed());
    }

    #[test]
    fn test_session_flow() {
        let mut session = ViewerSession::new();
        assert_eq!(session.on_open(), ClientMessage::Schema);

        let event = session
            .on_text(r#"{"type":"schema","params":[{"identifier":"Socket_2","name":"Socket_2","type":"float"}]}"#)
            .unwrap();
        assert_eq!(
            event,
            ViewerEvent::SchemaLoaded {
                reply: ClientMessage::Set { values: Default::default() }
            }
        );
        assert_eq!(session.schema.as_ref().unwrap().params.len(), 1);

        let event = session.on_binary(&cube_corners(1.0).to_binary()).unwrap();
        assert!(matches!(event, ViewerEvent::MeshUpdated(ref r) if r.camera.is_some()));
        assert_eq!(session.status, "Mesh: 8 verts, 6 indices");

        let event = session.on_text(r#"{"type":"error","message":"Blender exited with code 1"}"#).unwrap();
        assert_eq!(event, ViewerEvent::ServerError("Blender exited with code 1".into()));
        assert_eq!(session.status, "Error: Blender exited with code 1");

        assert!(session.on_binary(b"garbage").is_err());
        assert!(session.status.starts_with("Mesh parse error"));
    }

    const TOWER_SCHEMA: &str = r#"{"type":"schema","params":[
        {"identifier":"Socket_2","name":"Floors","type":"int","min":1,"max":40},
        {"identifier":"Socket_3","name":"Height","type":"float","min":0,"max":10,"default":2.5}
    ]}"#;

    fn loaded() -> ViewerSession {
        let mut session = ViewerSession::new();
        session.on_text(TOWER_SCHEMA).unwrap();
        session
    }

    fn set_of(pairs: &[(&str, ParameterValue)]) -> ClientMessage {
        ClientMessage::Set {
            values: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn test_edit_burst_sends_once_with_latest_values() {
        let mut session = loaded();
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);

        assert_eq!(session.edit("Socket_2", 3i64.into(), t0), Ok(ms(40)));
        assert_eq!(session.edit("Socket_2", 7i64.into(), ms(10)), Ok(ms(40)));
        let height = ParameterValue::float(4.0).unwrap();
        assert_eq!(session.edit("Socket_3", height.clone(), ms(30)), Ok(ms(40)));
        assert_eq!(session.next_send(), Some(ms(40)));

        assert_eq!(session.poll_send(ms(39)), None);
        assert_eq!(
            session.poll_send(ms(40)),
            Some(set_of(&[
                ("Socket_2", 7i64.into()),
                ("Socket_3", height.clone()),
            ]))
        );
        assert_eq!(session.poll_send(ms(80)), None);
        assert_eq!(session.next_send(), None);

        // A later edit opens a fresh window from its own time.
        assert_eq!(session.edit("Socket_2", 9i64.into(), ms(100)), Ok(ms(140)));
        assert_eq!(
            session.poll_send(ms(150)),
            Some(set_of(&[
                ("Socket_2", 9i64.into()),
                ("Socket_3", height.clone()),
            ]))
        );
    }

    #[test]
    fn test_rejected_edit_schedules_nothing() {
        let t0 = Instant::now();

        let mut early = ViewerSession::new();
        assert_eq!(
            early.edit("Socket_2", 3i64.into(), t0),
            Err(ParameterIssue::Unknown("Socket_2".into()))
        );

        let mut session = loaded();
        assert!(matches!(
            session.edit("Socket_2", 41i64.into(), t0),
            Err(ParameterIssue::OutOfRange { max, .. }) if max == 40.0
        ));
        assert!(matches!(
            session.edit("Socket_2", true.into(), t0),
            Err(ParameterIssue::WrongType { expected: "an integer", .. })
        ));
        assert_eq!(
            session.edit("Socket_9", 1i64.into(), t0),
            Err(ParameterIssue::Unknown("Socket_9".into()))
        );
        assert_eq!(session.next_send(), None);
        assert_eq!(session.poll_send(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_current_values_overlay_defaults() {
        let mut session = loaded();
        let defaults = session.current_values();
        assert_eq!(defaults.get("Socket_2").and_then(|v| v.as_f64()), Some(1.0));
        assert_eq!(defaults.get("Socket_3").and_then(|v| v.as_f64()), Some(2.5));

        session.edit("Socket_2", 12i64.into(), Instant::now()).unwrap();
        let current = session.current_values();
        assert_eq!(current.get("Socket_2"), Some(&ParameterValue::from(12i64)));
        assert_eq!(current.get("Socket_3").and_then(|v| v.as_f64()), Some(2.5));
    }

    #[test]
    fn test_schema_reload_drops_stale_edits() {
        let mut session = loaded();
        let t0 = Instant::now();
        session.edit("Socket_2", 30i64.into(), t0).unwrap();
        session.edit("Socket_3", ParameterValue::float(6.0).unwrap(), t0).unwrap();

        let event = session
            .on_text(r#"{"type":"schema","params":[{"identifier":"Socket_2","name":"Floors","type":"int","min":1,"max":20}]}"#)
            .unwrap();
        assert_eq!(event, ViewerEvent::SchemaLoaded { reply: set_of(&[]) });
        assert!(session.current_values().get("Socket_3").is_none());
        assert_eq!(session.current_values().get("Socket_2").and_then(|v| v.as_f64()), Some(1.0));
    }
}
