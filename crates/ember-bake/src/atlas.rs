use std::sync::Arc;

use ember_core::Mesh;
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::scene::BakeScene;
use crate::{BakeError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AtlasSettings {
    /// Atlas edge length in texels (the atlas is square).
    pub size: u32,
    /// Texel edge reserved for a face at full physical size.
    pub nominal_cell: u32,
    /// Texels between cells. The 1-texel bleed border on each face's leading
    /// edges lives inside this margin, so it must be at least 2.
    pub margin: u32,
    /// World-space edge length that maps to a full cell. Larger faces are
    /// capped at the nominal cell, never scaled up.
    pub max_physical_size: f32,
    /// Hard cap on atlas map items.
    pub max_items: usize,
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self {
            size: 1024,
            nominal_cell: 16,
            margin: 2,
            max_physical_size: 5.0,
            max_items: 2048,
        }
    }
}

/// Placement of one face in the atlas, in texels. The texel at
/// `(left - 1, top - 1)` and the bordering row/column are reserved for seam
/// replication and never overlap another face's reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasRect {
    pub left: u32,
    pub top: u32,
    pub size_u: u32,
    pub size_v: u32,
}

impl AtlasRect {
    pub fn texel_count(&self) -> u32 {
        self.size_u * self.size_v
    }
}

/// One bakeable face: a quad-pair or a lone triangle, reduced to the three
/// corners that define its bilinear parallelogram map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub origin: u32,
    pub u_corner: u32,
    pub v_corner: u32,
    /// Fourth corner for quad-pairs; `None` for lone triangles.
    pub far: Option<u32>,
}

/// Precomputed per-face frame. Corner positions are re-read from the mesh at
/// sample time; normals are frozen here at registration.
#[derive(Debug, Clone, Copy)]
pub struct FaceBasis {
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
    /// Normals at origin, u-corner and v-corner.
    pub corner_normals: [Vec3; 3],
}

impl FaceBasis {
    /// Returns `None` for degenerate (zero-area) faces.
    fn compute(mesh: &Mesh, face: &Face) -> Option<Self> {
        let v = &mesh.vertices;
        let o = v.get(face.origin as usize)?;
        let u = v.get(face.u_corner as usize)?;
        let w = v.get(face.v_corner as usize)?;
        let edge_u = u.position - o.position;
        let edge_v = w.position - o.position;
        let normal = edge_u.cross(edge_v).try_normalize()?;
        let tangent = edge_u.try_normalize()?;
        let bitangent = normal.cross(tangent);
        Some(Self {
            normal,
            tangent,
            bitangent,
            corner_normals: [o.normal, u.normal, w.normal],
        })
    }
}

/// A point on a registered surface, in mesh-local space, with the frame the
/// hemicube is oriented by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
}

impl SurfacePoint {
    /// Rotates the tangent frame around the normal. The scheduler draws the
    /// angle per texel visit to spread hemicube discretization error across
    /// bounce passes instead of locking in one bias.
    pub fn rotate_in_plane(&mut self, angle: f32) {
        let (s, c) = angle.sin_cos();
        let u = self.u_axis * c + self.v_axis * s;
        self.u_axis = u.normalize();
        self.v_axis = self.normal.cross(self.u_axis);
    }
}

pub struct AtlasMapItem {
    pub mesh: Arc<Mesh>,
    pub mesh_index: usize,
    pub world: Mat4,
    pub face: Face,
    pub basis: FaceBasis,
    pub rect: AtlasRect,
    /// Texels of this face baked so far in the current pass, row-major.
    pub fill: u32,
}

impl AtlasMapItem {
    /// Bilinear parallelogram map: `(0, 0)` is the origin corner,
    /// `(1, 1)` is `origin + u_edge + v_edge`. Corner positions are read
    /// from the mesh buffer here so a geometry invariant broken after
    /// registration surfaces as an error instead of stale data.
    pub fn surface_point(&self, pu: f32, pv: f32) -> Result<SurfacePoint> {
        if self.mesh.indices.is_empty() {
            return Err(BakeError::Geometry(
                "mesh index buffer missing at sample time".into(),
            ));
        }
        let fetch = |i: u32| {
            self.mesh.vertices.get(i as usize).ok_or_else(|| {
                BakeError::Geometry(format!("vertex index {i} out of range at sample time"))
            })
        };
        let o = fetch(self.face.origin)?.position;
        let u = fetch(self.face.u_corner)?.position;
        let w = fetch(self.face.v_corner)?.position;
        let position = o + (u - o) * pu + (w - o) * pv;

        let [n0, nu, nv] = self.basis.corner_normals;
        let normal = (n0 + (nu - n0) * pu + (nv - n0) * pv)
            .try_normalize()
            .unwrap_or(self.basis.normal);
        let u_axis = (self.basis.tangent - normal * normal.dot(self.basis.tangent))
            .try_normalize()
            .unwrap_or(self.basis.tangent);
        let v_axis = normal.cross(u_axis);
        Ok(SurfacePoint {
            position,
            normal,
            u_axis,
            v_axis,
        })
    }

    /// Surface point at a texel of this face's rect, biased to the texel
    /// center so samples never land on a cell boundary.
    pub fn map_texel_to_surface(&self, tx: u32, ty: u32) -> Result<SurfacePoint> {
        debug_assert!(tx < self.rect.size_u && ty < self.rect.size_v);
        let pu = (tx as f32 + 0.5) / self.rect.size_u as f32;
        let pv = (ty as f32 + 0.5) / self.rect.size_v as f32;
        self.surface_point(pu, pv)
    }
}

/// Ordered, immutable-once-built mapping of every registered face to its
/// atlas reservation. Only the per-item fill counters move after build.
pub struct AtlasMap {
    items: Vec<AtlasMapItem>,
    size: u32,
}

impl AtlasMap {
    pub fn items(&self) -> &[AtlasMapItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> &AtlasMapItem {
        &self.items[index]
    }

    pub(crate) fn item_mut(&mut self, index: usize) -> &mut AtlasMapItem {
        &mut self.items[index]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Texels in one full pass over the map.
    pub fn total_texels(&self) -> u64 {
        self.items.iter().map(|i| i.rect.texel_count() as u64).sum()
    }
}

pub struct AtlasMapper {
    settings: AtlasSettings,
}

impl AtlasMapper {
    pub fn new(settings: AtlasSettings) -> Result<Self> {
        if settings.nominal_cell == 0 {
            return Err(BakeError::Configuration("nominal_cell must be > 0".into()));
        }
        if settings.margin < 2 {
            return Err(BakeError::Configuration(
                "margin must be >= 2 to hold the seam bleed border".into(),
            ));
        }
        if settings.nominal_cell + settings.margin > settings.size {
            return Err(BakeError::Configuration(format!(
                "atlas size {} cannot hold a single {}-texel cell",
                settings.size, settings.nominal_cell
            )));
        }
        if !(settings.max_physical_size > 0.0) {
            return Err(BakeError::Configuration(
                "max_physical_size must be positive".into(),
            ));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &AtlasSettings {
        &self.settings
    }

    /// Reserves the rect for the face at `face_index`. Pure: the same index
    /// and edge lengths always produce the same rect. Cell size scales down
    /// with physical edge length; faces larger than `max_physical_size` are
    /// capped at the nominal cell.
    pub fn allocate(&self, face_index: usize, edge_u: f32, edge_v: f32) -> Result<AtlasRect> {
        let s = &self.settings;
        let slot = s.nominal_cell + s.margin;
        let columns = (s.size / slot) as usize;
        let rows = (s.size / slot) as usize;
        let capacity = (columns * rows).min(s.max_items);
        if face_index >= capacity {
            return Err(BakeError::AtlasOverflow {
                faces: face_index + 1,
                capacity,
            });
        }
        let col = (face_index % columns) as u32;
        let row = (face_index / columns) as u32;

        let cap = s.max_physical_size;
        let scale_u = edge_u.min(cap) / cap;
        let scale_v = edge_v.min(cap) / cap;
        let size_u = ((s.nominal_cell as f32 * scale_u).ceil() as u32).clamp(1, s.nominal_cell);
        let size_v = ((s.nominal_cell as f32 * scale_v).ceil() as u32).clamp(1, s.nominal_cell);

        Ok(AtlasRect {
            left: col * slot + s.margin,
            top: row * slot + s.margin,
            size_u,
            size_v,
        })
    }

    /// Builds the atlas map over every face of every registered mesh, in
    /// registration order, and writes each face's atlas UVs into the mesh's
    /// lightmap channel. Must run once, after registration is complete.
    pub fn build(&self, scene: &mut BakeScene) -> Result<AtlasMap> {
        let mut items = Vec::new();
        let mut face_index = 0usize;

        for (mesh_index, reg) in scene.meshes_mut().iter_mut().enumerate() {
            let world = reg.transform.to_matrix();
            let faces = extract_faces(&reg.mesh)?;
            let transform = reg.transform;
            let mesh = Arc::make_mut(&mut reg.mesh);

            let mut placed = Vec::with_capacity(faces.len());
            for face in faces {
                let Some(basis) = FaceBasis::compute(mesh, &face) else {
                    log::warn!(
                        "skipping degenerate face (origin vertex {}) of mesh {mesh_index}",
                        face.origin
                    );
                    continue;
                };
                let o = mesh.vertices[face.origin as usize].position;
                let u = mesh.vertices[face.u_corner as usize].position;
                let w = mesh.vertices[face.v_corner as usize].position;
                let edge_u = transform.transform_vector(u - o).length();
                let edge_v = transform.transform_vector(w - o).length();
                let rect = self.allocate(face_index, edge_u, edge_v)?;
                assign_lightmap_uvs(mesh, &face, &rect, self.settings.size);
                placed.push((face, basis, rect));
                face_index += 1;
            }

            for (face, basis, rect) in placed {
                items.push(AtlasMapItem {
                    mesh: reg.mesh.clone(),
                    mesh_index,
                    world,
                    face,
                    basis,
                    rect,
                    fill: 0,
                });
            }
        }

        log::debug!(
            "atlas map built: {} items, {} texels per pass",
            items.len(),
            items.iter().map(|i| i.rect.texel_count() as u64).sum::<u64>()
        );
        Ok(AtlasMap {
            items,
            size: self.settings.size,
        })
    }
}

/// Splits the index buffer into faces. Consecutive triangles sharing exactly
/// two vertices merge into one quad face; anything else maps as a lone
/// triangle. Triangles sharing positions under distinct indices stay lone.
pub fn extract_faces(mesh: &Mesh) -> Result<Vec<Face>> {
    if mesh.indices.is_empty() {
        return Err(BakeError::Geometry(
            "mesh index buffer missing; registration should have rejected this".into(),
        ));
    }
    let tris: Vec<[u32; 3]> = mesh
        .indices
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();

    let mut faces = Vec::new();
    let mut i = 0;
    while i < tris.len() {
        if i + 1 < tris.len() {
            if let Some(face) = pair_quad(tris[i], tris[i + 1]) {
                faces.push(face);
                i += 2;
                continue;
            }
        }
        let [a, b, c] = tris[i];
        faces.push(Face {
            origin: a,
            u_corner: b,
            v_corner: c,
            far: None,
        });
        i += 1;
    }
    Ok(faces)
}

fn pair_quad(a: [u32; 3], b: [u32; 3]) -> Option<Face> {
    if a[0] == a[1] || a[1] == a[2] || a[0] == a[2] {
        return None;
    }
    if b[0] == b[1] || b[1] == b[2] || b[0] == b[2] {
        return None;
    }
    let shared: Vec<u32> = a.iter().copied().filter(|v| b.contains(v)).collect();
    if shared.len() != 2 {
        return None;
    }
    let u_corner = a.iter().copied().find(|v| !shared.contains(v))?;
    let v_corner = b.iter().copied().find(|v| !shared.contains(v))?;
    // The shared edge is the quad diagonal. The origin is the shared vertex
    // preceding the unshared corner in the first triangle's winding, which
    // keeps cross(edge_u, edge_v) aligned with the winding normal.
    let ua_pos = a.iter().position(|&v| v == u_corner)?;
    let origin = a[(ua_pos + 2) % 3];
    let far = if shared[0] == origin {
        shared[1]
    } else {
        shared[0]
    };
    Some(Face {
        origin,
        u_corner,
        v_corner,
        far: Some(far),
    })
}

/// Writes the face's corner UVs in the atlas channel, inset by half a texel
/// so bilinear lookups stay on texel centers inside the reservation.
fn assign_lightmap_uvs(mesh: &mut Mesh, face: &Face, rect: &AtlasRect, atlas_size: u32) {
    let n = atlas_size as f32;
    let u0 = (rect.left as f32 + 0.5) / n;
    let u1 = (rect.left as f32 + rect.size_u as f32 - 0.5) / n;
    let v0 = (rect.top as f32 + 0.5) / n;
    let v1 = (rect.top as f32 + rect.size_v as f32 - 0.5) / n;

    mesh.vertices[face.origin as usize].lightmap_uv = Vec2::new(u0, v0);
    mesh.vertices[face.u_corner as usize].lightmap_uv = Vec2::new(u1, v0);
    mesh.vertices[face.v_corner as usize].lightmap_uv = Vec2::new(u0, v1);
    if let Some(far) = face.far {
        mesh.vertices[far as usize].lightmap_uv = Vec2::new(u1, v1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MaterialDesc, MaterialInput};
    use ember_core::{primitives, Transform};

    fn scene_with(meshes: Vec<Mesh>) -> BakeScene {
        let mut scene = BakeScene::new();
        for mesh in meshes {
            scene
                .add_mesh(
                    mesh,
                    Transform::default(),
                    MaterialInput::Single(MaterialDesc::Flat { color: Vec3::ONE }),
                    None,
                )
                .unwrap();
        }
        scene
    }

    fn rects_of(map: &AtlasMap) -> Vec<AtlasRect> {
        map.items().iter().map(|i| i.rect).collect()
    }

    #[test]
    fn quad_pair_extracts_one_face() {
        let mesh = primitives::quad(1.0);
        let faces = extract_faces(&mesh).unwrap();
        assert_eq!(faces.len(), 1);
        let face = faces[0];
        assert_eq!(face.origin, 0);
        assert_eq!(face.u_corner, 1);
        assert_eq!(face.v_corner, 3);
        assert_eq!(face.far, Some(2));
    }

    #[test]
    fn unshared_triangles_stay_lone() {
        let mut mesh = primitives::plane(2.0, 2.0, 1);
        // Break pairing by making the second triangle unrelated.
        mesh.indices = vec![0, 1, 2, 0, 1, 3];
        let faces = extract_faces(&mesh).unwrap();
        // Those two share an edge (0, 1) so they still pair; force disjoint.
        assert_eq!(faces.len(), 1);
        mesh.indices = vec![0, 1, 2, 1, 2, 3, 0, 2, 3];
        let faces = extract_faces(&mesh).unwrap();
        assert_eq!(faces.len(), 2);
    }

    #[test]
    fn rects_are_disjoint_in_bounds_and_deterministic() {
        let build = || {
            let mut scene = scene_with(vec![
                primitives::plane(10.0, 10.0, 4),
                primitives::quad(3.0),
            ]);
            let mapper = AtlasMapper::new(AtlasSettings::default()).unwrap();
            mapper.build(&mut scene).unwrap()
        };
        let map = build();
        assert_eq!(map.len(), 17);

        let rects = rects_of(&map);
        for r in &rects {
            assert!(r.size_u > 0 && r.size_v > 0);
            // Include the bleed border in the footprint.
            assert!(r.left >= 1 && r.top >= 1);
            assert!(r.left + r.size_u <= map.size());
            assert!(r.top + r.size_v <= map.size());
        }
        for (i, a) in rects.iter().enumerate() {
            for b in rects.iter().skip(i + 1) {
                let a_right = a.left + a.size_u;
                let a_bottom = a.top + a.size_v;
                let b_right = b.left + b.size_u;
                let b_bottom = b.top + b.size_v;
                let disjoint = a_right <= b.left - 1
                    || b_right <= a.left - 1
                    || a_bottom <= b.top - 1
                    || b_bottom <= a.top - 1;
                assert!(disjoint, "{a:?} overlaps {b:?} (borders included)");
            }
        }

        assert_eq!(rects, rects_of(&build()));
    }

    #[test]
    fn allocate_caps_large_faces_and_scales_small_ones() {
        let settings = AtlasSettings {
            max_physical_size: 5.0,
            nominal_cell: 16,
            ..Default::default()
        };
        let mapper = AtlasMapper::new(settings).unwrap();
        let big = mapper.allocate(0, 50.0, 50.0).unwrap();
        assert_eq!((big.size_u, big.size_v), (16, 16));
        let half = mapper.allocate(1, 2.5, 2.5).unwrap();
        assert_eq!((half.size_u, half.size_v), (8, 8));
        let tiny = mapper.allocate(2, 1e-4, 1e-4).unwrap();
        assert_eq!((tiny.size_u, tiny.size_v), (1, 1));
    }

    #[test]
    fn overflow_when_capacity_exhausted() {
        let settings = AtlasSettings {
            size: 40,
            nominal_cell: 16,
            margin: 2,
            ..Default::default()
        };
        // 40 / 18 = 2 columns x 2 rows.
        let mapper = AtlasMapper::new(settings).unwrap();
        assert!(mapper.allocate(3, 1.0, 1.0).is_ok());
        let err = mapper.allocate(4, 1.0, 1.0).unwrap_err();
        assert!(matches!(
            err,
            BakeError::AtlasOverflow {
                faces: 5,
                capacity: 4
            }
        ));

        let capped = AtlasSettings {
            max_items: 2,
            ..Default::default()
        };
        let mapper = AtlasMapper::new(capped).unwrap();
        assert!(matches!(
            mapper.allocate(2, 1.0, 1.0).unwrap_err(),
            BakeError::AtlasOverflow { capacity: 2, .. }
        ));
    }

    #[test]
    fn surface_point_hits_parallelogram_corners() {
        let mut scene = scene_with(vec![primitives::quad(2.0)]);
        let mapper = AtlasMapper::new(AtlasSettings::default()).unwrap();
        let map = mapper.build(&mut scene).unwrap();
        let item = map.item(0);

        let origin = item.mesh.vertices[item.face.origin as usize].position;
        let u = item.mesh.vertices[item.face.u_corner as usize].position;
        let v = item.mesh.vertices[item.face.v_corner as usize].position;

        let p00 = item.surface_point(0.0, 0.0).unwrap();
        assert!((p00.position - origin).length() < 1e-6);
        let p11 = item.surface_point(1.0, 1.0).unwrap();
        assert!((p11.position - (origin + (u - origin) + (v - origin))).length() < 1e-6);
        assert!((p00.normal - Vec3::Z).length() < 1e-6);
        assert!(p00.u_axis.dot(p00.normal).abs() < 1e-6);
        assert!((p00.u_axis.cross(p00.v_axis) - p00.normal).length() < 1e-5);
    }

    #[test]
    fn lightmap_uvs_land_inside_the_rect() {
        let mut scene = scene_with(vec![primitives::quad(2.0)]);
        let mapper = AtlasMapper::new(AtlasSettings::default()).unwrap();
        let map = mapper.build(&mut scene).unwrap();
        let item = map.item(0);
        let n = map.size() as f32;
        let rect = item.rect;

        let reg_mesh = &scene.meshes()[0].mesh;
        for idx in [
            item.face.origin,
            item.face.u_corner,
            item.face.v_corner,
            item.face.far.unwrap(),
        ] {
            let uv = reg_mesh.vertices[idx as usize].lightmap_uv;
            assert!(uv.x >= rect.left as f32 / n && uv.x <= (rect.left + rect.size_u) as f32 / n);
            assert!(uv.y >= rect.top as f32 / n && uv.y <= (rect.top + rect.size_v) as f32 / n);
        }
    }

    #[test]
    fn broken_invariants_surface_as_geometry_errors() {
        let mut scene = scene_with(vec![primitives::quad(2.0)]);
        let mapper = AtlasMapper::new(AtlasSettings::default()).unwrap();
        let map = mapper.build(&mut scene).unwrap();
        let good = map.item(0);

        let out_of_range = AtlasMapItem {
            mesh: good.mesh.clone(),
            mesh_index: good.mesh_index,
            world: good.world,
            face: Face {
                origin: 99,
                u_corner: 1,
                v_corner: 3,
                far: None,
            },
            basis: good.basis,
            rect: good.rect,
            fill: 0,
        };
        assert!(matches!(
            out_of_range.surface_point(0.5, 0.5),
            Err(BakeError::Geometry(_))
        ));

        let unindexed = AtlasMapItem {
            mesh: Arc::new(Mesh::new(good.mesh.vertices.clone(), Vec::new())),
            mesh_index: good.mesh_index,
            world: good.world,
            face: good.face,
            basis: good.basis,
            rect: good.rect,
            fill: 0,
        };
        assert!(matches!(
            unindexed.surface_point(0.5, 0.5),
            Err(BakeError::Geometry(_))
        ));
    }

    #[test]
    fn in_plane_rotation_preserves_the_frame() {
        let mut point = SurfacePoint {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            u_axis: Vec3::X,
            v_axis: Vec3::Y,
        };
        point.rotate_in_plane(1.3);
        assert!(point.u_axis.dot(point.normal).abs() < 1e-6);
        assert!((point.u_axis.length() - 1.0).abs() < 1e-6);
        assert!((point.u_axis.cross(point.v_axis) - point.normal).length() < 1e-5);
    }
}
