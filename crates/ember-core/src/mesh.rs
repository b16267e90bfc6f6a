use glam::{Vec2, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    /// Material texture coordinates, untouched by baking.
    pub uv: Vec2,
    /// Atlas coordinates; written by the atlas mapper at registration.
    pub lightmap_uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
            lightmap_uv: Vec2::ZERO,
        }
    }
}

/// Indexed triangle mesh. The baker requires an index buffer; consecutive
/// triangle pairs sharing an edge are treated as one quad face.
#[derive(Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

pub mod primitives {
    use super::*;

    /// Unit quad in the XY plane facing +Z, scaled by `size`.
    pub fn quad(size: f32) -> Mesh {
        let s = size / 2.0;
        let n = Vec3::Z;
        let vertices = vec![
            Vertex::new(Vec3::new(-s, -s, 0.0), n, Vec2::new(0.0, 0.0)),
            Vertex::new(Vec3::new(s, -s, 0.0), n, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(s, s, 0.0), n, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(-s, s, 0.0), n, Vec2::new(0.0, 1.0)),
        ];
        let indices = vec![0, 1, 2, 0, 2, 3];
        Mesh::new(vertices, indices)
    }

    /// Subdivided plane in the XZ plane facing +Y.
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Mesh {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let u = x as f32 / subdivisions as f32;
                let v = z as f32 / subdivisions as f32;
                vertices.push(Vertex::new(
                    Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth),
                    Vec3::Y,
                    Vec2::new(u, v),
                ));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let i0 = z * (subdivisions + 1) + x;
                let i1 = i0 + 1;
                let i2 = (z + 1) * (subdivisions + 1) + x;
                let i3 = i2 + 1;

                indices.push(i0);
                indices.push(i2);
                indices.push(i1);

                indices.push(i1);
                indices.push(i2);
                indices.push(i3);
            }
        }

        Mesh::new(vertices, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_is_two_triangles() {
        let mesh = primitives::quad(1.0);
        assert!(mesh.is_indexed());
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn plane_counts() {
        let mesh = primitives::plane(4.0, 4.0, 3);
        assert_eq!(mesh.vertices.len(), 16);
        assert_eq!(mesh.triangle_count(), 18);
    }
}
