use std::sync::Arc;

use ember_core::{Mesh, Transform};
use glam::Vec3;

use crate::{BakeError, Result};

/// Validated material descriptor. Host-supplied material input is checked
/// once at registration and carried as a tagged variant from then on; the
/// rest of the pipeline never re-inspects material shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialDesc {
    Flat { color: Vec3 },
    Textured { texture: String, tint: Vec3 },
    Emissive { color: Vec3, intensity: f32 },
}

impl MaterialDesc {
    fn validate(&self) -> Result<()> {
        match self {
            MaterialDesc::Flat { .. } => Ok(()),
            MaterialDesc::Textured { texture, .. } => {
                if texture.is_empty() {
                    Err(BakeError::Configuration(
                        "textured material with empty texture name".into(),
                    ))
                } else {
                    Ok(())
                }
            }
            MaterialDesc::Emissive { intensity, .. } => {
                if !intensity.is_finite() || *intensity < 0.0 {
                    Err(BakeError::Configuration(format!(
                        "emissive intensity must be finite and non-negative, got {intensity}"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MaterialDesc::Flat { .. } => "flat",
            MaterialDesc::Textured { .. } => "textured",
            MaterialDesc::Emissive { .. } => "emissive",
        }
    }
}

/// Material input as the host hands it over: one material for the whole
/// mesh, or one per face. Mixed-kind arrays are rejected at registration.
#[derive(Debug, Clone)]
pub enum MaterialInput {
    Single(MaterialDesc),
    PerFace(Vec<MaterialDesc>),
}

#[derive(Debug, Clone)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Factor layer this light contributes to; `None` = base pass.
    pub factor: Option<String>,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.3, -0.7, 0.2).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            factor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) usize);

pub struct RegisteredMesh {
    pub mesh: Arc<Mesh>,
    pub transform: Transform,
    pub materials: Vec<MaterialDesc>,
    pub factor: Option<String>,
}

/// Registry of everything the baker will sample. All structural validation
/// happens here, before any baking begins; later stages treat the contents
/// as trusted.
#[derive(Default)]
pub struct BakeScene {
    meshes: Vec<RegisteredMesh>,
    lights: Vec<DirectionalLight>,
}

impl BakeScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(
        &mut self,
        mesh: Mesh,
        transform: Transform,
        material: MaterialInput,
        factor: Option<String>,
    ) -> Result<MeshHandle> {
        if !mesh.is_indexed() {
            return Err(BakeError::Configuration(
                "mesh has no index buffer; the baker requires indexed triangles".into(),
            ));
        }
        if mesh.indices.len() % 3 != 0 {
            return Err(BakeError::Configuration(format!(
                "index count {} is not a multiple of 3",
                mesh.indices.len()
            )));
        }
        let max = mesh.vertices.len() as u32;
        if mesh.indices.iter().any(|&i| i >= max) {
            return Err(BakeError::Configuration(
                "index buffer references vertices out of range".into(),
            ));
        }

        let materials = match material {
            MaterialInput::Single(desc) => {
                desc.validate()?;
                vec![desc]
            }
            MaterialInput::PerFace(descs) => {
                if descs.is_empty() {
                    return Err(BakeError::Configuration("empty material array".into()));
                }
                let kind = descs[0].kind();
                for desc in &descs {
                    desc.validate()?;
                    if desc.kind() != kind {
                        return Err(BakeError::Configuration(format!(
                            "mixed material array: {} and {}",
                            kind,
                            desc.kind()
                        )));
                    }
                }
                descs
            }
        };

        let handle = MeshHandle(self.meshes.len());
        self.meshes.push(RegisteredMesh {
            mesh: Arc::new(mesh),
            transform,
            materials,
            factor,
        });
        Ok(handle)
    }

    pub fn add_light(&mut self, light: DirectionalLight) -> Result<()> {
        if !light.intensity.is_finite() || light.intensity < 0.0 {
            return Err(BakeError::Configuration(format!(
                "light intensity must be finite and non-negative, got {}",
                light.intensity
            )));
        }
        self.lights.push(light);
        Ok(())
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&RegisteredMesh> {
        self.meshes.get(handle.0)
    }

    pub fn meshes(&self) -> &[RegisteredMesh] {
        &self.meshes
    }

    pub(crate) fn meshes_mut(&mut self) -> &mut [RegisteredMesh] {
        &mut self.meshes
    }

    pub fn lights(&self) -> &[DirectionalLight] {
        &self.lights
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::primitives;

    #[test]
    fn rejects_non_indexed_mesh() {
        let mut scene = BakeScene::new();
        let mut mesh = primitives::quad(1.0);
        mesh.indices.clear();
        let err = scene
            .add_mesh(
                mesh,
                Transform::default(),
                MaterialInput::Single(MaterialDesc::Flat { color: Vec3::ONE }),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, BakeError::Configuration(_)));
    }

    #[test]
    fn rejects_mixed_material_array() {
        let mut scene = BakeScene::new();
        let err = scene
            .add_mesh(
                primitives::quad(1.0),
                Transform::default(),
                MaterialInput::PerFace(vec![
                    MaterialDesc::Flat { color: Vec3::ONE },
                    MaterialDesc::Emissive {
                        color: Vec3::ONE,
                        intensity: 1.0,
                    },
                ]),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, BakeError::Configuration(_)));
    }

    #[test]
    fn accepts_uniform_material_array_and_lights() {
        let mut scene = BakeScene::new();
        let handle = scene
            .add_mesh(
                primitives::quad(1.0),
                Transform::default(),
                MaterialInput::PerFace(vec![MaterialDesc::Flat { color: Vec3::ONE }]),
                Some("sun".into()),
            )
            .unwrap();
        assert_eq!(handle, MeshHandle(0));
        scene
            .add_light(DirectionalLight {
                factor: Some("sun".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(scene.lights().len(), 1);
    }

    #[test]
    fn rejects_negative_light_intensity() {
        let mut scene = BakeScene::new();
        let err = scene
            .add_light(DirectionalLight {
                intensity: -2.0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BakeError::Configuration(_)));
    }
}
