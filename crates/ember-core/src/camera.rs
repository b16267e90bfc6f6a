use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

/// Projection of a bake or display camera. The off-center `Frustum` variant
/// exists for hemicube side views, which clip at the surface plane and only
/// ever render the upper half of a 90 degree view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    /// Asymmetric frustum with bounds given on the near plane.
    Frustum {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    pub projection: Projection,
}

impl Camera {
    pub fn new(projection: Projection) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Frustum {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => frustum_rh(left, right, bottom, top, near, far),
        }
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Orients the camera along `forward` with the given up direction.
    pub fn look_to(&mut self, forward: Vec3, up: Vec3) {
        let f = forward.normalize();
        let r = f.cross(up).normalize();
        let u = r.cross(f);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(r, u, -f));
    }

    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.look_to(target - self.position, up);
    }
}

/// Right-handed off-center perspective projection with [0, 1] depth, the
/// wgpu clip-space convention glam's `perspective_rh` uses.
pub fn frustum_rh(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let rw = 1.0 / (right - left);
    let rh = 1.0 / (top - bottom);
    let rd = 1.0 / (near - far);
    Mat4::from_cols(
        Vec4::new(2.0 * near * rw, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near * rh, 0.0, 0.0),
        Vec4::new((right + left) * rw, (top + bottom) * rh, far * rd, -1.0),
        Vec4::new(0.0, 0.0, near * far * rd, 0.0),
    )
}
