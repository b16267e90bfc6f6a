use std::sync::Arc;

use ember_core::{Camera, EmberError, Projection, RenderContext};
use glam::Mat4;

use crate::atlas::SurfacePoint;
use crate::{BakeError, Result};

/// The five sub-views of a hemicube sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HemicubeFace {
    /// Along the surface normal; fills the full square region.
    Up,
    /// Along +u_axis; only the above-horizon half is rendered.
    PosU,
    NegU,
    PosV,
    NegV,
}

impl HemicubeFace {
    pub const ALL: [HemicubeFace; 5] = [
        HemicubeFace::Up,
        HemicubeFace::PosU,
        HemicubeFace::NegU,
        HemicubeFace::PosV,
        HemicubeFace::NegV,
    ];

    pub fn is_side(&self) -> bool {
        !matches!(self, HemicubeFace::Up)
    }
}

/// Pixel region of a sub-view inside the shared probe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Placement of the five sub-views in the shared (4R x 2R) target: the up
/// square, then the four half-height side strips. One readback of the target
/// yields the whole hemicube.
pub fn view_rect(face: HemicubeFace, resolution: u32) -> ViewRect {
    let r = resolution;
    let h = r / 2;
    match face {
        HemicubeFace::Up => ViewRect {
            x: 0,
            y: 0,
            width: r,
            height: r,
        },
        HemicubeFace::PosU => ViewRect {
            x: r,
            y: 0,
            width: r,
            height: h,
        },
        HemicubeFace::NegU => ViewRect {
            x: 2 * r,
            y: 0,
            width: r,
            height: h,
        },
        HemicubeFace::PosV => ViewRect {
            x: 3 * r,
            y: 0,
            width: r,
            height: h,
        },
        HemicubeFace::NegV => ViewRect {
            x: 0,
            y: r,
            width: r,
            height: h,
        },
    }
}

/// The host's "render the lighting scene into this viewport" capability.
/// The target arrives pre-cleared; implementations must render with load
/// (not clear) semantics and stay inside the given viewport/scissor.
pub trait ViewRenderer {
    fn render_view(
        &mut self,
        camera: &Camera,
        target: &wgpu::TextureView,
        viewport: ViewRect,
    ) -> ember_core::Result<()>;
}

/// Renders one hemicube per call into an owned offscreen target and hands
/// the raw pixels of each sub-view to the caller, uninterpreted. The render
/// and readback are synchronous; this is a known performance boundary, and
/// batching texels per readback is an optimization, not a correctness
/// requirement.
pub struct ProbeRenderer {
    ctx: Arc<RenderContext>,
    resolution: u32,
    near: f32,
    far: f32,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_row: u32,
    /// Reused full-target RGBA float buffer, (4R) x (2R); never reallocated
    /// between samples.
    samples: Vec<f32>,
    /// Reused per-view scratch handed to the handler.
    scratch: Vec<f32>,
}

impl ProbeRenderer {
    pub fn new(ctx: Arc<RenderContext>, resolution: u32, near: f32, far: f32) -> Result<Self> {
        validate_resolution(resolution)?;
        let width = 4 * resolution;
        let height = 2 * resolution;

        let target = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("probe-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let row_bytes = width * 16;
        let padded_row = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("probe-readback"),
            size: (padded_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            ctx,
            resolution,
            near,
            far,
            target,
            target_view,
            readback,
            padded_row,
            samples: vec![0.0; (width * height * 4) as usize],
            scratch: vec![0.0; (resolution * resolution * 4) as usize],
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn target_view(&self) -> &wgpu::TextureView {
        &self.target_view
    }

    /// Captures one hemicube at `point` (mesh-local) under `world` and feeds
    /// each sub-view's packed pixels to `handler`. The shared target is
    /// exclusively owned by this renderer for the full duration of the five
    /// sub-renders; the single readback happens only after all five.
    pub fn render(
        &mut self,
        point: &SurfacePoint,
        world: &Mat4,
        scene: &mut dyn ViewRenderer,
        mut handler: impl FnMut(HemicubeFace, ViewRect, &[f32]),
    ) -> Result<()> {
        self.clear_target();

        for face in HemicubeFace::ALL {
            let camera = face_camera(face, point, world, self.near, self.far);
            let rect = view_rect(face, self.resolution);
            scene
                .render_view(&camera, &self.target_view, rect)
                .map_err(BakeError::Core)?;
        }

        self.read_back()?;

        let stride = (4 * self.resolution * 4) as usize;
        for face in HemicubeFace::ALL {
            let rect = view_rect(face, self.resolution);
            let row_len = (rect.width * 4) as usize;
            for row in 0..rect.height {
                let src = (rect.y + row) as usize * stride + (rect.x * 4) as usize;
                let dst = row as usize * row_len;
                self.scratch[dst..dst + row_len].copy_from_slice(&self.samples[src..src + row_len]);
            }
            let len = (rect.width * rect.height * 4) as usize;
            handler(face, rect, &self.scratch[..len]);
        }
        Ok(())
    }

    fn clear_target(&self) {
        let mut encoder = self.ctx.create_encoder("probe-clear");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("probe-clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.ctx.submit(encoder);
    }

    /// Blocking readback of the whole target into the reused sample buffer.
    /// A stalled readback is a fatal platform condition, not a recoverable
    /// error; there is no timeout.
    fn read_back(&mut self) -> Result<()> {
        let width = 4 * self.resolution;
        let height = 2 * self.resolution;
        let row_bytes = width * 16;

        let mut encoder = self.ctx.create_encoder("probe-readback");
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.submit(encoder);

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| EmberError::Readback("map_async callback dropped".into()))
            .map_err(BakeError::Core)?
            .map_err(|e| BakeError::Core(EmberError::Readback(e.to_string())))?;

        {
            let data = slice.get_mapped_range();
            for y in 0..height as usize {
                let src = y * self.padded_row as usize;
                let row: &[f32] = bytemuck::cast_slice(&data[src..src + row_bytes as usize]);
                let dst = y * (width * 4) as usize;
                self.samples[dst..dst + row.len()].copy_from_slice(row);
            }
        }
        self.readback.unmap();
        Ok(())
    }
}

/// Camera for one sub-view: pose assembled in mesh-local space from the
/// surface frame, then taken to world space by the mesh matrix in a single
/// multiply, so probes stay correct under arbitrary transforms.
pub fn face_camera(
    face: HemicubeFace,
    point: &SurfacePoint,
    world: &Mat4,
    near: f32,
    far: f32,
) -> Camera {
    let (forward, up) = match face {
        HemicubeFace::Up => (point.normal, point.u_axis),
        HemicubeFace::PosU => (point.u_axis, point.normal),
        HemicubeFace::NegU => (-point.u_axis, point.normal),
        HemicubeFace::PosV => (point.v_axis, point.normal),
        HemicubeFace::NegV => (-point.v_axis, point.normal),
    };
    let right = forward.cross(up).normalize();
    let local = Mat4::from_cols(
        right.extend(0.0),
        up.extend(0.0),
        (-forward).extend(0.0),
        point.position.extend(1.0),
    );
    let pose = *world * local;
    let (_, rotation, position) = pose.to_scale_rotation_translation();

    let projection = if face.is_side() {
        // 90 degree frustum clipped at the surface plane: only the
        // above-horizon half exists, so no rendered pixel ever needs to be
        // discarded.
        Projection::Frustum {
            left: -near,
            right: near,
            bottom: 0.0,
            top: near,
            near,
            far,
        }
    } else {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_2,
            aspect: 1.0,
            near,
            far,
        }
    };

    let mut camera = Camera::new(projection);
    camera.position = position;
    camera.rotation = rotation;
    camera
}

fn validate_resolution(resolution: u32) -> Result<()> {
    if resolution < 2 || resolution % 2 != 0 {
        return Err(BakeError::Configuration(format!(
            "probe resolution must be even and >= 2, got {resolution}"
        )));
    }
    Ok(())
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn view_rects_tile_without_overlap() {
        let r = 16;
        let rects: Vec<ViewRect> = HemicubeFace::ALL
            .iter()
            .map(|&f| view_rect(f, r))
            .collect();
        for rect in &rects {
            assert!(rect.x + rect.width <= 4 * r);
            assert!(rect.y + rect.height <= 2 * r);
        }
        for (i, a) in rects.iter().enumerate() {
            for b in rects.iter().skip(i + 1) {
                let disjoint = a.x + a.width <= b.x
                    || b.x + b.width <= a.x
                    || a.y + a.height <= b.y
                    || b.y + b.height <= a.y;
                assert!(disjoint, "{a:?} overlaps {b:?}");
            }
        }
        assert_eq!(view_rect(HemicubeFace::Up, r).width, r);
        assert_eq!(view_rect(HemicubeFace::PosU, r).height, r / 2);
    }

    #[test]
    fn rejects_odd_probe_resolution() {
        assert!(matches!(
            validate_resolution(9),
            Err(BakeError::Configuration(_))
        ));
        assert!(validate_resolution(16).is_ok());
    }

    #[test]
    fn face_cameras_cover_the_hemisphere() {
        let point = SurfacePoint {
            position: Vec3::new(1.0, 2.0, 3.0),
            normal: Vec3::Z,
            u_axis: Vec3::X,
            v_axis: Vec3::Y,
        };
        let world = Mat4::IDENTITY;

        let up = face_camera(HemicubeFace::Up, &point, &world, 0.05, 100.0);
        assert!((up.forward() - Vec3::Z).length() < 1e-5);
        assert!((up.up() - Vec3::X).length() < 1e-5);
        assert!((up.position - point.position).length() < 1e-5);
        assert!(matches!(up.projection, Projection::Perspective { .. }));

        let side = face_camera(HemicubeFace::PosU, &point, &world, 0.05, 100.0);
        assert!((side.forward() - Vec3::X).length() < 1e-5);
        assert!((side.up() - Vec3::Z).length() < 1e-5);
        match side.projection {
            Projection::Frustum { bottom, top, near, .. } => {
                assert_eq!(bottom, 0.0);
                assert!((top - near).abs() < 1e-7);
            }
            _ => panic!("side views use the half frustum"),
        }

        let neg = face_camera(HemicubeFace::NegV, &point, &world, 0.05, 100.0);
        assert!((neg.forward() + Vec3::Y).length() < 1e-5);
    }

    const FILL_SHADER: &str = r#"
struct Params { color: vec4<f32> };
@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(vi) / 2) * 4.0 - 1.0;
    let y = f32(i32(vi) & 1) * 4.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.color;
}
"#;

    /// Fills each requested viewport with a distinct solid color, the
    /// smallest possible host renderer.
    struct FillRenderer {
        ctx: Arc<RenderContext>,
        pipeline: wgpu::RenderPipeline,
        bind_layout: wgpu::BindGroupLayout,
        calls: u32,
    }

    impl FillRenderer {
        fn color_for(call: u32) -> [f32; 4] {
            [call as f32 * 0.1 + 0.1, call as f32 * 0.05, 1.0, 1.0]
        }

        fn new(ctx: Arc<RenderContext>) -> Self {
            let device = &ctx.device;
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("probe-test-fill"),
                source: wgpu::ShaderSource::Wgsl(FILL_SHADER.into()),
            });
            let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(16),
                    },
                    count: None,
                }],
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &[&bind_layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("probe-test-fill"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba32Float,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            Self {
                ctx,
                pipeline,
                bind_layout,
                calls: 0,
            }
        }
    }

    impl ViewRenderer for FillRenderer {
        fn render_view(
            &mut self,
            _camera: &Camera,
            target: &wgpu::TextureView,
            viewport: ViewRect,
        ) -> ember_core::Result<()> {
            let color = Self::color_for(self.calls);
            self.calls += 1;
            let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: 16,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.ctx.queue.write_buffer(&buffer, 0, bytemuck::bytes_of(&color));
            let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &self.bind_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });

            let mut encoder = self.ctx.create_encoder("probe-test-fill");
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("probe-test-fill"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: target,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_viewport(
                    viewport.x as f32,
                    viewport.y as f32,
                    viewport.width as f32,
                    viewport.height as f32,
                    0.0,
                    1.0,
                );
                pass.set_scissor_rect(viewport.x, viewport.y, viewport.width, viewport.height);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            self.ctx.submit(encoder);
            Ok(())
        }
    }

    #[test]
    fn hemicube_readback_delivers_each_view() {
        let Ok(ctx) = ember_core::RenderContext::new() else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let mut probe = ProbeRenderer::new(ctx.clone(), 8, 0.05, 100.0).unwrap();
        let mut renderer = FillRenderer::new(ctx);

        let point = SurfacePoint {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            u_axis: Vec3::X,
            v_axis: Vec3::Y,
        };
        let world = Mat4::IDENTITY;

        let mut seen = Vec::new();
        probe
            .render(&point, &world, &mut renderer, |face, rect, pixels| {
                assert_eq!(pixels.len(), (rect.width * rect.height * 4) as usize);
                let expected = FillRenderer::color_for(seen.len() as u32);
                for px in pixels.chunks_exact(4) {
                    assert_eq!(px[0], expected[0], "face {face:?}");
                    assert_eq!(px[1], expected[1]);
                    assert_eq!(px[2], expected[2]);
                }
                seen.push(face);
            })
            .unwrap();
        assert_eq!(seen, HemicubeFace::ALL.to_vec());
    }

    #[test]
    fn world_matrix_is_applied_in_one_step() {
        let point = SurfacePoint {
            position: Vec3::new(1.0, 0.0, 0.0),
            normal: Vec3::Z,
            u_axis: Vec3::X,
            v_axis: Vec3::Y,
        };
        let world = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2)
            * Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
        let camera = face_camera(HemicubeFace::Up, &point, &world, 0.05, 100.0);
        let expected = world.transform_point3(point.position);
        assert!((camera.position - expected).length() < 1e-4);
        let expected_forward = world.transform_vector3(Vec3::Z).normalize();
        assert!((camera.forward() - expected_forward).length() < 1e-4);
    }
}
