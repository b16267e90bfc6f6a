//! Headless progressive bake over a two-mesh scene, with a minimal host
//! renderer that fills each probe view with a sky color. Run with
//! `RUST_LOG=debug` to watch pass progress.

use std::sync::Arc;

use ember_bake::{
    AtlasSettings, BakeSettings, Baker, Compositor, DirectionalLight, MaterialDesc, MaterialInput,
    ViewRect, ViewRenderer,
};
use ember_core::{primitives, Camera, RenderContext, Transform};
use glam::{Quat, Vec3};

const SKY_SHADER: &str = r#"
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

/// Stand-in for a real lighting renderer: every view sees a uniform sky.
/// A production host would draw the scene's geometry lit by its lights and
/// the baker's current bounce texture here.
struct SkyRenderer {
    ctx: Arc<RenderContext>,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
}

impl SkyRenderer {
    fn new(ctx: Arc<RenderContext>, sky: [f32; 4]) -> Self {
        let device = &ctx.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sky"),
            source: wgpu::ShaderSource::Wgsl(SKY_SHADER.into()),
        });
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sky_bgl"),
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
            label: Some("sky_layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("sky"),
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
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sky_params"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue.write_buffer(&buffer, 0, bytemuck::bytes_of(&sky));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sky"),
            layout: &bind_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self {
            ctx,
            pipeline,
            bind_group,
        }
    }
}

impl ViewRenderer for SkyRenderer {
    fn render_view(
        &mut self,
        _camera: &Camera,
        target: &wgpu::TextureView,
        viewport: ViewRect,
    ) -> ember_core::Result<()> {
        let mut encoder = self.ctx.create_encoder("sky");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sky"),
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
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.ctx.submit(encoder);
        Ok(())
    }
}

fn main() {
    env_logger::init();

    let ctx = match RenderContext::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("no usable GPU: {e}");
            return;
        }
    };

    let settings = BakeSettings {
        atlas: AtlasSettings {
            size: 128,
            nominal_cell: 8,
            ..Default::default()
        },
        probe_resolution: 8,
        texels_per_tick: 64,
        ..Default::default()
    };
    let mut baker = Baker::new(ctx.clone(), settings);

    baker
        .add_mesh(
            primitives::plane(8.0, 8.0, 2),
            Transform::default(),
            MaterialInput::Single(MaterialDesc::Flat {
                color: Vec3::splat(0.8),
            }),
            None,
        )
        .unwrap();
    baker
        .add_mesh(
            primitives::quad(2.0),
            Transform::new(
                Vec3::new(0.0, 1.0, -2.0),
                Quat::from_rotation_x(-0.3),
                Vec3::ONE,
            ),
            MaterialInput::Single(MaterialDesc::Flat {
                color: Vec3::new(0.9, 0.3, 0.2),
            }),
            None,
        )
        .unwrap();
    baker.add_light(DirectionalLight::default()).unwrap();
    baker.add_factor("sun").unwrap();
    baker.set_factor_multiplier("sun", 1.5).unwrap();

    baker.finalize().unwrap();
    let per_pass = baker.atlas_map().unwrap().total_texels();
    println!("baking {per_pass} texels per pass");

    let mut sky = SkyRenderer::new(ctx.clone(), [0.4, 0.6, 0.9, 1.0]);
    for frame in 0..120u32 {
        let report = baker.tick(&mut sky).unwrap();
        if report.pass_completed {
            println!(
                "frame {frame}: pass {} complete",
                baker.scheduler().unwrap().passes_completed()
            );
        }
    }

    let mut compositor = Compositor::new(ctx, 512, 512);
    baker.composite(&mut compositor);
    println!(
        "composited {} factor layer(s) over the base output",
        baker.factors().len()
    );
}
