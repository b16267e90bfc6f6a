use std::sync::Arc;

use ember_core::{AtlasTexture, RenderContext};

use crate::scheduler::TextureStack;

const SHADER: &str = include_str!("composite.wgsl");

pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// One independently baked lighting contribution: a named atlas texture and
/// a runtime multiplier. Layers never mutate each other; the host creates
/// and destroys them. The texture sits in a depth-1 stack so factor baking
/// shares the scheduler's code path.
pub struct FactorLayer {
    name: String,
    stack: TextureStack,
    multiplier: f32,
}

impl FactorLayer {
    pub fn new(name: &str, atlas_size: u32) -> Self {
        Self {
            name: name.to_string(),
            stack: TextureStack::new(atlas_size, 1, name),
            multiplier: 1.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    pub fn set_multiplier(&mut self, multiplier: f32) {
        self.multiplier = multiplier;
    }

    pub fn texture(&self) -> &AtlasTexture {
        self.stack.current()
    }

    pub fn stack(&self) -> &TextureStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut TextureStack {
        &mut self.stack
    }
}

/// Additively blends the base layer and every factor layer into one display
/// texture. The target is cleared once per `composite` call; layers with a
/// zero multiplier still draw, which is acceptable at this small fixed
/// resolution cost, unlike per-texel probe work. Source textures are never
/// mutated.
pub struct Compositor {
    ctx: Arc<RenderContext>,
    pipeline: wgpu::RenderPipeline,
    bind_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    uniforms: Vec<wgpu::Buffer>,
}

impl Compositor {
    pub fn new(ctx: Arc<RenderContext>, width: u32, height: u32) -> Self {
        let device = &ctx.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(16),
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite_layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("composite"),
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
                    format: OUTPUT_FORMAT,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
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

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("composite-output"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            ctx,
            pipeline,
            bind_layout,
            sampler,
            output,
            output_view,
            uniforms: Vec::new(),
        }
    }

    pub fn output(&self) -> &wgpu::Texture {
        &self.output
    }

    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.output_view
    }

    /// Renders `base` (multiplier 1) and then each factor layer into the
    /// output. Layers whose GPU mirror has never been uploaded are skipped
    /// with a warning.
    pub fn composite(&mut self, base: Option<&AtlasTexture>, factors: &[&FactorLayer]) {
        let mut draws: Vec<(&wgpu::TextureView, f32)> = Vec::new();
        if let Some(base) = base {
            match base.view() {
                Some(view) => draws.push((view, 1.0)),
                None => log::warn!("composite: base layer has no GPU mirror, skipping"),
            }
        }
        for factor in factors {
            match factor.texture().view() {
                Some(view) => draws.push((view, factor.multiplier())),
                None => log::warn!(
                    "composite: factor '{}' has no GPU mirror, skipping",
                    factor.name()
                ),
            }
        }

        let device = &self.ctx.device;
        while self.uniforms.len() < draws.len() {
            self.uniforms.push(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("composite-params"),
                size: 16,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }

        let mut bind_groups = Vec::with_capacity(draws.len());
        for (i, (view, multiplier)) in draws.iter().enumerate() {
            self.ctx.queue.write_buffer(
                &self.uniforms[i],
                0,
                bytemuck::bytes_of(&[*multiplier, *multiplier, *multiplier, 1.0f32]),
            );
            bind_groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("composite"),
                layout: &self.bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.uniforms[i].as_entire_binding(),
                    },
                ],
            }));
        }

        let mut encoder = self.ctx.create_encoder("composite");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.output_view,
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
            pass.set_pipeline(&self.pipeline);
            for bind_group in &bind_groups {
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.ctx.submit(encoder);
    }
}
