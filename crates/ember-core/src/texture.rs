use half::f16;

use crate::RenderContext;

struct GpuMirror {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// CPU-authoritative RGBA float texture with a lazily created `Rgba16Float`
/// GPU mirror. The pixel buffer is the source of truth; `upload` pushes it
/// to the GPU when the dirty flag is set. Writers batch their edits and mark
/// the texture dirty once per batch, so the upload cost is paid per tick and
/// not per texel.
pub struct AtlasTexture {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
    dirty: bool,
    label: String,
    gpu: Option<GpuMirror>,
}

impl AtlasTexture {
    pub fn new(width: u32, height: u32, label: &str) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; (width * height * 4) as usize],
            dirty: false,
            label: label.to_string(),
            gpu: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn write_rgb(&mut self, x: u32, y: u32, rgb: [f32; 3]) {
        debug_assert!(x < self.width && y < self.height);
        let i = ((y * self.width + x) * 4) as usize;
        self.pixels[i] = rgb[0];
        self.pixels[i + 1] = rgb[1];
        self.pixels[i + 2] = rgb[2];
        self.pixels[i + 3] = 1.0;
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> [f32; 3] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn fill(&mut self, rgb: [f32; 3]) {
        for i in (0..self.pixels.len()).step_by(4) {
            self.pixels[i] = rgb[0];
            self.pixels[i + 1] = rgb[1];
            self.pixels[i + 2] = rgb[2];
            self.pixels[i + 3] = 1.0;
        }
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// View of the GPU mirror, if `upload` has run at least once.
    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.gpu.as_ref().map(|g| &g.view)
    }

    /// Pushes the pixel buffer to the GPU mirror if dirty, creating the
    /// mirror on first use.
    pub fn upload(&mut self, ctx: &RenderContext) {
        if !self.dirty && self.gpu.is_some() {
            return;
        }
        if self.gpu.is_none() {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&self.label),
                size: wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba16Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.gpu = Some(GpuMirror { texture, view });
        }

        let data: Vec<u16> = self
            .pixels
            .iter()
            .map(|&v| f16::from_f32(v).to_bits())
            .collect();
        let mirror = self.gpu.as_ref().unwrap();
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &mirror.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&data),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(8 * self.width),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let mut tex = AtlasTexture::new(8, 8, "test");
        tex.write_rgb(3, 5, [0.25, 0.5, 0.75]);
        assert_eq!(tex.rgb_at(3, 5), [0.25, 0.5, 0.75]);
        assert_eq!(tex.rgb_at(0, 0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn writes_do_not_set_dirty_until_batch_end() {
        let mut tex = AtlasTexture::new(4, 4, "test");
        tex.write_rgb(0, 0, [1.0, 1.0, 1.0]);
        assert!(!tex.is_dirty());
        tex.mark_dirty();
        assert!(tex.is_dirty());
    }
}
