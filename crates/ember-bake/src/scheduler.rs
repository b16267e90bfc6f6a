use ember_core::{AtlasTexture, RenderContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::accumulate::{write_texel, IrradianceAccumulator};
use crate::atlas::{AtlasMap, AtlasMapItem, SurfacePoint};
use crate::probe::{ProbeRenderer, ViewRenderer};
use crate::Result;

/// Ordered stack of atlas textures. Position 0 is the current visible
/// output and the bounce light source; the last entry is the write target
/// of the in-progress pass. Rotation promotes the last entry to the front —
/// a completed pass's output becomes the next pass's light source. Rotation
/// relabels; it never reallocates.
pub struct TextureStack {
    layers: Vec<AtlasTexture>,
}

impl TextureStack {
    pub fn new(size: u32, depth: usize, label: &str) -> Self {
        let depth = depth.max(1);
        let layers = (0..depth)
            .map(|i| AtlasTexture::new(size, size, &format!("{label}.{i}")))
            .collect();
        Self { layers }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Current visible output, sampled by the host as the bounce source.
    pub fn current(&self) -> &AtlasTexture {
        &self.layers[0]
    }

    pub fn current_mut(&mut self) -> &mut AtlasTexture {
        &mut self.layers[0]
    }

    /// Write target of the in-progress pass. With depth 1 this is also the
    /// visible output and there is no bounce feedback.
    pub fn target(&self) -> &AtlasTexture {
        self.layers.last().unwrap()
    }

    pub fn target_mut(&mut self) -> &mut AtlasTexture {
        self.layers.last_mut().unwrap()
    }

    pub fn layer(&self, index: usize) -> &AtlasTexture {
        &self.layers[index]
    }

    pub fn rotate(&mut self) {
        if self.layers.len() > 1 {
            let last = self.layers.pop().unwrap();
            self.layers.insert(0, last);
        }
    }

    /// Pushes every dirty layer's pixels to its GPU mirror.
    pub fn upload(&mut self, ctx: &RenderContext) {
        for layer in &mut self.layers {
            layer.upload(ctx);
        }
    }
}

/// One probe-and-integrate step. The scheduler drives this through a trait
/// so hosts (and tests) can substitute the GPU path.
pub trait TexelSampler {
    fn sample_texel(&mut self, item: &AtlasMapItem, point: &SurfacePoint) -> Result<[f32; 3]>;
}

/// Production sampler: renders a hemicube through the host's `ViewRenderer`
/// and reduces it with the accumulator.
pub struct HemicubeSampler<'a> {
    pub probe: &'a mut ProbeRenderer,
    pub accumulator: &'a mut IrradianceAccumulator,
    pub scene: &'a mut dyn ViewRenderer,
}

impl TexelSampler for HemicubeSampler<'_> {
    fn sample_texel(&mut self, item: &AtlasMapItem, point: &SurfacePoint) -> Result<[f32; 3]> {
        let probe = &mut *self.probe;
        let acc = &mut *self.accumulator;
        acc.begin();
        probe.render(point, &item.world, &mut *self.scene, |face, rect, pixels| {
            acc.accumulate(face, rect, pixels)
        })?;
        Ok(acc.resolve())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub texels: u32,
    pub faces_completed: u32,
    pub pass_completed: bool,
}

/// Progressive, pausable driver. Visits every atlas texel exactly once per
/// pass — row-major within a face, faces in registration order — then
/// rotates the bounce stack. A fixed texel count per tick keeps the
/// per-frame cost predictable; total bake time varies instead. There is no
/// terminal state: baking runs until the host stops ticking, and pausing is
/// simply not calling `tick`.
pub struct BakingScheduler {
    map: AtlasMap,
    current_face: usize,
    texels_per_tick: u32,
    rng: StdRng,
    passes: u64,
}

impl BakingScheduler {
    /// `seed` fixes the per-texel orientation randomization; pass `None`
    /// for OS entropy. Deterministic output needs a fixed seed.
    pub fn new(map: AtlasMap, texels_per_tick: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self {
            map,
            current_face: 0,
            texels_per_tick: texels_per_tick.max(1),
            rng,
            passes: 0,
        }
    }

    pub fn map(&self) -> &AtlasMap {
        &self.map
    }

    pub fn current_face(&self) -> usize {
        self.current_face
    }

    pub fn passes_completed(&self) -> u64 {
        self.passes
    }

    pub fn tick(&mut self, sampler: &mut dyn TexelSampler, stack: &mut TextureStack) -> Result<TickReport> {
        let mut report = TickReport::default();
        if self.map.is_empty() {
            return Ok(report);
        }

        for _ in 0..self.texels_per_tick {
            let item = self.map.item_mut(self.current_face);
            let tx = item.fill % item.rect.size_u;
            let ty = item.fill / item.rect.size_u;
            let mut point = item.map_texel_to_surface(tx, ty)?;
            // Fresh in-plane rotation per visit: repeated bounces average the
            // hemicube's discretization error instead of locking in one bias.
            point.rotate_in_plane(self.rng.random_range(0.0..std::f32::consts::TAU));

            let value = sampler.sample_texel(&*item, &point)?;
            let rect = item.rect;

            item.fill += 1;
            let face_done = item.fill >= rect.texel_count();
            if face_done {
                item.fill = 0;
            }

            write_texel(stack.target_mut(), &rect, tx, ty, value);
            report.texels += 1;

            if face_done {
                report.faces_completed += 1;
                self.current_face += 1;
                if self.current_face >= self.map.len() {
                    self.current_face = 0;
                    self.passes += 1;
                    report.pass_completed = true;
                    // A pass boundary ends the tick, so the stack never
                    // rotates mid-batch.
                    break;
                }
            }
        }

        if report.texels > 0 {
            // One dirty mark per batch of writes, not per texel.
            stack.target_mut().mark_dirty();
        }
        if report.pass_completed {
            stack.rotate();
            log::debug!("bounce pass {} complete, stack rotated", self.passes);
        }
        Ok(report)
    }
}
