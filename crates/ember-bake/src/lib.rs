//! Progressive irradiance atlas baking.
//!
//! The pipeline: [`AtlasMapper`] packs registered mesh faces into atlas
//! rects once; [`BakingScheduler`] walks every atlas texel a fixed number
//! per tick; [`ProbeRenderer`] captures a five-view hemicube at each texel
//! through the host's [`ViewRenderer`]; [`IrradianceAccumulator`] reduces
//! the hemicube to one texel and writes it back with seam replication; and
//! [`Compositor`] blends the finished factor layers at display time. A full
//! pass rotates the bounce stack so the completed output lights the next
//! pass.

pub mod accumulate;
pub mod atlas;
pub mod composite;
pub mod error;
pub mod probe;
pub mod scene;
pub mod scheduler;

use std::sync::Arc;

use ember_core::{AtlasTexture, Mesh, RenderContext, Transform};
use serde::{Deserialize, Serialize};

pub use accumulate::{write_texel, IrradianceAccumulator, WeightTable};
pub use atlas::{
    AtlasMap, AtlasMapItem, AtlasMapper, AtlasRect, AtlasSettings, Face, FaceBasis, SurfacePoint,
};
pub use composite::{Compositor, FactorLayer, OUTPUT_FORMAT};
pub use error::{BakeError, Result};
pub use probe::{face_camera, view_rect, HemicubeFace, ProbeRenderer, ViewRect, ViewRenderer};
pub use scene::{
    BakeScene, DirectionalLight, MaterialDesc, MaterialInput, MeshHandle, RegisteredMesh,
};
pub use scheduler::{BakingScheduler, HemicubeSampler, TexelSampler, TextureStack, TickReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BakeSettings {
    pub atlas: AtlasSettings,
    /// Hemicube edge resolution; must be even.
    pub probe_resolution: u32,
    /// Texels processed per tick. A constant count, not a time budget:
    /// per-frame cost is predictable, total bake time is not.
    pub texels_per_tick: u32,
    /// Layers in the bounce stack. 1 disables bounce feedback.
    pub bounce_depth: usize,
    pub probe_near: f32,
    pub probe_far: f32,
    /// Fixed seed for the per-texel orientation draw; `None` uses OS
    /// entropy. Tests inject a seed for reproducible output.
    pub seed: Option<u64>,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            atlas: AtlasSettings::default(),
            probe_resolution: 16,
            texels_per_tick: 32,
            bounce_depth: 2,
            probe_near: 0.05,
            probe_far: 100.0,
            seed: None,
        }
    }
}

/// Owns the whole baking pipeline behind one host-driven `tick` entry
/// point. Registration happens first, `finalize` freezes the atlas map,
/// then the host ticks every frame for as long as it wants the bake to
/// progress. There is no internal thread or callback; pausing is ceasing
/// to tick.
pub struct Baker {
    ctx: Arc<RenderContext>,
    settings: BakeSettings,
    scene: BakeScene,
    factors: Vec<FactorLayer>,
    active_factor: Option<usize>,
    state: Option<BakeState>,
}

struct BakeState {
    scheduler: BakingScheduler,
    stack: TextureStack,
    probe: ProbeRenderer,
    accumulator: IrradianceAccumulator,
}

impl Baker {
    pub fn new(ctx: Arc<RenderContext>, settings: BakeSettings) -> Self {
        Self {
            ctx,
            settings,
            scene: BakeScene::new(),
            factors: Vec::new(),
            active_factor: None,
            state: None,
        }
    }

    pub fn settings(&self) -> &BakeSettings {
        &self.settings
    }

    pub fn scene(&self) -> &BakeScene {
        &self.scene
    }

    pub fn is_finalized(&self) -> bool {
        self.state.is_some()
    }

    pub fn add_mesh(
        &mut self,
        mesh: Mesh,
        transform: Transform,
        material: MaterialInput,
        factor: Option<String>,
    ) -> Result<MeshHandle> {
        if self.state.is_some() {
            return Err(BakeError::Configuration(
                "geometry is finalized; register meshes before finalize()".into(),
            ));
        }
        self.scene.add_mesh(mesh, transform, material, factor)
    }

    pub fn add_light(&mut self, light: DirectionalLight) -> Result<()> {
        self.scene.add_light(light)
    }

    /// Builds the atlas map and the baking state. Runs once, after all
    /// geometry is registered; any structural problem surfaces here, before
    /// the first texel bakes.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Err(BakeError::Configuration("finalize() called twice".into()));
        }
        let mapper = AtlasMapper::new(self.settings.atlas)?;
        let map = mapper.build(&mut self.scene)?;
        log::info!(
            "bake finalized: {} faces, {} texels per pass",
            map.len(),
            map.total_texels()
        );

        let stack = TextureStack::new(self.settings.atlas.size, self.settings.bounce_depth, "atlas");
        let probe = ProbeRenderer::new(
            self.ctx.clone(),
            self.settings.probe_resolution,
            self.settings.probe_near,
            self.settings.probe_far,
        )?;
        let accumulator = IrradianceAccumulator::new(WeightTable::new(self.settings.probe_resolution));
        let scheduler = BakingScheduler::new(map, self.settings.texels_per_tick, self.settings.seed);

        self.state = Some(BakeState {
            scheduler,
            stack,
            probe,
            accumulator,
        });
        Ok(())
    }

    /// Bakes one batch of texels into the active target (the bounce stack,
    /// or a factor layer selected with `set_active_factor`), then pushes the
    /// target's dirty layers to the GPU.
    pub fn tick(&mut self, view: &mut dyn ViewRenderer) -> Result<TickReport> {
        let state = self.state.as_mut().ok_or_else(|| {
            BakeError::Configuration("finalize() must run before tick()".into())
        })?;
        let target = match self.active_factor {
            Some(i) => self.factors[i].stack_mut(),
            None => &mut state.stack,
        };
        let mut sampler = HemicubeSampler {
            probe: &mut state.probe,
            accumulator: &mut state.accumulator,
            scene: view,
        };
        let report = state.scheduler.tick(&mut sampler, target)?;
        target.upload(&self.ctx);
        Ok(report)
    }

    pub fn add_factor(&mut self, name: &str) -> Result<()> {
        if self.factors.iter().any(|f| f.name() == name) {
            return Err(BakeError::Configuration(format!(
                "factor '{name}' already exists"
            )));
        }
        self.factors
            .push(FactorLayer::new(name, self.settings.atlas.size));
        Ok(())
    }

    pub fn remove_factor(&mut self, name: &str) -> bool {
        let Some(index) = self.factors.iter().position(|f| f.name() == name) else {
            return false;
        };
        self.factors.remove(index);
        match self.active_factor {
            Some(active) if active == index => self.active_factor = None,
            Some(active) if active > index => self.active_factor = Some(active - 1),
            _ => {}
        }
        true
    }

    pub fn factor(&self, name: &str) -> Option<&FactorLayer> {
        self.factors.iter().find(|f| f.name() == name)
    }

    pub fn factors(&self) -> &[FactorLayer] {
        &self.factors
    }

    pub fn set_factor_multiplier(&mut self, name: &str, multiplier: f32) -> Result<()> {
        self.factors
            .iter_mut()
            .find(|f| f.name() == name)
            .map(|f| f.set_multiplier(multiplier))
            .ok_or_else(|| BakeError::Configuration(format!("unknown factor '{name}'")))
    }

    /// Redirects baking to a factor layer, or back to the bounce stack with
    /// `None`. Switching mid-pass leaves the previous target partially
    /// updated until the cursor comes around again.
    pub fn set_active_factor(&mut self, name: Option<&str>) -> Result<()> {
        let index = match name {
            None => None,
            Some(n) => Some(
                self.factors
                    .iter()
                    .position(|f| f.name() == n)
                    .ok_or_else(|| BakeError::Configuration(format!("unknown factor '{n}'")))?,
            ),
        };
        if let Some(state) = &self.state {
            let mid_pass = state.scheduler.current_face() != 0
                || state
                    .scheduler
                    .map()
                    .items()
                    .first()
                    .is_some_and(|i| i.fill != 0);
            if mid_pass {
                log::warn!("switching bake target mid-pass");
            }
        }
        self.active_factor = index;
        Ok(())
    }

    /// Current visible output of the bounce stack.
    pub fn output(&self) -> Option<&AtlasTexture> {
        self.state.as_ref().map(|s| s.stack.current())
    }

    pub fn stack(&self) -> Option<&TextureStack> {
        self.state.as_ref().map(|s| &s.stack)
    }

    pub fn atlas_map(&self) -> Option<&AtlasMap> {
        self.state.as_ref().map(|s| s.scheduler.map())
    }

    pub fn scheduler(&self) -> Option<&BakingScheduler> {
        self.state.as_ref().map(|s| &s.scheduler)
    }

    /// Blends the base output and every factor layer into the compositor's
    /// target.
    pub fn composite(&self, compositor: &mut Compositor) {
        let base = self.output();
        let factors: Vec<&FactorLayer> = self.factors.iter().collect();
        compositor.composite(base, &factors);
    }
}
