use ember_core::AtlasTexture;

use crate::atlas::AtlasRect;
use crate::probe::{HemicubeFace, ViewRect};

/// Per-pixel solid-angle weights for one probe resolution. Built once and
/// shared read-only across all samples. Entries carry the 1/R^2 pixel-area
/// factor, so the table total is invariant across resolutions.
pub struct WeightTable {
    resolution: u32,
    weights: Vec<f32>,
    full_total: f32,
    half_total: f32,
}

impl WeightTable {
    pub fn new(resolution: u32) -> Self {
        let r = resolution as usize;
        let inv_area = 1.0 / (r * r) as f32;
        let mut weights = Vec::with_capacity(r * r);
        let mut full_total = 0.0;
        let mut half_total = 0.0;
        for y in 0..r {
            let dy = (y as f32 + 0.5) / r as f32 - 0.5;
            for x in 0..r {
                let dx = (x as f32 + 0.5) / r as f32 - 0.5;
                let w = inv_area
                    / (1.0 + (2.0 * dx) * (2.0 * dx) + (2.0 * dy) * (2.0 * dy)).sqrt();
                weights.push(w);
                full_total += w;
                if y < r / 2 {
                    half_total += w;
                }
            }
        }
        Self {
            resolution,
            weights,
            full_total,
            half_total,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.weights[(y * self.resolution + x) as usize]
    }

    /// Sum over the full square sub-image.
    pub fn full_total(&self) -> f32 {
        self.full_total
    }

    /// Sum over the above-horizon half used by each side strip.
    pub fn half_total(&self) -> f32 {
        self.half_total
    }

    /// Total weight of one whole hemicube: the up square plus four strips.
    pub fn hemicube_total(&self) -> f32 {
        self.full_total + 4.0 * self.half_total
    }
}

/// Reduces one hemicube's pixels to a single texel color.
pub struct IrradianceAccumulator {
    table: WeightTable,
    sum: [f32; 3],
    weight: f32,
}

impl IrradianceAccumulator {
    pub fn new(table: WeightTable) -> Self {
        Self {
            table,
            sum: [0.0; 3],
            weight: 0.0,
        }
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    pub fn begin(&mut self) {
        self.sum = [0.0; 3];
        self.weight = 0.0;
    }

    /// Folds one sub-view into the running sum. Strip pixels map onto the
    /// top-half rows of the weight table; the strip's own row index is the
    /// table row, since the half frustum rendered exactly that half.
    pub fn accumulate(&mut self, face: HemicubeFace, rect: ViewRect, pixels: &[f32]) {
        debug_assert_eq!(rect.width, self.table.resolution);
        debug_assert_eq!(
            rect.height,
            if face.is_side() {
                self.table.resolution / 2
            } else {
                self.table.resolution
            }
        );
        debug_assert_eq!(pixels.len(), (rect.width * rect.height * 4) as usize);

        for y in 0..rect.height {
            for x in 0..rect.width {
                let w = self.table.at(x, y);
                let i = ((y * rect.width + x) * 4) as usize;
                self.sum[0] += w * pixels[i];
                self.sum[1] += w * pixels[i + 1];
                self.sum[2] += w * pixels[i + 2];
                self.weight += w;
            }
        }
    }

    /// Weighted average over everything accumulated since `begin`. Dividing
    /// by the accumulated weight (not the raw pixel count, not 1) keeps the
    /// average exposure invariant to probe resolution: a uniform radiance
    /// field resolves to exactly that color at any resolution.
    pub fn resolve(&self) -> [f32; 3] {
        if self.weight <= 0.0 {
            return [0.0; 3];
        }
        [
            self.sum[0] / self.weight,
            self.sum[1] / self.weight,
            self.sum[2] / self.weight,
        ]
    }
}

/// Writes a resolved texel into the atlas buffer at its absolute index, and
/// replicates it into the reserved bleed border when the texel sits on the
/// face's leading edges, so bilinear filtering never reads a stale border.
/// Does not touch the dirty flag; the scheduler marks the texture once per
/// tick batch.
pub fn write_texel(atlas: &mut AtlasTexture, rect: &AtlasRect, tx: u32, ty: u32, rgb: [f32; 3]) {
    let x = rect.left + tx;
    let y = rect.top + ty;
    atlas.write_rgb(x, y, rgb);
    if tx == 0 {
        atlas.write_rgb(x - 1, y, rgb);
    }
    if ty == 0 {
        atlas.write_rgb(x, y - 1, rgb);
    }
    if tx == 0 && ty == 0 {
        atlas.write_rgb(x - 1, y - 1, rgb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::view_rect;

    #[test]
    fn table_total_is_resolution_invariant() {
        let totals: Vec<f32> = [8u32, 16, 32, 64]
            .iter()
            .map(|&r| WeightTable::new(r).hemicube_total())
            .collect();
        for t in &totals {
            assert!(*t > 1.0 && *t < 3.0, "implausible total {t}");
        }
        for pair in totals.windows(2) {
            assert!(
                (pair[0] - pair[1]).abs() < 5e-3,
                "totals drifted: {totals:?}"
            );
        }
    }

    fn uniform_hemicube(acc: &mut IrradianceAccumulator, color: [f32; 3]) {
        let r = acc.table().resolution();
        acc.begin();
        for face in HemicubeFace::ALL {
            let rect = view_rect(face, r);
            let mut pixels = Vec::with_capacity((rect.width * rect.height * 4) as usize);
            for _ in 0..rect.width * rect.height {
                pixels.extend_from_slice(&[color[0], color[1], color[2], 1.0]);
            }
            acc.accumulate(face, rect, &pixels);
        }
    }

    #[test]
    fn uniform_field_resolves_to_itself_at_any_resolution() {
        for r in [8u32, 32] {
            let mut acc = IrradianceAccumulator::new(WeightTable::new(r));
            uniform_hemicube(&mut acc, [0.2, 0.5, 0.9]);
            let out = acc.resolve();
            assert!((out[0] - 0.2).abs() < 1e-4, "{out:?} at r={r}");
            assert!((out[1] - 0.5).abs() < 1e-4);
            assert!((out[2] - 0.9).abs() < 1e-4);
        }
    }

    #[test]
    fn empty_accumulation_resolves_to_black() {
        let mut acc = IrradianceAccumulator::new(WeightTable::new(8));
        acc.begin();
        assert_eq!(acc.resolve(), [0.0; 3]);
    }

    #[test]
    fn center_pixels_outweigh_corners() {
        let table = WeightTable::new(8);
        assert!(table.at(4, 4) > table.at(0, 0));
        assert!(table.at(0, 0) > 0.0);
    }

    #[test]
    fn leading_edge_texels_bleed_into_the_border() {
        let mut atlas = AtlasTexture::new(32, 32, "test");
        let rect = AtlasRect {
            left: 4,
            top: 4,
            size_u: 4,
            size_v: 4,
        };
        let red = [1.0, 0.0, 0.0];
        write_texel(&mut atlas, &rect, 0, 0, red);
        assert_eq!(atlas.rgb_at(4, 4), red);
        assert_eq!(atlas.rgb_at(3, 4), red);
        assert_eq!(atlas.rgb_at(4, 3), red);
        assert_eq!(atlas.rgb_at(3, 3), red);

        let green = [0.0, 1.0, 0.0];
        write_texel(&mut atlas, &rect, 0, 2, green);
        assert_eq!(atlas.rgb_at(3, 6), green);
        assert_eq!(atlas.rgb_at(4, 6), green);

        // Interior texels leave the border alone.
        let blue = [0.0, 0.0, 1.0];
        write_texel(&mut atlas, &rect, 2, 2, blue);
        assert_eq!(atlas.rgb_at(6, 6), blue);
        assert_eq!(atlas.rgb_at(3, 6), green);

        // A later edge write overwrites the replicated value, so the border
        // always matches its interior neighbor's latest value.
        write_texel(&mut atlas, &rect, 0, 0, blue);
        assert_eq!(atlas.rgb_at(3, 3), blue);
        assert_eq!(atlas.rgb_at(3, 4), blue);
    }
}
