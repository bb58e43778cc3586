use worldsim_common::TerrainRect;

/// Height of freshly created terrain.
pub const DEFAULT_HEIGHT: f32 = 20.0;
pub const MIN_HEIGHT: f32 = 0.0;
pub const MAX_HEIGHT: f32 = 500.0;

/// Square height grid, row-major (`y * size + x`).
///
/// Mutations report the rectangle they touched through
/// [`Terrain::notify_heightmap_changed`]; the union of all rectangles since
/// the last [`Terrain::take_dirty`] is kept so dependent subsystems can
/// refresh their copies.
#[derive(Debug, Clone)]
pub struct Terrain {
    size: u32,
    heights: Vec<f32>,
    dirty: TerrainRect,
}

impl Terrain {
    pub fn new(size: u32) -> Self {
        Self::with_height(size, DEFAULT_HEIGHT)
    }

    pub fn with_height(size: u32, height: f32) -> Self {
        let cells = size as usize * size as usize;
        Self {
            size,
            heights: vec![height; cells],
            dirty: TerrainRect::default(),
        }
    }

    /// Cells per axis.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Raw mutable access. Callers report what they touched via
    /// [`Terrain::notify_heightmap_changed`].
    pub fn heights_mut(&mut self) -> &mut [f32] {
        &mut self.heights
    }

    pub fn height_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.size || y >= self.size {
            return None;
        }
        Some(self.heights[self.index(x, y)])
    }

    pub fn set_height(&mut self, x: u32, y: u32, height: f32) {
        if x >= self.size || y >= self.size {
            return;
        }
        let idx = self.index(x, y);
        self.heights[idx] = height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        self.notify_heightmap_changed(TerrainRect::new(x, y, x + 1, y + 1));
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.size as usize + x as usize
    }

    pub fn notify_heightmap_changed(&mut self, rect: TerrainRect) {
        let rect = rect.clipped(self.size);
        self.dirty = self.dirty.union(&rect);
    }

    /// Whole-map change, e.g. after regenerating the terrain.
    pub fn notify_all_changed(&mut self) {
        self.dirty = TerrainRect::full(self.size);
    }

    pub fn dirty(&self) -> TerrainRect {
        self.dirty
    }

    /// Return and reset the accumulated dirty rectangle.
    pub fn take_dirty(&mut self) -> TerrainRect {
        std::mem::take(&mut self.dirty)
    }

    /// Bilinearly interpolated height at a fractional position. Returns
    /// `None` outside the grid.
    pub fn lookup_height(&self, x: f32, y: f32) -> Option<f32> {
        if self.size == 0 {
            return None;
        }
        let max = (self.size - 1) as f32;
        if !(0.0..=max).contains(&x) || !(0.0..=max).contains(&y) {
            return None;
        }
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.size - 1);
        let y1 = (y0 + 1).min(self.size - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let h = |x, y| self.heights[self.index(x, y)];
        let top = interp_linear(h(x0, y0), h(x1, y0), fx);
        let bottom = interp_linear(h(x0, y1), h(x1, y1), fx);
        Some(interp_linear(top, bottom, fy))
    }
}

/// Linear interpolation from `a` (t = 0) to `b` (t = 1).
pub fn interp_linear(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
