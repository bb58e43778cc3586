//! Double-buffered fluid state stepped on a worker thread.
//!
//! Operations write the back buffer between steps. [`Fluid::start`] hands
//! the back buffer to the worker, which advances it and publishes a copy to
//! the front buffer that observers read. [`Fluid::wait_for`] blocks until the
//! step in flight has been published.

use crossbeam_channel::{Sender, unbounded};
use glam::Vec2;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use worldsim_common::{ObjectId, TerrainRect};

use crate::impl_object;
use crate::objects::ObjectManager;
use crate::terrain::Terrain;

/// A subsystem advancing asynchronously between simulation frames.
///
/// `start` must not block; `wait_for` blocks until the step begun by the
/// last `start` has completed and returns immediately if none is in flight.
pub trait AsyncSubsystem {
    fn start(&mut self);

    fn wait_for(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FluidCell {
    /// Copy of the terrain height below the cell.
    pub terrain_height: f32,
    pub fluid_height: f32,
}

/// Square grid of fluid cells, row-major.
#[derive(Debug, Clone, Default)]
pub struct FluidBlocks {
    size: u32,
    cells: Vec<FluidCell>,
}

impl FluidBlocks {
    pub fn from_terrain(terrain: &Terrain) -> Self {
        Self {
            size: terrain.size(),
            cells: terrain
                .heights()
                .iter()
                .map(|h| FluidCell {
                    terrain_height: *h,
                    fluid_height: 0.0,
                })
                .collect(),
        }
    }

    pub fn cells_per_axis(&self) -> u32 {
        self.size
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<&FluidCell> {
        if x >= self.size || y >= self.size {
            return None;
        }
        self.cells.get(y as usize * self.size as usize + x as usize)
    }

    pub fn cell_mut(&mut self, x: u32, y: u32) -> Option<&mut FluidCell> {
        if x >= self.size || y >= self.size {
            return None;
        }
        self.cells.get_mut(y as usize * self.size as usize + x as usize)
    }

    pub fn cells(&self) -> &[FluidCell] {
        &self.cells
    }

    /// Sum of all fluid heights.
    pub fn total_volume(&self) -> f32 {
        self.cells.iter().map(|c| c.fluid_height).sum()
    }
}

/// A point which keeps filling the fluid around it up to an absolute height.
#[derive(Debug, Clone)]
pub struct FluidSource {
    pub id: ObjectId,
    pub pos: Vec2,
    pub radius: f32,
    pub absolute_height: f32,
    /// Maximum amount of fluid added per step.
    pub capacity: f32,
}

impl_object!(FluidSource);

/// Snapshot of a source handed to the worker.
#[derive(Debug, Clone)]
struct MappedSource {
    pos: Vec2,
    radius: f32,
    absolute_height: f32,
    capacity: f32,
    rect: TerrainRect,
}

impl MappedSource {
    fn new(source: &FluidSource, size: u32) -> Self {
        let x0 = (source.pos.x - source.radius).floor().max(0.0) as u32;
        let y0 = (source.pos.y - source.radius).floor().max(0.0) as u32;
        let x1 = ((source.pos.x + source.radius).ceil().max(-1.0) + 1.0) as u32;
        let y1 = ((source.pos.y + source.radius).ceil().max(-1.0) + 1.0) as u32;
        Self {
            pos: source.pos,
            radius: source.radius,
            absolute_height: source.absolute_height,
            capacity: source.capacity,
            rect: TerrainRect::new(x0, y0, x1, y1).clipped(size),
        }
    }
}

struct StepJob {
    sources: Vec<MappedSource>,
    ocean_level: f32,
}

#[derive(Default)]
struct StepProgress {
    started: u64,
    finished: u64,
}

struct FluidShared {
    back: Mutex<FluidBlocks>,
    front: RwLock<FluidBlocks>,
    progress: Mutex<StepProgress>,
    finished: Condvar,
}

/// Cloneable handle waiting for the fluid step in flight.
///
/// Lets a caller wait for the step without borrowing the [`Fluid`], e.g.
/// while the fluid itself sits behind a lock the caller must not take yet.
#[derive(Clone)]
pub struct StepCompletion {
    shared: Arc<FluidShared>,
}

impl StepCompletion {
    pub fn wait_for(&self) {
        let mut progress = self.shared.progress.lock();
        while progress.finished < progress.started {
            self.shared.finished.wait(&mut progress);
        }
    }

    pub fn is_idle(&self) -> bool {
        let progress = self.shared.progress.lock();
        progress.finished == progress.started
    }

    /// Number of steps published so far.
    pub fn steps_finished(&self) -> u64 {
        self.shared.progress.lock().finished
    }
}

pub struct Fluid {
    size: u32,
    ocean_level: f32,
    source_ids: Vec<ObjectId>,
    mapped: Vec<MappedSource>,
    sources_invalidated: bool,
    shared: Arc<FluidShared>,
    jobs: Option<Sender<StepJob>>,
    worker: Option<JoinHandle<()>>,
}

impl Fluid {
    /// Create an empty fluid on top of `terrain` and spawn its worker.
    pub fn new(terrain: &Terrain) -> std::io::Result<Self> {
        let blocks = FluidBlocks::from_terrain(terrain);
        let shared = Arc::new(FluidShared {
            front: RwLock::new(blocks.clone()),
            back: Mutex::new(blocks),
            progress: Mutex::new(StepProgress::default()),
            finished: Condvar::new(),
        });

        let (jobs, rx) = unbounded::<StepJob>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("fluid-step".into())
            .spawn(move || {
                for job in rx {
                    let _span = tracing::trace_span!("fluid_step").entered();
                    {
                        let mut back = worker_shared.back.lock();
                        run_step(&mut back, &job);
                        worker_shared.front.write().clone_from(&back);
                    }
                    let mut progress = worker_shared.progress.lock();
                    progress.finished += 1;
                    worker_shared.finished.notify_all();
                }
            })?;

        Ok(Self {
            size: terrain.size(),
            ocean_level: 0.0,
            source_ids: Vec::new(),
            mapped: Vec::new(),
            sources_invalidated: false,
            shared,
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    pub fn completion(&self) -> StepCompletion {
        StepCompletion {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn cells_per_axis(&self) -> u32 {
        self.size
    }

    /// Published state of the last completed step.
    pub fn front(&self) -> RwLockReadGuard<'_, FluidBlocks> {
        self.shared.front.read()
    }

    /// Writable state for the next step. Waits for the step in flight.
    pub fn blocks_mut(&mut self) -> MutexGuard<'_, FluidBlocks> {
        self.wait_for();
        self.shared.back.lock()
    }

    pub fn ocean_level(&self) -> f32 {
        self.ocean_level
    }

    pub fn set_ocean_level(&mut self, level: f32) {
        self.ocean_level = level;
    }

    /// Remove all fluid.
    pub fn reset(&mut self) {
        let mut blocks = self.blocks_mut();
        for cell in &mut blocks.cells {
            cell.fluid_height = 0.0;
        }
    }

    pub fn sources(&self) -> &[ObjectId] {
        &self.source_ids
    }

    pub fn add_source(&mut self, id: ObjectId) {
        if !self.source_ids.contains(&id) {
            self.source_ids.push(id);
        }
        self.sources_invalidated = true;
    }

    pub fn remove_source(&mut self, id: ObjectId) {
        self.source_ids.retain(|s| *s != id);
        self.sources_invalidated = true;
    }

    /// Mark the mapped source parameters as stale after a source changed.
    pub fn invalidate_sources(&mut self) {
        self.sources_invalidated = true;
    }

    pub fn sources_invalidated(&self) -> bool {
        self.sources_invalidated
    }

    /// Refresh the source parameters used by the worker from `objects`.
    /// Sources whose object is gone are dropped.
    pub fn map_sources(&mut self, objects: &ObjectManager) {
        let size = self.size;
        self.source_ids
            .retain(|id| objects.get_safe::<FluidSource>(*id).is_some());
        self.mapped = self
            .source_ids
            .iter()
            .filter_map(|id| objects.get_safe::<FluidSource>(*id))
            .map(|source| MappedSource::new(source, size))
            .collect();
        self.sources_invalidated = false;
    }

    /// Copy the terrain heights inside `rect` into the fluid cells.
    pub fn terrain_updated(&mut self, rect: TerrainRect, terrain: &Terrain) {
        let rect = rect.clipped(self.size.min(terrain.size()));
        if rect.is_empty() {
            return;
        }
        let mut blocks = self.blocks_mut();
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                if let (Some(cell), Some(h)) = (blocks.cell_mut(x, y), terrain.height_at(x, y)) {
                    cell.terrain_height = h;
                }
            }
        }
    }
}

impl AsyncSubsystem for Fluid {
    fn start(&mut self) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        let job = StepJob {
            sources: self.mapped.clone(),
            ocean_level: self.ocean_level,
        };
        let mut progress = self.shared.progress.lock();
        progress.started += 1;
        if jobs.send(job).is_err() {
            tracing::error!("fluid worker is gone; step skipped");
            progress.finished = progress.started;
        }
    }

    fn wait_for(&self) {
        self.completion().wait_for();
    }
}

impl Drop for Fluid {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("fluid worker panicked");
            }
        }
    }
}

fn run_step(blocks: &mut FluidBlocks, job: &StepJob) {
    for source in &job.sources {
        let mut remaining = source.capacity;
        'fill: for y in source.rect.y0..source.rect.y1 {
            for x in source.rect.x0..source.rect.x1 {
                if remaining <= 0.0 {
                    break 'fill;
                }
                if Vec2::new(x as f32, y as f32).distance(source.pos) > source.radius {
                    continue;
                }
                let Some(cell) = blocks.cell_mut(x, y) else {
                    continue;
                };
                let deficit = source.absolute_height - cell.terrain_height - cell.fluid_height;
                if deficit <= 0.0 {
                    continue;
                }
                let added = deficit.min(remaining);
                cell.fluid_height += added;
                remaining -= added;
            }
        }
    }

    let size = blocks.size;
    if size > 0 {
        let last = size - 1;
        for y in 0..size {
            for x in 0..size {
                if x != 0 && y != 0 && x != last && y != last {
                    continue;
                }
                if let Some(cell) = blocks.cell_mut(x, y) {
                    let target = job.ocean_level - cell.terrain_height;
                    if cell.fluid_height < target {
                        cell.fluid_height = target;
                    }
                }
            }
        }
    }

    for cell in &mut blocks.cells {
        if cell.fluid_height.is_nan() || cell.fluid_height < 0.0 {
            cell.fluid_height = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(size: u32, height: f32) -> Terrain {
        Terrain::with_height(size, height)
    }

    #[test]
    fn start_publishes_back_buffer() {
        let terrain = flat(8, 0.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        fluid.blocks_mut().cell_mut(3, 3).unwrap().fluid_height = 2.5;
        assert_eq!(fluid.front().cell(3, 3).unwrap().fluid_height, 0.0);

        fluid.start();
        fluid.wait_for();
        assert_eq!(fluid.front().cell(3, 3).unwrap().fluid_height, 2.5);
        assert_eq!(fluid.completion().steps_finished(), 1);
        assert!(fluid.completion().is_idle());
    }

    #[test]
    fn wait_without_step_returns() {
        let terrain = flat(4, 0.0);
        let fluid = Fluid::new(&terrain).unwrap();
        fluid.wait_for();
        assert!(fluid.completion().is_idle());
    }

    #[test]
    fn source_fills_up_to_absolute_height() {
        let terrain = flat(16, 5.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        let mut objects = ObjectManager::new();
        let id = objects
            .allocate(|id| FluidSource {
                id,
                pos: Vec2::new(8.0, 8.0),
                radius: 1.0,
                absolute_height: 7.0,
                capacity: 100.0,
            })
            .id;
        fluid.add_source(id);
        assert!(fluid.sources_invalidated());
        fluid.map_sources(&objects);
        assert!(!fluid.sources_invalidated());

        fluid.start();
        fluid.wait_for();
        let front = fluid.front();
        assert_eq!(front.cell(8, 8).unwrap().fluid_height, 2.0);
        assert_eq!(front.cell(9, 8).unwrap().fluid_height, 2.0);
        assert_eq!(front.cell(9, 9).unwrap().fluid_height, 0.0);
        // 5 cells within radius 1 of the centre
        assert_eq!(front.total_volume(), 10.0);
    }

    #[test]
    fn source_respects_capacity() {
        let terrain = flat(16, 0.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        let mut objects = ObjectManager::new();
        let id = objects
            .allocate(|id| FluidSource {
                id,
                pos: Vec2::new(4.0, 4.0),
                radius: 2.0,
                absolute_height: 10.0,
                capacity: 3.0,
            })
            .id;
        fluid.add_source(id);
        fluid.map_sources(&objects);
        fluid.start();
        fluid.wait_for();
        assert_eq!(fluid.front().total_volume(), 3.0);
    }

    #[test]
    fn killed_sources_are_unmapped() {
        let terrain = flat(8, 0.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        let mut objects = ObjectManager::new();
        let id = objects
            .allocate(|id| FluidSource {
                id,
                pos: Vec2::ZERO,
                radius: 1.0,
                absolute_height: 1.0,
                capacity: 1.0,
            })
            .id;
        fluid.add_source(id);
        objects.kill(id);
        fluid.map_sources(&objects);
        assert!(fluid.sources().is_empty());
    }

    #[test]
    fn ocean_fills_border_only() {
        let terrain = flat(6, 1.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        fluid.set_ocean_level(3.0);
        fluid.start();
        fluid.wait_for();
        let front = fluid.front();
        assert_eq!(front.cell(0, 2).unwrap().fluid_height, 2.0);
        assert_eq!(front.cell(5, 5).unwrap().fluid_height, 2.0);
        assert_eq!(front.cell(2, 2).unwrap().fluid_height, 0.0);
    }

    #[test]
    fn reset_clears_fluid() {
        let terrain = flat(4, 0.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        fluid.blocks_mut().cell_mut(1, 1).unwrap().fluid_height = 4.0;
        fluid.start();
        fluid.reset();
        fluid.start();
        fluid.wait_for();
        assert_eq!(fluid.front().total_volume(), 0.0);
    }

    #[test]
    fn terrain_updates_propagate() {
        let mut terrain = flat(4, 0.0);
        let mut fluid = Fluid::new(&terrain).unwrap();
        terrain.set_height(2, 1, 9.0);
        let dirty = terrain.take_dirty();
        fluid.terrain_updated(dirty, &terrain);
        assert_eq!(fluid.blocks_mut().cell(2, 1).unwrap().terrain_height, 9.0);
    }
}
