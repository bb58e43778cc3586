use crate::fluid::Fluid;
use crate::objects::ObjectManager;
use crate::terrain::Terrain;

/// The authoritative world: terrain, fluid and the object graph.
///
/// Only the simulation thread mutates it, and only while holding the
/// interframe lock. Observers read it through a shared guard.
pub struct WorldState {
    terrain: Terrain,
    fluid: Fluid,
    objects: ObjectManager,
}

impl WorldState {
    /// Flat terrain of `terrain_size` cells per axis, no fluid, no objects.
    pub fn new(terrain_size: u32) -> std::io::Result<Self> {
        let terrain = Terrain::new(terrain_size);
        let fluid = Fluid::new(&terrain)?;
        Ok(Self {
            terrain,
            fluid,
            objects: ObjectManager::new(),
        })
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn fluid(&self) -> &Fluid {
        &self.fluid
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    /// Deterministic maintenance run after each operation batch.
    ///
    /// Forwards terrain changes to the fluid and refreshes the fluid's view
    /// of its sources if any of them changed.
    pub fn post_step(&mut self) {
        let dirty = self.terrain.take_dirty();
        if !dirty.is_empty() {
            tracing::trace!(?dirty, "forwarding terrain change to fluid");
            self.fluid.terrain_updated(dirty, &self.terrain);
        }
        if self.fluid.sources_invalidated() {
            self.fluid.map_sources(&self.objects);
        }
    }

    pub fn fluid_mut(&mut self) -> &mut Fluid {
        &mut self.fluid
    }
}

impl std::fmt::Debug for WorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldState")
            .field("terrain_size", &self.terrain.size())
            .field("objects", &self.objects)
            .field("fluid_sources", &self.fluid.sources().len())
            .finish()
    }
}

/// Mutation surface handed to operations.
///
/// Wraps an exclusive borrow of the [`WorldState`] so the set of things an
/// operation may touch is explicit.
pub struct WorldMutator<'a> {
    state: &'a mut WorldState,
}

impl<'a> WorldMutator<'a> {
    pub fn new(state: &'a mut WorldState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &WorldState {
        self.state
    }

    pub fn terrain_mut(&mut self) -> &mut Terrain {
        &mut self.state.terrain
    }

    pub fn fluid_mut(&mut self) -> &mut Fluid {
        &mut self.state.fluid
    }

    pub fn objects_mut(&mut self) -> &mut ObjectManager {
        &mut self.state.objects
    }
}
