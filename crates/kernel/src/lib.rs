//! World Kernel: authoritative world state and the operations mutating it.
//!
//! # Invariants
//! - All state mutations flow through [`WorldOperation`]s executed against a
//!   [`WorldMutator`].
//! - A live object's ID is never in the [`ObjectManager`] free list.
//! - The fluid's in-flight step only touches its own buffers; everything
//!   else in [`WorldState`] is owned by the simulation thread.

pub mod fluid;
pub mod objects;
pub mod ops;
pub mod terrain;
pub mod world;

pub use fluid::{AsyncSubsystem, Fluid, FluidBlocks, FluidCell, FluidSource, StepCompletion};
pub use objects::{IdRegion, Object, ObjectError, ObjectManager};
pub use ops::{Brush, OperationDelta, OperationFailure, WorldOperation, WorldOperationResult};
pub use terrain::Terrain;
pub use world::{WorldMutator, WorldState};

/// Returns the crate name and version for diagnostics.
pub fn crate_info() -> &'static str {
    "worldsim-kernel v0.1.0"
}
