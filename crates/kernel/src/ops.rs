//! World operations: serializable commands mutating the [`WorldState`].
//!
//! # Invariants
//! - An operation executes at most once, on the simulation thread.
//! - Execution is a pure function of the operation and the world state.
//! - Domain failures are returned inside [`WorldOperationResult`], never as
//!   panics, and never abort the rest of the batch.
//!
//! [`WorldState`]: crate::world::WorldState

use glam::Vec2;
use serde::{Deserialize, Serialize};
use worldsim_common::{ObjectId, TerrainRect};

use crate::fluid::FluidSource;
use crate::terrain::{MAX_HEIGHT, MIN_HEIGHT, Terrain, interp_linear};
use crate::world::WorldMutator;

/// Neighbourhood radius used by [`WorldOperation::TerraformSmooth`].
pub const SMOOTH_WINDOW: u32 = 3;

/// A square density map centred on a point of the terrain.
///
/// Cell `(x, y)` of the map lands on terrain cell
/// `(round(xc - size/2) + x, round(yc - size/2) + y)`. Cells off the terrain
/// are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brush {
    pub xc: f32,
    pub yc: f32,
    pub size: u32,
    /// Row-major, `size * size` entries.
    pub density_map: Vec<f32>,
    pub strength: f32,
}

impl Brush {
    /// Brush with a density of 1 everywhere.
    pub fn uniform(xc: f32, yc: f32, size: u32, strength: f32) -> Self {
        Self {
            xc,
            yc,
            size,
            density_map: vec![1.0; size as usize * size as usize],
            strength,
        }
    }

    fn validate(&self) -> Result<(), OperationFailure> {
        if self.size == 0 {
            return Err(OperationFailure::InvalidArgument("brush size is zero".into()));
        }
        if !self.xc.is_finite() || !self.yc.is_finite() {
            return Err(OperationFailure::InvalidArgument(
                "brush centre is not finite".into(),
            ));
        }
        let expected = self.size as usize * self.size as usize;
        if self.density_map.len() != expected {
            return Err(OperationFailure::InvalidArgument(format!(
                "density map has {} entries, expected {expected}",
                self.density_map.len()
            )));
        }
        Ok(())
    }

    /// Terrain coordinates of the brush's top-left cell. Saturates for
    /// centres far off the map.
    fn base(&self) -> (i64, i64) {
        let radius = self.size as f32 / 2.0;
        (
            (self.xc - radius).round() as i64,
            (self.yc - radius).round() as i64,
        )
    }

    /// Footprint clipped to a grid of `grid` cells per axis.
    fn footprint(&self, grid: u32) -> Result<TerrainRect, OperationFailure> {
        self.validate()?;
        let (xbase, ybase) = self.base();
        let size = self.size as i64;
        let grid = grid as i64;
        let clip = |v: i64| v.clamp(0, grid) as u32;
        let rect = TerrainRect::new(
            clip(xbase),
            clip(ybase),
            clip(xbase.saturating_add(size)),
            clip(ybase.saturating_add(size)),
        );
        if rect.is_empty() {
            return Err(OperationFailure::OutOfBounds);
        }
        Ok(rect)
    }

    /// Call `paint(x, y, strength * density)` for every brush cell on the
    /// grid, row by row. Returns the touched rectangle.
    fn for_each_cell<F>(&self, grid: u32, mut paint: F) -> Result<TerrainRect, OperationFailure>
    where
        F: FnMut(u32, u32, f32),
    {
        let rect = self.footprint(grid)?;
        let (xbase, ybase) = self.base();
        let size = self.size as usize;
        for y in rect.y0..rect.y1 {
            let by = (y as i64 - ybase) as usize;
            for x in rect.x0..rect.x1 {
                let bx = (x as i64 - xbase) as usize;
                paint(x, y, self.strength * self.density_map[by * size + bx]);
            }
        }
        Ok(rect)
    }
}

/// Why an operation did not apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum OperationFailure {
    #[error("no matching object with id {0}")]
    NoSuchObject(ObjectId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation lies entirely outside the world")]
    OutOfBounds,
}

/// What an operation changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OperationDelta {
    None,
    Terrain(TerrainRect),
    Fluid(TerrainRect),
    Created(ObjectId),
    Updated(ObjectId),
    Destroyed(ObjectId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldOperationResult {
    Success(OperationDelta),
    Failure(OperationFailure),
}

impl WorldOperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<OperationDelta, OperationFailure>> for WorldOperationResult {
    fn from(result: Result<OperationDelta, OperationFailure>) -> Self {
        match result {
            Ok(delta) => Self::Success(delta),
            Err(failure) => Self::Failure(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldOperation {
    /// Add `strength * density` to each cell.
    TerraformRaise { brush: Brush },
    /// Move each cell toward `reference_height` by `strength * density`.
    TerraformLevel { brush: Brush, reference_height: f32 },
    /// Move each cell toward a Parzen-weighted average of its neighbourhood.
    TerraformSmooth { brush: Brush },
    /// Move each cell toward the linear ramp from `source` to `destination`.
    TerraformRamp {
        brush: Brush,
        source_point: Vec2,
        source_height: f32,
        destination_point: Vec2,
        destination_height: f32,
    },
    /// Add `strength * density` of fluid, never going below zero.
    FluidRaise { brush: Brush },
    /// Create a fluid source. A null `object_id` picks the lowest free ID.
    FluidSourceCreate {
        object_id: ObjectId,
        pos: Vec2,
        radius: f32,
        absolute_height: f32,
        capacity: f32,
    },
    FluidSourceMove { object_id: ObjectId, pos: Vec2 },
    FluidSourceSetHeight { object_id: ObjectId, absolute_height: f32 },
    FluidSourceSetCapacity { object_id: ObjectId, capacity: f32 },
    FluidSourceDestroy { object_id: ObjectId },
    FluidOceanLevelSetHeight { height: f32 },
    FluidReset,
}

impl WorldOperation {
    /// Apply the operation to the world.
    pub fn execute(&self, world: &mut WorldMutator<'_>) -> WorldOperationResult {
        self.apply(world).into()
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TerraformRaise { .. } => "terraform_raise",
            Self::TerraformLevel { .. } => "terraform_level",
            Self::TerraformSmooth { .. } => "terraform_smooth",
            Self::TerraformRamp { .. } => "terraform_ramp",
            Self::FluidRaise { .. } => "fluid_raise",
            Self::FluidSourceCreate { .. } => "fluid_source_create",
            Self::FluidSourceMove { .. } => "fluid_source_move",
            Self::FluidSourceSetHeight { .. } => "fluid_source_set_height",
            Self::FluidSourceSetCapacity { .. } => "fluid_source_set_capacity",
            Self::FluidSourceDestroy { .. } => "fluid_source_destroy",
            Self::FluidOceanLevelSetHeight { .. } => "fluid_ocean_level_set_height",
            Self::FluidReset => "fluid_reset",
        }
    }

    fn apply(&self, world: &mut WorldMutator<'_>) -> Result<OperationDelta, OperationFailure> {
        match self {
            Self::TerraformRaise { brush } => {
                paint_terrain(world.terrain_mut(), brush, |h, d, _, _| h + d)
            }
            Self::TerraformLevel {
                brush,
                reference_height,
            } => paint_terrain(world.terrain_mut(), brush, |h, d, _, _| {
                interp_linear(h, *reference_height, d)
            }),
            Self::TerraformSmooth { brush } => smooth_terrain(world.terrain_mut(), brush),
            Self::TerraformRamp {
                brush,
                source_point,
                source_height,
                destination_point,
                destination_height,
            } => {
                let span = *destination_point - *source_point;
                let length = span.length();
                if length < 1.0 {
                    return Err(OperationFailure::InvalidArgument(
                        "ramp end points are less than one cell apart".into(),
                    ));
                }
                let direction = span / length;
                paint_terrain(world.terrain_mut(), brush, |h, d, x, y| {
                    let along = (Vec2::new(x as f32, y as f32) - *source_point).dot(direction);
                    let t = (along / length).clamp(0.0, 1.0);
                    interp_linear(h, interp_linear(*source_height, *destination_height, t), d)
                })
            }
            Self::FluidRaise { brush } => {
                let fluid = world.fluid_mut();
                let grid = fluid.cells_per_axis();
                let mut blocks = fluid.blocks_mut();
                let rect = brush.for_each_cell(grid, |x, y, d| {
                    if let Some(cell) = blocks.cell_mut(x, y) {
                        cell.fluid_height = (cell.fluid_height + d).max(0.0);
                    }
                })?;
                Ok(OperationDelta::Fluid(rect))
            }
            Self::FluidSourceCreate {
                object_id,
                pos,
                radius,
                absolute_height,
                capacity,
            } => {
                check_placement(*pos, *radius)?;
                let source = world
                    .objects_mut()
                    .emplace(*object_id, |id| FluidSource {
                        id,
                        pos: *pos,
                        radius: *radius,
                        absolute_height: *absolute_height,
                        capacity: *capacity,
                    })
                    .map_err(|e| OperationFailure::InvalidArgument(e.to_string()))?;
                let id = source.id;
                world.fluid_mut().add_source(id);
                Ok(OperationDelta::Created(id))
            }
            Self::FluidSourceMove { object_id, pos } => {
                check_placement(*pos, 0.0)?;
                update_source(world, *object_id, |s| s.pos = *pos)
            }
            Self::FluidSourceSetHeight {
                object_id,
                absolute_height,
            } => update_source(world, *object_id, |s| s.absolute_height = *absolute_height),
            Self::FluidSourceSetCapacity {
                object_id,
                capacity,
            } => update_source(world, *object_id, |s| s.capacity = *capacity),
            Self::FluidSourceDestroy { object_id } => {
                if world.objects_mut().get_safe::<FluidSource>(*object_id).is_none() {
                    return Err(OperationFailure::NoSuchObject(*object_id));
                }
                world.fluid_mut().remove_source(*object_id);
                world.objects_mut().kill(*object_id);
                Ok(OperationDelta::Destroyed(*object_id))
            }
            Self::FluidOceanLevelSetHeight { height } => {
                world.fluid_mut().set_ocean_level(*height);
                Ok(OperationDelta::None)
            }
            Self::FluidReset => {
                world.fluid_mut().reset();
                Ok(OperationDelta::None)
            }
        }
    }
}

fn paint_terrain<F>(
    terrain: &mut Terrain,
    brush: &Brush,
    paint: F,
) -> Result<OperationDelta, OperationFailure>
where
    F: Fn(f32, f32, u32, u32) -> f32,
{
    let size = terrain.size() as usize;
    let heights = terrain.heights_mut();
    let rect = brush.for_each_cell(size as u32, |x, y, d| {
        let h = &mut heights[y as usize * size + x as usize];
        *h = paint(*h, d, x, y).clamp(MIN_HEIGHT, MAX_HEIGHT);
    })?;
    terrain.notify_heightmap_changed(rect);
    Ok(OperationDelta::Terrain(rect))
}

fn smooth_terrain(terrain: &mut Terrain, brush: &Brush) -> Result<OperationDelta, OperationFailure> {
    let size = terrain.size();
    let heights = terrain.heights_mut();
    let rect = brush.for_each_cell(size, |x, y, d| {
        let Some(average) = sample_parzen(heights, size, x, y, SMOOTH_WINDOW) else {
            return;
        };
        let h = &mut heights[y as usize * size as usize + x as usize];
        *h = interp_linear(*h, average, d).clamp(MIN_HEIGHT, MAX_HEIGHT);
    })?;
    terrain.notify_heightmap_changed(rect);
    Ok(OperationDelta::Terrain(rect))
}

/// Sources need a finite position and a finite, non-negative radius.
fn check_placement(pos: Vec2, radius: f32) -> Result<(), OperationFailure> {
    if !pos.is_finite() {
        return Err(OperationFailure::InvalidArgument(
            "source position is not finite".into(),
        ));
    }
    if !radius.is_finite() || radius < 0.0 {
        return Err(OperationFailure::InvalidArgument(format!(
            "source radius {radius} must be finite and non-negative"
        )));
    }
    Ok(())
}

fn update_source<F>(
    world: &mut WorldMutator<'_>,
    id: ObjectId,
    update: F,
) -> Result<OperationDelta, OperationFailure>
where
    F: FnOnce(&mut FluidSource),
{
    let source = world
        .objects_mut()
        .get_safe_mut::<FluidSource>(id)
        .ok_or(OperationFailure::NoSuchObject(id))?;
    update(source);
    world.fluid_mut().invalidate_sources();
    Ok(OperationDelta::Updated(id))
}

/// Parzen (de la Vallée Poussin) window, non-zero for `|u| < 1`.
pub fn parzen(u: f32) -> f32 {
    let u = u.abs();
    if u <= 0.5 {
        1.0 - 6.0 * u * u + 6.0 * u * u * u
    } else if u <= 1.0 {
        2.0 * (1.0 - u).powi(3)
    } else {
        0.0
    }
}

/// Parzen-weighted average of the heights within `window` cells of
/// `(xc, yc)`. `None` if all weights vanish.
fn sample_parzen(heights: &[f32], size: u32, xc: u32, yc: u32, window: u32) -> Option<f32> {
    let x0 = xc.saturating_sub(window);
    let y0 = yc.saturating_sub(window);
    let x1 = (xc + window).min(size);
    let y1 = (yc + window).min(size);

    let centre = Vec2::new(xc as f32, yc as f32);
    let mut total_weight = 0.0;
    let mut total = 0.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let d = Vec2::new(x as f32, y as f32).distance(centre) / window as f32;
            let weight = parzen(d);
            total_weight += weight;
            total += heights[y as usize * size as usize + x as usize] * weight;
        }
    }
    (total_weight > 0.0).then(|| total / total_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::AsyncSubsystem;
    use crate::terrain::DEFAULT_HEIGHT;
    use crate::world::WorldState;
    use worldsim_common::NULL_OBJECT_ID;

    fn run(world: &mut WorldState, op: &WorldOperation) -> WorldOperationResult {
        op.execute(&mut WorldMutator::new(world))
    }

    #[test]
    fn raise_3x3_touches_exactly_nine_cells() {
        let mut world = WorldState::new(32).unwrap();
        let before = world.terrain().heights().to_vec();
        let op = WorldOperation::TerraformRaise {
            brush: Brush::uniform(10.0, 10.0, 3, 1.0),
        };
        let result = run(&mut world, &op);
        assert_eq!(
            result,
            WorldOperationResult::Success(OperationDelta::Terrain(TerrainRect::new(9, 9, 12, 12)))
        );

        let after = world.terrain().heights();
        for y in 0..32u32 {
            for x in 0..32u32 {
                let i = (y * 32 + x) as usize;
                let expected = if (9..12).contains(&x) && (9..12).contains(&y) {
                    before[i] + 1.0
                } else {
                    before[i]
                };
                assert_eq!(after[i], expected, "cell ({x}, {y})");
            }
        }
        assert_eq!(world.terrain().dirty(), TerrainRect::new(9, 9, 12, 12));
    }

    #[test]
    fn raise_clamps_to_max_height() {
        let mut world = WorldState::new(8).unwrap();
        let op = WorldOperation::TerraformRaise {
            brush: Brush::uniform(4.0, 4.0, 1, 10_000.0),
        };
        assert!(run(&mut world, &op).is_success());
        assert_eq!(world.terrain().height_at(4, 4), Some(MAX_HEIGHT));
    }

    #[test]
    fn level_moves_toward_reference() {
        let mut world = WorldState::new(8).unwrap();
        let op = WorldOperation::TerraformLevel {
            brush: Brush::uniform(4.0, 4.0, 1, 0.5),
            reference_height: 40.0,
        };
        run(&mut world, &op);
        assert_eq!(world.terrain().height_at(4, 4), Some(30.0));
    }

    #[test]
    fn brush_partially_outside_is_clipped() {
        let mut world = WorldState::new(8).unwrap();
        let op = WorldOperation::TerraformRaise {
            brush: Brush::uniform(0.0, 0.0, 4, 1.0),
        };
        // base = round(-2) = -2, so only cells 0..2 are on the map
        assert_eq!(
            run(&mut world, &op),
            WorldOperationResult::Success(OperationDelta::Terrain(TerrainRect::new(0, 0, 2, 2)))
        );
        assert_eq!(world.terrain().height_at(1, 1), Some(DEFAULT_HEIGHT + 1.0));
        assert_eq!(world.terrain().height_at(2, 2), Some(DEFAULT_HEIGHT));
    }

    #[test]
    fn brush_outside_fails() {
        let mut world = WorldState::new(8).unwrap();
        let op = WorldOperation::TerraformRaise {
            brush: Brush::uniform(100.0, 3.0, 3, 1.0),
        };
        assert_eq!(
            run(&mut world, &op),
            WorldOperationResult::Failure(OperationFailure::OutOfBounds)
        );
        assert!(world.terrain().dirty().is_empty());
    }

    #[test]
    fn brush_far_off_the_map_fails() {
        let mut world = WorldState::new(8).unwrap();
        for (xc, yc) in [(1.0e30, 3.0), (3.0, 1.0e30), (-1.0e30, 3.0), (3.0, -1.0e30)] {
            let raise = WorldOperation::TerraformRaise {
                brush: Brush::uniform(xc, yc, 3, 1.0),
            };
            assert_eq!(
                run(&mut world, &raise),
                WorldOperationResult::Failure(OperationFailure::OutOfBounds),
                "centre ({xc}, {yc})"
            );
            let fluid = WorldOperation::FluidRaise {
                brush: Brush::uniform(xc, yc, 3, 1.0),
            };
            assert_eq!(
                run(&mut world, &fluid),
                WorldOperationResult::Failure(OperationFailure::OutOfBounds)
            );
        }
        assert!(world.terrain().dirty().is_empty());
    }

    #[test]
    fn non_finite_brush_centre_is_rejected() {
        let mut world = WorldState::new(8).unwrap();
        for xc in [f32::NAN, f32::INFINITY] {
            let op = WorldOperation::TerraformRaise {
                brush: Brush::uniform(xc, 3.0, 3, 1.0),
            };
            assert!(matches!(
                run(&mut world, &op),
                WorldOperationResult::Failure(OperationFailure::InvalidArgument(_))
            ));
        }
        assert!(world.terrain().dirty().is_empty());
    }

    #[test]
    fn malformed_brush_is_rejected() {
        let mut world = WorldState::new(8).unwrap();
        let mut brush = Brush::uniform(4.0, 4.0, 3, 1.0);
        brush.density_map.pop();
        let result = run(&mut world, &WorldOperation::TerraformRaise { brush });
        assert!(matches!(
            result,
            WorldOperationResult::Failure(OperationFailure::InvalidArgument(_))
        ));

        let result = run(
            &mut world,
            &WorldOperation::FluidRaise {
                brush: Brush::uniform(4.0, 4.0, 0, 1.0),
            },
        );
        assert!(matches!(
            result,
            WorldOperationResult::Failure(OperationFailure::InvalidArgument(_))
        ));
    }

    #[test]
    fn smooth_flattens_a_spike() {
        let mut world = WorldState::new(16).unwrap();
        WorldMutator::new(&mut world).terrain_mut().set_height(8, 8, 120.0);
        let op = WorldOperation::TerraformSmooth {
            brush: Brush::uniform(8.0, 8.0, 1, 1.0),
        };
        assert!(run(&mut world, &op).is_success());
        let h = world.terrain().height_at(8, 8).unwrap();
        assert!(h < 120.0 && h > DEFAULT_HEIGHT, "got {h}");
    }

    #[test]
    fn smooth_keeps_flat_terrain() {
        let mut world = WorldState::new(16).unwrap();
        let op = WorldOperation::TerraformSmooth {
            brush: Brush::uniform(8.0, 8.0, 5, 1.0),
        };
        run(&mut world, &op);
        for h in world.terrain().heights() {
            assert!((h - DEFAULT_HEIGHT).abs() < 1e-4);
        }
    }

    #[test]
    fn ramp_interpolates_between_points() {
        let mut world = WorldState::new(16).unwrap();
        let op = WorldOperation::TerraformRamp {
            brush: Brush::uniform(8.0, 8.0, 16, 1.0),
            source_point: Vec2::new(0.0, 0.0),
            source_height: 0.0,
            destination_point: Vec2::new(10.0, 0.0),
            destination_height: 100.0,
        };
        assert!(run(&mut world, &op).is_success());
        assert_eq!(world.terrain().height_at(0, 3), Some(0.0));
        assert_eq!(world.terrain().height_at(5, 3), Some(50.0));
        assert_eq!(world.terrain().height_at(14, 3), Some(100.0));
    }

    #[test]
    fn ramp_rejects_degenerate_points() {
        let mut world = WorldState::new(8).unwrap();
        let op = WorldOperation::TerraformRamp {
            brush: Brush::uniform(4.0, 4.0, 3, 1.0),
            source_point: Vec2::new(2.0, 2.0),
            source_height: 0.0,
            destination_point: Vec2::new(2.5, 2.0),
            destination_height: 10.0,
        };
        assert!(matches!(
            run(&mut world, &op),
            WorldOperationResult::Failure(OperationFailure::InvalidArgument(_))
        ));
    }

    #[test]
    fn fluid_raise_never_goes_negative() {
        let mut world = WorldState::new(8).unwrap();
        let raise = WorldOperation::FluidRaise {
            brush: Brush::uniform(4.0, 4.0, 1, 2.0),
        };
        let lower = WorldOperation::FluidRaise {
            brush: Brush::uniform(4.0, 4.0, 1, -5.0),
        };
        run(&mut world, &raise);
        assert_eq!(
            world.fluid_mut().blocks_mut().cell(4, 4).unwrap().fluid_height,
            2.0
        );
        run(&mut world, &lower);
        assert_eq!(
            world.fluid_mut().blocks_mut().cell(4, 4).unwrap().fluid_height,
            0.0
        );
    }

    #[test]
    fn source_lifecycle() {
        let mut world = WorldState::new(16).unwrap();
        let create = WorldOperation::FluidSourceCreate {
            object_id: NULL_OBJECT_ID,
            pos: Vec2::new(8.0, 8.0),
            radius: 2.0,
            absolute_height: 25.0,
            capacity: 10.0,
        };
        let WorldOperationResult::Success(OperationDelta::Created(id)) = run(&mut world, &create)
        else {
            panic!("source not created");
        };
        assert_eq!(id, ObjectId(1));
        assert_eq!(world.fluid().sources(), &[id]);

        let moved = run(
            &mut world,
            &WorldOperation::FluidSourceMove {
                object_id: id,
                pos: Vec2::new(3.0, 3.0),
            },
        );
        assert_eq!(moved, WorldOperationResult::Success(OperationDelta::Updated(id)));
        assert!(world.fluid().sources_invalidated());
        world.post_step();
        assert!(!world.fluid().sources_invalidated());
        let source = world.objects().get_safe::<FluidSource>(id).unwrap();
        assert_eq!(source.pos, Vec2::new(3.0, 3.0));

        let destroy = WorldOperation::FluidSourceDestroy { object_id: id };
        assert_eq!(
            run(&mut world, &destroy),
            WorldOperationResult::Success(OperationDelta::Destroyed(id))
        );
        assert!(world.objects().get_base(id).is_none());
        assert!(world.fluid().sources().is_empty());
        assert_eq!(
            run(&mut world, &destroy),
            WorldOperationResult::Failure(OperationFailure::NoSuchObject(id))
        );
    }

    #[test]
    fn create_at_taken_id_fails() {
        let mut world = WorldState::new(8).unwrap();
        let create = WorldOperation::FluidSourceCreate {
            object_id: ObjectId(5),
            pos: Vec2::ZERO,
            radius: 1.0,
            absolute_height: 1.0,
            capacity: 1.0,
        };
        assert_eq!(
            run(&mut world, &create),
            WorldOperationResult::Success(OperationDelta::Created(ObjectId(5)))
        );
        assert!(matches!(
            run(&mut world, &create),
            WorldOperationResult::Failure(OperationFailure::InvalidArgument(_))
        ));
    }

    #[test]
    fn create_rejects_bad_radius_and_position() {
        let mut world = WorldState::new(8).unwrap();
        for (pos, radius) in [
            (Vec2::new(4.0, 4.0), -1.0),
            (Vec2::new(4.0, 4.0), f32::NAN),
            (Vec2::new(f32::INFINITY, 4.0), 1.0),
        ] {
            let create = WorldOperation::FluidSourceCreate {
                object_id: NULL_OBJECT_ID,
                pos,
                radius,
                absolute_height: 10.0,
                capacity: 1.0,
            };
            assert!(matches!(
                run(&mut world, &create),
                WorldOperationResult::Failure(OperationFailure::InvalidArgument(_))
            ));
        }
        assert!(world.objects().is_empty());
        assert!(world.fluid().sources().is_empty());
    }

    #[test]
    fn updates_on_dead_objects_fail_softly() {
        let mut world = WorldState::new(8).unwrap();
        let op = WorldOperation::FluidSourceSetCapacity {
            object_id: ObjectId(7),
            capacity: 3.0,
        };
        assert_eq!(
            run(&mut world, &op),
            WorldOperationResult::Failure(OperationFailure::NoSuchObject(ObjectId(7)))
        );
    }

    #[test]
    fn ocean_and_reset() {
        let mut world = WorldState::new(8).unwrap();
        run(
            &mut world,
            &WorldOperation::FluidOceanLevelSetHeight { height: 25.0 },
        );
        assert_eq!(world.fluid().ocean_level(), 25.0);
        world.fluid_mut().start();
        world.fluid().wait_for();
        assert!(world.fluid().front().total_volume() > 0.0);

        run(
            &mut world,
            &WorldOperation::FluidOceanLevelSetHeight { height: 0.0 },
        );
        run(&mut world, &WorldOperation::FluidReset);
        world.fluid_mut().start();
        world.fluid().wait_for();
        assert_eq!(world.fluid().front().total_volume(), 0.0);
    }

    #[test]
    fn parzen_shape() {
        assert_eq!(parzen(0.0), 1.0);
        assert_eq!(parzen(0.5), 0.25);
        assert_eq!(parzen(-0.5), 0.25);
        assert_eq!(parzen(1.0), 0.0);
        assert_eq!(parzen(1.5), 0.0);
    }

    #[test]
    fn operations_serialize_with_kind_tag() {
        let op = WorldOperation::FluidSourceDestroy {
            object_id: ObjectId(3),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"fluid_source_destroy\""));
        let back: WorldOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
