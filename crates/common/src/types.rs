use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a simulation object.
///
/// IDs are scoped to the `ObjectManager` which handed them out. The value 0
/// is reserved and never refers to a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// The ID which never refers to an object.
pub const NULL_OBJECT_ID: ObjectId = ObjectId(0);

impl ObjectId {
    pub fn is_null(self) -> bool {
        self == NULL_OBJECT_ID
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        NULL_OBJECT_ID
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Correlates a command with the response the simulation sends for it.
pub type Token = u64;

/// Token value of commands which do not expect a response.
pub const NO_TOKEN: Token = 0;

/// Half-open rectangle of terrain cells: `x0..x1` by `y0..y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TerrainRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl TerrainRect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle covering a whole `size` x `size` grid.
    pub fn full(size: u32) -> Self {
        Self::new(0, 0, size, size)
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Smallest rectangle covering both `self` and `other`. Empty rectangles
    /// do not contribute.
    pub fn union(&self, other: &TerrainRect) -> TerrainRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        TerrainRect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Clip the rectangle against a `size` x `size` grid.
    /// Clip to a `size` x `size` grid. Inverted rectangles come out empty
    /// with `x1 >= x0` and `y1 >= y0`.
    pub fn clipped(&self, size: u32) -> TerrainRect {
        let x0 = self.x0.min(size);
        let y0 = self.y0.min(size);
        TerrainRect {
            x0,
            y0,
            x1: self.x1.min(size).max(x0),
            y1: self.y1.min(size).max(y0),
        }
    }
}
