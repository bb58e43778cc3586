//! Types shared between the simulation kernel, the server and its clients.

mod types;

pub use types::{NO_TOKEN, NULL_OBJECT_ID, ObjectId, TerrainRect, Token};

pub use glam::Vec2;
