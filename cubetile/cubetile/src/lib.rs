//! Level-of-detail core for multi-resolution cube panoramas.
//!
//! A panorama is six cube faces, each available at several zoom levels. Level
//! 1 is one texture per face; level `n` splits each face into `n` by `n` tiles.
//! This crate picks the level from the field of view, culls the tiles outside
//! the camera frustum, fetches the visible ones and keeps decoded image memory
//! bounded.
//!
//! # Design principles
//!
//! - **Host-driven**: Everything runs from the host's update loop; fetches are
//!   started through [`FetchSpawner`] and their results handed back
//! - **Runtime-agnostic**: Fetching returns boxed futures, works with any executor
//! - **Web-compatible**: Works on desktop and WASM via reqwest and web-time
//!
//! # Example
//!
//! ```ignore
//! use cubetile::{LevelPolicy, LodController, TileStore};
//!
//! let mut store = TileStore::new(10.0);
//! let mut controller = LodController::new(LevelPolicy::default());
//!
//! // Every frame: commit zoom input, then update visibility.
//! if let Some(fov) = zoom.poll(now) {
//!     controller.on_fov(fov, &mut store);
//! }
//! controller.on_camera(&camera, &mut store)?;
//! renderer.reconcile(controller.level(), &store, &mut spawner, now);
//! ```

pub mod address;
pub mod controller;
pub mod culling;
mod error;
pub mod face;
pub mod fetch;
pub mod grid;
pub mod level;
pub mod side;
pub mod store;
pub mod texture_cache;
pub mod types;
pub mod zoom;

pub use address::TileAddress;
pub use controller::{LevelChange, LodController};
pub use culling::{VisibleFaces, compute_visible};
pub use error::{Error, Result};
pub use face::Face;
pub use fetch::{CancelToken, FetchFuture, HttpFetcher, TileFetcher};
pub use level::{FovBand, Level, LevelPolicy, PolicyConfig};
pub use side::{
    BindOutcome, DrawTile, FetchSpawner, InFlight, ReconcileReport, SideRenderer, TileGroup,
    TileRequest,
};
pub use store::TileStore;
pub use texture_cache::{CacheConfig, CacheStats, EntryStatus, SweepReport, TextureCache};
pub use types::{Aabb, CameraState, Cell, CellId, Frustum, GroupKey, TileName};
pub use zoom::ZoomInput;

// Re-export decode types for convenience.
pub use cubetile_decode::{DecodeError, DecodedImage};
