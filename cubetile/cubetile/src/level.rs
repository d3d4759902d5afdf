//! Zoom levels and the field-of-view driven level policy.

use std::fmt;

use crate::error::{Error, Result};

/// A level of detail. Level 1 is the undivided base face; level `n` splits
/// every face into an `n` by `n` grid of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Level(u32);

impl Level {
    /// The base level, drawn from one texture per face.
    pub const BASE: Level = Level(1);

    /// Create a level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLevel`] for level 0.
    pub fn new(value: u32) -> Result<Self> {
        if value == 0 {
            return Err(Error::InvalidLevel {
                level: value,
                reason: "levels start at 1",
            });
        }
        Ok(Self(value))
    }

    /// The level number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Number of cells along one edge of a face.
    #[must_use]
    pub const fn cells_per_edge(self) -> usize {
        self.0 as usize
    }

    /// Zero-based index used in tile paths.
    #[must_use]
    pub const fn path_index(self) -> u32 {
        self.0 - 1
    }

    #[must_use]
    pub fn is_base(self) -> bool {
        self == Self::BASE
    }

    /// The next finer level.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The next coarser level, if any.
    #[must_use]
    pub fn prev(self) -> Option<Self> {
        (self.0 > 1).then(|| Self(self.0 - 1))
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::BASE
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs to the level policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyConfig {
    /// Height of the viewport in pixels.
    pub viewport_height: f32,
    /// Edge length of one tile image in pixels.
    pub tile_base_size: f32,
    /// Deepest level the tile server publishes.
    pub max_level: Level,
    /// Widest field of view the zoom input allows, in degrees.
    pub max_fov: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            viewport_height: 1080.0,
            tile_base_size: 512.0,
            max_level: Level(3),
            max_fov: 100.0,
        }
    }
}

/// The field-of-view range in which a level stays selected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FovBand {
    pub min: f32,
    pub max: f32,
}

impl FovBand {
    #[must_use]
    pub fn contains(&self, fov: f32) -> bool {
        fov >= self.min && fov <= self.max
    }
}

/// Picks the level of detail from the field of view.
///
/// Each level owns a band of field-of-view values derived from the viewport
/// height and the tile resolution. Zooming past either edge of the band moves
/// one level at a time; callers re-evaluate until the level is stable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelPolicy {
    config: PolicyConfig,
}

impl LevelPolicy {
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Update the viewport height, e.g. after a window resize.
    pub fn set_viewport_height(&mut self, height: f32) {
        self.config.viewport_height = height;
    }

    /// The field-of-view band for `level`.
    #[must_use]
    pub fn band(&self, level: Level) -> FovBand {
        let scale = self.config.viewport_height * 100.0 / (self.config.tile_base_size * 0.9 * 2.0);
        let exponent = i32::try_from(level.get()).unwrap_or(i32::MAX);
        FovBand {
            min: scale / 2f32.powi(exponent - 2),
            max: scale / 2f32.powi(exponent - 3),
        }
    }

    /// One policy step from `current` for the field of view `fov`.
    #[must_use]
    pub fn select_level(&self, current: Level, fov: f32) -> Level {
        let band = self.band(current);
        if fov < band.min && current < self.config.max_level {
            current.next()
        } else if fov > band.max {
            current.prev().unwrap_or(current)
        } else {
            current
        }
    }

    /// Clamp a field of view into the range the zoom input allows.
    ///
    /// The lower bound is the entry point of the deepest level, so zooming in
    /// never asks for tiles the server does not have.
    #[must_use]
    pub fn clamp_fov(&self, fov: f32) -> f32 {
        let (min, max) = self.fov_range();
        fov.max(min).min(max)
    }

    /// The `(min, max)` field of view accepted by [`Self::clamp_fov`].
    #[must_use]
    pub fn fov_range(&self) -> (f32, f32) {
        let max = self.config.max_fov;
        let min = self.band(self.config.max_level).min.min(max);
        (min, max)
    }
}
