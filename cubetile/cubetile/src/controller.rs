//! Drives level selection and visibility from camera input.

use crate::culling::compute_visible;
use crate::error::{Error, Result};
use crate::level::{Level, LevelPolicy};
use crate::store::TileStore;
use crate::types::{CameraState, Frustum};

/// A level transition produced by [`LodController::on_fov`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub from: Level,
    pub to: Level,
}

/// Owns the current level and keeps the store's visible set up to date.
///
/// The host calls [`Self::on_fov`] with every committed field of view, then
/// [`Self::settle`] and [`Self::on_camera`] every frame.
#[derive(Debug, Clone)]
pub struct LodController {
    policy: LevelPolicy,
    level: Level,
    /// Set on level change until visibility has been recomputed once.
    dirty: bool,
}

impl LodController {
    #[must_use]
    pub fn new(policy: LevelPolicy) -> Self {
        Self {
            policy,
            level: Level::BASE,
            dirty: false,
        }
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn policy(&self) -> &LevelPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut LevelPolicy {
        &mut self.policy
    }

    /// Take one policy step for a committed field of view.
    ///
    /// On a change the new level's grid is generated if needed and the next
    /// [`Self::on_camera`] recomputes visibility even without interaction.
    pub fn on_fov(&mut self, fov: f32, store: &mut TileStore) -> Option<LevelChange> {
        store.set_fov(fov);
        let next = self.policy.select_level(self.level, fov);
        if next == self.level {
            return None;
        }

        let change = LevelChange {
            from: self.level,
            to: next,
        };
        self.level = next;
        self.dirty = true;
        if !next.is_base() && store.set_positions(next) {
            tracing::debug!(level = %next, cells = store.positions(next).len(), "generated cell grid");
        }
        tracing::info!(from = %change.from, to = %change.to, fov, "level changed");
        Some(change)
    }

    /// Re-evaluate the last committed field of view until the level is stable.
    ///
    /// Each evaluation still moves a single level, so every level on the way
    /// gets its grid. Returns the overall transition, if any.
    pub fn settle(&mut self, store: &mut TileStore) -> Option<LevelChange> {
        let from = self.level;
        // Bands are contiguous, so the steps all go one way and stop at a bound.
        while self.on_fov(store.fov(), store).is_some() {}
        (self.level != from).then_some(LevelChange {
            from,
            to: self.level,
        })
    }

    /// Recompute visibility if the camera is being moved or the level just
    /// changed. Returns whether the visible set was rebuilt.
    pub fn on_camera(&mut self, camera: &CameraState, store: &mut TileStore) -> Result<bool> {
        if !camera.interacting && !self.dirty {
            return Ok(false);
        }
        self.recompute(camera, store)
    }

    /// Rebuild the visible set for the current level.
    ///
    /// A camera that cannot produce a frustum leaves the previous visible set
    /// in place and returns `Ok(false)`. The base level draws whole faces and
    /// has nothing to cull.
    pub fn recompute(&mut self, camera: &CameraState, store: &mut TileStore) -> Result<bool> {
        if self.level.is_base() {
            self.dirty = false;
            return Ok(false);
        }

        let frustum = match Frustum::from_view_projection(camera.view_projection()) {
            Ok(frustum) => frustum,
            Err(e) => {
                tracing::warn!(error = %e, "skipping visibility update");
                return Ok(false);
            }
        };

        if !store.has_positions(self.level) {
            return Err(Error::InvalidLevel {
                level: self.level.get(),
                reason: "no cell grid was generated",
            });
        }

        let visible = compute_visible(
            self.level,
            store.positions(self.level),
            &frustum,
            store.face_size(),
        );
        store.set_visibles(self.level, visible);
        self.dirty = false;
        tracing::trace!(level = %self.level, cells = store.visible_count(self.level), "visibility updated");
        Ok(true)
    }
}
