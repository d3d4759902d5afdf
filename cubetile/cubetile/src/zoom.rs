//! Mapping wheel and pinch input to the field of view.
//!
//! The camera follows every input immediately. The value handed to the level
//! policy is committed separately: wheel input only after it settles for the
//! debounce period, pinch input right away.

use std::time::Duration;

use web_time::Instant;

use crate::level::LevelPolicy;

/// Degrees of field of view per unit of wheel or pinch delta.
pub const ZOOM_SENSITIVITY: f32 = 0.05;

/// How long wheel input must settle before it is committed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ZoomInput {
    fov: f32,
    min_fov: f32,
    max_fov: f32,
    debounce: Duration,
    /// Time of the last uncommitted wheel event.
    pending_since: Option<Instant>,
    /// A pinch update waiting to be picked up by [`Self::poll`].
    commit_now: bool,
    last_pinch: Option<f32>,
}

impl ZoomInput {
    /// Start at `fov`, clamped to what `policy` allows.
    #[must_use]
    pub fn new(fov: f32, policy: &LevelPolicy) -> Self {
        let (min_fov, max_fov) = policy.fov_range();
        Self {
            fov: fov.max(min_fov).min(max_fov),
            min_fov,
            max_fov,
            debounce: DEFAULT_DEBOUNCE,
            pending_since: None,
            commit_now: false,
            last_pinch: None,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Field of view the camera should use now.
    #[must_use]
    pub fn fov(&self) -> f32 {
        self.fov
    }

    /// Pick up a new clamp range, e.g. after the viewport was resized.
    pub fn set_policy(&mut self, policy: &LevelPolicy) {
        (self.min_fov, self.max_fov) = policy.fov_range();
        self.fov = self.clamp(self.fov);
    }

    fn clamp(&self, fov: f32) -> f32 {
        fov.max(self.min_fov).min(self.max_fov)
    }

    /// Apply a wheel delta. Positive values zoom out.
    pub fn wheel(&mut self, delta_y: f32, now: Instant) -> f32 {
        self.fov = self.clamp(self.fov + delta_y * ZOOM_SENSITIVITY);
        self.pending_since = Some(now);
        self.fov
    }

    /// Apply a pinch gesture given the current distance between the touches.
    ///
    /// The first sample of a gesture only records the distance.
    pub fn pinch(&mut self, distance: f32) -> f32 {
        if let Some(last) = self.last_pinch {
            self.fov = self.clamp(self.fov + (last - distance) * ZOOM_SENSITIVITY);
            self.commit_now = true;
        }
        self.last_pinch = Some(distance);
        self.fov
    }

    pub fn pinch_end(&mut self) {
        self.last_pinch = None;
    }

    /// Whether a wheel gesture or pinch is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pending_since.is_some() || self.last_pinch.is_some()
    }

    /// The field of view to commit, if one is due.
    pub fn poll(&mut self, now: Instant) -> Option<f32> {
        if std::mem::take(&mut self.commit_now) {
            self.pending_since = None;
            return Some(self.fov);
        }
        let since = self.pending_since?;
        if now.saturating_duration_since(since) < self.debounce {
            return None;
        }
        self.pending_since = None;
        Some(self.fov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::PolicyConfig;

    fn input() -> ZoomInput {
        let policy = LevelPolicy::new(PolicyConfig {
            viewport_height: 1000.0,
            ..PolicyConfig::default()
        });
        ZoomInput::new(70.0, &policy)
    }

    #[test]
    fn test_wheel_is_debounced() {
        let mut input = input();
        let now = Instant::now();
        assert_eq!(input.wheel(100.0, now), 75.0);
        assert_eq!(input.poll(now + Duration::from_millis(50)), None);

        // A further event restarts the wait.
        input.wheel(-200.0, now + Duration::from_millis(80));
        assert_eq!(input.poll(now + Duration::from_millis(150)), None);
        assert_eq!(input.poll(now + Duration::from_millis(180)), Some(65.0));
        assert_eq!(input.poll(now + Duration::from_millis(400)), None);
    }

    #[test]
    fn test_wheel_is_clamped() {
        let mut input = input();
        let now = Instant::now();
        assert_eq!(input.wheel(10_000.0, now), 100.0);
        let (min, _) = LevelPolicy::new(PolicyConfig {
            viewport_height: 1000.0,
            ..PolicyConfig::default()
        })
        .fov_range();
        assert_eq!(input.wheel(-10_000.0, now), min);
    }

    #[test]
    fn test_pinch_commits_immediately() {
        let mut input = input();
        let now = Instant::now();
        assert_eq!(input.pinch(300.0), 70.0);
        assert_eq!(input.poll(now), None);

        // Fingers moving apart zoom in.
        assert_eq!(input.pinch(400.0), 65.0);
        assert_eq!(input.poll(now), Some(65.0));
        assert!(input.is_active());

        input.pinch_end();
        assert!(!input.is_active());
        assert_eq!(input.pinch(100.0), 65.0);
    }
}
