//! Reference-counted texture cache with viewport-aware eviction.
//!
//! Entries are keyed by tile URL. Each one carries a decoded image, a
//! reference count, the world position of the tile that last used it and a
//! status:
//!
//! - **Active**: close to the viewport, kept resident.
//! - **Inactive**: far from the viewport or over budget. Unreferenced inactive
//!   entries are queued for disposal.
//! - **Disposed**: the decoded pixels were dropped but the record is kept so
//!   a later request re-fetches it. Disposed records are removed entirely once
//!   they have been disposed for longer than the disposal timeout.
//!
//! An entry with a non-zero reference count is never disposed.
//!
//! Sweeps run on the caller's clock; see [`TextureCache::maybe_sweep`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cubetile_decode::DecodedImage;
use glam::Vec3;
use web_time::Instant;

use crate::error::Result;
use crate::fetch::{CancelToken, TileFetcher};
use crate::level::Level;

/// Weight of the time since last use (in milliseconds) in eviction scores.
const TIME_WEIGHT: f64 = 0.3;
/// Weight of the distance to the viewport in eviction scores.
const DISTANCE_WEIGHT: f64 = 0.7;

/// Tuning for [`TextureCache`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// Most entries kept active after a sweep.
    pub max_active_textures: usize,
    /// How long an entry waits in the disposal queue, how long an
    /// unreferenced inactive entry may go unused, and how long a disposed
    /// record is kept.
    pub disposal_timeout: Duration,
    /// Time between sweeps.
    pub check_interval: Duration,
    /// Entries anchored within this distance of the viewport are active.
    pub viewport_radius: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_active_textures: 100,
            disposal_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(5),
            viewport_radius: 20.0,
        }
    }
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Active,
    Inactive,
    Disposed,
}

/// Snapshot of entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub active: usize,
    pub inactive: usize,
    pub disposed: usize,
    pub total: usize,
    /// Entries waiting in the disposal queue.
    pub queued: usize,
    /// Bytes of decoded pixels held.
    pub resident_bytes: usize,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub soft_disposed: usize,
    pub demoted: usize,
    pub hard_disposed: usize,
}

#[derive(Debug)]
struct CacheEntry {
    image: Option<Arc<DecodedImage>>,
    last_used: Instant,
    ref_count: u32,
    position: Vec3,
    level: Level,
    status: EntryStatus,
    disposed_at: Option<Instant>,
}

impl CacheEntry {
    fn score(&self, now: Instant, viewport: Vec3) -> f64 {
        let idle_ms = now.saturating_duration_since(self.last_used).as_secs_f64() * 1000.0;
        let distance = f64::from(self.position.distance(viewport));
        TIME_WEIGHT * idle_ms + DISTANCE_WEIGHT * distance
    }
}

#[derive(Debug)]
struct TextureCacheInner {
    entries: HashMap<String, CacheEntry>,
    /// URL to the time it was queued.
    disposal_queue: HashMap<String, Instant>,
    viewport: Vec3,
    /// `None` once the cache has been cleared.
    next_sweep: Option<Instant>,
}

/// Shared texture cache handle.
///
/// Clones share the same table.
#[derive(Debug, Clone)]
pub struct TextureCache {
    inner: Arc<Mutex<TextureCacheInner>>,
    config: CacheConfig,
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl TextureCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TextureCacheInner {
                entries: HashMap::new(),
                disposal_queue: HashMap::new(),
                viewport: Vec3::ZERO,
                next_sweep: Some(Instant::now() + config.check_interval),
            })),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, TextureCacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn classify(&self, position: Vec3, viewport: Vec3) -> EntryStatus {
        if position.distance(viewport) <= self.config.viewport_radius {
            EntryStatus::Active
        } else {
            EntryStatus::Inactive
        }
    }

    /// Get the image for `url`, fetching it on a miss.
    ///
    /// A hit takes a reference without fetching. A miss fetches through
    /// `fetcher`; if `cancel` fires before the image is inserted the table is
    /// left untouched and [`crate::Error::FetchCancelled`] is returned.
    pub async fn get_texture<F>(
        &self,
        url: &str,
        position: Vec3,
        level: Level,
        fetcher: &F,
        cancel: &CancelToken,
    ) -> Result<Arc<DecodedImage>>
    where
        F: TileFetcher + ?Sized,
    {
        if let Some(image) = self.acquire(url, position, level, Instant::now()) {
            return Ok(image);
        }

        cancel.check(url)?;
        let image = fetcher.fetch(url, cancel).await?;
        cancel.check(url)?;

        Ok(self.insert(url, Arc::new(image), position, level, Instant::now()))
    }

    /// Take a reference to a resident image.
    ///
    /// Returns `None` for absent and disposed entries; those need a fetch.
    pub fn acquire(
        &self,
        url: &str,
        position: Vec3,
        level: Level,
        now: Instant,
    ) -> Option<Arc<DecodedImage>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let entry = inner.entries.get_mut(url)?;
        let image = entry.image.clone()?;

        entry.last_used = now;
        entry.ref_count += 1;
        entry.position = position;
        entry.level = level;
        entry.status = self.classify(position, inner.viewport);
        if inner.disposal_queue.remove(url).is_some() {
            tracing::debug!(url, "disposal cancelled");
        }
        tracing::trace!(url, ref_count = entry.ref_count, "texture cache hit");
        Some(image)
    }

    /// Insert a freshly fetched image and take a reference to it.
    ///
    /// If another fetch for the same URL finished first, its image is kept
    /// and returned instead.
    pub fn insert(
        &self,
        url: &str,
        image: Arc<DecodedImage>,
        position: Vec3,
        level: Level,
        now: Instant,
    ) -> Arc<DecodedImage> {
        if let Some(existing) = self.acquire(url, position, level, now) {
            return existing;
        }

        let mut guard = self.lock();
        let inner = &mut *guard;
        let status = self.classify(position, inner.viewport);
        let entry = inner
            .entries
            .entry(url.to_string())
            .or_insert_with(|| CacheEntry {
                image: None,
                last_used: now,
                ref_count: 0,
                position,
                level,
                status,
                disposed_at: None,
            });

        // Either new or coming back from disposal.
        entry.image = Some(Arc::clone(&image));
        entry.last_used = now;
        entry.ref_count += 1;
        entry.position = position;
        entry.level = level;
        entry.status = status;
        entry.disposed_at = None;

        tracing::debug!(url, %level, ?status, "texture cached");
        if status == EntryStatus::Inactive {
            inner.disposal_queue.insert(url.to_string(), now);
        }
        image
    }

    /// Drop one reference to `url`.
    ///
    /// The last release of an inactive entry queues it for disposal.
    pub fn release(&self, url: &str, now: Instant) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.entries.get_mut(url) else {
            return;
        };
        if entry.ref_count == 0 {
            tracing::warn!(url, "texture released more often than acquired");
            return;
        }

        entry.ref_count -= 1;
        if entry.ref_count == 0 && entry.status == EntryStatus::Inactive {
            inner.disposal_queue.insert(url.to_string(), now);
            tracing::debug!(url, "queued for disposal");
        }
    }

    /// Move the viewport and reclassify every resident entry.
    pub fn update_viewport(&self, position: Vec3, now: Instant) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.viewport = position;

        for (url, entry) in &mut inner.entries {
            if entry.status == EntryStatus::Disposed {
                continue;
            }
            match (entry.status, self.classify(entry.position, position)) {
                (EntryStatus::Inactive, EntryStatus::Active) => {
                    entry.status = EntryStatus::Active;
                    inner.disposal_queue.remove(url);
                }
                (EntryStatus::Active, EntryStatus::Inactive) => {
                    entry.status = EntryStatus::Inactive;
                    if entry.ref_count == 0 {
                        inner.disposal_queue.insert(url.clone(), now);
                    }
                }
                _ => {}
            }
        }
    }

    /// Run a sweep if the check interval elapsed since the last one.
    pub fn maybe_sweep(&self, now: Instant) -> Option<SweepReport> {
        {
            let mut inner = self.lock();
            let due = inner.next_sweep?;
            if now < due {
                return None;
            }
            inner.next_sweep = Some(now + self.config.check_interval);
        }
        Some(self.sweep(now))
    }

    /// Dispose what timed out and enforce the active budget.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let timeout = self.config.disposal_timeout;
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut report = SweepReport::default();

        // Queued long enough, or inactive and unused for too long.
        let mut expired: Vec<String> = inner
            .disposal_queue
            .iter()
            .filter(|(_, queued_at)| now.saturating_duration_since(**queued_at) >= timeout)
            .map(|(url, _)| url.clone())
            .collect();
        expired.extend(
            inner
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.status == EntryStatus::Inactive
                        && entry.ref_count == 0
                        && now.saturating_duration_since(entry.last_used) > timeout
                })
                .map(|(url, _)| url.clone()),
        );
        for url in expired {
            if soft_dispose(inner, &url, now) {
                report.soft_disposed += 1;
            }
        }

        // Demote the highest scores until the active budget holds.
        let mut active: Vec<(f64, &String)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == EntryStatus::Active)
            .map(|(url, entry)| (entry.score(now, inner.viewport), url))
            .collect();
        let excess = active.len().saturating_sub(self.config.max_active_textures);
        if excess > 0 {
            active.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
            let demoted: Vec<String> = active
                .into_iter()
                .take(excess)
                .map(|(_, url)| url.clone())
                .collect();
            for url in demoted {
                if let Some(entry) = inner.entries.get_mut(&url) {
                    entry.status = EntryStatus::Inactive;
                    if entry.ref_count == 0 {
                        inner.disposal_queue.insert(url, now);
                    }
                    report.demoted += 1;
                }
            }
        }

        // Forget records that have stayed disposed past the timeout.
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| {
            entry
                .disposed_at
                .is_none_or(|at| now.saturating_duration_since(at) <= timeout)
        });
        report.hard_disposed = before - inner.entries.len();

        if report != SweepReport::default() {
            tracing::debug!(
                soft_disposed = report.soft_disposed,
                demoted = report.demoted,
                hard_disposed = report.hard_disposed,
                "texture cache sweep"
            );
        }
        report
    }

    /// Remove an unreferenced entry outright.
    ///
    /// Returns `false` if the entry is absent or still referenced.
    pub fn hard_dispose(&self, url: &str) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.entries.get(url) {
            Some(entry) if entry.ref_count > 0 => {
                tracing::debug!(url, ref_count = entry.ref_count, "refusing to dispose referenced texture");
                false
            }
            Some(_) => {
                inner.entries.remove(url);
                inner.disposal_queue.remove(url);
                true
            }
            None => false,
        }
    }

    /// Drop every entry and stop sweeping. Used at teardown.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.disposal_queue.clear();
        inner.next_sweep = None;
        tracing::debug!(count, "texture cache cleared");
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = CacheStats {
            total: inner.entries.len(),
            queued: inner.disposal_queue.len(),
            ..CacheStats::default()
        };
        for entry in inner.entries.values() {
            match entry.status {
                EntryStatus::Active => stats.active += 1,
                EntryStatus::Inactive => stats.inactive += 1,
                EntryStatus::Disposed => stats.disposed += 1,
            }
            stats.resident_bytes += entry.image.as_ref().map_or(0, |image| image.byte_len());
        }
        stats
    }

    #[must_use]
    pub fn status(&self, url: &str) -> Option<EntryStatus> {
        self.lock().entries.get(url).map(|entry| entry.status)
    }

    #[must_use]
    pub fn ref_count(&self, url: &str) -> Option<u32> {
        self.lock().entries.get(url).map(|entry| entry.ref_count)
    }

    /// Level of the tile that last used `url`.
    #[must_use]
    pub fn level(&self, url: &str) -> Option<Level> {
        self.lock().entries.get(url).map(|entry| entry.level)
    }

    #[must_use]
    pub fn is_queued(&self, url: &str) -> bool {
        self.lock().disposal_queue.contains_key(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop the decoded pixels of an unreferenced entry, keeping its record.
fn soft_dispose(inner: &mut TextureCacheInner, url: &str, now: Instant) -> bool {
    let Some(entry) = inner.entries.get_mut(url) else {
        inner.disposal_queue.remove(url);
        return false;
    };
    // Pinned entries stay queued until their last release re-queues them.
    if entry.ref_count > 0 || entry.status == EntryStatus::Disposed {
        return false;
    }

    entry.image = None;
    entry.status = EntryStatus::Disposed;
    entry.disposed_at = Some(now);
    inner.disposal_queue.remove(url);
    tracing::debug!(url, "texture disposed");
    true
}
