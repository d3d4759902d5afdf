//! Reconciling drawn tiles against the visible set.
//!
//! The [`SideRenderer`] keeps one [`TileGroup`] per face and level. Each pass
//! of [`SideRenderer::reconcile`] creates tiles for newly visible cells, starts
//! their fetches, and tears down tiles and groups that left the view. Fetches
//! run elsewhere; their results come back through [`SideRenderer::complete`],
//! which binds them only if the tile they were started for is still waiting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cubetile_decode::DecodedImage;
use glam::{Mat4, Vec3};
use web_time::Instant;

use crate::address::TileAddress;
use crate::error::Result;
use crate::face::Face;
use crate::fetch::CancelToken;
use crate::level::Level;
use crate::store::TileStore;
use crate::texture_cache::TextureCache;
use crate::types::{Cell, CellId, GroupKey, TileName};

/// Handle to a running fetch that can be cancelled.
pub trait InFlight {
    /// Abort the fetch. Its result, if any still arrives, is discarded.
    fn cancel(self);
}

impl InFlight for CancelToken {
    fn cancel(self) {
        CancelToken::cancel(&self);
    }
}

/// A fetch the renderer wants started.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub name: TileName,
    /// Distinguishes this request from earlier ones for the same tile.
    pub ticket: u64,
    pub url: String,
    /// World position of the tile center, used for cache eviction.
    pub anchor: Vec3,
    pub cancel: CancelToken,
}

/// Starts fetches on behalf of the renderer.
///
/// The host decides where fetches run. It is expected to feed every result
/// back through [`SideRenderer::complete`].
pub trait FetchSpawner {
    type Handle: InFlight;

    fn spawn(&mut self, request: TileRequest) -> Self::Handle;
}

/// One realized tile.
#[derive(Debug)]
pub struct DrawTile<H> {
    pub cell: Cell,
    pub url: String,
    /// Placement within the face group.
    pub transform: Mat4,
    ticket: u64,
    image: Option<Arc<DecodedImage>>,
    fetch: Option<H>,
}

impl<H> DrawTile<H> {
    /// The bound image, once the fetch has completed.
    #[must_use]
    pub fn image(&self) -> Option<&Arc<DecodedImage>> {
        self.image.as_ref()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.fetch.is_some()
    }
}

/// Tiles of one face at one level.
#[derive(Debug)]
pub struct TileGroup<H> {
    pub key: GroupKey,
    /// Face placement.
    pub transform: Mat4,
    tiles: HashMap<CellId, DrawTile<H>>,
}

impl<H> TileGroup<H> {
    #[must_use]
    pub fn tile(&self, cell: &CellId) -> Option<&DrawTile<H>> {
        self.tiles.get(cell)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &DrawTile<H>> {
        self.tiles.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Changes made by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<TileName>,
    pub destroyed: Vec<TileName>,
    pub groups_removed: Vec<GroupKey>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty() && self.groups_removed.is_empty()
    }
}

/// What happened to a completed fetch.
#[derive(Debug, Clone)]
pub enum BindOutcome {
    /// The image is now bound to the tile.
    Bound(Arc<DecodedImage>),
    /// The tile is gone or was re-requested; the result was dropped.
    Stale,
    /// The fetch was cancelled. The tile record, if it still existed, was
    /// removed.
    Cancelled,
    /// The fetch failed. The tile record was removed so a later pass retries
    /// it while the cell stays visible.
    Failed,
}

/// Keeps the drawn tiles of every face in step with the visible set.
#[derive(Debug)]
pub struct SideRenderer<H> {
    address: TileAddress,
    cache: TextureCache,
    face_size: f32,
    groups: HashMap<GroupKey, TileGroup<H>>,
    next_ticket: u64,
}

impl<H: InFlight> SideRenderer<H> {
    #[must_use]
    pub fn new(address: TileAddress, cache: TextureCache, face_size: f32) -> Self {
        Self {
            address,
            cache,
            face_size,
            groups: HashMap::new(),
            next_ticket: 0,
        }
    }

    #[must_use]
    pub fn address(&self) -> &TileAddress {
        &self.address
    }

    #[must_use]
    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    /// Bring the tile groups in line with the visible set at `level`.
    ///
    /// Only faces the store reports visible at `level` keep a group; the base
    /// level has no cells, so reconciling at it tears everything down.
    /// Running it twice on an unchanged store changes nothing.
    pub fn reconcile<S>(
        &mut self,
        level: Level,
        store: &TileStore,
        spawner: &mut S,
        now: Instant,
    ) -> ReconcileReport
    where
        S: FetchSpawner<Handle = H>,
    {
        let mut report = ReconcileReport::default();
        let faces = store.visible_faces(level);

        for &face in &faces {
            self.reconcile_face(face, level, store.visibles(level, face), spawner, now, &mut report);
        }

        let current: HashSet<GroupKey> = faces.iter().map(|&face| GroupKey { face, level }).collect();
        let mut gone: Vec<GroupKey> = self
            .groups
            .keys()
            .filter(|key| !current.contains(key))
            .copied()
            .collect();
        gone.sort();
        for key in gone {
            let Some(group) = self.groups.remove(&key) else {
                continue;
            };
            for (cell, tile) in group.tiles {
                self.retire(tile, now);
                report.destroyed.push(TileName { level: key.level, cell });
            }
            tracing::debug!(group = %key, "tile group removed");
            report.groups_removed.push(key);
        }

        if !report.is_empty() {
            tracing::debug!(
                %level,
                created = report.created.len(),
                destroyed = report.destroyed.len(),
                groups_removed = report.groups_removed.len(),
                "reconciled tiles"
            );
        }
        report
    }

    fn reconcile_face<S>(
        &mut self,
        face: Face,
        level: Level,
        visible: &[Cell],
        spawner: &mut S,
        now: Instant,
        report: &mut ReconcileReport,
    ) where
        S: FetchSpawner<Handle = H>,
    {
        let key = GroupKey { face, level };
        let face_size = self.face_size;
        let group = self.groups.entry(key).or_insert_with(|| TileGroup {
            key,
            transform: face.matrix(face_size),
            tiles: HashMap::new(),
        });

        let wanted: HashSet<CellId> = visible.iter().map(|cell| cell.id).collect();
        let mut stale: Vec<CellId> = group
            .tiles
            .keys()
            .filter(|cell| !wanted.contains(cell))
            .copied()
            .collect();
        stale.sort();
        let retired: Vec<DrawTile<H>> = stale
            .iter()
            .filter_map(|cell| group.tiles.remove(cell))
            .collect();
        report
            .destroyed
            .extend(stale.into_iter().map(|cell| TileName { level, cell }));

        let group_transform = group.transform;
        let mut created = Vec::new();
        for cell in visible {
            if group.tiles.contains_key(&cell.id) {
                continue;
            }
            let name = TileName { level, cell: cell.id };
            let url = self.address.cell_url(level, &cell.id);
            let ticket = self.next_ticket;
            self.next_ticket += 1;
            let cancel = CancelToken::new();
            let handle = spawner.spawn(TileRequest {
                name,
                ticket,
                url: url.clone(),
                anchor: group_transform.transform_point3(cell.position),
                cancel,
            });
            created.push((
                cell.id,
                DrawTile {
                    cell: *cell,
                    url,
                    transform: Mat4::from_translation(cell.position),
                    ticket,
                    image: None,
                    fetch: Some(handle),
                },
            ));
            report.created.push(name);
        }
        group.tiles.extend(created);

        for tile in retired {
            self.retire(tile, now);
        }
    }

    /// Cancel a tile's fetch and drop its image reference.
    fn retire(&self, tile: DrawTile<H>, now: Instant) {
        if let Some(fetch) = tile.fetch {
            fetch.cancel();
            tracing::trace!(url = %tile.url, "cancelled tile fetch");
        }
        if tile.image.is_some() {
            self.cache.release(&tile.url, now);
        }
    }

    /// Hand a finished fetch back to the renderer.
    ///
    /// A successful result holds one cache reference. It is bound if the tile
    /// still exists and is waiting on this `ticket`; otherwise the reference
    /// is released again.
    pub fn complete(
        &mut self,
        name: TileName,
        ticket: u64,
        result: Result<Arc<DecodedImage>>,
        now: Instant,
    ) -> BindOutcome {
        let live = self
            .tile(&name)
            .is_some_and(|tile| tile.ticket == ticket && tile.is_pending());

        match result {
            Ok(image) if live => {
                if let Some(tile) = self.tile_mut(&name) {
                    tile.fetch = None;
                    tile.image = Some(Arc::clone(&image));
                }
                tracing::trace!(tile = %name, "bound tile texture");
                BindOutcome::Bound(image)
            }
            Ok(_) => {
                let url = self.address.cell_url(name.level, &name.cell);
                self.cache.release(&url, now);
                tracing::trace!(tile = %name, "dropped stale tile result");
                BindOutcome::Stale
            }
            Err(error) => {
                if live {
                    self.remove_tile(&name);
                }
                if error.is_cancelled() {
                    tracing::trace!(tile = %name, "tile fetch cancelled");
                    BindOutcome::Cancelled
                } else {
                    tracing::warn!(tile = %name, %error, "tile fetch failed");
                    BindOutcome::Failed
                }
            }
        }
    }

    fn tile_mut(&mut self, name: &TileName) -> Option<&mut DrawTile<H>> {
        self.groups.get_mut(&name.group())?.tiles.get_mut(&name.cell)
    }

    fn remove_tile(&mut self, name: &TileName) {
        if let Some(group) = self.groups.get_mut(&name.group()) {
            group.tiles.remove(&name.cell);
        }
    }

    /// Cancel every outstanding fetch. Tiles stay in place without a fetch.
    pub fn cancel_all(&mut self) {
        let mut cancelled = 0usize;
        for group in self.groups.values_mut() {
            for tile in group.tiles.values_mut() {
                if let Some(fetch) = tile.fetch.take() {
                    fetch.cancel();
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled outstanding tile fetches");
        }
    }

    /// Cancel all fetches, release every image reference and drop all groups.
    pub fn clear(&mut self, now: Instant) {
        let groups = std::mem::take(&mut self.groups);
        for group in groups.into_values() {
            for tile in group.tiles.into_values() {
                self.retire(tile, now);
            }
        }
    }

    #[must_use]
    pub fn group(&self, key: &GroupKey) -> Option<&TileGroup<H>> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = &TileGroup<H>> {
        self.groups.values()
    }

    #[must_use]
    pub fn tile(&self, name: &TileName) -> Option<&DrawTile<H>> {
        self.groups.get(&name.group())?.tiles.get(&name.cell)
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.groups.values().map(TileGroup::len).sum()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.groups
            .values()
            .flat_map(TileGroup::tiles)
            .filter(|tile| tile.is_pending())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::culling::VisibleFaces;
    use crate::texture_cache::CacheConfig;

    #[derive(Default)]
    struct RecordingSpawner {
        requests: Vec<TileRequest>,
    }

    impl FetchSpawner for RecordingSpawner {
        type Handle = CancelToken;

        fn spawn(&mut self, request: TileRequest) -> CancelToken {
            let token = request.cancel.clone();
            self.requests.push(request);
            token
        }
    }

    fn level(value: u32) -> Level {
        Level::new(value).unwrap()
    }

    fn cell(face: Face, col: u32, row: u32) -> Cell {
        Cell {
            id: CellId { face, col, row },
            position: Vec3::new(col as f32, row as f32, 0.0),
        }
    }

    fn store_with(level: Level, cells: &[Cell]) -> TileStore {
        let mut store = TileStore::new(10.0);
        store.set_positions(level);
        let mut faces = VisibleFaces::new();
        for cell in cells {
            faces.entry(cell.id.face).or_default().push(*cell);
        }
        store.set_visibles(level, faces);
        store
    }

    fn renderer() -> SideRenderer<CancelToken> {
        SideRenderer::new(
            TileAddress::new("/textures", "lobby"),
            TextureCache::new(CacheConfig::default()),
            10.0,
        )
    }

    fn image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::new(vec![0; 16], 2, 2).unwrap())
    }

    /// Resolve a request the way a fetch task would: through the cache.
    fn fetched(renderer: &SideRenderer<CancelToken>, request: &TileRequest, now: Instant) -> Arc<DecodedImage> {
        renderer
            .cache()
            .insert(&request.url, image(), request.anchor, request.name.level, now)
    }

    #[test]
    fn test_reconcile_creates_pending_tiles() {
        let two = level(2);
        let store = store_with(two, &[cell(Face::Pz, 0, 0), cell(Face::Pz, 1, 0), cell(Face::Nx, 1, 1)]);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();

        let report = renderer.reconcile(two, &store, &mut spawner, Instant::now());

        assert_eq!(report.created.len(), 3);
        assert!(report.destroyed.is_empty());
        assert_eq!(renderer.tile_count(), 3);
        assert_eq!(renderer.pending_count(), 3);
        let urls: Vec<&str> = spawner.requests.iter().map(|r| r.url.as_str()).collect();
        assert!(urls.contains(&"/textures/lobby/pz/1/01.webp"));
        assert!(urls.contains(&"/textures/lobby/nx/1/11.webp"));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let two = level(2);
        let store = store_with(two, &[cell(Face::Pz, 0, 0), cell(Face::Py, 1, 0)]);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();

        renderer.reconcile(two, &store, &mut spawner, now);
        let report = renderer.reconcile(two, &store, &mut spawner, now);

        assert!(report.is_empty());
        assert_eq!(spawner.requests.len(), 2);
    }

    #[test]
    fn test_cell_leaving_view_cancels_fetch() {
        let two = level(2);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();

        let store = store_with(two, &[cell(Face::Pz, 0, 0), cell(Face::Pz, 1, 0)]);
        renderer.reconcile(two, &store, &mut spawner, now);

        let store = store_with(two, &[cell(Face::Pz, 1, 0)]);
        let report = renderer.reconcile(two, &store, &mut spawner, now);

        let gone = TileName {
            level: two,
            cell: CellId {
                face: Face::Pz,
                col: 0,
                row: 0,
            },
        };
        assert_eq!(report.destroyed, vec![gone]);
        assert!(report.groups_removed.is_empty());
        let request = spawner.requests.iter().find(|r| r.name == gone).unwrap();
        assert!(request.cancel.is_cancelled());
        assert!(renderer.tile(&gone).is_none());
    }

    #[test]
    fn test_level_change_tears_down_groups() {
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();

        let mut store = store_with(level(2), &[cell(Face::Pz, 0, 0)]);
        renderer.reconcile(level(2), &store, &mut spawner, now);

        store.set_positions(level(3));
        let mut faces = VisibleFaces::new();
        faces.insert(Face::Pz, vec![cell(Face::Pz, 2, 2)]);
        store.set_visibles(level(3), faces);
        let report = renderer.reconcile(level(3), &store, &mut spawner, now);

        assert_eq!(
            report.groups_removed,
            vec![GroupKey {
                face: Face::Pz,
                level: level(2)
            }]
        );
        assert_eq!(report.created.len(), 1);
        assert!(spawner.requests[0].cancel.is_cancelled());

        // Back at the base level every group goes.
        let report = renderer.reconcile(Level::BASE, &store, &mut spawner, now);
        assert_eq!(report.groups_removed.len(), 1);
        assert_eq!(renderer.tile_count(), 0);
    }

    #[test]
    fn test_complete_binds_live_tile() {
        let two = level(2);
        let store = store_with(two, &[cell(Face::Pz, 0, 0)]);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();
        renderer.reconcile(two, &store, &mut spawner, now);

        let request = spawner.requests[0].clone();
        let image = fetched(&renderer, &request, now);
        let outcome = renderer.complete(request.name, request.ticket, Ok(image), now);

        assert!(matches!(outcome, BindOutcome::Bound(_)));
        let tile = renderer.tile(&request.name).unwrap();
        assert!(!tile.is_pending());
        assert!(tile.image().is_some());
        assert_eq!(renderer.cache().ref_count(&request.url), Some(1));
    }

    #[test]
    fn test_late_result_for_removed_tile_is_released() {
        let two = level(2);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();
        renderer.reconcile(two, &store_with(two, &[cell(Face::Pz, 0, 0)]), &mut spawner, now);
        renderer.reconcile(two, &store_with(two, &[cell(Face::Pz, 1, 1)]), &mut spawner, now);

        let request = spawner.requests[0].clone();
        let image = fetched(&renderer, &request, now);
        let outcome = renderer.complete(request.name, request.ticket, Ok(image), now);

        assert!(matches!(outcome, BindOutcome::Stale));
        assert_eq!(renderer.cache().ref_count(&request.url), Some(0));
    }

    #[test]
    fn test_result_for_old_ticket_is_stale() {
        let two = level(2);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();
        let visible = store_with(two, &[cell(Face::Pz, 0, 0)]);
        let hidden = store_with(two, &[cell(Face::Pz, 1, 1)]);

        // The tile leaves and comes back, so it is requested twice.
        renderer.reconcile(two, &visible, &mut spawner, now);
        renderer.reconcile(two, &hidden, &mut spawner, now);
        renderer.reconcile(two, &visible, &mut spawner, now);

        let old = spawner.requests[0].clone();
        let new = spawner.requests[2].clone();
        assert_eq!(old.name, new.name);
        assert_ne!(old.ticket, new.ticket);

        let image = fetched(&renderer, &old, now);
        assert!(matches!(
            renderer.complete(old.name, old.ticket, Ok(image), now),
            BindOutcome::Stale
        ));
        assert!(renderer.tile(&new.name).unwrap().is_pending());
    }

    #[test]
    fn test_failed_fetch_is_retried() {
        let two = level(2);
        let store = store_with(two, &[cell(Face::Pz, 0, 0)]);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();
        renderer.reconcile(two, &store, &mut spawner, now);

        let request = spawner.requests[0].clone();
        let error = Error::HttpStatus {
            url: request.url.clone(),
            status: 404,
        };
        let outcome = renderer.complete(request.name, request.ticket, Err(error), now);
        assert!(matches!(outcome, BindOutcome::Failed));
        assert!(renderer.tile(&request.name).is_none());

        let report = renderer.reconcile(two, &store, &mut spawner, now);
        assert_eq!(report.created, vec![request.name]);
        assert_eq!(spawner.requests.len(), 2);
    }

    #[test]
    fn test_cancelled_result_is_not_a_failure() {
        let two = level(2);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();
        renderer.reconcile(two, &store_with(two, &[cell(Face::Pz, 0, 0)]), &mut spawner, now);
        renderer.reconcile(two, &store_with(two, &[cell(Face::Pz, 1, 1)]), &mut spawner, now);

        let request = &spawner.requests[0];
        let error = Error::FetchCancelled {
            url: request.url.clone(),
        };
        let outcome = renderer.complete(request.name, request.ticket, Err(error), now);
        assert!(matches!(outcome, BindOutcome::Cancelled));
    }

    #[test]
    fn test_cancel_all_and_clear() {
        let two = level(2);
        let store = store_with(two, &[cell(Face::Pz, 0, 0), cell(Face::Pz, 1, 0)]);
        let mut renderer = renderer();
        let mut spawner = RecordingSpawner::default();
        let now = Instant::now();
        renderer.reconcile(two, &store, &mut spawner, now);

        let bound = spawner.requests[0].clone();
        let image = fetched(&renderer, &bound, now);
        renderer.complete(bound.name, bound.ticket, Ok(image), now);

        renderer.cancel_all();
        assert_eq!(renderer.pending_count(), 0);
        assert!(spawner.requests[1].cancel.is_cancelled());

        renderer.clear(now);
        assert_eq!(renderer.tile_count(), 0);
        assert_eq!(renderer.cache().ref_count(&bound.url), Some(0));
    }
}
