//! Streams panorama tiles into the scene.
//!
//! This module owns the level-of-detail core and bridges it to Bevy:
//!
//! 1. Committed zoom samples drive the level policy
//! 2. Camera movement updates the visible cell set
//! 3. The side renderer diffs that set against the live tiles and starts fetches
//! 4. Finished fetches come back over a channel and are uploaded as textures
//!
//! The six base faces are fetched once at startup and stay up behind the
//! refined tiles. Fetch tasks run on the platform runtime through
//! [`TaskSpawner`]; results are polled here with `try_recv`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use bevy::asset::RenderAssetUsages;
use bevy::ecs::message::MessageReader;
use bevy::prelude::*;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use bevy::window::{PrimaryWindow, WindowResized};
use cubetile::grid::cell_size;
use cubetile::{
    BindOutcome, CancelToken, DecodedImage, EntryStatus, Face, FetchSpawner, GroupKey, HttpFetcher, InFlight,
    Level, LevelPolicy, LodController, PolicyConfig, ReconcileReport, SideRenderer, TextureCache,
    TileFetcher, TileName, TileRequest, TileStore, ZoomInput,
};
use web_time::Instant;

use crate::async_runtime::{SpawnedTask, TaskSpawner};
use crate::camera::{PanoramaCamera, ViewInteraction, Zoom, camera_state};
use crate::launch_params::LaunchParams;
use crate::tile_material::TileMaterial;

/// Edge length of the cube in world units.
pub const FACE_SIZE: f32 = 10.0;

/// Scale of the refined tile cube relative to the base faces.
///
/// Seen from the center a scaled cube covers the same pixels, and the smaller
/// cube always sorts in front of the base faces.
const REFINED_SCALE: f32 = 0.25;

/// Plugin that loads and draws the panorama.
pub struct PanoramaPlugin;

impl Plugin for PanoramaPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PanoramaChannels>()
            .init_resource::<TileEntities>()
            .add_systems(Startup, setup_panorama)
            .add_systems(
                Update,
                (
                    resize_viewport,
                    update_tiles,
                    poll_base_faces,
                    poll_tile_results,
                    sweep_textures,
                )
                    .chain()
                    .run_if(resource_exists::<Panorama>),
            )
            .add_systems(Last, teardown_on_exit);
    }
}

/// A tile fetch running on a background task.
pub struct TileFetch {
    cancel: CancelToken,
    task: SpawnedTask,
}

impl InFlight for TileFetch {
    fn cancel(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Level-of-detail state for the loaded panorama.
#[derive(Resource)]
pub struct Panorama {
    pub store: TileStore,
    pub controller: LodController,
    pub renderer: SideRenderer<TileFetch>,
    pub cache: TextureCache,
    fetcher: Arc<HttpFetcher>,
    quad: Handle<Mesh>,
    textures: TileTextures,
    base_fetches: Vec<TileFetch>,
    pub base_faces_loaded: usize,
}

/// Uploaded tile materials, one per tile URL.
///
/// Tiles sharing a URL share the cache's decoded image, so they share the GPU
/// texture too. An entry lives until the cache drops the image's pixels.
#[derive(Default)]
struct TileTextures {
    by_url: HashMap<String, Handle<TileMaterial>>,
}

impl TileTextures {
    fn get_or_upload(
        &mut self,
        url: &str,
        upload: impl FnOnce() -> Handle<TileMaterial>,
    ) -> Handle<TileMaterial> {
        if let Some(material) = self.by_url.get(url) {
            return material.clone();
        }
        let material = upload();
        self.by_url.insert(url.to_owned(), material.clone());
        material
    }

    /// Forget materials whose cache entry was disposed or dropped.
    fn prune(&mut self, cache: &TextureCache) -> usize {
        let before = self.by_url.len();
        self.by_url.retain(|url, _| {
            cache
                .status(url)
                .is_some_and(|status| status != EntryStatus::Disposed)
        });
        before - self.by_url.len()
    }

    fn clear(&mut self) {
        self.by_url.clear();
    }
}

/// A finished tile fetch.
struct TileResult {
    name: TileName,
    ticket: u64,
    result: cubetile::Result<Arc<DecodedImage>>,
}

/// Channels for receiving fetch results from background tasks.
///
/// Unbounded so a finished task never waits: an aborted task must not be
/// left holding a cache reference it could not hand over.
#[derive(Resource)]
struct PanoramaChannels {
    tile_rx: Receiver<TileResult>,
    tile_tx: Sender<TileResult>,
    face_rx: Receiver<(Face, cubetile::Result<DecodedImage>)>,
    face_tx: Sender<(Face, cubetile::Result<DecodedImage>)>,
}

impl Default for PanoramaChannels {
    fn default() -> Self {
        let (tile_tx, tile_rx) = async_channel::unbounded();
        let (face_tx, face_rx) = async_channel::unbounded();
        Self {
            tile_rx,
            tile_tx,
            face_rx,
            face_tx,
        }
    }
}

/// Entities spawned for base faces, tile groups and tiles.
#[derive(Resource, Default)]
pub struct TileEntities {
    faces: HashMap<Face, Entity>,
    groups: HashMap<GroupKey, Entity>,
    tiles: HashMap<TileName, Entity>,
}

impl TileEntities {
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }
}

/// Marker component for base face entities.
#[derive(Component)]
pub struct BaseFace;

/// Marker component for refined tile entities.
#[derive(Component)]
pub struct PanoramaTile;

/// Starts renderer fetches as background tasks.
struct TaskFetchSpawner<'a, 'w, 's> {
    tasks: &'a TaskSpawner<'w, 's>,
    cache: &'a TextureCache,
    fetcher: &'a Arc<HttpFetcher>,
    tx: &'a Sender<TileResult>,
}

impl FetchSpawner for TaskFetchSpawner<'_, '_, '_> {
    type Handle = TileFetch;

    fn spawn(&mut self, request: TileRequest) -> TileFetch {
        let cache = self.cache.clone();
        let fetcher = Arc::clone(self.fetcher);
        let tx = self.tx.clone();
        let cancel = request.cancel.clone();

        let task = self.tasks.spawn_cancellable(async move {
            let result = cache
                .get_texture(
                    &request.url,
                    request.anchor,
                    request.name.level,
                    fetcher.as_ref(),
                    &request.cancel,
                )
                .await;
            // No await between the cache insert and the hand-over.
            let _ = tx.try_send(TileResult {
                name: request.name,
                ticket: request.ticket,
                result,
            });
        });

        TileFetch { cancel, task }
    }
}

/// Create the core state and start loading the base faces.
#[allow(clippy::needless_pass_by_value, clippy::cast_precision_loss)]
fn setup_panorama(
    mut commands: Commands,
    params: Res<LaunchParams>,
    window: Single<&Window, With<PrimaryWindow>>,
    mut meshes: ResMut<Assets<Mesh>>,
    channels: Res<PanoramaChannels>,
    spawner: TaskSpawner,
    mut entities: ResMut<TileEntities>,
) {
    let policy = LevelPolicy::new(PolicyConfig {
        viewport_height: window.physical_height() as f32,
        ..params.policy
    });
    let zoom = ZoomInput::new(params.fov, &policy);
    let cache = TextureCache::new(params.cache);
    let fetcher = Arc::new(HttpFetcher::new());
    let quad = meshes.add(Rectangle::new(1.0, 1.0));

    let mut base_fetches = Vec::with_capacity(Face::ALL.len());
    for (face, url) in params.address.base_face_urls() {
        let transform = face.matrix(FACE_SIZE) * Mat4::from_scale(Vec3::splat(FACE_SIZE));
        let entity = commands
            .spawn((
                Mesh3d(quad.clone()),
                Transform::from_matrix(transform),
                Visibility::Hidden,
                BaseFace,
            ))
            .id();
        entities.faces.insert(face, entity);

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let fetcher = Arc::clone(&fetcher);
        let tx = channels.face_tx.clone();
        let task = spawner.spawn_cancellable(async move {
            let result = fetcher.fetch(&url, &token).await;
            let _ = tx.try_send((face, result));
        });
        base_fetches.push(TileFetch { cancel, task });
    }

    tracing::info!(
        "Panorama: loading '{}' from {}, fov {:.1}, viewport height {}",
        params.address.image_id,
        params.address.base_url,
        zoom.fov(),
        policy.config().viewport_height,
    );

    // The opening field of view counts as committed.
    let mut store = TileStore::new(FACE_SIZE);
    store.set_fov(zoom.fov());
    let mut controller = LodController::new(policy);
    controller.settle(&mut store);

    commands.insert_resource(Zoom(zoom));
    commands.insert_resource(Panorama {
        store,
        controller,
        renderer: SideRenderer::new(params.address.clone(), cache.clone(), FACE_SIZE),
        cache,
        fetcher,
        quad,
        textures: TileTextures::default(),
        base_fetches,
        base_faces_loaded: 0,
    });
}

/// Follow window height changes; they move every level's field-of-view band.
#[allow(clippy::cast_precision_loss)]
fn resize_viewport(
    mut resized: MessageReader<WindowResized>,
    window: Single<&Window, With<PrimaryWindow>>,
    mut panorama: ResMut<Panorama>,
    mut zoom: ResMut<Zoom>,
) {
    if resized.read().count() == 0 {
        return;
    }
    let height = window.physical_height() as f32;
    let panorama = &mut *panorama;
    if (panorama.controller.policy().config().viewport_height - height).abs() < f32::EPSILON {
        return;
    }
    panorama.controller.policy_mut().set_viewport_height(height);
    zoom.0.set_policy(panorama.controller.policy());
    panorama
        .controller
        .on_fov(zoom.0.fov(), &mut panorama.store);
}

/// Commit zoom, update visibility and reconcile tile entities.
#[allow(clippy::needless_pass_by_value)]
fn update_tiles(
    mut commands: Commands,
    mut panorama: ResMut<Panorama>,
    mut entities: ResMut<TileEntities>,
    mut zoom: ResMut<Zoom>,
    interaction: Res<ViewInteraction>,
    channels: Res<PanoramaChannels>,
    spawner: TaskSpawner,
    camera_query: Query<(&Transform, &Projection), With<PanoramaCamera>>,
    mut reconciled_level: Local<Option<Level>>,
) {
    let now = Instant::now();
    let panorama = &mut *panorama;

    if let Some(fov) = zoom.0.poll(now) {
        panorama.controller.on_fov(fov, &mut panorama.store);
    }
    panorama.controller.settle(&mut panorama.store);
    // Also catches level changes made on resize.
    let level = panorama.controller.level();
    let level_changed = *reconciled_level != Some(level);

    let Ok((transform, projection)) = camera_query.single() else {
        return;
    };
    let Some(camera) = camera_state(transform, projection, interaction.0) else {
        return;
    };

    if camera.interacting || level_changed {
        panorama
            .cache
            .update_viewport(transform.forward() * FACE_SIZE, now);
    }

    let recomputed = match panorama.controller.on_camera(&camera, &mut panorama.store) {
        Ok(recomputed) => recomputed,
        Err(e) => {
            tracing::error!("Panorama: visibility update failed: {e}");
            return;
        }
    };
    if !recomputed && !level_changed {
        return;
    }

    let mut fetches = TaskFetchSpawner {
        tasks: &spawner,
        cache: &panorama.cache,
        fetcher: &panorama.fetcher,
        tx: &channels.tile_tx,
    };
    let report = panorama
        .renderer
        .reconcile(level, &panorama.store, &mut fetches, now);
    *reconciled_level = Some(level);
    if !report.is_empty() {
        sync_tile_entities(
            &mut commands,
            &mut entities,
            &panorama.renderer,
            &panorama.quad,
            &report,
        );
    }
}

/// Mirror a reconciliation pass in the entity hierarchy.
fn sync_tile_entities(
    commands: &mut Commands,
    entities: &mut TileEntities,
    renderer: &SideRenderer<TileFetch>,
    quad: &Handle<Mesh>,
    report: &ReconcileReport,
) {
    // Despawning a group takes its tiles with it.
    let removed: HashSet<GroupKey> = report.groups_removed.iter().copied().collect();
    for name in &report.destroyed {
        if let Some(entity) = entities.tiles.remove(name)
            && !removed.contains(&name.group())
        {
            commands.entity(entity).despawn();
        }
    }
    for key in &report.groups_removed {
        if let Some(entity) = entities.groups.remove(key) {
            commands.entity(entity).despawn();
        }
    }

    for name in &report.created {
        let Some(group) = renderer.group(&name.group()) else {
            continue;
        };
        let Some(tile) = group.tile(&name.cell) else {
            continue;
        };
        let parent = *entities.groups.entry(group.key).or_insert_with(|| {
            commands
                .spawn((
                    Transform::from_matrix(
                        Mat4::from_scale(Vec3::splat(REFINED_SCALE)) * group.transform,
                    ),
                    Visibility::Visible,
                ))
                .id()
        });

        let cell = cell_size(name.level, FACE_SIZE);
        let entity = commands
            .spawn((
                Mesh3d(quad.clone()),
                Transform::from_matrix(tile.transform * Mat4::from_scale(Vec3::splat(cell))),
                Visibility::Hidden,
                PanoramaTile,
                ChildOf(parent),
            ))
            .id();
        if let Some(previous) = entities.tiles.insert(*name, entity) {
            commands.entity(previous).despawn();
        }
    }
}

/// Convert a decoded tile into a GPU texture.
fn to_texture(image: &DecodedImage) -> Image {
    Image::new(
        Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        image.pixels.clone(),
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::RENDER_WORLD,
    )
}

fn upload_material(
    image: &DecodedImage,
    images: &mut Assets<Image>,
    materials: &mut Assets<TileMaterial>,
) -> Handle<TileMaterial> {
    materials.add(TileMaterial::new(images.add(to_texture(image))))
}

/// Show the material on an entity that was waiting for its texture.
fn show_material(commands: &mut Commands, entity: Entity, material: Handle<TileMaterial>) {
    commands
        .entity(entity)
        .insert((MeshMaterial3d(material), Visibility::Inherited));
}

/// Poll base face results from channel.
#[allow(clippy::needless_pass_by_value)]
fn poll_base_faces(
    mut commands: Commands,
    mut panorama: ResMut<Panorama>,
    entities: Res<TileEntities>,
    mut images: ResMut<Assets<Image>>,
    mut materials: ResMut<Assets<TileMaterial>>,
    channels: Res<PanoramaChannels>,
) {
    while let Ok((face, result)) = channels.face_rx.try_recv() {
        match result {
            Ok(image) => {
                let Some(&entity) = entities.faces.get(&face) else {
                    continue;
                };
                let material = upload_material(&image, &mut images, &mut materials);
                show_material(&mut commands, entity, material);
                panorama.base_faces_loaded += 1;
                tracing::debug!(
                    "Panorama: base face {face} loaded ({}x{})",
                    image.width,
                    image.height
                );
                if panorama.base_faces_loaded == Face::ALL.len() {
                    tracing::info!("Panorama: all base faces loaded");
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::warn!("Panorama: failed to load base face {face}: {e}");
            }
        }
    }
}

/// Poll tile results from channel and bind the ones still wanted.
#[allow(clippy::needless_pass_by_value)]
fn poll_tile_results(
    mut commands: Commands,
    mut panorama: ResMut<Panorama>,
    mut entities: ResMut<TileEntities>,
    mut images: ResMut<Assets<Image>>,
    mut materials: ResMut<Assets<TileMaterial>>,
    channels: Res<PanoramaChannels>,
) {
    let now = Instant::now();
    let panorama = &mut *panorama;
    while let Ok(done) = channels.tile_rx.try_recv() {
        match panorama
            .renderer
            .complete(done.name, done.ticket, done.result, now)
        {
            BindOutcome::Bound(image) => {
                let (Some(&entity), Some(tile)) = (
                    entities.tiles.get(&done.name),
                    panorama.renderer.tile(&done.name),
                ) else {
                    continue;
                };
                let material = panorama.textures.get_or_upload(&tile.url, || {
                    upload_material(&image, &mut images, &mut materials)
                });
                show_material(&mut commands, entity, material);
            }
            BindOutcome::Stale => {}
            BindOutcome::Cancelled | BindOutcome::Failed => {
                // The renderer dropped the tile; the next pass recreates it.
                if panorama.renderer.tile(&done.name).is_none()
                    && let Some(entity) = entities.tiles.remove(&done.name)
                {
                    commands.entity(entity).despawn();
                }
            }
        }
    }
}

fn sweep_textures(mut panorama: ResMut<Panorama>) {
    let panorama = &mut *panorama;
    if let Some(report) = panorama.cache.maybe_sweep(Instant::now()) {
        let unloaded = panorama.textures.prune(&panorama.cache);
        tracing::trace!(
            "Panorama: sweep disposed {} demoted {} dropped {}, unloaded {unloaded} textures",
            report.soft_disposed,
            report.demoted,
            report.hard_disposed
        );
    }
}

/// Cancel all fetches and drop every texture when the app exits.
fn teardown_on_exit(mut exits: MessageReader<AppExit>, panorama: Option<ResMut<Panorama>>) {
    if exits.read().count() == 0 {
        return;
    }
    let Some(mut panorama) = panorama else {
        return;
    };

    for fetch in panorama.base_fetches.drain(..) {
        fetch.cancel();
    }
    panorama.renderer.cancel_all();
    panorama.renderer.clear(Instant::now());
    panorama.cache.clear();
    panorama.textures.clear();
    tracing::info!("Panorama: torn down");
}

#[cfg(test)]
mod tests {
    use cubetile::{CacheConfig, Level};

    use super::*;

    fn cached(cache: &TextureCache, url: &str, now: Instant) {
        let image = Arc::new(DecodedImage::new(vec![0; 4], 1, 1).unwrap());
        cache.insert(url, image, Vec3::ZERO, Level::new(2).unwrap(), now);
    }

    #[test]
    fn test_shared_url_uploads_once() {
        let mut textures = TileTextures::default();
        let mut uploads = 0;
        for _ in 0..2 {
            textures.get_or_upload("/t/px/1/00.webp", || {
                uploads += 1;
                Handle::default()
            });
        }
        textures.get_or_upload("/t/px/1/01.webp", || {
            uploads += 1;
            Handle::default()
        });
        assert_eq!(uploads, 2);
        assert_eq!(textures.by_url.len(), 2);
    }

    #[test]
    fn test_prune_follows_cache_disposal() {
        let cache = TextureCache::new(CacheConfig::default());
        let now = Instant::now();
        cached(&cache, "kept", now);
        cached(&cache, "dropped", now);

        let mut textures = TileTextures::default();
        for url in ["kept", "dropped", "never cached"] {
            textures.get_or_upload(url, Handle::default);
        }

        cache.release("dropped", now);
        assert!(cache.hard_dispose("dropped"));
        assert_eq!(textures.prune(&cache), 2);
        assert!(textures.by_url.contains_key("kept"));
    }
}
