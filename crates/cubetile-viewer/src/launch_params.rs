//! Launch parameter parsing for the viewer.
//!
//! On native, parameters are parsed from command-line arguments using clap.
//! On WASM, defaults are used (CLI argument parsing is not available).

use bevy::prelude::*;
use cubetile::{CacheConfig, PolicyConfig, TileAddress};

use crate::panorama::FACE_SIZE;

/// Default tile server root.
const DEFAULT_BASE_URL: &str = "http://localhost:8080/textures";
/// Default panorama identifier.
const DEFAULT_IMAGE_ID: &str = "panorama";
/// Default tile file extension.
const DEFAULT_EXTENSION: &str = "webp";
/// Default starting field of view in degrees.
const DEFAULT_FOV: f32 = 70.0;
/// Default radius around the view point within which textures stay active.
///
/// The view point sits one face size ahead of the camera, so this keeps
/// roughly the half of the cube being looked at.
const DEFAULT_VIEWPORT_RADIUS: f32 = FACE_SIZE;

/// Launch parameters for the viewer.
#[derive(Resource, Debug, Clone)]
pub struct LaunchParams {
    /// Where tiles are fetched from.
    pub address: TileAddress,
    /// Starting field of view in degrees.
    pub fov: f32,
    /// Level selection settings; the viewport height is filled in from the window.
    pub policy: PolicyConfig,
    pub cache: CacheConfig,
}

impl Default for LaunchParams {
    fn default() -> Self {
        Self {
            address: TileAddress::new(DEFAULT_BASE_URL, DEFAULT_IMAGE_ID)
                .with_extension(DEFAULT_EXTENSION),
            fov: DEFAULT_FOV,
            policy: PolicyConfig::default(),
            cache: CacheConfig {
                viewport_radius: DEFAULT_VIEWPORT_RADIUS,
                ..CacheConfig::default()
            },
        }
    }
}

#[cfg(not(target_family = "wasm"))]
mod native {
    use std::time::Duration;

    use clap::Parser;
    use cubetile::Level;

    use super::*;

    /// Parse a level number, rejecting zero.
    fn parse_level(s: &str) -> Result<Level, String> {
        let value = s
            .parse::<u32>()
            .map_err(|e| format!("invalid level: {e}"))?;
        Level::new(value).map_err(|e| e.to_string())
    }

    #[derive(Parser)]
    #[command(about = "Cube panorama viewer with level-of-detail tile streaming")]
    struct CliArgs {
        /// Root URL of the tile server.
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Panorama identifier, the path segment after the base URL.
        #[arg(long, default_value = DEFAULT_IMAGE_ID)]
        image: String,

        /// Tile file extension.
        #[arg(long, default_value = DEFAULT_EXTENSION)]
        extension: String,

        /// Zero-pad tile row and column indices to this width.
        #[arg(long, default_value_t = 1)]
        index_width: usize,

        /// Starting field of view in degrees.
        #[arg(long, default_value_t = DEFAULT_FOV)]
        fov: f32,

        /// Finest level the server provides.
        #[arg(long, value_parser = parse_level, default_value = "3")]
        max_level: Level,

        /// Source tile edge length in pixels.
        #[arg(long, default_value_t = 512.0)]
        tile_size: f32,

        /// Widest field of view allowed, in degrees.
        #[arg(long, default_value_t = 100.0)]
        max_fov: f32,

        /// Active textures kept before the farthest are demoted.
        #[arg(long, default_value_t = 100)]
        max_active_textures: usize,

        /// Seconds an unused texture waits before its memory is dropped.
        #[arg(long, default_value_t = 5.0)]
        disposal_timeout: f32,

        /// Distance from the view within which textures count as active.
        #[arg(long, default_value_t = DEFAULT_VIEWPORT_RADIUS)]
        viewport_radius: f32,
    }

    pub fn parse() -> LaunchParams {
        let args = CliArgs::parse();
        let defaults = LaunchParams::default();
        LaunchParams {
            address: TileAddress::new(args.base_url, args.image)
                .with_extension(args.extension)
                .with_index_width(args.index_width),
            fov: args.fov,
            policy: PolicyConfig {
                tile_base_size: args.tile_size,
                max_level: args.max_level,
                max_fov: args.max_fov,
                ..defaults.policy
            },
            cache: CacheConfig {
                max_active_textures: args.max_active_textures,
                disposal_timeout: Duration::from_secs_f32(args.disposal_timeout.max(0.0)),
                viewport_radius: args.viewport_radius,
                ..defaults.cache
            },
        }
    }
}

/// Parse launch parameters from CLI args (native) or use defaults (WASM).
pub fn parse() -> LaunchParams {
    #[cfg(not(target_family = "wasm"))]
    {
        native::parse()
    }
    #[cfg(target_family = "wasm")]
    {
        LaunchParams::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cubetile::{DecodedImage, EntryStatus, Level, TextureCache};
    use web_time::Instant;

    use super::*;

    #[test]
    fn test_defaults_point_at_local_server() {
        let params = LaunchParams::default();
        assert_eq!(
            params.address.base_face_url(cubetile::Face::Pz),
            "http://localhost:8080/textures/panorama/pz/0/00.webp"
        );
        assert_eq!(params.policy.max_level, cubetile::Level::new(3).unwrap());
    }

    #[test]
    fn test_default_radius_deactivates_tiles_behind_the_camera() {
        let cache = TextureCache::new(LaunchParams::default().cache);
        let now = Instant::now();
        let image = Arc::new(DecodedImage::new(vec![0; 4], 1, 1).unwrap());
        let level = Level::new(2).unwrap();
        let half = FACE_SIZE / 2.0;
        let front = Vec3::new(0.0, 0.0, -half);
        cache.insert("front", Arc::clone(&image), front, level, now);
        cache.insert("back", image, Vec3::new(half, half, half), level, now);

        // Looking down -z, the view point sits one face size ahead.
        cache.update_viewport(Vec3::NEG_Z * FACE_SIZE, now);
        assert_eq!(cache.status("front"), Some(EntryStatus::Active));
        assert_eq!(cache.status("back"), Some(EntryStatus::Inactive));
    }
}
