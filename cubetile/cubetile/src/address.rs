//! Tile URL layout on the asset server.

use crate::face::Face;
use crate::level::Level;
use crate::types::CellId;

/// Default asset root.
pub const DEFAULT_BASE_URL: &str = "/textures";

/// Where the tiles of one panorama live.
///
/// Tiles are addressed as `{base}/{image}/{face}/{level - 1}/{row}{col}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileAddress {
    pub base_url: String,
    pub image_id: String,
    pub extension: String,
    /// Zero-padding width of the row and column indices.
    pub index_width: usize,
}

impl TileAddress {
    #[must_use]
    pub fn new(base_url: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            image_id: image_id.into(),
            extension: "webp".to_string(),
            index_width: 1,
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    #[must_use]
    pub fn with_index_width(mut self, index_width: usize) -> Self {
        self.index_width = index_width;
        self
    }

    /// URL of the tile at `row`, `col` of `face` at `level`.
    #[must_use]
    pub fn tile_url(&self, face: Face, level: Level, row: u32, col: u32) -> String {
        format!(
            "{}/{}/{}/{}/{:0width$}{:0width$}.{}",
            self.base_url.trim_end_matches('/'),
            self.image_id,
            face,
            level.path_index(),
            row,
            col,
            self.extension,
            width = self.index_width,
        )
    }

    /// URL of the tile covering `cell` at `level`.
    #[must_use]
    pub fn cell_url(&self, level: Level, cell: &CellId) -> String {
        self.tile_url(cell.face, level, cell.row, cell.col)
    }

    /// URL of the single level 1 texture of `face`.
    #[must_use]
    pub fn base_face_url(&self, face: Face) -> String {
        self.tile_url(face, Level::BASE, 0, 0)
    }

    /// Base textures of all six faces.
    #[must_use]
    pub fn base_face_urls(&self) -> [(Face, String); 6] {
        Face::ALL.map(|face| (face, self.base_face_url(face)))
    }
}

impl Default for TileAddress {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, "")
    }
}
