//! Unlit, alpha-blended material for panorama tiles.
//!
//! Tiles ignore depth entirely: they neither test nor write it, so draw order
//! alone decides which level ends up on top. Shadow and prepass passes are
//! skipped since nothing in the scene is lit.

use bevy::asset::embedded_asset;
use bevy::mesh::MeshVertexBufferLayoutRef;
use bevy::pbr::{Material, MaterialPipeline, MaterialPipelineKey, MaterialPlugin};
use bevy::prelude::*;
use bevy::render::render_resource::{
    AsBindGroup, CompareFunction, RenderPipelineDescriptor, SpecializedMeshPipelineError,
};
use bevy::shader::ShaderRef;

/// Plugin that registers the tile material and its shader.
pub struct TileMaterialPlugin;

impl Plugin for TileMaterialPlugin {
    fn build(&self, app: &mut App) {
        embedded_asset!(app, "tile_material.wgsl");
        app.add_plugins(MaterialPlugin::<TileMaterial>::default());
    }
}

/// A texture drawn as-is, multiplied by an opacity.
#[derive(Asset, TypePath, AsBindGroup, Debug, Clone)]
pub struct TileMaterial {
    #[texture(0)]
    #[sampler(1)]
    pub texture: Handle<Image>,
    /// Opacity in `.x`; padded to 16 bytes for WebGL compatibility.
    #[uniform(2)]
    pub params: Vec4,
}

impl TileMaterial {
    pub fn new(texture: Handle<Image>) -> Self {
        Self {
            texture,
            params: Vec4::new(1.0, 0.0, 0.0, 0.0),
        }
    }
}

impl Material for TileMaterial {
    fn fragment_shader() -> ShaderRef {
        "embedded://cubetile_viewer/tile_material.wgsl".into()
    }

    fn alpha_mode(&self) -> AlphaMode {
        AlphaMode::Blend
    }

    fn enable_shadows() -> bool {
        false
    }

    fn enable_prepass() -> bool {
        false
    }

    fn specialize(
        _pipeline: &MaterialPipeline,
        descriptor: &mut RenderPipelineDescriptor,
        _layout: &MeshVertexBufferLayoutRef,
        _key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        // Faces are seen from inside the cube and mirrored, so winding varies.
        descriptor.primitive.cull_mode = None;
        if let Some(depth_stencil) = descriptor.depth_stencil.as_mut() {
            depth_stencil.depth_write_enabled = false;
            depth_stencil.depth_compare = CompareFunction::Always;
        }
        Ok(())
    }
}
