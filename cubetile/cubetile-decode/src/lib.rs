//! Decode cube panorama tile images into RGBA pixel data.
//!
//! This crate provides pure synchronous decoding functions. They can be
//! called from any threading context; the caller decides where decoding
//! happens (typically inside the fetch task, off the update loop).
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **User-controlled parallelism**: Client decides how to parallelize
//! - **Web-compatible**: Compiles to WASM

mod error;
mod texture;

pub use error::{DecodeError, DecodeResult};
pub use texture::{DecodedImage, TileFormat, decode_image, decode_with_format, detect_format};
