//! Caption overlays for image collections.
//!
//! The core is [`compositor::Compositor::render`], which takes an image, a
//! caption and an [`settings::OverlaySettings`] snapshot and returns a new
//! image with a blurred rounded placard, wrapped text and an optional
//! outlined corner watermark. [`collection`] and [`gallery`] handle loading
//! PNG/zip inputs and exporting an HTML thumbnail gallery.

pub mod collection;
pub mod compositor;
pub mod error;
pub mod font;
pub mod gallery;
pub mod layout;
pub mod logging;
pub mod raster;
pub mod settings;

pub use compositor::{Compositor, PanelGeometry, RenderOutput, RenderRequest};
pub use error::{RenderError, RenderResult};
pub use font::{Font, FontLibrary};
pub use layout::WrappedTextBlock;
pub use settings::{Color, OverlayPosition, OverlaySettings};
