//! # tilepaint-core
//!
//! Editing core of a tile-based raster editor: sparse tiled pixel storage, undoable changes,
//! a node graph compositing the layer stack, and a cached, parallel renderer.
//!
//! Documents are opened through a [`provider::DocumentProvider`]. Each open document is edited
//! exclusively by submitting [`actions::Action`]s to its [`queue::ActionAccumulator`].

pub mod actions;
pub mod blend;
pub mod changes;
pub mod color;
pub mod diff;
pub mod document;
pub mod fill;
pub mod graph;
pub mod id;
pub mod provider;
pub mod queue;
pub mod render;
pub mod settings;
pub mod tile;
pub mod util;

pub use document::{Document, DocumentID};
pub use id::Id;
