//! Declarative settings UI: tree model and the egui renderer.

pub mod tree;

#[cfg(feature = "gui")]
pub mod egui_render;
