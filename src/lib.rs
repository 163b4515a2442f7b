//! LIVEFX - live raster effect plugin core
//!
//! Rasterizes host art, runs effects through an engine-agnostic runtime,
//! places the (possibly resized) result back into the document, and edits
//! effect parameters through a declarative UI tree.

// Pipeline, edit session, params, errors
pub mod core;

// Host abstraction and the in-memory host
pub mod host;

// Effect runtimes and built-in effects
pub mod effects;
pub mod runtime;

// Plugin entry points and app modules
pub mod cli;
pub mod config;
pub mod plugin;
pub mod ui;

pub use crate::core::error::{HostStatus, PluginError};
pub use crate::core::image::ImageBuffer;
pub use crate::core::invoker::EffectInvoker;
pub use crate::core::session::{EditSession, SessionExit};
pub use plugin::{Plugin, guard};

use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialize logging for the plugin and standalone tools.
///
/// Honors `RUST_LOG`, defaults to `info`. Safe to call more than once.
pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .try_init();
    });
}
