//! Core modules - raster pipeline, edit session, params, errors
//!
//! Independent of any concrete host or UI toolkit.

pub mod error;
pub mod geometry;
pub mod image;
pub mod invoker;
pub mod modal;
pub mod params;
pub mod reconcile;
pub mod session;

// Re-exports for convenience
pub use error::{HostStatus, PluginError};
pub use invoker::{EffectInvocationResult, EffectInvoker};
pub use modal::{ModalSurface, run_modal};
pub use params::{EffectParameters, ParameterStore};
pub use reconcile::{RasterReconciler, ReconcileOptions};
pub use session::{CloseOutcome, EditSession, SessionExit, SessionIo};
