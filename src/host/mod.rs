//! Host document editor interfaces.
//!
//! The host's object model, rasterizer, parameter dictionaries and preference
//! store are external collaborators. Each concern is one suite trait; a
//! [`HostServices`] value bundles them and is passed explicitly to whatever
//! needs host access (no global suite tables).
//!
//! ```text
//! HostServices
//!   ├── raster:      RasterSuite      (rasterize, tiles, matrices, art lifetime)
//!   ├── live_effect: LiveEffectSuite  (effect registration, UpdateParameters)
//!   ├── undo:        UndoSuite
//!   ├── prefs:       PreferenceSuite  (window position)
//!   └── user:        UserSuite        (alerts, locale)
//! ```
//!
//! Parameter records arrive with each callback message as `&mut dyn ParamRecord`.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::core::error::HostCallError;
use crate::core::geometry::{IntRect, RealMatrix, RealRect};

// ============================================================================
// Handles and records
// ============================================================================

/// Opaque host art object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtHandle(pub u64);

/// Opaque registered live effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectHandle(pub u64);

/// Opaque edit context handed to `EditParameters`, used for `UpdateParameters`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditContext(pub u64);

/// Integer point (window position preference)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub h: i32,
    pub v: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterType {
    Argb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorConvert {
    Standard,
    Precise,
}

/// Rasterization request
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizeSettings {
    pub raster_type: RasterType,
    pub anti_alias: u8,
    pub color_convert: ColorConvert,
    pub preserve_spot_colors: bool,
    pub resolution: f64,
    pub use_min_tiles: bool,
    /// Let the host substitute its effective document resolution
    pub use_effects_res: bool,
    pub do_layers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    AlphaRgb,
    AlphaCmyk,
    AlphaGray,
}

/// Raster object metadata
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterRecord {
    pub bounds: IntRect,
    pub bits_per_pixel: u16,
    pub color_space: ColorSpace,
    pub original_color_space: ColorSpace,
    pub flags: u32,
}

impl RasterRecord {
    pub fn bytes_per_pixel(&self) -> u8 {
        (self.bits_per_pixel / 8) as u8
    }
}

/// Sub-rectangle of a raster, `back` = channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slice {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub front: i32,
    pub back: i32,
}

impl Slice {
    pub fn from_bounds(bounds: &IntRect, channels: u8) -> Self {
        Self {
            top: bounds.top,
            left: bounds.left,
            bottom: bounds.bottom,
            right: bounds.right,
            front: 0,
            back: channels as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Memory layout of a tile buffer exchanged with the host.
///
/// `channel_interleave[i]` is the byte offset inside a tile pixel that holds
/// raster channel `i`. The same table is used for reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub row_bytes: usize,
    pub col_bytes: usize,
    pub channel_interleave: [u8; 4],
}

impl TileLayout {
    /// Packed rows, raster channel order preserved
    pub fn packed(width: u32, bytes_per_pixel: u8) -> Self {
        Self {
            row_bytes: width as usize * bytes_per_pixel as usize,
            col_bytes: bytes_per_pixel as usize,
            channel_interleave: [0, 1, 2, 3],
        }
    }
}

// Style filter flags (AIStyleFilterFlags)
pub const PRE_EFFECT_FILTER: u32 = 0x1;
pub const POST_EFFECT_FILTER: u32 = 0x2;
pub const HAS_SCALABLE_PARAMS: u32 = 1 << 17;
pub const USES_AUTO_RASTERIZE: u32 = 1 << 18;
pub const HANDLES_ADJUST_COLORS: u32 = 1 << 20;

/// Preferred input art kind for a live effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArtType {
    Dynamic,
    Raster,
}

/// Live effect registration record
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEffectData {
    pub name: String,
    pub title: String,
    pub major_version: i32,
    pub minor_version: i32,
    pub prefers_as_input: InputArtType,
    pub style_filter_flags: u32,
}

/// Menu entry for a registered effect
#[derive(Debug, Clone, PartialEq)]
pub struct MenuData {
    pub category: String,
    pub title: String,
}

// ============================================================================
// Suites
// ============================================================================

/// Art, raster and rasterization services.
pub trait RasterSuite {
    /// Bounds of `art` as the rasterizer sees them.
    fn compute_art_bounds(&self, art: ArtHandle) -> Result<RealRect, HostCallError>;

    /// Rasterize `art` into a new raster object placed above it.
    fn rasterize(
        &mut self,
        art: ArtHandle,
        settings: &RasterizeSettings,
        bounds: &RealRect,
    ) -> Result<ArtHandle, HostCallError>;

    /// New empty raster object placed above `placement`.
    fn new_raster(&mut self, placement: ArtHandle) -> Result<ArtHandle, HostCallError>;

    fn raster_info(&self, raster: ArtHandle) -> Result<RasterRecord, HostCallError>;
    fn set_raster_info(&mut self, raster: ArtHandle, info: &RasterRecord) -> Result<(), HostCallError>;

    fn raster_matrix(&self, raster: ArtHandle) -> Result<RealMatrix, HostCallError>;
    fn set_raster_matrix(&mut self, raster: ArtHandle, matrix: &RealMatrix) -> Result<(), HostCallError>;

    /// Artboard-space bounds of any art object.
    fn art_bounds(&self, art: ArtHandle) -> Result<RealRect, HostCallError>;

    /// Copy `slice` of the raster into `dst` using `layout`.
    fn get_tile(
        &self,
        raster: ArtHandle,
        slice: &Slice,
        layout: &TileLayout,
        dst: &mut [u8],
    ) -> Result<(), HostCallError>;

    /// Copy `src` (laid out per `layout`) into `slice` of the raster.
    fn set_tile(
        &mut self,
        raster: ArtHandle,
        slice: &Slice,
        layout: &TileLayout,
        src: &[u8],
    ) -> Result<(), HostCallError>;

    fn dispose_art(&mut self, art: ArtHandle) -> Result<(), HostCallError>;
}

/// Live effect registration and parameter refresh.
pub trait LiveEffectSuite {
    fn add_live_effect(&mut self, data: &LiveEffectData) -> Result<EffectHandle, HostCallError>;
    fn add_menu_item(&mut self, effect: EffectHandle, name: &str, menu: &MenuData) -> Result<(), HostCallError>;

    /// Ask the host to re-run dependent computation after params changed.
    fn update_parameters(&mut self, context: EditContext) -> Result<(), HostCallError>;
}

pub trait UndoSuite {
    /// Undo every change of the current host transaction.
    fn undo_changes(&mut self) -> Result<(), HostCallError>;
}

/// Host preference store (namespaced by prefix).
pub trait PreferenceSuite {
    fn get_point(&self, prefix: &str, key: &str) -> Result<Option<Point>, HostCallError>;
    fn put_point(&mut self, prefix: &str, key: &str, value: Point) -> Result<(), HostCallError>;
}

pub trait UserSuite {
    fn alert(&mut self, message: &str);
    fn locale(&self) -> String {
        "en_US".to_string()
    }
}

/// String-keyed record persisted with each effect instance.
pub trait ParamRecord {
    fn get_string(&self, key: &str) -> Result<Option<String>, HostCallError>;
    fn set_string(&mut self, key: &str, value: &str) -> Result<(), HostCallError>;
}

/// Bundle of host suites, constructed once and passed explicitly.
pub struct HostServices {
    pub raster: Box<dyn RasterSuite>,
    pub live_effect: Box<dyn LiveEffectSuite>,
    pub undo: Box<dyn UndoSuite>,
    pub prefs: Box<dyn PreferenceSuite>,
    pub user: Box<dyn UserSuite>,
}
