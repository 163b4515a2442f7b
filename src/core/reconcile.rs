//! Raster reconciliation: art -> pixels -> effect -> art.
//!
//! One pass per GoEffect call, no loops:
//!
//! ```text
//! Idle -> DpiProbe -> Rasterized -> Invoked -> Reconciled -> Done
//!                                       \-> (failure) sentinel fill -> Done
//! ```
//!
//! Channel contract: host rasters are ARGB. Tiles are always exchanged with
//! the identity interleave and repacked with [`ImageBuffer::to_channel_order`],
//! so the effect side only ever sees packed RGBA.

use std::time::Instant;

use log::{debug, warn};

use super::error::{EffectInvocationFailure, HostStatus, PluginError};
use super::geometry::{IntRect, RealMatrix, RealRect, derive_dpi, expanded_ratio, recenter};
use super::image::{ARGB, ImageBuffer, RGBA};
use crate::host::{
    ArtHandle, ColorConvert, RasterRecord, RasterSuite, RasterType, RasterizeSettings, Slice, TileLayout,
};

/// Solid blue written over the input area when the effect fails
pub const SENTINEL_RGBA: [u8; 4] = [0, 0, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStage {
    Idle,
    DpiProbe,
    Rasterized,
    Invoked,
    Reconciled,
    Done,
}

/// Rasterization knobs (see `PluginConfig`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOptions {
    pub base_dpi: f64,
    /// Probe bounds are the art bounds times this
    pub probe_scale: f64,
    pub anti_alias: u8,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { base_dpi: 72.0, probe_scale: 0.01, anti_alias: 4 }
    }
}

/// Art handed back to the host plus the status to return with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoOutcome {
    pub art: ArtHandle,
    pub status: HostStatus,
    pub dpi: f64,
}

/// Source raster as extracted from the host
struct SourceRaster {
    handle: ArtHandle,
    info: RasterRecord,
    matrix: RealMatrix,
}

pub struct RasterReconciler<'a> {
    raster: &'a mut dyn RasterSuite,
    options: ReconcileOptions,
    stage: ReconcileStage,
}

impl<'a> RasterReconciler<'a> {
    pub fn new(raster: &'a mut dyn RasterSuite, options: ReconcileOptions) -> Self {
        Self { raster, options, stage: ReconcileStage::Idle }
    }

    pub fn stage(&self) -> ReconcileStage {
        self.stage
    }

    fn settings(&self, resolution: f64) -> RasterizeSettings {
        RasterizeSettings {
            raster_type: RasterType::Argb,
            anti_alias: self.options.anti_alias,
            color_convert: ColorConvert::Standard,
            preserve_spot_colors: true,
            resolution,
            use_min_tiles: false,
            use_effects_res: true,
            do_layers: true,
        }
    }

    /// Rasterize a shrunken copy of `art` at base dpi and read the true
    /// resolution back from its matrix. The probe raster is disposed.
    pub fn probe_dpi(&mut self, art: ArtHandle, bounds: &RealRect) -> Result<f64, PluginError> {
        self.stage = ReconcileStage::DpiProbe;
        let probe_bounds = bounds.scaled(self.options.probe_scale);
        let settings = self.settings(self.options.base_dpi);
        let probe = self.raster.rasterize(art, &settings, &probe_bounds)?;
        let matrix = self.raster.raster_matrix(probe);
        self.raster.dispose_art(probe)?;
        let matrix = matrix?;

        match derive_dpi(self.options.base_dpi, &matrix) {
            Some(dpi) => {
                debug!("probe matrix a={:.5} -> dpi {:.2}", matrix.a, dpi);
                Ok(dpi)
            }
            None => {
                warn!("degenerate probe matrix {:?}, using base dpi", matrix);
                Ok(self.options.base_dpi)
            }
        }
    }

    /// Dispose a raster on an error path. A refusal is only logged.
    fn discard(&mut self, handle: ArtHandle, what: &str) {
        if let Err(e) = self.raster.dispose_art(handle) {
            warn!("failed to dispose {} {:?}: {}", what, handle, e);
        }
    }

    /// Rasterize `art` at `dpi` and extract packed RGBA pixels. The raster
    /// is disposed again if its pixels cannot be read.
    fn rasterize(&mut self, art: ArtHandle, bounds: &RealRect, dpi: f64) -> Result<(SourceRaster, ImageBuffer), PluginError> {
        let handle = self.raster.rasterize(art, &self.settings(dpi), bounds)?;
        match self.extract(handle, dpi) {
            Ok(extracted) => Ok(extracted),
            Err(e) => {
                self.discard(handle, "source raster");
                Err(e)
            }
        }
    }

    fn extract(&mut self, handle: ArtHandle, dpi: f64) -> Result<(SourceRaster, ImageBuffer), PluginError> {
        let start = Instant::now();
        let info = self.raster.raster_info(handle)?;
        let matrix = self.raster.raster_matrix(handle)?;

        let (w, h) = (info.bounds.width().max(0) as u32, info.bounds.height().max(0) as u32);
        let bpp = info.bytes_per_pixel();
        let layout = TileLayout::packed(w, bpp);
        let mut data = vec![0u8; layout.row_bytes * h as usize];
        self.raster.get_tile(handle, &Slice::from_bounds(&info.bounds, bpp), &layout, &mut data)?;
        let image = ImageBuffer::new(w, h, bpp, ARGB, data)?.to_channel_order(RGBA);

        debug!(
            "rasterized {}x{} @ {:.2} dpi, matrix [{:.5} {:.5} {:.3} {:.3}] in {:.2}ms",
            w,
            h,
            dpi,
            matrix.a,
            matrix.d,
            matrix.tx,
            matrix.ty,
            start.elapsed().as_secs_f64() * 1000.0
        );
        self.stage = ReconcileStage::Rasterized;
        Ok((SourceRaster { handle, info, matrix }, image))
    }

    /// Write an RGBA image into `raster` over `bounds`.
    fn write_tile(&mut self, raster: ArtHandle, bounds: &IntRect, image: &ImageBuffer) -> Result<(), PluginError> {
        let native = image.to_channel_order(ARGB);
        let layout = TileLayout::packed(native.width(), native.bytes_per_pixel());
        let slice = Slice::from_bounds(bounds, native.bytes_per_pixel());
        self.raster.set_tile(raster, &slice, &layout, native.data())?;
        Ok(())
    }

    /// Replace the source pixels with the sentinel color, input size.
    fn write_sentinel(&mut self, source: &SourceRaster) -> Result<(), PluginError> {
        let (w, h) = (source.info.bounds.width().max(0) as u32, source.info.bounds.height().max(0) as u32);
        let sentinel = ImageBuffer::filled(w, h, SENTINEL_RGBA)?;
        self.write_tile(source.handle, &source.info.bounds, &sentinel)
    }

    /// Place `result` into the host. Same size: in place. Otherwise a new,
    /// recentered raster replaces the source, which is disposed last.
    fn apply(&mut self, source: &SourceRaster, placement: ArtHandle, result: &ImageBuffer) -> Result<ArtHandle, PluginError> {
        let (sw, sh) = (source.info.bounds.width() as i64, source.info.bounds.height() as i64);
        let (rw, rh) = (result.width() as i64, result.height() as i64);
        let (width_diff, height_diff) = (rw - sw, rh - sh);

        if width_diff == 0 && height_diff == 0 {
            self.write_tile(source.handle, &source.info.bounds, result)?;
            return Ok(source.handle);
        }

        debug!("resizing raster {}x{} -> {}x{}", sw, sh, rw, rh);
        let created = self.raster.new_raster(placement)?;
        match self.populate(source, created, result, width_diff, height_diff) {
            Ok(()) => {
                self.discard(source.handle, "source raster");
                Ok(created)
            }
            Err(e) => {
                self.discard(created, "partial raster");
                Err(e)
            }
        }
    }

    fn populate(
        &mut self,
        source: &SourceRaster,
        target: ArtHandle,
        result: &ImageBuffer,
        width_diff: i64,
        height_diff: i64,
    ) -> Result<(), PluginError> {
        let bounds = IntRect::sized(result.width(), result.height());
        let info = RasterRecord { bounds, ..source.info };
        self.raster.set_raster_info(target, &info)?;

        let art_bounds = self.raster.art_bounds(source.handle)?;
        let ratio = expanded_ratio(&art_bounds, &source.info.bounds);
        let matrix = recenter(&source.matrix, width_diff, height_diff, ratio);
        debug!("recentered matrix tx {:.3} -> {:.3}, ty {:.3} -> {:.3}", source.matrix.tx, matrix.tx, source.matrix.ty, matrix.ty);
        self.raster.set_raster_matrix(target, &matrix)?;

        self.write_tile(target, &bounds, result)
    }

    /// Full pipeline. `invoke` gets the RGBA input and the derived dpi.
    ///
    /// An effect failure is not an `Err`: the source is filled with
    /// [`SENTINEL_RGBA`] and returned with `CANT_HAPPEN`.
    pub fn run(
        &mut self,
        art: ArtHandle,
        invoke: impl FnOnce(ImageBuffer, f64) -> Result<ImageBuffer, EffectInvocationFailure>,
    ) -> Result<GoOutcome, PluginError> {
        let bounds = self.raster.compute_art_bounds(art)?;
        let dpi = self.probe_dpi(art, &bounds)?;
        let (source, image) = self.rasterize(art, &bounds, dpi)?;

        let result = invoke(image, dpi);
        self.stage = ReconcileStage::Invoked;

        let placed = match result {
            Err(failure) => {
                warn!("effect failed, writing sentinel: {}", failure);
                self.write_sentinel(&source).map(|()| (source.handle, HostStatus::CANT_HAPPEN))
            }
            Ok(image) => self.apply(&source, art, &image).map(|placed| (placed, HostStatus::NO_ERR)),
        };
        let outcome = match placed {
            Ok((art, status)) => {
                if status.is_ok() {
                    self.stage = ReconcileStage::Reconciled;
                }
                GoOutcome { art, status, dpi }
            }
            Err(e) => {
                // Nothing was placed, so the source raster has no owner
                self.discard(source.handle, "source raster");
                return Err(e);
            }
        };
        self.stage = ReconcileStage::Done;
        Ok(outcome)
    }
}
