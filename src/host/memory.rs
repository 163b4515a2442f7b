//! In-memory host: every suite backed by plain Rust state.
//!
//! Used by tests and the CLI harness. Clones share the same state, so a test
//! can keep one `MemoryHost` for inspection while the plugin owns the boxed
//! suites from [`MemoryHost::services`].
//!
//! Rasterization model: 72 points per inch. At resolution `res` the raster
//! is `ceil(bounds * res / 72)` pixels and its matrix is
//! `[72/res 0 0 72/res left top]`. Pixels are stored ARGB.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use glam::DVec2;
use indexmap::IndexMap;
use log::trace;

use super::*;
use crate::core::error::{HostCallError, HostStatus};
use crate::core::geometry::{IntRect, RealMatrix, RealRect};
use crate::core::image::{ARGB, ImageBuffer, RGBA};

const POINTS_PER_INCH: f64 = 72.0;

#[derive(Debug, Clone)]
enum ArtObject {
    Solid { bounds: RealRect, rgba: [u8; 4] },
    Image { bounds: RealRect, image: ImageBuffer },
    Raster(RasterObject),
}

#[derive(Debug, Clone)]
struct RasterObject {
    record: RasterRecord,
    matrix: RealMatrix,
    /// Packed ARGB, `bounds.width * bounds.height * 4`
    data: Vec<u8>,
}

impl RasterObject {
    fn empty() -> Self {
        Self { record: RasterRecord::default(), matrix: RealMatrix::IDENTITY, data: Vec::new() }
    }

    fn width(&self) -> usize {
        self.record.bounds.width().max(0) as usize
    }

    fn height(&self) -> usize {
        self.record.bounds.height().max(0) as usize
    }

    fn rgba_at(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * self.width() + x) * 4;
        let px = &self.data[i..i + 4];
        [px[1], px[2], px[3], px[0]]
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    arts: BTreeMap<ArtHandle, ArtObject>,
    effects_resolution: f64,
    failing: HashSet<&'static str>,
    calls: Vec<&'static str>,
    effects: Vec<LiveEffectData>,
    menu_items: Vec<(EffectHandle, String, MenuData)>,
    update_requests: Vec<EditContext>,
    undo_requests: usize,
    prefs: HashMap<(String, String), Point>,
    alerts: Vec<String>,
    disposed: Vec<ArtHandle>,
}

impl State {
    fn enter(&mut self, call: &'static str) -> Result<(), HostCallError> {
        trace!("host: {}", call);
        self.calls.push(call);
        if self.failing.contains(call) {
            return Err(HostCallError::new(call, HostStatus::CANT_HAPPEN));
        }
        Ok(())
    }

    fn alloc(&mut self, art: ArtObject) -> ArtHandle {
        self.next_id += 1;
        let handle = ArtHandle(self.next_id);
        self.arts.insert(handle, art);
        handle
    }

    fn raster(&self, call: &'static str, handle: ArtHandle) -> Result<&RasterObject, HostCallError> {
        match self.arts.get(&handle) {
            Some(ArtObject::Raster(r)) => Ok(r),
            _ => Err(HostCallError::new(call, HostStatus::BAD_PARAMETER)),
        }
    }

    fn raster_mut(&mut self, call: &'static str, handle: ArtHandle) -> Result<&mut RasterObject, HostCallError> {
        match self.arts.get_mut(&handle) {
            Some(ArtObject::Raster(r)) => Ok(r),
            _ => Err(HostCallError::new(call, HostStatus::BAD_PARAMETER)),
        }
    }

    fn bounds_of(&self, call: &'static str, handle: ArtHandle) -> Result<RealRect, HostCallError> {
        match self.arts.get(&handle) {
            Some(ArtObject::Solid { bounds, .. }) | Some(ArtObject::Image { bounds, .. }) => Ok(*bounds),
            Some(ArtObject::Raster(r)) => {
                Ok(RealRect::from_pixel_grid(&r.matrix, r.width() as i32, r.height() as i32))
            }
            None => Err(HostCallError::new(call, HostStatus::BAD_PARAMETER)),
        }
    }
}

/// Color of `art` at artboard point `p`, transparent outside.
fn sample(art: &ArtObject, p: DVec2) -> [u8; 4] {
    let inside = |b: &RealRect| p.x >= b.left && p.x < b.right && p.y >= b.top && p.y < b.bottom;
    match art {
        ArtObject::Solid { bounds, rgba } => {
            if inside(bounds) {
                *rgba
            } else {
                [0, 0, 0, 0]
            }
        }
        ArtObject::Image { bounds, image } => {
            if !inside(bounds) {
                return [0, 0, 0, 0];
            }
            let u = ((p.x - bounds.left) / bounds.width() * image.width() as f64) as u32;
            let v = ((p.y - bounds.top) / bounds.height() * image.height() as f64) as u32;
            let px = image.pixel(u.min(image.width() - 1), v.min(image.height() - 1));
            [px[0], px[1], px[2], px[3]]
        }
        ArtObject::Raster(r) => {
            let local = r.matrix.to_affine().inverse().transform_point2(p);
            if local.x < 0.0 || local.y < 0.0 {
                return [0, 0, 0, 0];
            }
            let (x, y) = (local.x as usize, local.y as usize);
            if x >= r.width() || y >= r.height() {
                return [0, 0, 0, 0];
            }
            r.rgba_at(x, y)
        }
    }
}

/// Shared-state in-memory host.
#[derive(Clone)]
pub struct MemoryHost {
    state: Rc<RefCell<State>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let state = State { effects_resolution: POINTS_PER_INCH, ..Default::default() };
        Self { state: Rc::new(RefCell::new(state)) }
    }

    /// Resolution the host substitutes when `use_effects_res` is set.
    pub fn with_effects_resolution(self, dpi: f64) -> Self {
        self.state.borrow_mut().effects_resolution = dpi;
        self
    }

    /// Boxed suites sharing this host's state.
    pub fn services(&self) -> HostServices {
        HostServices {
            raster: Box::new(self.clone()),
            live_effect: Box::new(self.clone()),
            undo: Box::new(self.clone()),
            prefs: Box::new(self.clone()),
            user: Box::new(self.clone()),
        }
    }

    /// Make every subsequent call named `call` fail with `CANT`.
    pub fn fail_call(&self, call: &'static str) {
        self.state.borrow_mut().failing.insert(call);
    }

    pub fn add_solid(&self, bounds: RealRect, rgba: [u8; 4]) -> ArtHandle {
        self.state.borrow_mut().alloc(ArtObject::Solid { bounds, rgba })
    }

    /// Place an image over `bounds`. The image is stored as RGBA.
    pub fn add_image(&self, bounds: RealRect, image: &ImageBuffer) -> ArtHandle {
        let image = image.to_channel_order(RGBA);
        self.state.borrow_mut().alloc(ArtObject::Image { bounds, image })
    }

    pub fn contains(&self, art: ArtHandle) -> bool {
        self.state.borrow().arts.contains_key(&art)
    }

    /// Raster pixels as packed RGBA.
    pub fn raster_image(&self, art: ArtHandle) -> Option<ImageBuffer> {
        let state = self.state.borrow();
        let raster = state.raster("inspect", art).ok()?;
        let argb = ImageBuffer::new(
            raster.width() as u32,
            raster.height() as u32,
            4,
            ARGB,
            raster.data.clone(),
        )
        .ok()?;
        Some(argb.to_channel_order(RGBA))
    }

    pub fn raster_bounds(&self, art: ArtHandle) -> Option<IntRect> {
        self.state.borrow().raster("inspect", art).ok().map(|r| r.record.bounds)
    }

    pub fn raster_matrix_of(&self, art: ArtHandle) -> Option<RealMatrix> {
        self.state.borrow().raster("inspect", art).ok().map(|r| r.matrix)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    pub fn update_requests(&self) -> usize {
        self.state.borrow().update_requests.len()
    }

    pub fn undo_requests(&self) -> usize {
        self.state.borrow().undo_requests
    }

    pub fn alerts(&self) -> Vec<String> {
        self.state.borrow().alerts.clone()
    }

    pub fn disposed(&self) -> Vec<ArtHandle> {
        self.state.borrow().disposed.clone()
    }

    pub fn registered_effects(&self) -> Vec<LiveEffectData> {
        self.state.borrow().effects.clone()
    }

    pub fn menu_items(&self) -> Vec<(String, MenuData)> {
        self.state
            .borrow()
            .menu_items
            .iter()
            .map(|(_, name, menu)| (name.clone(), menu.clone()))
            .collect()
    }

    pub fn pref_point(&self, prefix: &str, key: &str) -> Option<Point> {
        self.state.borrow().prefs.get(&(prefix.to_string(), key.to_string())).copied()
    }
}

impl RasterSuite for MemoryHost {
    fn compute_art_bounds(&self, art: ArtHandle) -> Result<RealRect, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("ComputeArtBounds")?;
        state.bounds_of("ComputeArtBounds", art)
    }

    fn rasterize(
        &mut self,
        art: ArtHandle,
        settings: &RasterizeSettings,
        bounds: &RealRect,
    ) -> Result<ArtHandle, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("Rasterize")?;
        let source = state
            .arts
            .get(&art)
            .cloned()
            .ok_or(HostCallError::new("Rasterize", HostStatus::BAD_PARAMETER))?;

        let res = if settings.use_effects_res { state.effects_resolution } else { settings.resolution };
        if res.is_nan() || res <= 0.0 {
            return Err(HostCallError::new("Rasterize", HostStatus::BAD_PARAMETER));
        }
        let scale = res / POINTS_PER_INCH;
        let w = ((bounds.width() * scale).ceil() as usize).max(1);
        let h = ((bounds.height() * scale).ceil() as usize).max(1);
        let pt = 1.0 / scale;
        let matrix = RealMatrix::scale_translate(pt, bounds.left.min(bounds.right), bounds.top.min(bounds.bottom));

        let mut data = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                let p = matrix.transform_point(DVec2::new(x as f64 + 0.5, y as f64 + 0.5));
                let [r, g, b, a] = sample(&source, p);
                data.extend_from_slice(&[a, r, g, b]);
            }
        }

        let record = RasterRecord {
            bounds: IntRect::sized(w as u32, h as u32),
            bits_per_pixel: 32,
            color_space: ColorSpace::AlphaRgb,
            original_color_space: ColorSpace::AlphaRgb,
            flags: 0,
        };
        Ok(state.alloc(ArtObject::Raster(RasterObject { record, matrix, data })))
    }

    fn new_raster(&mut self, _placement: ArtHandle) -> Result<ArtHandle, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("NewArt")?;
        Ok(state.alloc(ArtObject::Raster(RasterObject::empty())))
    }

    fn raster_info(&self, raster: ArtHandle) -> Result<RasterRecord, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("GetRasterInfo")?;
        Ok(state.raster("GetRasterInfo", raster)?.record)
    }

    fn set_raster_info(&mut self, raster: ArtHandle, info: &RasterRecord) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("SetRasterInfo")?;
        let r = state.raster_mut("SetRasterInfo", raster)?;
        r.record = *info;
        let len = r.width() * r.height() * 4;
        r.data = vec![0; len];
        Ok(())
    }

    fn raster_matrix(&self, raster: ArtHandle) -> Result<RealMatrix, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("GetRasterMatrix")?;
        Ok(state.raster("GetRasterMatrix", raster)?.matrix)
    }

    fn set_raster_matrix(&mut self, raster: ArtHandle, matrix: &RealMatrix) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("SetRasterMatrix")?;
        state.raster_mut("SetRasterMatrix", raster)?.matrix = *matrix;
        Ok(())
    }

    fn art_bounds(&self, art: ArtHandle) -> Result<RealRect, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("GetArtBounds")?;
        state.bounds_of("GetArtBounds", art)
    }

    fn get_tile(
        &self,
        raster: ArtHandle,
        slice: &Slice,
        layout: &TileLayout,
        dst: &mut [u8],
    ) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("GetRasterTile")?;
        let r = state.raster("GetRasterTile", raster)?;
        let channels = slice.back.clamp(0, 4) as usize;
        for y in 0..slice.height().max(0) as usize {
            for x in 0..slice.width().max(0) as usize {
                let (sx, sy) = (x + slice.left as usize, y + slice.top as usize);
                if sx >= r.width() || sy >= r.height() {
                    return Err(HostCallError::new("GetRasterTile", HostStatus::BAD_PARAMETER));
                }
                let src = (sy * r.width() + sx) * 4;
                let base = y * layout.row_bytes + x * layout.col_bytes;
                for ch in 0..channels {
                    let at = base + layout.channel_interleave[ch] as usize;
                    let out = dst
                        .get_mut(at)
                        .ok_or(HostCallError::new("GetRasterTile", HostStatus::BAD_PARAMETER))?;
                    *out = r.data[src + ch];
                }
            }
        }
        Ok(())
    }

    fn set_tile(
        &mut self,
        raster: ArtHandle,
        slice: &Slice,
        layout: &TileLayout,
        src: &[u8],
    ) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("SetRasterTile")?;
        let r = state.raster_mut("SetRasterTile", raster)?;
        let channels = slice.back.clamp(0, 4) as usize;
        let width = r.width();
        let height = r.height();
        for y in 0..slice.height().max(0) as usize {
            for x in 0..slice.width().max(0) as usize {
                let (dx, dy) = (x + slice.left as usize, y + slice.top as usize);
                if dx >= width || dy >= height {
                    return Err(HostCallError::new("SetRasterTile", HostStatus::BAD_PARAMETER));
                }
                let dst = (dy * width + dx) * 4;
                let base = y * layout.row_bytes + x * layout.col_bytes;
                for ch in 0..channels {
                    let at = base + layout.channel_interleave[ch] as usize;
                    r.data[dst + ch] = *src
                        .get(at)
                        .ok_or(HostCallError::new("SetRasterTile", HostStatus::BAD_PARAMETER))?;
                }
            }
        }
        Ok(())
    }

    fn dispose_art(&mut self, art: ArtHandle) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("DisposeArt")?;
        if state.arts.remove(&art).is_none() {
            return Err(HostCallError::new("DisposeArt", HostStatus::BAD_PARAMETER));
        }
        state.disposed.push(art);
        Ok(())
    }
}

impl LiveEffectSuite for MemoryHost {
    fn add_live_effect(&mut self, data: &LiveEffectData) -> Result<EffectHandle, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("AddLiveEffect")?;
        state.effects.push(data.clone());
        Ok(EffectHandle(state.effects.len() as u64))
    }

    fn add_menu_item(&mut self, effect: EffectHandle, name: &str, menu: &MenuData) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("AddLiveEffectMenuItem")?;
        state.menu_items.push((effect, name.to_string(), menu.clone()));
        Ok(())
    }

    fn update_parameters(&mut self, context: EditContext) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("UpdateParameters")?;
        state.update_requests.push(context);
        Ok(())
    }
}

impl UndoSuite for MemoryHost {
    fn undo_changes(&mut self) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("UndoChanges")?;
        state.undo_requests += 1;
        Ok(())
    }
}

impl PreferenceSuite for MemoryHost {
    fn get_point(&self, prefix: &str, key: &str) -> Result<Option<Point>, HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("GetPointPreference")?;
        Ok(state.prefs.get(&(prefix.to_string(), key.to_string())).copied())
    }

    fn put_point(&mut self, prefix: &str, key: &str, value: Point) -> Result<(), HostCallError> {
        let mut state = self.state.borrow_mut();
        state.enter("PutPointPreference")?;
        state.prefs.insert((prefix.to_string(), key.to_string()), value);
        Ok(())
    }
}

impl UserSuite for MemoryHost {
    fn alert(&mut self, message: &str) {
        let mut state = self.state.borrow_mut();
        state.calls.push("ErrorAlert");
        state.alerts.push(message.to_string());
    }
}

// ============================================================================
// Parameter record
// ============================================================================

/// Host parameter dictionary stand-in with write accounting.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecord {
    values: IndexMap<String, String>,
    writes: usize,
    failing_key: Option<String>,
}

impl MemoryRecord {
    /// Every subsequent write to `key` fails.
    pub fn fail_writes_for(&mut self, key: &str) {
        self.failing_key = Some(key.to_string());
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl ParamRecord for MemoryRecord {
    fn get_string(&self, key: &str) -> Result<Option<String>, HostCallError> {
        Ok(self.values.get(key).cloned())
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), HostCallError> {
        if self.failing_key.as_deref() == Some(key) {
            return Err(HostCallError::new("SetStringEntry", HostStatus::CANT_HAPPEN));
        }
        self.values.insert(key.to_string(), value.to_string());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(res: f64, use_effects_res: bool) -> RasterizeSettings {
        RasterizeSettings {
            raster_type: RasterType::Argb,
            anti_alias: 4,
            color_convert: ColorConvert::Standard,
            preserve_spot_colors: true,
            resolution: res,
            use_min_tiles: false,
            use_effects_res,
            do_layers: true,
        }
    }

    /// Test: Rasterize honors the effects resolution
    /// Validates: Pixel size and matrix scale follow res / 72
    #[test]
    fn test_rasterize_effects_res() {
        let mut host = MemoryHost::new().with_effects_resolution(144.0);
        let art = host.add_solid(RealRect::new(10.0, 20.0, 60.0, 45.0), [255, 0, 0, 255]);
        let bounds = host.compute_art_bounds(art).unwrap();
        let raster = host.rasterize(art, &settings(72.0, true), &bounds).unwrap();

        assert_eq!(host.raster_bounds(raster), Some(IntRect::sized(100, 50)));
        let m = host.raster_matrix_of(raster).unwrap();
        assert_eq!((m.a, m.tx, m.ty), (0.5, 10.0, 20.0));
        assert_eq!(host.raster_image(raster).unwrap().pixel(3, 3), &[255, 0, 0, 255]);

        let plain = host.rasterize(art, &settings(72.0, false), &bounds).unwrap();
        assert_eq!(host.raster_bounds(plain), Some(IntRect::sized(50, 25)));
    }

    /// Test: Tile interleave
    /// Validates: Raster channel i is read from/written to tile offset interleave[i]
    #[test]
    fn test_tile_interleave() {
        let mut host = MemoryHost::new();
        let art = host.add_solid(RealRect::new(0.0, 0.0, 1.0, 1.0), [10, 20, 30, 40]);
        let raster = host.rasterize(art, &settings(72.0, false), &RealRect::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        let slice = Slice::from_bounds(&IntRect::sized(1, 1), 4);

        let mut native = [0u8; 4];
        host.get_tile(raster, &slice, &TileLayout::packed(1, 4), &mut native).unwrap();
        assert_eq!(native, [40, 10, 20, 30]);

        let to_rgba = TileLayout { row_bytes: 4, col_bytes: 4, channel_interleave: [3, 0, 1, 2] };
        let mut rgba = [0u8; 4];
        host.get_tile(raster, &slice, &to_rgba, &mut rgba).unwrap();
        assert_eq!(rgba, [10, 20, 30, 40]);

        host.set_tile(raster, &slice, &to_rgba, &[1, 2, 3, 4]).unwrap();
        assert_eq!(host.raster_image(raster).unwrap().data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_dispose_twice_fails() {
        let mut host = MemoryHost::new();
        let art = host.add_solid(RealRect::new(0.0, 0.0, 1.0, 1.0), [0; 4]);
        host.dispose_art(art).unwrap();
        assert!(host.dispose_art(art).is_err());
        assert_eq!(host.disposed(), vec![art]);
    }

    #[test]
    fn test_failure_injection() {
        let mut host = MemoryHost::new();
        host.fail_call("UndoChanges");
        let err = host.undo_changes().unwrap_err();
        assert_eq!(err.call, "UndoChanges");
        assert_eq!(host.undo_requests(), 0);
    }
}
