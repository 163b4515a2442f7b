//! C ABI runtime adapter.
//!
//! An external engine exposes a [`RuntimeVTable`]. It is either linked in
//! directly ([`ForeignRuntime::from_vtable`]) or loaded from a shared library
//! that exports `livefx_runtime_entry_v1` ([`ForeignRuntime::load`]).
//!
//! Ownership across the boundary:
//! - arguments (strings, input pixels) are borrowed by the engine for the
//!   duration of one call
//! - every returned result is owned by the engine until it is handed back
//!   through the matching dispose function, exactly once
//!
//! JSON travels as NUL-terminated UTF-8. On failure the same pointer carries
//! the error message.

use std::ffi::{CStr, CString, c_char, c_void};
use std::mem::MaybeUninit;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use libloading::{Library, Symbol};
use log::{debug, info};
use serde_json::Value;

use super::{ColorAdjuster, EffectDescriptor, EffectRuntime, LiveEffectEnv, RuntimeError};
use crate::core::image::ImageBuffer;
use crate::ui::tree::Rgba;

pub const LIVEFX_RUNTIME_ABI_V1: u32 = 1;
pub const ENTRY_SYMBOL: &[u8] = b"livefx_runtime_entry_v1\0";

/// Packed RGBA pixels, `byte_length == width * height * 4`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ImageDataPayload {
    pub width: u32,
    pub height: u32,
    pub data: *mut u8,
    pub byte_length: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct JsonFunctionResult {
    pub success: bool,
    /// JSON on success, error message on failure. May be null.
    pub json: *mut c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GoEffectResult {
    pub success: bool,
    pub error: *mut c_char,
    pub image: *mut ImageDataPayload,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbaColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl From<Rgba> for RgbaColor {
    fn from(c: Rgba) -> Self {
        Self { r: c.r, g: c.g, b: c.b, a: c.a }
    }
}

impl From<RgbaColor> for Rgba {
    fn from(c: RgbaColor) -> Self {
        Rgba::new(c.r, c.g, c.b, c.a)
    }
}

pub type ColorCallback = unsafe extern "C" fn(user: *mut c_void, color: RgbaColor) -> RgbaColor;

/// Function table filled by the engine.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RuntimeVTable {
    pub abi_version: u32,
    pub get_effects: unsafe extern "C" fn() -> JsonFunctionResult,
    pub go_effect: unsafe extern "C" fn(
        effect_id: *const c_char,
        params: *const c_char,
        env: *const c_char,
        input: *const ImageDataPayload,
    ) -> GoEffectResult,
    pub normalize_params: unsafe extern "C" fn(effect_id: *const c_char, params: *const c_char) -> JsonFunctionResult,
    pub render_tree: unsafe extern "C" fn(effect_id: *const c_char, params: *const c_char) -> JsonFunctionResult,
    pub fire_event: unsafe extern "C" fn(
        effect_id: *const c_char,
        event: *const c_char,
        params: *const c_char,
    ) -> JsonFunctionResult,
    pub scale_params:
        unsafe extern "C" fn(effect_id: *const c_char, params: *const c_char, factor: f64) -> JsonFunctionResult,
    pub interpolate_params: unsafe extern "C" fn(
        effect_id: *const c_char,
        a: *const c_char,
        b: *const c_char,
        percent: f64,
    ) -> JsonFunctionResult,
    pub adjust_colors: unsafe extern "C" fn(
        effect_id: *const c_char,
        params: *const c_char,
        callback: ColorCallback,
        user: *mut c_void,
    ) -> JsonFunctionResult,
    /// JSON array of alert strings raised since the last call
    pub drain_alerts: Option<unsafe extern "C" fn() -> JsonFunctionResult>,
    pub dispose_json_result: unsafe extern "C" fn(result: JsonFunctionResult),
    pub dispose_go_result: unsafe extern "C" fn(result: GoEffectResult),
}

/// Library entry point. Returns 0 after filling `vtable`.
pub type RuntimeEntryV1 = unsafe extern "C" fn(vtable: *mut RuntimeVTable) -> i32;

// ============================================================================
// Result guards
// ============================================================================

struct JsonGuard {
    result: JsonFunctionResult,
    dispose: unsafe extern "C" fn(JsonFunctionResult),
}

impl Drop for JsonGuard {
    fn drop(&mut self) {
        // SAFETY: result came from the same table and is disposed once
        unsafe { (self.dispose)(self.result) }
    }
}

struct GoGuard {
    result: GoEffectResult,
    dispose: unsafe extern "C" fn(GoEffectResult),
}

impl Drop for GoGuard {
    fn drop(&mut self) {
        // SAFETY: as above
        unsafe { (self.dispose)(self.result) }
    }
}

/// Borrowed view of an engine-owned C string.
///
/// # Safety
/// `ptr` is null or a valid NUL-terminated string alive for `'a`.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn c_string(s: &str) -> Result<CString, RuntimeError> {
    CString::new(s).map_err(|e| RuntimeError::Marshal(e.to_string()))
}

fn c_json(v: &Value) -> Result<CString, RuntimeError> {
    c_string(&v.to_string())
}

unsafe extern "C" fn color_trampoline(user: *mut c_void, color: RgbaColor) -> RgbaColor {
    // SAFETY: `user` is the `&mut &mut ColorAdjuster` set up in adjust_colors
    let adjust = unsafe { &mut *(user as *mut &mut ColorAdjuster<'_>) };
    catch_unwind(AssertUnwindSafe(|| adjust(color.into()).into())).unwrap_or(color)
}

// ============================================================================
// ForeignRuntime
// ============================================================================

pub struct ForeignRuntime {
    name: String,
    vtable: RuntimeVTable,
    _lib: Option<Library>,
}

impl ForeignRuntime {
    /// Load a runtime library and resolve its entry point.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        // SAFETY: loading runs library initializers; the path is trusted config
        let lib = unsafe { Library::new(path) }
            .map_err(|e| RuntimeError::Library(format!("failed to load {}: {}", path.display(), e)))?;

        let mut vtable = MaybeUninit::<RuntimeVTable>::uninit();
        let status = {
            // SAFETY: symbol type is fixed by the ABI contract
            let entry: Symbol<RuntimeEntryV1> = unsafe { lib.get(ENTRY_SYMBOL) }
                .map_err(|_| RuntimeError::Library("missing entry symbol 'livefx_runtime_entry_v1'".into()))?;
            unsafe { entry(vtable.as_mut_ptr()) }
        };
        if status != 0 {
            return Err(RuntimeError::Library(format!("runtime entry failed with status {}", status)));
        }
        // SAFETY: a zero status means every field was written
        let vtable = unsafe { vtable.assume_init() };
        if vtable.abi_version != LIVEFX_RUNTIME_ABI_V1 {
            return Err(RuntimeError::Library(format!(
                "incompatible ABI version: host={}, runtime={}",
                LIVEFX_RUNTIME_ABI_V1, vtable.abi_version
            )));
        }

        let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "foreign".into());
        info!("Loaded effect runtime '{}' from {}", name, path.display());
        Ok(Self { name, vtable, _lib: Some(lib) })
    }

    /// Wrap a statically linked table.
    ///
    /// # Safety
    /// Every function in `vtable` must honor the ownership contract in the
    /// module docs for as long as the runtime lives.
    pub unsafe fn from_vtable(name: &str, vtable: RuntimeVTable) -> Self {
        Self { name: name.to_string(), vtable, _lib: None }
    }

    fn take_json(&self, result: JsonFunctionResult) -> Result<Value, RuntimeError> {
        let guard = JsonGuard { result, dispose: self.vtable.dispose_json_result };
        // SAFETY: engine-owned until the guard drops
        let text = unsafe { c_str(guard.result.json) };
        if !guard.result.success {
            return Err(RuntimeError::Failed(text.unwrap_or("unknown error").to_string()));
        }
        let text = text.ok_or_else(|| RuntimeError::Marshal("null or non UTF-8 json".into()))?;
        serde_json::from_str(text).map_err(|e| RuntimeError::Marshal(format!("invalid json: {}", e)))
    }
}

impl EffectRuntime for ForeignRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn effects(&mut self) -> Result<Vec<EffectDescriptor>, RuntimeError> {
        let json = self.take_json(unsafe { (self.vtable.get_effects)() })?;
        serde_json::from_value(json).map_err(|e| RuntimeError::Marshal(format!("effect list: {}", e)))
    }

    fn go(
        &mut self,
        effect_id: &str,
        params: &Value,
        env: &LiveEffectEnv,
        image: ImageBuffer,
    ) -> Result<ImageBuffer, RuntimeError> {
        let id = c_string(effect_id)?;
        let params = c_json(params)?;
        let env = c_string(&serde_json::to_string(env).map_err(|e| RuntimeError::Marshal(e.to_string()))?)?;
        let input = ImageDataPayload {
            width: image.width(),
            height: image.height(),
            data: image.data().as_ptr() as *mut u8,
            byte_length: image.data().len(),
        };

        // SAFETY: arguments outlive the call; the engine only reads `input`
        let result = unsafe { (self.vtable.go_effect)(id.as_ptr(), params.as_ptr(), env.as_ptr(), &input) };
        let guard = GoGuard { result, dispose: self.vtable.dispose_go_result };
        drop(image);

        if !guard.result.success {
            let msg = unsafe { c_str(guard.result.error) }.unwrap_or("unknown error");
            return Err(RuntimeError::Failed(msg.to_string()));
        }
        if guard.result.image.is_null() {
            return Err(RuntimeError::Marshal("result carries no image".into()));
        }
        // SAFETY: non-null and engine-owned until the guard drops
        let payload = unsafe { *guard.result.image };
        let expected = payload.width as usize * payload.height as usize * 4;
        if payload.data.is_null() || payload.byte_length != expected {
            return Err(RuntimeError::Marshal(format!(
                "image payload {}x{} has {} bytes, expected {}",
                payload.width, payload.height, payload.byte_length, expected
            )));
        }
        let bytes = unsafe { std::slice::from_raw_parts(payload.data, payload.byte_length) }.to_vec();
        debug!("{}: go '{}' -> {}x{}", self.name, effect_id, payload.width, payload.height);
        ImageBuffer::rgba(payload.width, payload.height, bytes).map_err(|e| RuntimeError::Marshal(e.to_string()))
    }

    fn normalize_params(&mut self, effect_id: &str, params: &Value) -> Result<Value, RuntimeError> {
        let (id, params) = (c_string(effect_id)?, c_json(params)?);
        self.take_json(unsafe { (self.vtable.normalize_params)(id.as_ptr(), params.as_ptr()) })
    }

    fn render_tree(&mut self, effect_id: &str, params: &Value) -> Result<Value, RuntimeError> {
        let (id, params) = (c_string(effect_id)?, c_json(params)?);
        self.take_json(unsafe { (self.vtable.render_tree)(id.as_ptr(), params.as_ptr()) })
    }

    fn fire_event(&mut self, effect_id: &str, event: &Value, params: &Value) -> Result<Value, RuntimeError> {
        let (id, event, params) = (c_string(effect_id)?, c_json(event)?, c_json(params)?);
        self.take_json(unsafe { (self.vtable.fire_event)(id.as_ptr(), event.as_ptr(), params.as_ptr()) })
    }

    fn scale_params(&mut self, effect_id: &str, params: &Value, factor: f64) -> Result<Value, RuntimeError> {
        let (id, params) = (c_string(effect_id)?, c_json(params)?);
        self.take_json(unsafe { (self.vtable.scale_params)(id.as_ptr(), params.as_ptr(), factor) })
    }

    fn interpolate_params(
        &mut self,
        effect_id: &str,
        a: &Value,
        b: &Value,
        percent: f64,
    ) -> Result<Value, RuntimeError> {
        let (id, a, b) = (c_string(effect_id)?, c_json(a)?, c_json(b)?);
        self.take_json(unsafe { (self.vtable.interpolate_params)(id.as_ptr(), a.as_ptr(), b.as_ptr(), percent) })
    }

    fn adjust_colors(
        &mut self,
        effect_id: &str,
        params: &Value,
        adjust: &mut ColorAdjuster<'_>,
    ) -> Result<Value, RuntimeError> {
        let (id, params) = (c_string(effect_id)?, c_json(params)?);
        let mut adjust = adjust;
        let user = &mut adjust as *mut &mut ColorAdjuster<'_> as *mut c_void;
        // SAFETY: `user` stays valid for the duration of the call
        let result =
            unsafe { (self.vtable.adjust_colors)(id.as_ptr(), params.as_ptr(), color_trampoline, user) };
        self.take_json(result)
    }

    fn drain_alerts(&mut self) -> Vec<String> {
        let Some(drain) = self.vtable.drain_alerts else {
            return Vec::new();
        };
        self.take_json(unsafe { drain() })
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    thread_local! {
        static JSON_DISPOSED: Cell<usize> = const { Cell::new(0) };
        static GO_DISPOSED: Cell<usize> = const { Cell::new(0) };
    }

    fn owned(s: &str) -> *mut c_char {
        CString::new(s).unwrap().into_raw()
    }

    fn ok(v: Value) -> JsonFunctionResult {
        JsonFunctionResult { success: true, json: owned(&v.to_string()) }
    }

    fn arg(p: *const c_char) -> Value {
        serde_json::from_str(unsafe { CStr::from_ptr(p) }.to_str().unwrap()).unwrap()
    }

    unsafe extern "C" fn get_effects() -> JsonFunctionResult {
        ok(json!([{"id": "invert", "title": "Invert", "version": {"major": 1, "minor": 2}}]))
    }

    unsafe extern "C" fn go_effect(
        id: *const c_char,
        _params: *const c_char,
        _env: *const c_char,
        input: *const ImageDataPayload,
    ) -> GoEffectResult {
        let id = unsafe { CStr::from_ptr(id) }.to_str().unwrap();
        if id != "invert" {
            return GoEffectResult { success: false, error: owned("boom"), image: std::ptr::null_mut() };
        }
        let input = unsafe { *input };
        let mut pixels = unsafe { std::slice::from_raw_parts(input.data, input.byte_length) }.to_vec();
        for px in pixels.chunks_exact_mut(4) {
            px[0] = 255 - px[0];
            px[1] = 255 - px[1];
            px[2] = 255 - px[2];
        }
        let mut pixels = pixels.into_boxed_slice();
        let payload = ImageDataPayload {
            width: input.width,
            height: input.height,
            data: pixels.as_mut_ptr(),
            byte_length: pixels.len(),
        };
        std::mem::forget(pixels);
        GoEffectResult { success: true, error: std::ptr::null_mut(), image: Box::into_raw(Box::new(payload)) }
    }

    unsafe extern "C" fn normalize_params(_id: *const c_char, params: *const c_char) -> JsonFunctionResult {
        let params = arg(params);
        if !params.is_object() {
            return JsonFunctionResult { success: false, json: owned("params must be an object") };
        }
        ok(params)
    }

    unsafe extern "C" fn render_tree(_id: *const c_char, _params: *const c_char) -> JsonFunctionResult {
        ok(json!({"type": "text", "text": "hi"}))
    }

    unsafe extern "C" fn fire_event(_id: *const c_char, _e: *const c_char, _p: *const c_char) -> JsonFunctionResult {
        ok(json!({"updated": false}))
    }

    unsafe extern "C" fn scale_params(_id: *const c_char, params: *const c_char, _f: f64) -> JsonFunctionResult {
        ok(json!({"hasChanged": false, "params": arg(params)}))
    }

    unsafe extern "C" fn interpolate_params(
        _id: *const c_char,
        _a: *const c_char,
        b: *const c_char,
        _t: f64,
    ) -> JsonFunctionResult {
        ok(arg(b))
    }

    unsafe extern "C" fn adjust_colors(
        _id: *const c_char,
        _params: *const c_char,
        callback: ColorCallback,
        user: *mut c_void,
    ) -> JsonFunctionResult {
        let c = unsafe { callback(user, RgbaColor { r: 0.0, g: 0.0, b: 0.0, a: 1.0 }) };
        ok(json!({"hasChanged": true, "params": {"color": {"r": c.r, "g": c.g, "b": c.b, "a": c.a}}}))
    }

    unsafe extern "C" fn dispose_json(result: JsonFunctionResult) {
        if !result.json.is_null() {
            drop(unsafe { CString::from_raw(result.json) });
        }
        JSON_DISPOSED.with(|c| c.set(c.get() + 1));
    }

    unsafe extern "C" fn dispose_go(result: GoEffectResult) {
        if !result.error.is_null() {
            drop(unsafe { CString::from_raw(result.error) });
        }
        if !result.image.is_null() {
            let payload = unsafe { Box::from_raw(result.image) };
            let slice = std::ptr::slice_from_raw_parts_mut(payload.data, payload.byte_length);
            drop(unsafe { Box::from_raw(slice) });
        }
        GO_DISPOSED.with(|c| c.set(c.get() + 1));
    }

    fn fake() -> ForeignRuntime {
        let vtable = RuntimeVTable {
            abi_version: LIVEFX_RUNTIME_ABI_V1,
            get_effects,
            go_effect,
            normalize_params,
            render_tree,
            fire_event,
            scale_params,
            interpolate_params,
            adjust_colors,
            drain_alerts: None,
            dispose_json_result: dispose_json,
            dispose_go_result: dispose_go,
        };
        unsafe { ForeignRuntime::from_vtable("fake", vtable) }
    }

    /// Test: Result ownership across the C boundary
    /// Validates: Each JSON result is disposed exactly once, success or failure
    #[test]
    fn test_json_results_disposed_once() {
        let mut rt = fake();
        let before = JSON_DISPOSED.with(Cell::get);

        let effects = rt.effects().unwrap();
        assert_eq!(effects[0].id, "invert");
        assert_eq!(effects[0].version.minor, 2);

        assert_eq!(rt.normalize_params("invert", &json!({"a": 1})).unwrap(), json!({"a": 1}));
        let err = rt.normalize_params("invert", &json!([1])).unwrap_err();
        assert_eq!(err, RuntimeError::Failed("params must be an object".into()));

        assert_eq!(JSON_DISPOSED.with(Cell::get) - before, 3);
    }

    #[test]
    fn test_go_copies_and_disposes() {
        let mut rt = fake();
        let before = GO_DISPOSED.with(Cell::get);
        let env = LiveEffectEnv { dpi: 72.0, base_dpi: 72.0, is_in_preview: false };

        let img = ImageBuffer::filled(3, 2, [10, 20, 30, 255]).unwrap();
        let out = rt.go("invert", &json!({}), &env, img).unwrap();
        assert_eq!(out.resolution(), (3, 2));
        assert_eq!(out.pixel(2, 1), &[245, 235, 225, 255]);

        let img = ImageBuffer::filled(1, 1, [0; 4]).unwrap();
        assert_eq!(rt.go("other", &json!({}), &env, img).unwrap_err(), RuntimeError::Failed("boom".into()));

        assert_eq!(GO_DISPOSED.with(Cell::get) - before, 2);
    }

    #[test]
    fn test_adjust_colors_calls_back() {
        let mut rt = fake();
        let mut white = |_c: Rgba| Rgba::new(1.0, 1.0, 1.0, 1.0);
        let out = rt.adjust_colors("invert", &json!({}), &mut white).unwrap();
        assert_eq!(out["params"]["color"]["r"], json!(1.0));
        assert!(rt.drain_alerts().is_empty());
    }

    #[test]
    fn test_load_missing_library() {
        let err = ForeignRuntime::load(Path::new("/nonexistent/liblivefx_nope.so")).err().unwrap();
        assert!(matches!(err, RuntimeError::Library(_)));
    }
}
