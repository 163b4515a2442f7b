//! Host callback entry points.
//!
//! [`Plugin`] owns the host suites and the effect runtime and implements one
//! method per host selector. Every method returns `Result`; the host-facing
//! wrapper runs it through [`guard`], which turns errors and panics into a
//! [`HostStatus`] so nothing unwinds into the host.
//!
//! Parameters are never cached here: each callback loads them from the
//! record it was handed.

use std::panic::{AssertUnwindSafe, catch_unwind};

use log::{debug, error, info, warn};

use crate::config::PluginConfig;
use crate::core::error::{HostStatus, PluginError};
use crate::core::invoker::EffectInvoker;
use crate::core::modal::{ModalSurface, run_modal};
use crate::core::params::{EffectParameters, ParameterStore, normalize_effect_id};
use crate::core::reconcile::{GoOutcome, RasterReconciler};
use crate::core::session::{CloseOutcome, EditSession, SessionIo};
use crate::host::{
    ArtHandle, EditContext, EffectHandle, HANDLES_ADJUST_COLORS, HAS_SCALABLE_PARAMS, HostServices,
    InputArtType, LiveEffectData, MenuData, POST_EFFECT_FILTER, ParamRecord,
};
use crate::runtime::ffi::ForeignRuntime;
use crate::runtime::native::NativeRuntime;
use crate::runtime::{ColorAdjuster, EffectRuntime, LiveEffectEnv};

/// Registration cap
pub const MAX_EFFECTS: usize = 1000;

/// Run a callback body, mapping `Err` and panics to a host status.
pub fn guard(selector: &str, f: impl FnOnce() -> Result<(), PluginError>) -> HostStatus {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => HostStatus::NO_ERR,
        Ok(Err(e)) => {
            let status = e.status();
            error!("{} failed with {}: {}", selector, status, e);
            status
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let e = PluginError::Panic(msg);
            error!("{} failed with {}: {}", selector, e.status(), e);
            e.status()
        }
    }
}

/// A registered live effect.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredEffect {
    pub handle: EffectHandle,
    pub name: String,
    pub id: String,
    pub title: String,
}

pub struct Plugin {
    config: PluginConfig,
    host: HostServices,
    invoker: Option<EffectInvoker>,
    effects: Vec<RegisteredEffect>,
    /// Effect id of the open edit session
    editing: Option<String>,
}

impl Plugin {
    pub fn new(config: PluginConfig, host: HostServices) -> Self {
        Self { config, host, invoker: None, effects: Vec::new(), editing: None }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn effects(&self) -> &[RegisteredEffect] {
        &self.effects
    }

    pub fn is_started(&self) -> bool {
        self.invoker.is_some()
    }

    fn build_runtime(&self) -> Result<Box<dyn EffectRuntime>, PluginError> {
        match &self.config.runtime_library {
            Some(path) => Ok(Box::new(ForeignRuntime::load(path)?)),
            None => Ok(Box::new(NativeRuntime::with_builtin_effects())),
        }
    }

    /// Run one host callback through [`guard`].
    ///
    /// `Err` carries the status to hand back to the host. Errors and panics
    /// raised anywhere under `f`, the runtime included, end up there.
    pub fn dispatch<T>(
        &mut self,
        selector: &str,
        f: impl FnOnce(&mut Self) -> Result<T, PluginError>,
    ) -> Result<T, HostStatus> {
        let mut out = None;
        let status = guard(selector, || {
            out = Some(f(self)?);
            Ok(())
        });
        match out {
            Some(v) if status.is_ok() => Ok(v),
            _ => Err(status),
        }
    }

    /// Create the runtime and register its effects. A second call is a no-op.
    pub fn startup(&mut self) -> Result<(), PluginError> {
        if self.invoker.is_some() {
            debug!("Startup: already started");
            return Ok(());
        }
        let runtime = self.build_runtime()?;
        self.startup_with(runtime)
    }

    /// [`Plugin::startup`] over an already built runtime.
    pub fn startup_with(&mut self, runtime: Box<dyn EffectRuntime>) -> Result<(), PluginError> {
        if self.invoker.is_some() {
            debug!("Startup: already started");
            return Ok(());
        }
        let invoker = EffectInvoker::new(runtime);
        info!("Startup: runtime '{}'", invoker.runtime_name());
        self.invoker = Some(invoker);
        if let Err(e) = self.init_effects_list() {
            self.invoker = None;
            return Err(e);
        }
        Ok(())
    }

    /// Drop the runtime. Registrations are forgotten.
    pub fn shutdown(&mut self) {
        if self.invoker.take().is_some() {
            info!("Shutdown: released runtime, {} effects", self.effects.len());
        }
        self.effects.clear();
        self.editing = None;
    }

    fn invoker(&mut self) -> Result<&mut EffectInvoker, PluginError> {
        self.invoker.as_mut().ok_or(PluginError::NotStarted)
    }

    /// Register every runtime effect with the host, up to [`MAX_EFFECTS`].
    fn init_effects_list(&mut self) -> Result<(), PluginError> {
        let descriptors = self.invoker()?.effects()?;
        if descriptors.len() > MAX_EFFECTS {
            warn!("Runtime offers {} effects, registering the first {}", descriptors.len(), MAX_EFFECTS);
        }

        for desc in descriptors.into_iter().take(MAX_EFFECTS) {
            let name = format!("{}{}", self.config.effect_prefix, desc.id);
            let data = LiveEffectData {
                name: name.clone(),
                title: desc.title.clone(),
                major_version: desc.version.major,
                minor_version: desc.version.minor,
                prefers_as_input: InputArtType::Dynamic,
                style_filter_flags: POST_EFFECT_FILTER | HAS_SCALABLE_PARAMS | HANDLES_ADJUST_COLORS,
            };
            let handle = self.host.live_effect.add_live_effect(&data)?;
            let menu = MenuData { category: self.config.menu_category.clone(), title: desc.title.clone() };
            self.host.live_effect.add_menu_item(handle, &name, &menu)?;

            debug!("Registered '{}' ({} v{}.{})", name, desc.title, desc.version.major, desc.version.minor);
            self.effects.push(RegisteredEffect { handle, name, id: desc.id, title: desc.title });
        }
        info!("Registered {} live effects", self.effects.len());
        Ok(())
    }

    /// Host effect name to runtime effect id.
    pub fn effect_id_of<'n>(&self, name: &'n str) -> &'n str {
        normalize_effect_id(name.strip_prefix(self.config.effect_prefix.as_str()).unwrap_or(name))
    }

    /// Execution environment for `effect_id` at `dpi`.
    pub fn env_for(&self, effect_id: &str, dpi: f64) -> LiveEffectEnv {
        LiveEffectEnv {
            dpi,
            base_dpi: self.config.base_dpi,
            is_in_preview: self.editing.as_deref() == Some(effect_id),
        }
    }

    fn show_alerts(&mut self) {
        let Some(invoker) = self.invoker.as_mut() else {
            return;
        };
        for alert in invoker.drain_alerts() {
            warn!("Effect alert: {}", alert);
            self.host.user.alert(&alert);
        }
    }

    /// GoLiveEffect: rasterize `art`, run the effect, place the result.
    pub fn go_effect(
        &mut self,
        effect_name: &str,
        record: &dyn ParamRecord,
        art: ArtHandle,
    ) -> Result<GoOutcome, PluginError> {
        let effect_id = self.effect_id_of(effect_name).to_string();
        let params = ParameterStore::load_or_default(record, &EffectParameters::empty(&effect_id));
        let options = self.config.reconcile_options();
        let base_env = self.env_for(&params.effect_id, options.base_dpi);

        let Self { host, invoker, .. } = self;
        let invoker = invoker.as_mut().ok_or(PluginError::NotStarted)?;
        let mut reconciler = RasterReconciler::new(host.raster.as_mut(), options);
        let outcome = reconciler.run(art, |image, dpi| {
            let env = LiveEffectEnv { dpi, ..base_env };
            invoker.invoke(&params.effect_id, &params.params, &env, image).into_image(&params.effect_id)
        });

        self.show_alerts();
        let outcome = outcome?;
        debug!("GoLiveEffect '{}' -> {:?} at {} dpi ({})", params.effect_id, outcome.art, outcome.dpi, outcome.status);
        Ok(outcome)
    }

    /// EditLiveEffectParameters with a caller-supplied driver.
    ///
    /// `drive` receives the open session and must close it. The session is
    /// marked as editing for the duration, so executions of the same effect
    /// see `isInPreview`.
    pub fn edit_parameters_with(
        &mut self,
        effect_name: &str,
        record: &mut dyn ParamRecord,
        context: EditContext,
        is_new_instance: bool,
        drive: impl FnOnce(&mut EditSession, &mut SessionIo<'_>) -> Result<CloseOutcome, PluginError>,
    ) -> Result<CloseOutcome, PluginError> {
        let effect_id = self.effect_id_of(effect_name).to_string();
        let defaults = EffectParameters::empty(&effect_id);

        let Self { host, invoker, editing, .. } = self;
        let invoker = invoker.as_mut().ok_or(PluginError::NotStarted)?;
        let mut io = SessionIo { invoker, record, host, context };

        let result = EditSession::open(&mut io, &defaults, is_new_instance).and_then(|mut session| {
            *editing = Some(session.effect_id().to_string());
            drive(&mut session, &mut io)
        });
        *editing = None;

        self.show_alerts();
        result
    }

    /// EditLiveEffectParameters driven by a [`ModalSurface`].
    pub fn edit_parameters(
        &mut self,
        effect_name: &str,
        record: &mut dyn ParamRecord,
        context: EditContext,
        is_new_instance: bool,
        surface: &mut dyn ModalSurface,
    ) -> Result<CloseOutcome, PluginError> {
        let frame_rate = self.config.frame_rate;
        self.edit_parameters_with(effect_name, record, context, is_new_instance, |session, io| {
            run_modal(session, io, surface, frame_rate)
        })
    }

    /// LiveEffectScaleParameters. Returns whether params were rewritten.
    pub fn scale_parameters(&mut self, record: &mut dyn ParamRecord, factor: f64) -> Result<bool, PluginError> {
        let params = ParameterStore::load_or_default(&*record, &EffectParameters::empty(""));
        let changed = self
            .invoker()?
            .scale_params(&params.effect_id, &params.params, factor)
            .into_changed_params(&params.effect_id)?;
        if !changed.has_changed {
            return Ok(false);
        }
        ParameterStore::save(record, &EffectParameters::new(&params.effect_id, changed.params))?;
        debug!("Scaled '{}' params by {}", params.effect_id, factor);
        Ok(true)
    }

    /// LiveEffectInterpolate: blend `start` and `end` into `out`.
    pub fn interpolate_parameters(
        &mut self,
        start: &dyn ParamRecord,
        end: &dyn ParamRecord,
        out: &mut dyn ParamRecord,
        percent: f64,
    ) -> Result<(), PluginError> {
        let mut a = ParameterStore::load_or_default(start, &EffectParameters::empty(""));
        let b = ParameterStore::load_or_default(end, &EffectParameters::empty(&a.effect_id));
        if a.effect_id.is_empty() {
            a.effect_id = b.effect_id.clone();
        } else if a.effect_id != b.effect_id {
            warn!("Interpolating '{}' towards '{}', using the start effect", a.effect_id, b.effect_id);
        }
        let params = self
            .invoker()?
            .interpolate_params(&a.effect_id, &a.params, &b.params, percent)
            .into_params(&a.effect_id)?;
        ParameterStore::save(out, &EffectParameters::new(&a.effect_id, params))?;
        Ok(())
    }

    /// LiveEffectAdjustColors. Returns `modifiedSomething`.
    pub fn adjust_colors(
        &mut self,
        record: &mut dyn ParamRecord,
        adjust: &mut ColorAdjuster<'_>,
    ) -> Result<bool, PluginError> {
        let params = ParameterStore::load_or_default(&*record, &EffectParameters::empty(""));
        let changed = self
            .invoker()?
            .adjust_colors(&params.effect_id, &params.params, adjust)
            .into_changed_params(&params.effect_id)?;
        if !changed.has_changed {
            return Ok(false);
        }
        ParameterStore::save(record, &EffectParameters::new(&params.effect_id, changed.params))?;
        Ok(true)
    }
}

/// Host selector entry points. Each one returns the status the host sees.
impl Plugin {
    pub fn on_startup(&mut self) -> HostStatus {
        status_of(self.dispatch("StartupPlugin", |p| p.startup()))
    }

    pub fn on_shutdown(&mut self) -> HostStatus {
        status_of(self.dispatch("ShutdownPlugin", |p| {
            p.shutdown();
            Ok(())
        }))
    }

    pub fn on_go(&mut self, effect_name: &str, record: &dyn ParamRecord, art: ArtHandle) -> Result<GoOutcome, HostStatus> {
        self.dispatch("GoLiveEffect", |p| p.go_effect(effect_name, record, art))
    }

    pub fn on_edit(
        &mut self,
        effect_name: &str,
        record: &mut dyn ParamRecord,
        context: EditContext,
        is_new_instance: bool,
        surface: &mut dyn ModalSurface,
    ) -> Result<CloseOutcome, HostStatus> {
        self.dispatch("EditLiveEffectParameters", |p| {
            p.edit_parameters(effect_name, record, context, is_new_instance, surface)
        })
    }

    pub fn on_scale_parameters(&mut self, record: &mut dyn ParamRecord, factor: f64) -> Result<bool, HostStatus> {
        self.dispatch("LiveEffectScaleParameters", |p| p.scale_parameters(record, factor))
    }

    pub fn on_interpolate(
        &mut self,
        start: &dyn ParamRecord,
        end: &dyn ParamRecord,
        out: &mut dyn ParamRecord,
        percent: f64,
    ) -> HostStatus {
        status_of(self.dispatch("LiveEffectInterpolate", |p| p.interpolate_parameters(start, end, out, percent)))
    }

    pub fn on_adjust_colors(
        &mut self,
        record: &mut dyn ParamRecord,
        adjust: &mut ColorAdjuster<'_>,
    ) -> Result<bool, HostStatus> {
        self.dispatch("LiveEffectAdjustColors", |p| p.adjust_colors(record, adjust))
    }
}

fn status_of(result: Result<(), HostStatus>) -> HostStatus {
    result.err().unwrap_or(HostStatus::NO_ERR)
}

impl Drop for Plugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}
