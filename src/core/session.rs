//! Modal parameter-edit session.
//!
//! An [`EditSession`] holds every piece of mutable edit state explicitly.
//! The host-facing collaborators (invoker, param record, host suites) are
//! borrowed per call through [`SessionIo`], so the session itself never
//! captures them.
//!
//! Lifecycle:
//!
//! ```text
//! Opening -> Interactive -> Committing          -> Closed
//!                        -> Reverting           -> Closed
//!                        -> AbortingNewInstance -> Closed
//! ```
//!
//! Edits reach the host immediately: every accepted change is persisted
//! and followed by an `UpdateParameters` request so the document previews
//! it. Cancel then either restores the opening params or, for an effect
//! instance that did not exist before this session, asks the host to undo
//! the whole insertion.

use log::{debug, error, info, warn};
use serde_json::Value;
use uuid::Uuid;

use super::error::PluginError;
use super::invoker::{EffectInvoker, FireEventOutcome};
use super::params::{EffectParameters, ParameterStore};
use crate::host::{EditContext, HostServices, ParamRecord, Point};
use crate::ui::tree::{UiEvent, UiNode, merge_patch};

/// Preference prefix/key holding the dialog's last window position
pub const WINDOW_PREF_PREFIX: &str = "livefx";
pub const WINDOW_PREF_KEY: &str = "windowPosition";

/// Stored position meaning "never set"
pub const UNSET_POSITION: Point = Point { h: i32::MIN, v: i32::MIN };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Interactive,
    Committing,
    Reverting,
    AbortingNewInstance,
    Closed,
}

/// How the dialog was dismissed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Ok,
    Cancel,
}

/// What closing did to the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// OK: params persisted and host refreshed
    Committed,
    /// Cancel before anything was previewed
    Discarded,
    /// Cancel on a new instance: host undo issued
    Undone,
    /// Cancel on an existing instance: opening params restored
    Reverted,
}

/// Host-side collaborators borrowed for one session call.
pub struct SessionIo<'a> {
    pub invoker: &'a mut EffectInvoker,
    pub record: &'a mut dyn ParamRecord,
    pub host: &'a mut HostServices,
    pub context: EditContext,
}

/// Explicit edit state for one open dialog.
#[derive(Debug, Clone)]
pub struct EditSession {
    id: Uuid,
    effect_id: String,
    state: SessionState,
    initial_params: Value,
    current_params: Value,
    tree: UiNode,
    is_previewing: bool,
    is_new_instance: bool,
    window_position: Option<Point>,
}

impl EditSession {
    /// Load persisted params, normalize them and render the first tree.
    ///
    /// A normalize failure keeps the loaded params. A render failure means
    /// there is nothing to show, so it is returned.
    pub fn open(
        io: &mut SessionIo<'_>,
        defaults: &EffectParameters,
        is_new_instance: bool,
    ) -> Result<Self, PluginError> {
        let id = Uuid::new_v4();
        let loaded = ParameterStore::load_or_default(&*io.record, defaults);
        let effect_id = loaded.effect_id;
        info!("[{}] Opening edit session for '{}' (new instance: {})", id, effect_id, is_new_instance);

        let params = match io.invoker.normalize_params(&effect_id, &loaded.params).into_params(&effect_id) {
            Ok(p) => p,
            Err(e) => {
                warn!("[{}] {}, keeping loaded params", id, e);
                loaded.params
            }
        };
        let tree = io.invoker.render_tree(&effect_id, &params).into_tree(&effect_id)?;

        let window_position = match io.host.prefs.get_point(WINDOW_PREF_PREFIX, WINDOW_PREF_KEY) {
            Ok(Some(p)) if p != UNSET_POSITION => Some(p),
            Ok(_) => None,
            Err(e) => {
                warn!("[{}] Window position unavailable: {}", id, e);
                None
            }
        };
        debug!("[{}] Window position: {:?}", id, window_position);

        Ok(Self {
            id,
            effect_id,
            state: SessionState::Interactive,
            initial_params: params.clone(),
            current_params: params,
            tree,
            is_previewing: false,
            is_new_instance,
            window_position,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn effect_id(&self) -> &str {
        &self.effect_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn params(&self) -> &Value {
        &self.current_params
    }

    pub fn initial_params(&self) -> &Value {
        &self.initial_params
    }

    pub fn tree(&self) -> &UiNode {
        &self.tree
    }

    pub fn is_previewing(&self) -> bool {
        self.is_previewing
    }

    pub fn is_new_instance(&self) -> bool {
        self.is_new_instance
    }

    pub fn window_position(&self) -> Option<Point> {
        self.window_position
    }

    /// Record where the dialog currently sits on screen.
    pub fn set_window_position(&mut self, position: Point) {
        if position != UNSET_POSITION {
            self.window_position = Some(position);
        }
    }

    fn is_interactive(&self, op: &str) -> bool {
        if self.state != SessionState::Interactive {
            warn!("[{}] {} ignored in state {:?}", self.id, op, self.state);
            return false;
        }
        true
    }

    /// Merge a widget patch into the params, then normalize, re-render and
    /// persist. When normalize or render fails the previous params and tree
    /// stay in place.
    pub fn handle_change(&mut self, io: &mut SessionIo<'_>, patch: &Value) -> Result<(), PluginError> {
        if !self.is_interactive("onChange") {
            return Ok(());
        }
        self.is_previewing = true;

        let mut merged = self.current_params.clone();
        merge_patch(&mut merged, patch);

        let effect_id = self.effect_id.as_str();
        let normalized = match io.invoker.normalize_params(effect_id, &merged).into_params(effect_id) {
            Ok(p) => p,
            Err(e) => {
                warn!("[{}] {}, keeping previous params", self.id, e);
                return Ok(());
            }
        };
        let tree = match io.invoker.render_tree(effect_id, &normalized).into_tree(effect_id) {
            Ok(t) => t,
            Err(e) => {
                warn!("[{}] {}, keeping previous tree", self.id, e);
                return Ok(());
            }
        };

        debug!("[{}] onChange {} -> {}", self.id, patch, normalized);
        self.current_params = normalized;
        self.tree = tree;
        self.refresh(io);
        Ok(())
    }

    /// Route a widget event to the effect. Only an `updated` answer changes
    /// state.
    pub fn handle_event(&mut self, io: &mut SessionIo<'_>, event: &UiEvent) -> Result<(), PluginError> {
        if !self.is_interactive("onFireEvent") {
            return Ok(());
        }
        let effect_id = self.effect_id.as_str();
        let outcome = match io.invoker.fire_event(effect_id, event, &self.current_params).into_fire_outcome(effect_id) {
            Ok(o) => o,
            Err(e) => {
                warn!("[{}] {}, keeping previous params", self.id, e);
                return Ok(());
            }
        };

        match outcome {
            FireEventOutcome::Ignored => {
                debug!("[{}] Event on '{}' left params unchanged", self.id, event.node_id);
                Ok(())
            }
            FireEventOutcome::Updated { params, tree } => {
                debug!("[{}] Event on '{}' -> {}", self.id, event.node_id, params);
                self.is_previewing = true;
                self.current_params = params;
                self.tree = tree;
                self.refresh(io);
                Ok(())
            }
        }
    }

    /// Write the current params and ask the host to refresh.
    ///
    /// A failed write is shown to the user and the session carries on.
    fn persist(&self, io: &mut SessionIo<'_>) -> Result<(), PluginError> {
        let params = EffectParameters::new(&self.effect_id, self.current_params.clone());
        if let Err(e) = ParameterStore::save(io.record, &params) {
            error!("[{}] {}", self.id, e);
            io.host.user.alert(&format!("Could not save effect parameters: {}", e));
        }
        io.host.live_effect.update_parameters(io.context)?;
        Ok(())
    }

    /// [`EditSession::persist`] while the dialog is up. A host refusing the
    /// refresh is reported and the dialog stays open.
    fn refresh(&self, io: &mut SessionIo<'_>) {
        if let Err(e) = self.persist(io) {
            error!("[{}] Preview refresh failed: {}", self.id, e);
            io.host.user.alert(&format!("Could not refresh the preview: {}", e));
        }
    }

    /// Dismiss the dialog and settle the document.
    pub fn close(&mut self, io: &mut SessionIo<'_>, exit: SessionExit) -> Result<CloseOutcome, PluginError> {
        if self.state == SessionState::Closed {
            warn!("[{}] Session already closed", self.id);
            return Ok(CloseOutcome::Discarded);
        }

        if let Some(position) = self.window_position
            && let Err(e) = io.host.prefs.put_point(WINDOW_PREF_PREFIX, WINDOW_PREF_KEY, position)
        {
            warn!("[{}] Could not store window position: {}", self.id, e);
        }

        let result = match (exit, self.is_previewing, self.is_new_instance) {
            (SessionExit::Ok, _, _) => {
                self.state = SessionState::Committing;
                self.persist(io).map(|_| CloseOutcome::Committed)
            }
            (SessionExit::Cancel, false, _) => Ok(CloseOutcome::Discarded),
            (SessionExit::Cancel, true, true) => {
                self.state = SessionState::AbortingNewInstance;
                io.host.undo.undo_changes().map(|_| CloseOutcome::Undone).map_err(PluginError::from)
            }
            (SessionExit::Cancel, true, false) => {
                self.state = SessionState::Reverting;
                self.current_params = self.initial_params.clone();
                self.persist(io).map(|_| CloseOutcome::Reverted)
            }
        };

        self.state = SessionState::Closed;
        self.is_previewing = false;
        match &result {
            Ok(outcome) => info!("[{}] Edit session for '{}' closed: {:?}", self.id, self.effect_id, outcome),
            Err(e) => error!("[{}] Edit session for '{}' failed to close: {}", self.id, self.effect_id, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::{KEY_EFFECT_ID, KEY_PARAMS};
    use crate::host::memory::{MemoryHost, MemoryRecord};
    use crate::runtime::native::NativeRuntime;
    use serde_json::json;

    const RESET_BUTTON: &str = ".root.2-group.1-button";

    struct Fixture {
        host: MemoryHost,
        services: HostServices,
        invoker: EffectInvoker,
        record: MemoryRecord,
    }

    impl Fixture {
        fn new() -> Self {
            let host = MemoryHost::new();
            let services = host.services();
            Self {
                host,
                services,
                invoker: EffectInvoker::new(Box::new(NativeRuntime::with_builtin_effects())),
                record: MemoryRecord::default(),
            }
        }

        fn with_saved(params: Value) -> Self {
            let mut fx = Self::new();
            ParameterStore::save(&mut fx.record, &EffectParameters::new("gaussian-blur", params)).unwrap();
            fx
        }

        fn io(&mut self) -> SessionIo<'_> {
            SessionIo {
                invoker: &mut self.invoker,
                record: &mut self.record,
                host: &mut self.services,
                context: EditContext(7),
            }
        }

        fn saved_radius(&self) -> f64 {
            let text = self.record.get(KEY_PARAMS).unwrap();
            serde_json::from_str::<Value>(text).unwrap()["radius"].as_f64().unwrap()
        }
    }

    fn radius(v: &Value) -> f64 {
        v["radius"].as_f64().unwrap()
    }

    #[test]
    fn test_open_normalizes_and_renders() {
        let mut fx = Fixture::with_saved(json!({"radius": 500}));
        let session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), false).unwrap();
        assert_eq!(session.state(), SessionState::Interactive);
        assert_eq!(radius(session.params()), 200.0);
        assert_eq!(session.params(), session.initial_params());
        assert_eq!(session.tree().node_id, ".root");
        assert!(!session.is_previewing());
        // Opening never writes
        assert_eq!(fx.record.writes(), 2);
    }

    /// Test: onChange then Cancel on an existing instance
    /// Validates: Persisted params end equal to the opening params
    #[test]
    fn test_cancel_reverts_existing_instance() {
        let mut fx = Fixture::with_saved(json!({"radius": 4}));
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), false).unwrap();

        session.handle_change(&mut fx.io(), &json!({"radius": 12})).unwrap();
        assert!(session.is_previewing());
        assert_eq!(fx.saved_radius(), 12.0);
        assert_eq!(fx.host.update_requests(), 1);

        let outcome = session.close(&mut fx.io(), SessionExit::Cancel).unwrap();
        assert_eq!(outcome, CloseOutcome::Reverted);
        assert_eq!(fx.saved_radius(), 4.0);
        assert_eq!(fx.host.update_requests(), 2);
        assert_eq!(fx.host.undo_requests(), 0);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_previewing());
    }

    /// Test: onChange then Cancel on a new instance
    /// Validates: Exactly one undo request, no param write at close
    #[test]
    fn test_cancel_undoes_new_instance() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        session.handle_change(&mut fx.io(), &json!({"radius": 9})).unwrap();
        let writes = fx.record.writes();

        let outcome = session.close(&mut fx.io(), SessionExit::Cancel).unwrap();
        assert_eq!(outcome, CloseOutcome::Undone);
        assert_eq!(fx.host.undo_requests(), 1);
        assert_eq!(fx.record.writes(), writes);
    }

    #[test]
    fn test_cancel_without_preview_is_noop() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        let outcome = session.close(&mut fx.io(), SessionExit::Cancel).unwrap();
        assert_eq!(outcome, CloseOutcome::Discarded);
        assert_eq!(fx.record.writes(), 0);
        assert_eq!(fx.host.update_requests(), 0);
        assert_eq!(fx.host.undo_requests(), 0);
    }

    #[test]
    fn test_ok_commits_and_refreshes() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        session.handle_change(&mut fx.io(), &json!({"radius": 2.5})).unwrap();

        let outcome = session.close(&mut fx.io(), SessionExit::Ok).unwrap();
        assert_eq!(outcome, CloseOutcome::Committed);
        assert_eq!(fx.saved_radius(), 2.5);
        assert_eq!(fx.record.get(KEY_EFFECT_ID), Some("gaussian-blur"));
        assert_eq!(fx.host.update_requests(), 2);
        assert_eq!(fx.host.undo_requests(), 0);
    }

    /// Test: Patch merge scenario
    /// Validates: Keys outside the patch survive, unknown keys are kept
    #[test]
    fn test_change_merges_patch() {
        let mut fx = Fixture::with_saved(json!({"radius": 1, "extra": 2}));
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), false).unwrap();
        session.handle_change(&mut fx.io(), &json!({"extra": 3})).unwrap();
        assert_eq!(radius(session.params()), 1.0);
        assert_eq!(session.params()["extra"], json!(3));
    }

    #[test]
    fn test_event_updates_and_persists() {
        let mut fx = Fixture::with_saved(json!({"radius": 40}));
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), false).unwrap();

        session.handle_event(&mut fx.io(), &UiEvent::click(RESET_BUTTON)).unwrap();
        assert!(session.is_previewing());
        assert_eq!(radius(session.params()), 5.0);
        assert_eq!(fx.saved_radius(), 5.0);
        assert_eq!(fx.host.update_requests(), 1);

        // Already at defaults: nothing to do
        session.handle_event(&mut fx.io(), &UiEvent::click(RESET_BUTTON)).unwrap();
        assert_eq!(fx.host.update_requests(), 1);
    }

    #[test]
    fn test_unknown_event_keeps_state() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        let tree = session.tree().clone();
        session.handle_event(&mut fx.io(), &UiEvent::click(".root.nope")).unwrap();
        assert!(!session.is_previewing());
        assert_eq!(session.tree(), &tree);
        assert_eq!(fx.record.writes(), 0);
    }

    #[test]
    fn test_failed_write_alerts_and_continues() {
        let mut fx = Fixture::new();
        fx.record.fail_writes_for(KEY_PARAMS);
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        session.handle_change(&mut fx.io(), &json!({"radius": 3})).unwrap();
        assert_eq!(fx.host.alerts().len(), 1);
        assert_eq!(fx.host.update_requests(), 1);
        assert_eq!(radius(session.params()), 3.0);
    }

    #[test]
    fn test_refused_refresh_keeps_dialog_open() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        fx.host.fail_call("UpdateParameters");
        session.handle_change(&mut fx.io(), &json!({"radius": 9})).unwrap();

        assert_eq!(radius(session.params()), 9.0);
        assert!(session.is_previewing());
        assert_eq!(fx.host.alerts().len(), 1);
        assert_eq!(session.close(&mut fx.io(), SessionExit::Cancel).unwrap(), CloseOutcome::Undone);
        assert_eq!(fx.host.undo_requests(), 1);
    }

    #[test]
    fn test_unknown_effect_fails_to_open() {
        let mut fx = Fixture::new();
        assert!(EditSession::open(&mut fx.io(), &EffectParameters::empty("nope"), true).is_err());
    }

    #[test]
    fn test_window_position_roundtrip() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        assert_eq!(session.window_position(), None);
        session.set_window_position(Point { h: 120, v: 80 });
        session.close(&mut fx.io(), SessionExit::Cancel).unwrap();
        assert_eq!(fx.host.pref_point(WINDOW_PREF_PREFIX, WINDOW_PREF_KEY), Some(Point { h: 120, v: 80 }));

        let session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        assert_eq!(session.window_position(), Some(Point { h: 120, v: 80 }));
    }

    #[test]
    fn test_closed_session_ignores_input() {
        let mut fx = Fixture::new();
        let mut session = EditSession::open(&mut fx.io(), &EffectParameters::empty("gaussian-blur"), true).unwrap();
        session.close(&mut fx.io(), SessionExit::Ok).unwrap();
        let writes = fx.record.writes();
        session.handle_change(&mut fx.io(), &json!({"radius": 50})).unwrap();
        assert_eq!(fx.record.writes(), writes);
    }
}
