//! Cooperative modal frame loop.
//!
//! Each frame the surface draws the session's current tree and reports what
//! the user did. Emissions are dispatched synchronously, one at a time, so
//! no two runtime calls overlap. The loop ends when the surface reports OK
//! or Cancel.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use serde_json::Value;

use super::error::PluginError;
use super::session::{CloseOutcome, EditSession, SessionExit, SessionIo};
use crate::host::Point;
use crate::ui::tree::{Emission, UiNode};

/// Close request raised by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModalStatus {
    #[default]
    None,
    Ok,
    Cancel,
}

/// Everything the surface observed during one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub emissions: Vec<Emission>,
    pub status: ModalStatus,
    pub window_position: Option<Point>,
    /// Measured content size, for surfaces that auto-fit the window
    pub content_size: Option<(f32, f32)>,
}

/// A UI that can draw a tree and collect user input.
pub trait ModalSurface {
    fn frame(&mut self, tree: &UiNode) -> FrameOutput;
}

/// Apply one frame's input to the session.
///
/// Keyed emissions go through `handle_change` with their patch and then
/// `handle_event`; unkeyed ones only through `handle_event`. Returns the
/// requested exit, if any, without closing the session.
pub fn dispatch_frame(
    session: &mut EditSession,
    io: &mut SessionIo<'_>,
    output: FrameOutput,
) -> Result<Option<SessionExit>, PluginError> {
    if let Some(position) = output.window_position {
        session.set_window_position(position);
    }

    for emission in output.emissions {
        trace!("emission {:?}", emission);
        if let Some(patch) = emission.patch {
            session.handle_change(io, &Value::Object(patch))?;
        }
        session.handle_event(io, &emission.event)?;
    }

    Ok(match output.status {
        ModalStatus::None => None,
        ModalStatus::Ok => Some(SessionExit::Ok),
        ModalStatus::Cancel => Some(SessionExit::Cancel),
    })
}

/// Drive `surface` until it asks to close, then close the session.
///
/// `frame_rate <= 0` runs frames back to back.
pub fn run_modal(
    session: &mut EditSession,
    io: &mut SessionIo<'_>,
    surface: &mut dyn ModalSurface,
    frame_rate: f64,
) -> Result<CloseOutcome, PluginError> {
    let frame_time = (frame_rate > 0.0).then(|| Duration::from_secs_f64(1.0 / frame_rate));
    let mut frames = 0u64;

    let exit = loop {
        let start = Instant::now();
        let output = surface.frame(session.tree());
        frames += 1;
        match dispatch_frame(session, io, output) {
            Ok(Some(exit)) => break exit,
            Ok(None) => {}
            Err(e) => {
                error!("[{}] Frame {} failed: {}", session.id(), frames, e);
                session.close(io, SessionExit::Cancel)?;
                return Err(e);
            }
        }
        if let Some(frame_time) = frame_time {
            let elapsed = start.elapsed();
            if elapsed < frame_time {
                thread::sleep(frame_time - elapsed);
            }
        }
    };

    debug!("[{}] Modal loop ended after {} frames: {:?}", session.id(), frames, exit);
    session.close(io, exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invoker::EffectInvoker;
    use crate::core::params::EffectParameters;
    use crate::host::EditContext;
    use crate::host::memory::{MemoryHost, MemoryRecord};
    use crate::runtime::native::NativeRuntime;
    use crate::ui::tree::{NodeKind, WidgetInput};
    use std::collections::VecDeque;

    /// Replays canned input; cancels once the script runs out.
    struct ScriptedSurface {
        script: VecDeque<Box<dyn FnMut(&UiNode) -> FrameOutput>>,
        drawn: usize,
    }

    impl ScriptedSurface {
        fn new() -> Self {
            Self { script: VecDeque::new(), drawn: 0 }
        }

        fn then(mut self, f: impl FnMut(&UiNode) -> FrameOutput + 'static) -> Self {
            self.script.push_back(Box::new(f));
            self
        }
    }

    impl ModalSurface for ScriptedSurface {
        fn frame(&mut self, tree: &UiNode) -> FrameOutput {
            self.drawn += 1;
            match self.script.pop_front() {
                Some(mut f) => f(tree),
                None => FrameOutput { status: ModalStatus::Cancel, ..Default::default() },
            }
        }
    }

    /// First slider in the tree
    fn slider(tree: &UiNode) -> UiNode {
        let mut found = None;
        tree.visit(&mut |n| {
            if found.is_none() && matches!(n.kind, NodeKind::Slider { .. }) {
                found = Some(n.clone());
            }
        });
        found.unwrap()
    }

    fn drag_to(value: f64) -> impl FnMut(&UiNode) -> FrameOutput {
        move |tree| FrameOutput {
            emissions: vec![slider(tree).emit(WidgetInput::Number(value)).unwrap()],
            ..Default::default()
        }
    }

    fn run(surface: &mut ScriptedSurface, is_new: bool) -> (CloseOutcome, MemoryHost, MemoryRecord) {
        run_on(MemoryHost::new(), surface, is_new)
    }

    fn run_on(host: MemoryHost, surface: &mut ScriptedSurface, is_new: bool) -> (CloseOutcome, MemoryHost, MemoryRecord) {
        let mut services = host.services();
        let mut invoker = EffectInvoker::new(Box::new(NativeRuntime::with_builtin_effects()));
        let mut record = MemoryRecord::default();
        let mut io = SessionIo { invoker: &mut invoker, record: &mut record, host: &mut services, context: EditContext(1) };
        let mut session = EditSession::open(&mut io, &EffectParameters::empty("gaussian-blur"), is_new).unwrap();
        let outcome = run_modal(&mut session, &mut io, surface, 0.0).unwrap();
        drop(io);
        (outcome, host, record)
    }

    /// Test: Slider drag then OK
    /// Validates: Patch reaches params, OK commits
    #[test]
    fn test_drag_then_ok_commits() {
        let mut surface = ScriptedSurface::new()
            .then(drag_to(17.0))
            .then(|_| FrameOutput { status: ModalStatus::Ok, ..Default::default() });
        let (outcome, host, record) = run(&mut surface, true);

        assert_eq!(outcome, CloseOutcome::Committed);
        assert_eq!(surface.drawn, 2);
        let saved: Value = serde_json::from_str(record.get(crate::core::params::KEY_PARAMS).unwrap()).unwrap();
        assert_eq!(saved["radius"].as_f64(), Some(17.0));
        assert_eq!(host.update_requests(), 2);
    }

    /// Test: Host refuses preview refreshes mid-edit
    /// Validates: Loop keeps drawing, cancel still undoes, position is stored
    #[test]
    fn test_refused_refresh_keeps_loop_running() {
        let host = MemoryHost::new();
        host.fail_call("UpdateParameters");
        let mut surface = ScriptedSurface::new()
            .then(|_| FrameOutput { window_position: Some(Point { h: 40, v: 50 }), ..Default::default() })
            .then(drag_to(12.0))
            .then(|_| FrameOutput { status: ModalStatus::Cancel, ..Default::default() });
        let (outcome, host, record) = run_on(host, &mut surface, true);

        assert_eq!(outcome, CloseOutcome::Undone);
        assert_eq!(surface.drawn, 3);
        assert_eq!(host.undo_requests(), 1);
        assert_eq!(host.alerts().len(), 1);
        assert_eq!(record.writes(), 2);
        assert_eq!(
            host.pref_point(crate::core::session::WINDOW_PREF_PREFIX, crate::core::session::WINDOW_PREF_KEY),
            Some(Point { h: 40, v: 50 })
        );
    }

    #[test]
    fn test_script_exhausted_cancels() {
        let mut surface = ScriptedSurface::new().then(drag_to(3.0));
        let (outcome, host, _) = run(&mut surface, true);
        assert_eq!(outcome, CloseOutcome::Undone);
        assert_eq!(host.undo_requests(), 1);
    }

    #[test]
    fn test_idle_cancel_discards() {
        let mut surface = ScriptedSurface::new().then(|_| FrameOutput {
            window_position: Some(Point { h: 10, v: 20 }),
            ..Default::default()
        });
        let (outcome, host, record) = run(&mut surface, false);
        assert_eq!(outcome, CloseOutcome::Discarded);
        assert_eq!(record.writes(), 0);
        assert_eq!(
            host.pref_point(crate::core::session::WINDOW_PREF_PREFIX, crate::core::session::WINDOW_PREF_KEY),
            Some(Point { h: 10, v: 20 })
        );
    }
}
