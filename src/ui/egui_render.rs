//! egui front end for the edit dialog.
//!
//! [`render_tree`] draws a [`UiNode`] tree and returns the emissions the
//! user produced this frame. [`run_edit_window`] hosts an open
//! [`EditSession`] in an eframe window and feeds each frame through
//! [`dispatch_frame`].

use eframe::egui;
use log::{debug, error};

use super::tree::{Direction, Emission, NodeKind, TextSize, UiNode, WidgetInput};
use crate::core::error::PluginError;
use crate::core::modal::{FrameOutput, ModalStatus, dispatch_frame};
use crate::core::session::{CloseOutcome, EditSession, SessionExit, SessionIo};
use crate::host::Point;
use crate::ui::tree::{DataType, Rgba};

/// Draw `node` and collect what the user did to it.
pub fn render_tree(ui: &mut egui::Ui, node: &UiNode) -> Vec<Emission> {
    let mut out = Vec::new();
    render_node(ui, node, &mut out);
    out
}

fn push(out: &mut Vec<Emission>, node: &UiNode, input: WidgetInput) {
    if let Some(emission) = node.emit(input) {
        out.push(emission);
    }
}

fn render_node(ui: &mut egui::Ui, node: &UiNode, out: &mut Vec<Emission>) {
    ui.push_id(&node.node_id, |ui| match &node.kind {
        NodeKind::Group { direction, children, disabled } => {
            let enabled = !disabled.unwrap_or(false);
            ui.add_enabled_ui(enabled, |ui| {
                let body = |ui: &mut egui::Ui| {
                    for child in children {
                        render_node(ui, child, out);
                    }
                };
                match direction {
                    Direction::Row => ui.horizontal(body),
                    Direction::Col => ui.vertical(body),
                };
            });
        }
        NodeKind::Text { text, size } => {
            let rich = egui::RichText::new(text);
            ui.label(if *size == TextSize::Sm { rich.small().weak() } else { rich });
        }
        NodeKind::Button { text } => {
            if ui.button(text).clicked() {
                push(out, node, WidgetInput::Click);
            }
        }
        NodeKind::TextInput { value, .. } => {
            let mut text = value.clone();
            if ui.text_edit_singleline(&mut text).changed() {
                push(out, node, WidgetInput::Text(text));
            }
        }
        NodeKind::NumberInput { value, data_type, min, max, step, .. } => {
            let mut v = *value;
            let mut drag = egui::DragValue::new(&mut v).speed(step.unwrap_or(0.1));
            if let (Some(lo), Some(hi)) = (min, max) {
                drag = drag.range(*lo..=*hi);
            }
            if *data_type == DataType::Int {
                drag = drag.fixed_decimals(0);
            }
            if ui.add(drag).changed() {
                push(out, node, WidgetInput::Number(v));
            }
        }
        NodeKind::Slider { value, min, max, data_type, .. } => {
            let mut v = *value;
            let mut slider = egui::Slider::new(&mut v, *min..=*max);
            if *data_type == DataType::Int {
                slider = slider.integer();
            }
            if ui.add(slider).changed() {
                push(out, node, WidgetInput::Number(v));
            }
        }
        NodeKind::ColorInput { value, .. } => {
            let mut rgba = [value.r as f32, value.g as f32, value.b as f32, value.a as f32];
            if ui.color_edit_button_rgba_unmultiplied(&mut rgba).changed() {
                let c = Rgba::new(rgba[0] as f64, rgba[1] as f64, rgba[2] as f64, rgba[3] as f64);
                push(out, node, WidgetInput::Color(c));
            }
        }
        NodeKind::Checkbox { value, label, .. } => {
            let mut checked = *value;
            if ui.checkbox(&mut checked, label.as_str()).changed() {
                push(out, node, WidgetInput::Bool(checked));
            }
        }
        NodeKind::Select { options, selected_index, .. } => {
            let selected = usize::try_from(*selected_index).ok().and_then(|i| options.get(i));
            let mut chosen = None;
            egui::ComboBox::from_id_salt(&node.node_id)
                .selected_text(selected.map(|o| o.label.as_str()).unwrap_or(""))
                .show_ui(ui, |ui| {
                    for (i, option) in options.iter().enumerate() {
                        let is_selected = usize::try_from(*selected_index).is_ok_and(|s| s == i);
                        if ui.selectable_label(is_selected, &option.label).clicked() && !is_selected {
                            chosen = Some(i);
                        }
                    }
                });
            if let Some(i) = chosen {
                push(out, node, WidgetInput::SelectIndex(i));
            }
        }
        NodeKind::Separator => {
            ui.separator();
        }
    });
}

/// eframe app driving one edit session.
struct EditWindow<'s, 'io> {
    session: &'s mut EditSession,
    io: &'s mut SessionIo<'io>,
    exit: &'s mut Option<SessionExit>,
    failure: &'s mut Option<PluginError>,
    last_size: Option<egui::Vec2>,
}

impl eframe::App for EditWindow<'_, '_> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.exit.is_some() || self.failure.is_some() {
            return;
        }
        let mut output = FrameOutput::default();

        let panel = egui::CentralPanel::default().show(ctx, |ui| {
            output.emissions = render_tree(ui, self.session.tree());
            ui.add_space(8.0);
            ui.separator();
            ui.horizontal(|ui| {
                if ui.button("Cancel").clicked() {
                    output.status = ModalStatus::Cancel;
                }
                if ui.button("OK").clicked() {
                    output.status = ModalStatus::Ok;
                }
            });
            ui.min_rect().size()
        });

        ctx.input(|i| {
            if i.key_pressed(egui::Key::Escape) {
                output.status = ModalStatus::Cancel;
            } else if i.key_pressed(egui::Key::Enter) {
                output.status = ModalStatus::Ok;
            }
            if let Some(rect) = i.viewport().outer_rect {
                output.window_position = Some(Point { h: rect.min.x as i32, v: rect.min.y as i32 });
            }
        });

        // Fit the window to its content
        let size = panel.inner + egui::vec2(16.0, 16.0);
        output.content_size = Some((size.x, size.y));
        if self.last_size.is_none_or(|last| (last - size).length() > 1.0) {
            ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(size));
            self.last_size = Some(size);
        }

        match dispatch_frame(self.session, self.io, output) {
            Ok(None) => {}
            Ok(Some(exit)) => {
                *self.exit = Some(exit);
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
            Err(e) => {
                *self.failure = Some(e);
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
        }
    }
}

/// Show `session` in a native window until OK, Cancel or close, then
/// close the session. Closing the window counts as Cancel.
pub fn run_edit_window(
    session: &mut EditSession,
    io: &mut SessionIo<'_>,
    title: &str,
) -> Result<CloseOutcome, PluginError> {
    let mut viewport = egui::ViewportBuilder::default()
        .with_title(title)
        .with_inner_size([380.0, 200.0])
        .with_resizable(false);
    if let Some(p) = session.window_position() {
        viewport = viewport.with_position([p.h as f32, p.v as f32]);
    }
    let options = eframe::NativeOptions { viewport, ..Default::default() };

    let mut exit = None;
    let mut failure = None;
    let result = eframe::run_native(
        title,
        options,
        Box::new(|_cc| {
            Ok(Box::new(EditWindow {
                session: &mut *session,
                io: &mut *io,
                exit: &mut exit,
                failure: &mut failure,
                last_size: None,
            }))
        }),
    );
    if let Err(e) = result {
        error!("Edit window failed: {}", e);
    }

    if let Some(e) = failure {
        error!("[{}] Edit aborted: {}", session.id(), e);
        session.close(io, SessionExit::Cancel)?;
        return Err(e);
    }
    let exit = exit.unwrap_or(SessionExit::Cancel);
    debug!("[{}] Edit window closed: {:?}", session.id(), exit);
    session.close(io, exit)
}
