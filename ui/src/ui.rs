use std::collections::HashMap;

use glam::{IVec2, Vec2};
use karst_painter::{ColorU32, Painter, Rect};

pub const UI_MAX_DEPTH: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MouseButton {
    Left = 0,
    Right = 1,
    Middle = 2,
}

#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub mouse_buttons_pressed: [bool; 3],
    pub mouse_buttons_pressed_last_frame: [bool; 3],
    pub mouse_position: IVec2,
    pub mouse_wheel: Option<IVec2>,
}

impl Inputs {
    pub fn is_pressed(&self, button: MouseButton) -> bool {
        self.mouse_buttons_pressed[button as usize]
    }

    pub fn was_pressed(&self, button: MouseButton) -> bool {
        self.mouse_buttons_pressed_last_frame[button as usize]
    }

    /// Shift the current button state into last-frame state and record the
    /// new snapshot.
    pub fn update(&mut self, mouse_position: IVec2, buttons: [bool; 3], wheel: Option<IVec2>) {
        self.mouse_buttons_pressed_last_frame = self.mouse_buttons_pressed;
        self.mouse_buttons_pressed = buttons;
        self.mouse_position = mouse_position;
        self.mouse_wheel = wheel;
    }
}

/// Who owns the current mouse interaction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Active {
    /// Nothing grabbed the mouse yet.
    #[default]
    Idle,
    Widget(u64),
    /// The press landed outside every widget. Keeps late widgets from
    /// catching a drag mid-press.
    Background,
}

#[derive(Debug, Clone, Default)]
pub struct Activation {
    pub focused: Option<u64>,
    pub active: Active,
    pub gen: u64,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Cursor {
    #[default]
    Arrow,
    TextInput,
    ResizeEW,
    ResizeNS,
    Hand,
}

#[derive(Debug, Clone)]
pub struct Theme {
    pub accent_color: ColorU32,

    pub button_bg_color: ColorU32,
    pub button_hover_bg_color: ColorU32,
    pub button_pressed_bg_color: ColorU32,
    pub button_label_color: ColorU32,

    pub input_thickness: f32,
    pub splitter_thickness: f32,
    pub splitter_hover_thickness: f32,
    pub splitter_color: ColorU32,
    pub splitter_hover_color: ColorU32,

    pub scroll_area_bg_color: ColorU32,
    pub scroll_bar_bg_color: ColorU32,
    pub scroll_thumb_bg_color: ColorU32,

    pub font_size: f32,
}

impl Default for Theme {
    fn default() -> Self {
        let accent_color = ColorU32::from_uints(0x10, 0x75, 0xB2, 0xFF);
        Self {
            accent_color,
            button_bg_color: ColorU32::from_floats(1.0, 1.0, 1.0, 0.3),
            button_hover_bg_color: ColorU32::from_uints(0, 0, 0, 0x06),
            button_pressed_bg_color: ColorU32::from_uints(0, 0, 0, 0x09),
            button_label_color: ColorU32::from_uints(0, 0, 0, 0xFF),
            input_thickness: 10.0,
            splitter_thickness: 2.0,
            splitter_hover_thickness: 4.0,
            splitter_color: ColorU32::from_greyscale(0xE5),
            splitter_hover_color: ColorU32::from_greyscale(0xD1),
            scroll_area_bg_color: ColorU32::from_uints(0, 0, 0, 0x44),
            scroll_bar_bg_color: ColorU32::from_uints(0xDD, 0xDD, 0xFF, 0x22),
            scroll_thumb_bg_color: accent_color,
            font_size: 14.0,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct ClipEntry {
    index: u32,
    rect: Rect,
}

#[derive(Debug, Default)]
pub struct State {
    clip_stack: Vec<ClipEntry>,
    pub cursor: Cursor,
    pub active_drag_offset: Vec2,

    pub scroll_id_stack: Vec<u64>,
    pub scroll_starting_rects: HashMap<u64, Rect>,
    pub scroll_ending_rects: HashMap<u64, Rect>,
}

/// Immediate-mode UI state. Widgets derive their identity from visit order,
/// so the widget tree has to be stable between the press and release frames
/// of an interaction.
#[derive(Debug, Default)]
pub struct Ui {
    pub theme: Theme,
    pub inputs: Inputs,
    pub activation: Activation,
    pub state: State,
}

impl Ui {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            inputs: Inputs::default(),
            activation: Activation::default(),
            state: State::default(),
        }
    }

    pub fn new_frame(&mut self) {
        self.activation.gen = 0;
        self.activation.focused = None;
        self.state.cursor = Cursor::Arrow;
    }

    pub fn end_frame(&mut self) {
        if !self.inputs.is_pressed(MouseButton::Left) {
            self.activation.active = Active::Idle;
        } else if self.activation.active == Active::Idle {
            self.activation.active = Active::Background;
        }
    }

    /// Widget ids are the visit order within the frame.
    pub fn make_id(&mut self) -> u64 {
        self.activation.gen += 1;
        self.activation.gen
    }

    pub fn mouse_position(&self) -> Vec2 {
        self.inputs.mouse_position.as_vec2()
    }

    pub fn is_hovering(&self, rect: Rect) -> bool {
        let mouse = self.mouse_position();
        if !rect.is_point_inside(mouse) {
            return false;
        }
        match self.current_clip_geometry() {
            Some(clip_rect) => clip_rect.is_point_inside(mouse),
            None => true,
        }
    }

    pub fn has_pressed(&self, button: MouseButton) -> bool {
        self.inputs.is_pressed(button) && !self.inputs.was_pressed(button)
    }

    pub fn has_pressed_and_released(&self, button: MouseButton) -> bool {
        !self.inputs.is_pressed(button) && self.inputs.was_pressed(button)
    }

    pub fn has_clicked(&self, id: u64, button: MouseButton) -> bool {
        self.has_pressed_and_released(button)
            && self.activation.focused == Some(id)
            && self.activation.active == Active::Widget(id)
    }

    // -- Clip stack

    pub fn current_clip_rect(&self) -> u32 {
        self.state
            .clip_stack
            .last()
            .map_or(u32::MAX, |entry| entry.index)
    }

    pub fn current_clip_geometry(&self) -> Option<Rect> {
        self.state.clip_stack.last().map(|entry| entry.rect)
    }

    /// Emit a clip rect and push it on the stack.
    pub fn push_clip_rect(&mut self, painter: &mut Painter, clip_rect: Rect) -> u32 {
        debug_assert!(self.state.clip_stack.len() < UI_MAX_DEPTH);
        let index = painter.register_clip_rect(clip_rect);
        self.state.clip_stack.push(ClipEntry {
            index,
            rect: clip_rect,
        });
        index
    }

    pub fn pop_clip_rect(&mut self) {
        debug_assert!(!self.state.clip_stack.is_empty());
        self.state.clip_stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec2;

    fn test_rect(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect::new(Vec2::new(x, y), Vec2::new(w, h))
    }

    fn painter() -> Painter {
        Painter::new(IVec2::new(64, 64))
    }

    #[test]
    fn test_clip_push_pop_is_noop() {
        let mut ui = Ui::default();
        let mut painter = painter();

        let before = ui.current_clip_rect();
        ui.push_clip_rect(&mut painter, test_rect(0.0, 0.0, 10.0, 10.0));
        ui.pop_clip_rect();
        assert_eq!(ui.current_clip_rect(), before);
    }

    #[test]
    fn test_clip_two_pushes_two_pops() {
        let mut ui = Ui::default();
        let mut painter = painter();

        assert_eq!(ui.current_clip_rect(), u32::MAX);
        let first = ui.push_clip_rect(&mut painter, test_rect(0.0, 0.0, 100.0, 100.0));
        let second = ui.push_clip_rect(&mut painter, test_rect(10.0, 10.0, 50.0, 50.0));
        assert_ne!(first, second);
        assert_eq!(ui.current_clip_rect(), second);

        ui.pop_clip_rect();
        assert_eq!(ui.current_clip_rect(), first);
        ui.pop_clip_rect();
        assert_eq!(ui.current_clip_rect(), u32::MAX);
    }

    #[test]
    fn test_ids_are_visit_order() {
        let mut ui = Ui::default();
        ui.new_frame();
        assert_eq!(ui.make_id(), 1);
        assert_eq!(ui.make_id(), 2);
        ui.new_frame();
        assert_eq!(ui.make_id(), 1);
    }

    #[test]
    fn test_end_frame_background_activation() {
        let mut ui = Ui::default();
        ui.inputs
            .update(IVec2::new(0, 0), [true, false, false], None);
        ui.new_frame();
        // No widget claimed the press this frame.
        ui.end_frame();
        assert_eq!(ui.activation.active, Active::Background);

        ui.inputs
            .update(IVec2::new(0, 0), [false, false, false], None);
        ui.new_frame();
        ui.end_frame();
        assert_eq!(ui.activation.active, Active::Idle);
    }
}
