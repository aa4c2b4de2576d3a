use glam::Vec2;
use karst_painter::{ColorU32, Font, Painter, Rect, RectSplit};

use crate::ui::{Active, Cursor, MouseButton, Ui};

/// Shared press/release contract: focus on hover, grab activation on press,
/// fire on release while still hovered.
fn button_behavior(ui: &mut Ui, id: u64, rect: Rect) -> bool {
    if ui.is_hovering(rect) {
        ui.activation.focused = Some(id);
        if ui.activation.active == Active::Idle && ui.inputs.is_pressed(MouseButton::Left) {
            ui.activation.active = Active::Widget(id);
        }
    }

    !ui.inputs.is_pressed(MouseButton::Left)
        && ui.activation.focused == Some(id)
        && ui.activation.active == Active::Widget(id)
}

#[derive(Debug, Copy, Clone)]
pub struct Button<'a> {
    pub label: &'a str,
    pub rect: Rect,
}

pub fn button(ui: &mut Ui, painter: &mut Painter, font: &mut Font, button: Button<'_>) -> bool {
    let id = ui.make_id();
    ui.push_clip_rect(painter, button.rect);

    let result = button_behavior(ui, id, button.rect);

    let mut bg_color = ui.theme.button_bg_color;
    if ui.activation.focused == Some(id) {
        bg_color = if ui.activation.active == Active::Widget(id) {
            ui.theme.button_pressed_bg_color
        } else {
            ui.theme.button_hover_bg_color
        };
    }
    painter.draw_color_rect(button.rect, ui.current_clip_rect(), bg_color);

    let label_size = painter.measure_label(font, button.label).as_vec2();
    let label_rect = button.rect.center(label_size);
    painter.draw_label(label_rect, ui.current_clip_rect(), font, button.label);

    ui.pop_clip_rect();
    result
}

/// Hit-test-only button, draws nothing.
pub fn invisible_button(ui: &mut Ui, rect: Rect) -> bool {
    let id = ui.make_id();
    button_behavior(ui, id, rect)
}

pub fn rect(ui: &mut Ui, painter: &mut Painter, rect: Rect, color: ColorU32) {
    painter.draw_color_rect(rect, ui.current_clip_rect(), color);
}

pub fn label_in_rect(
    ui: &mut Ui,
    painter: &mut Painter,
    font: &mut Font,
    view_rect: Rect,
    text: &str,
) {
    let label_size = painter.measure_label(font, text).as_vec2();
    let label_rect = view_rect.center(label_size);
    painter.draw_label(label_rect, ui.current_clip_rect(), font, text);
}

/// Carve a line off the rectsplit and draw a label in it.
pub fn label_split(
    ui: &mut Ui,
    painter: &mut Painter,
    font: &mut Font,
    rectsplit: &mut RectSplit<'_>,
    text: &str,
) -> Rect {
    let label_size = painter.measure_label(font, text).as_vec2();
    let line_rect = rectsplit.split(label_size.y);
    painter.draw_label(line_rect, ui.current_clip_rect(), font, text);
    line_rect
}

pub fn button_split(
    ui: &mut Ui,
    painter: &mut Painter,
    font: &mut Font,
    rectsplit: &mut RectSplit<'_>,
    label: &str,
) -> bool {
    let label_size = painter.measure_label(font, label).as_vec2();
    let em = ui.theme.font_size;
    let button_rect = rectsplit.split(label_size.y + 0.5 * em);
    button(
        ui,
        painter,
        font,
        Button {
            label,
            rect: button_rect,
        },
    )
}

/// Vertical splitter handle: `value` is the left pane's share of the width.
pub fn splitter_x(
    ui: &mut Ui,
    painter: &mut Painter,
    view_rect: Rect,
    value: &mut f32,
) -> (Rect, Rect) {
    let id = ui.make_id();
    let (left, right) =
        view_rect.split_off_left(*value * view_rect.size.x, ui.theme.splitter_thickness);

    let input_rect = Rect {
        pos: view_rect.pos + Vec2::new(left.size.x - 0.5 * ui.theme.input_thickness, 0.0),
        size: Vec2::new(ui.theme.input_thickness, view_rect.size.y),
    };

    if ui.is_hovering(input_rect) {
        ui.state.cursor = Cursor::ResizeEW;
        ui.activation.focused = Some(id);
        if ui.activation.active == Active::Idle && ui.inputs.is_pressed(MouseButton::Left) {
            ui.activation.active = Active::Widget(id);
        }
    }
    if ui.activation.active == Active::Widget(id) {
        *value = ((ui.mouse_position().x - view_rect.pos.x) / view_rect.size.x).clamp(0.05, 0.95);
    }

    let color = if ui.activation.focused == Some(id) {
        ui.theme.splitter_hover_color
    } else {
        ui.theme.splitter_color
    };
    let thickness = ui.theme.splitter_thickness;
    painter.draw_color_rect(
        Rect {
            pos: Vec2::new(right.pos.x - 0.5 * thickness, view_rect.pos.y),
            size: Vec2::new(thickness, view_rect.size.y),
        },
        ui.current_clip_rect(),
        color,
    );

    (left, right)
}

/// Horizontal splitter handle: `value` is the top pane's share of the height.
pub fn splitter_y(
    ui: &mut Ui,
    painter: &mut Painter,
    view_rect: Rect,
    value: &mut f32,
) -> (Rect, Rect) {
    let id = ui.make_id();
    let (top, bottom) =
        view_rect.split_off_top(*value * view_rect.size.y, ui.theme.splitter_thickness);

    let input_rect = Rect {
        pos: view_rect.pos + Vec2::new(0.0, top.size.y - 0.5 * ui.theme.input_thickness),
        size: Vec2::new(view_rect.size.x, ui.theme.input_thickness),
    };

    if ui.is_hovering(input_rect) {
        ui.state.cursor = Cursor::ResizeNS;
        ui.activation.focused = Some(id);
        if ui.activation.active == Active::Idle && ui.inputs.is_pressed(MouseButton::Left) {
            ui.activation.active = Active::Widget(id);
        }
    }
    if ui.activation.active == Active::Widget(id) {
        *value = ((ui.mouse_position().y - view_rect.pos.y) / view_rect.size.y).clamp(0.05, 0.95);
    }

    let color = if ui.activation.focused == Some(id) {
        ui.theme.splitter_hover_color
    } else {
        ui.theme.splitter_color
    };
    let thickness = ui.theme.splitter_thickness;
    painter.draw_color_rect(
        Rect {
            pos: Vec2::new(view_rect.pos.x, bottom.pos.y - 0.5 * thickness),
            size: Vec2::new(view_rect.size.x, thickness),
        },
        ui.current_clip_rect(),
        color,
    );

    (top, bottom)
}

#[derive(Debug, Copy, Clone)]
pub struct CharCheckbox {
    pub label: char,
    pub rect: Rect,
}

/// Single-character toggle, used for per-channel switches.
pub fn char_checkbox(
    ui: &mut Ui,
    painter: &mut Painter,
    font: &mut Font,
    checkbox: CharCheckbox,
    value: &mut bool,
) -> bool {
    let id = ui.make_id();
    if button_behavior(ui, id, checkbox.rect) {
        *value = !*value;
    }

    let mut border_color = ColorU32::from_greyscale(0x8A);
    if ui.activation.focused == Some(id) {
        border_color = if ui.activation.active == Active::Widget(id) {
            ColorU32::from_greyscale(0x3D)
        } else {
            ColorU32::from_greyscale(0xD5)
        };
    }
    let bg_color = if *value {
        ColorU32::from_uints(0x2D, 0xA8, 0xFB, 0xFF)
    } else {
        ColorU32::from_greyscale(0xF3)
    };

    painter.draw_color_rect(checkbox.rect, ui.current_clip_rect(), border_color);
    painter.draw_color_rect(
        checkbox.rect.inset(Vec2::splat(1.0)),
        ui.current_clip_rect(),
        bg_color,
    );

    let mut label = [0u8; 4];
    let label = checkbox.label.encode_utf8(&mut label);
    label_in_rect(ui, painter, font, checkbox.rect, label);

    *value
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec2;

    fn frame(ui: &mut Ui, mouse: (i32, i32), left_pressed: bool) {
        ui.inputs.update(
            IVec2::new(mouse.0, mouse.1),
            [left_pressed, false, false],
            None,
        );
        ui.new_frame();
    }

    fn button_rect() -> Rect {
        Rect::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 30.0))
    }

    #[test]
    fn test_click_fires_on_release() {
        let mut ui = Ui::default();

        // Press inside the button: focused and active, no click yet.
        frame(&mut ui, (50, 15), true);
        assert!(!invisible_button(&mut ui, button_rect()));
        assert_eq!(ui.activation.focused, Some(1));
        assert_eq!(ui.activation.active, Active::Widget(1));
        ui.end_frame();

        // Release at the same position: the click fires once.
        frame(&mut ui, (50, 15), false);
        assert!(invisible_button(&mut ui, button_rect()));
        ui.end_frame();

        // Quiet frame afterwards: no click.
        frame(&mut ui, (50, 15), false);
        assert!(!invisible_button(&mut ui, button_rect()));
        ui.end_frame();
    }

    #[test]
    fn test_release_outside_does_not_fire() {
        let mut ui = Ui::default();

        frame(&mut ui, (50, 15), true);
        assert!(!invisible_button(&mut ui, button_rect()));
        ui.end_frame();

        // Dragged off before release: focus is lost, no click.
        frame(&mut ui, (200, 15), false);
        assert!(!invisible_button(&mut ui, button_rect()));
        ui.end_frame();
    }

    #[test]
    fn test_press_on_background_shields_widgets() {
        let mut ui = Ui::default();

        // Press lands outside any widget.
        frame(&mut ui, (500, 500), true);
        assert!(!invisible_button(&mut ui, button_rect()));
        ui.end_frame();
        assert_eq!(ui.activation.active, Active::Background);

        // Dragging over the button while held does not activate it.
        frame(&mut ui, (50, 15), true);
        assert!(!invisible_button(&mut ui, button_rect()));
        assert_eq!(ui.activation.active, Active::Background);
        ui.end_frame();

        frame(&mut ui, (50, 15), false);
        assert!(!invisible_button(&mut ui, button_rect()));
        ui.end_frame();
    }

    #[test]
    fn test_splitter_drag_updates_value() {
        let mut ui = Ui::default();
        let mut painter = Painter::new(IVec2::new(64, 64));
        let view_rect = Rect::new(Vec2::new(0.0, 0.0), Vec2::new(200.0, 100.0));
        let mut value = 0.5;

        // Grab the handle at the middle.
        frame(&mut ui, (100, 50), true);
        splitter_x(&mut ui, &mut painter, view_rect, &mut value);
        ui.end_frame();

        // Drag to 25%.
        frame(&mut ui, (50, 50), true);
        splitter_x(&mut ui, &mut painter, view_rect, &mut value);
        ui.end_frame();
        assert!((value - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_splitter_ignored_when_not_grabbed() {
        let mut ui = Ui::default();
        let mut painter = Painter::new(IVec2::new(64, 64));
        let view_rect = Rect::new(Vec2::new(0.0, 0.0), Vec2::new(200.0, 100.0));
        let mut value = 0.5;

        frame(&mut ui, (50, 50), false);
        splitter_x(&mut ui, &mut painter, view_rect, &mut value);
        ui.end_frame();
        assert!((value - 0.5).abs() < 1e-6);
    }
}
