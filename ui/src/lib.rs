pub mod docking;
pub mod ui;
pub mod widgets;

pub use docking::{Docking, DockingEvent};
pub use ui::{Activation, Active, Cursor, Inputs, MouseButton, State, Theme, Ui, UI_MAX_DEPTH};
pub use widgets::{
    button, button_split, char_checkbox, invisible_button, label_in_rect, label_split, rect,
    splitter_x, splitter_y, Button, CharCheckbox,
};
