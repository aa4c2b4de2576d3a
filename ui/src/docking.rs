use glam::Vec2;
use karst_containers::{Handle, Pool};
use karst_painter::{ColorU32, Font, Painter, Rect, SplitDirection};

use crate::ui::{Active, MouseButton, Ui};
use crate::widgets;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Default)]
pub struct AreaContainer {
    pub tabviews: Vec<usize>,
    pub selected: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AreaSplitter {
    pub left_child: Handle<Area>,
    pub right_child: Handle<Area>,
    pub split: f32,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub enum AreaKind {
    Container(AreaContainer),
    Splitter(AreaSplitter),
}

/// Node of the docking tree: either a tab container or a two-way splitter.
/// `parent` is invalid for the root and for floating roots.
#[derive(Debug, Clone)]
pub struct Area {
    pub kind: AreaKind,
    pub parent: Handle<Area>,
    pub rect: Rect,
}

impl Area {
    fn container(kind: AreaKind) -> Self {
        Self {
            kind,
            parent: Handle::invalid(),
            rect: Rect::default(),
        }
    }

    pub fn as_container(&self) -> Option<&AreaContainer> {
        match &self.kind {
            AreaKind::Container(container) => Some(container),
            AreaKind::Splitter(_) => None,
        }
    }

    fn as_container_mut(&mut self) -> Option<&mut AreaContainer> {
        match &mut self.kind {
            AreaKind::Container(container) => Some(container),
            AreaKind::Splitter(_) => None,
        }
    }

    pub fn as_splitter(&self) -> Option<&AreaSplitter> {
        match &self.kind {
            AreaKind::Splitter(splitter) => Some(splitter),
            AreaKind::Container(_) => None,
        }
    }

    fn as_splitter_mut(&mut self) -> Option<&mut AreaSplitter> {
        match &mut self.kind {
            AreaKind::Splitter(splitter) => Some(splitter),
            AreaKind::Container(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TabView {
    pub title: String,
    pub area: Handle<Area>,
}

#[derive(Debug, Clone)]
pub struct FloatingContainer {
    pub area: Handle<Area>,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DockingEvent {
    DropTab {
        i_tabview: usize,
        in_container: Handle<Area>,
    },
    Split {
        direction: SplitDirection,
        i_tabview: usize,
        container: Handle<Area>,
    },
    DetachTab {
        i_tabview: usize,
    },
    MoveFloating {
        i_floating: usize,
        position: Vec2,
    },
}

/// Per-frame docking interaction state.
#[derive(Debug, Default)]
struct DockingUi {
    em_size: f32,
    active_tab: Option<usize>,
    events: Vec<DockingEvent>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TabState {
    None,
    Dragging,
    ClickedTitle,
    ClickedDetach,
}

/// Retained docking layout: a tree of containers and splitters plus floating
/// windows, mutated by the events gathered while drawing.
pub struct Docking {
    pub area_pool: Pool<Area>,
    pub root: Handle<Area>,
    pub default_area: Handle<Area>,
    pub tabviews: Vec<TabView>,
    pub floating_containers: Vec<FloatingContainer>,
    ui: DockingUi,
}

impl Default for Docking {
    fn default() -> Self {
        Self::new()
    }
}

impl Docking {
    pub fn new() -> Self {
        let mut area_pool = Pool::default();
        let root = area_pool.add(Area::container(AreaKind::Container(AreaContainer::default())));
        Self {
            area_pool,
            root,
            default_area: root,
            tabviews: Vec::new(),
            floating_containers: Vec::new(),
            ui: DockingUi::default(),
        }
    }

    /// Returns the content rect when the tab is the selected one of its
    /// container, creating the tab in the default area on first sight.
    pub fn tabview(&mut self, ui: &mut Ui, painter: &mut Painter, title: &str) -> Option<Rect> {
        let i_tabview = match self
            .tabviews
            .iter()
            .position(|tabview| tabview.title == title)
        {
            Some(i_tabview) => i_tabview,
            None => self.add_tabview(title),
        };

        let tabview = &self.tabviews[i_tabview];
        let area = self.area_pool.get(tabview.area).ok()?;
        let container = area.as_container()?;

        let is_selected = container
            .selected
            .map_or(false, |selected| container.tabviews.get(selected) == Some(&i_tabview));
        if !is_selected {
            return None;
        }

        let mut content_rect = area.rect;
        let _tabwell_rect = content_rect.split_top(2.0 * self.ui.em_size);
        painter.draw_color_rect(
            content_rect,
            ui.current_clip_rect(),
            ColorU32::from_greyscale(0x1A),
        );
        Some(content_rect)
    }

    /// Propagate the viewport rect down the tree and fix up tab selections.
    pub fn begin_docking(&mut self, ui: &Ui, rect: Rect) {
        self.ui.em_size = ui.theme.font_size;
        self.ui.active_tab = None;

        let em = self.ui.em_size;

        self.update_area_rec(self.root);
        if let Ok(root) = self.area_pool.get_mut(self.root) {
            root.rect = rect;
        }

        for i_floating in 0..self.floating_containers.len() {
            let floating = &self.floating_containers[i_floating];
            let mut area_rect = floating.rect;
            let _titlebar_rect = area_rect.split_top(0.25 * em);
            let area_handle = floating.area;
            if let Ok(area) = self.area_pool.get_mut(area_handle) {
                area.rect = area_rect;
            }
            self.update_area_rec(area_handle);
        }
    }

    /// Draw tab wells, splitters, floating windows and the docking overlay,
    /// then apply the interactions that were collected.
    pub fn end_docking(&mut self, ui: &mut Ui, painter: &mut Painter, font: &mut Font) {
        self.draw_area_rec(ui, painter, font, self.root);
        for i_floating in 0..self.floating_containers.len() {
            self.draw_floating_area(ui, painter, font, i_floating);
        }

        self.draw_drag_ghost(ui, painter, font);

        for area_handle in self.area_pool.handles() {
            self.draw_area_overlay(ui, painter, area_handle);
        }

        let events = std::mem::take(&mut self.ui.events);
        self.handle_events(events, ui.state.active_drag_offset);
        self.remove_empty_floating_containers();
    }

    // -- Tab and area management

    pub(crate) fn add_tabview(&mut self, title: &str) -> usize {
        self.tabviews.push(TabView {
            title: title.to_owned(),
            area: self.default_area,
        });
        let i_tabview = self.tabviews.len() - 1;
        self.insert_tabview(i_tabview, self.default_area);
        i_tabview
    }

    fn insert_tabview(&mut self, i_tabview: usize, area_handle: Handle<Area>) {
        let Ok(area) = self.area_pool.get_mut(area_handle) else {
            return;
        };
        let Some(container) = area.as_container_mut() else {
            return;
        };
        container.tabviews.push(i_tabview);
        self.tabviews[i_tabview].area = area_handle;
    }

    fn remove_tabview(&mut self, i_tabview: usize) {
        let area_handle = self.tabviews[i_tabview].area;
        self.tabviews[i_tabview].area = Handle::invalid();

        let Ok(area) = self.area_pool.get_mut(area_handle) else {
            return;
        };
        let Some(container) = area.as_container_mut() else {
            return;
        };
        if let Some(position) = container
            .tabviews
            .iter()
            .position(|tab| *tab == i_tabview)
        {
            container.tabviews.swap_remove(position);
        }
    }

    /// Replace `previous_area_handle` with a splitter holding the previous
    /// area and `new_child_handle`. Returns the handle the previous area
    /// moved to.
    fn split_area(
        &mut self,
        previous_area_handle: Handle<Area>,
        direction: SplitDirection,
        new_child_handle: Handle<Area>,
    ) -> Handle<Area> {
        let placeholder = Area::container(AreaKind::Container(AreaContainer::default()));
        let Ok(slot) = self.area_pool.get_mut(previous_area_handle) else {
            return Handle::invalid();
        };
        let previous_area = std::mem::replace(slot, placeholder);
        let previous_parent = previous_area.parent;
        let previous_was_container = previous_area.as_container().is_some();
        let new_old_area_handle = self.area_pool.add(previous_area);

        // The previous area moved, repoint everything that referenced it.
        if previous_was_container {
            for tabview in &mut self.tabviews {
                if tabview.area == previous_area_handle {
                    tabview.area = new_old_area_handle;
                }
            }
        } else if let Ok(moved) = self.area_pool.get(new_old_area_handle) {
            let children = moved
                .as_splitter()
                .map(|splitter| (splitter.left_child, splitter.right_child));
            if let Some((left_child, right_child)) = children {
                for child in [left_child, right_child] {
                    if let Ok(child_area) = self.area_pool.get_mut(child) {
                        child_area.parent = new_old_area_handle;
                    }
                }
            }
        }

        // Splitting from the top or bottom is a horizontal split.
        let (left_child, right_child) = match direction {
            SplitDirection::Top | SplitDirection::Left => (new_child_handle, new_old_area_handle),
            SplitDirection::Bottom | SplitDirection::Right => {
                (new_old_area_handle, new_child_handle)
            }
        };
        let split_direction = match direction {
            SplitDirection::Top | SplitDirection::Bottom => Direction::Horizontal,
            SplitDirection::Left | SplitDirection::Right => Direction::Vertical,
        };

        if let Ok(slot) = self.area_pool.get_mut(previous_area_handle) {
            *slot = Area {
                kind: AreaKind::Splitter(AreaSplitter {
                    left_child,
                    right_child,
                    split: 0.5,
                    direction: split_direction,
                }),
                parent: previous_parent,
                rect: Rect::default(),
            };
        }
        if let Ok(new_child) = self.area_pool.get_mut(new_child_handle) {
            new_child.parent = previous_area_handle;
        }
        if let Ok(new_old) = self.area_pool.get_mut(new_old_area_handle) {
            new_old.parent = previous_area_handle;
        }

        new_old_area_handle
    }

    fn area_replace_child(
        &mut self,
        area_handle: Handle<Area>,
        previous_child: Handle<Area>,
        new_child: Handle<Area>,
    ) {
        let Ok(area) = self.area_pool.get_mut(area_handle) else {
            return;
        };
        let Some(splitter) = area.as_splitter_mut() else {
            return;
        };
        if splitter.left_child == previous_child {
            splitter.left_child = new_child;
        } else if splitter.right_child == previous_child {
            splitter.right_child = new_child;
        }
    }

    /// Collapse single-child splitters and drop empty containers, bubbling
    /// up from `area_handle` to the root.
    pub(crate) fn remove_empty_areas(&mut self, area_handle: Handle<Area>) {
        enum Node {
            Splitter {
                left_child: Handle<Area>,
                right_child: Handle<Area>,
            },
            Container {
                is_empty: bool,
            },
        }

        if !area_handle.is_valid() {
            return;
        }
        let (parent_handle, node) = {
            let Ok(area) = self.area_pool.get(area_handle) else {
                return;
            };
            let node = match &area.kind {
                AreaKind::Splitter(splitter) => Node::Splitter {
                    left_child: splitter.left_child,
                    right_child: splitter.right_child,
                },
                AreaKind::Container(container) => Node::Container {
                    is_empty: container.tabviews.is_empty(),
                },
            };
            (area.parent, node)
        };

        match node {
            Node::Splitter {
                left_child,
                right_child,
            } => {
                let half_empty = left_child.is_valid() != right_child.is_valid();

                if half_empty {
                    let child_handle = if left_child.is_valid() {
                        left_child
                    } else {
                        right_child
                    };

                    if parent_handle.is_valid() {
                        // Reparent the surviving child into our slot.
                        if let Ok(child) = self.area_pool.get_mut(child_handle) {
                            child.parent = parent_handle;
                        }
                        self.area_replace_child(parent_handle, area_handle, child_handle);
                        let _ = self.area_pool.remove(area_handle);
                    } else {
                        // We are a root: move the only child into our slot.
                        let Ok(child_slot) = self.area_pool.get_mut(child_handle) else {
                            return;
                        };
                        let child = std::mem::replace(
                            child_slot,
                            Area::container(AreaKind::Container(AreaContainer::default())),
                        );

                        match &child.kind {
                            AreaKind::Splitter(child_splitter) => {
                                for grandchild in
                                    [child_splitter.left_child, child_splitter.right_child]
                                {
                                    if let Ok(grandchild_area) = self.area_pool.get_mut(grandchild)
                                    {
                                        grandchild_area.parent = area_handle;
                                    }
                                }
                            }
                            AreaKind::Container(child_container) => {
                                for i_tabview in &child_container.tabviews {
                                    self.tabviews[*i_tabview].area = area_handle;
                                }
                            }
                        }

                        if let Ok(slot) = self.area_pool.get_mut(area_handle) {
                            *slot = Area {
                                kind: child.kind,
                                parent: Handle::invalid(),
                                rect: child.rect,
                            };
                        }
                        let _ = self.area_pool.remove(child_handle);
                    }
                }
            }
            Node::Container { is_empty } => {
                if is_empty && parent_handle.is_valid() {
                    self.area_replace_child(parent_handle, area_handle, Handle::invalid());
                    let _ = self.area_pool.remove(area_handle);
                }
            }
        }

        self.remove_empty_areas(parent_handle);
    }

    /// Apply the frame's docking events in order.
    pub(crate) fn handle_events(&mut self, events: Vec<DockingEvent>, drag_offset: Vec2) {
        for event in events {
            match event {
                DockingEvent::DropTab {
                    i_tabview,
                    in_container,
                } => {
                    let previous_area = self.tabviews[i_tabview].area;
                    if in_container != previous_area {
                        self.remove_tabview(i_tabview);
                        self.insert_tabview(i_tabview, in_container);
                        if let Ok(area) = self.area_pool.get_mut(in_container) {
                            if let Some(container) = area.as_container_mut() {
                                if container.selected.is_none() {
                                    container.selected = Some(container.tabviews.len() - 1);
                                }
                            }
                        }
                        self.remove_empty_areas(previous_area);
                    }
                }
                DockingEvent::Split {
                    direction,
                    i_tabview,
                    container,
                } => {
                    let previous_tab_container = self.tabviews[i_tabview].area;
                    self.remove_tabview(i_tabview);
                    let new_container =
                        self.area_pool
                            .add(Area::container(AreaKind::Container(AreaContainer {
                                tabviews: Vec::new(),
                                selected: Some(0),
                            })));
                    self.insert_tabview(i_tabview, new_container);
                    let previous_splitted_container =
                        self.split_area(container, direction, new_container);
                    self.remove_empty_areas(previous_tab_container);
                    self.remove_empty_areas(previous_splitted_container);
                }
                DockingEvent::DetachTab { i_tabview } => {
                    let previous_area = self.tabviews[i_tabview].area;
                    self.remove_tabview(i_tabview);
                    let new_container =
                        self.area_pool
                            .add(Area::container(AreaKind::Container(AreaContainer {
                                tabviews: vec![i_tabview],
                                selected: Some(0),
                            })));
                    self.tabviews[i_tabview].area = new_container;
                    self.floating_containers.push(FloatingContainer {
                        area: new_container,
                        rect: Rect::new(Vec2::splat(200.0), Vec2::splat(500.0)),
                    });
                    self.remove_empty_areas(previous_area);
                }
                DockingEvent::MoveFloating {
                    i_floating,
                    position,
                } => {
                    let floating = &mut self.floating_containers[i_floating];
                    floating.rect.pos = position - drag_offset;
                }
            }
        }
    }

    fn remove_empty_floating_containers(&mut self) {
        let mut i_container = 0;
        while i_container < self.floating_containers.len() {
            let area_handle = self.floating_containers[i_container].area;
            let is_empty_container = self
                .area_pool
                .get(area_handle)
                .ok()
                .and_then(|area| area.as_container())
                .map_or(false, |container| container.tabviews.is_empty());
            if is_empty_container {
                let _ = self.area_pool.remove(area_handle);
                self.floating_containers.swap_remove(i_container);
                continue;
            }
            i_container += 1;
        }
    }

    // -- Update and drawing

    /// Fix up tab selection while walking down the tree.
    fn update_area_rec(&mut self, area_handle: Handle<Area>) {
        if !area_handle.is_valid() {
            return;
        }
        let children = {
            let Ok(area) = self.area_pool.get_mut(area_handle) else {
                return;
            };
            match &mut area.kind {
                AreaKind::Splitter(splitter) => Some((splitter.left_child, splitter.right_child)),
                AreaKind::Container(container) => {
                    match container.selected {
                        None => {
                            if !container.tabviews.is_empty() {
                                container.selected = Some(0);
                            }
                        }
                        Some(selected) => {
                            if container.tabviews.is_empty() {
                                container.selected = None;
                            } else if selected >= container.tabviews.len() {
                                container.selected = Some(0);
                            }
                        }
                    }
                    None
                }
            }
        };

        if let Some((left_child, right_child)) = children {
            self.update_area_rec(left_child);
            self.update_area_rec(right_child);
        }
    }

    fn draw_tab(
        ui: &mut Ui,
        painter: &mut Painter,
        font: &mut Font,
        em: f32,
        title: &str,
        tabwell_rect: &mut Rect,
        is_active: bool,
        accent_color: ColorU32,
    ) -> TabState {
        let label_width = painter.measure_label(font, title).x as f32;
        let title_rect = tabwell_rect.split_left(label_width + 1.0 * em);

        let bottom_border_rect = {
            let mut copy = title_rect;
            copy.split_bottom(0.1 * em)
        };

        let mut result = TabState::None;
        let id = ui.make_id();

        let is_hovering = ui.is_hovering(title_rect);
        if is_hovering {
            ui.activation.focused = Some(id);
            let has_pressed =
                ui.has_pressed(MouseButton::Left) || ui.has_pressed(MouseButton::Right);
            if ui.activation.active == Active::Idle && has_pressed {
                ui.activation.active = Active::Widget(id);
            }
        } else if ui.activation.active == Active::Widget(id) {
            result = TabState::Dragging;
        }

        if is_hovering && ui.has_clicked(id, MouseButton::Left) {
            result = TabState::ClickedTitle;
        }
        if is_hovering && ui.has_clicked(id, MouseButton::Right) {
            result = TabState::ClickedDetach;
        }

        let mut color = ColorU32::from_greyscale(0x33);
        if ui.activation.focused == Some(id) && ui.activation.active == Active::Widget(id) {
            color = ColorU32::from_greyscale(0x38);
        } else if ui.activation.focused == Some(id) {
            color = ColorU32::from_greyscale(0x42);
        }
        painter.draw_color_rect(title_rect, ui.current_clip_rect(), color);
        widgets::label_in_rect(ui, painter, font, title_rect, title);

        if is_active {
            painter.draw_color_rect(bottom_border_rect, u32::MAX, accent_color);
        }

        let _margin = tabwell_rect.split_left(0.1 * em);
        result
    }

    fn draw_area_rec(
        &mut self,
        ui: &mut Ui,
        painter: &mut Painter,
        font: &mut Font,
        area_handle: Handle<Area>,
    ) {
        if !area_handle.is_valid() {
            return;
        }
        let em = self.ui.em_size;
        let Ok(area) = self.area_pool.get(area_handle) else {
            return;
        };
        let area_rect = area.rect;

        match &area.kind {
            AreaKind::Splitter(splitter) => {
                let left_child = splitter.left_child;
                let right_child = splitter.right_child;
                let direction = splitter.direction;
                let mut split = splitter.split;

                let (left_rect, right_rect) = match direction {
                    Direction::Horizontal => {
                        widgets::splitter_y(ui, painter, area_rect, &mut split)
                    }
                    Direction::Vertical => widgets::splitter_x(ui, painter, area_rect, &mut split),
                };

                if let Ok(area) = self.area_pool.get_mut(area_handle) {
                    if let Some(splitter) = area.as_splitter_mut() {
                        splitter.split = split;
                    }
                }
                if let Ok(child) = self.area_pool.get_mut(left_child) {
                    child.rect = left_rect;
                }
                if let Ok(child) = self.area_pool.get_mut(right_child) {
                    child.rect = right_rect;
                }

                self.draw_area_rec(ui, painter, font, left_child);
                self.draw_area_rec(ui, painter, font, right_child);
            }
            AreaKind::Container(container) => {
                if container.tabviews.is_empty() {
                    return;
                }
                let tabviews = container.tabviews.clone();
                let selected = container.selected;
                let accent_color = ui.theme.accent_color;

                let mut content_rect = area_rect;
                let mut tabwell_rect = content_rect.split_top(2.0 * em);
                painter.draw_color_rect(
                    tabwell_rect,
                    ui.current_clip_rect(),
                    ColorU32::from_greyscale(0x28),
                );

                for (i_tab, i_tabview) in tabviews.iter().enumerate() {
                    let title = self.tabviews[*i_tabview].title.clone();
                    let tab_state = Self::draw_tab(
                        ui,
                        painter,
                        font,
                        em,
                        &title,
                        &mut tabwell_rect,
                        selected == Some(i_tab),
                        accent_color,
                    );
                    match tab_state {
                        TabState::Dragging => {
                            self.ui.active_tab = Some(*i_tabview);
                        }
                        TabState::ClickedTitle => {
                            if let Ok(area) = self.area_pool.get_mut(area_handle) {
                                if let Some(container) = area.as_container_mut() {
                                    container.selected = Some(i_tab);
                                }
                            }
                        }
                        TabState::ClickedDetach => {
                            self.ui.events.push(DockingEvent::DetachTab {
                                i_tabview: *i_tabview,
                            });
                        }
                        TabState::None => {}
                    }
                }
            }
        }
    }

    fn draw_floating_area(
        &mut self,
        ui: &mut Ui,
        painter: &mut Painter,
        font: &mut Font,
        i_floating: usize,
    ) {
        let em = self.ui.em_size;
        let floating_rect = self.floating_containers[i_floating].rect;
        let area_handle = self.floating_containers[i_floating].area;

        let mut rect = floating_rect;
        let titlebar_rect = rect.split_top(0.25 * em);

        // Titlebar drag moves the window.
        let mouse_position = ui.mouse_position();
        {
            let id = ui.make_id();
            if ui.is_hovering(titlebar_rect) {
                ui.activation.focused = Some(id);
                if ui.activation.active == Active::Idle
                    && ui.inputs.is_pressed(MouseButton::Left)
                {
                    ui.activation.active = Active::Widget(id);
                    ui.state.active_drag_offset = mouse_position - floating_rect.pos;
                }
            }
            if ui.activation.active == Active::Widget(id) {
                self.ui.events.push(DockingEvent::MoveFloating {
                    i_floating,
                    position: mouse_position,
                });
            }
            painter.draw_color_rect(
                titlebar_rect,
                ui.current_clip_rect(),
                ColorU32::from_uints(0xFF, 0xFF, 0x00, 0xFF),
            );
        }

        self.draw_area_rec(ui, painter, font, area_handle);

        // Bottom-right resize handle.
        let mut bottom_rect = rect.split_bottom(0.5 * em);
        let handle_rect = bottom_rect.split_right(0.5 * em);
        {
            let id = ui.make_id();
            if ui.is_hovering(handle_rect) {
                ui.activation.focused = Some(id);
                if ui.activation.active == Active::Idle
                    && ui.inputs.is_pressed(MouseButton::Left)
                {
                    ui.activation.active = Active::Widget(id);
                    ui.state.active_drag_offset = mouse_position - handle_rect.pos;
                }
            }
            if ui.activation.active == Active::Widget(id) {
                let floating = &mut self.floating_containers[i_floating];
                floating.rect.size = mouse_position - floating.rect.pos
                    - ui.state.active_drag_offset
                    + handle_rect.size;
            }
            painter.draw_color_rect(
                handle_rect,
                ui.current_clip_rect(),
                ColorU32::from_uints(0xFF, 0x00, 0xFF, 0xBB),
            );
        }
    }

    /// Ghost titlebar following the mouse while a tab is dragged.
    fn draw_drag_ghost(&mut self, ui: &mut Ui, painter: &mut Painter, font: &mut Font) {
        let Some(active_tab) = self.ui.active_tab else {
            return;
        };
        let em = self.ui.em_size;
        let title = self.tabviews[active_tab].title.clone();

        let rect = Rect::new(ui.mouse_position(), Vec2::new(10.0 * em, 1.5 * em));
        painter.draw_color_rect(
            rect,
            ui.current_clip_rect(),
            ColorU32::from_floats(0.0, 0.0, 0.0, 0.5),
        );
        widgets::label_in_rect(ui, painter, font, rect, &title);
    }

    /// Five-way drop overlay over each container while a tab is dragged:
    /// center drops the tab, the cross splits in the chosen direction.
    fn draw_area_overlay(&mut self, ui: &mut Ui, painter: &mut Painter, area_handle: Handle<Area>) {
        const HANDLE_SIZE: f32 = 3.0;
        const HANDLE_OFFSET: f32 = HANDLE_SIZE + 0.5;

        let Some(active_tab) = self.ui.active_tab else {
            return;
        };
        let em = self.ui.em_size;
        let Ok(area) = self.area_pool.get(area_handle) else {
            return;
        };
        if area.as_container().is_none() {
            return;
        }

        let drop_rect = area.rect.center(Vec2::splat(HANDLE_SIZE * em));
        let overlay = [
            (
                drop_rect,
                DockingEvent::DropTab {
                    i_tabview: active_tab,
                    in_container: area_handle,
                },
            ),
            (
                drop_rect.offset(Vec2::new(0.0, -HANDLE_OFFSET * em)),
                DockingEvent::Split {
                    direction: SplitDirection::Top,
                    i_tabview: active_tab,
                    container: area_handle,
                },
            ),
            (
                drop_rect.offset(Vec2::new(HANDLE_OFFSET * em, 0.0)),
                DockingEvent::Split {
                    direction: SplitDirection::Right,
                    i_tabview: active_tab,
                    container: area_handle,
                },
            ),
            (
                drop_rect.offset(Vec2::new(0.0, HANDLE_OFFSET * em)),
                DockingEvent::Split {
                    direction: SplitDirection::Bottom,
                    i_tabview: active_tab,
                    container: area_handle,
                },
            ),
            (
                drop_rect.offset(Vec2::new(-HANDLE_OFFSET * em, 0.0)),
                DockingEvent::Split {
                    direction: SplitDirection::Left,
                    i_tabview: active_tab,
                    container: area_handle,
                },
            ),
        ];

        for (rect, event) in overlay {
            let mut color = ColorU32::from_uints(0x1B, 0x83, 0xF7, (0.25 * 255.0) as u8);
            if ui.is_hovering(rect) {
                if !ui.inputs.is_pressed(MouseButton::Left) {
                    self.ui.events.push(event);
                }
                color = ColorU32::from_uints(0x1B, 0x83, 0xF7, (0.50 * 255.0) as u8);
            }
            painter.draw_color_rect(rect, ui.current_clip_rect(), color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_of(docking: &Docking, handle: Handle<Area>) -> &AreaContainer {
        docking
            .area_pool
            .get(handle)
            .unwrap()
            .as_container()
            .unwrap()
    }

    #[test]
    fn test_new_tab_lands_in_default_area() {
        let mut docking = Docking::new();
        let i_tab = docking.add_tabview("Scene");

        assert_eq!(docking.tabviews[i_tab].area, docking.default_area);
        assert_eq!(container_of(&docking, docking.root).tabviews, vec![i_tab]);
    }

    #[test]
    fn test_insert_then_remove_round_trips() {
        let mut docking = Docking::new();
        let i_scene = docking.add_tabview("Scene");
        let i_inspector = docking.add_tabview("Inspector");

        docking.remove_tabview(i_inspector);
        assert!(!docking.tabviews[i_inspector].area.is_valid());
        assert_eq!(container_of(&docking, docking.root).tabviews, vec![i_scene]);

        docking.insert_tabview(i_inspector, docking.root);
        assert_eq!(docking.tabviews[i_inspector].area, docking.root);
        assert_eq!(
            container_of(&docking, docking.root).tabviews,
            vec![i_scene, i_inspector]
        );
    }

    #[test]
    fn test_split_creates_splitter_with_both_children() {
        let mut docking = Docking::new();
        let i_scene = docking.add_tabview("Scene");
        let i_inspector = docking.add_tabview("Inspector");
        let root = docking.root;

        docking.handle_events(
            vec![DockingEvent::Split {
                direction: SplitDirection::Right,
                i_tabview: i_inspector,
                container: root,
            }],
            Vec2::ZERO,
        );

        // The root slot now holds a vertical splitter.
        let splitter = docking
            .area_pool
            .get(root)
            .unwrap()
            .as_splitter()
            .unwrap()
            .clone();
        assert_eq!(splitter.direction, Direction::Vertical);

        // Old content on the left, the new container with the split tab on
        // the right.
        let left = container_of(&docking, splitter.left_child);
        assert_eq!(left.tabviews, vec![i_scene]);
        let right = container_of(&docking, splitter.right_child);
        assert_eq!(right.tabviews, vec![i_inspector]);

        assert_eq!(docking.tabviews[i_scene].area, splitter.left_child);
        assert_eq!(docking.tabviews[i_inspector].area, splitter.right_child);

        // Parent links are consistent.
        for child in [splitter.left_child, splitter.right_child] {
            assert_eq!(docking.area_pool.get(child).unwrap().parent, root);
        }
    }

    #[test]
    fn test_split_direction_rule() {
        for (direction, expected_direction, new_child_is_left) in [
            (SplitDirection::Top, Direction::Horizontal, true),
            (SplitDirection::Bottom, Direction::Horizontal, false),
            (SplitDirection::Left, Direction::Vertical, true),
            (SplitDirection::Right, Direction::Vertical, false),
        ] {
            let mut docking = Docking::new();
            let _i_scene = docking.add_tabview("Scene");
            let i_other = docking.add_tabview("Other");
            let root = docking.root;

            docking.handle_events(
                vec![DockingEvent::Split {
                    direction,
                    i_tabview: i_other,
                    container: root,
                }],
                Vec2::ZERO,
            );

            let splitter = docking.area_pool.get(root).unwrap().as_splitter().unwrap();
            assert_eq!(splitter.direction, expected_direction);
            let new_child = if new_child_is_left {
                splitter.left_child
            } else {
                splitter.right_child
            };
            assert_eq!(container_of(&docking, new_child).tabviews, vec![i_other]);
        }
    }

    #[test]
    fn test_drop_tab_moves_between_containers() {
        let mut docking = Docking::new();
        let i_scene = docking.add_tabview("Scene");
        let i_inspector = docking.add_tabview("Inspector");
        let root = docking.root;

        docking.handle_events(
            vec![DockingEvent::Split {
                direction: SplitDirection::Right,
                i_tabview: i_inspector,
                container: root,
            }],
            Vec2::ZERO,
        );
        let splitter = docking.area_pool.get(root).unwrap().as_splitter().unwrap();
        let (left, right) = (splitter.left_child, splitter.right_child);

        // Drop the scene tab into the inspector's container: the left
        // container empties and the splitter collapses back to a single
        // container in the root slot.
        docking.handle_events(
            vec![DockingEvent::DropTab {
                i_tabview: i_scene,
                in_container: right,
            }],
            Vec2::ZERO,
        );

        let root_area = docking.area_pool.get(root).unwrap();
        let container = root_area.as_container().unwrap();
        assert_eq!(container.tabviews, vec![i_inspector, i_scene]);
        assert!(!root_area.parent.is_valid());
        assert!(!docking.area_pool.contains(left));
        assert!(!docking.area_pool.contains(right));
        assert_eq!(docking.tabviews[i_scene].area, root);
        assert_eq!(docking.tabviews[i_inspector].area, root);
    }

    #[test]
    fn test_split_single_tab_container_collapses_back() {
        // Floating window holding one container with one tab, split right:
        // the container empties, the splitter collapses, and the new
        // container ends up where the old one was.
        let mut docking = Docking::new();
        let i_tab = docking.add_tabview("Viewer");
        let root = docking.root;

        docking.handle_events(
            vec![DockingEvent::Split {
                direction: SplitDirection::Right,
                i_tabview: i_tab,
                container: root,
            }],
            Vec2::ZERO,
        );

        // The old container had no remaining tab, so the whole splitter
        // collapsed back into the root slot.
        let root_area = docking.area_pool.get(root).unwrap();
        let container = root_area.as_container().unwrap();
        assert_eq!(container.tabviews, vec![i_tab]);
        assert!(!root_area.parent.is_valid());
        assert_eq!(docking.tabviews[i_tab].area, root);
        assert_eq!(docking.area_pool.len(), 1);
    }

    #[test]
    fn test_detach_creates_floating_container() {
        let mut docking = Docking::new();
        let _i_scene = docking.add_tabview("Scene");
        let i_inspector = docking.add_tabview("Inspector");

        docking.handle_events(
            vec![DockingEvent::DetachTab {
                i_tabview: i_inspector,
            }],
            Vec2::ZERO,
        );

        assert_eq!(docking.floating_containers.len(), 1);
        let floating = &docking.floating_containers[0];
        assert_eq!(
            container_of(&docking, floating.area).tabviews,
            vec![i_inspector]
        );
        assert_eq!(docking.tabviews[i_inspector].area, floating.area);
    }

    #[test]
    fn test_empty_floating_container_is_removed() {
        let mut docking = Docking::new();
        let _i_scene = docking.add_tabview("Scene");
        let i_inspector = docking.add_tabview("Inspector");

        docking.handle_events(
            vec![DockingEvent::DetachTab {
                i_tabview: i_inspector,
            }],
            Vec2::ZERO,
        );
        let floating_area = docking.floating_containers[0].area;

        // Drop the tab back into the main container.
        docking.handle_events(
            vec![DockingEvent::DropTab {
                i_tabview: i_inspector,
                in_container: docking.root,
            }],
            Vec2::ZERO,
        );
        docking.remove_empty_floating_containers();

        assert!(docking.floating_containers.is_empty());
        assert!(!docking.area_pool.contains(floating_area));
    }

    #[test]
    fn test_move_floating_applies_drag_offset() {
        let mut docking = Docking::new();
        let i_tab = docking.add_tabview("Viewer");
        docking.handle_events(vec![DockingEvent::DetachTab { i_tabview: i_tab }], Vec2::ZERO);

        docking.handle_events(
            vec![DockingEvent::MoveFloating {
                i_floating: 0,
                position: Vec2::new(400.0, 300.0),
            }],
            Vec2::new(10.0, 5.0),
        );
        assert_eq!(
            docking.floating_containers[0].rect.pos,
            Vec2::new(390.0, 295.0)
        );
    }

    #[test]
    fn test_selection_fixed_up_after_removal() {
        let mut docking = Docking::new();
        let i_scene = docking.add_tabview("Scene");
        let i_inspector = docking.add_tabview("Inspector");

        if let Ok(area) = docking.area_pool.get_mut(docking.root) {
            if let Some(container) = area.as_container_mut() {
                container.selected = Some(1);
            }
        }

        docking.remove_tabview(i_inspector);
        docking.update_area_rec(docking.root);

        let container = container_of(&docking, docking.root);
        assert_eq!(container.selected, Some(0));
        assert_eq!(container.tabviews, vec![i_scene]);

        docking.remove_tabview(i_scene);
        docking.update_area_rec(docking.root);
        assert_eq!(container_of(&docking, docking.root).selected, None);
    }
}
