use gtk4 as gtk;
use gtk4::prelude::*;
use std::cell::RefCell;

use crate::contacts::{Contact, SendOutcome, SortColumn};

const COLUMN_WIDTHS: [i32; 6] = [4, 0, 18, 12, 14, 8];

struct Row {
    n: String,
    row: gtk::ListBoxRow,
    cells: Vec<gtk::Label>,
}

/// Table of contacts: a header of sort buttons over a multi-select list.
pub struct ContactList {
    root: gtk::Box,
    list: gtk::ListBox,
    headers: Vec<(SortColumn, gtk::Button)>,
    rows: RefCell<Vec<Row>>,
}

fn cell(width: i32) -> gtk::Label {
    let label = gtk::Label::new(None);
    if width > 0 {
        label.set_width_chars(width);
        label.set_max_width_chars(width);
    } else {
        label.set_hexpand(true);
    }
    label.set_xalign(0.0);
    label.set_ellipsize(gtk::pango::EllipsizeMode::End);
    label
}

fn cell_texts(c: &Contact) -> [&str; 6] {
    [&c.n, &c.name, &c.phone_display, &c.progress, &c.status, c.outcome_label()]
}

fn apply_tags(row: &gtk::ListBoxRow, c: &Contact, last_sent: Option<&str>) {
    for class in ["send-success", "send-failed", "last-sent"] {
        row.remove_css_class(class);
    }
    match c.outcome {
        Some(SendOutcome::Success) => row.add_css_class("send-success"),
        Some(SendOutcome::Failed) => row.add_css_class("send-failed"),
        None => {}
    }
    if last_sent == Some(c.n.as_str()) {
        row.add_css_class("last-sent");
    }
}

impl ContactList {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 0);
        root.set_vexpand(true);
        root.set_hexpand(true);

        let header = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        header.set_margin_start(6);
        header.set_margin_end(6);
        let mut headers = Vec::new();
        for (column, width) in SortColumn::ALL.into_iter().zip(COLUMN_WIDTHS) {
            let label = cell(width);
            label.set_label(column.title());
            label.add_css_class("heading");
            let button = gtk::Button::new();
            button.set_child(Some(&label));
            button.add_css_class("flat");
            button.set_hexpand(width == 0);
            header.append(&button);
            headers.push((column, button));
        }
        root.append(&header);

        let list = gtk::ListBox::new();
        list.set_selection_mode(gtk::SelectionMode::Multiple);
        list.add_css_class("contact-list");
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .child(&list)
            .build();
        root.append(&scroller);

        Self { root, list, headers, rows: RefCell::new(Vec::new()) }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn set_items(&self, contacts: &[&Contact], last_sent: Option<&str>) {
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        let mut rows = Vec::with_capacity(contacts.len());
        for c in contacts {
            let line = gtk::Box::new(gtk::Orientation::Horizontal, 6);
            line.set_margin_top(4);
            line.set_margin_bottom(4);
            line.set_margin_start(6);
            line.set_margin_end(6);
            let cells: Vec<gtk::Label> = COLUMN_WIDTHS.iter().map(|w| cell(*w)).collect();
            for (label, text) in cells.iter().zip(cell_texts(c)) {
                label.set_label(text);
                line.append(label);
            }
            let row = gtk::ListBoxRow::new();
            row.set_child(Some(&line));
            apply_tags(&row, c, last_sent);
            self.list.append(&row);
            rows.push(Row { n: c.n.clone(), row, cells });
        }
        *self.rows.borrow_mut() = rows;
    }

    /// Refreshes one row in place. Rows hidden by the filter are ignored.
    pub fn update_row(&self, c: &Contact, last_sent: Option<&str>) {
        let rows = self.rows.borrow();
        if let Some(r) = rows.iter().find(|r| r.n == c.n) {
            for (label, text) in r.cells.iter().zip(cell_texts(c)) {
                label.set_label(text);
            }
            apply_tags(&r.row, c, last_sent);
        }
    }

    pub fn visible_keys(&self) -> Vec<String> {
        self.rows.borrow().iter().map(|r| r.n.clone()).collect()
    }

    pub fn selected_keys(&self) -> Vec<String> {
        let rows = self.rows.borrow();
        let mut selected: Vec<(i32, String)> = self
            .list
            .selected_rows()
            .iter()
            .filter_map(|row| {
                let idx = row.index();
                rows.get(usize::try_from(idx).ok()?).map(|r| (idx, r.n.clone()))
            })
            .collect();
        selected.sort_by_key(|(idx, _)| *idx);
        selected.into_iter().map(|(_, n)| n).collect()
    }

    pub fn primary_selection(&self) -> Option<String> {
        self.selected_keys().into_iter().next()
    }

    pub fn select(&self, n: &str) -> bool {
        let rows = self.rows.borrow();
        let Some(r) = rows.iter().find(|r| r.n == n) else { return false };
        self.list.unselect_all();
        self.list.select_row(Some(&r.row));
        r.row.grab_focus();
        true
    }

    pub fn select_first(&self) {
        let first = self.rows.borrow().first().map(|r| r.n.clone());
        if let Some(n) = first {
            self.select(&n);
        }
    }

    pub fn connect_sort<F: Fn(SortColumn) + 'static>(&self, f: F) {
        let f = std::rc::Rc::new(f);
        for (column, button) in &self.headers {
            let f = f.clone();
            let column = *column;
            button.connect_clicked(move |_| f(column));
        }
    }

    pub fn connect_selection_changed<F: Fn() + 'static>(&self, f: F) {
        self.list.connect_selected_rows_changed(move |_| f());
    }

    /// Shows `menu` on right click, selecting the row under the pointer first.
    pub fn attach_menu(&self, menu: &gtk::Popover) {
        menu.set_parent(&self.list);
        menu.set_has_arrow(false);
        let gesture = gtk::GestureClick::new();
        gesture.set_button(3);
        let list = self.list.clone();
        let menu = menu.clone();
        gesture.connect_pressed(move |_, _, x, y| {
            if let Some(row) = list.row_at_y(y as i32) {
                if !row.is_selected() {
                    list.unselect_all();
                    list.select_row(Some(&row));
                }
            }
            menu.set_pointing_to(Some(&gtk::gdk::Rectangle::new(x as i32, y as i32, 1, 1)));
            menu.popup();
        });
        self.list.add_controller(gesture);
    }
}
