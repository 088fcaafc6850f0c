use gtk4::prelude::*;
use gtk4 as gtk;
use std::cell::Cell;
use std::rc::Rc;

use crate::api::models::ChatMessage;

/// Right-hand column: operator notes for the selected contact above the
/// recent chat history.
pub struct SidePanel {
    root: gtk::Box,
    notes: gtk::TextView,
    save_button: gtk::Button,
    history: gtk::TextView,
    // Set while the notes buffer is filled programmatically.
    loading: Rc<Cell<bool>>,
}

fn heading(text: &str) -> gtk::Label {
    let title = gtk::Label::new(Some(text));
    title.add_css_class("heading");
    title.set_halign(gtk::Align::Start);
    title
}

fn framed(view: &gtk::TextView, min_height: i32, vexpand: bool) -> gtk::ScrolledWindow {
    let scroller = gtk::ScrolledWindow::builder()
        .min_content_height(min_height)
        .vexpand(vexpand)
        .child(view)
        .build();
    scroller.add_css_class("frame");
    scroller
}

impl SidePanel {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);
        root.set_width_request(240);

        root.append(&heading("Notes:"));
        let notes = gtk::TextView::new();
        notes.set_wrap_mode(gtk::WrapMode::WordChar);
        notes.set_editable(false);
        root.append(&framed(&notes, 110, false));
        let save_button = gtk::Button::with_label("Save (Ctrl + S)");
        root.append(&save_button);

        let history_title = heading("Conversation History:");
        history_title.set_margin_top(10);
        root.append(&history_title);
        let history = gtk::TextView::new();
        history.set_wrap_mode(gtk::WrapMode::WordChar);
        history.set_editable(false);
        history.set_cursor_visible(false);
        let buffer = history.buffer();
        buffer.create_tag(Some("contact"), &[("foreground", &"#000080")]);
        buffer.create_tag(Some("me"), &[("foreground", &"#006400")]);
        buffer.create_tag(Some("timestamp"), &[("foreground", &"#696969"), ("scale", &0.8f64)]);
        root.append(&framed(&history, 0, true));

        Self { root, notes, save_button, history, loading: Rc::new(Cell::new(false)) }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn set_notes(&self, text: &str, editable: bool) {
        self.loading.set(true);
        self.notes.buffer().set_text(text);
        self.loading.set(false);
        self.notes.set_editable(editable);
    }

    pub fn notes_text(&self) -> String {
        let buffer = self.notes.buffer();
        buffer
            .text(&buffer.start_iter(), &buffer.end_iter(), false)
            .trim()
            .to_string()
    }

    /// Fires on operator edits only.
    pub fn connect_notes_edited<F: Fn() + 'static>(&self, f: F) {
        let loading = self.loading.clone();
        self.notes.buffer().connect_changed(move |_| {
            if !loading.get() {
                f();
            }
        });
    }

    pub fn connect_save<F: Fn() + 'static>(&self, f: F) {
        self.save_button.connect_clicked(move |_| f());
    }

    pub fn show_history_text(&self, text: &str) {
        self.history.buffer().set_text(text);
    }

    /// Messages are shown in the order given, which callers keep newest first.
    pub fn show_history(&self, messages: &[&ChatMessage]) {
        let buffer = self.history.buffer();
        buffer.set_text("");
        if messages.is_empty() {
            buffer.set_text("No messages found.");
            return;
        }
        let mut iter = buffer.end_iter();
        for msg in messages {
            if let Some(ts) = msg.time_label() {
                buffer.insert_with_tags_by_name(&mut iter, &format!("{}\n", ts), &["timestamp"]);
            }
            let tag = if msg.from_me { "me" } else { "contact" };
            buffer.insert_with_tags_by_name(&mut iter, msg.sender_prefix(), &[tag]);
            buffer.insert(&mut iter, &format!("{}\n\n", msg.body.as_deref().unwrap_or_default()));
        }
    }
}
