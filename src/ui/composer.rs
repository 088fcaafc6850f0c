use gtk4::prelude::*;
use gtk4 as gtk;
use std::rc::Rc;

/// Free-text message panel under the contact list. Enter sends,
/// Shift+Enter inserts a newline.
pub struct Composer {
    root: gtk::Box,
    entry: gtk::TextView,
    send_btn: gtk::Button,
}

impl Composer {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        root.set_margin_top(6);
        root.set_margin_bottom(6);
        root.add_css_class("composer");

        let entry = gtk::TextView::new();
        entry.set_wrap_mode(gtk::WrapMode::WordChar);
        entry.set_hexpand(true);
        let scroller = gtk::ScrolledWindow::builder()
            .min_content_height(60)
            .hexpand(true)
            .child(&entry)
            .build();
        scroller.add_css_class("frame");

        let send_btn = gtk::Button::with_label(">");
        send_btn.set_tooltip_text(Some("Send (Enter)"));
        send_btn.set_valign(gtk::Align::Fill);

        root.append(&scroller);
        root.append(&send_btn);
        root.set_visible(false);

        Self { root, entry, send_btn }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn is_visible(&self) -> bool {
        self.root.is_visible()
    }

    pub fn set_visible(&self, visible: bool) {
        self.root.set_visible(visible);
        if visible {
            self.entry.grab_focus();
        }
    }

    pub fn text(&self) -> String {
        let buffer = self.entry.buffer();
        buffer
            .text(&buffer.start_iter(), &buffer.end_iter(), false)
            .trim()
            .to_string()
    }

    pub fn clear(&self) {
        self.entry.buffer().set_text("");
    }

    pub fn connect_send<F: Fn() + 'static>(&self, f: F) {
        let send: Rc<dyn Fn()> = Rc::new(f);
        {
            let send = send.clone();
            self.send_btn.connect_clicked(move |_| (send)());
        }
        let keys = gtk::EventControllerKey::new();
        keys.set_propagation_phase(gtk::PropagationPhase::Capture);
        keys.connect_key_pressed(move |_, key, _, modifiers| {
            let enter = key == gtk::gdk::Key::Return || key == gtk::gdk::Key::KP_Enter;
            if enter && !modifiers.contains(gtk::gdk::ModifierType::SHIFT_MASK) {
                (send)();
                glib::Propagation::Stop
            } else {
                glib::Propagation::Proceed
            }
        });
        self.entry.add_controller(keys);
    }
}
