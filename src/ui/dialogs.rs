#![allow(deprecated)]

use gtk4 as gtk;
use gtk4::prelude::*;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

pub fn info(parent: &impl IsA<gtk::Window>, title: &str, body: &str) {
    message(parent, gtk::MessageType::Info, title, body);
}

pub fn warn(parent: &impl IsA<gtk::Window>, title: &str, body: &str) {
    message(parent, gtk::MessageType::Warning, title, body);
}

pub fn error(parent: &impl IsA<gtk::Window>, title: &str, body: &str) {
    message(parent, gtk::MessageType::Error, title, body);
}

fn message(parent: &impl IsA<gtk::Window>, kind: gtk::MessageType, title: &str, body: &str) {
    let dialog = gtk::MessageDialog::builder()
        .transient_for(parent)
        .modal(true)
        .message_type(kind)
        .buttons(gtk::ButtonsType::Ok)
        .text(title)
        .secondary_text(body)
        .build();
    dialog.connect_response(|dlg, _| dlg.close());
    dialog.present();
}

/// Yes/No question; `on_yes` runs only on Yes.
pub fn confirm<F: Fn() + 'static>(parent: &impl IsA<gtk::Window>, title: &str, body: &str, on_yes: F) {
    let dialog = gtk::MessageDialog::builder()
        .transient_for(parent)
        .modal(true)
        .message_type(gtk::MessageType::Question)
        .buttons(gtk::ButtonsType::YesNo)
        .text(title)
        .secondary_text(body)
        .build();
    dialog.connect_response(move |dlg, resp| {
        if resp == gtk::ResponseType::Yes {
            on_yes();
        }
        dlg.close();
    });
    dialog.present();
}

fn form_box() -> gtk::Box {
    let content = gtk::Box::new(gtk::Orientation::Vertical, 8);
    content.set_margin_top(12);
    content.set_margin_bottom(12);
    content.set_margin_start(12);
    content.set_margin_end(12);
    content
}

fn field(content: &gtk::Box, caption: &str) -> gtk::Entry {
    let label = gtk::Label::new(Some(caption));
    label.set_halign(gtk::Align::Start);
    content.append(&label);
    let entry = gtk::Entry::new();
    entry.set_hexpand(true);
    entry.set_width_chars(32);
    content.append(&entry);
    entry
}

/// Single-line prompt. `on_ok` receives the raw text.
pub fn ask_text<F: Fn(String) + 'static>(parent: &impl IsA<gtk::Window>, title: &str, prompt: &str, on_ok: F) {
    let dialog = gtk::Dialog::builder().title(title).transient_for(parent).modal(true).build();
    let content = form_box();
    let entry = field(&content, prompt);
    entry.set_activates_default(true);
    dialog.set_child(Some(&content));
    let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
    let ok_btn = dialog.add_button("OK", gtk::ResponseType::Ok);
    ok_btn.add_css_class("suggested-action");
    dialog.set_default_response(gtk::ResponseType::Ok);

    dialog.connect_response(move |dlg, resp| {
        if resp == gtk::ResponseType::Ok {
            on_ok(entry.text().to_string());
        }
        dlg.close();
    });
    dialog.present();
}

/// Name + phone form. `on_save` returning `Err` keeps the dialog open and shows the message.
pub fn new_contact<F>(parent: &impl IsA<gtk::Window>, on_save: F)
where
    F: Fn(&str, &str) -> Result<(), String> + 'static,
{
    let dialog = gtk::Dialog::builder()
        .title("Add New Contact")
        .transient_for(parent)
        .modal(true)
        .resizable(false)
        .build();
    let content = form_box();
    let name_entry = field(&content, "Name:");
    let phone_entry = field(&content, "Phone:");
    phone_entry.set_activates_default(true);
    dialog.set_child(Some(&content));
    let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
    let save_btn = dialog.add_button("Save", gtk::ResponseType::Ok);
    save_btn.add_css_class("suggested-action");
    dialog.set_default_response(gtk::ResponseType::Ok);

    let first_field = name_entry.clone();
    dialog.connect_response(move |dlg, resp| {
        if resp != gtk::ResponseType::Ok {
            dlg.close();
            return;
        }
        let name = name_entry.text().trim().to_string();
        let phone = phone_entry.text().trim().to_string();
        if name.is_empty() || phone.is_empty() {
            warn(dlg, "Empty Fields", "Name and phone are required.");
            return;
        }
        match on_save(&name, &phone) {
            Ok(()) => dlg.close(),
            Err(e) => error(dlg, "Could Not Save", &format!("The contact could not be saved to the CSV file.\nError: {}", e)),
        }
    });
    dialog.present();
    first_field.grab_focus();
}

fn filter(name: &str, pattern: &str) -> gtk::FileFilter {
    let filter = gtk::FileFilter::new();
    filter.set_name(Some(name));
    filter.add_pattern(pattern);
    filter
}

// The native dialog must outlive this call; the holder is emptied once it answers.
fn run_chooser<F: Fn(&gtk::FileChooserNative) + 'static>(chooser: gtk::FileChooserNative, on_accept: F) {
    let holder = Rc::new(RefCell::new(Some(chooser.clone())));
    chooser.connect_response(move |dlg, resp| {
        if resp == gtk::ResponseType::Accept {
            on_accept(dlg);
        }
        holder.borrow_mut().take();
    });
    chooser.show();
}

pub fn open_csv<F: Fn(PathBuf) + 'static>(parent: &impl IsA<gtk::Window>, on_pick: F) {
    let chooser = gtk::FileChooserNative::new(
        Some("Open Contact List"),
        Some(parent),
        gtk::FileChooserAction::Open,
        Some("Open"),
        Some("Cancel"),
    );
    chooser.add_filter(&filter("CSV files", "*.csv"));
    run_chooser(chooser, move |dlg| {
        if let Some(path) = dlg.file().and_then(|f| f.path()) {
            on_pick(path);
        }
    });
}

pub fn open_templates<F: Fn(Vec<PathBuf>) + 'static>(parent: &impl IsA<gtk::Window>, on_pick: F) {
    let chooser = gtk::FileChooserNative::new(
        Some("Select up to 10 message files"),
        Some(parent),
        gtk::FileChooserAction::Open,
        Some("Open"),
        Some("Cancel"),
    );
    chooser.set_select_multiple(true);
    chooser.add_filter(&filter("Text files", "*.txt"));
    run_chooser(chooser, move |dlg| {
        let files = dlg.files();
        let paths: Vec<PathBuf> = (0..files.n_items())
            .filter_map(|i| files.item(i))
            .filter_map(|obj| obj.downcast::<gtk::gio::File>().ok())
            .filter_map(|f| f.path())
            .collect();
        if !paths.is_empty() {
            on_pick(paths);
        }
    });
}

pub fn save_file<F: Fn(PathBuf) + 'static>(parent: &impl IsA<gtk::Window>, title: &str, suggested: &str, on_pick: F) {
    let chooser = gtk::FileChooserNative::new(
        Some(title),
        Some(parent),
        gtk::FileChooserAction::Save,
        Some("Save"),
        Some("Cancel"),
    );
    chooser.set_current_name(suggested);
    chooser.add_filter(&filter("Text files", "*.txt"));
    run_chooser(chooser, move |dlg| {
        if let Some(path) = dlg.file().and_then(|f| f.path()) {
            on_pick(path);
        }
    });
}
