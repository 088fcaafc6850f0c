use adw::prelude::*;
use adw::Application;
use gtk4 as gtk;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::api::client::ApiClient;
use crate::api::models::{recent_with_body, Session, HISTORY_LIMIT};
use crate::app::{AppState, ServerSettings, DEFAULT_MAX_INTERVAL, DEFAULT_MIN_INTERVAL};
use crate::campaign::{pick_interval, AfterSend, Campaign, Countdown, SendReport, StartCheck, Step, SELECT_DELAY_MS};
use crate::comments::{self, CommentBook, NotesDraft};
use crate::contacts::{Contact, ContactStore, SendOutcome, SortColumn};
use crate::profiles::ProfileRegistry;
use crate::templates::{TemplateError, TemplateSet};
use crate::ui::composer::Composer;
use crate::ui::contact_list::ContactList;
use crate::ui::dialogs;
use crate::ui::side_panel::SidePanel;
use crate::utils::{display_name, run_async_to_main, timestamp_now};

const APP_TITLE: &str = "Huby - Contact Manager and Sender";
const NO_PROFILE: &str = "No profile";
const QUICK_STATUSES: [(&str, &str); 4] = [
    ("NA", "No answer"),
    ("CP", "Voicemail"),
    ("SI", "Not interested"),
    ("NE", "Does not exist"),
];
const POLL_SECS: u32 = 5;
const CONNECT_FIRST_CHECK: Duration = Duration::from_secs(2);
const CONNECT_RETRY: Duration = Duration::from_secs(3);
const CONNECT_MAX_ATTEMPTS: u32 = 100;
const NOTES_AUTOSAVE: Duration = Duration::from_millis(1500);

const CSS: &str = r#"
row.send-success { background-color: #d9f7d9; }
row.send-failed { background-color: #ffdddd; }
row.last-sent { background-color: #d8e8ff; }
.composer { background-color: #e0e0e0; }
"#;

#[derive(Default)]
struct Model {
    store: ContactStore,
    comments: CommentBook,
    notes: NotesDraft,
    templates: TemplateSet,
    profiles: ProfileRegistry,
    campaign: Campaign,
    sort: Option<(SortColumn, bool)>,
    countdown: Option<Countdown>,
}

#[derive(Default)]
struct Timers {
    countdown: Option<glib::SourceId>,
    step: Option<glib::SourceId>,
    notes: Option<glib::SourceId>,
}

struct Header {
    name: gtk::EditableLabel,
    phone: gtk::EditableLabel,
    shown: RefCell<(String, String)>,
}

pub struct MainWindow {
    window: adw::ApplicationWindow,
    overlay: adw::ToastOverlay,
    header: Header,
    search: gtk::SearchEntry,
    list: ContactList,
    side: SidePanel,
    composer: Composer,
    profile_menu: gtk::DropDown,
    profile_menu_updating: Cell<bool>,
    min_entry: gtk::Entry,
    max_entry: gtk::Entry,
    start_btn: gtk::Button,
    connect_btn: gtk::Button,
    template_btn: gtk::Button,
    wpp_btn: gtk::ToggleButton,
    status_list: gtk::Label,
    status_templates: gtk::Label,
    context_menu: gtk::Popover,
    client: ApiClient,
    model: RefCell<Model>,
    timers: RefCell<Timers>,
}

fn install_css() {
    let provider = gtk::CssProvider::new();
    provider.load_from_data(CSS);
    if let Some(display) = gtk::gdk::Display::default() {
        gtk::style_context_add_provider_for_display(&display, &provider, gtk::STYLE_PROVIDER_PRIORITY_APPLICATION);
    }
}

fn tool_button(label: &str, tooltip: &str) -> gtk::Button {
    let btn = gtk::Button::with_label(label);
    btn.set_tooltip_text(Some(tooltip));
    btn
}

fn interval_entry(value: &str, tooltip: &str) -> gtk::Entry {
    let entry = gtk::Entry::new();
    entry.set_text(value);
    entry.set_width_chars(4);
    entry.set_max_width_chars(4);
    entry.set_xalign(0.5);
    entry.set_tooltip_text(Some(tooltip));
    entry
}

fn remove_source(slot: &mut Option<glib::SourceId>) {
    if let Some(id) = slot.take() {
        id.remove();
    }
}

pub fn show_main_window(app: &Application, state: AppState, settings: ServerSettings) {
    install_css();
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title(APP_TITLE)
        .default_width(850)
        .default_height(450)
        .build();

    let overlay = adw::ToastOverlay::new();
    let content = gtk::Box::new(gtk::Orientation::Vertical, 4);
    content.set_margin_top(6);
    content.set_margin_bottom(2);
    content.set_margin_start(6);
    content.set_margin_end(6);

    // Selected contact, editable on double click.
    let info_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
    let name = gtk::EditableLabel::new("");
    name.set_hexpand(true);
    name.add_css_class("title-2");
    let phone = gtk::EditableLabel::new("");
    phone.add_css_class("title-2");
    info_row.append(&name);
    info_row.append(&phone);
    content.append(&info_row);

    // Load, quick statuses, profile, interval and send controls.
    let action_row = gtk::Box::new(gtk::Orientation::Horizontal, 4);
    let load_btn = tool_button("LOAD", "Load a new contact list (.csv)");
    load_btn.add_css_class("heading");
    action_row.append(&load_btn);
    let mut status_btns = Vec::new();
    for (code, label) in QUICK_STATUSES {
        let b = tool_button(code, &format!("Set the contact status to '{}'", label));
        action_row.append(&b);
        status_btns.push((b, label));
    }
    let spacer = gtk::Box::new(gtk::Orientation::Horizontal, 0);
    spacer.set_hexpand(true);
    action_row.append(&spacer);

    action_row.append(&gtk::Label::new(Some("WPP profile:")));
    let profile_menu = gtk::DropDown::from_strings(&[NO_PROFILE]);
    action_row.append(&profile_menu);
    let add_profile_btn = tool_button("+", "Add a new WhatsApp profile");
    let remove_profile_btn = tool_button("-", "Remove the selected profile");
    action_row.append(&add_profile_btn);
    action_row.append(&remove_profile_btn);

    let interval_label = gtk::Label::new(Some("Interval (s):"));
    interval_label.set_margin_start(8);
    action_row.append(&interval_label);
    let min_entry = interval_entry(&state.min_interval, "MINIMUM interval in seconds");
    let max_entry = interval_entry(&state.max_interval, "MAXIMUM interval in seconds");
    action_row.append(&min_entry);
    action_row.append(&gtk::Label::new(Some("-")));
    action_row.append(&max_entry);

    let start_btn = tool_button("START", "Start or stop automatic sending");
    start_btn.add_css_class("suggested-action");
    start_btn.set_margin_start(8);
    let connect_btn = tool_button("Connect", "Connect/disconnect WhatsApp.\nDisconnecting clears the current session.");
    let txt_btn = tool_button("TXT", "Load message templates from .txt files");
    let template_btn = tool_button("W", "Send a template message (Alt+W)");
    let wpp_btn = gtk::ToggleButton::with_label("Wpp");
    wpp_btn.set_tooltip_text(Some("Show/hide the custom message panel"));
    for w in [&start_btn, &connect_btn, &txt_btn, &template_btn] {
        action_row.append(w);
    }
    action_row.append(&wpp_btn);
    content.append(&action_row);

    let search_row = gtk::Box::new(gtk::Orientation::Horizontal, 4);
    search_row.append(&gtk::Label::new(Some("Search NAME:")));
    let search = gtk::SearchEntry::new();
    search.set_hexpand(true);
    search_row.append(&search);
    content.append(&search_row);

    let list = ContactList::new();
    let composer = Composer::new();
    let side = SidePanel::new();
    let left = gtk::Box::new(gtk::Orientation::Vertical, 0);
    left.append(&list.widget());
    left.append(&composer.widget());
    let paned = gtk::Paned::builder()
        .orientation(gtk::Orientation::Horizontal)
        .start_child(&left)
        .end_child(&side.widget())
        .resize_end_child(false)
        .shrink_end_child(false)
        .vexpand(true)
        .build();
    content.append(&paned);

    let status_bar = gtk::Box::new(gtk::Orientation::Horizontal, 6);
    let status_list = gtk::Label::new(Some("No list loaded"));
    status_list.set_hexpand(true);
    status_list.set_xalign(0.0);
    let status_templates = gtk::Label::new(Some("Templates: 0"));
    status_bar.append(&status_list);
    status_bar.append(&status_templates);
    content.append(&status_bar);

    overlay.set_child(Some(&content));
    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header_bar = adw::HeaderBar::new();
    let title = gtk::Label::new(Some("Huby"));
    header_bar.set_title_widget(Some(&title));
    container.append(&header_bar);
    container.append(&overlay);
    window.set_content(Some(&container));

    let context_menu = gtk::Popover::new();
    let client = ApiClient::new(&settings);
    log::info!("automation server at {}", client.base_url());
    let this = Rc::new(MainWindow {
        window,
        overlay,
        header: Header { name, phone, shown: RefCell::new((String::new(), String::new())) },
        search,
        list,
        side,
        composer,
        profile_menu,
        profile_menu_updating: Cell::new(false),
        min_entry,
        max_entry,
        start_btn,
        connect_btn,
        template_btn,
        wpp_btn,
        status_list,
        status_templates,
        context_menu,
        client,
        model: RefCell::new(Model {
            comments: CommentBook::load(crate::app::comments_path()),
            ..Model::default()
        }),
        timers: RefCell::new(Timers::default()),
    });

    this.build_context_menu();
    this.wire(app, &load_btn, &status_btns, &add_profile_btn, &remove_profile_btn, &txt_btn);
    this.restore(state);
    this.start_connection_poll();
    this.window.present();
}

impl MainWindow {
    fn toast(&self, text: &str) {
        self.overlay.add_toast(adw::Toast::new(text));
    }

    fn wire(
        self: &Rc<Self>,
        app: &Application,
        load_btn: &gtk::Button,
        status_btns: &[(gtk::Button, &'static str)],
        add_profile_btn: &gtk::Button,
        remove_profile_btn: &gtk::Button,
        txt_btn: &gtk::Button,
    ) {
        {
            let this = self.clone();
            load_btn.connect_clicked(move |_| {
                let this2 = this.clone();
                dialogs::open_csv(&this.window, move |path| this2.load_file(&path));
            });
        }
        for (btn, label) in status_btns {
            let this = self.clone();
            let label = *label;
            btn.connect_clicked(move |_| this.set_status(label));
        }
        {
            let this = self.clone();
            add_profile_btn.connect_clicked(move |_| this.add_profile());
        }
        {
            let this = self.clone();
            remove_profile_btn.connect_clicked(move |_| this.remove_profile());
        }
        {
            let this = self.clone();
            txt_btn.connect_clicked(move |_| this.choose_templates(false));
        }
        {
            let this = self.clone();
            self.start_btn.connect_clicked(move |_| this.toggle_campaign());
        }
        {
            let this = self.clone();
            self.connect_btn.connect_clicked(move |_| this.toggle_connection());
        }
        {
            let this = self.clone();
            self.template_btn.connect_clicked(move |_| this.send_template());
        }
        {
            let this = self.clone();
            self.wpp_btn.connect_toggled(move |btn| this.composer.set_visible(btn.is_active()));
        }
        {
            let this = self.clone();
            self.composer.connect_send(move || this.send_custom());
        }
        {
            let this = self.clone();
            self.profile_menu.connect_selected_notify(move |_| this.on_profile_selected());
        }
        {
            let this = self.clone();
            self.search.connect_changed(move |_| this.refresh_list());
        }
        {
            let keys = gtk::EventControllerKey::new();
            keys.set_propagation_phase(gtk::PropagationPhase::Capture);
            let this = self.clone();
            keys.connect_key_pressed(move |_, key, _, _| {
                if key == gtk::gdk::Key::Down || key == gtk::gdk::Key::Up {
                    this.list.select_first();
                    glib::Propagation::Stop
                } else {
                    glib::Propagation::Proceed
                }
            });
            self.search.add_controller(keys);
        }
        {
            let this = self.clone();
            self.list.connect_selection_changed(move || this.on_selection_changed());
        }
        {
            let this = self.clone();
            self.list.connect_sort(move |column| this.sort_by(column));
        }
        {
            let this = self.clone();
            self.side.connect_notes_edited(move || {
                this.model.borrow_mut().notes.mark_dirty();
                this.schedule_notes_save();
            });
        }
        {
            let this = self.clone();
            self.side.connect_save(move || this.save_notes());
        }
        for label in [&self.header.name, &self.header.phone] {
            let this = self.clone();
            label.connect_editing_notify(move |l| {
                if !l.is_editing() {
                    this.commit_header_edit(l);
                }
            });
        }

        let send_action = gtk::gio::SimpleAction::new("send-template", None);
        {
            let this = self.clone();
            send_action.connect_activate(move |_, _| this.send_template());
        }
        self.window.add_action(&send_action);
        let save_action = gtk::gio::SimpleAction::new("save-notes", None);
        {
            let this = self.clone();
            save_action.connect_activate(move |_, _| this.save_notes());
        }
        self.window.add_action(&save_action);
        app.set_accels_for_action("win.send-template", &["<Alt>w"]);
        app.set_accels_for_action("win.save-notes", &["<Control>s"]);

        {
            let this = self.clone();
            self.window.connect_close_request(move |_| {
                this.stop_campaign();
                this.save_notes();
                if let Err(e) = this.snapshot_state().save() {
                    log::error!("could not save state: {e}");
                }
                glib::Propagation::Proceed
            });
        }
    }

    fn menu_item<F: Fn(&Rc<Self>) + 'static>(self: &Rc<Self>, column: &gtk::Box, label: &str, action: F) {
        let btn = gtk::Button::with_label(label);
        btn.add_css_class("flat");
        btn.set_halign(gtk::Align::Fill);
        if let Some(child) = btn.child().and_downcast::<gtk::Label>() {
            child.set_xalign(0.0);
        }
        let this = self.clone();
        btn.connect_clicked(move |_| {
            this.context_menu.popdown();
            action(&this);
        });
        column.append(&btn);
    }

    fn build_context_menu(self: &Rc<Self>) {
        let column = gtk::Box::new(gtk::Orientation::Vertical, 0);
        for (_, label) in QUICK_STATUSES {
            self.menu_item(&column, label, move |w| w.set_status(label));
        }
        self.menu_item(&column, "Clear Status", |w| w.set_status(""));
        column.append(&gtk::Separator::new(gtk::Orientation::Horizontal));
        self.menu_item(&column, "Edit Name", |w| w.begin_header_edit(&w.header.name));
        self.menu_item(&column, "Edit Phone", |w| w.begin_header_edit(&w.header.phone));
        column.append(&gtk::Separator::new(gtk::Orientation::Horizontal));
        self.menu_item(&column, "Add New Contact", |w| w.add_contact());
        self.context_menu.set_child(Some(&column));
        self.list.attach_menu(&self.context_menu);
    }

    // ---- state -------------------------------------------------------------

    fn restore(self: &Rc<Self>, state: AppState) {
        if let Some((w, h)) = state.geometry() {
            self.window.set_default_size(w, h);
        }
        if !state.last_message_files.is_empty() {
            if let Err(e) = self.model.borrow_mut().templates.load_paths(&state.last_message_files) {
                log::warn!("saved templates not restored: {e}");
            }
            self.update_template_count();
        }
        self.model.borrow_mut().profiles =
            ProfileRegistry::restore(&state.profile_names, state.active_profile.as_deref());
        self.update_profile_menu();

        if let Some(path) = state.last_filepath.as_deref() {
            if path.exists() {
                self.load_file(path);
                if let Some(last) = state.last_sent_contact_n.clone() {
                    self.model.borrow_mut().campaign.set_last_sent(Some(last));
                    self.refresh_list();
                }
                if !state.last_selected_contact.is_empty() {
                    self.list.select(&state.last_selected_contact);
                }
            } else {
                dialogs::warn(
                    &self.window,
                    "File Not Found",
                    &format!(
                        "The previous list was not found at:\n\n{}\n\nIt may have been moved or deleted.",
                        path.display()
                    ),
                );
                self.status_list.set_label("Previous list not found");
            }
        }
        if state.wpp_panel_visible {
            self.wpp_btn.set_active(true);
        }
    }

    fn snapshot_state(&self) -> AppState {
        let model = self.model.borrow();
        AppState {
            last_filepath: model.store.path().map(Path::to_path_buf),
            last_selected_contact: self.list.primary_selection().unwrap_or_default(),
            last_geometry: Some(format!("{}x{}", self.window.width(), self.window.height())),
            last_message_files: model.templates.paths().to_vec(),
            min_interval: self.min_entry.text().to_string(),
            max_interval: self.max_entry.text().to_string(),
            wpp_panel_visible: self.composer.is_visible(),
            profile_names: model.profiles.names(),
            active_profile: model.profiles.active_name().map(str::to_string),
            last_sent_contact_n: model.campaign.last_sent().map(str::to_string),
        }
    }

    // ---- contact list --------------------------------------------------------

    fn load_file(self: &Rc<Self>, path: &Path) {
        match ContactStore::load(path) {
            Ok(store) => {
                let file_name = store.file_name().unwrap_or_default();
                {
                    let mut model = self.model.borrow_mut();
                    model.store = store;
                    model.comments = CommentBook::load(crate::app::comments_path());
                    model.campaign.set_last_sent(None);
                }
                self.set_header("", "");
                self.refresh_list();
                self.status_list.set_label(&format!("List: {}", file_name));
            }
            Err(e) => {
                log::error!("failed to load {}: {e}", path.display());
                self.status_list.set_label("Error loading list");
                dialogs::error(&self.window, "Error Reading File", &format!("An error occurred: {}", e));
            }
        }
    }

    fn refresh_list(&self) {
        let term = self.search.text().to_string();
        let keys = {
            let model = self.model.borrow();
            let keys: Vec<String> = model.store.filter(&term).iter().map(|c| c.n.clone()).collect();
            match model.sort {
                Some((column, reverse)) => model.store.sorted(&keys, column, reverse),
                None => keys,
            }
        };
        self.show_rows(&keys);
    }

    // Rebuilding the list fires selection changes, which need the model
    // mutably, so rows are rendered from a snapshot.
    fn show_rows(&self, keys: &[String]) {
        let (contacts, last_sent) = {
            let model = self.model.borrow();
            let contacts: Vec<Contact> = keys.iter().filter_map(|k| model.store.get(k).cloned()).collect();
            (contacts, model.campaign.last_sent().map(str::to_string))
        };
        let refs: Vec<&Contact> = contacts.iter().collect();
        self.list.set_items(&refs, last_sent.as_deref());
    }

    fn refresh_row(&self, n: &str) {
        let model = self.model.borrow();
        if let Some(c) = model.store.get(n) {
            self.list.update_row(c, model.campaign.last_sent());
        }
    }

    /// Clicking the same header again flips the order.
    fn sort_by(&self, column: SortColumn) {
        let visible = self.list.visible_keys();
        let order = {
            let mut model = self.model.borrow_mut();
            let reverse = matches!(model.sort, Some((c, r)) if c == column && !r);
            model.sort = Some((column, reverse));
            model.store.sorted(&visible, column, reverse)
        };
        self.show_rows(&order);
    }

    fn require_selection(&self) -> Option<String> {
        let selected = self.list.primary_selection();
        if selected.is_none() {
            dialogs::warn(&self.window, "No Selection", "Please select a contact first.");
        }
        selected
    }

    fn on_selection_changed(self: &Rc<Self>) {
        for label in [&self.header.name, &self.header.phone] {
            if label.is_editing() {
                label.stop_editing(false);
            }
        }
        self.flush_notes();
        let Some(n) = self.list.primary_selection() else {
            self.model.borrow_mut().notes.open(None);
            self.set_header("", "");
            self.side.set_notes("", false);
            return;
        };
        let (name, phone_display, phone_id, note) = {
            let mut guard = self.model.borrow_mut();
            let model = &mut *guard;
            let Some(c) = model.store.get(&n) else {
                model.notes.open(None);
                return;
            };
            model.notes.open(Some(&c.phone_id));
            (c.name.clone(), c.phone_display.clone(), c.phone_id.clone(), model.comments.get(&c.phone_id).to_string())
        };
        self.set_header(&display_name(&name), &phone_display);
        self.side.set_notes(&note, true);
        self.load_history(phone_id);
    }

    fn set_header(&self, name: &str, phone: &str) {
        self.header.name.set_text(name);
        self.header.phone.set_text(phone);
        *self.header.shown.borrow_mut() = (name.to_string(), phone.to_string());
    }

    fn begin_header_edit(&self, label: &gtk::EditableLabel) {
        if self.list.primary_selection().is_some() {
            label.start_editing();
        }
    }

    fn commit_header_edit(self: &Rc<Self>, label: &gtk::EditableLabel) {
        let is_name = label == &self.header.name;
        let original = {
            let shown = self.header.shown.borrow();
            if is_name { shown.0.clone() } else { shown.1.clone() }
        };
        let value = label.text().trim().to_string();
        if value.is_empty() || value == original {
            label.set_text(&original);
            return;
        }
        let Some(n) = self.list.primary_selection() else {
            label.set_text(&original);
            return;
        };
        let result = {
            let mut model = self.model.borrow_mut();
            if is_name {
                model.store.rename(&n, &value).map(|formatted| display_name(&formatted))
            } else {
                model.store.change_phone(&n, &value)
            }
        };
        match result {
            Ok(shown) => {
                label.set_text(&shown);
                {
                    let mut header = self.header.shown.borrow_mut();
                    if is_name { header.0 = shown } else { header.1 = shown }
                }
                self.refresh_row(&n);
            }
            Err(e) => {
                label.set_text(&original);
                dialogs::error(&self.window, "Could Not Save", &e.to_string());
            }
        }
    }

    fn set_status(self: &Rc<Self>, status: &str) {
        let selected = self.list.selected_keys();
        if selected.is_empty() {
            dialogs::warn(&self.window, "No Contact", "Select a contact to change its status.");
            return;
        }
        self.flush_notes();
        let line = comments::status_line(status);
        for n in &selected {
            let result = {
                let mut model = self.model.borrow_mut();
                let phone_id = model.store.get(n).map(|c| c.phone_id.clone());
                let result = model.store.set_status(n, status);
                if let (Ok(()), Some(phone_id)) = (&result, phone_id) {
                    if !status.is_empty() {
                        model.comments.append_line(&phone_id, &line);
                        if let Err(e) = model.comments.save() {
                            log::error!("could not save comments: {e}");
                        }
                    }
                }
                result
            };
            if let Err(e) = result {
                dialogs::error(&self.window, "Could Not Save", &format!("Could not save the change for {}.\n{}", n, e));
                let path = self.model.borrow().store.path().map(Path::to_path_buf);
                if let Some(path) = path {
                    self.load_file(&path);
                }
                return;
            }
            self.refresh_row(n);
        }
        self.on_selection_changed();
    }

    fn add_contact(self: &Rc<Self>) {
        if self.model.borrow().store.path().is_none() {
            dialogs::warn(&self.window, "No File", "Load a CSV file before adding a new contact.");
            return;
        }
        let this = self.clone();
        dialogs::new_contact(&self.window, move |name, phone| {
            this.model.borrow().store.append(name, phone).map_err(|e| e.to_string())?;
            let path = this.model.borrow().store.path().map(Path::to_path_buf);
            dialogs::info(
                &this.window,
                "Contact Added",
                &format!("Contact '{}' added successfully!\nThe list will be reloaded.", name),
            );
            if let Some(path) = path {
                this.load_file(&path);
            }
            Ok(())
        });
    }

    // ---- notes and history ---------------------------------------------------

    fn schedule_notes_save(self: &Rc<Self>) {
        let mut timers = self.timers.borrow_mut();
        remove_source(&mut timers.notes);
        let this = self.clone();
        timers.notes = Some(glib::timeout_add_local_once(NOTES_AUTOSAVE, move || {
            this.timers.borrow_mut().notes = None;
            this.flush_notes();
        }));
    }

    /// Writes unsaved edits to the contact the editor was showing.
    fn flush_notes(&self) {
        remove_source(&mut self.timers.borrow_mut().notes);
        let text = self.side.notes_text();
        let mut guard = self.model.borrow_mut();
        let model = &mut *guard;
        if model.notes.flush(&mut model.comments, &text) {
            if let Err(e) = model.comments.save() {
                log::error!("could not save comments: {e}");
            }
        }
    }

    fn save_notes(&self) {
        remove_source(&mut self.timers.borrow_mut().notes);
        let text = self.side.notes_text();
        let mut guard = self.model.borrow_mut();
        let model = &mut *guard;
        if model.notes.commit(&mut model.comments, &text) {
            if let Err(e) = model.comments.save() {
                log::error!("could not save comments: {e}");
            }
        }
    }

    /// Appends a note line for the contact and mirrors it in the panel when selected.
    fn append_note(&self, n: &str, line: &str) {
        self.flush_notes();
        let (combined, shown) = {
            let mut model = self.model.borrow_mut();
            let Some(phone_id) = model.store.get(n).map(|c| c.phone_id.clone()) else { return };
            let combined = model.comments.append_line(&phone_id, line);
            if let Err(e) = model.comments.save() {
                log::error!("could not save comments: {e}");
            }
            (combined, model.notes.owner() == Some(phone_id.as_str()))
        };
        if shown {
            self.side.set_notes(&combined, true);
        }
    }

    fn active_session(&self) -> Option<Session> {
        self.model.borrow().profiles.active().cloned()
    }

    fn load_history(self: &Rc<Self>, phone_id: String) {
        self.side.show_history_text("Loading messages...");
        let session = match self.active_session() {
            Some(s) if s.connected => s,
            _ => {
                match crate::storage::cached_messages(&phone_id, HISTORY_LIMIT) {
                    Ok(cached) if !cached.is_empty() => {
                        self.side.show_history(&recent_with_body(&cached, HISTORY_LIMIT))
                    }
                    _ => self.side.show_history_text("Profile disconnected."),
                }
                return;
            }
        };
        let client = self.client.clone();
        let phone = phone_id.clone();
        let rx = run_async_to_main(async move {
            match client.messages_for_contact(&session.name, session.token.as_deref(), &phone).await {
                Ok(messages) => {
                    if let Err(e) = crate::storage::cache_messages(&phone, &messages) {
                        log::debug!("history cache write failed: {e}");
                    }
                    Ok(messages)
                }
                Err(e) => Err(e.to_string()),
            }
        });
        let this = self.clone();
        rx.attach(None, move |res| {
            let still_selected = {
                let model = this.model.borrow();
                this.list
                    .primary_selection()
                    .and_then(|n| model.store.get(&n).map(|c| c.phone_id == phone_id))
                    .unwrap_or(false)
            };
            if still_selected {
                match res {
                    Ok(messages) => this.side.show_history(&recent_with_body(&messages, HISTORY_LIMIT)),
                    Err(err) => this.side.show_history_text(&format!("Error:\n{}", err)),
                }
            }
            glib::ControlFlow::Continue
        });
    }

    // ---- profiles and connection ---------------------------------------------

    fn update_profile_menu(&self) {
        let (names, active) = {
            let model = self.model.borrow();
            (model.profiles.names(), model.profiles.active_name().map(str::to_string))
        };
        let options: Vec<&str> = if names.is_empty() {
            vec![NO_PROFILE]
        } else {
            names.iter().map(String::as_str).collect()
        };
        self.profile_menu_updating.set(true);
        self.profile_menu.set_model(Some(&gtk::StringList::new(&options)));
        let pos = active
            .and_then(|a| names.iter().position(|n| *n == a))
            .unwrap_or(0);
        self.profile_menu.set_selected(pos as u32);
        self.profile_menu_updating.set(false);
        self.update_connection_button();
    }

    fn on_profile_selected(self: &Rc<Self>) {
        if self.profile_menu_updating.get() {
            return;
        }
        let pos = self.profile_menu.selected() as usize;
        let changed = {
            let mut model = self.model.borrow_mut();
            match model.profiles.names().get(pos) {
                Some(name) => model.profiles.set_active(name),
                None => false,
            }
        };
        self.update_connection_button();
        if changed {
            self.check_connection_once();
        }
    }

    fn add_profile(self: &Rc<Self>) {
        let this = self.clone();
        dialogs::ask_text(&self.window, "New Profile", "Enter a name for the new profile (e.g. 'Work'):", move |name| {
            if name.trim().is_empty() {
                return;
            }
            let added = this.model.borrow_mut().profiles.add(&name);
            match added {
                Ok(name) => {
                    this.update_profile_menu();
                    dialogs::info(
                        &this.window,
                        "Success",
                        &format!("Profile '{}' created. Now click 'Connect' to log in.", name),
                    );
                }
                Err(e) => dialogs::warn(&this.window, "Existing Profile", &e.to_string()),
            }
        });
    }

    fn remove_profile(self: &Rc<Self>) {
        let Some(session) = self.active_session() else {
            dialogs::warn(&self.window, "No Profile", "No profile selected to remove.");
            return;
        };
        let this = self.clone();
        dialogs::confirm(
            &self.window,
            "Confirm Removal",
            &format!("Are you sure you want to remove the profile '{}'?", session.name),
            move || {
                let removed = this.model.borrow_mut().profiles.remove_active();
                if let Ok(s) = removed {
                    log::info!("profile {} removed", s.name);
                    if s.token.is_some() {
                        let client = this.client.clone();
                        crate::utils::spawn_async(async move {
                            if let Err(e) = client.close_session(&s.name, s.token.as_deref()).await {
                                log::debug!("close-session for {} failed: {e}", s.name);
                            }
                        });
                    }
                }
                this.update_profile_menu();
            },
        );
    }

    fn update_connection_button(&self) {
        if self.model.borrow().profiles.active_connected() {
            self.connect_btn.set_label("Disconnect");
            self.connect_btn.remove_css_class("suggested-action");
            self.connect_btn.add_css_class("destructive-action");
        } else {
            self.connect_btn.set_label("Connect");
            self.connect_btn.remove_css_class("destructive-action");
            self.connect_btn.add_css_class("suggested-action");
        }
    }

    fn set_connected(&self, name: &str, connected: bool) -> bool {
        let mut model = self.model.borrow_mut();
        match model.profiles.session_mut(name) {
            Some(s) if s.connected != connected => {
                s.connected = connected;
                true
            }
            _ => false,
        }
    }

    fn start_connection_poll(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        glib::timeout_add_seconds_local(POLL_SECS, move || match weak.upgrade() {
            Some(this) => {
                this.check_connection_once();
                glib::ControlFlow::Continue
            }
            None => glib::ControlFlow::Break,
        });
    }

    fn check_connection_once(self: &Rc<Self>) {
        let Some(session) = self.active_session() else { return };
        let client = self.client.clone();
        let rx = run_async_to_main(async move {
            let ok = client.check_connection(&session.name, session.token.as_deref()).await;
            Ok::<_, String>((session.name, ok))
        });
        let this = self.clone();
        rx.attach(None, move |res| {
            if let Ok((name, connected)) = res {
                if this.set_connected(&name, connected) {
                    log::info!("profile {name} is now {}", if connected { "connected" } else { "disconnected" });
                    this.update_connection_button();
                }
            }
            glib::ControlFlow::Continue
        });
    }

    /// After starting a session, polls until the server reports it connected.
    fn wait_for_connection(self: &Rc<Self>, name: String, attempt: u32, delay: Duration) {
        let this = self.clone();
        glib::timeout_add_local_once(delay, move || {
            let session = {
                let model = this.model.borrow();
                if model.profiles.active_name() != Some(name.as_str()) {
                    return;
                }
                model.profiles.active().cloned()
            };
            let Some(session) = session else { return };
            let client = this.client.clone();
            let rx = run_async_to_main(async move {
                Ok::<_, String>(client.check_connection(&session.name, session.token.as_deref()).await)
            });
            let this2 = this.clone();
            rx.attach(None, move |res| {
                if res.unwrap_or(false) {
                    this2.set_connected(&name, true);
                    this2.update_connection_button();
                } else if attempt < CONNECT_MAX_ATTEMPTS {
                    this2.wait_for_connection(name.clone(), attempt + 1, CONNECT_RETRY);
                } else {
                    log::warn!("profile {name} did not connect after {attempt} checks");
                }
                glib::ControlFlow::Continue
            });
        });
    }

    fn toggle_connection(self: &Rc<Self>) {
        let Some(session) = self.active_session() else {
            dialogs::warn(&self.window, "No Profile", "Please add and/or select a profile first.");
            return;
        };
        if session.connected {
            let this = self.clone();
            dialogs::confirm(
                &self.window,
                "Confirm Full Disconnect",
                "This will disconnect and clear the current session data on the server, requiring a new QR code scan to reconnect.\n\nDo you want to continue?",
                move || this.logout(session.clone()),
            );
        } else {
            let client = self.client.clone();
            let name = session.name.clone();
            let rx = run_async_to_main(async move {
                client.start_session(&session.name, session.token.clone()).await.map_err(|e| e.to_string())
            });
            let this = self.clone();
            rx.attach(None, move |res| {
                match res {
                    Ok((token, outcome)) => {
                        {
                            let mut model = this.model.borrow_mut();
                            if let Some(s) = model.profiles.session_mut(&name) {
                                s.token = Some(token.clone());
                                if outcome == crate::api::models::SessionStart::Connected {
                                    s.connected = true;
                                }
                            }
                        }
                        this.update_connection_button();
                        this.toast(outcome.message());
                        this.wait_for_connection(name.clone(), 1, CONNECT_FIRST_CHECK);
                    }
                    Err(err) => dialogs::error(&this.window, "Error", &err),
                }
                glib::ControlFlow::Continue
            });
        }
    }

    fn logout(self: &Rc<Self>, session: Session) {
        let client = self.client.clone();
        let name = session.name.clone();
        let rx = run_async_to_main(async move {
            client.logout_session(&session.name, session.token.as_deref()).await.map_err(|e| e.to_string())
        });
        let this = self.clone();
        rx.attach(None, move |res| {
            match res {
                Ok(()) => {
                    {
                        let mut model = this.model.borrow_mut();
                        if let Some(s) = model.profiles.session_mut(&name) {
                            s.token = None;
                            s.connected = false;
                        }
                    }
                    this.update_connection_button();
                    dialogs::info(&this.window, "Disconnected", "Session ended and cleared successfully.");
                }
                Err(err) => dialogs::error(
                    &this.window,
                    "Logout Error",
                    &format!("Could not clear the session on the server.\nReason: {}", err),
                ),
            }
            glib::ControlFlow::Continue
        });
    }

    // ---- templates and single sends ----------------------------------------

    fn update_template_count(&self) {
        let count = self.model.borrow().templates.len();
        self.status_templates.set_label(&format!("Templates: {}", count));
    }

    /// With `send_after`, a successful load goes on to send to the selection.
    fn choose_templates(self: &Rc<Self>, send_after: bool) {
        let this = self.clone();
        dialogs::open_templates(&self.window, move |paths: Vec<PathBuf>| {
            let result = this.model.borrow_mut().templates.load_paths(&paths);
            this.update_template_count();
            match result {
                Ok(report) => {
                    let mut msg = format!("{} templates loaded.", report.loaded);
                    if !report.failed.is_empty() {
                        msg.push_str(&format!("\nFailed to load: {}", report.failed.join(", ")));
                    }
                    dialogs::info(&this.window, "Success", &msg);
                    if send_after {
                        this.send_template();
                    }
                }
                Err(TemplateError::NoneLoaded { .. }) | Err(TemplateError::Empty) => {
                    dialogs::error(&this.window, "Error", "Could not load any template.")
                }
            }
        });
    }

    fn require_connected(&self) -> Option<Session> {
        match self.active_session() {
            Some(s) if s.connected => Some(s),
            _ => {
                dialogs::warn(
                    &self.window,
                    "WhatsApp Disconnected",
                    "Select a profile and connect to WhatsApp before sending.",
                );
                None
            }
        }
    }

    /// Sends on the runtime and hands `(outcome, error)` back on the main loop.
    fn dispatch<F>(self: &Rc<Self>, session: Session, phone: String, message: String, done: F)
    where
        F: Fn(&Rc<Self>, Result<(), String>) + 'static,
    {
        let client = self.client.clone();
        let rx = run_async_to_main(async move {
            let res = client
                .send_message(&session.name, session.token.as_deref(), &phone, &message)
                .await
                .map_err(|e| e.to_string());
            Ok::<_, String>(res)
        });
        let this = self.clone();
        rx.attach(None, move |res| {
            let outcome = res.and_then(|inner| inner);
            done(&this, outcome);
            glib::ControlFlow::Continue
        });
    }

    fn record_outcome(&self, n: &str, result: &Result<(), String>) -> SendOutcome {
        let outcome = if result.is_ok() { SendOutcome::Success } else { SendOutcome::Failed };
        self.model.borrow_mut().store.set_outcome(n, outcome);
        if result.is_ok() {
            self.append_note(n, &comments::campaign_sent_line());
        }
        self.refresh_row(n);
        outcome
    }

    fn send_template(self: &Rc<Self>) {
        if self.model.borrow().campaign.is_running() {
            dialogs::warn(&self.window, "Automatic Mode", "Automatic sending is active. Press STOP first.");
            return;
        }
        let Some(n) = self.require_selection() else { return };
        let Some(session) = self.require_connected() else { return };
        if self.model.borrow().templates.is_empty() {
            self.choose_templates(true);
            return;
        }
        let prepared = {
            let model = self.model.borrow();
            model.store.get(&n).and_then(|c| {
                let msg = model.templates.message_for(&mut rand::thread_rng(), &c.name).ok()?;
                Some((c.name.clone(), c.phone_id.clone(), msg))
            })
        };
        let Some((name, phone, message)) = prepared else { return };
        self.dispatch(session, phone, message, move |this, result| {
            this.record_outcome(&n, &result);
            match result {
                Ok(()) => this.toast(&format!("Message sent to {}!", name)),
                Err(err) => dialogs::error(
                    &this.window,
                    "Send Failed",
                    &format!("Could not send to {}.\nReason: {}", name, err),
                ),
            }
        });
    }

    fn send_custom(self: &Rc<Self>) {
        let text = self.composer.text();
        if text.is_empty() {
            dialogs::warn(&self.window, "Empty Message", "Please type a message to send.");
            return;
        }
        let Some(n) = self.require_selection() else { return };
        let Some(session) = self.require_connected() else { return };
        let Some((name, phone)) = self.model.borrow().store.get(&n).map(|c| (c.name.clone(), c.phone_id.clone())) else {
            return;
        };
        self.dispatch(session, phone, text, move |this, result| match result {
            Ok(()) => {
                this.toast(&format!("Message sent to {}!", name));
                this.composer.clear();
            }
            Err(err) => dialogs::error(
                &this.window,
                "Send Failed",
                &format!("Could not send to {}.\nReason: {}", name, err),
            ),
        });
    }

    // ---- campaign -------------------------------------------------------------

    fn toggle_campaign(self: &Rc<Self>) {
        if self.model.borrow().campaign.is_running() {
            self.stop_campaign();
            return;
        }
        let selected = self.list.primary_selection();
        let started = {
            let mut guard = self.model.borrow_mut();
            let model = &mut *guard;
            let check = StartCheck {
                connected: model.profiles.active_connected(),
                store: &model.store,
                has_templates: !model.templates.is_empty(),
                selected: selected.as_deref(),
            };
            model.campaign.start(check)
        };
        if let Err(e) = started {
            dialogs::warn(&self.window, "Cannot Start", &e.to_string());
            return;
        }
        self.start_btn.set_label("STOP");
        self.start_btn.remove_css_class("suggested-action");
        self.start_btn.add_css_class("destructive-action");
        self.run_step();
    }

    fn stop_campaign(&self) {
        {
            let mut timers = self.timers.borrow_mut();
            remove_source(&mut timers.countdown);
            remove_source(&mut timers.step);
        }
        let countdown = self.model.borrow_mut().countdown.take();
        if let Some(cd) = countdown {
            self.model.borrow_mut().store.set_progress(&cd.n, "");
            self.refresh_row(&cd.n);
        }
        self.model.borrow_mut().campaign.stop();
        self.start_btn.set_label("START");
        self.start_btn.remove_css_class("destructive-action");
        self.start_btn.add_css_class("suggested-action");
        self.window.set_title(Some(APP_TITLE));
    }

    fn run_step(self: &Rc<Self>) {
        let step = {
            let model = self.model.borrow();
            model.campaign.next_step(model.store.all())
        };
        match step {
            Step::Finished => self.finish_campaign(),
            Step::Send { n } => {
                self.list.select(&n);
                let (pos, total) = {
                    let model = self.model.borrow();
                    (model.campaign.cursor() + 1, model.store.len())
                };
                self.window.set_title(Some(&format!("{} - sending {}/{}", APP_TITLE, pos, total)));
                let this = self.clone();
                self.timers.borrow_mut().step = Some(glib::timeout_add_local_once(
                    Duration::from_millis(SELECT_DELAY_MS),
                    move || {
                        this.timers.borrow_mut().step = None;
                        this.send_step(n);
                    },
                ));
            }
        }
    }

    fn send_step(self: &Rc<Self>, n: String) {
        if !self.model.borrow().campaign.is_running() {
            return;
        }
        let (previous, run) = {
            let model = self.model.borrow();
            (model.campaign.last_sent().map(str::to_string), model.campaign.run_id())
        };
        let session = match self.active_session() {
            Some(s) if s.connected => s,
            _ => {
                self.stop_campaign();
                dialogs::warn(&self.window, "Sending Stopped", "Sending was interrupted (WhatsApp disconnected).");
                return;
            }
        };
        let prepared = {
            let model = self.model.borrow();
            model.store.get(&n).and_then(|c| {
                let msg = model.templates.message_for(&mut rand::thread_rng(), &c.name).ok()?;
                Some((c.name.clone(), c.phone_id.clone(), msg))
            })
        };
        let Some((name, phone, message)) = prepared else {
            self.stop_campaign();
            return;
        };
        self.model.borrow_mut().store.set_progress(&n, "Sending...");
        self.refresh_row(&n);
        self.dispatch(session, phone, message, move |this, result| {
            match &result {
                Ok(()) => log::info!("message sent to {name}"),
                Err(err) => log::warn!("send to {name} failed: {err}"),
            }
            let outcome = this.record_outcome(&n, &result);
            let mut fell_back = false;
            let after = {
                let mut guard = this.model.borrow_mut();
                let model = &mut *guard;
                model.store.set_progress(&n, outcome.progress_label());
                let (min, max) = (this.min_entry.text(), this.max_entry.text());
                model.campaign.record(run, model.store.all(), &n, outcome, || {
                    let choice = pick_interval(&min, &max, &mut rand::thread_rng());
                    fell_back = choice.fell_back;
                    choice.secs
                })
            };
            if let Some(prev) = previous.as_deref() {
                this.refresh_row(prev);
            }
            this.refresh_row(&n);
            if fell_back {
                this.min_entry.set_text(DEFAULT_MIN_INTERVAL);
                this.max_entry.set_text(DEFAULT_MAX_INTERVAL);
                dialogs::warn(&this.window, "Invalid Interval", "Invalid interval. Using the default (20-45s).");
            }
            match after {
                AfterSend::Wait { next, secs } => {
                    log::info!("next send in {secs} seconds");
                    this.start_countdown(next, secs);
                    let this2 = this.clone();
                    let mut timers = this.timers.borrow_mut();
                    remove_source(&mut timers.step);
                    timers.step = Some(glib::timeout_add_local_once(
                        Duration::from_secs(secs),
                        move || {
                            this2.timers.borrow_mut().step = None;
                            this2.run_step();
                        },
                    ));
                }
                AfterSend::Finished => {
                    let current = this.model.borrow().campaign.is_current(run);
                    if current {
                        this.run_step();
                    }
                }
            }
        });
    }

    fn start_countdown(self: &Rc<Self>, n: String, secs: u64) {
        let countdown = Countdown::new(n.clone(), secs);
        {
            let mut model = self.model.borrow_mut();
            model.store.set_progress(&n, &countdown.label());
            model.countdown = Some(countdown);
        }
        self.refresh_row(&n);
        let this = self.clone();
        let mut timers = self.timers.borrow_mut();
        remove_source(&mut timers.countdown);
        timers.countdown = Some(glib::timeout_add_seconds_local(1, move || {
            let (label, more) = {
                let mut model = this.model.borrow_mut();
                let Some(cd) = model.countdown.as_mut() else {
                    this.timers.borrow_mut().countdown = None;
                    return glib::ControlFlow::Break;
                };
                let more = cd.tick();
                (cd.label(), more)
            };
            {
                let mut model = this.model.borrow_mut();
                model.store.set_progress(&n, &label);
                if !more {
                    model.countdown = None;
                }
            }
            this.refresh_row(&n);
            if more {
                glib::ControlFlow::Continue
            } else {
                this.timers.borrow_mut().countdown = None;
                glib::ControlFlow::Break
            }
        }));
    }

    fn finish_campaign(self: &Rc<Self>) {
        let report = {
            let model = self.model.borrow();
            SendReport::from_contacts(model.store.all(), timestamp_now("%B %d, %Y, %H:%M:%S"))
        };
        self.stop_campaign();
        dialogs::info(&self.window, "Done", "All contacts have been processed!");
        if let Some(report) = report {
            let this = self.clone();
            let text = report.render();
            dialogs::save_file(&self.window, "Save Send Report", &SendReport::default_file_name(), move |path| {
                match std::fs::write(&path, &text) {
                    Ok(()) => dialogs::info(
                        &this.window,
                        "Report Saved",
                        &format!("The report was saved to:\n{}", path.display()),
                    ),
                    Err(e) => dialogs::error(
                        &this.window,
                        "Could Not Save Report",
                        &format!("Could not save.\nError: {}", e),
                    ),
                }
            });
        }
    }
}
