pub mod composer;
pub mod contact_list;
pub mod dialogs;
pub mod main_window;
pub mod side_panel;
