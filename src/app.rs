use adw::Application;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MIN_INTERVAL: &str = "20";
pub const DEFAULT_MAX_INTERVAL: &str = "45";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "example", "HubyGtk")
}

pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|p| p.config_dir().to_path_buf())
}

pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|p| p.data_dir().to_path_buf())
}

pub fn comments_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("comments.json"))
}

fn default_min_interval() -> String {
    DEFAULT_MIN_INTERVAL.to_string()
}

fn default_max_interval() -> String {
    DEFAULT_MAX_INTERVAL.to_string()
}

/// Everything the window restores on startup. Stored as flat JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppState {
    pub last_filepath: Option<PathBuf>,
    pub last_selected_contact: String,
    pub last_geometry: Option<String>,
    pub last_message_files: Vec<PathBuf>,
    #[serde(default = "default_min_interval")]
    pub min_interval: String,
    #[serde(default = "default_max_interval")]
    pub max_interval: String,
    pub wpp_panel_visible: bool,
    pub profile_names: Vec<String>,
    pub active_profile: Option<String>,
    pub last_sent_contact_n: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            last_filepath: None,
            last_selected_contact: String::new(),
            last_geometry: None,
            last_message_files: Vec::new(),
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
            wpp_panel_visible: false,
            profile_names: Vec::new(),
            active_profile: None,
            last_sent_contact_n: None,
        }
    }
}

impl AppState {
    fn json_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    pub fn load() -> Self {
        match Self::json_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<AppState>(&bytes).unwrap_or_else(|e| {
                log::warn!("ignoring malformed state file {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        if let Some(path) = Self::json_path() {
            self.save_to(&path)
        } else {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "No config dir"))
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        fs::write(path, json)
    }

    /// Parses `"WIDTHxHEIGHT"`; Tk-style `+X+Y` suffixes are ignored.
    pub fn geometry(&self) -> Option<(i32, i32)> {
        let raw = self.last_geometry.as_deref()?;
        let size = raw.split('+').next()?;
        let (w, h) = size.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

/// Where the automation server lives. Kept in TOML next to the JSON state so
/// operators can point the app at another host without touching session data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub base_url: String,
    pub secret_key: String,
    pub country_code: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:21465".to_string(),
            secret_key: "THISISMYSECURETOKEN".to_string(),
            country_code: "55".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    fn toml_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("huby.toml"))
    }

    /// Writes the defaults out on first run so there is a file to edit.
    pub fn load() -> Self {
        let Some(path) = Self::toml_path() else { return Self::default() };
        match fs::read_to_string(&path) {
            Ok(text) => toml::from_str::<ServerSettings>(&text).unwrap_or_else(|e| {
                log::warn!("ignoring malformed {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => {
                let settings = Self::default();
                if let Err(e) = settings.save_to(&path) {
                    log::debug!("could not write default server settings: {e}");
                }
                settings
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        fs::write(path, text)
    }
}

pub fn build_ui(app: &Application) {
    let state = AppState::load();
    let settings = ServerSettings::load();
    crate::ui::main_window::show_main_window(app, state, settings);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("huby-app-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn state_round_trips_through_json() {
        let dir = scratch("state");
        let path = dir.join("config.json");
        let state = AppState {
            last_filepath: Some(PathBuf::from("/tmp/list.csv")),
            last_selected_contact: "004".into(),
            last_geometry: Some("850x450".into()),
            min_interval: "10".into(),
            profile_names: vec!["Work".into(), "Home".into()],
            active_profile: Some("Home".into()),
            last_sent_contact_n: Some("003".into()),
            wpp_panel_visible: true,
            ..AppState::default()
        };
        state.save_to(&path).unwrap();
        assert_eq!(AppState::load_from(&path), state);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let dir = scratch("partial");
        let path = dir.join("config.json");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, r#"{"profile_names": ["Work"], "last_filepath": null}"#).unwrap();
        let state = AppState::load_from(&path);
        assert_eq!(state.profile_names, vec!["Work".to_string()]);
        assert_eq!(state.min_interval, "20");
        assert_eq!(state.max_interval, "45");
        assert!(!state.wpp_panel_visible);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn geometry_accepts_tk_style_strings() {
        let mut state = AppState::default();
        state.last_geometry = Some("850x450+120+80".into());
        assert_eq!(state.geometry(), Some((850, 450)));
        state.last_geometry = Some("wide".into());
        assert_eq!(state.geometry(), None);
    }

    #[test]
    fn server_settings_parse_partial_toml() {
        let settings: ServerSettings = toml::from_str("base_url = \"http://10.0.0.5:21465\"").unwrap();
        assert_eq!(settings.base_url, "http://10.0.0.5:21465");
        assert_eq!(settings.country_code, "55");
        assert_eq!(settings.secret_key, "THISISMYSECURETOKEN");
    }
}
