use thiserror::Error;

use crate::api::models::Session;

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("Profile name cannot be empty")]
    EmptyName,
    #[error("A profile named '{0}' already exists")]
    Duplicate(String),
    #[error("No profile selected")]
    NoneActive,
}

/// Operator profiles, each wrapping one named session on the automation
/// server. Insertion order is kept for the profile menu.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    sessions: Vec<Session>,
    active: Option<String>,
}

impl ProfileRegistry {
    /// Rebuilds the registry from saved names; an unknown active name falls
    /// back to the first profile.
    pub fn restore(names: &[String], active: Option<&str>) -> Self {
        let mut registry = Self::default();
        for name in names {
            let _ = registry.add(name);
        }
        match active {
            Some(name) if registry.contains(name) => registry.active = Some(name.to_string()),
            _ => registry.active = registry.sessions.first().map(|s| s.name.clone()),
        }
        registry
    }

    pub fn names(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.iter().any(|s| s.name == name)
    }

    /// Adds a profile and makes it active. Returns the trimmed name.
    pub fn add(&mut self, name: &str) -> Result<String, ProfileError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        if self.contains(name) {
            return Err(ProfileError::Duplicate(name.to_string()));
        }
        self.sessions.push(Session::new(name));
        self.active = Some(name.to_string());
        Ok(name.to_string())
    }

    /// Removes the active profile; the first remaining one becomes active.
    pub fn remove_active(&mut self) -> Result<Session, ProfileError> {
        let name = self.active.clone().ok_or(ProfileError::NoneActive)?;
        let idx = self
            .sessions
            .iter()
            .position(|s| s.name == name)
            .ok_or(ProfileError::NoneActive)?;
        let removed = self.sessions.remove(idx);
        self.active = self.sessions.first().map(|s| s.name.clone());
        Ok(removed)
    }

    pub fn set_active(&mut self, name: &str) -> bool {
        if self.contains(name) {
            self.active = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Session> {
        let name = self.active.as_deref()?;
        self.sessions.iter().find(|s| s.name == name)
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.name == name)
    }

    pub fn active_connected(&self) -> bool {
        self.active().is_some_and(|s| s.connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_trims_and_activates() {
        let mut reg = ProfileRegistry::default();
        assert_eq!(reg.add("  Work ").unwrap(), "Work");
        assert_eq!(reg.active_name(), Some("Work"));
        assert_eq!(reg.add("Work"), Err(ProfileError::Duplicate("Work".into())));
        assert_eq!(reg.add("   "), Err(ProfileError::EmptyName));
        reg.add("Home").unwrap();
        assert_eq!(reg.names(), vec!["Work".to_string(), "Home".to_string()]);
        assert_eq!(reg.active_name(), Some("Home"));
    }

    #[test]
    fn removing_active_falls_back_to_first() {
        let mut reg = ProfileRegistry::restore(&["A".into(), "B".into(), "C".into()], Some("B"));
        assert_eq!(reg.remove_active().unwrap().name, "B");
        assert_eq!(reg.active_name(), Some("A"));
        reg.remove_active().unwrap();
        reg.remove_active().unwrap();
        assert!(reg.names().is_empty());
        assert_eq!(reg.active_name(), None);
        assert_eq!(reg.remove_active().unwrap_err(), ProfileError::NoneActive);
    }

    #[test]
    fn restore_ignores_unknown_active() {
        let reg = ProfileRegistry::restore(&["A".into(), "B".into()], Some("Z"));
        assert_eq!(reg.active_name(), Some("A"));
        let empty = ProfileRegistry::restore(&[], Some("Z"));
        assert!(empty.active().is_none());
    }

    #[test]
    fn connection_flag_follows_active_session() {
        let mut reg = ProfileRegistry::restore(&["A".into(), "B".into()], Some("A"));
        reg.session_mut("A").unwrap().connected = true;
        assert!(reg.active_connected());
        reg.set_active("B");
        assert!(!reg.active_connected());
        assert!(!reg.set_active("nope"));
    }
}
